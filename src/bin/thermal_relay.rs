//! thermal_relay - interactive thermal camera relay
//!
//! This binary:
//! 1. Loads configuration (JSON file + environment + flags)
//! 2. Starts the display loop and the upload timer
//! 3. Reads commands from stdin until `quit`, end of input or Ctrl-C
//!
//! Commands: url <base>, cadence <0-20>, scan, connect <camera>, disconnect,
//! status, help, quit.

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use std::io::BufRead;
use std::path::PathBuf;
use std::sync::mpsc;
use std::sync::Arc;

use thermal_relay::ui::{Ui, UiMode};
use thermal_relay::upload::MAX_CADENCE_POSITION;
use thermal_relay::{
    EmulatorDriver, FrameProcessor, HttpUploader, IdentityKind, LogDisplaySink, PipelineError,
    RelayConfig, SessionOptions, ThermalSession, UploadCadence, UploadTarget,
};

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Optional JSON configuration file.
    #[arg(long, env = "THERMAL_RELAY_CONFIG")]
    config: Option<PathBuf>,
    /// Upload base URL; `api/image/` is appended.
    #[arg(long)]
    base_url: Option<String>,
    /// Upload cadence slider position (0-20, 0.05-1.00 Hz).
    #[arg(long)]
    cadence: Option<u32>,
    /// Camera to connect to at startup (cpp, flir-one-emulator; device needs a hardware driver).
    #[arg(long)]
    camera: Option<String>,
    /// Progress output style.
    #[arg(long, value_enum, default_value_t = UiMode::Auto)]
    ui: UiMode,
}

#[derive(Debug, PartialEq)]
enum Command {
    Url(String),
    Cadence(u32),
    Scan,
    Connect(IdentityKind),
    Disconnect,
    Status,
    Help,
    Quit,
}

fn parse_command(line: &str) -> Result<Option<Command>> {
    let mut parts = line.split_whitespace();
    let Some(verb) = parts.next() else {
        return Ok(None);
    };
    let arg = parts.next();
    let command = match (verb.to_ascii_lowercase().as_str(), arg) {
        ("url", Some(base)) => Command::Url(base.to_string()),
        ("cadence", Some(position)) => {
            let position: u32 = position.parse().map_err(|_| {
                anyhow!("cadence expects an integer between 0 and {}", MAX_CADENCE_POSITION)
            })?;
            Command::Cadence(position)
        }
        ("scan", None) => Command::Scan,
        ("connect", Some(name)) => Command::Connect(
            IdentityKind::from_name(name)
                .ok_or_else(|| anyhow!("unknown camera '{}' (device, cpp, flir-one-emulator)", name))?,
        ),
        ("connect", None) => Command::Connect(IdentityKind::CppEmulator),
        ("disconnect", None) => Command::Disconnect,
        ("status", None) => Command::Status,
        ("help", _) | ("?", _) => Command::Help,
        ("quit", None) | ("exit", None) => Command::Quit,
        (verb, _) => return Err(anyhow!("unrecognized command '{}' (try 'help')", verb)),
    };
    Ok(Some(command))
}

const HELP: &str = "\
commands:
  url <base>          set the upload base url (api/image/ is appended)
  cadence <0-20>      set the upload rate, 0 = 0.05 Hz .. 20 = 1.00 Hz
  scan                look for cameras
  connect [camera]    connect to cpp (default), flir-one-emulator or device
                      (device needs a hardware driver; this build ships the emulator)
  disconnect          disconnect the camera
  status              print the relay status as JSON
  quit                disconnect and exit";

enum Event {
    Line(String),
    EndOfInput,
    Interrupt,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let mut cfg = RelayConfig::load_from(args.config.as_deref())?;
    if let Some(base_url) = args.base_url {
        cfg.base_url = Some(base_url);
    }
    if let Some(position) = args.cadence {
        cfg.cadence_position = position;
    }
    if let Some(camera) = args.camera.as_deref() {
        cfg.camera.kind = Some(
            IdentityKind::from_name(camera).ok_or_else(|| anyhow!("unknown camera '{}'", camera))?,
        );
    }
    let ui = Ui::detect(args.ui);

    let target = match cfg.base_url.as_deref() {
        Some(base_url) => UploadTarget::new(base_url)?,
        None => {
            log::warn!("no upload base url configured; set one with 'url <base>'");
            UploadTarget::unset()
        }
    };
    let options = SessionOptions {
        buffer_capacity: cfg.buffer_capacity,
        processor: FrameProcessor::new(cfg.temperature_range()?),
        cadence: UploadCadence::from_position(cfg.cadence_position)?,
        target,
        device_id: cfg.device_id.clone(),
        refresh_interval: cfg.display.refresh_interval,
    };
    let mut session = ThermalSession::start(
        Arc::new(EmulatorDriver::new(cfg.emulator_config())),
        Arc::new(HttpUploader::new(cfg.http_timeout)),
        Box::new(LogDisplaySink::new(cfg.display.log_every)),
        options,
    )?;

    if let Some(kind) = cfg.camera.kind {
        scan(&mut session);
        connect(&session, &ui, kind);
    }

    let (tx, rx) = mpsc::channel();
    let ctrlc_tx = tx.clone();
    ctrlc::set_handler(move || {
        let _ = ctrlc_tx.send(Event::Interrupt);
    })
    .context("set Ctrl-C handler")?;
    std::thread::Builder::new()
        .name("stdin".to_string())
        .spawn(move || {
            let stdin = std::io::stdin();
            for line in stdin.lock().lines() {
                match line {
                    Ok(line) => {
                        if tx.send(Event::Line(line)).is_err() {
                            return;
                        }
                    }
                    Err(err) => {
                        log::error!("failed to read stdin: {}", err);
                        break;
                    }
                }
            }
            let _ = tx.send(Event::EndOfInput);
        })
        .context("spawn stdin reader")?;

    eprintln!("{}", HELP);
    while let Ok(event) = rx.recv() {
        let line = match event {
            Event::Line(line) => line,
            Event::EndOfInput => {
                log::info!("end of input, shutting down");
                break;
            }
            Event::Interrupt => {
                log::info!("shutdown signal received");
                break;
            }
        };
        let command = match parse_command(&line) {
            Ok(Some(command)) => command,
            Ok(None) => continue,
            Err(err) => {
                eprintln!("{}", err);
                continue;
            }
        };
        match command {
            Command::Url(base) => match session.set_base_url(&base) {
                Ok(()) => println!("uploading to {}", session.status().endpoint.unwrap_or_default()),
                Err(err) => eprintln!("{}", err),
            },
            Command::Cadence(position) => match session.set_cadence_position(position) {
                Ok(hz) => println!("upload cadence {:.2} Hz", hz),
                Err(err) => eprintln!("{}", err),
            },
            Command::Scan => scan(&mut session),
            Command::Connect(kind) => connect(&session, &ui, kind),
            Command::Disconnect => {
                let _stage = ui.stage("Disconnect camera");
                session.disconnect().wait();
            }
            Command::Status => {
                let status = serde_json::to_string_pretty(&session.status())?;
                println!("{}", status);
            }
            Command::Help => println!("{}", HELP),
            Command::Quit => break,
        }
    }

    {
        let _stage = ui.stage("Shut down");
        session.shutdown()?;
    }
    Ok(())
}

fn scan(session: &mut ThermalSession) {
    match session.scan() {
        Ok(identities) if identities.is_empty() => println!("no cameras found"),
        Ok(identities) => {
            for identity in identities {
                println!("{:?}\t{}", identity.kind, identity);
            }
        }
        Err(err) => eprintln!("scan failed: {}", err),
    }
}

fn connect(session: &ThermalSession, ui: &Ui, kind: IdentityKind) {
    let task = match session.connect(kind) {
        Ok(task) => task,
        Err(PipelineError::NoTarget) => {
            eprintln!("{} (run 'scan' first)", PipelineError::NoTarget);
            return;
        }
        Err(err) => {
            eprintln!("{}", err);
            return;
        }
    };
    // The prompt stays usable while the camera connects.
    let mut stage = ui.stage(&format!("Connect {:?}", kind));
    let watcher = std::thread::Builder::new()
        .name("connect-progress".to_string())
        .spawn(move || {
            if let Err(err) = task.wait() {
                stage.fail(err.to_string());
            }
        });
    if let Err(err) = watcher {
        log::warn!("failed to spawn connect progress thread: {}", err);
    }
}
