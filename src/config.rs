use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

use crate::buffer::DEFAULT_BUFFER_CAPACITY;
use crate::display::DEFAULT_REFRESH_INTERVAL;
use crate::frame::{
    TemperatureRange, DEFAULT_MAX_TEMP_C, DEFAULT_MIN_TEMP_C, DEFAULT_THERMAL_HEIGHT,
    DEFAULT_THERMAL_WIDTH,
};
use crate::source::{EmulatorConfig, IdentityKind};
use crate::upload::{
    parse_base_url, DEFAULT_CADENCE_POSITION, DEFAULT_DEVICE_ID, DEFAULT_HTTP_TIMEOUT,
    MAX_CADENCE_POSITION,
};

const DEFAULT_EMULATOR_FPS: u32 = 9;
const DEFAULT_DISPLAY_LOG_EVERY: u64 = 30;

#[derive(Debug, Deserialize, Default)]
struct RelayConfigFile {
    base_url: Option<String>,
    device_id: Option<String>,
    upload: Option<UploadConfigFile>,
    buffer: Option<BufferConfigFile>,
    temperature: Option<TemperatureConfigFile>,
    camera: Option<CameraConfigFile>,
    display: Option<DisplayConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
struct UploadConfigFile {
    cadence_position: Option<u32>,
    http_timeout_secs: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
struct BufferConfigFile {
    capacity: Option<usize>,
}

#[derive(Debug, Deserialize, Default)]
struct TemperatureConfigFile {
    min_c: Option<f64>,
    max_c: Option<f64>,
}

#[derive(Debug, Deserialize, Default)]
struct CameraConfigFile {
    kind: Option<String>,
    emulator_fps: Option<u32>,
    width: Option<u32>,
    height: Option<u32>,
}

#[derive(Debug, Deserialize, Default)]
struct DisplayConfigFile {
    refresh_ms: Option<u64>,
    log_every: Option<u64>,
}

#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Upload base URL. May also be supplied at runtime.
    pub base_url: Option<String>,
    pub device_id: String,
    pub cadence_position: u32,
    pub http_timeout: Duration,
    pub buffer_capacity: usize,
    pub temperature: TemperatureSettings,
    pub camera: CameraSettings,
    pub display: DisplaySettings,
}

#[derive(Debug, Clone)]
pub struct TemperatureSettings {
    pub min_c: f64,
    pub max_c: f64,
}

#[derive(Debug, Clone)]
pub struct CameraSettings {
    /// Camera to connect to at startup, if any.
    pub kind: Option<IdentityKind>,
    pub emulator_fps: u32,
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone)]
pub struct DisplaySettings {
    pub refresh_interval: Duration,
    /// Log one line every N displayed frames.
    pub log_every: u64,
}

impl RelayConfig {
    /// Defaults, then the JSON file named by `THERMAL_RELAY_CONFIG`, then env overrides.
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("THERMAL_RELAY_CONFIG")
            .ok()
            .filter(|path| !path.trim().is_empty());
        Self::load_from(config_path.as_deref().map(Path::new))
    }

    pub fn load_from(path: Option<&Path>) -> Result<Self> {
        let file_cfg = match path {
            Some(path) => Some(read_config_file(path)?),
            None => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default())?;
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: RelayConfigFile) -> Result<Self> {
        let upload = file.upload.unwrap_or_default();
        let temperature = file.temperature.unwrap_or_default();
        let camera = file.camera.unwrap_or_default();
        let display = file.display.unwrap_or_default();

        let kind = match camera.kind.as_deref() {
            Some(name) => Some(parse_camera_kind(name)?),
            None => None,
        };
        Ok(Self {
            base_url: file.base_url.filter(|url| !url.trim().is_empty()),
            device_id: file
                .device_id
                .unwrap_or_else(|| DEFAULT_DEVICE_ID.to_string()),
            cadence_position: upload
                .cadence_position
                .unwrap_or(DEFAULT_CADENCE_POSITION),
            http_timeout: upload
                .http_timeout_secs
                .map(Duration::from_secs)
                .unwrap_or(DEFAULT_HTTP_TIMEOUT),
            buffer_capacity: file
                .buffer
                .and_then(|buffer| buffer.capacity)
                .unwrap_or(DEFAULT_BUFFER_CAPACITY),
            temperature: TemperatureSettings {
                min_c: temperature.min_c.unwrap_or(DEFAULT_MIN_TEMP_C),
                max_c: temperature.max_c.unwrap_or(DEFAULT_MAX_TEMP_C),
            },
            camera: CameraSettings {
                kind,
                emulator_fps: camera.emulator_fps.unwrap_or(DEFAULT_EMULATOR_FPS),
                width: camera.width.unwrap_or(DEFAULT_THERMAL_WIDTH),
                height: camera.height.unwrap_or(DEFAULT_THERMAL_HEIGHT),
            },
            display: DisplaySettings {
                refresh_interval: display
                    .refresh_ms
                    .map(Duration::from_millis)
                    .unwrap_or(DEFAULT_REFRESH_INTERVAL),
                log_every: display.log_every.unwrap_or(DEFAULT_DISPLAY_LOG_EVERY),
            },
        })
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(url) = std::env::var("THERMAL_RELAY_BASE_URL") {
            if !url.trim().is_empty() {
                self.base_url = Some(url);
            }
        }
        if let Ok(device_id) = std::env::var("THERMAL_RELAY_DEVICE_ID") {
            if !device_id.trim().is_empty() {
                self.device_id = device_id;
            }
        }
        if let Ok(position) = std::env::var("THERMAL_RELAY_CADENCE_POSITION") {
            self.cadence_position = position.trim().parse().map_err(|_| {
                anyhow!("THERMAL_RELAY_CADENCE_POSITION must be an integer between 0 and 20")
            })?;
        }
        if let Ok(capacity) = std::env::var("THERMAL_RELAY_BUFFER_CAPACITY") {
            self.buffer_capacity = capacity.trim().parse().map_err(|_| {
                anyhow!("THERMAL_RELAY_BUFFER_CAPACITY must be a positive integer")
            })?;
        }
        if let Ok(camera) = std::env::var("THERMAL_RELAY_CAMERA") {
            if !camera.trim().is_empty() {
                self.camera.kind = Some(parse_camera_kind(&camera)?);
            }
        }
        if let Ok(timeout) = std::env::var("THERMAL_RELAY_HTTP_TIMEOUT_SECS") {
            let seconds: u64 = timeout.trim().parse().map_err(|_| {
                anyhow!("THERMAL_RELAY_HTTP_TIMEOUT_SECS must be an integer number of seconds")
            })?;
            self.http_timeout = Duration::from_secs(seconds);
        }
        Ok(())
    }

    fn validate(&mut self) -> Result<()> {
        if let Some(url) = &self.base_url {
            let parsed = parse_base_url(url)?;
            self.base_url = Some(parsed.to_string());
        }
        self.device_id = self.device_id.trim().to_string();
        if self.device_id.is_empty() {
            return Err(anyhow!("device_id must not be empty"));
        }
        if self.cadence_position > MAX_CADENCE_POSITION {
            return Err(anyhow!(
                "cadence position must be between 0 and {}, got {}",
                MAX_CADENCE_POSITION,
                self.cadence_position
            ));
        }
        if self.buffer_capacity == 0 {
            return Err(anyhow!("buffer capacity must be greater than zero"));
        }
        if self.http_timeout.is_zero() {
            return Err(anyhow!("http timeout must be greater than zero"));
        }
        TemperatureRange::new(self.temperature.min_c, self.temperature.max_c)?;
        if self.camera.width == 0 || self.camera.height == 0 {
            return Err(anyhow!("camera width and height must be greater than zero"));
        }
        if self.display.refresh_interval.is_zero() {
            return Err(anyhow!("display refresh interval must be greater than zero"));
        }
        Ok(())
    }

    pub fn temperature_range(&self) -> Result<TemperatureRange> {
        TemperatureRange::new(self.temperature.min_c, self.temperature.max_c)
    }

    pub fn emulator_config(&self) -> EmulatorConfig {
        EmulatorConfig {
            width: self.camera.width,
            height: self.camera.height,
            target_fps: self.camera.emulator_fps,
            ..EmulatorConfig::default()
        }
    }
}

fn parse_camera_kind(name: &str) -> Result<IdentityKind> {
    IdentityKind::from_name(name).ok_or_else(|| {
        anyhow!(
            "unknown camera '{}' (expected device, cpp or flir-one-emulator)",
            name.trim()
        )
    })
}

fn read_config_file(path: &Path) -> Result<RelayConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let cfg = serde_json::from_str(&raw)
        .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?;
    Ok(cfg)
}
