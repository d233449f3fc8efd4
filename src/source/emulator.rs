//! Built-in emulator camera.
//!
//! Exposes the two emulator identities a discovery scan normally reports and
//! streams synthetic frames from a producer thread:
//! - a temperature field at room temperature with a warm, slowly moving spot
//! - a JPEG-encoded visible image of the same scene at its own resolution
//!
//! The emulator is also how the relay is exercised without hardware: it can
//! refuse connections, delay them, or simulate an unplug after N frames.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use image::codecs::jpeg::JpegEncoder;
use image::{Rgb, RgbImage};
use rand::Rng;

use super::{
    CameraDriver, CameraLink, CommunicationInterface, Identity, IdentityKind, StreamListener,
    CPP_EMULATOR_MARKER, FLIR_ONE_EMULATOR_MARKER,
};
use crate::error::PipelineError;
use crate::frame::{RawFrame, VisibleImage, DEFAULT_THERMAL_HEIGHT, DEFAULT_THERMAL_WIDTH};

const STOP_POLL: Duration = Duration::from_millis(10);
const VISIBLE_JPEG_QUALITY: u8 = 80;

/// Configuration for the emulator camera.
#[derive(Clone, Debug)]
pub struct EmulatorConfig {
    /// Thermal grid width.
    pub width: u32,
    /// Thermal grid height.
    pub height: u32,
    pub visible_width: u32,
    pub visible_height: u32,
    /// Frames per second. Zero streams as fast as the listener accepts.
    pub target_fps: u32,
    /// Background temperature in Celsius.
    pub ambient_c: f64,
    /// Peak temperature of the warm spot in Celsius.
    pub spot_c: f64,
    /// Simulated time a connect call blocks for.
    pub connect_delay: Duration,
    /// Make every connect attempt fail with an I/O error.
    pub refuse_connections: bool,
    /// Report a disconnect after this many frames.
    pub disconnect_after: Option<u64>,
}

impl Default for EmulatorConfig {
    fn default() -> Self {
        Self {
            width: DEFAULT_THERMAL_WIDTH,
            height: DEFAULT_THERMAL_HEIGHT,
            visible_width: 240,
            visible_height: 320,
            target_fps: 9,
            ambient_c: 24.0,
            spot_c: 36.8,
            connect_delay: Duration::from_millis(250),
            refuse_connections: false,
            disconnect_after: None,
        }
    }
}

/// Emulator camera backend.
#[derive(Clone, Debug, Default)]
pub struct EmulatorDriver {
    config: EmulatorConfig,
}

impl EmulatorDriver {
    pub fn new(config: EmulatorConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &EmulatorConfig {
        &self.config
    }
}

impl CameraDriver for EmulatorDriver {
    fn scan(&self) -> Result<Vec<Identity>, PipelineError> {
        Ok(vec![
            Identity::new(CPP_EMULATOR_MARKER, CommunicationInterface::Emulator),
            Identity::new(FLIR_ONE_EMULATOR_MARKER, CommunicationInterface::Emulator),
        ])
    }

    fn connect(&self, identity: &Identity) -> Result<Box<dyn CameraLink>, PipelineError> {
        if identity.kind == IdentityKind::Device {
            return Err(PipelineError::ConnectionFailure(format!(
                "emulator cannot reach hardware camera {}",
                identity.device_id
            )));
        }
        std::thread::sleep(self.config.connect_delay);
        if self.config.refuse_connections {
            return Err(PipelineError::ConnectionFailure(format!(
                "{}: connection refused",
                identity.device_id
            )));
        }
        log::info!("emulator: connected to {}", identity);
        Ok(Box::new(EmulatorLink::new(
            self.config.clone(),
            identity.clone(),
        )))
    }
}

// ----------------------------------------------------------------------------
// Link
// ----------------------------------------------------------------------------

struct StreamThread {
    stop: Arc<AtomicBool>,
    join: JoinHandle<()>,
}

struct EmulatorLink {
    config: EmulatorConfig,
    identity: Identity,
    connected: bool,
    stream: Option<StreamThread>,
}

impl EmulatorLink {
    fn new(config: EmulatorConfig, identity: Identity) -> Self {
        Self {
            config,
            identity,
            connected: true,
            stream: None,
        }
    }
}

impl CameraLink for EmulatorLink {
    fn subscribe(&mut self, listener: Arc<dyn StreamListener>) -> Result<(), PipelineError> {
        if !self.connected {
            return Err(PipelineError::ConnectionFailure(format!(
                "{} is not connected",
                self.identity.device_id
            )));
        }
        if self.stream.is_some() {
            return Ok(());
        }

        let stop = Arc::new(AtomicBool::new(false));
        let stop_thread = stop.clone();
        let config = self.config.clone();
        let join = std::thread::Builder::new()
            .name("emulator-stream".to_string())
            .spawn(move || run_stream(config, listener, stop_thread))
            .map_err(|e| PipelineError::ConnectionFailure(format!("spawn stream thread: {}", e)))?;

        self.stream = Some(StreamThread { stop, join });
        log::debug!("emulator: stream subscribed for {}", self.identity.device_id);
        Ok(())
    }

    fn unsubscribe(&mut self) {
        if let Some(stream) = self.stream.take() {
            stream.stop.store(true, Ordering::SeqCst);
            if stream.join.join().is_err() {
                log::error!("emulator stream thread panicked");
            }
            log::debug!("emulator: stream unsubscribed for {}", self.identity.device_id);
        }
    }

    fn disconnect(&mut self) {
        self.unsubscribe();
        if self.connected {
            self.connected = false;
            log::info!("emulator: disconnected from {}", self.identity);
        }
    }

    fn is_streaming(&self) -> bool {
        self.stream
            .as_ref()
            .map(|stream| !stream.join.is_finished())
            .unwrap_or(false)
    }
}

impl Drop for EmulatorLink {
    fn drop(&mut self) {
        self.disconnect();
    }
}

fn run_stream(config: EmulatorConfig, listener: Arc<dyn StreamListener>, stop: Arc<AtomicBool>) {
    let mut scene = Scene::new(config.clone());
    let interval = frame_interval(config.target_fps);

    while !stop.load(Ordering::SeqCst) {
        let frame = scene.next_frame();
        if let Err(err) = listener.on_frame(frame) {
            log::debug!("emulator stream stopped: {}", err);
            return;
        }

        if let Some(limit) = config.disconnect_after {
            if scene.frame_count >= limit {
                log::info!("emulator: simulating unplug after {} frames", limit);
                listener.on_disconnected(Some("emulated unplug".to_string()));
                return;
            }
        }

        sleep_unless_stopped(interval, &stop);
    }
}

fn sleep_unless_stopped(total: Duration, stop: &AtomicBool) {
    let mut remaining = total;
    while !remaining.is_zero() {
        if stop.load(Ordering::SeqCst) {
            return;
        }
        let slice = remaining.min(STOP_POLL);
        std::thread::sleep(slice);
        remaining -= slice;
    }
}

fn frame_interval(target_fps: u32) -> Duration {
    if target_fps == 0 {
        Duration::from_millis(0)
    } else {
        Duration::from_millis((1000 / target_fps).max(1) as u64)
    }
}

// ----------------------------------------------------------------------------
// Synthetic scene
// ----------------------------------------------------------------------------

struct Scene {
    config: EmulatorConfig,
    frame_count: u64,
}

impl Scene {
    fn new(config: EmulatorConfig) -> Self {
        Self {
            config,
            frame_count: 0,
        }
    }

    /// Spot centre in normalized coordinates; drifts along a Lissajous path.
    fn spot_center(&self) -> (f64, f64) {
        let phase = self.frame_count as f64 * 0.05;
        (0.5 + 0.3 * phase.sin(), 0.5 + 0.3 * (phase * 0.7).cos())
    }

    fn next_frame(&mut self) -> RawFrame {
        self.frame_count += 1;
        let temperatures = self.temperature_field();
        let visible = self.visible_image();
        RawFrame::new(
            temperatures,
            self.config.width,
            self.config.height,
            visible,
        )
        .with_sequence(self.frame_count)
    }

    fn temperature_field(&self) -> Vec<f64> {
        let (width, height) = (self.config.width, self.config.height);
        let (cx, cy) = self.spot_center();
        let radius = 0.12f64;
        let lift = self.config.spot_c - self.config.ambient_c;
        let mut rng = rand::thread_rng();

        let mut samples = Vec::with_capacity(width as usize * height as usize);
        for y in 0..height {
            let ny = y as f64 / height.max(1) as f64;
            for x in 0..width {
                let nx = x as f64 / width.max(1) as f64;
                let d2 = (nx - cx).powi(2) + (ny - cy).powi(2);
                let spot = lift * (-d2 / (2.0 * radius * radius)).exp();
                // Slight vertical gradient, warmer towards the floor.
                let gradient = 1.5 * ny;
                let noise: f64 = rng.gen_range(-0.1..0.1);
                samples.push(self.config.ambient_c + gradient + spot + noise);
            }
        }
        samples
    }

    fn visible_image(&self) -> VisibleImage {
        let (width, height) = (self.config.visible_width, self.config.visible_height);
        let (cx, cy) = self.spot_center();
        let image = RgbImage::from_fn(width, height, |x, y| {
            let nx = x as f64 / width.max(1) as f64;
            let ny = y as f64 / height.max(1) as f64;
            let d2 = (nx - cx).powi(2) + (ny - cy).powi(2);
            if d2 < 0.01 {
                Rgb([224, 172, 140])
            } else {
                let shade = (60.0 + 120.0 * ny) as u8;
                Rgb([shade, shade, (shade as u16 + 30).min(255) as u8])
            }
        });

        let mut bytes = Vec::new();
        match JpegEncoder::new_with_quality(&mut bytes, VISIBLE_JPEG_QUALITY).encode_image(&image) {
            Ok(()) => VisibleImage::Encoded(bytes),
            Err(err) => {
                log::warn!("emulator: jpeg encode failed, sending raw rgb: {}", err);
                VisibleImage::Rgb {
                    width,
                    height,
                    pixels: image.into_raw(),
                }
            }
        }
    }
}
