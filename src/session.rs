//! One running relay: camera connection, frame buffer, display loop and upload timer.
//!
//! `ThermalSession` is the single owner of every shared piece. The interactive
//! thread drives it through `&mut self`; the display and upload threads only hold
//! the read-only views they were started with.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Serialize;

use crate::buffer::FrameBuffer;
use crate::connection::{ConnectTask, ConnectionController, ConnectionState, DisconnectTask};
use crate::display::{DisplayHandle, DisplayPump, DisplaySink, LastDisplayed};
use crate::error::PipelineError;
use crate::frame::FrameProcessor;
use crate::source::{CameraDriver, Identity, IdentityKind};
use crate::upload::{
    ImageUploader, SchedulerState, UploadCadence, UploadHandle, UploadScheduler, UploadStats,
    UploadTarget,
};

pub struct SessionOptions {
    pub buffer_capacity: usize,
    pub processor: FrameProcessor,
    pub cadence: UploadCadence,
    pub target: UploadTarget,
    pub device_id: String,
    pub refresh_interval: Duration,
}

/// Snapshot for the `status` command.
#[derive(Clone, Debug, Serialize)]
pub struct SessionStatus {
    pub connection: ConnectionState,
    pub camera: Option<String>,
    pub last_error: Option<String>,
    pub buffered_frames: usize,
    pub buffer_capacity: usize,
    pub frames_displayed: u64,
    pub upload_state: SchedulerState,
    pub upload_hz: f64,
    pub upload_period_ms: u64,
    pub endpoint: Option<String>,
    pub uploads: UploadStats,
}

pub struct ThermalSession {
    controller: ConnectionController,
    last_displayed: LastDisplayed,
    cadence: UploadCadence,
    target: UploadTarget,
    scheduler: UploadScheduler,
    display: Option<DisplayHandle>,
    uploads: Option<UploadHandle>,
}

impl ThermalSession {
    /// Start the display loop and the upload timer. No camera is connected yet.
    pub fn start(
        driver: Arc<dyn CameraDriver>,
        uploader: Arc<dyn ImageUploader>,
        sink: Box<dyn DisplaySink>,
        options: SessionOptions,
    ) -> Result<Self> {
        let buffer = Arc::new(FrameBuffer::new(options.buffer_capacity));
        let controller = ConnectionController::new(driver, options.processor, buffer.clone());
        let last_displayed = LastDisplayed::new();

        let display = DisplayPump::new(buffer, last_displayed.clone(), sink)
            .spawn(options.refresh_interval)
            .context("start display loop")?;

        let scheduler = UploadScheduler::new(
            controller.watch(),
            last_displayed.clone(),
            options.cadence.clone(),
            options.target.clone(),
            options.device_id,
            uploader,
        );
        let uploads = match scheduler.clone().spawn() {
            Ok(handle) => handle,
            Err(err) => {
                let _ = display.stop();
                return Err(err.context("start upload timer"));
            }
        };

        log::info!(
            "session started: buffer {} frames, upload every {} ms",
            controller.buffer().capacity(),
            options.cadence.period().as_millis()
        );
        Ok(Self {
            controller,
            last_displayed,
            cadence: options.cadence,
            target: options.target,
            scheduler,
            display: Some(display),
            uploads: Some(uploads),
        })
    }

    pub fn scan(&mut self) -> Result<&[Identity], PipelineError> {
        self.controller.scan()?;
        Ok(self.controller.registry().list())
    }

    pub fn connect(&self, kind: IdentityKind) -> Result<ConnectTask, PipelineError> {
        self.controller.connect_kind(kind)
    }

    pub fn connect_identity(&self, identity: Option<Identity>) -> Result<ConnectTask, PipelineError> {
        self.controller.connect(identity)
    }

    pub fn disconnect(&self) -> DisconnectTask {
        self.controller.disconnect()
    }

    pub fn set_base_url(&self, base_url: &str) -> Result<(), PipelineError> {
        self.target.set_base_url(base_url)
    }

    /// Returns the new frequency in Hz.
    pub fn set_cadence_position(&self, position: u32) -> Result<f64, PipelineError> {
        self.cadence.set_position(position)
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.controller.state()
    }

    pub fn status(&self) -> SessionStatus {
        let watch = self.controller.watch();
        let buffer = self.controller.buffer();
        SessionStatus {
            connection: watch.state(),
            camera: watch.identity().map(|identity| identity.device_id),
            last_error: watch.last_error(),
            buffered_frames: buffer.len(),
            buffer_capacity: buffer.capacity(),
            frames_displayed: self.last_displayed.shown_count(),
            upload_state: self.scheduler.state(),
            upload_hz: self.cadence.frequency(),
            upload_period_ms: self.cadence.period().as_millis() as u64,
            endpoint: self.target.endpoint().ok().map(|url| url.to_string()),
            uploads: self.scheduler.stats(),
        }
    }

    /// Disconnect the camera and stop both loops.
    pub fn shutdown(mut self) -> Result<()> {
        self.controller.disconnect().wait();
        if let Some(uploads) = self.uploads.take() {
            uploads.stop()?;
        }
        if let Some(display) = self.display.take() {
            display.stop()?;
        }
        log::info!("session stopped");
        Ok(())
    }
}

impl Drop for ThermalSession {
    fn drop(&mut self) {
        if let Some(uploads) = self.uploads.take() {
            if let Err(err) = uploads.stop() {
                log::error!("{:#}", err);
            }
        }
        if let Some(display) = self.display.take() {
            if let Err(err) = display.stop() {
                log::error!("{:#}", err);
            }
        }
    }
}
