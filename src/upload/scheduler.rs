//! Periodic upload of the last displayed frame.
//!
//! Every tick (period re-read from the cadence each time):
//! 1. skip unless the camera is CONNECTED and a frame has been displayed,
//! 2. snapshot the last displayed frame into an `UploadSample`,
//! 3. encode and POST it on a fresh worker thread.
//!
//! Uploads are not serialized: a slow server can lead to overlapping uploads.
//! Failures are logged and counted, never retried, and never change the timer.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use anyhow::{anyhow, Result};
use serde::Serialize;

use crate::connection::{ConnectionState, ConnectionWatch};
use crate::display::LastDisplayed;
use crate::error::PipelineError;
use crate::upload::cadence::UploadCadence;
use crate::upload::client::{ImageUploader, UploadReceipt, UploadTarget};
use crate::upload::payload::UploadSample;

/// Longest uninterrupted sleep of the timer thread, so `stop` stays responsive
/// even at 0.05 Hz.
const SHUTDOWN_POLL: Duration = Duration::from_millis(50);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SchedulerState {
    /// No camera connected.
    Idle,
    /// Connected, no upload in flight.
    Waiting,
    /// At least one upload in flight.
    Uploading,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct UploadStats {
    pub attempted: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub in_flight: u64,
    /// Uploads started while another was still running.
    pub overlapped: u64,
}

#[derive(Default)]
struct Counters {
    attempted: AtomicU64,
    succeeded: AtomicU64,
    failed: AtomicU64,
    in_flight: AtomicU64,
    overlapped: AtomicU64,
}

impl Counters {
    fn finish(&self, result: &Result<UploadReceipt, PipelineError>) {
        match result {
            Ok(_) => self.succeeded.fetch_add(1, Ordering::SeqCst),
            Err(_) => self.failed.fetch_add(1, Ordering::SeqCst),
        };
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Why a tick did not upload.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SkipReason {
    NotConnected(ConnectionState),
    NothingDisplayed,
}

pub enum TickOutcome {
    Skipped(SkipReason),
    Dispatched(UploadTicket),
    /// The upload could not even be started.
    Failed(PipelineError),
}

impl TickOutcome {
    pub fn is_dispatched(&self) -> bool {
        matches!(self, TickOutcome::Dispatched(_))
    }
}

/// One dispatched upload. Dropping the ticket lets the upload finish unobserved.
pub struct UploadTicket {
    sequence: u64,
    join: JoinHandle<Result<UploadReceipt, PipelineError>>,
}

impl UploadTicket {
    /// Sequence number of the frame being uploaded.
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub fn wait(self) -> Result<UploadReceipt, PipelineError> {
        self.join.join().unwrap_or_else(|_| {
            Err(PipelineError::UploadFailure("upload thread panicked".to_string()))
        })
    }
}

struct SchedulerInner {
    connection: ConnectionWatch,
    last_displayed: LastDisplayed,
    cadence: UploadCadence,
    target: UploadTarget,
    device_id: String,
    uploader: Arc<dyn ImageUploader>,
    counters: Counters,
}

#[derive(Clone)]
pub struct UploadScheduler {
    inner: Arc<SchedulerInner>,
}

impl UploadScheduler {
    pub fn new(
        connection: ConnectionWatch,
        last_displayed: LastDisplayed,
        cadence: UploadCadence,
        target: UploadTarget,
        device_id: impl Into<String>,
        uploader: Arc<dyn ImageUploader>,
    ) -> Self {
        Self {
            inner: Arc::new(SchedulerInner {
                connection,
                last_displayed,
                cadence,
                target,
                device_id: device_id.into(),
                uploader,
                counters: Counters::default(),
            }),
        }
    }

    pub fn state(&self) -> SchedulerState {
        if !self.inner.connection.is_connected() {
            SchedulerState::Idle
        } else if self.inner.counters.in_flight.load(Ordering::SeqCst) > 0 {
            SchedulerState::Uploading
        } else {
            SchedulerState::Waiting
        }
    }

    pub fn stats(&self) -> UploadStats {
        let c = &self.inner.counters;
        UploadStats {
            attempted: c.attempted.load(Ordering::SeqCst),
            succeeded: c.succeeded.load(Ordering::SeqCst),
            failed: c.failed.load(Ordering::SeqCst),
            in_flight: c.in_flight.load(Ordering::SeqCst),
            overlapped: c.overlapped.load(Ordering::SeqCst),
        }
    }

    pub fn cadence(&self) -> &UploadCadence {
        &self.inner.cadence
    }

    /// One timer tick.
    pub fn tick(&self) -> TickOutcome {
        let inner = &self.inner;
        let state = inner.connection.state();
        if state != ConnectionState::Connected {
            return TickOutcome::Skipped(SkipReason::NotConnected(state));
        }
        let Some(frame) = inner.last_displayed.latest() else {
            return TickOutcome::Skipped(SkipReason::NothingDisplayed);
        };

        let sample = UploadSample::capture(&frame, &inner.device_id);
        drop(frame);
        let sequence = sample.sequence();

        inner.counters.attempted.fetch_add(1, Ordering::SeqCst);
        let previous = inner.counters.in_flight.fetch_add(1, Ordering::SeqCst);
        if previous > 0 {
            inner.counters.overlapped.fetch_add(1, Ordering::SeqCst);
            log::warn!(
                "upload of frame #{} starts while {} upload(s) still in flight",
                sequence,
                previous
            );
        }

        let worker = self.inner.clone();
        let spawned = std::thread::Builder::new()
            .name("upload".to_string())
            .spawn(move || {
                let result = run_upload(&worker, &sample);
                worker.counters.finish(&result);
                result
            });
        match spawned {
            Ok(join) => TickOutcome::Dispatched(UploadTicket { sequence, join }),
            Err(err) => {
                let err = PipelineError::UploadFailure(format!("spawn upload thread: {}", err));
                log::warn!("upload of frame #{} failed: {}", sequence, err);
                let result = Err(err.clone());
                inner.counters.finish(&result);
                TickOutcome::Failed(err)
            }
        }
    }

    /// Run the timer on its own thread.
    pub fn spawn(self) -> Result<UploadHandle> {
        let shutdown = Arc::new(AtomicBool::new(false));
        let shutdown_thread = shutdown.clone();
        let join = std::thread::Builder::new()
            .name("upload-timer".to_string())
            .spawn(move || {
                log::debug!(
                    "upload timer started at {:.2} Hz",
                    self.inner.cadence.frequency()
                );
                loop {
                    let period = self.inner.cadence.period();
                    if !sleep_unless_stopped(period, &shutdown_thread) {
                        break;
                    }
                    match self.tick() {
                        TickOutcome::Dispatched(ticket) => {
                            log::debug!("upload of frame #{} dispatched", ticket.sequence());
                        }
                        TickOutcome::Skipped(reason) => {
                            log::trace!("upload tick skipped: {:?}", reason);
                        }
                        TickOutcome::Failed(_) => {}
                    }
                }
                log::debug!("upload timer stopped");
            })?;
        Ok(UploadHandle {
            shutdown,
            join: Some(join),
        })
    }
}

fn run_upload(
    inner: &SchedulerInner,
    sample: &UploadSample,
) -> Result<UploadReceipt, PipelineError> {
    let result = inner.target.endpoint().and_then(|endpoint| {
        let payload = sample.encode()?;
        log::debug!(
            "uploading frame #{} ({} bytes) to {}",
            sample.sequence(),
            payload.len(),
            endpoint
        );
        inner.uploader.upload(&endpoint, &payload)
    });
    match &result {
        Ok(receipt) => log::info!(
            "upload of frame #{} accepted ({}): {}",
            sample.sequence(),
            receipt.status,
            receipt.body.trim()
        ),
        Err(err) => log::warn!("upload of frame #{} failed: {}", sample.sequence(), err),
    }
    result
}

/// Sleep for `period` in short slices. Returns false if asked to stop.
fn sleep_unless_stopped(period: Duration, shutdown: &AtomicBool) -> bool {
    let deadline = Instant::now() + period;
    loop {
        if shutdown.load(Ordering::SeqCst) {
            return false;
        }
        let now = Instant::now();
        if now >= deadline {
            return true;
        }
        std::thread::sleep((deadline - now).min(SHUTDOWN_POLL));
    }
}

/// Stops the timer. In-flight uploads are left to finish on their own threads.
pub struct UploadHandle {
    shutdown: Arc<AtomicBool>,
    join: Option<JoinHandle<()>>,
}

impl UploadHandle {
    pub fn stop(mut self) -> Result<()> {
        self.shutdown.store(true, Ordering::SeqCst);
        if let Some(join) = self.join.take() {
            join.join()
                .map_err(|_| anyhow!("upload timer thread panicked"))?;
        }
        Ok(())
    }
}
