//! Connection controller.
//!
//! Owns at most one camera binding and serializes every state transition:
//!
//! ```text
//! DISCOVERED -> CONNECTING -> CONNECTED -> DISCONNECTING -> DISCONNECTED
//! ```
//!
//! `connect` and `disconnect` return immediately; the blocking driver calls run
//! on a background thread per operation. Only this module writes the state;
//! everything else observes it through a `ConnectionWatch`.
//!
//! While connected, the camera delivers into a `StreamPipeline` which runs the
//! `FrameProcessor` and enqueues into the shared `FrameBuffer`. Tearing down
//! closes the buffer first so a producer blocked on a full buffer is released.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, Weak};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use serde::Serialize;

use crate::buffer::FrameBuffer;
use crate::error::PipelineError;
use crate::frame::{FrameProcessor, RawFrame};
use crate::source::{CameraDriver, CameraLink, CameraRegistry, Identity, IdentityKind, StreamListener};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConnectionState {
    Discovered,
    Connecting,
    Connected,
    Disconnecting,
    Disconnected,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ConnectionState::Discovered => "DISCOVERED",
            ConnectionState::Connecting => "CONNECTING",
            ConnectionState::Connected => "CONNECTED",
            ConnectionState::Disconnecting => "DISCONNECTING",
            ConnectionState::Disconnected => "DISCONNECTED",
        };
        f.write_str(label)
    }
}

struct Binding {
    state: ConnectionState,
    identity: Option<Identity>,
    link: Option<Box<dyn CameraLink>>,
    /// Bumped on every connect; stale workers and callbacks compare against it.
    attempt: u64,
    last_error: Option<String>,
}

struct Shared {
    binding: Mutex<Binding>,
    changed: Condvar,
    buffer: Arc<FrameBuffer>,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, Binding> {
        self.binding
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn set_state(&self, binding: &mut Binding, state: ConnectionState) {
        if binding.state != state {
            let device = binding
                .identity
                .as_ref()
                .map(|identity| identity.device_id.as_str())
                .unwrap_or("-");
            log::info!("connection {}: {} -> {}", device, binding.state, state);
            binding.state = state;
        }
        self.changed.notify_all();
    }

    /// A connect attempt failed before the link was bound.
    fn fail_attempt(&self, attempt: u64, err: &PipelineError) {
        let mut binding = self.lock();
        if binding.attempt != attempt {
            return;
        }
        log::warn!("connect failed: {}", err);
        binding.last_error = Some(err.to_string());
        self.set_state(&mut binding, ConnectionState::Disconnected);
        binding.identity = None;
        drop(binding);
        self.buffer.close();
    }

    fn finish_teardown(&self, attempt: u64) {
        let mut binding = self.lock();
        if binding.attempt != attempt || binding.state == ConnectionState::Disconnected {
            return;
        }
        self.set_state(&mut binding, ConnectionState::Disconnected);
        binding.identity = None;
    }

    /// The camera dropped the connection on its own.
    fn remote_disconnect(&self, attempt: u64, reason: Option<String>) {
        let mut binding = self.lock();
        if binding.attempt != attempt {
            return;
        }
        if !matches!(
            binding.state,
            ConnectionState::Connected | ConnectionState::Connecting
        ) {
            return;
        }
        log::warn!(
            "camera disconnected: {}",
            reason.as_deref().unwrap_or("no reason given")
        );
        let link = binding.link.take();
        binding.last_error = reason;
        self.set_state(&mut binding, ConnectionState::Disconnected);
        binding.identity = None;
        drop(binding);

        self.buffer.close();
        // This runs on the camera's own callback thread; the link cannot be
        // torn down (joined) from here.
        if let Some(mut link) = link {
            let spawned = std::thread::Builder::new()
                .name("camera-teardown".to_string())
                .spawn(move || link.disconnect());
            if let Err(err) = spawned {
                log::error!("failed to spawn camera teardown thread: {}", err);
            }
        }
    }
}

// ----------------------------------------------------------------------------
// ConnectionWatch: read-only view
// ----------------------------------------------------------------------------

/// Read-only view of the connection state for the display and upload paths.
#[derive(Clone)]
pub struct ConnectionWatch {
    shared: Arc<Shared>,
}

impl ConnectionWatch {
    pub fn state(&self) -> ConnectionState {
        self.shared.lock().state
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    pub fn identity(&self) -> Option<Identity> {
        self.shared.lock().identity.clone()
    }

    /// Message of the last failed connect or remote disconnect.
    pub fn last_error(&self) -> Option<String> {
        self.shared.lock().last_error.clone()
    }

    /// Block until the state equals `target`. Returns false on timeout.
    pub fn wait_for(&self, target: ConnectionState, timeout: Duration) -> bool {
        self.wait_until(timeout, |state| state == target)
    }

    fn wait_until(&self, timeout: Duration, done: impl Fn(ConnectionState) -> bool) -> bool {
        let deadline = Instant::now() + timeout;
        let mut binding = self.shared.lock();
        loop {
            if done(binding.state) {
                return true;
            }
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            let (guard, _) = self
                .shared
                .changed
                .wait_timeout(binding, deadline - now)
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            binding = guard;
        }
    }

    fn wait_settled(&self) {
        let mut binding = self.shared.lock();
        while matches!(
            binding.state,
            ConnectionState::Connecting | ConnectionState::Disconnecting
        ) {
            binding = self
                .shared
                .changed
                .wait(binding)
                .unwrap_or_else(|poisoned| poisoned.into_inner());
        }
    }
}

// ----------------------------------------------------------------------------
// Background operations
// ----------------------------------------------------------------------------

/// Pending connect. Dropping it leaves the attempt running.
pub struct ConnectTask {
    join: JoinHandle<Result<(), PipelineError>>,
}

impl ConnectTask {
    pub fn wait(self) -> Result<(), PipelineError> {
        self.join.join().unwrap_or_else(|_| {
            Err(PipelineError::ConnectionFailure(
                "connect thread panicked".to_string(),
            ))
        })
    }

    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }
}

/// Pending disconnect.
pub struct DisconnectTask {
    join: Option<JoinHandle<()>>,
    watch: ConnectionWatch,
}

impl DisconnectTask {
    /// Wait until the controller has left CONNECTING/DISCONNECTING.
    pub fn wait(self) {
        if let Some(join) = self.join {
            if join.join().is_err() {
                log::error!("disconnect thread panicked");
            }
        }
        self.watch.wait_settled();
    }
}

// ----------------------------------------------------------------------------
// StreamPipeline: FrameSource -> FrameProcessor -> FrameBuffer
// ----------------------------------------------------------------------------

struct StreamPipeline {
    processor: FrameProcessor,
    buffer: Arc<FrameBuffer>,
    shared: Weak<Shared>,
    attempt: u64,
    dropped: AtomicU64,
}

impl StreamListener for StreamPipeline {
    fn on_frame(&self, frame: RawFrame) -> Result<(), PipelineError> {
        match self.processor.process(frame) {
            Ok(rendered) => self.buffer.enqueue(rendered).inspect_err(|err| {
                log::debug!("frame delivery stopped: {}", err);
            }),
            Err(err) if err.is_frame_scoped() => {
                let dropped = self.dropped.fetch_add(1, Ordering::SeqCst) + 1;
                log::warn!("dropping frame: {} ({} dropped so far)", err, dropped);
                Ok(())
            }
            Err(err) => Err(err),
        }
    }

    fn on_disconnected(&self, reason: Option<String>) {
        if let Some(shared) = self.shared.upgrade() {
            shared.remote_disconnect(self.attempt, reason);
        }
    }
}

fn run_connect(
    driver: Arc<dyn CameraDriver>,
    shared: Arc<Shared>,
    processor: FrameProcessor,
    identity: Identity,
    attempt: u64,
) -> Result<(), PipelineError> {
    let mut link = match driver.connect(&identity) {
        Ok(link) => link,
        Err(err) => {
            shared.fail_attempt(attempt, &err);
            return Err(err);
        }
    };

    let listener: Arc<dyn StreamListener> = Arc::new(StreamPipeline {
        processor,
        buffer: shared.buffer.clone(),
        shared: Arc::downgrade(&shared),
        attempt,
        dropped: AtomicU64::new(0),
    });
    if let Err(err) = link.subscribe(listener) {
        link.disconnect();
        shared.fail_attempt(attempt, &err);
        return Err(err);
    }

    let mut binding = shared.lock();
    if binding.attempt != attempt {
        // A newer connect owns the buffer now.
        drop(binding);
        log::debug!("discarding link of superseded connect attempt {}", attempt);
        link.disconnect();
        return Err(PipelineError::ConnectionFailure(
            "connect cancelled".to_string(),
        ));
    }
    if binding.state != ConnectionState::Connecting {
        // disconnect() (or the camera) won the race.
        drop(binding);
        shared.buffer.close();
        link.disconnect();
        shared.finish_teardown(attempt);
        return Err(PipelineError::ConnectionFailure(
            "connect cancelled".to_string(),
        ));
    }
    binding.link = Some(link);
    shared.set_state(&mut binding, ConnectionState::Connected);
    Ok(())
}

// ----------------------------------------------------------------------------
// ConnectionController
// ----------------------------------------------------------------------------

pub struct ConnectionController {
    driver: Arc<dyn CameraDriver>,
    processor: FrameProcessor,
    shared: Arc<Shared>,
    registry: CameraRegistry,
}

impl ConnectionController {
    pub fn new(
        driver: Arc<dyn CameraDriver>,
        processor: FrameProcessor,
        buffer: Arc<FrameBuffer>,
    ) -> Self {
        Self {
            driver,
            processor,
            shared: Arc::new(Shared {
                binding: Mutex::new(Binding {
                    state: ConnectionState::Disconnected,
                    identity: None,
                    link: None,
                    attempt: 0,
                    last_error: None,
                }),
                changed: Condvar::new(),
                buffer,
            }),
            registry: CameraRegistry::new(),
        }
    }

    pub fn watch(&self) -> ConnectionWatch {
        ConnectionWatch {
            shared: self.shared.clone(),
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.shared.lock().state
    }

    pub fn buffer(&self) -> &Arc<FrameBuffer> {
        &self.shared.buffer
    }

    pub fn registry(&self) -> &CameraRegistry {
        &self.registry
    }

    /// Ask the driver for cameras. Returns the number of newly found identities.
    pub fn scan(&mut self) -> Result<usize, PipelineError> {
        let found = self.driver.scan()?;
        let mut added = 0;
        for identity in found {
            log::info!("camera found: {}", identity);
            if self.registry.add(identity) {
                added += 1;
            }
        }
        if !self.registry.is_empty() {
            let mut binding = self.shared.lock();
            if binding.state == ConnectionState::Disconnected {
                self.shared
                    .set_state(&mut binding, ConnectionState::Discovered);
            }
        }
        Ok(added)
    }

    /// Connect to the first discovered camera of `kind`.
    pub fn connect_kind(&self, kind: IdentityKind) -> Result<ConnectTask, PipelineError> {
        self.connect(self.registry.find(kind).cloned())
    }

    /// Start connecting to `identity` on a background thread.
    ///
    /// Rejected synchronously, without any state change, with `AlreadyConnected`
    /// while a binding is active and with `NoTarget` when `identity` is `None`.
    pub fn connect(&self, identity: Option<Identity>) -> Result<ConnectTask, PipelineError> {
        let (identity, attempt) = {
            let mut binding = self.shared.lock();
            if matches!(
                binding.state,
                ConnectionState::Connecting
                    | ConnectionState::Connected
                    | ConnectionState::Disconnecting
            ) {
                log::warn!("connect rejected: only one camera connection at a time");
                return Err(PipelineError::AlreadyConnected);
            }
            let Some(identity) = identity else {
                log::warn!("connect rejected: no camera available");
                return Err(PipelineError::NoTarget);
            };
            binding.attempt += 1;
            binding.identity = Some(identity.clone());
            binding.last_error = None;
            self.shared
                .set_state(&mut binding, ConnectionState::Connecting);
            (identity, binding.attempt)
        };
        self.shared.buffer.reopen();

        let driver = self.driver.clone();
        let shared = self.shared.clone();
        let processor = self.processor;
        let spawned = std::thread::Builder::new()
            .name("camera-connect".to_string())
            .spawn(move || run_connect(driver, shared, processor, identity, attempt));
        match spawned {
            Ok(join) => Ok(ConnectTask { join }),
            Err(err) => {
                let err = PipelineError::ConnectionFailure(format!("spawn connect thread: {}", err));
                self.shared.fail_attempt(attempt, &err);
                Err(err)
            }
        }
    }

    /// Unsubscribe, tear down and move to DISCONNECTED on a background thread.
    /// Idempotent when nothing is connected.
    pub fn disconnect(&self) -> DisconnectTask {
        let watch = self.watch();
        let mut binding = self.shared.lock();
        let state = binding.state;
        match state {
            ConnectionState::Disconnected
            | ConnectionState::Discovered
            | ConnectionState::Disconnecting => DisconnectTask { join: None, watch },
            ConnectionState::Connecting => {
                // The connect worker sees this and tears its link down.
                self.shared
                    .set_state(&mut binding, ConnectionState::Disconnecting);
                drop(binding);
                self.shared.buffer.close();
                DisconnectTask { join: None, watch }
            }
            ConnectionState::Connected => {
                let link = binding.link.take();
                let attempt = binding.attempt;
                self.shared
                    .set_state(&mut binding, ConnectionState::Disconnecting);
                drop(binding);
                self.shared.buffer.close();

                let shared = self.shared.clone();
                let teardown = move || {
                    if let Some(mut link) = link {
                        link.unsubscribe();
                        link.disconnect();
                    }
                    shared.finish_teardown(attempt);
                };
                match std::thread::Builder::new()
                    .name("camera-disconnect".to_string())
                    .spawn(teardown)
                {
                    Ok(join) => DisconnectTask {
                        join: Some(join),
                        watch,
                    },
                    Err(err) => {
                        log::error!("failed to spawn disconnect thread: {}", err);
                        // The closure (and the link) was dropped; finish here.
                        self.shared.finish_teardown(attempt);
                        DisconnectTask { join: None, watch }
                    }
                }
            }
        }
    }
}

impl Drop for ConnectionController {
    fn drop(&mut self) {
        let link = {
            let mut binding = self.shared.lock();
            binding.link.take()
        };
        if let Some(mut link) = link {
            self.shared.buffer.close();
            link.unsubscribe();
            link.disconnect();
        }
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
