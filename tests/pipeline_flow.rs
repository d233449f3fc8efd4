use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use url::Url;

use thermal_relay::{
    ConnectionState, DisplaySink, EmulatorConfig, EmulatorDriver, FrameProcessor, IdentityKind,
    ImageUploader, MultipartPayload, PipelineError, RenderedFrame, SessionOptions, ThermalSession,
    UploadCadence, UploadReceipt, UploadTarget,
};

const WAIT: Duration = Duration::from_secs(10);

#[derive(Default)]
struct RecordingUploader {
    uploads: Mutex<Vec<(String, Vec<u8>)>>,
}

impl RecordingUploader {
    fn count(&self) -> usize {
        self.uploads.lock().unwrap().len()
    }
}

impl ImageUploader for RecordingUploader {
    fn upload(
        &self,
        endpoint: &Url,
        payload: &MultipartPayload,
    ) -> Result<UploadReceipt, PipelineError> {
        self.uploads
            .lock()
            .unwrap()
            .push((endpoint.to_string(), payload.body().to_vec()));
        Ok(UploadReceipt {
            status: 201,
            body: "{\"ok\":true}".to_string(),
        })
    }
}

/// Records sequence numbers; optionally slow to force backpressure.
struct SlowSink {
    seen: Arc<Mutex<Vec<u64>>>,
    delay: Duration,
}

impl DisplaySink for SlowSink {
    fn show(&mut self, frame: &RenderedFrame) {
        self.seen.lock().unwrap().push(frame.sequence());
        std::thread::sleep(self.delay);
    }
}

struct Harness {
    session: ThermalSession,
    uploader: Arc<RecordingUploader>,
    cadence: UploadCadence,
    seen: Arc<Mutex<Vec<u64>>>,
}

fn harness(emulator: EmulatorConfig, capacity: usize, display_delay: Duration) -> Harness {
    let uploader = Arc::new(RecordingUploader::default());
    let cadence = UploadCadence::from_position(20).expect("cadence");
    let seen = Arc::new(Mutex::new(Vec::new()));
    let session = ThermalSession::start(
        Arc::new(EmulatorDriver::new(emulator)),
        uploader.clone(),
        Box::new(SlowSink {
            seen: seen.clone(),
            delay: display_delay,
        }),
        SessionOptions {
            buffer_capacity: capacity,
            processor: FrameProcessor::default(),
            cadence: cadence.clone(),
            target: UploadTarget::new("http://uploads.test:8000/relay").expect("target"),
            device_id: "0001".to_string(),
            refresh_interval: Duration::from_millis(2),
        },
    )
    .expect("start session");
    Harness {
        session,
        uploader,
        cadence,
        seen,
    }
}

fn small_emulator() -> EmulatorConfig {
    EmulatorConfig {
        width: 16,
        height: 12,
        visible_width: 8,
        visible_height: 6,
        target_fps: 40,
        connect_delay: Duration::from_millis(20),
        ..EmulatorConfig::default()
    }
}

fn wait_until(mut done: impl FnMut() -> bool) -> bool {
    let started = Instant::now();
    while started.elapsed() < WAIT {
        if done() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    false
}

#[test]
fn streams_displays_and_uploads_until_disconnect() {
    let mut h = harness(small_emulator(), 21, Duration::ZERO);
    h.cadence.set_frequency(25.0).expect("fast cadence");

    h.session.scan().expect("scan");
    h.session
        .connect(IdentityKind::CppEmulator)
        .expect("connect")
        .wait()
        .expect("connected");
    assert_eq!(h.session.connection_state(), ConnectionState::Connected);

    assert!(wait_until(|| h.uploader.count() >= 3), "no uploads arrived");
    {
        let uploads = h.uploader.uploads.lock().unwrap();
        let (endpoint, body) = &uploads[0];
        assert_eq!(endpoint, "http://uploads.test:8000/relay/api/image/");
        assert!(body.windows(8).any(|w| w == b"\r\n0001\r\n"));
    }

    // Display order is production order.
    let seen = h.seen.lock().unwrap().clone();
    assert!(!seen.is_empty());
    assert!(seen.windows(2).all(|pair| pair[1] == pair[0] + 1), "{:?}", seen);

    h.session.disconnect().wait();
    let status = h.session.status();
    assert_eq!(status.connection, ConnectionState::Disconnected);
    assert!(status.camera.is_none());
    assert_eq!(status.uploads.failed, 0);

    // No uploads while disconnected.
    wait_until(|| h.session.status().uploads.in_flight == 0);
    let after_disconnect = h.uploader.count();
    std::thread::sleep(Duration::from_millis(200));
    assert_eq!(h.uploader.count(), after_disconnect);

    h.session.shutdown().expect("shutdown");
}

#[test]
fn full_buffer_throttles_the_camera_without_losing_frames() {
    let emulator = EmulatorConfig {
        target_fps: 0,
        ..small_emulator()
    };
    let capacity = 3;
    let h = harness(emulator, capacity, Duration::from_millis(15));
    h.cadence.set_position(0).expect("slow cadence");

    h.session
        .connect_identity(Some(thermal_relay::Identity::new(
            "C++ Emulator",
            thermal_relay::CommunicationInterface::Emulator,
        )))
        .expect("connect")
        .wait()
        .expect("connected");

    let max_depth = AtomicUsize::new(0);
    assert!(wait_until(|| {
        let status = h.session.status();
        max_depth.fetch_max(status.buffered_frames, Ordering::SeqCst);
        h.seen.lock().unwrap().len() >= 20
    }));
    assert!(max_depth.load(Ordering::SeqCst) <= capacity);

    let seen = h.seen.lock().unwrap().clone();
    assert_eq!(seen[0], 1);
    assert!(seen.windows(2).all(|pair| pair[1] == pair[0] + 1), "{:?}", seen);

    h.session.disconnect().wait();
    assert_eq!(h.session.connection_state(), ConnectionState::Disconnected);
    h.session.shutdown().expect("shutdown");
}

#[test]
fn camera_unplug_stops_uploads() {
    let emulator = EmulatorConfig {
        disconnect_after: Some(10),
        ..small_emulator()
    };
    let mut h = harness(emulator, 21, Duration::ZERO);
    h.session.scan().expect("scan");
    h.session
        .connect(IdentityKind::FlirOneEmulator)
        .expect("connect")
        .wait()
        .expect("connected");

    assert!(wait_until(
        || h.session.connection_state() == ConnectionState::Disconnected
    ));
    let status = h.session.status();
    assert_eq!(status.last_error.as_deref(), Some("emulated unplug"));

    // Leftover frames still reach the display.
    assert!(wait_until(|| h.seen.lock().unwrap().len() == 10));

    // Reconnecting works after an unplug.
    h.session
        .connect(IdentityKind::FlirOneEmulator)
        .expect("reconnect")
        .wait()
        .expect("connected again");
    h.session.shutdown().expect("shutdown");
}

#[test]
fn usage_errors_leave_state_untouched() {
    let mut h = harness(small_emulator(), 21, Duration::ZERO);

    assert!(matches!(
        h.session.connect(IdentityKind::CppEmulator),
        Err(PipelineError::NoTarget)
    ));
    assert_eq!(h.session.connection_state(), ConnectionState::Disconnected);

    h.session.scan().expect("scan");
    assert_eq!(h.session.connection_state(), ConnectionState::Discovered);
    assert!(matches!(
        h.session.connect(IdentityKind::Device),
        Err(PipelineError::NoTarget)
    ));

    h.session
        .connect(IdentityKind::CppEmulator)
        .expect("connect")
        .wait()
        .expect("connected");
    assert!(matches!(
        h.session.connect(IdentityKind::FlirOneEmulator),
        Err(PipelineError::AlreadyConnected)
    ));
    assert_eq!(h.session.connection_state(), ConnectionState::Connected);

    assert!(matches!(
        h.session.set_cadence_position(21),
        Err(PipelineError::InvalidCadence(_))
    ));
    assert!(matches!(
        h.session.set_base_url("mailto:someone@example.org"),
        Err(PipelineError::InvalidEndpoint(_))
    ));
    h.session.shutdown().expect("shutdown");
}

#[test]
fn refused_connection_reports_failure() {
    let emulator = EmulatorConfig {
        refuse_connections: true,
        ..small_emulator()
    };
    let mut h = harness(emulator, 21, Duration::ZERO);
    h.session.scan().expect("scan");
    let result = h
        .session
        .connect(IdentityKind::CppEmulator)
        .expect("spawned")
        .wait();
    assert!(matches!(result, Err(PipelineError::ConnectionFailure(_))));
    assert_eq!(h.session.connection_state(), ConnectionState::Disconnected);
    assert_eq!(h.uploader.count(), 0);
    h.session.shutdown().expect("shutdown");
}
