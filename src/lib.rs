//! Thermal Relay
//!
//! Streams frames from a thermal camera, renders each frame's temperature grid
//! as an 8-bit grayscale image, shows the frames in order and periodically posts
//! the most recently shown frame pair to a remote endpoint.
//!
//! # Architecture
//!
//! ```text
//! camera callback ──> FrameProcessor ──> FrameBuffer (bounded, blocking) ──> DisplayPump
//!                                                                               │
//!                                           UploadScheduler <── LastDisplayed <─┘
//! ```
//!
//! Three timing regimes are decoupled:
//!
//! 1. **Producer**: camera callbacks at whatever rate the hardware delivers.
//!    Blocks on a full buffer instead of dropping frames.
//! 2. **Display**: drains the buffer FIFO on a refresh tick.
//! 3. **Upload**: a timer at a user-tunable cadence samples the last displayed
//!    frame. It never drains the buffer.
//!
//! The connection state is written only by `ConnectionController`; every other
//! component observes it.
//!
//! # Module Structure
//!
//! - `frame`: RawFrame, RenderedFrame, FrameProcessor, temperature mapping
//! - `buffer`: bounded FIFO between producer and display
//! - `source`: camera driver traits, identities, built-in emulator
//! - `connection`: connection state machine
//! - `display`: display loop and the last-displayed frame
//! - `upload`: cadence, multipart payload, HTTP client, scheduler
//! - `session`: wiring of all of the above
//! - `config`, `ui`: ambient configuration and terminal stages

pub mod buffer;
pub mod config;
pub mod connection;
pub mod display;
pub mod error;
pub mod frame;
pub mod session;
pub mod source;
pub mod ui;
pub mod upload;

pub use buffer::{FrameBuffer, TryEnqueueError, DEFAULT_BUFFER_CAPACITY};
pub use config::RelayConfig;
pub use connection::{
    ConnectTask, ConnectionController, ConnectionState, ConnectionWatch, DisconnectTask,
};
pub use display::{DisplayHandle, DisplayPump, DisplaySink, LastDisplayed, LogDisplaySink};
pub use error::PipelineError;
pub use frame::{
    scale_temperature, FrameProcessor, RawFrame, RenderedFrame, TemperatureRange,
    TemperatureSummary, VisibleImage,
};
pub use session::{SessionOptions, SessionStatus, ThermalSession};
pub use source::{
    CameraDriver, CameraLink, CameraRegistry, CommunicationInterface, EmulatorConfig,
    EmulatorDriver, Identity, IdentityKind, StreamListener,
};
pub use upload::{
    HttpUploader, ImageUploader, MultipartPayload, SchedulerState, UploadCadence, UploadReceipt,
    UploadSample, UploadScheduler, UploadStats, UploadTarget,
};
