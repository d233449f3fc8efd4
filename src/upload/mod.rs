//! Rate-limited upload of the last displayed frame pair.
//!
//! - `cadence`: user-tunable frequency (slider 0..=20, 0.05..1.00 Hz)
//! - `payload`: snapshot + multipart/form-data body
//! - `client`: endpoint handling and the HTTP transport
//! - `scheduler`: the timer, gating and per-upload workers

pub mod cadence;
pub mod client;
pub mod payload;
pub mod scheduler;

pub use cadence::{
    position_to_hz, UploadCadence, DEFAULT_CADENCE_POSITION, MAX_CADENCE_POSITION,
    MIN_CADENCE_POSITION,
};
pub use client::{
    parse_base_url, HttpUploader, ImageUploader, UploadReceipt, UploadTarget,
    DEFAULT_HTTP_TIMEOUT, UPLOAD_PATH,
};
pub use payload::{MultipartBuilder, MultipartPayload, UploadSample, DEFAULT_DEVICE_ID};
pub use scheduler::{
    SchedulerState, SkipReason, TickOutcome, UploadHandle, UploadScheduler, UploadStats,
    UploadTicket,
};
