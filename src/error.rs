//! Error taxonomy for the relay pipeline.
//!
//! Every failure is scoped to a single frame, connection attempt or upload
//! attempt. None of them is fatal to the process.

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PipelineError {
    /// Temperature sample count does not match the frame dimensions.
    #[error("malformed frame: expected {expected} temperature samples, got {actual}")]
    MalformedFrame { expected: usize, actual: usize },

    /// The visible-light image could not be decoded.
    #[error("failed to decode visible image: {0}")]
    DecodeError(String),

    /// An image could not be JPEG-encoded for upload.
    #[error("failed to encode image: {0}")]
    EncodeError(String),

    /// The frame buffer was shut down.
    #[error("frame buffer closed")]
    BufferClosed,

    /// I/O failure while connecting to or streaming from a camera.
    #[error("camera connection failed: {0}")]
    ConnectionFailure(String),

    /// Transport error or non-success response while uploading.
    #[error("upload failed: {0}")]
    UploadFailure(String),

    #[error("a camera is already connected or connecting")]
    AlreadyConnected,

    #[error("no camera available to connect to")]
    NoTarget,

    #[error("invalid upload cadence: {0}")]
    InvalidCadence(String),

    #[error("invalid upload endpoint: {0}")]
    InvalidEndpoint(String),
}

impl PipelineError {
    /// Frame-scoped errors: the frame is dropped and streaming continues.
    pub fn is_frame_scoped(&self) -> bool {
        matches!(
            self,
            PipelineError::MalformedFrame { .. } | PipelineError::DecodeError(_)
        )
    }
}
