//! Error types for loudness analysis

use levelmatch_core::CoreError;
use thiserror::Error;

/// Result type for loudness operations
pub type Result<T> = std::result::Result<T, LoudnessError>;

/// Errors that can occur while configuring or running an analysis
///
/// Analysis itself never fails: rendering and worker errors are recovered
/// inside the pipeline and only surface in logs. These variants are what the
/// recovering code sees before it falls back.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum LoudnessError {
    /// Settings failed validation
    #[error("Invalid analysis settings: {0}")]
    InvalidSettings(String),

    /// Offline rendering (filtering or oversampling) failed
    #[error("Rendering failed: {0}")]
    Render(#[from] CoreError),

    /// Renderer returned a buffer with the wrong shape
    #[error(
        "Rendered {actual_channels} channels x {actual_frames} frames, \
         expected {expected_channels} x {expected_frames}"
    )]
    RenderShape {
        expected_channels: usize,
        expected_frames: usize,
        actual_channels: usize,
        actual_frames: usize,
    },

    /// Offloaded analysis failed
    #[error("Offload failed: {0}")]
    Offload(#[from] OffloadError),
}

/// Errors crossing the offload boundary
#[derive(Error, Debug, Clone, PartialEq)]
pub enum OffloadError {
    /// No worker could be started
    #[error("Offload worker unavailable: {0}")]
    WorkerUnavailable(String),

    /// The worker faulted; every in-flight request is rejected with this
    #[error("Offload worker failed: {0}")]
    WorkerRuntime(String),

    /// The worker reported an error for this request only
    #[error("{0}")]
    Call(String),

    /// Payload failed validation inside the worker
    #[error("Invalid analysis payload: {0}")]
    InvalidPayload(String),

    /// The manager shut down before a response arrived
    #[error("Offload manager shut down")]
    Shutdown,

    /// A boundary message could not be encoded or decoded
    #[error("Message codec error: {0}")]
    Codec(String),
}

impl From<serde_json::Error> for OffloadError {
    fn from(err: serde_json::Error) -> Self {
        Self::Codec(err.to_string())
    }
}
