//! Core error types for Level Match

use thiserror::Error;

/// Result type alias using `CoreError`
pub type Result<T> = std::result::Result<T, CoreError>;

/// Core error type shared by the audio model and the rendering seam
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CoreError {
    /// Sample rate of zero or beyond what any renderer accepts
    #[error("Invalid sample rate: {0} Hz")]
    InvalidSampleRate(u32),

    /// Audio must carry at least one channel
    #[error("Invalid channel count: {0}")]
    InvalidChannelCount(usize),

    /// Planar channels disagree on their length
    #[error("Channel {channel} has {actual} frames, expected {expected}")]
    ChannelLengthMismatch {
        /// Index of the offending channel
        channel: usize,
        /// Frames in channel 0
        expected: usize,
        /// Frames in the offending channel
        actual: usize,
    },

    /// The renderer does not offer the requested capability
    #[error("Unsupported render graph: {0}")]
    Unsupported(String),

    /// Offline rendering failed
    #[error("Render error: {0}")]
    Render(String),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

impl CoreError {
    /// Create a render error
    pub fn render(msg: impl Into<String>) -> Self {
        Self::Render(msg.into())
    }

    /// Create an unsupported-graph error
    pub fn unsupported(msg: impl Into<String>) -> Self {
        Self::Unsupported(msg.into())
    }

    /// Create an invalid input error
    pub fn invalid_input(msg: impl Into<String>) -> Self {
        Self::InvalidInput(msg.into())
    }
}
