//! Level Match Core
//!
//! Platform-agnostic audio types, the offline rendering seam, and error
//! handling shared by the Level Match libraries.
//!
//! # Architecture
//!
//! The core crate defines:
//! - **Audio Types**: `DecodedAudio` (decoder output), `WeightedAudio`, `SampleRate`
//! - **Core Traits**: `OfflineRenderer`, the capability used for filtering and oversampling
//! - **Error Handling**: Unified `CoreError` and `Result` types
//!
//! # Example
//!
//! ```rust
//! use levelmatch_core::{DecodedAudio, SampleRate};
//!
//! // One second of stereo silence at 44.1 kHz
//! let audio = DecodedAudio::new(vec![vec![0.0; 44_100]; 2], SampleRate::CD_QUALITY).unwrap();
//! assert_eq!(audio.channel_count(), 2);
//! assert!((audio.duration_secs() - 1.0).abs() < 1e-9);
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod error;
pub mod traits;
pub mod types;

// Re-export commonly used types
pub use error::{CoreError, Result};
pub use traits::{
    BiquadKind, BiquadSpec, IirSection, OfflineRenderer, RenderCapabilities, RenderGraph,
    RenderRequest,
};
pub use types::{DecodedAudio, SampleRate, WeightedAudio};
