//! Loudness analysis and level matching for Level Match
//!
//! This crate provides:
//! - ITU-R BS.1770 K-weighting with exact, approximate and unweighted fallbacks
//! - Gated integrated loudness (400 ms blocks, 75% overlap, -70 LUFS / -10 LU gates)
//! - Oversampled true peak estimation
//! - Background offload of the integration work with an in-process fallback
//! - Per-track attenuation so two tracks play back at matched loudness
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐     ┌──────────────┐     ┌────────────────┐
//! │ DecodedAudio │ ──► │ KWeighting   │ ──► │ OffloadManager │ ──► LUFS
//! └──────────────┘     └──────────────┘     │  (gating)      │
//!        │                                  └────────────────┘
//!        ▼
//! ┌──────────────────┐
//! │ TruePeakEstimator│ ──► dBTP
//! └──────────────────┘
//!
//! Two tracks:
//! ┌──────────────┐     ┌──────────────────┐     ┌───────────────┐
//! │ LUFS per key │ ──► │ OffsetCalculator │ ──► │ dB + gain     │
//! └──────────────┘     └──────────────────┘     └───────────────┘
//! ```
//!
//! # Example
//!
//! ```no_run
//! use levelmatch_core::DecodedAudio;
//! use levelmatch_loudness::LoudnessAnalyzer;
//! use std::sync::Arc;
//!
//! # async fn run(a: DecodedAudio, b: DecodedAudio) {
//! let analyzer = LoudnessAnalyzer::new();
//! let result = analyzer
//!     .analyze_pair(("A", Arc::new(a)), ("B", Arc::new(b)))
//!     .await;
//!
//! println!("A: {} (gain {:.3})", result.metrics[&"A"], result.gain(&"A"));
//! println!("B: {} (gain {:.3})", result.metrics[&"B"], result.gain(&"B"));
//! # }
//! ```

#![forbid(unsafe_code)]

pub mod analyzer;
pub mod error;
pub mod gating;
pub mod offload;
pub mod offset;
pub mod render;
pub mod settings;
mod strategy;
pub mod true_peak;
pub mod weighting;

pub use analyzer::{LoudnessAnalyzer, LoudnessMetrics, MatchResult};
pub use error::{LoudnessError, OffloadError, Result};
pub use gating::{integrated_loudness, GatingParams};
pub use offload::{
    compute_metrics, AnalysisPayload, OffloadManager, PendingAnalysis, ThreadWorkerSpawner,
    UnavailableSpawner, WorkerSpawner,
};
pub use offset::{linear_gain, OffsetCalculator, OffsetMap, DEFAULT_OFFSET_CAP_DB};
pub use render::NativeRenderer;
pub use settings::AnalysisSettings;
pub use true_peak::{PeakStrategy, TruePeakEstimator};
pub use weighting::{KWeighting, WeightingStrategy};
