//! Messages crossing the offload boundary
//!
//! Wire shape (JSON, camelCase):
//!
//! ```text
//! → { "type": "analyze", "id": 1, "payload": { "weightedBuffers": [...], ... } }
//! ← { "type": "result",  "id": 1, "result": { "lufsIntegrated": -14.2, "peakDb": -0.3 } }
//! ← { "type": "error",   "id": 1, "error": "..." }
//! ```

use crate::analyzer::LoudnessMetrics;
use crate::error::OffloadError;
use crate::gating::{self, GatingParams};
use crate::true_peak::peak_to_db;
use levelmatch_core::{DecodedAudio, WeightedAudio};
use serde::{Deserialize, Serialize};

/// Inputs of one integration, moved to the worker on dispatch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisPayload {
    pub weighted_buffers: Vec<Vec<f32>>,
    pub original_buffers: Vec<Vec<f32>>,
    #[serde(flatten)]
    pub gating: GatingParams,
    pub original_length: usize,
}

impl AnalysisPayload {
    /// Copy the buffers of a weighted signal and its source into a payload
    pub fn new(weighted: &WeightedAudio, original: &DecodedAudio) -> Self {
        Self {
            weighted_buffers: weighted.channels().to_vec(),
            original_buffers: original.channels().to_vec(),
            gating: GatingParams::for_signal(weighted),
            original_length: original.frames(),
        }
    }

    /// Check buffer shapes against the declared lengths
    pub fn validate(&self) -> Result<(), OffloadError> {
        if self.gating.block_size == 0 || self.gating.step_size == 0 {
            return Err(OffloadError::InvalidPayload(
                "block and step sizes must be positive".to_string(),
            ));
        }
        if self.gating.step_size > self.gating.block_size {
            return Err(OffloadError::InvalidPayload(format!(
                "step size {} exceeds block size {}",
                self.gating.step_size, self.gating.block_size
            )));
        }
        if self.gating.channel_weights.len() != self.weighted_buffers.len() {
            return Err(OffloadError::InvalidPayload(format!(
                "{} channel weights for {} weighted channels",
                self.gating.channel_weights.len(),
                self.weighted_buffers.len()
            )));
        }
        if let Some(short) = self
            .weighted_buffers
            .iter()
            .position(|c| c.len() < self.gating.total_samples)
        {
            return Err(OffloadError::InvalidPayload(format!(
                "weighted channel {} shorter than {} samples",
                short, self.gating.total_samples
            )));
        }
        if let Some(short) = self
            .original_buffers
            .iter()
            .position(|c| c.len() < self.original_length)
        {
            return Err(OffloadError::InvalidPayload(format!(
                "original channel {} shorter than {} samples",
                short, self.original_length
            )));
        }
        Ok(())
    }
}

/// Integrated loudness and sample peak of borrowed buffers
///
/// Both the worker and the in-process fallback end up here, which keeps the
/// two paths bit-identical.
pub fn measure(
    weighted: &[Vec<f32>],
    original: &[Vec<f32>],
    original_length: usize,
    params: &GatingParams,
) -> LoudnessMetrics {
    let lufs_integrated = gating::integrated_loudness(weighted, params);

    let peak = original
        .iter()
        .flat_map(|channel| channel.iter().take(original_length))
        .fold(0.0_f32, |peak, &s| peak.max(s.abs()));

    LoudnessMetrics {
        lufs_integrated,
        peak_db: peak_to_db(peak),
    }
}

/// Run the integration described by a payload
pub fn compute_metrics(payload: &AnalysisPayload) -> LoudnessMetrics {
    measure(
        &payload.weighted_buffers,
        &payload.original_buffers,
        payload.original_length,
        &payload.gating,
    )
}

/// Request sent to the worker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum WorkerRequest {
    Analyze { id: u64, payload: AnalysisPayload },
}

impl WorkerRequest {
    /// Encode for a worker on the far side of a process boundary
    pub fn to_json(&self) -> Result<String, OffloadError> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Response sent back by the worker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum WorkerResponse {
    Result { id: u64, result: LoudnessMetrics },
    Error { id: u64, error: String },
}

impl WorkerResponse {
    /// Decode a worker's reply
    pub fn from_json(json: &str) -> Result<Self, OffloadError> {
        Ok(serde_json::from_str(json)?)
    }

    /// Correlation id of the request this answers
    pub fn id(&self) -> u64 {
        match self {
            Self::Result { id, .. } | Self::Error { id, .. } => *id,
        }
    }
}

/// Everything the manager can hear from a worker
#[derive(Debug, Clone, PartialEq)]
pub enum WorkerEvent {
    /// A per-request response
    Response(WorkerResponse),
    /// The worker itself failed; it will not answer anything else
    Fault(String),
}
