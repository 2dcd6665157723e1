//! Block energy integration with two-stage gating (ITU-R BS.1770)
//!
//! The weighted signal is cut into 400 ms blocks every 100 ms (75% overlap).
//! Each block's channel-weighted mean square gives an instantaneous loudness.
//! Blocks quieter than -70 LUFS are dropped (absolute gate), then blocks more
//! than 10 dB below the preliminary loudness are dropped (relative gate), and
//! the integrated loudness is taken over what remains.

use levelmatch_core::WeightedAudio;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Gating block duration (seconds)
pub const BLOCK_DURATION_SECS: f64 = 0.4;

/// Distance between block starts (seconds)
pub const STEP_DURATION_SECS: f64 = 0.1;

/// Absolute gate (LUFS)
pub const ABSOLUTE_GATE_LUFS: f64 = -70.0;

/// Relative gate, added to the preliminary loudness (dB)
pub const RELATIVE_GATE_OFFSET_DB: f64 = -10.0;

/// Constant term of the loudness formula
pub const LUFS_OFFSET: f64 = -0.691;

/// Index of the LFE channel in a 5.1 layout (L R C LFE Ls Rs)
const LFE_CHANNEL_INDEX: usize = 3;

/// One measured gating block
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BlockEnergy {
    /// Channel-weighted mean square
    pub mean_square: f64,
    /// Instantaneous loudness of the block (LUFS), `-inf` for silence
    pub loudness: f64,
}

/// Everything the integrator needs besides the sample buffers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GatingParams {
    pub channel_weights: Vec<f64>,
    pub block_size: usize,
    pub step_size: usize,
    pub total_samples: usize,
    pub absolute_gate: f64,
    pub relative_gate_offset: f64,
    pub lufs_offset: f64,
}

impl GatingParams {
    /// BS.1770 parameters for a weighted signal, block timing at its rate
    pub fn for_signal(weighted: &WeightedAudio) -> Self {
        let rate = weighted.sample_rate();
        let block_size = rate.frames_for(BLOCK_DURATION_SECS);
        let step_size = rate.frames_for(STEP_DURATION_SECS).min(block_size);

        Self {
            channel_weights: channel_weights(weighted.channel_count()),
            block_size,
            step_size,
            total_samples: weighted.frames(),
            absolute_gate: ABSOLUTE_GATE_LUFS,
            relative_gate_offset: RELATIVE_GATE_OFFSET_DB,
            lufs_offset: LUFS_OFFSET,
        }
    }
}

/// Per-channel loudness weights
///
/// Every channel counts fully, except the LFE channel of a 6-channel layout
/// which is excluded.
pub fn channel_weights(channel_count: usize) -> Vec<f64> {
    (0..channel_count)
        .map(|channel| {
            if channel_count == 6 && channel == LFE_CHANNEL_INDEX {
                0.0
            } else {
                1.0
            }
        })
        .collect()
}

/// Mean square to loudness; non-positive energy is `-inf`
pub fn energy_to_loudness(mean_square: f64, lufs_offset: f64) -> f64 {
    if mean_square <= 0.0 {
        f64::NEG_INFINITY
    } else {
        lufs_offset + 10.0 * mean_square.log10()
    }
}

/// Measure every gating block of a weighted signal
///
/// Blocks start at multiples of `step_size`; the trailing blocks are shorter
/// than `block_size` and are averaged over the samples they actually cover.
pub fn block_energies(channels: &[Vec<f32>], params: &GatingParams) -> Vec<BlockEnergy> {
    let available = channels.iter().map(Vec::len).min().unwrap_or(0);
    let total = params.total_samples.min(available);
    let step = params.step_size.max(1);
    let block = params.block_size.max(1);

    let mut blocks = Vec::with_capacity(total / step + 1);
    let mut start = 0;
    while start < total {
        let len = block.min(total - start);
        let mut mean_square = 0.0_f64;

        for (channel, samples) in channels.iter().enumerate() {
            let weight = params.channel_weights.get(channel).copied().unwrap_or(1.0);
            if weight == 0.0 {
                continue;
            }
            let sum: f64 = samples[start..start + len]
                .iter()
                .map(|&s| {
                    let s = f64::from(s);
                    s * s
                })
                .sum();
            mean_square += weight * (sum / len as f64);
        }

        blocks.push(BlockEnergy {
            mean_square,
            loudness: energy_to_loudness(mean_square, params.lufs_offset),
        });
        start += step;
    }

    blocks
}

fn mean_energy<'a>(blocks: impl Iterator<Item = &'a BlockEnergy>) -> Option<f64> {
    let (sum, count) = blocks.fold((0.0_f64, 0_usize), |(sum, count), block| {
        (sum + block.mean_square, count + 1)
    });
    (count > 0).then(|| sum / count as f64)
}

/// Apply the absolute and relative gates to measured blocks
///
/// Returns `None` when no block passes the absolute gate or the preliminary
/// loudness is not finite. If the relative gate removes every block, the
/// absolute-gated average is returned instead of `None`.
pub fn gated_loudness(
    blocks: &[BlockEnergy],
    absolute_gate: f64,
    relative_gate_offset: f64,
    lufs_offset: f64,
) -> Option<f64> {
    let absolute_gated: Vec<&BlockEnergy> = blocks
        .iter()
        .filter(|block| block.loudness > absolute_gate)
        .collect();
    if absolute_gated.is_empty() {
        debug!(blocks = blocks.len(), "No block above the absolute gate");
        return None;
    }

    let preliminary_energy = mean_energy(absolute_gated.iter().copied())?;
    let preliminary = lufs_offset + 10.0 * preliminary_energy.log10();
    if !preliminary.is_finite() {
        return None;
    }

    let relative_threshold = preliminary + relative_gate_offset;
    let relative_gated = absolute_gated
        .iter()
        .copied()
        .filter(|block| block.loudness >= relative_threshold);

    let integrated = match mean_energy(relative_gated) {
        Some(energy) => lufs_offset + 10.0 * energy.log10(),
        None => {
            debug!(
                preliminary,
                relative_threshold,
                "Relative gate removed every block, using absolute-gated average"
            );
            preliminary
        }
    };

    debug!(
        blocks = blocks.len(),
        absolute_gated = absolute_gated.len(),
        preliminary,
        integrated,
        "Gated loudness"
    );
    Some(integrated)
}

/// Integrated loudness of weighted channel buffers
pub fn integrated_loudness(channels: &[Vec<f32>], params: &GatingParams) -> Option<f64> {
    let blocks = block_energies(channels, params);
    gated_loudness(
        &blocks,
        params.absolute_gate,
        params.relative_gate_offset,
        params.lufs_offset,
    )
}
