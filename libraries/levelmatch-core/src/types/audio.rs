/// Audio-related types
use crate::error::{CoreError, Result};
use serde::{Deserialize, Serialize};

/// Sample rate in Hz
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SampleRate(pub u32);

impl SampleRate {
    /// 44.1 kHz
    pub const CD_QUALITY: Self = Self(44_100);
    /// 48 kHz
    pub const DVD_QUALITY: Self = Self(48_000);
    /// 96 kHz
    pub const HIGH_RES_96: Self = Self(96_000);
    /// 192 kHz
    pub const HIGH_RES_192: Self = Self(192_000);

    /// Rate at which the K-weighting coefficients are defined
    pub const LOUDNESS_REFERENCE: Self = Self::DVD_QUALITY;

    /// Create a new sample rate
    #[must_use]
    pub fn new(hz: u32) -> Self {
        Self(hz)
    }

    /// Get the sample rate as Hz
    pub fn as_hz(&self) -> u32 {
        self.0
    }

    /// Number of frames covering `seconds` at this rate (rounded, at least one)
    pub fn frames_for(&self, seconds: f64) -> usize {
        ((f64::from(self.0) * seconds).round() as usize).max(1)
    }

    /// Frame count at this rate spanning the same duration as `frames` at `from`
    pub fn equivalent_frames(&self, frames: usize, from: SampleRate) -> usize {
        if from.0 == 0 {
            return 0;
        }
        if from == *self {
            return frames;
        }
        (frames as u64 * u64::from(self.0)).div_ceil(u64::from(from.0)) as usize
    }
}

/// Decoded multichannel audio handed over by the decoder
///
/// Samples are stored planar (one `Vec<f32>` per channel) in the range [-1.0, 1.0].
/// The buffer is read-only once built; analyses share it behind an `Arc`.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedAudio {
    channels: Vec<Vec<f32>>,
    sample_rate: SampleRate,
    frames: usize,
}

impl DecodedAudio {
    /// Build from planar channel buffers
    ///
    /// # Errors
    /// Returns an error if there are no channels, the rate is zero or the
    /// channels differ in length.
    pub fn new(channels: Vec<Vec<f32>>, sample_rate: SampleRate) -> Result<Self> {
        if sample_rate.as_hz() == 0 {
            return Err(CoreError::InvalidSampleRate(sample_rate.as_hz()));
        }
        let frames = validate_planar(&channels)?;

        Ok(Self {
            channels,
            sample_rate,
            frames,
        })
    }

    /// Build from interleaved samples ([L, R, L, R, ...] for stereo)
    pub fn from_interleaved(
        samples: &[f32],
        channel_count: usize,
        sample_rate: SampleRate,
    ) -> Result<Self> {
        if channel_count == 0 {
            return Err(CoreError::InvalidChannelCount(0));
        }
        if samples.len() % channel_count != 0 {
            return Err(CoreError::invalid_input(format!(
                "Sample count {} is not divisible by channel count {}",
                samples.len(),
                channel_count
            )));
        }

        let frames = samples.len() / channel_count;
        let mut channels = vec![Vec::with_capacity(frames); channel_count];
        for frame in samples.chunks_exact(channel_count) {
            for (channel, &sample) in channels.iter_mut().zip(frame) {
                channel.push(sample);
            }
        }

        Self::new(channels, sample_rate)
    }

    /// Number of channels
    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    /// Sample rate of the decoded stream
    pub fn sample_rate(&self) -> SampleRate {
        self.sample_rate
    }

    /// Number of frames (samples per channel)
    pub fn frames(&self) -> usize {
        self.frames
    }

    /// Get the duration in seconds
    pub fn duration_secs(&self) -> f64 {
        self.frames as f64 / f64::from(self.sample_rate.as_hz())
    }

    /// All channels, planar
    pub fn channels(&self) -> &[Vec<f32>] {
        &self.channels
    }

    /// A single channel's samples
    pub fn channel(&self, index: usize) -> Option<&[f32]> {
        self.channels.get(index).map(Vec::as_slice)
    }

    /// Check if the buffer holds no frames
    pub fn is_empty(&self) -> bool {
        self.frames == 0
    }
}

/// K-weighted signal derived from a [`DecodedAudio`]
///
/// Same channel count as its source. The rate is the loudness reference rate
/// when weighting succeeded, or the source rate when it fell back to the
/// unweighted signal.
#[derive(Debug, Clone, PartialEq)]
pub struct WeightedAudio {
    channels: Vec<Vec<f32>>,
    sample_rate: SampleRate,
    frames: usize,
}

impl WeightedAudio {
    /// Wrap rendered planar buffers
    pub fn new(channels: Vec<Vec<f32>>, sample_rate: SampleRate) -> Result<Self> {
        if sample_rate.as_hz() == 0 {
            return Err(CoreError::InvalidSampleRate(sample_rate.as_hz()));
        }
        let frames = validate_planar(&channels)?;

        Ok(Self {
            channels,
            sample_rate,
            frames,
        })
    }

    /// The source signal copied through without any weighting
    pub fn unweighted(source: &DecodedAudio) -> Self {
        Self {
            channels: source.channels.clone(),
            sample_rate: source.sample_rate,
            frames: source.frames,
        }
    }

    /// Number of channels, same as the source
    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    /// Rate the weighted signal was rendered at
    pub fn sample_rate(&self) -> SampleRate {
        self.sample_rate
    }

    /// Frames per channel
    pub fn frames(&self) -> usize {
        self.frames
    }

    /// All channels, planar
    pub fn channels(&self) -> &[Vec<f32>] {
        &self.channels
    }
}

fn validate_planar(channels: &[Vec<f32>]) -> Result<usize> {
    let first = channels.first().ok_or(CoreError::InvalidChannelCount(0))?;
    let expected = first.len();

    for (channel, samples) in channels.iter().enumerate() {
        if samples.len() != expected {
            return Err(CoreError::ChannelLengthMismatch {
                channel,
                expected,
                actual: samples.len(),
            });
        }
    }

    Ok(expected)
}
