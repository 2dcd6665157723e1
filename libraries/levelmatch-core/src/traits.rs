//! Core traits for Level Match

use crate::error::Result;
use crate::types::{DecodedAudio, SampleRate};
use async_trait::async_trait;
use std::sync::Arc;

/// One second-order IIR section, `a[0]` normalised to 1
///
/// Transfer function: `H(z) = (b0 + b1·z⁻¹ + b2·z⁻²) / (a0 + a1·z⁻¹ + a2·z⁻²)`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IirSection {
    /// Feedforward coefficients `[b0, b1, b2]`
    pub feedforward: [f64; 3],
    /// Feedback coefficients `[a0, a1, a2]`
    pub feedback: [f64; 3],
}

impl IirSection {
    /// Section from `[b0, b1, b2]` and `[a0, a1, a2]`
    pub const fn new(feedforward: [f64; 3], feedback: [f64; 3]) -> Self {
        Self {
            feedforward,
            feedback,
        }
    }
}

/// Filter shape of a parametric biquad
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum BiquadKind {
    /// Attenuates below the corner frequency
    HighPass,
    /// Boosts/cuts above the corner frequency
    HighShelf {
        /// Shelf gain in dB
        gain_db: f32,
    },
}

/// Parametric biquad description, coefficients derived by the renderer
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BiquadSpec {
    /// Filter shape
    pub kind: BiquadKind,
    /// Corner frequency
    pub frequency_hz: f32,
    /// Quality factor
    pub q: f32,
}

impl BiquadSpec {
    /// High-pass at `frequency_hz`
    pub fn high_pass(frequency_hz: f32, q: f32) -> Self {
        Self {
            kind: BiquadKind::HighPass,
            frequency_hz,
            q,
        }
    }

    /// High shelf of `gain_db` above `frequency_hz`
    pub fn high_shelf(frequency_hz: f32, gain_db: f32, q: f32) -> Self {
        Self {
            kind: BiquadKind::HighShelf { gain_db },
            frequency_hz,
            q,
        }
    }
}

/// Processing applied to the source while rendering
#[derive(Debug, Clone, PartialEq)]
pub enum RenderGraph {
    /// Source straight to the output (rate conversion only)
    Direct,
    /// Cascade of exact IIR sections
    Iir(Vec<IirSection>),
    /// Cascade of parametric biquads
    Biquad(Vec<BiquadSpec>),
}

/// What an [`OfflineRenderer`] can do
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RenderCapabilities {
    /// Arbitrary IIR sections with caller-supplied coefficients
    pub iir: bool,
    /// Parametric biquads
    pub biquad: bool,
    /// Rendering at a rate different from the source rate
    pub resample: bool,
}

impl RenderCapabilities {
    /// Everything supported
    pub const FULL: Self = Self {
        iir: true,
        biquad: true,
        resample: true,
    };

    /// Nothing beyond a same-rate direct render
    pub const NONE: Self = Self {
        iir: false,
        biquad: false,
        resample: false,
    };
}

/// A single offline render job
#[derive(Debug, Clone)]
pub struct RenderRequest {
    /// Output channel count
    pub channel_count: usize,
    /// Output length in frames
    pub frame_count: usize,
    /// Output sample rate
    pub sample_rate: SampleRate,
    /// Sample-accurate source
    pub source: Arc<DecodedAudio>,
    /// Processing between source and output
    pub graph: RenderGraph,
}

impl RenderRequest {
    /// Render `source` at `sample_rate` through `graph`, keeping the channel
    /// layout and the full source duration
    pub fn new(source: Arc<DecodedAudio>, sample_rate: SampleRate, graph: RenderGraph) -> Self {
        let frame_count = sample_rate.equivalent_frames(source.frames(), source.sample_rate());
        Self {
            channel_count: source.channel_count(),
            frame_count,
            sample_rate,
            source,
            graph,
        }
    }
}

/// Offline rendering capability
///
/// Implementers run a [`RenderRequest`] to completion and return planar
/// `f32` output with `channel_count` channels of `frame_count` frames each.
#[async_trait]
pub trait OfflineRenderer: Send + Sync {
    /// Features this renderer supports
    fn capabilities(&self) -> RenderCapabilities;

    /// Render the request
    ///
    /// # Errors
    /// Returns an error if the graph is unsupported or rendering fails
    async fn render(&self, request: RenderRequest) -> Result<Vec<Vec<f32>>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_spans_full_source_duration() {
        let source = Arc::new(
            DecodedAudio::new(vec![vec![0.0; 44_100]; 2], SampleRate::CD_QUALITY).unwrap(),
        );
        let request = RenderRequest::new(source, SampleRate::HIGH_RES_192, RenderGraph::Direct);

        assert_eq!(request.channel_count, 2);
        assert_eq!(request.frame_count, 192_000);
        assert_eq!(request.sample_rate, SampleRate::HIGH_RES_192);
    }

    #[test]
    fn biquad_spec_builders() {
        let hp = BiquadSpec::high_pass(60.0, 0.707);
        assert_eq!(hp.kind, BiquadKind::HighPass);

        let shelf = BiquadSpec::high_shelf(4000.0, 4.0, 0.707);
        assert_eq!(shelf.kind, BiquadKind::HighShelf { gain_db: 4.0 });
        assert_eq!(shelf.frequency_hz, 4000.0);
    }
}
