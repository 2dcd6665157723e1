//! K-weighting filter stage (ITU-R BS.1770)
//!
//! Produces the frequency-weighted signal the gated integrator measures.
//! Weighting is attempted through an ordered list of strategies:
//!
//! 1. **Exact** - the canonical 48 kHz shelf + RLB high-pass IIR cascade
//! 2. **Approximate** - 60 Hz high-pass + 4 kHz +4 dB high-shelf biquads (degraded)
//! 3. **Unweighted** - the source signal unchanged
//!
//! Strategies the renderer cannot run are skipped. A render failure always
//! lands on the unweighted signal. Weighting never returns an error.

use crate::error::LoudnessError;
use crate::strategy::StrategyError;
use levelmatch_core::{
    BiquadSpec, DecodedAudio, IirSection, OfflineRenderer, RenderGraph, RenderRequest,
    SampleRate, WeightedAudio,
};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, warn};

/// Stage 1: head-related high-shelf (48 kHz)
pub const K_WEIGHTING_SHELF: IirSection = IirSection::new(
    [1.53512485958697, -2.69169618940638, 1.19839281085285],
    [1.0, -1.69065929318241, 0.73248077421585],
);

/// Stage 2: revised low-frequency B-curve high-pass (48 kHz)
pub const K_WEIGHTING_HIGH_PASS: IirSection = IirSection::new(
    [1.0, -2.0, 1.0],
    [1.0, -1.99004745483398, 0.99007225036621],
);

/// Approximate stage 1: 4 kHz +4 dB high-shelf
const APPROX_SHELF_HZ: f32 = 4000.0;
const APPROX_SHELF_GAIN_DB: f32 = 4.0;

/// Approximate stage 2: 60 Hz high-pass
const APPROX_HIGH_PASS_HZ: f32 = 60.0;

const APPROX_Q: f32 = 0.707;

/// One way of producing the weighted signal
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WeightingStrategy {
    /// Canonical BS.1770 coefficients at 48 kHz
    Exact,
    /// Parametric biquad approximation
    Approximate,
    /// No weighting
    Unweighted,
}

impl WeightingStrategy {
    /// Default order, most accurate first
    pub const CHAIN: [Self; 3] = [Self::Exact, Self::Approximate, Self::Unweighted];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Exact => "exact",
            Self::Approximate => "approximate",
            Self::Unweighted => "unweighted",
        }
    }

    fn graph(self) -> RenderGraph {
        match self {
            Self::Exact => RenderGraph::Iir(vec![K_WEIGHTING_SHELF, K_WEIGHTING_HIGH_PASS]),
            Self::Approximate => RenderGraph::Biquad(vec![
                BiquadSpec::high_pass(APPROX_HIGH_PASS_HZ, APPROX_Q),
                BiquadSpec::high_shelf(APPROX_SHELF_HZ, APPROX_SHELF_GAIN_DB, APPROX_Q),
            ]),
            Self::Unweighted => RenderGraph::Direct,
        }
    }

    async fn apply(
        self,
        renderer: &dyn OfflineRenderer,
        audio: &Arc<DecodedAudio>,
    ) -> Result<WeightedAudio, StrategyError> {
        if self == Self::Unweighted {
            return Ok(WeightedAudio::unweighted(audio));
        }

        let capabilities = renderer.capabilities();
        let target = SampleRate::LOUDNESS_REFERENCE;
        if audio.sample_rate() != target && !capabilities.resample {
            return Err(StrategyError::Unsupported("rate conversion"));
        }
        match self {
            Self::Exact if !capabilities.iir => return Err(StrategyError::Unsupported("IIR")),
            Self::Approximate if !capabilities.biquad => {
                return Err(StrategyError::Unsupported("biquad"))
            }
            _ => {}
        }

        let request = RenderRequest::new(Arc::clone(audio), target, self.graph());
        let (expected_channels, expected_frames) = (request.channel_count, request.frame_count);
        let rendered = renderer.render(request).await?;

        let actual_frames = rendered.first().map_or(0, Vec::len);
        if rendered.len() != expected_channels || actual_frames != expected_frames {
            return Err(StrategyError::Failed(LoudnessError::RenderShape {
                expected_channels,
                expected_frames,
                actual_channels: rendered.len(),
                actual_frames,
            }));
        }

        Ok(WeightedAudio::new(rendered, target)?)
    }
}

impl fmt::Display for WeightingStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The K-weighting stage
#[derive(Debug, Clone)]
pub struct KWeighting {
    strategies: Vec<WeightingStrategy>,
}

impl KWeighting {
    /// Stage using the default strategy chain
    pub fn new() -> Self {
        Self {
            strategies: WeightingStrategy::CHAIN.to_vec(),
        }
    }

    /// Stage trying `strategies` in order; unweighted is always the last resort
    pub fn with_strategies(strategies: Vec<WeightingStrategy>) -> Self {
        Self { strategies }
    }

    /// Weight `audio`, reporting which strategy produced the result
    pub async fn apply(
        &self,
        renderer: &dyn OfflineRenderer,
        audio: &Arc<DecodedAudio>,
    ) -> (WeightedAudio, WeightingStrategy) {
        for &strategy in &self.strategies {
            match strategy.apply(renderer, audio).await {
                Ok(weighted) => {
                    if strategy == WeightingStrategy::Approximate {
                        warn!("Exact K-weighting unavailable, using approximate filters");
                    }
                    debug!(%strategy, frames = weighted.frames(), "K-weighting applied");
                    return (weighted, strategy);
                }
                Err(StrategyError::Unsupported(missing)) => {
                    debug!(%strategy, missing, "K-weighting strategy not supported by renderer");
                }
                Err(StrategyError::Failed(e)) => {
                    warn!(
                        %strategy,
                        error = %e,
                        "K-weighting render failed, measuring unweighted signal"
                    );
                    break;
                }
            }
        }

        warn!("No K-weighting applied, measuring unweighted signal");
        (WeightedAudio::unweighted(audio), WeightingStrategy::Unweighted)
    }
}

impl Default for KWeighting {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::NativeRenderer;
    use async_trait::async_trait;
    use levelmatch_core::{CoreError, RenderCapabilities};

    struct FailingRenderer;

    #[async_trait]
    impl OfflineRenderer for FailingRenderer {
        fn capabilities(&self) -> RenderCapabilities {
            RenderCapabilities::FULL
        }

        async fn render(&self, _request: RenderRequest) -> levelmatch_core::Result<Vec<Vec<f32>>> {
            Err(CoreError::render("context lost"))
        }
    }

    struct TruncatingRenderer;

    #[async_trait]
    impl OfflineRenderer for TruncatingRenderer {
        fn capabilities(&self) -> RenderCapabilities {
            RenderCapabilities::FULL
        }

        async fn render(&self, request: RenderRequest) -> levelmatch_core::Result<Vec<Vec<f32>>> {
            Ok(vec![vec![0.0; request.frame_count / 2]; request.channel_count])
        }
    }

    fn tone(rate: SampleRate, freq: f32, secs: f32) -> Arc<DecodedAudio> {
        let frames = (rate.as_hz() as f32 * secs) as usize;
        let samples: Vec<f32> = (0..frames)
            .map(|i| (2.0 * std::f32::consts::PI * freq * i as f32 / rate.as_hz() as f32).sin())
            .collect();
        Arc::new(DecodedAudio::new(vec![samples.clone(), samples], rate).unwrap())
    }

    fn rms(samples: &[f32]) -> f64 {
        let sum: f64 = samples.iter().map(|&s| f64::from(s) * f64::from(s)).sum();
        (sum / samples.len() as f64).sqrt()
    }

    #[tokio::test]
    async fn exact_weighting_at_reference_rate() {
        let audio = tone(SampleRate::LOUDNESS_REFERENCE, 1000.0, 1.0);
        let (weighted, strategy) = KWeighting::new().apply(&NativeRenderer::new(), &audio).await;

        assert_eq!(strategy, WeightingStrategy::Exact);
        assert_eq!(weighted.sample_rate(), SampleRate::LOUDNESS_REFERENCE);
        assert_eq!(weighted.frames(), audio.frames());

        // K-weighting adds roughly +0.7 dB at 1 kHz
        let settled = rms(&weighted.channels()[0][4800..]) / rms(&audio.channels()[0][4800..]);
        let gain_db = 20.0 * settled.log10();
        assert!((gain_db - 0.69).abs() < 0.1, "1 kHz gain was {:.3} dB", gain_db);
    }

    #[tokio::test]
    async fn exact_weighting_resamples_to_reference_rate() {
        let audio = tone(SampleRate::CD_QUALITY, 1000.0, 1.0);
        let (weighted, strategy) = KWeighting::new().apply(&NativeRenderer::new(), &audio).await;

        assert_eq!(strategy, WeightingStrategy::Exact);
        assert_eq!(weighted.sample_rate(), SampleRate::LOUDNESS_REFERENCE);
        assert_eq!(weighted.frames(), 48_000);
    }

    #[tokio::test]
    async fn low_frequencies_are_attenuated() {
        let audio = tone(SampleRate::LOUDNESS_REFERENCE, 20.0, 2.0);
        let (weighted, _) = KWeighting::new().apply(&NativeRenderer::new(), &audio).await;
        let ratio = rms(&weighted.channels()[0][48_000..]) / rms(&audio.channels()[0][48_000..]);
        assert!(ratio < 0.7, "20 Hz passed with ratio {}", ratio);
    }

    #[tokio::test]
    async fn falls_back_to_approximate_without_iir() {
        let renderer = NativeRenderer::with_capabilities(RenderCapabilities {
            iir: false,
            biquad: true,
            resample: true,
        });
        let audio = tone(SampleRate::CD_QUALITY, 1000.0, 0.5);
        let (weighted, strategy) = KWeighting::new().apply(&renderer, &audio).await;

        assert_eq!(strategy, WeightingStrategy::Approximate);
        assert_eq!(weighted.sample_rate(), SampleRate::LOUDNESS_REFERENCE);
    }

    #[tokio::test]
    async fn unsupported_everything_returns_source() {
        let renderer = NativeRenderer::with_capabilities(RenderCapabilities::NONE);
        let audio = tone(SampleRate::CD_QUALITY, 1000.0, 0.5);
        let (weighted, strategy) = KWeighting::new().apply(&renderer, &audio).await;

        assert_eq!(strategy, WeightingStrategy::Unweighted);
        assert_eq!(weighted.sample_rate(), SampleRate::CD_QUALITY);
        assert_eq!(weighted.channels(), audio.channels());
    }

    #[tokio::test]
    async fn render_failure_returns_source_unchanged() {
        let audio = tone(SampleRate::LOUDNESS_REFERENCE, 1000.0, 0.5);
        let (weighted, strategy) = KWeighting::new().apply(&FailingRenderer, &audio).await;

        assert_eq!(strategy, WeightingStrategy::Unweighted);
        assert_eq!(weighted.channels(), audio.channels());
    }

    #[tokio::test]
    async fn short_render_counts_as_failure() {
        let audio = tone(SampleRate::LOUDNESS_REFERENCE, 1000.0, 0.5);
        let (weighted, strategy) = KWeighting::new().apply(&TruncatingRenderer, &audio).await;

        assert_eq!(strategy, WeightingStrategy::Unweighted);
        assert_eq!(weighted.frames(), audio.frames());
    }
}
