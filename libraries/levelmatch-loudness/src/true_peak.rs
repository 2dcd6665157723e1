//! True peak estimation
//!
//! The unweighted signal is rendered at `min(192 kHz, 4 × native rate)` and
//! scanned for its largest magnitude, which catches inter-sample peaks the
//! native samples miss. Without an oversampling renderer, or when the render
//! fails, the native-rate sample peak is reported instead.
//!
//! Results are in dB relative to full scale and never exceed 0 dB: overs are
//! reported as exactly 0.

use crate::settings::{DEFAULT_MAX_OVERSAMPLE_RATE_HZ, DEFAULT_OVERSAMPLE_FACTOR};
use crate::strategy::StrategyError;
use levelmatch_core::{DecodedAudio, OfflineRenderer, RenderGraph, RenderRequest, SampleRate};
use std::sync::Arc;
use tracing::{debug, warn};

/// Largest absolute sample across all channels
pub fn sample_peak(channels: &[Vec<f32>]) -> f32 {
    channels
        .iter()
        .flat_map(|channel| channel.iter())
        .fold(0.0_f32, |peak, &s| peak.max(s.abs()))
}

/// Linear peak to dBFS, ceiling-clipped at 0; `None` for a zero peak
pub fn peak_to_db(peak: f32) -> Option<f64> {
    if peak > 0.0 {
        Some((20.0 * f64::from(peak).log10()).min(0.0))
    } else {
        None
    }
}

/// How the peak was measured
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeakStrategy {
    /// Oversampled render scan
    Oversampled,
    /// Native-rate sample scan
    SamplePeak,
}

/// True peak estimator
#[derive(Debug, Clone)]
pub struct TruePeakEstimator {
    oversample_factor: u32,
    max_rate: SampleRate,
}

impl TruePeakEstimator {
    /// 4x oversampling, capped at 192 kHz
    pub fn new() -> Self {
        Self::with_oversampling(DEFAULT_OVERSAMPLE_FACTOR, DEFAULT_MAX_OVERSAMPLE_RATE_HZ)
    }

    pub fn with_oversampling(factor: u32, max_rate_hz: u32) -> Self {
        Self {
            oversample_factor: factor.max(1),
            max_rate: SampleRate::new(max_rate_hz),
        }
    }

    /// Rate the oversampled render runs at for a given source rate
    pub fn oversampled_rate(&self, native: SampleRate) -> SampleRate {
        let scaled = native.as_hz().saturating_mul(self.oversample_factor);
        SampleRate::new(scaled.min(self.max_rate.as_hz()))
    }

    /// Estimate the true peak of `audio` in dBFS
    pub async fn estimate(
        &self,
        renderer: &dyn OfflineRenderer,
        audio: &Arc<DecodedAudio>,
    ) -> (Option<f64>, PeakStrategy) {
        match self.oversampled_peak(renderer, audio).await {
            Ok(peak) => {
                let peak_db = peak_to_db(peak);
                debug!(?peak_db, "Oversampled true peak");
                return (peak_db, PeakStrategy::Oversampled);
            }
            Err(StrategyError::Unsupported(reason)) => {
                debug!(reason, "Oversampled true peak unavailable, using sample peak");
            }
            Err(StrategyError::Failed(e)) => {
                warn!(error = %e, "Oversampled render failed, using sample peak");
            }
        }

        (peak_to_db(sample_peak(audio.channels())), PeakStrategy::SamplePeak)
    }

    async fn oversampled_peak(
        &self,
        renderer: &dyn OfflineRenderer,
        audio: &Arc<DecodedAudio>,
    ) -> Result<f32, StrategyError> {
        let target = self.oversampled_rate(audio.sample_rate());
        if target <= audio.sample_rate() {
            return Err(StrategyError::Unsupported("no headroom above native rate"));
        }
        if !renderer.capabilities().resample {
            return Err(StrategyError::Unsupported("rate conversion"));
        }

        let request = RenderRequest::new(Arc::clone(audio), target, RenderGraph::Direct);
        let rendered = renderer.render(request).await?;

        // Resampling can shave a sample peak; never report below it
        Ok(sample_peak(&rendered).max(sample_peak(audio.channels())))
    }
}

impl Default for TruePeakEstimator {
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

    struct BrokenRenderer;

    #[async_trait]
    impl OfflineRenderer for BrokenRenderer {
        fn capabilities(&self) -> RenderCapabilities {
            RenderCapabilities::FULL
        }

        async fn render(&self, _request: RenderRequest) -> levelmatch_core::Result<Vec<Vec<f32>>> {
            Err(CoreError::render("out of memory"))
        }
    }

    fn audio(channels: Vec<Vec<f32>>, rate: SampleRate) -> Arc<DecodedAudio> {
        Arc::new(DecodedAudio::new(channels, rate).unwrap())
    }

    #[test]
    fn peak_to_db_clips_at_zero() {
        assert_eq!(peak_to_db(0.0), None);
        assert_eq!(peak_to_db(1.0), Some(0.0));
        assert_eq!(peak_to_db(1.5), Some(0.0));
        let half = peak_to_db(0.5).unwrap();
        assert!((half + 6.0206).abs() < 1e-3);
    }

    #[test]
    fn sample_peak_spans_channels() {
        let peak = sample_peak(&[vec![0.1, -0.2], vec![0.05, -0.7]]);
        assert_eq!(peak, 0.7);
    }

    #[test]
    fn oversampled_rate_is_capped() {
        let estimator = TruePeakEstimator::new();
        assert_eq!(estimator.oversampled_rate(SampleRate::CD_QUALITY).as_hz(), 176_400);
        assert_eq!(estimator.oversampled_rate(SampleRate::HIGH_RES_96).as_hz(), 192_000);
        assert_eq!(estimator.oversampled_rate(SampleRate::HIGH_RES_192).as_hz(), 192_000);
    }

    #[tokio::test]
    async fn silence_has_no_peak() {
        let silent = audio(vec![vec![0.0; 4410]; 2], SampleRate::CD_QUALITY);
        let (peak, _) = TruePeakEstimator::new()
            .estimate(&NativeRenderer::new(), &silent)
            .await;
        assert_eq!(peak, None);
    }

    #[tokio::test]
    async fn inter_sample_peak_is_found() {
        // fs/4 sine sampled 45 degrees off its crest: samples top out at 0.707
        let samples: Vec<f32> = (0..44_100)
            .map(|i| {
                let phase = std::f32::consts::FRAC_PI_2 * i as f32 + std::f32::consts::FRAC_PI_4;
                phase.sin() * 0.5
            })
            .collect();
        let source = audio(vec![samples], SampleRate::CD_QUALITY);

        let (peak, strategy) = TruePeakEstimator::new()
            .estimate(&NativeRenderer::new(), &source)
            .await;
        assert_eq!(strategy, PeakStrategy::Oversampled);

        let sample_peak_db = peak_to_db(sample_peak(source.channels())).unwrap();
        let true_peak_db = peak.unwrap();
        assert!(
            true_peak_db > sample_peak_db + 2.0,
            "true peak {:.2} dB should exceed sample peak {:.2} dB",
            true_peak_db,
            sample_peak_db
        );
    }

    #[tokio::test]
    async fn render_failure_uses_sample_peak() {
        let source = audio(vec![vec![0.25, -0.5, 0.125]], SampleRate::CD_QUALITY);
        let (peak, strategy) = TruePeakEstimator::new().estimate(&BrokenRenderer, &source).await;

        assert_eq!(strategy, PeakStrategy::SamplePeak);
        assert!((peak.unwrap() + 6.0206).abs() < 1e-3);
    }

    #[tokio::test]
    async fn no_resampling_uses_sample_peak() {
        let renderer = NativeRenderer::with_capabilities(RenderCapabilities::NONE);
        let source = audio(vec![vec![1.0; 100]], SampleRate::CD_QUALITY);
        let (peak, strategy) = TruePeakEstimator::new().estimate(&renderer, &source).await;

        assert_eq!(strategy, PeakStrategy::SamplePeak);
        assert_eq!(peak, Some(0.0));
    }
}
