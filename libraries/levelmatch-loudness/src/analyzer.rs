//! Track analysis orchestration
//!
//! ```text
//!                ┌──► K-weighting ──► offload / in-process integration ──► LUFS
//! DecodedAudio ──┤
//!                └──► true peak estimator ──────────────────────────────► dBTP
//! ```
//!
//! The weighting and true peak branches run concurrently. Analysis never
//! fails: every stage degrades to a simpler measurement and logs a warning.

use crate::error::Result;
use crate::gating::GatingParams;
use crate::offload::{measure, AnalysisPayload, OffloadManager};
use crate::offset::{OffsetCalculator, OffsetMap};
use crate::render::NativeRenderer;
use crate::settings::AnalysisSettings;
use crate::true_peak::TruePeakEstimator;
use crate::weighting::KWeighting;
use levelmatch_core::{DecodedAudio, OfflineRenderer, WeightedAudio};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Loudness of one track
///
/// `None` means the value could not be measured: loudness is `None` when no
/// block passes the absolute gate, peak only for an all-zero signal.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoudnessMetrics {
    /// Integrated loudness in LUFS
    pub lufs_integrated: Option<f64>,
    /// True peak in dBTP, never above 0
    pub peak_db: Option<f64>,
}

impl fmt::Display for LoudnessMetrics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.lufs_integrated {
            Some(lufs) => write!(f, "{:.1} LUFS", lufs)?,
            None => f.write_str("n/a LUFS")?,
        }
        match self.peak_db {
            Some(peak) => write!(f, ", {:.1} dBTP", peak),
            None => f.write_str(", n/a dBTP"),
        }
    }
}

/// Analysis of two tracks and the offsets that level-match them
#[derive(Debug, Clone, PartialEq)]
pub struct MatchResult<K: Ord> {
    pub metrics: BTreeMap<K, LoudnessMetrics>,
    pub offsets: OffsetMap<K>,
}

impl<K: Ord> MatchResult<K> {
    /// Attenuation for `key` in dB (0 for unknown keys)
    pub fn offset_db(&self, key: &K) -> f64 {
        self.offsets.get(key).unwrap_or(0.0)
    }

    /// Volume multiplier for `key` (1 for unknown keys)
    pub fn gain(&self, key: &K) -> f64 {
        self.offsets.gain(key).unwrap_or(1.0)
    }
}

/// BS.1770 loudness analyzer
///
/// # Example
///
/// ```no_run
/// use levelmatch_core::{DecodedAudio, SampleRate};
/// use levelmatch_loudness::LoudnessAnalyzer;
/// use std::sync::Arc;
///
/// # async fn run(left: Vec<f32>, right: Vec<f32>) {
/// let audio = DecodedAudio::new(vec![left, right], SampleRate::CD_QUALITY).unwrap();
/// let metrics = LoudnessAnalyzer::new().analyze(Arc::new(audio)).await;
/// println!("{}", metrics);
/// # }
/// ```
pub struct LoudnessAnalyzer {
    renderer: Arc<dyn OfflineRenderer>,
    offload: Option<Arc<OffloadManager>>,
    weighting: KWeighting,
    true_peak: TruePeakEstimator,
    offsets: OffsetCalculator,
    settings: AnalysisSettings,
}

impl LoudnessAnalyzer {
    /// Analyzer with default settings, the in-process renderer and the
    /// shared offload worker
    pub fn new() -> Self {
        let settings = AnalysisSettings::default();
        Self {
            renderer: Arc::new(NativeRenderer::new()),
            offload: Some(OffloadManager::global()),
            weighting: KWeighting::new(),
            true_peak: TruePeakEstimator::with_oversampling(
                settings.oversample_factor,
                settings.max_oversample_rate_hz,
            ),
            offsets: OffsetCalculator::with_cap(settings.offset_cap_db),
            settings,
        }
    }

    /// Analyzer configured from validated `settings`
    pub fn with_settings(settings: AnalysisSettings) -> Result<Self> {
        settings.validate()?;
        let analyzer = Self::new();
        Ok(Self {
            offload: settings.offload_enabled.then(OffloadManager::global),
            true_peak: TruePeakEstimator::with_oversampling(
                settings.oversample_factor,
                settings.max_oversample_rate_hz,
            ),
            offsets: OffsetCalculator::with_cap(settings.offset_cap_db),
            settings,
            ..analyzer
        })
    }

    /// Use `renderer` for weighting and oversampling
    pub fn with_renderer(mut self, renderer: Arc<dyn OfflineRenderer>) -> Self {
        self.renderer = renderer;
        self
    }

    /// Send integration work to `manager`
    pub fn with_offload(mut self, manager: Arc<OffloadManager>) -> Self {
        self.offload = Some(manager);
        self.settings.offload_enabled = true;
        self
    }

    /// Always integrate in-process
    pub fn without_offload(mut self) -> Self {
        self.offload = None;
        self.settings.offload_enabled = false;
        self
    }

    pub fn with_weighting(mut self, weighting: KWeighting) -> Self {
        self.weighting = weighting;
        self
    }

    pub fn settings(&self) -> &AnalysisSettings {
        &self.settings
    }

    pub fn offset_calculator(&self) -> &OffsetCalculator {
        &self.offsets
    }

    /// Measure integrated loudness and true peak of one track
    pub async fn analyze(&self, audio: Arc<DecodedAudio>) -> LoudnessMetrics {
        let renderer = self.renderer.as_ref();
        let ((weighted, weighting), (true_peak_db, peak_strategy)) = tokio::join!(
            self.weighting.apply(renderer, &audio),
            self.true_peak.estimate(renderer, &audio),
        );

        let integrated = self.integrate(&weighted, &audio).await;
        let metrics = LoudnessMetrics {
            lufs_integrated: integrated.lufs_integrated,
            peak_db: louder(true_peak_db, integrated.peak_db),
        };

        info!(
            %metrics,
            %weighting,
            peak = ?peak_strategy,
            channels = audio.channel_count(),
            duration_secs = audio.duration_secs(),
            "Track analyzed"
        );
        metrics
    }

    /// Analyze two tracks concurrently and level-match them
    ///
    /// Both keys should differ; a repeated key keeps the second track.
    pub async fn analyze_pair<K>(
        &self,
        first: (K, Arc<DecodedAudio>),
        second: (K, Arc<DecodedAudio>),
    ) -> MatchResult<K>
    where
        K: Ord + Clone,
    {
        let (first_metrics, second_metrics) =
            tokio::join!(self.analyze(first.1), self.analyze(second.1));

        let metrics: BTreeMap<K, LoudnessMetrics> =
            [(first.0, first_metrics), (second.0, second_metrics)]
                .into_iter()
                .collect();
        let offsets = self.offsets.offsets(
            metrics
                .iter()
                .map(|(key, m)| (key.clone(), m.lufs_integrated)),
        );

        debug!(target_lufs = ?offsets.target_lufs(), "Pair level-matched");
        MatchResult { metrics, offsets }
    }

    async fn integrate(&self, weighted: &WeightedAudio, audio: &DecodedAudio) -> LoudnessMetrics {
        if let Some(pending) = self
            .offload
            .as_ref()
            .and_then(|manager| manager.dispatch(|| AnalysisPayload::new(weighted, audio)))
        {
            match pending.await {
                Ok(metrics) => return metrics,
                Err(e) => warn!(error = %e, "Offloaded analysis failed, analyzing in-process"),
            }
        }

        let params = GatingParams::for_signal(weighted);
        measure(weighted.channels(), audio.channels(), audio.frames(), &params)
    }
}

impl Default for LoudnessAnalyzer {
    fn default() -> Self {
        Self::new()
    }
}

fn louder(a: Option<f64>, b: Option<f64>) -> Option<f64> {
    match (a, b) {
        (Some(a), Some(b)) => Some(a.max(b)),
        (a, b) => a.or(b),
    }
}
