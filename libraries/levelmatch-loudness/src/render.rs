//! In-process offline renderer
//!
//! Renders a [`RenderRequest`] on tokio's blocking pool:
//!
//! ```text
//! source ──► rate conversion (rubato) ──► length fit ──► IIR / biquad cascade ──► output
//! ```
//!
//! Capabilities can be narrowed with [`NativeRenderer::with_capabilities`] to
//! exercise the degraded paths of the analysis pipeline.

use async_trait::async_trait;
use biquad::{Biquad, Coefficients, DirectForm2Transposed, Hertz, Type};
use levelmatch_core::{
    BiquadKind, BiquadSpec, CoreError, IirSection, OfflineRenderer, RenderCapabilities,
    RenderGraph, RenderRequest, Result, SampleRate,
};
use rubato::{
    Resampler as RubatoResamplerTrait, SincFixedIn, SincInterpolationParameters,
    SincInterpolationType, WindowFunction,
};
use tracing::debug;

/// Input frames handed to rubato per call
const RESAMPLER_CHUNK_FRAMES: usize = 2048;

/// Offline renderer running entirely in this process
#[derive(Debug, Clone)]
pub struct NativeRenderer {
    capabilities: RenderCapabilities,
}

impl NativeRenderer {
    /// Renderer with every capability enabled
    pub fn new() -> Self {
        Self {
            capabilities: RenderCapabilities::FULL,
        }
    }

    /// Renderer advertising (and enforcing) only `capabilities`
    pub fn with_capabilities(capabilities: RenderCapabilities) -> Self {
        Self { capabilities }
    }

    fn check_supported(&self, request: &RenderRequest) -> Result<()> {
        if request.sample_rate != request.source.sample_rate() && !self.capabilities.resample {
            return Err(CoreError::unsupported("rate conversion"));
        }
        match request.graph {
            RenderGraph::Iir(_) if !self.capabilities.iir => {
                Err(CoreError::unsupported("IIR sections"))
            }
            RenderGraph::Biquad(_) if !self.capabilities.biquad => {
                Err(CoreError::unsupported("biquad filters"))
            }
            _ => Ok(()),
        }
    }
}

impl Default for NativeRenderer {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl OfflineRenderer for NativeRenderer {
    fn capabilities(&self) -> RenderCapabilities {
        self.capabilities
    }

    async fn render(&self, request: RenderRequest) -> Result<Vec<Vec<f32>>> {
        self.check_supported(&request)?;

        tokio::task::spawn_blocking(move || render_blocking(&request))
            .await
            .map_err(|e| CoreError::render(format!("Render task failed: {}", e)))?
    }
}

fn render_blocking(request: &RenderRequest) -> Result<Vec<Vec<f32>>> {
    if request.channel_count != request.source.channel_count() {
        return Err(CoreError::invalid_input(format!(
            "Cannot render {} source channels into {}",
            request.source.channel_count(),
            request.channel_count
        )));
    }

    let mut channels = resample(
        request.source.channels(),
        request.source.sample_rate(),
        request.sample_rate,
        request.frame_count,
    )?;
    for channel in &mut channels {
        channel.resize(request.frame_count, 0.0);
    }

    match &request.graph {
        RenderGraph::Direct => {}
        RenderGraph::Iir(sections) => {
            for channel in &mut channels {
                apply_iir(channel, sections)?;
            }
        }
        RenderGraph::Biquad(specs) => {
            for channel in &mut channels {
                apply_biquads(channel, specs, request.sample_rate)?;
            }
        }
    }

    debug!(
        channels = channels.len(),
        frames = request.frame_count,
        rate = request.sample_rate.as_hz(),
        "Offline render complete"
    );
    Ok(channels)
}

/// Convert planar audio between rates, compensating the resampler delay
fn resample(
    channels: &[Vec<f32>],
    from: SampleRate,
    to: SampleRate,
    frame_count: usize,
) -> Result<Vec<Vec<f32>>> {
    if from == to {
        return Ok(channels.to_vec());
    }

    let total = channels.first().map_or(0, Vec::len);
    if total == 0 {
        return Ok(vec![Vec::new(); channels.len()]);
    }

    let ratio = f64::from(to.as_hz()) / f64::from(from.as_hz());
    let params = SincInterpolationParameters {
        sinc_len: 256,
        f_cutoff: 0.95,
        interpolation: SincInterpolationType::Cubic,
        oversampling_factor: 256,
        window: WindowFunction::BlackmanHarris2,
    };
    let mut resampler =
        SincFixedIn::<f32>::new(ratio, 1.0, params, RESAMPLER_CHUNK_FRAMES, channels.len())
            .map_err(|e| CoreError::render(format!("SincFixedIn creation failed: {}", e)))?;

    let delay = resampler.output_delay();
    let wanted = frame_count + delay;
    let mut output: Vec<Vec<f32>> = vec![Vec::with_capacity(wanted); channels.len()];

    let mut position = 0;
    loop {
        let needed = resampler.input_frames_next();
        if position + needed > total {
            break;
        }
        let chunk: Vec<&[f32]> = channels
            .iter()
            .map(|c| &c[position..position + needed])
            .collect();
        let rendered = resampler
            .process(chunk.as_slice(), None)
            .map_err(|e| CoreError::render(format!("Resampling failed: {}", e)))?;
        append_planar(&mut output, rendered);
        position += needed;
    }

    if position < total {
        let chunk: Vec<&[f32]> = channels.iter().map(|c| &c[position..]).collect();
        let rendered = resampler
            .process_partial(Some(chunk.as_slice()), None)
            .map_err(|e| CoreError::render(format!("Resampling failed: {}", e)))?;
        append_planar(&mut output, rendered);
    }

    // Drain the filter delay line with silence until the tail is out
    while output[0].len() < wanted {
        let before = output[0].len();
        let rendered = resampler
            .process_partial(None::<&[Vec<f32>]>, None)
            .map_err(|e| CoreError::render(format!("Resampler flush failed: {}", e)))?;
        append_planar(&mut output, rendered);
        if output[0].len() == before {
            break;
        }
    }

    for channel in &mut output {
        channel.drain(..delay.min(channel.len()));
        channel.truncate(frame_count);
    }
    Ok(output)
}

fn append_planar(output: &mut [Vec<f32>], rendered: Vec<Vec<f32>>) {
    for (out, chunk) in output.iter_mut().zip(rendered) {
        out.extend_from_slice(&chunk);
    }
}

/// Coefficients of an exact section, normalised so `a0` is 1
fn iir_coefficients(section: &IirSection) -> Result<Coefficients<f64>> {
    let [a0, a1, a2] = section.feedback;
    if a0 == 0.0 || !a0.is_finite() {
        return Err(CoreError::invalid_input("IIR feedback a0 must be non-zero"));
    }
    let [b0, b1, b2] = section.feedforward;

    Ok(Coefficients {
        a1: a1 / a0,
        a2: a2 / a0,
        b0: b0 / a0,
        b1: b1 / a0,
        b2: b2 / a0,
    })
}

fn apply_iir(samples: &mut [f32], sections: &[IirSection]) -> Result<()> {
    let mut filters = sections
        .iter()
        .map(|section| iir_coefficients(section).map(DirectForm2Transposed::<f64>::new))
        .collect::<Result<Vec<_>>>()?;

    for sample in samples.iter_mut() {
        let mut x = f64::from(*sample);
        for filter in &mut filters {
            x = filter.run(x);
        }
        *sample = x as f32;
    }
    Ok(())
}

fn biquad_coefficients(spec: &BiquadSpec, sample_rate: SampleRate) -> Result<Coefficients<f32>> {
    let filter = match spec.kind {
        BiquadKind::HighPass => Type::HighPass,
        BiquadKind::HighShelf { gain_db } => Type::HighShelf(gain_db),
    };
    let fs = Hertz::<f32>::from_hz(sample_rate.as_hz() as f32)
        .map_err(|e| CoreError::render(format!("Invalid render rate: {:?}", e)))?;
    let f0 = Hertz::<f32>::from_hz(spec.frequency_hz)
        .map_err(|e| CoreError::render(format!("Invalid filter frequency: {:?}", e)))?;

    Coefficients::<f32>::from_params(filter, fs, f0, spec.q)
        .map_err(|e| CoreError::render(format!("Biquad design failed: {:?}", e)))
}

fn apply_biquads(
    samples: &mut [f32],
    specs: &[BiquadSpec],
    sample_rate: SampleRate,
) -> Result<()> {
    let mut filters = specs
        .iter()
        .map(|spec| {
            biquad_coefficients(spec, sample_rate).map(DirectForm2Transposed::<f32>::new)
        })
        .collect::<Result<Vec<_>>>()?;

    for sample in samples.iter_mut() {
        let mut x = *sample;
        for filter in &mut filters {
            x = filter.run(x);
        }
        *sample = x;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use levelmatch_core::DecodedAudio;
    use std::sync::Arc;

    fn sine(rate: u32, freq: f32, frames: usize) -> Vec<f32> {
        (0..frames)
            .map(|i| (2.0 * std::f32::consts::PI * freq * i as f32 / rate as f32).sin() * 0.5)
            .collect()
    }

    fn source(channels: Vec<Vec<f32>>, rate: SampleRate) -> Arc<DecodedAudio> {
        Arc::new(DecodedAudio::new(channels, rate).unwrap())
    }

    #[tokio::test]
    async fn direct_same_rate_is_identity() {
        let samples = sine(48_000, 440.0, 4800);
        let request = RenderRequest::new(
            source(vec![samples.clone()], SampleRate::DVD_QUALITY),
            SampleRate::DVD_QUALITY,
            RenderGraph::Direct,
        );
        let rendered = NativeRenderer::new().render(request).await.unwrap();
        assert_eq!(rendered, vec![samples]);
    }

    #[tokio::test]
    async fn resampling_keeps_duration_and_level() {
        let samples = sine(44_100, 1000.0, 44_100);
        let request = RenderRequest::new(
            source(vec![samples; 2], SampleRate::CD_QUALITY),
            SampleRate::DVD_QUALITY,
            RenderGraph::Direct,
        );
        let rendered = NativeRenderer::new().render(request).await.unwrap();

        assert_eq!(rendered.len(), 2);
        assert_eq!(rendered[0].len(), 48_000);
        let peak = rendered[0][4800..43_200]
            .iter()
            .fold(0.0_f32, |m, s| m.max(s.abs()));
        assert!((peak - 0.5).abs() < 0.02, "peak after resampling was {}", peak);
    }

    #[tokio::test]
    async fn identity_iir_section_passes_signal() {
        let samples = sine(48_000, 440.0, 480);
        let identity = IirSection::new([1.0, 0.0, 0.0], [1.0, 0.0, 0.0]);
        let request = RenderRequest::new(
            source(vec![samples.clone()], SampleRate::DVD_QUALITY),
            SampleRate::DVD_QUALITY,
            RenderGraph::Iir(vec![identity]),
        );
        let rendered = NativeRenderer::new().render(request).await.unwrap();
        for (a, b) in rendered[0].iter().zip(&samples) {
            assert!((a - b).abs() < 1e-7);
        }
    }

    #[tokio::test]
    async fn high_pass_biquad_removes_dc() {
        let request = RenderRequest::new(
            source(vec![vec![0.5; 48_000]], SampleRate::DVD_QUALITY),
            SampleRate::DVD_QUALITY,
            RenderGraph::Biquad(vec![BiquadSpec::high_pass(60.0, 0.707)]),
        );
        let rendered = NativeRenderer::new().render(request).await.unwrap();
        let tail = rendered[0][40_000..].iter().fold(0.0_f32, |m, s| m.max(s.abs()));
        assert!(tail < 1e-3, "DC leaked through high-pass: {}", tail);
    }

    #[tokio::test]
    async fn unsupported_graph_is_rejected() {
        let renderer = NativeRenderer::with_capabilities(RenderCapabilities {
            iir: false,
            biquad: true,
            resample: false,
        });
        let audio = source(vec![vec![0.0; 100]], SampleRate::CD_QUALITY);

        let iir = RenderRequest::new(
            Arc::clone(&audio),
            SampleRate::CD_QUALITY,
            RenderGraph::Iir(vec![]),
        );
        assert!(matches!(
            renderer.render(iir).await,
            Err(CoreError::Unsupported(_))
        ));

        let resample = RenderRequest::new(audio, SampleRate::DVD_QUALITY, RenderGraph::Direct);
        assert!(matches!(
            renderer.render(resample).await,
            Err(CoreError::Unsupported(_))
        ));
    }

    #[test]
    fn iir_section_is_normalised_by_a0() {
        // y[n] = 0.2 x[n] + 0.8 y[n-1], written with a0 = 2
        let doubled = IirSection::new([0.4, 0.0, 0.0], [2.0, -1.6, 0.0]);
        let mut impulse = vec![0.0_f32; 8];
        impulse[0] = 1.0;
        apply_iir(&mut impulse, &[doubled]).unwrap();

        for (n, y) in impulse.iter().enumerate() {
            let expected = 0.2 * 0.8_f64.powi(n as i32);
            assert!((f64::from(*y) - expected).abs() < 1e-6, "n={} got {}", n, y);
        }
    }

    #[test]
    fn zero_a0_is_invalid() {
        let broken = IirSection::new([1.0, 0.0, 0.0], [0.0, 0.0, 0.0]);
        let mut samples = vec![0.1_f32; 4];
        assert!(apply_iir(&mut samples, &[broken]).is_err());
    }

    #[test]
    fn shelf_above_nyquist_fails() {
        let mut samples = vec![0.1_f32; 4];
        let spec = BiquadSpec::high_shelf(30_000.0, 4.0, 0.707);
        assert!(apply_biquads(&mut samples, &[spec], SampleRate::DVD_QUALITY).is_err());
    }
}
