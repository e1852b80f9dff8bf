// WaveletAlgorithm - multi-band energy periodicity
//
// A Haar decomposition splits the window into octave sub-bands. Each band
// is reduced to an onset envelope at a common rate, the normalized
// envelopes are summed, and the periodicity of the sum gives the tempo.
// Bands that independently agree with the combined tempo raise confidence.

use super::dsp;
use super::{AlgorithmKind, AudioWindow, BpmReading, CancelFlag, DetectionContext, TempoAlgorithm};
use crate::config::WaveletConfig;

const SQRT_HALF: f32 = std::f32::consts::FRAC_1_SQRT_2;

pub struct WaveletAlgorithm {
    config: WaveletConfig,
}

impl WaveletAlgorithm {
    pub fn new(config: WaveletConfig) -> Self {
        Self { config }
    }

    /// Haar decomposition into `levels` detail bands plus the final approximation
    ///
    /// Band `j` (0-based detail index) holds `len / 2^(j+1)` coefficients; the
    /// trailing approximation has the same length as the deepest detail band.
    fn decompose(&self, samples: &[f32]) -> Vec<Vec<f32>> {
        let mut bands = Vec::with_capacity(self.config.levels + 1);
        let mut approx = samples.to_vec();
        for _ in 0..self.config.levels {
            let half = approx.len() / 2;
            let mut next = Vec::with_capacity(half);
            let mut detail = Vec::with_capacity(half);
            for i in 0..half {
                let (a, b) = (approx[2 * i], approx[2 * i + 1]);
                next.push((a + b) * SQRT_HALF);
                detail.push((a - b) * SQRT_HALF);
            }
            bands.push(detail);
            approx = next;
        }
        bands.push(approx);
        bands
    }

    /// Normalized onset envelope of one band at `sample_rate / envelope_hop`
    ///
    /// Returns `None` for bands without energy fluctuation.
    fn band_envelope(
        &self,
        coefficients: &[f32],
        decimation: usize,
        frames: usize,
    ) -> Option<Vec<f32>> {
        let block = self.config.envelope_hop / decimation;
        if block == 0 || coefficients.len() < block * frames {
            return None;
        }
        let envelope: Vec<f32> = coefficients
            .chunks_exact(block)
            .take(frames)
            .map(|chunk| chunk.iter().map(|c| c.abs()).sum::<f32>() / block as f32)
            .collect();
        let odf = dsp::half_wave_diff(&envelope);
        let (_, std) = dsp::mean_std(&odf);
        if std <= 1e-9 {
            return None;
        }
        Some(odf.into_iter().map(|v| v / std).collect())
    }

    fn estimate(
        &self,
        window: &AudioWindow,
        context: &DetectionContext,
        cancel: Option<&CancelFlag>,
    ) -> Option<BpmReading> {
        let is_cancelled = || cancel.map_or(false, CancelFlag::is_cancelled);

        if window.rms() < self.config.silence_rms {
            return None;
        }

        let hop = self.config.envelope_hop;
        let frames = window.len() / hop;
        if frames < 4 {
            return None;
        }
        let usable = &window.samples()[..frames * hop];
        let envelope_rate = window.sample_rate() as f32 / hop as f32;

        let bands = self.decompose(usable);
        let deepest = 1usize << self.config.levels;

        let mut combined = vec![0.0f32; frames];
        let mut band_envelopes = Vec::with_capacity(bands.len());
        for (index, coefficients) in bands.iter().enumerate() {
            if is_cancelled() {
                return None;
            }
            let decimation = if index < self.config.levels {
                1usize << (index + 1)
            } else {
                deepest
            };
            if let Some(envelope) = self.band_envelope(coefficients, decimation, frames) {
                for (acc, v) in combined.iter_mut().zip(&envelope) {
                    *acc += v;
                }
                band_envelopes.push(envelope);
            }
        }
        if band_envelopes.is_empty() {
            return None;
        }

        let peak = dsp::find_periodicity(&combined, envelope_rate, context)?;
        if peak.strength < self.config.min_peak_strength {
            return None;
        }

        let mut agreeing = 0usize;
        for envelope in &band_envelopes {
            if is_cancelled() {
                return None;
            }
            if let Some(band_peak) = dsp::find_periodicity(envelope, envelope_rate, context) {
                if (band_peak.bpm - peak.bpm).abs() <= self.config.agreement_tolerance * peak.bpm {
                    agreeing += 1;
                }
            }
        }
        let agreement = agreeing as f32 / band_envelopes.len() as f32;

        tracing::trace!(
            "[Wavelet] {:.1} BPM, strength {:.3}, {}/{} bands agree",
            peak.bpm,
            peak.strength,
            agreeing,
            band_envelopes.len()
        );

        Some(BpmReading::new(
            AlgorithmKind::Wavelet,
            peak.bpm,
            0.5 * peak.strength + 0.5 * agreement,
            window.start_time_secs(),
        ))
    }
}

impl TempoAlgorithm for WaveletAlgorithm {
    fn kind(&self) -> AlgorithmKind {
        AlgorithmKind::Wavelet
    }

    fn evaluate(&self, window: &AudioWindow, context: &DetectionContext) -> Option<BpmReading> {
        self.estimate(window, context, None)
    }

    fn evaluate_with_cancel(
        &self,
        window: &AudioWindow,
        context: &DetectionContext,
        cancel: &CancelFlag,
    ) -> Option<BpmReading> {
        self.estimate(window, context, Some(cancel))
    }
}
