// SpectralAlgorithm - tempo from the spectrum of the spectral-flux novelty curve
//
// Algorithm:
// 1. Hann-windowed STFT (frame rounded up to a power of two)
// 2. Spectral flux: sum of positive magnitude increases between frames
// 3. Novelty curve: mean-removed, Hann-tapered, zero-padded FFT
// 4. Harmonic sum over candidate tempo bins: sum(mag[h*k] / h), h = 1..=harmonics
// 5. Best bin refined by parabolic interpolation -> BPM
// 6. Confidence = score energy in the main lobe / score energy over the BPM band

use std::sync::{Arc, Mutex};

use rustfft::{num_complex::Complex, Fft, FftPlanner};

use super::dsp;
use super::{AlgorithmKind, AudioWindow, BpmReading, CancelFlag, DetectionContext, TempoAlgorithm};
use crate::config::SpectralConfig;

/// Minimum novelty frames before the tempo spectrum is meaningful
const MIN_NOVELTY_FRAMES: usize = 16;

pub struct SpectralAlgorithm {
    config: SpectralConfig,
    /// STFT frame length (power of two)
    frame_size: usize,
    window: Vec<f32>,
    fft_planner: Arc<Mutex<FftPlanner<f32>>>,
}

impl SpectralAlgorithm {
    pub fn new(config: SpectralConfig) -> Self {
        let frame_size = config.frame_size.max(2).next_power_of_two();
        Self {
            window: dsp::hann_window(frame_size),
            frame_size,
            config,
            fft_planner: Arc::new(Mutex::new(FftPlanner::new())),
        }
    }

    fn plan(&self, len: usize) -> Option<Arc<dyn Fft<f32>>> {
        match self.fft_planner.lock() {
            Ok(mut planner) => Some(planner.plan_fft_forward(len)),
            Err(_) => {
                log::warn!("[Spectral] FFT planner lock poisoned, abstaining");
                None
            }
        }
    }

    /// Spectral-flux novelty, one value per STFT hop
    fn spectral_flux(&self, samples: &[f32], fft: &dyn Fft<f32>) -> Vec<f32> {
        let hop = self.config.hop_size;
        if samples.len() < self.frame_size {
            return Vec::new();
        }
        let frames = (samples.len() - self.frame_size) / hop + 1;
        let bins = self.frame_size / 2 + 1;

        let mut previous = vec![0.0f32; bins];
        let mut flux = Vec::with_capacity(frames);
        let mut buffer = vec![Complex::new(0.0f32, 0.0); self.frame_size];

        for f in 0..frames {
            let frame = &samples[f * hop..f * hop + self.frame_size];
            for (slot, (sample, w)) in buffer.iter_mut().zip(frame.iter().zip(&self.window)) {
                *slot = Complex::new(sample * w, 0.0);
            }
            fft.process(&mut buffer);

            let mut value = 0.0f32;
            for (prev, c) in previous.iter_mut().zip(&buffer[..bins]) {
                let magnitude = c.norm();
                if f > 0 {
                    value += (magnitude - *prev).max(0.0);
                }
                *prev = magnitude;
            }
            flux.push(value);
        }

        flux
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

        let stft = self.plan(self.frame_size)?;
        let novelty = self.spectral_flux(window.samples(), stft.as_ref());
        if novelty.len() < MIN_NOVELTY_FRAMES || is_cancelled() {
            return None;
        }

        let novelty_rate = window.sample_rate() as f32 / self.config.hop_size as f32;
        let nfft = self
            .config
            .min_novelty_fft_size
            .max(novelty.len().next_power_of_two());

        let (mean, std) = dsp::mean_std(&novelty);
        if std <= f32::EPSILON {
            return None;
        }
        let taper = dsp::hann_window(novelty.len());
        let mut buffer = vec![Complex::new(0.0f32, 0.0); nfft];
        for (slot, (value, w)) in buffer.iter_mut().zip(novelty.iter().zip(&taper)) {
            *slot = Complex::new((value - mean) * w, 0.0);
        }
        let tempo_fft = self.plan(nfft)?;
        tempo_fft.process(&mut buffer);
        let magnitude: Vec<f32> = buffer[..nfft / 2].iter().map(|c| c.norm()).collect();

        // Hz per bin of the tempo spectrum
        let df = novelty_rate / nfft as f32;
        let k_min = ((context.min_bpm() / 60.0 / df).ceil() as usize).max(1);
        let k_max = ((context.max_bpm() / 60.0 / df).floor() as usize).min(magnitude.len() - 1);
        if k_max <= k_min {
            return None;
        }

        let score = |k: usize| -> f32 {
            (1..=self.config.harmonics)
                .filter_map(|h| magnitude.get(h * k).map(|m| m / h as f32))
                .sum()
        };
        let scores: Vec<f32> = (k_min..=k_max).map(score).collect();

        let mut best = 0;
        for (i, &s) in scores.iter().enumerate() {
            if s > scores[best] {
                best = i;
            }
        }
        if scores[best] <= 0.0 {
            return None;
        }

        let k = k_min + best;
        let offset = dsp::parabolic_offset(score(k - 1), scores[best], score(k + 1));
        let bpm = context.clamp_bpm(60.0 * (k as f32 + offset) * df);

        let lobe = ((2.0 * nfft as f32 / novelty.len() as f32).ceil() as usize).max(2);
        let total: f32 = scores.iter().map(|s| s * s).sum();
        let lo = best.saturating_sub(lobe);
        let hi = (best + lobe).min(scores.len() - 1);
        let peak: f32 = scores[lo..=hi].iter().map(|s| s * s).sum();
        let confidence = if total > 0.0 { peak / total } else { 0.0 };

        Some(BpmReading::new(
            AlgorithmKind::Spectral,
            bpm,
            confidence,
            window.start_time_secs(),
        ))
    }
}

impl TempoAlgorithm for SpectralAlgorithm {
    fn kind(&self) -> AlgorithmKind {
        AlgorithmKind::Spectral
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
        if cancel.is_cancelled() {
            return None;
        }
        self.estimate(window, context, Some(cancel))
    }
}
