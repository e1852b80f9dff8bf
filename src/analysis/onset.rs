// OnsetAlgorithm - energy-onset tempo estimation
//
// Detects percussive onsets from a short-term energy envelope and reduces
// their inter-onset intervals to a single dominant period.
//
// Algorithm:
// 1. Mean-square energy over sub-frames (hop = `hop_size` samples)
// 2. Onset function: half-wave rectified energy difference
// 3. Adaptive threshold: trailing mean + k * std over `threshold_window` frames
// 4. Peak pick: local maxima above the threshold and above 10% of the window maximum,
//    separated by at least half of the shortest allowed beat period
// 5. Inter-onset intervals -> BPM, octave-folded into [min_bpm, max_bpm]
// 6. Histogram of folded tempi; the densest bin (with neighbours) wins
// 7. Confidence = interval consistency * share of intervals supporting the winner

use super::dsp;
use super::{AlgorithmKind, AudioWindow, BpmReading, CancelFlag, DetectionContext, TempoAlgorithm};
use crate::config::OnsetConfig;

/// Fraction of the strongest onset value an onset must reach
const ABSOLUTE_FLOOR_RATIO: f32 = 0.1;

/// Minimum energy rise relative to the mean envelope level
const MIN_RELATIVE_RISE: f32 = 0.1;

/// OnsetAlgorithm estimates tempo from inter-onset intervals
pub struct OnsetAlgorithm {
    config: OnsetConfig,
}

impl OnsetAlgorithm {
    pub fn new(config: OnsetConfig) -> Self {
        Self { config }
    }

    /// Detect onset frame indices in an onset-strength function
    ///
    /// # Arguments
    /// * `odf` - Onset detection function (one value per sub-frame)
    /// * `level` - Mean energy of the envelope the ODF was derived from
    /// * `min_gap_frames` - Refractory distance between two onsets
    ///
    /// # Returns
    /// Frame indices of accepted onsets in increasing order
    fn pick_onsets(&self, odf: &[f32], level: f32, min_gap_frames: usize) -> Vec<usize> {
        let mut onsets: Vec<usize> = Vec::new();
        if odf.len() < 3 {
            return onsets;
        }

        let global_max = odf.iter().copied().fold(0.0f32, f32::max);
        if global_max <= 0.0 {
            return onsets;
        }
        let floor = (global_max * ABSOLUTE_FLOOR_RATIO).max(level * MIN_RELATIVE_RISE);

        for i in 1..odf.len() - 1 {
            let curr = odf[i];
            if !(curr > odf[i - 1] && curr >= odf[i + 1]) || curr < floor {
                continue;
            }

            let start = i.saturating_sub(self.config.threshold_window);
            let (mean, std) = dsp::mean_std(&odf[start..i]);
            let threshold = mean + self.config.threshold_k * std;
            if curr <= threshold {
                continue;
            }

            match onsets.last().copied() {
                Some(last) if i - last < min_gap_frames => {
                    // Keep the stronger of two onsets inside the refractory gap
                    if curr > odf[last] {
                        if let Some(slot) = onsets.last_mut() {
                            *slot = i;
                        }
                    }
                }
                _ => onsets.push(i),
            }
        }

        onsets
    }

    /// Reduce folded interval tempi to the dominant one
    ///
    /// # Returns
    /// `(bpm, confidence)` or `None` when no bin collects support
    fn dominant_tempo(&self, tempi: &[f32], context: &DetectionContext) -> Option<(f32, f32)> {
        if tempi.is_empty() {
            return None;
        }

        let resolution = self.config.histogram_resolution_bpm;
        let bins = ((context.max_bpm() - context.min_bpm()) / resolution).ceil() as usize + 1;
        let mut histogram = vec![0usize; bins];
        for &bpm in tempi {
            let bin = (((bpm - context.min_bpm()) / resolution).floor() as usize).min(bins - 1);
            histogram[bin] += 1;
        }

        let smoothed: Vec<usize> = (0..bins)
            .map(|b| {
                let lo = b.saturating_sub(1);
                let hi = (b + 1).min(bins - 1);
                histogram[lo..=hi].iter().sum()
            })
            .collect();

        let mut best_bin = 0;
        for (b, &count) in smoothed.iter().enumerate() {
            if count > smoothed[best_bin] {
                best_bin = b;
            }
        }
        if smoothed[best_bin] == 0 {
            return None;
        }

        let centre = context.min_bpm() + (best_bin as f32 + 0.5) * resolution;
        let tolerance = (2.0 * resolution).max(0.02 * centre);
        let supporting: Vec<f32> = tempi
            .iter()
            .copied()
            .filter(|bpm| (bpm - centre).abs() <= tolerance)
            .collect();
        if supporting.is_empty() {
            return None;
        }

        // Average in the period domain so jittered intervals cancel
        let mean_period =
            supporting.iter().map(|bpm| 60.0 / bpm).sum::<f32>() / supporting.len() as f32;
        let bpm = 60.0 / mean_period;

        let (mean, std) = dsp::mean_std(&supporting);
        let cv = if mean > 0.0 { std / mean } else { 1.0 };
        let consistency = 1.0 / (1.0 + 10.0 * cv);
        let support = supporting.len() as f32 / tempi.len() as f32;

        Some((bpm, consistency * support))
    }

    fn estimate(
        &self,
        window: &AudioWindow,
        context: &DetectionContext,
        cancel: Option<&CancelFlag>,
    ) -> Option<BpmReading> {
        let is_cancelled = || cancel.map_or(false, CancelFlag::is_cancelled);

        if window.rms() < self.config.silence_rms {
            tracing::trace!("[Onset] Window below silence gate, abstaining");
            return None;
        }

        let envelope = dsp::frame_energy(
            window.samples(),
            self.config.frame_size,
            self.config.hop_size,
        );
        let odf = dsp::half_wave_diff(&envelope);
        if is_cancelled() {
            return None;
        }

        let frame_rate = window.sample_rate() as f32 / self.config.hop_size as f32;
        let shortest_period_frames = 60.0 / context.max_bpm() * frame_rate;
        let min_gap_frames = ((shortest_period_frames * 0.5) as usize).max(1);

        let (level, _) = dsp::mean_std(&envelope);
        let onsets = self.pick_onsets(&odf, level, min_gap_frames);
        if onsets.len() < self.config.min_onsets {
            tracing::trace!("[Onset] Only {} onsets, abstaining", onsets.len());
            return None;
        }
        if is_cancelled() {
            return None;
        }

        let tempi: Vec<f32> = onsets
            .windows(2)
            .filter_map(|pair| {
                let interval_secs = (pair[1] - pair[0]) as f32 / frame_rate;
                dsp::fold_bpm(60.0 / interval_secs, context.min_bpm(), context.max_bpm())
            })
            .collect();

        let (bpm, confidence) = self.dominant_tempo(&tempi, context)?;
        Some(BpmReading::new(
            AlgorithmKind::Onset,
            context.clamp_bpm(bpm),
            confidence,
            window.start_time_secs(),
        ))
    }
}

impl TempoAlgorithm for OnsetAlgorithm {
    fn kind(&self) -> AlgorithmKind {
        AlgorithmKind::Onset
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
