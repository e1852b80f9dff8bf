//! Shared DSP helpers for the tempo algorithms
//!
//! Energy envelopes, onset-strength functions, autocorrelation and the
//! periodicity peak search used by both the autocorrelation and the
//! wavelet-energy strategies.

use super::DetectionContext;

const EPSILON: f32 = 1e-10;

/// Root-mean-square level of a buffer (accumulated in f64)
pub fn rms(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum_squares: f64 = samples.iter().map(|&s| (s as f64) * (s as f64)).sum();
    (sum_squares / samples.len() as f64).sqrt() as f32
}

/// Pre-computed Hann window
pub fn hann_window(size: usize) -> Vec<f32> {
    if size < 2 {
        return vec![1.0; size];
    }
    (0..size)
        .map(|i| {
            0.5 * (1.0 - ((2.0 * std::f32::consts::PI * i as f32) / (size as f32 - 1.0)).cos())
        })
        .collect()
}

/// Mean-square energy of consecutive frames
///
/// Frame `i` covers `samples[i * hop .. i * hop + frame_size]`; trailing
/// samples that do not fill a whole frame are ignored.
pub fn frame_energy(samples: &[f32], frame_size: usize, hop_size: usize) -> Vec<f32> {
    if frame_size == 0 || hop_size == 0 || samples.len() < frame_size {
        return Vec::new();
    }
    let frames = (samples.len() - frame_size) / hop_size + 1;
    (0..frames)
        .map(|i| {
            let frame = &samples[i * hop_size..i * hop_size + frame_size];
            frame.iter().map(|s| s * s).sum::<f32>() / frame_size as f32
        })
        .collect()
}

/// Half-wave rectified first difference: `max(0, e[t] - e[t-1])`
///
/// The output has the same length as the input; index 0 is always zero.
pub fn half_wave_diff(envelope: &[f32]) -> Vec<f32> {
    let mut out = vec![0.0; envelope.len()];
    for t in 1..envelope.len() {
        out[t] = (envelope[t] - envelope[t - 1]).max(0.0);
    }
    out
}

pub fn mean_std(values: &[f32]) -> (f32, f32) {
    if values.is_empty() {
        return (0.0, 0.0);
    }
    let n = values.len() as f32;
    let mean = values.iter().sum::<f32>() / n;
    let variance = values.iter().map(|v| (v - mean) * (v - mean)).sum::<f32>() / n;
    (mean, variance.sqrt())
}

/// Median of a slice; even lengths average the two central values
pub fn median(values: &[f32]) -> Option<f32> {
    if values.is_empty() {
        return None;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        Some((sorted[mid - 1] + sorted[mid]) / 2.0)
    } else {
        Some(sorted[mid])
    }
}

/// Fold a tempo by octaves (x2 / x0.5) until it lands in `[min_bpm, max_bpm]`
pub fn fold_bpm(bpm: f32, min_bpm: f32, max_bpm: f32) -> Option<f32> {
    if !(bpm.is_finite() && bpm > 0.0) {
        return None;
    }
    let mut folded = bpm;
    for _ in 0..16 {
        if folded < min_bpm {
            folded *= 2.0;
        } else if folded > max_bpm {
            folded /= 2.0;
        } else {
            return Some(folded);
        }
    }
    None
}

/// Lag range (in envelope frames) covering `[min_bpm, max_bpm]`
pub fn lag_range(min_bpm: f32, max_bpm: f32, envelope_rate: f32) -> (usize, usize) {
    let min_lag = ((60.0 * envelope_rate / max_bpm).floor() as usize).max(1);
    let max_lag = (60.0 * envelope_rate / min_bpm).ceil() as usize;
    (min_lag, max_lag)
}

/// Biased autocorrelation `r[0..=max_lag]`, normalized so that `r[0] == 1`
///
/// Returns an all-zero vector when the signal carries no energy.
pub fn autocorrelation(signal: &[f32], max_lag: usize) -> Vec<f32> {
    let n = signal.len();
    let max_lag = max_lag.min(n.saturating_sub(1));
    let mut acf = vec![0.0f32; max_lag + 1];
    for (lag, slot) in acf.iter_mut().enumerate() {
        let mut acc = 0.0f64;
        for i in 0..n - lag {
            acc += signal[i] as f64 * signal[i + lag] as f64;
        }
        *slot = acc as f32;
    }
    let r0 = acf.first().copied().unwrap_or(0.0);
    if r0 <= EPSILON {
        return vec![0.0; acf.len()];
    }
    for value in acf.iter_mut() {
        *value /= r0;
    }
    acf
}

/// Vertex offset of the parabola through three equally spaced points
///
/// Result lies in [-0.5, 0.5] relative to the centre sample.
pub fn parabolic_offset(prev: f32, peak: f32, next: f32) -> f32 {
    let denom = prev - 2.0 * peak + next;
    if denom.abs() <= EPSILON {
        return 0.0;
    }
    (0.5 * (prev - next) / denom).clamp(-0.5, 0.5)
}

/// Strongest periodicity found in an envelope
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PeriodicityPeak {
    /// Refined lag in envelope frames
    pub lag: f32,
    /// Tempo implied by the lag, clamped into the context range
    pub bpm: f32,
    /// Normalized correlation at the peak, in [0, 1]
    pub strength: f32,
    /// Margin of the peak over the strongest non-harmonic competitor, in [0, 1]
    pub prominence: f32,
}

fn is_harmonic_lag(candidate: f32, primary: f32) -> bool {
    let (long, short) = if candidate >= primary {
        (candidate, primary)
    } else {
        (primary, candidate)
    };
    let k = (long / short).round().max(1.0);
    (long - k * short).abs() <= (0.05 * long).max(1.5)
}

/// Autocorrelation peak search over the lag range implied by the BPM bounds
///
/// The envelope is mean-removed before correlating. Only interior local
/// maxima with positive correlation qualify; ties keep the shorter lag. The
/// winning lag is refined by parabolic interpolation and mapped to BPM as
/// `60 * envelope_rate / lag`.
pub fn find_periodicity(
    envelope: &[f32],
    envelope_rate: f32,
    context: &DetectionContext,
) -> Option<PeriodicityPeak> {
    if envelope.len() < 4 || !(envelope_rate > 0.0) {
        return None;
    }
    let (mean, _) = mean_std(envelope);
    let centred: Vec<f32> = envelope.iter().map(|v| v - mean).collect();

    let (min_lag, max_lag) = lag_range(context.min_bpm(), context.max_bpm(), envelope_rate);
    let max_lag = max_lag.min(centred.len() - 2);
    if max_lag <= min_lag {
        return None;
    }

    let acf = autocorrelation(&centred, max_lag + 1);
    if acf.len() < max_lag + 2 || acf[0] <= 0.0 {
        return None;
    }

    let maxima: Vec<(usize, f32)> = (min_lag.max(1)..=max_lag)
        .filter(|&i| acf[i] > 0.0 && acf[i] > acf[i - 1] && acf[i] >= acf[i + 1])
        .map(|i| (i, acf[i]))
        .collect();

    let &(best_idx, best_value) = maxima
        .iter()
        .fold(None, |acc: Option<&(usize, f32)>, candidate| match acc {
            Some(current) if current.1 >= candidate.1 => Some(current),
            _ => Some(candidate),
        })?;

    let offset = parabolic_offset(acf[best_idx - 1], best_value, acf[best_idx + 1]);
    let lag = best_idx as f32 + offset;
    if lag <= 0.0 {
        return None;
    }

    let competitor = maxima
        .iter()
        .filter(|(idx, _)| *idx != best_idx && !is_harmonic_lag(*idx as f32, lag))
        .map(|(_, value)| *value)
        .fold(0.0f32, f32::max);

    let prominence = ((best_value - competitor) / best_value).clamp(0.0, 1.0);
    let bpm = context.clamp_bpm(60.0 * envelope_rate / lag);

    Some(PeriodicityPeak {
        lag,
        bpm,
        strength: best_value.clamp(0.0, 1.0),
        prominence,
    })
}
