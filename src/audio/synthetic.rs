//! Synthetic click-track source
//!
//! Deterministic test and demo input:
//! - 20ms white-noise burst clicks at an exact tempo
//! - Seeded noise so every run produces identical samples
//! - Optional real-time pacing and injected failure

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::{spawn_replay, AudioSource, ReplayPlan, SourceEvent};
use crate::error::AudioError;

/// Duration of one click in milliseconds
const CLICK_DURATION_MS: f32 = 20.0;

/// Peak amplitude of the noise burst
const CLICK_AMPLITUDE: f32 = 0.8;

pub const DEFAULT_CHUNK_SIZE: usize = 1024;

/// Samples between two beats at `bpm`, as an exact fraction
///
/// Kept in f64 so beat positions do not drift over long tracks.
pub fn samples_per_beat(bpm: f32, sample_rate: u32) -> f64 {
    sample_rate as f64 * 60.0 / bpm as f64
}

/// Generate `seconds` of silence with a noise-burst click on every beat
///
/// # Arguments
/// * `sample_rate` - Output rate in Hz
/// * `bpm` - Click tempo; non-positive tempi produce silence
/// * `seconds` - Track length
/// * `seed` - Noise seed
///
/// # Examples
/// ```
/// use tempo_consensus::audio::synthetic::click_track;
///
/// let track = click_track(8000, 120.0, 2.0, 42);
/// assert_eq!(track.len(), 16000);
/// assert!(track[0].abs() > 0.0 || track[1].abs() > 0.0);
/// ```
pub fn click_track(sample_rate: u32, bpm: f32, seconds: f32, seed: u64) -> Vec<f32> {
    let len = (sample_rate as f64 * seconds.max(0.0) as f64).round() as usize;
    let mut samples = vec![0.0f32; len];
    if !(bpm.is_finite() && bpm > 0.0) {
        return samples;
    }

    let click_len = (sample_rate as f32 * CLICK_DURATION_MS / 1000.0) as usize;
    let spacing = samples_per_beat(bpm, sample_rate);
    let mut rng = StdRng::seed_from_u64(seed);

    let mut beat = 0u64;
    loop {
        let start = (beat as f64 * spacing).round() as usize;
        if start >= len {
            break;
        }
        let end = (start + click_len).min(len);
        for sample in &mut samples[start..end] {
            *sample = rng.gen_range(-CLICK_AMPLITUDE..CLICK_AMPLITUDE);
        }
        beat += 1;
    }

    samples
}

/// Click-track source for tests, demos and the CLI
pub struct SyntheticSource {
    sample_rate: u32,
    bpm: f32,
    seconds: f32,
    seed: u64,
    chunk_size: usize,
    speed: Option<f32>,
    fail_after_chunks: Option<usize>,
    task: Option<JoinHandle<()>>,
}

impl SyntheticSource {
    pub fn new(sample_rate: u32, bpm: f32, seconds: f32) -> Self {
        Self {
            sample_rate,
            bpm,
            seconds,
            seed: 42,
            chunk_size: DEFAULT_CHUNK_SIZE,
            speed: None,
            fail_after_chunks: None,
            task: None,
        }
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    /// Pace chunks at `speed` times real time
    pub fn with_speed(mut self, speed: f32) -> Self {
        self.speed = Some(speed);
        self
    }

    /// Replace chunk `chunks` with a stream failure
    pub fn with_failure_after(mut self, chunks: usize) -> Self {
        self.fail_after_chunks = Some(chunks);
        self
    }

    pub fn bpm(&self) -> f32 {
        self.bpm
    }
}

impl AudioSource for SyntheticSource {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn start(&mut self) -> Result<mpsc::Receiver<SourceEvent>, AudioError> {
        if self.task.is_some() {
            return Err(AudioError::AlreadyRunning);
        }
        let samples = click_track(self.sample_rate, self.bpm, self.seconds, self.seed);
        let mut plan = ReplayPlan::new(self.sample_rate, self.chunk_size, self.speed);
        plan.fail_after_chunks = self.fail_after_chunks;

        let (rx, task) = spawn_replay(samples, plan, "Synthetic")?;
        tracing::info!(
            "[Synthetic] Streaming {:.1}s click track at {} BPM",
            self.seconds,
            self.bpm
        );
        self.task = Some(task);
        Ok(rx)
    }

    fn stop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

impl Drop for SyntheticSource {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_samples_per_beat() {
        assert_eq!(samples_per_beat(120.0, 48000), 24000.0);
        assert!((samples_per_beat(128.0, 44100) - 20671.875).abs() < 1e-9);
    }

    #[test]
    fn test_click_track_length_and_positions() {
        let track = click_track(48000, 120.0, 2.0, 1);
        assert_eq!(track.len(), 96000);

        let click_len = (48000.0 * CLICK_DURATION_MS / 1000.0) as usize;
        let energy = |range: std::ops::Range<usize>| track[range].iter().map(|s| s * s).sum::<f32>();
        assert!(energy(0..click_len) > 1.0);
        assert!(energy(24000..24000 + click_len) > 1.0);
        assert_eq!(energy(click_len..24000), 0.0);
    }

    #[test]
    fn test_click_track_deterministic() {
        assert_eq!(click_track(8000, 100.0, 1.0, 9), click_track(8000, 100.0, 1.0, 9));
        assert_ne!(click_track(8000, 100.0, 1.0, 9), click_track(8000, 100.0, 1.0, 10));
    }

    #[test]
    fn test_click_track_amplitude_bounded() {
        let track = click_track(8000, 150.0, 3.0, 3);
        assert!(track.iter().all(|s| s.abs() <= CLICK_AMPLITUDE));
    }

    #[test]
    fn test_invalid_bpm_is_silent() {
        assert!(click_track(8000, 0.0, 1.0, 1).iter().all(|s| *s == 0.0));
        assert!(click_track(8000, f32::NAN, 1.0, 1).iter().all(|s| *s == 0.0));
    }

    #[test]
    fn test_source_streams_whole_track() {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .build()
            .unwrap();

        let total = runtime.block_on(async {
            let mut source = SyntheticSource::new(8000, 120.0, 1.5).with_chunk_size(500);
            let mut rx = source.start().unwrap();
            assert_eq!(source.start().unwrap_err(), AudioError::AlreadyRunning);

            let mut total = 0;
            while let Some(SourceEvent::Samples(samples)) = rx.recv().await {
                total += samples.len();
            }
            total
        });

        assert_eq!(total, 12000);
    }
}
