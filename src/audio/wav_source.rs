//! WAV file source: decodes once, then replays as a paced stream.

use std::path::Path;

use hound::{SampleFormat, WavReader};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::{spawn_replay, AudioSource, ReplayPlan, SourceEvent};
use crate::error::AudioError;

pub struct WavFileSource {
    sample_rate: u32,
    samples: Vec<f32>,
    chunk_size: usize,
    speed: Option<f32>,
    task: Option<JoinHandle<()>>,
}

impl WavFileSource {
    /// Decode a WAV file into normalized mono samples
    ///
    /// Multi-channel input is averaged per frame. Integer formats are scaled
    /// by their bit depth into [-1, 1].
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, AudioError> {
        let path = path.as_ref();
        let mut reader = WavReader::open(path).map_err(|err| AudioError::DeviceUnavailable {
            details: format!("cannot open {}: {}", path.display(), err),
        })?;
        let spec = reader.spec();
        let channels = spec.channels.max(1) as usize;

        let interleaved: Vec<f32> = match spec.sample_format {
            SampleFormat::Float => reader
                .samples::<f32>()
                .collect::<Result<_, _>>()
                .map_err(|err| decode_error(path, err))?,
            SampleFormat::Int => {
                let scale = 1.0 / (1u64 << (spec.bits_per_sample.clamp(1, 32) - 1)) as f32;
                reader
                    .samples::<i32>()
                    .map(|s| s.map(|v| v as f32 * scale))
                    .collect::<Result<_, _>>()
                    .map_err(|err| decode_error(path, err))?
            }
        };

        let samples: Vec<f32> = interleaved
            .chunks(channels)
            .map(|frame| frame.iter().sum::<f32>() / frame.len() as f32)
            .collect();

        tracing::info!(
            "[WavFile] Loaded {} ({} Hz, {} ch, {:.1}s)",
            path.display(),
            spec.sample_rate,
            spec.channels,
            samples.len() as f32 / spec.sample_rate.max(1) as f32
        );

        Ok(Self {
            sample_rate: spec.sample_rate,
            samples,
            chunk_size: super::synthetic::DEFAULT_CHUNK_SIZE,
            speed: None,
            task: None,
        })
    }

    /// Pace playback at `speed` times real time
    pub fn with_speed(mut self, speed: f32) -> Self {
        self.speed = Some(speed);
        self
    }

    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    pub fn duration_secs(&self) -> f32 {
        self.samples.len() as f32 / self.sample_rate.max(1) as f32
    }
}

fn decode_error(path: &Path, err: hound::Error) -> AudioError {
    AudioError::StreamFailure {
        reason: format!("failed to decode {}: {}", path.display(), err),
    }
}

impl AudioSource for WavFileSource {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn start(&mut self) -> Result<mpsc::Receiver<SourceEvent>, AudioError> {
        if self.task.is_some() {
            return Err(AudioError::AlreadyRunning);
        }
        let plan = ReplayPlan::new(self.sample_rate, self.chunk_size, self.speed);
        let (rx, task) = spawn_replay(self.samples.clone(), plan, "WavFile")?;
        self.task = Some(task);
        Ok(rx)
    }

    fn stop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

impl Drop for WavFileSource {
    fn drop(&mut self) {
        self.stop();
    }
}
