// Audio module - sample sources feeding the tempo detector
//
// Capture itself lives outside this crate; everything here speaks the
// AudioSource contract: mono f32 chunks at a fixed rate, pushed into a
// bounded tokio channel. Channel close means end of stream.

use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::error::AudioError;

pub mod buffer_pool;
pub mod push_source;
pub mod synthetic;
pub mod wav_source;

pub use buffer_pool::{ChunkPool, ChunkPoolChannels, DEFAULT_CHUNK_COUNT, DEFAULT_CHUNK_SIZE};
pub use push_source::{PushSource, PushSourceHandle};
pub use synthetic::SyntheticSource;
pub use wav_source::WavFileSource;

/// Capacity of the channel between a source and the coordinator's ingestion task
pub const SOURCE_CHANNEL_CAPACITY: usize = 64;

/// Message emitted by an [`AudioSource`]
#[derive(Debug, Clone, PartialEq)]
pub enum SourceEvent {
    /// Normalized mono samples in [-1, 1]
    Samples(Vec<f32>),
    /// Unrecoverable source failure; the stream ends after this event
    Failed(AudioError),
}

/// Producer of mono sample chunks at a fixed rate
pub trait AudioSource: Send {
    fn sample_rate(&self) -> u32;

    /// Begin streaming; requires a tokio runtime for the producing task
    fn start(&mut self) -> Result<mpsc::Receiver<SourceEvent>, AudioError>;

    /// Stop producing. Idempotent.
    fn stop(&mut self);
}

/// How an in-memory buffer is replayed as a stream
#[derive(Debug, Clone, Copy)]
pub(crate) struct ReplayPlan {
    pub chunk_size: usize,
    /// Wall-clock delay between chunks; `None` streams as fast as the consumer reads
    pub chunk_interval: Option<Duration>,
    /// Emit `Failed` instead of the chunk with this index
    pub fail_after_chunks: Option<usize>,
}

impl ReplayPlan {
    pub fn new(sample_rate: u32, chunk_size: usize, speed: Option<f32>) -> Self {
        let chunk_interval = speed.filter(|s| *s > 0.0).map(|speed| {
            Duration::from_secs_f64(chunk_size as f64 / sample_rate.max(1) as f64 / speed as f64)
        });
        Self {
            chunk_size: chunk_size.max(1),
            chunk_interval,
            fail_after_chunks: None,
        }
    }
}

/// Spawn a task replaying `samples` in chunks on the current runtime
pub(crate) fn spawn_replay(
    samples: Vec<f32>,
    plan: ReplayPlan,
    source_name: &'static str,
) -> Result<(mpsc::Receiver<SourceEvent>, JoinHandle<()>), AudioError> {
    let handle =
        tokio::runtime::Handle::try_current().map_err(|_| AudioError::RuntimeUnavailable)?;
    let (tx, rx) = mpsc::channel(SOURCE_CHANNEL_CAPACITY);

    let task = handle.spawn(async move {
        for (index, chunk) in samples.chunks(plan.chunk_size).enumerate() {
            if plan.fail_after_chunks == Some(index) {
                tracing::warn!("[{}] Injected failure after {} chunks", source_name, index);
                let _ = tx
                    .send(SourceEvent::Failed(AudioError::StreamFailure {
                        reason: format!("{} failed after {} chunks", source_name, index),
                    }))
                    .await;
                return;
            }
            if tx.send(SourceEvent::Samples(chunk.to_vec())).await.is_err() {
                tracing::debug!("[{}] Receiver dropped, stopping replay", source_name);
                return;
            }
            match plan.chunk_interval {
                Some(interval) => tokio::time::sleep(interval).await,
                None => tokio::task::yield_now().await,
            }
        }
        tracing::debug!("[{}] Replay finished", source_name);
    });

    Ok((rx, task))
}
