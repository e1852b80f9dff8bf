//! Push-driven source for external capture callbacks.
//!
//! The capture side owns a [`PushSourceHandle`] and calls
//! [`PushSourceHandle::push`] from its real-time callback; a pump task on the
//! tokio runtime drains the lock-free [`ChunkPool`] into the detector's
//! source channel. Dropping the handle ends the stream once all pushed
//! samples have been forwarded.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use rtrb::{Consumer, Producer};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::buffer_pool::{ChunkPool, SampleChunk};
use super::{AudioSource, SourceEvent, SOURCE_CHANNEL_CAPACITY};
use crate::error::AudioError;

const PUMP_POLL_INTERVAL: Duration = Duration::from_millis(5);

type FailureSlot = Arc<Mutex<Option<AudioError>>>;

/// Capture-side handle; `push` is wait-free and never allocates
pub struct PushSourceHandle {
    data_producer: Producer<SampleChunk>,
    pool_consumer: Consumer<SampleChunk>,
    chunk_size: usize,
    dropped_samples: Arc<AtomicU64>,
    failure: FailureSlot,
}

impl PushSourceHandle {
    /// Queue samples for analysis
    ///
    /// Returns the number of samples accepted. When every chunk is in
    /// flight the remainder is dropped and counted.
    pub fn push(&mut self, mut samples: &[f32]) -> usize {
        let mut accepted = 0;
        while !samples.is_empty() {
            let Ok(mut chunk) = self.pool_consumer.pop() else {
                break;
            };
            let take = samples.len().min(self.chunk_size);
            chunk.extend_from_slice(&samples[..take]);
            // Data queue has a slot for every pooled chunk
            if self.data_producer.push(chunk).is_err() {
                break;
            }
            accepted += take;
            samples = &samples[take..];
        }

        let dropped = samples.len() as u64;
        if dropped > 0 {
            self.dropped_samples.fetch_add(dropped, Ordering::Relaxed);
        }
        accepted
    }

    /// Report an unrecoverable capture failure; the stream ends after it
    ///
    /// Not for the real-time callback itself: this takes a lock.
    pub fn report_failure(&self, error: AudioError) {
        match self.failure.lock() {
            Ok(mut slot) => *slot = Some(error),
            Err(_) => log::error!("[PushSource] Failure slot poisoned, dropping {}", error),
        }
    }

    /// Samples discarded because the pool was exhausted
    pub fn dropped_samples(&self) -> u64 {
        self.dropped_samples.load(Ordering::Relaxed)
    }
}

/// Detector-side half of a push-driven stream
pub struct PushSource {
    sample_rate: u32,
    queues: Option<(Consumer<SampleChunk>, Producer<SampleChunk>)>,
    failure: FailureSlot,
    pump: Option<JoinHandle<()>>,
}

impl PushSource {
    /// Create a source and its capture handle
    ///
    /// # Arguments
    /// * `sample_rate` - Rate of the pushed samples
    /// * `chunk_count` - Pre-allocated chunks in flight
    /// * `chunk_size` - Maximum samples per chunk
    pub fn new(
        sample_rate: u32,
        chunk_count: usize,
        chunk_size: usize,
    ) -> (Self, PushSourceHandle) {
        let channels = ChunkPool::new(chunk_count, chunk_size);
        let failure: FailureSlot = Arc::new(Mutex::new(None));

        let source = Self {
            sample_rate,
            queues: Some((channels.data_consumer, channels.pool_producer)),
            failure: Arc::clone(&failure),
            pump: None,
        };
        let handle = PushSourceHandle {
            data_producer: channels.data_producer,
            pool_consumer: channels.pool_consumer,
            chunk_size: chunk_size.max(1),
            dropped_samples: Arc::new(AtomicU64::new(0)),
            failure,
        };
        (source, handle)
    }

    fn take_failure(failure: &FailureSlot) -> Option<AudioError> {
        match failure.lock() {
            Ok(mut slot) => slot.take(),
            Err(_) => Some(AudioError::LockPoisoned {
                component: "push_source_failure".to_string(),
            }),
        }
    }
}

impl AudioSource for PushSource {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn start(&mut self) -> Result<mpsc::Receiver<SourceEvent>, AudioError> {
        if self.pump.is_some() {
            return Err(AudioError::AlreadyRunning);
        }
        let runtime =
            tokio::runtime::Handle::try_current().map_err(|_| AudioError::RuntimeUnavailable)?;
        // A push source streams once; its queues are consumed by the pump
        let (mut data_consumer, mut pool_producer) =
            self.queues.take().ok_or(AudioError::StreamFailure {
                reason: "push source already consumed".to_string(),
            })?;

        let (tx, rx) = mpsc::channel(SOURCE_CHANNEL_CAPACITY);
        let failure = Arc::clone(&self.failure);

        self.pump = Some(runtime.spawn(async move {
            loop {
                if let Some(error) = Self::take_failure(&failure) {
                    let _ = tx.send(SourceEvent::Failed(error)).await;
                    return;
                }

                let mut forwarded = false;
                while let Ok(mut chunk) = data_consumer.pop() {
                    let samples = chunk.to_vec();
                    chunk.clear();
                    let _ = pool_producer.push(chunk);
                    if tx.send(SourceEvent::Samples(samples)).await.is_err() {
                        return;
                    }
                    forwarded = true;
                }

                if !forwarded {
                    if data_consumer.is_abandoned() && data_consumer.is_empty() {
                        tracing::debug!("[PushSource] Capture handle dropped, ending stream");
                        return;
                    }
                    tokio::time::sleep(PUMP_POLL_INTERVAL).await;
                }
            }
        }));

        Ok(rx)
    }

    fn stop(&mut self) {
        if let Some(pump) = self.pump.take() {
            pump.abort();
        }
    }
}

impl Drop for PushSource {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn runtime() -> tokio::runtime::Runtime {
        tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .build()
            .unwrap()
    }

    #[test]
    fn test_push_splits_into_chunks() {
        let runtime = runtime();
        let received = runtime.block_on(async {
            let (mut source, mut handle) = PushSource::new(8000, 4, 100);
            let mut rx = source.start().unwrap();

            assert_eq!(handle.push(&[0.1; 250]), 250);
            drop(handle);

            let mut lengths = Vec::new();
            while let Some(event) = rx.recv().await {
                if let SourceEvent::Samples(samples) = event {
                    lengths.push(samples.len());
                }
            }
            lengths
        });
        assert_eq!(received, vec![100, 100, 50]);
    }

    #[test]
    fn test_exhausted_pool_counts_drops() {
        let (_source, mut handle) = PushSource::new(8000, 2, 10);
        assert_eq!(handle.push(&[0.0; 35]), 20);
        assert_eq!(handle.dropped_samples(), 15);
    }

    #[test]
    fn test_reported_failure_ends_stream() {
        let runtime = runtime();
        let events = runtime.block_on(async {
            let (mut source, handle) = PushSource::new(8000, 2, 10);
            let mut rx = source.start().unwrap();
            handle.report_failure(AudioError::DeviceUnavailable {
                details: "unplugged".to_string(),
            });

            let mut events = Vec::new();
            while let Some(event) = rx.recv().await {
                events.push(event);
            }
            events
        });
        assert_eq!(events.len(), 1);
        assert!(matches!(
            events[0],
            SourceEvent::Failed(AudioError::DeviceUnavailable { .. })
        ));
    }

    #[test]
    fn test_second_start_rejected() {
        let runtime = runtime();
        runtime.block_on(async {
            let (mut source, _handle) = PushSource::new(8000, 2, 10);
            assert!(source.start().is_ok());
            assert_eq!(source.start().unwrap_err(), AudioError::AlreadyRunning);
            source.stop();
            assert!(source.start().is_err());
        });
    }

    #[test]
    fn test_start_outside_runtime() {
        let (mut source, _handle) = PushSource::new(8000, 2, 10);
        assert_eq!(source.start().unwrap_err(), AudioError::RuntimeUnavailable);
    }
}
