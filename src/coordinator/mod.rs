// DetectorCoordinator - streaming orchestration
//
// source --SourceEvent--> ingestion task --Arc<AudioWindow>--> analysis task
//                         (sliding buffer)   (bounded mpsc)    (registry fan-out,
//                                                               serialized fuse)
//                                                                    |
//                                         broadcast<ConsensusResult> + broadcast<StateEvent>
//
// The ingestion task is the only writer of the rolling buffer. At most one
// analysis cycle is in flight; hop boundaries reached meanwhile are skipped.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use futures::Stream;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;

use crate::analysis::{
    AlgorithmKind, AlgorithmRegistry, AudioWindow, BpmReading, CancelFlag, DetectionContext,
};
use crate::audio::{AudioSource, SourceEvent};
use crate::config::AppConfig;
use crate::consensus::{build_engine, ConsensusEngine, ConsensusResult};
use crate::error::{log_audio_error, log_config_error, AudioError, ConfigError, ErrorCode};

pub mod channels;
pub mod state;
pub mod stats;
pub mod window_buffer;

pub use channels::DetectorChannels;
pub use state::{DetectionState, StateCell, StateEvent};
pub use stats::{SessionStats, StatsSnapshot};
pub use window_buffer::{ExtractedWindow, SlidingWindowBuffer};

type SharedEngine = Arc<tokio::sync::Mutex<Box<dyn ConsensusEngine>>>;

/// A running detection session
struct Session {
    source: Box<dyn AudioSource>,
    cancel: CancelFlag,
    ingestion: JoinHandle<()>,
    analysis: JoinHandle<()>,
    finished: watch::Receiver<bool>,
}

/// Streaming tempo detector
///
/// Owns the algorithm registry and consensus engine, drives sessions over an
/// [`AudioSource`] and publishes results and state transitions.
///
/// # Example
///
/// ```no_run
/// use tempo_consensus::audio::SyntheticSource;
/// use tempo_consensus::config::AppConfig;
/// use tempo_consensus::coordinator::DetectorCoordinator;
///
/// # async fn run() -> Result<(), Box<dyn std::error::Error>> {
/// let coordinator = DetectorCoordinator::new(AppConfig::default())?;
/// let mut results = coordinator.subscribe_results();
/// coordinator.start(Box::new(SyntheticSource::new(44100, 120.0, 20.0)))?;
///
/// while let Ok(result) = results.recv().await {
///     println!("{:.1} BPM ({:.2})", result.bpm, result.confidence);
/// }
/// coordinator.stop().await?;
/// # Ok(())
/// # }
/// ```
pub struct DetectorCoordinator {
    config: AppConfig,
    context: DetectionContext,
    hop_len: usize,
    registry: Arc<AlgorithmRegistry>,
    engine: SharedEngine,
    channels: DetectorChannels,
    state: Arc<StateCell>,
    stats: Arc<SessionStats>,
    session: Mutex<Option<Session>>,
}

impl DetectorCoordinator {
    /// Validate `config` and build the registry and consensus engine
    pub fn new(config: AppConfig) -> Result<Self, ConfigError> {
        if let Err(err) = config.validate() {
            log_config_error(&err, "DetectorCoordinator::new");
            return Err(err);
        }

        let context = DetectionContext::from_config(&config.detection)?;
        let registry = AlgorithmRegistry::from_config(&config)?;
        let engine = build_engine(&config.consensus, context, registry.len());
        let hop_len = context.seconds_to_samples(config.coordinator.hop_duration_secs);
        let channels = DetectorChannels::new(
            config.coordinator.result_channel_capacity,
            config.coordinator.state_channel_capacity,
        );
        let state = Arc::new(StateCell::new(channels.state_sender()));

        tracing::info!(
            "[Coordinator] Created: {} Hz, {:.1}s window, {:.1}s hop, {:?} consensus, algorithms {:?}",
            context.sample_rate(),
            context.window_duration_secs(),
            config.coordinator.hop_duration_secs,
            engine.policy(),
            registry.kinds()
        );

        Ok(Self {
            config,
            context,
            hop_len,
            registry: Arc::new(registry),
            engine: Arc::new(tokio::sync::Mutex::new(engine)),
            channels,
            state,
            stats: Arc::new(SessionStats::default()),
            session: Mutex::new(None),
        })
    }

    /// Start a session reading from `source`
    ///
    /// Must be called from within a tokio runtime. Fails with
    /// `AlreadyRunning` while a session exists (including one that ended in
    /// `Error` and has not been stopped yet).
    pub fn start(&self, mut source: Box<dyn AudioSource>) -> Result<(), AudioError> {
        let handle =
            tokio::runtime::Handle::try_current().map_err(|_| AudioError::RuntimeUnavailable)?;
        let mut session = self.lock_session()?;

        if session.is_some() {
            return Err(AudioError::AlreadyRunning);
        }
        if source.sample_rate() != self.context.sample_rate() {
            let err = AudioError::SampleRateMismatch {
                expected: self.context.sample_rate(),
                actual: source.sample_rate(),
            };
            log_audio_error(&err, "start");
            return Err(err);
        }

        // A failed source start leaves Error without a session behind
        if self.state.current() == DetectionState::Error {
            self.state.transition(DetectionState::Idle, None);
        }

        self.stats.reset();
        self.state
            .transition(DetectionState::Listening, Some("Listening".to_string()));

        let events = match source.start() {
            Ok(events) => events,
            Err(err) => {
                log_audio_error(&err, "start");
                let next = if err.is_fatal_for_session() {
                    DetectionState::Error
                } else {
                    DetectionState::Idle
                };
                self.state.transition(next, Some(err.message()));
                return Err(err);
            }
        };

        let cancel = CancelFlag::new();
        let in_flight = Arc::new(AtomicBool::new(false));
        let (window_tx, window_rx) = mpsc::channel(self.config.coordinator.window_queue_capacity);
        let (finished_tx, finished_rx) = watch::channel(false);

        let ingestion = handle.spawn(run_ingestion(
            events,
            SlidingWindowBuffer::new(
                self.context.window_len(),
                self.hop_len,
                self.context.sample_rate(),
            ),
            window_tx,
            Arc::clone(&in_flight),
            Arc::clone(&self.state),
            Arc::clone(&self.stats),
            cancel.clone(),
        ));

        let analysis = handle.spawn(run_analysis(
            AnalysisTask {
                registry: Arc::clone(&self.registry),
                engine: Arc::clone(&self.engine),
                context: self.context,
                results: self.channels.result_sender(),
                state: Arc::clone(&self.state),
                stats: Arc::clone(&self.stats),
                in_flight,
                cancel: cancel.clone(),
            },
            window_rx,
            finished_tx,
        ));

        *session = Some(Session {
            source,
            cancel,
            ingestion,
            analysis,
            finished: finished_rx,
        });

        tracing::info!("[Coordinator] Session started");
        Ok(())
    }

    /// Stop the session and return to `Idle`
    ///
    /// Cancels the in-flight cycle and ingestion; once this returns no
    /// further result is published.
    pub async fn stop(&self) -> Result<(), AudioError> {
        let session = self.lock_session()?.take();

        let Some(mut session) = session else {
            if self.state.current() == DetectionState::Error {
                self.state
                    .transition(DetectionState::Idle, Some("Stopped".to_string()));
                return Ok(());
            }
            return Err(AudioError::NotRunning);
        };

        session.cancel.cancel();
        session.source.stop();
        session.ingestion.abort();
        session.analysis.abort();
        // Cancellation errors are expected here
        let _ = session.ingestion.await;
        let _ = session.analysis.await;

        self.state
            .transition(DetectionState::Idle, Some("Stopped".to_string()));

        let stats = self.stats.snapshot();
        tracing::info!(
            "[Coordinator] Session stopped: {} windows, {} results, {} hops skipped, {} timeouts",
            stats.windows_dispatched,
            stats.results_emitted,
            stats.hops_skipped,
            stats.algorithm_timeouts
        );
        Ok(())
    }

    /// Wait until the current session has analyzed everything its source produced
    ///
    /// Resolves after the source ends or fails. The session stays registered
    /// until [`stop`](Self::stop) is called.
    pub async fn wait_for_completion(&self) -> Result<(), AudioError> {
        let mut finished = match self.lock_session()?.as_ref() {
            Some(session) => session.finished.clone(),
            None => return Err(AudioError::NotRunning),
        };

        while !*finished.borrow_and_update() {
            if finished.changed().await.is_err() {
                break;
            }
        }
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.lock_session()
            .map(|session| session.is_some())
            .unwrap_or(false)
    }

    pub fn state(&self) -> DetectionState {
        self.state.current()
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn context(&self) -> DetectionContext {
        self.context
    }

    pub fn algorithms(&self) -> Vec<AlgorithmKind> {
        self.registry.kinds()
    }

    pub fn subscribe_results(&self) -> broadcast::Receiver<ConsensusResult> {
        self.channels.subscribe_results()
    }

    pub fn subscribe_state(&self) -> broadcast::Receiver<StateEvent> {
        self.channels.subscribe_state()
    }

    pub fn result_stream(&self) -> impl Stream<Item = ConsensusResult> {
        self.channels.result_stream()
    }

    pub fn state_stream(&self) -> impl Stream<Item = StateEvent> {
        self.channels.state_stream()
    }

    pub fn subscribe_results_unbounded(&self) -> mpsc::UnboundedReceiver<ConsensusResult> {
        self.channels.subscribe_results_unbounded()
    }

    pub fn subscribe_state_unbounded(&self) -> mpsc::UnboundedReceiver<StateEvent> {
        self.channels.subscribe_state_unbounded()
    }

    fn lock_session(&self) -> Result<MutexGuard<'_, Option<Session>>, AudioError> {
        self.session.lock().map_err(|_| AudioError::LockPoisoned {
            component: "coordinator session".to_string(),
        })
    }
}

async fn run_ingestion(
    mut events: mpsc::Receiver<SourceEvent>,
    mut buffer: SlidingWindowBuffer,
    windows: mpsc::Sender<Arc<AudioWindow>>,
    in_flight: Arc<AtomicBool>,
    state: Arc<StateCell>,
    stats: Arc<SessionStats>,
    cancel: CancelFlag,
) {
    let mut buffering = false;

    while let Some(event) = events.recv().await {
        if cancel.is_cancelled() {
            break;
        }

        let chunk = match event {
            SourceEvent::Samples(chunk) => chunk,
            SourceEvent::Failed(err) if !err.is_fatal_for_session() => {
                tracing::warn!("[Coordinator] Ignoring non-fatal source error: {}", err);
                continue;
            }
            SourceEvent::Failed(err) => {
                log_audio_error(&err, "ingestion");
                cancel.cancel();
                state.transition(DetectionState::Error, Some(err.message()));
                break;
            }
        };
        if chunk.is_empty() {
            continue;
        }

        stats.record_samples(chunk.len());
        if !buffering {
            buffering = true;
            state.transition(DetectionState::Buffering, Some("Buffering".to_string()));
        }

        let Some(extracted) = buffer.push(&chunk) else {
            continue;
        };
        stats.record_skipped(extracted.skipped);

        if in_flight.swap(true, Ordering::AcqRel) {
            tracing::debug!(
                "[Coordinator] Cycle in flight, skipping window at {:.2}s",
                extracted.window.start_time_secs()
            );
            stats.record_skipped(1);
            continue;
        }

        match windows.try_send(Arc::new(extracted.window)) {
            Ok(()) => stats.record_dispatch(),
            Err(TrySendError::Full(window)) => {
                in_flight.store(false, Ordering::Release);
                tracing::debug!(
                    "[Coordinator] Window queue full, skipping window at {:.2}s",
                    window.start_time_secs()
                );
                stats.record_skipped(1);
            }
            Err(TrySendError::Closed(_)) => break,
        }
    }

    tracing::info!(
        "[Coordinator] Ingestion finished after {} samples",
        buffer.received()
    );
}

/// Shared handles owned by the analysis task
struct AnalysisTask {
    registry: Arc<AlgorithmRegistry>,
    engine: SharedEngine,
    context: DetectionContext,
    results: broadcast::Sender<ConsensusResult>,
    state: Arc<StateCell>,
    stats: Arc<SessionStats>,
    in_flight: Arc<AtomicBool>,
    cancel: CancelFlag,
}

async fn run_analysis(
    task: AnalysisTask,
    mut windows: mpsc::Receiver<Arc<AudioWindow>>,
    finished: watch::Sender<bool>,
) {
    task.engine.lock().await.reset();

    while let Some(window) = windows.recv().await {
        if task.cancel.is_cancelled() || !task.state.transition(DetectionState::Analyzing, None) {
            break;
        }

        let timestamp_secs = window.start_time_secs();
        let outcomes = task
            .registry
            .evaluate_detailed(Arc::clone(&window), task.context, &task.cancel)
            .await;
        task.stats.record_outcomes(&outcomes);
        if task.cancel.is_cancelled() {
            break;
        }

        let readings: Vec<BpmReading> = outcomes
            .iter()
            .filter_map(|outcome| outcome.reading().copied())
            .collect();
        let result = task.engine.lock().await.fuse(&readings, timestamp_secs);

        // A failed transition means the session was stopped or failed meanwhile
        let status = format!("{:.1} BPM", result.bpm);
        if task.cancel.is_cancelled()
            || !task
                .state
                .transition(DetectionState::StreamingResults, Some(status))
        {
            break;
        }

        tracing::info!(
            "[Coordinator] {:.2}s: {:.1} BPM (confidence {:.2}, {}/{} readings)",
            timestamp_secs,
            result.bpm,
            result.confidence,
            readings.len(),
            outcomes.len()
        );
        // No subscribers is fine
        let _ = task.results.send(result);
        task.stats.record_result();
        task.in_flight.store(false, Ordering::Release);
    }

    let _ = finished.send(true);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::SyntheticSource;
    use crate::config::ConsensusPolicy;

    fn fast_config() -> AppConfig {
        let mut config = AppConfig::default();
        config.detection.window_duration_secs = 3.0;
        config.coordinator.hop_duration_secs = 1.5;
        config.coordinator.algorithm_timeout_ms = 10_000;
        config
    }

    #[test]
    fn test_new_rejects_invalid_config() {
        let mut config = AppConfig::default();
        config.coordinator.hop_duration_secs = 10.0;
        assert!(matches!(
            DetectorCoordinator::new(config),
            Err(ConfigError::InvalidHopDuration { .. })
        ));
    }

    #[test]
    fn test_new_starts_idle() {
        let coordinator = DetectorCoordinator::new(AppConfig::default()).unwrap();
        assert_eq!(coordinator.state(), DetectionState::Idle);
        assert_eq!(coordinator.algorithms().len(), 4);
        assert_eq!(coordinator.hop_len, 176_400);
        assert!(!coordinator.is_running());
    }

    #[test]
    fn test_start_requires_runtime() {
        let coordinator = DetectorCoordinator::new(fast_config()).unwrap();
        let result = coordinator.start(Box::new(SyntheticSource::new(44100, 120.0, 5.0)));
        assert_eq!(result, Err(AudioError::RuntimeUnavailable));
        assert_eq!(coordinator.state(), DetectionState::Idle);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_sample_rate_mismatch_rejected() {
        let coordinator = DetectorCoordinator::new(fast_config()).unwrap();
        let result = coordinator.start(Box::new(SyntheticSource::new(48000, 120.0, 5.0)));
        assert_eq!(
            result,
            Err(AudioError::SampleRateMismatch {
                expected: 44100,
                actual: 48000
            })
        );
        assert_eq!(coordinator.state(), DetectionState::Idle);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_second_start_rejected() {
        let coordinator = DetectorCoordinator::new(fast_config()).unwrap();
        coordinator
            .start(Box::new(
                SyntheticSource::new(44100, 120.0, 30.0).with_speed(1.0),
            ))
            .unwrap();
        let again = coordinator.start(Box::new(SyntheticSource::new(44100, 120.0, 5.0)));
        assert_eq!(again, Err(AudioError::AlreadyRunning));
        coordinator.stop().await.unwrap();
        assert_eq!(coordinator.state(), DetectionState::Idle);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_stop_without_session() {
        let coordinator = DetectorCoordinator::new(fast_config()).unwrap();
        assert_eq!(coordinator.stop().await, Err(AudioError::NotRunning));
        assert_eq!(
            coordinator.wait_for_completion().await,
            Err(AudioError::NotRunning)
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_baseline_session_completes() {
        let mut config = fast_config();
        config.consensus.policy = ConsensusPolicy::Baseline;
        let coordinator = DetectorCoordinator::new(config).unwrap();
        let mut results = coordinator.subscribe_results();

        coordinator
            .start(Box::new(SyntheticSource::new(44100, 120.0, 9.0)))
            .unwrap();
        coordinator.wait_for_completion().await.unwrap();
        coordinator.stop().await.unwrap();

        let mut received = Vec::new();
        while let Ok(result) = results.try_recv() {
            received.push(result);
        }
        assert!(!received.is_empty());
        assert!(received
            .windows(2)
            .all(|pair| pair[0].timestamp_secs < pair[1].timestamp_secs));
        assert_eq!(coordinator.stats().results_emitted, received.len() as u64);
    }
}
