//! Algorithm registry: fans one window out to every configured strategy.

use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;

use super::{
    build_algorithms, AlgorithmKind, AudioWindow, BpmReading, CancelFlag, DetectionContext,
    TempoAlgorithm,
};
use crate::config::AppConfig;
use crate::error::ConfigError;

/// What one algorithm produced for one window
#[derive(Debug, Clone, PartialEq)]
pub enum AlgorithmOutcome {
    Reading(BpmReading),
    /// No periodicity, silence or cancellation
    Abstained(AlgorithmKind),
    TimedOut(AlgorithmKind),
    /// Panicked or produced an invalid reading
    Failed {
        algorithm: AlgorithmKind,
        reason: String,
    },
}

impl AlgorithmOutcome {
    pub fn algorithm(&self) -> AlgorithmKind {
        match self {
            AlgorithmOutcome::Reading(reading) => reading.algorithm,
            AlgorithmOutcome::Abstained(kind) | AlgorithmOutcome::TimedOut(kind) => *kind,
            AlgorithmOutcome::Failed { algorithm, .. } => *algorithm,
        }
    }

    pub fn reading(&self) -> Option<&BpmReading> {
        match self {
            AlgorithmOutcome::Reading(reading) => Some(reading),
            _ => None,
        }
    }
}

/// Ordered, fixed set of tempo algorithms
///
/// Evaluation runs every algorithm concurrently on the tokio blocking pool.
/// A slow or panicking algorithm only loses its own reading; the others are
/// returned in registry order regardless of completion order.
pub struct AlgorithmRegistry {
    algorithms: Vec<Arc<dyn TempoAlgorithm>>,
    timeout: Duration,
}

impl AlgorithmRegistry {
    pub fn new(
        algorithms: Vec<Arc<dyn TempoAlgorithm>>,
        timeout: Duration,
    ) -> Result<Self, ConfigError> {
        if algorithms.is_empty() {
            return Err(ConfigError::NoAlgorithms);
        }
        Ok(Self {
            algorithms,
            timeout,
        })
    }

    pub fn from_config(config: &AppConfig) -> Result<Self, ConfigError> {
        config.algorithms.validate()?;
        Self::new(
            build_algorithms(&config.algorithms),
            Duration::from_millis(config.coordinator.algorithm_timeout_ms),
        )
    }

    pub fn len(&self) -> usize {
        self.algorithms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.algorithms.is_empty()
    }

    pub fn kinds(&self) -> Vec<AlgorithmKind> {
        self.algorithms.iter().map(|a| a.kind()).collect()
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Run every algorithm on `window` and report each outcome
    ///
    /// Each worker gets its own child of `cancel`, tripped when its timeout
    /// fires, so a timed-out worker stops at its next poll instead of
    /// holding a blocking-pool thread. Its result is discarded either way.
    pub async fn evaluate_detailed(
        &self,
        window: Arc<AudioWindow>,
        context: DetectionContext,
        cancel: &CancelFlag,
    ) -> Vec<AlgorithmOutcome> {
        let tasks = self.algorithms.iter().map(|algorithm| {
            let algorithm = Arc::clone(algorithm);
            let window = Arc::clone(&window);
            let worker_cancel = cancel.child();
            let cancel = worker_cancel.clone();
            let kind = algorithm.kind();
            let timeout = self.timeout;

            async move {
                let worker = tokio::task::spawn_blocking(move || {
                    algorithm.evaluate_with_cancel(&window, &context, &worker_cancel)
                });
                match tokio::time::timeout(timeout, worker).await {
                    Ok(Ok(Some(reading))) => validate_reading(kind, reading, &context),
                    Ok(Ok(None)) => AlgorithmOutcome::Abstained(kind),
                    Ok(Err(join_error)) => {
                        tracing::error!("[Registry] {} worker failed: {}", kind, join_error);
                        AlgorithmOutcome::Failed {
                            algorithm: kind,
                            reason: join_error.to_string(),
                        }
                    }
                    Err(_) => {
                        cancel.cancel();
                        tracing::warn!(
                            "[Registry] {} exceeded {:?}, cancelling worker",
                            kind,
                            timeout
                        );
                        AlgorithmOutcome::TimedOut(kind)
                    }
                }
            }
        });

        join_all(tasks).await
    }

    /// Readings that survived evaluation, in registry order
    pub async fn evaluate(
        &self,
        window: Arc<AudioWindow>,
        context: DetectionContext,
        cancel: &CancelFlag,
    ) -> Vec<BpmReading> {
        self.evaluate_detailed(window, context, cancel)
            .await
            .iter()
            .filter_map(|outcome| outcome.reading().copied())
            .collect()
    }

    /// Synchronous evaluation on scoped threads, without a timeout
    pub fn evaluate_blocking(
        &self,
        window: &AudioWindow,
        context: &DetectionContext,
    ) -> Vec<BpmReading> {
        let cancel = CancelFlag::new();
        std::thread::scope(|scope| {
            let handles: Vec<_> = self
                .algorithms
                .iter()
                .map(|algorithm| {
                    let cancel = &cancel;
                    let handle = scope
                        .spawn(move || algorithm.evaluate_with_cancel(window, context, cancel));
                    (algorithm.kind(), handle)
                })
                .collect();

            handles
                .into_iter()
                .filter_map(|(kind, handle)| match handle.join() {
                    Ok(Some(reading)) => validate_reading(kind, reading, context)
                        .reading()
                        .copied(),
                    Ok(None) => None,
                    Err(_) => {
                        tracing::error!("[Registry] {} panicked", kind);
                        None
                    }
                })
                .collect()
        })
    }
}

fn validate_reading(
    kind: AlgorithmKind,
    reading: BpmReading,
    context: &DetectionContext,
) -> AlgorithmOutcome {
    if reading.bpm.is_finite() && context.contains(reading.bpm) {
        return AlgorithmOutcome::Reading(BpmReading { algorithm: kind, ..reading });
    }
    tracing::warn!(
        "[Registry] {} produced out-of-range BPM {}, dropping",
        kind,
        reading.bpm
    );
    AlgorithmOutcome::Failed {
        algorithm: kind,
        reason: format!(
            "bpm {} outside [{}, {}]",
            reading.bpm,
            context.min_bpm(),
            context.max_bpm()
        ),
    }
}
