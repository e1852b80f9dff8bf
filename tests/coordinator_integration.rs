//! Integration tests for the streaming detector
//!
//! These drive `DetectorCoordinator` end to end with synthetic and push
//! sources on an explicit multi-thread runtime, covering:
//! - The state sequence of a session
//! - Tempo accuracy on click tracks
//! - `stop()` halting emission
//! - Source failure, recovery via stop + start
//! - Sample-rate validation
//! - Hop skipping while a cycle is in flight, and algorithm timeouts

use std::time::Duration;

use tempo_consensus::audio::synthetic::click_track;
use tempo_consensus::audio::{AudioSource, PushSource, SyntheticSource};
use tempo_consensus::config::{AppConfig, ConsensusPolicy};
use tempo_consensus::consensus::ConsensusResult;
use tempo_consensus::coordinator::{DetectionState, DetectorCoordinator, StateEvent};
use tempo_consensus::error::AudioError;
use tokio::sync::broadcast;

fn init_test_runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_multi_thread()
        .worker_threads(4)
        .enable_all()
        .build()
        .expect("failed to build test runtime")
}

fn drain<T: Clone>(rx: &mut broadcast::Receiver<T>) -> Vec<T> {
    let mut items = Vec::new();
    while let Ok(item) = rx.try_recv() {
        items.push(item);
    }
    items
}

fn states(events: &[StateEvent]) -> Vec<DetectionState> {
    events.iter().map(|event| event.state).collect()
}

async fn run_to_completion(
    coordinator: &DetectorCoordinator,
    source: Box<dyn AudioSource>,
) -> Vec<ConsensusResult> {
    let mut results = coordinator.subscribe_results();
    coordinator.start(source).expect("start should succeed");
    coordinator
        .wait_for_completion()
        .await
        .expect("session should be registered");
    let received = drain(&mut results);
    coordinator.stop().await.expect("stop should succeed");
    received
}

#[test]
fn test_state_sequence_of_a_session() {
    let runtime = init_test_runtime();
    runtime.block_on(async {
        let coordinator = DetectorCoordinator::new(AppConfig::default()).unwrap();
        let mut state_rx = coordinator.subscribe_state();

        let results = run_to_completion(
            &coordinator,
            Box::new(SyntheticSource::new(44100, 120.0, 8.0)),
        )
        .await;
        assert!(!results.is_empty());

        let sequence = states(&drain(&mut state_rx));
        assert_eq!(
            &sequence[..4],
            &[
                DetectionState::Listening,
                DetectionState::Buffering,
                DetectionState::Analyzing,
                DetectionState::StreamingResults,
            ]
        );
        assert_eq!(sequence.last(), Some(&DetectionState::Idle));
        assert_eq!(coordinator.state(), DetectionState::Idle);
    });
}

#[test]
fn test_click_track_tempo_detected() {
    let runtime = init_test_runtime();
    runtime.block_on(async {
        let coordinator = DetectorCoordinator::new(AppConfig::default()).unwrap();
        let results = run_to_completion(
            &coordinator,
            Box::new(SyntheticSource::new(44100, 120.0, 16.0)),
        )
        .await;

        assert!(!results.is_empty());
        for result in &results {
            assert!(
                (result.bpm - 120.0).abs() < 3.0,
                "expected ~120 BPM, got {:.2}",
                result.bpm
            );
            assert!(result.confidence > 0.0 && result.confidence <= 1.0);
            assert!(result.cluster.len() >= 2);
        }
        assert!(results
            .windows(2)
            .all(|pair| pair[0].timestamp_secs < pair[1].timestamp_secs));

        let stats = coordinator.stats();
        assert_eq!(stats.results_emitted, results.len() as u64);
        assert_eq!(stats.samples_received, 16 * 44100);
    });
}

#[test]
fn test_baseline_policy_end_to_end() {
    let runtime = init_test_runtime();
    runtime.block_on(async {
        let mut config = AppConfig::default();
        config.consensus.policy = ConsensusPolicy::Baseline;
        let coordinator = DetectorCoordinator::new(config).unwrap();

        let results = run_to_completion(
            &coordinator,
            Box::new(SyntheticSource::new(44100, 100.0, 8.0).with_seed(7)),
        )
        .await;

        assert!(!results.is_empty());
        assert!((results[0].bpm - 100.0).abs() < 3.0, "got {}", results[0].bpm);
    });
}

#[test]
fn test_stop_halts_emission() {
    let runtime = init_test_runtime();
    runtime.block_on(async {
        let mut config = AppConfig::default();
        config.detection.window_duration_secs = 3.0;
        config.coordinator.hop_duration_secs = 1.0;
        let coordinator = DetectorCoordinator::new(config).unwrap();
        let mut results = coordinator.subscribe_results();
        let mut state_rx = coordinator.subscribe_state();

        coordinator
            .start(Box::new(
                SyntheticSource::new(44100, 120.0, 60.0).with_speed(4.0),
            ))
            .unwrap();

        // Wait for the first result, then stop mid-stream
        tokio::time::timeout(Duration::from_secs(20), results.recv())
            .await
            .expect("a result within 20s")
            .expect("result channel open");

        coordinator.stop().await.unwrap();
        assert_eq!(coordinator.state(), DetectionState::Idle);
        assert!(!coordinator.is_running());

        drain(&mut results);
        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert!(
            matches!(results.try_recv(), Err(broadcast::error::TryRecvError::Empty)),
            "no result may be emitted after stop() returns"
        );
        assert_eq!(
            states(&drain(&mut state_rx)).last(),
            Some(&DetectionState::Idle)
        );
    });
}

#[test]
fn test_source_failure_moves_to_error_until_stop() {
    let runtime = init_test_runtime();
    runtime.block_on(async {
        let coordinator = DetectorCoordinator::new(AppConfig::default()).unwrap();
        let mut state_rx = coordinator.subscribe_state();

        coordinator
            .start(Box::new(
                SyntheticSource::new(44100, 120.0, 30.0).with_failure_after(20),
            ))
            .unwrap();
        coordinator.wait_for_completion().await.unwrap();

        assert_eq!(coordinator.state(), DetectionState::Error);
        let events = drain(&mut state_rx);
        let error = events
            .iter()
            .find(|event| event.state == DetectionState::Error)
            .expect("an Error transition");
        assert!(error.status.is_some());

        // Error is terminal until stop
        assert_eq!(
            coordinator.start(Box::new(SyntheticSource::new(44100, 120.0, 8.0))),
            Err(AudioError::AlreadyRunning)
        );

        coordinator.stop().await.unwrap();
        assert_eq!(coordinator.state(), DetectionState::Idle);

        // A fresh start recovers
        let results = run_to_completion(
            &coordinator,
            Box::new(SyntheticSource::new(44100, 120.0, 8.0)),
        )
        .await;
        assert!(!results.is_empty());
    });
}

#[test]
fn test_sample_rate_mismatch_rejected() {
    let runtime = init_test_runtime();
    let _guard = runtime.enter();

    let coordinator = DetectorCoordinator::new(AppConfig::default()).unwrap();
    let result = coordinator.start(Box::new(SyntheticSource::new(22050, 120.0, 8.0)));
    assert_eq!(
        result,
        Err(AudioError::SampleRateMismatch {
            expected: 44100,
            actual: 22050,
        })
    );
    assert_eq!(coordinator.state(), DetectionState::Idle);
    assert!(!coordinator.is_running());
}

#[test]
fn test_push_source_feeds_detector() {
    let runtime = init_test_runtime();
    runtime.block_on(async {
        let coordinator = DetectorCoordinator::new(AppConfig::default()).unwrap();
        let mut results = coordinator.subscribe_results();
        let (source, mut handle) = PushSource::new(44100, 32, 1024);
        coordinator.start(Box::new(source)).unwrap();

        // Capture thread pushing in callback-sized blocks
        let capture = std::thread::spawn(move || {
            let track = click_track(44100, 128.0, 10.0, 3);
            let mut offset = 0;
            while offset < track.len() {
                let end = (offset + 512).min(track.len());
                let accepted = handle.push(&track[offset..end]);
                let requested = end - offset;
                offset += accepted;
                if accepted < requested {
                    std::thread::sleep(Duration::from_millis(1));
                }
            }
        });

        tokio::task::spawn_blocking(move || capture.join())
            .await
            .expect("join task")
            .expect("capture thread");
        coordinator.wait_for_completion().await.unwrap();
        let received = drain(&mut results);
        coordinator.stop().await.unwrap();

        assert!(!received.is_empty());
        assert!(
            (received[0].bpm - 128.0).abs() < 3.0,
            "got {}",
            received[0].bpm
        );
        assert_eq!(coordinator.stats().samples_received, 441_000);
    });
}

#[test]
fn test_hops_skipped_while_cycle_in_flight() {
    let runtime = init_test_runtime();
    runtime.block_on(async {
        let mut config = AppConfig::default();
        config.detection.window_duration_secs = 3.0;
        config.coordinator.hop_duration_secs = 0.1;
        let coordinator = DetectorCoordinator::new(config).unwrap();

        // Unpaced: hops arrive far faster than a cycle completes
        let results = run_to_completion(
            &coordinator,
            Box::new(SyntheticSource::new(44100, 120.0, 30.0)),
        )
        .await;

        let stats = coordinator.stats();
        assert!(!results.is_empty());
        assert!(stats.hops_skipped > 0, "stats {:?}", stats);
        assert_eq!(stats.windows_dispatched, stats.results_emitted);
        assert_eq!(stats.results_emitted, results.len() as u64);
        assert!(results
            .windows(2)
            .all(|pair| pair[0].timestamp_secs < pair[1].timestamp_secs));
    });
}

#[test]
fn test_slow_algorithms_abstain_without_failing_session() {
    let runtime = init_test_runtime();
    runtime.block_on(async {
        let mut config = AppConfig::default();
        config.coordinator.algorithm_timeout_ms = 1;
        let coordinator = DetectorCoordinator::new(config).unwrap();
        let mut state_rx = coordinator.subscribe_state();

        run_to_completion(
            &coordinator,
            Box::new(SyntheticSource::new(44100, 120.0, 12.0)),
        )
        .await;

        let stats = coordinator.stats();
        assert!(stats.windows_dispatched > 0);
        assert!(stats.algorithm_timeouts > 0, "stats {:?}", stats);
        assert_eq!(stats.windows_dispatched, stats.results_emitted);

        let sequence = states(&drain(&mut state_rx));
        assert!(!sequence.contains(&DetectionState::Error));
        assert_eq!(coordinator.state(), DetectionState::Idle);
    });
}
