// Result and state channels of a detector
//
// Both are tokio broadcast channels: every subscriber gets its own copy and
// a subscriber that falls behind loses the oldest messages, never blocking
// the analysis task.

use futures::{Stream, StreamExt};
use tokio::sync::{broadcast, mpsc};
use tokio_stream::wrappers::BroadcastStream;

use super::state::StateEvent;
use crate::consensus::ConsensusResult;

pub struct DetectorChannels {
    results: broadcast::Sender<ConsensusResult>,
    states: broadcast::Sender<StateEvent>,
}

impl DetectorChannels {
    pub fn new(result_capacity: usize, state_capacity: usize) -> Self {
        let (results, _) = broadcast::channel(result_capacity.max(1));
        let (states, _) = broadcast::channel(state_capacity.max(1));
        Self { results, states }
    }

    pub fn result_sender(&self) -> broadcast::Sender<ConsensusResult> {
        self.results.clone()
    }

    pub fn state_sender(&self) -> broadcast::Sender<StateEvent> {
        self.states.clone()
    }

    pub fn subscribe_results(&self) -> broadcast::Receiver<ConsensusResult> {
        self.results.subscribe()
    }

    pub fn subscribe_state(&self) -> broadcast::Receiver<StateEvent> {
        self.states.subscribe()
    }

    /// Results as a `Stream`; lagged gaps are skipped
    pub fn result_stream(&self) -> impl Stream<Item = ConsensusResult> {
        lossy_stream(self.results.subscribe())
    }

    pub fn state_stream(&self) -> impl Stream<Item = StateEvent> {
        lossy_stream(self.states.subscribe())
    }

    pub fn subscribe_results_unbounded(&self) -> mpsc::UnboundedReceiver<ConsensusResult> {
        forward_unbounded(self.results.subscribe(), "results")
    }

    pub fn subscribe_state_unbounded(&self) -> mpsc::UnboundedReceiver<StateEvent> {
        forward_unbounded(self.states.subscribe(), "state")
    }
}

fn lossy_stream<T: Clone + Send + 'static>(
    rx: broadcast::Receiver<T>,
) -> impl Stream<Item = T> {
    BroadcastStream::new(rx).filter_map(|item| async move {
        match item {
            Ok(value) => Some(value),
            Err(err) => {
                tracing::warn!("[Coordinator] Subscriber lagging: {}", err);
                None
            }
        }
    })
}

/// Drain a broadcast receiver into an unbounded channel
///
/// Runs on the current runtime when there is one; otherwise on a dedicated
/// thread with its own current-thread runtime. Forwarding ends when the
/// sender side closes or the receiver is dropped.
fn forward_unbounded<T: Clone + Send + 'static>(
    mut broadcast_rx: broadcast::Receiver<T>,
    channel: &'static str,
) -> mpsc::UnboundedReceiver<T> {
    let (tx, rx) = mpsc::unbounded_channel();

    let forward = async move {
        loop {
            match broadcast_rx.recv().await {
                Ok(value) => {
                    if tx.send(value).is_err() {
                        break;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    tracing::warn!(
                        "[Coordinator] {} forwarder lagged, {} messages lost",
                        channel,
                        missed
                    );
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    };

    match tokio::runtime::Handle::try_current() {
        Ok(handle) => {
            handle.spawn(forward);
        }
        Err(_) => {
            std::thread::spawn(move || {
                match tokio::runtime::Builder::new_current_thread()
                    .enable_all()
                    .build()
                {
                    Ok(rt) => rt.block_on(forward),
                    Err(err) => {
                        tracing::error!("[Coordinator] Failed to create forwarding runtime: {}", err)
                    }
                }
            });
        }
    }

    rx
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coordinator::state::DetectionState;

    fn event(state: DetectionState) -> StateEvent {
        StateEvent {
            state,
            status: None,
            timestamp_ms: 0,
        }
    }

    #[test]
    fn test_every_subscriber_sees_each_message() {
        let channels = DetectorChannels::new(4, 4);
        let mut a = channels.subscribe_state();
        let mut b = channels.subscribe_state();

        channels
            .state_sender()
            .send(event(DetectionState::Listening))
            .unwrap();

        assert_eq!(a.try_recv().unwrap().state, DetectionState::Listening);
        assert_eq!(b.try_recv().unwrap().state, DetectionState::Listening);
    }

    #[test]
    fn test_unbounded_forwarding_without_runtime() {
        let channels = DetectorChannels::new(4, 4);
        let mut rx = channels.subscribe_state_unbounded();
        let sender = channels.state_sender();

        // The receiver was subscribed before forwarding started
        sender.send(event(DetectionState::Listening)).unwrap();
        drop(sender);
        drop(channels);

        let received = rx.blocking_recv().unwrap();
        assert_eq!(received.state, DetectionState::Listening);
        assert!(rx.blocking_recv().is_none());
    }

    #[tokio::test]
    async fn test_state_stream_skips_lagged() {
        let channels = DetectorChannels::new(1, 1);
        let stream = channels.state_stream();
        let sender = channels.state_sender();
        sender.send(event(DetectionState::Listening)).unwrap();
        sender.send(event(DetectionState::Idle)).unwrap();
        drop(sender);
        drop(channels);

        let received: Vec<StateEvent> = stream.collect().await;
        assert_eq!(received.len(), 1);
        assert_eq!(received[0].state, DetectionState::Idle);
    }
}
