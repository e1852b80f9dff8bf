//! Detection state machine.
//!
//! ```text
//! Idle --start--> Listening --samples--> Buffering --window--> Analyzing
//!                                                     ^            |
//!                                                     |         result
//!                                                     +---- StreamingResults
//! any active state --stop--> Idle
//! any active state --source failure--> Error --stop--> Idle
//! ```

use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DetectionState {
    Idle,
    Listening,
    Buffering,
    Analyzing,
    StreamingResults,
    Error,
}

impl DetectionState {
    /// States in which a session is running
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            DetectionState::Listening
                | DetectionState::Buffering
                | DetectionState::Analyzing
                | DetectionState::StreamingResults
        )
    }

    pub fn can_transition_to(&self, next: DetectionState) -> bool {
        use DetectionState::*;
        match (*self, next) {
            (Idle, Listening) => true,
            (Listening, Buffering) => true,
            (Buffering, Analyzing) => true,
            (Analyzing, StreamingResults) => true,
            (StreamingResults, Analyzing) => true,
            (Error, Idle) => true,
            (from, Idle) | (from, Error) => from.is_active(),
            _ => false,
        }
    }
}

/// Observable state transition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateEvent {
    pub state: DetectionState,
    /// Optional human-readable status text
    pub status: Option<String>,
    /// Wall-clock time of the transition, milliseconds since the Unix epoch
    pub timestamp_ms: u64,
}

/// Current state plus its transition broadcast
///
/// Transitions are validated and published under one lock so subscribers
/// observe them in the order they were applied.
pub struct StateCell {
    state: Mutex<DetectionState>,
    events: broadcast::Sender<StateEvent>,
}

impl StateCell {
    pub fn new(events: broadcast::Sender<StateEvent>) -> Self {
        Self {
            state: Mutex::new(DetectionState::Idle),
            events,
        }
    }

    pub fn current(&self) -> DetectionState {
        match self.state.lock() {
            Ok(state) => *state,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }

    /// Apply a transition if the state machine allows it
    ///
    /// Returns `true` when the state changed. Re-entering the current state
    /// is a silent no-op; invalid transitions are logged and ignored.
    pub fn transition(&self, next: DetectionState, status: Option<String>) -> bool {
        let mut state = match self.state.lock() {
            Ok(state) => state,
            Err(poisoned) => poisoned.into_inner(),
        };

        if *state == next {
            return false;
        }
        if !state.can_transition_to(next) {
            tracing::debug!("[Coordinator] Ignoring transition {:?} -> {:?}", *state, next);
            return false;
        }

        tracing::info!("[Coordinator] State {:?} -> {:?}", *state, next);
        *state = next;
        // No subscribers is fine
        let _ = self.events.send(StateEvent {
            state: next,
            status,
            timestamp_ms: now_ms(),
        });
        true
    }
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
