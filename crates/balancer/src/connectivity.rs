//! Connectivity states and their aggregation.

use std::fmt;

/// Connectivity of one connection handle, or of the balancer as a whole.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectivityState {
    Idle,
    Connecting,
    Ready,
    TransientFailure,
    Shutdown,
}

impl fmt::Display for ConnectivityState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectivityState::Idle => "IDLE",
            ConnectivityState::Connecting => "CONNECTING",
            ConnectivityState::Ready => "READY",
            ConnectivityState::TransientFailure => "TRANSIENT_FAILURE",
            ConnectivityState::Shutdown => "SHUTDOWN",
        };
        f.write_str(name)
    }
}

/// Derives the aggregate state from per-handle transitions.
///
/// The aggregate is:
/// - `Ready` if at least one handle is ready
/// - else `Connecting` if at least one is connecting
/// - else `Idle` if at least one is idle
/// - else `TransientFailure`
///
/// `Shutdown` handles are not counted; a new handle is recorded as a
/// transition from `Shutdown`.
#[derive(Debug, Default, Clone)]
pub struct ConnectivityStateEvaluator {
    ready: usize,
    connecting: usize,
    idle: usize,
    transient_failure: usize,
}

impl ConnectivityStateEvaluator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that one handle moved from `old` to `new` and return the
    /// resulting aggregate state.
    pub fn record_transition(&mut self, old: ConnectivityState, new: ConnectivityState) -> ConnectivityState {
        if let Some(count) = self.counter(old) {
            *count = count.saturating_sub(1);
        }
        if let Some(count) = self.counter(new) {
            *count += 1;
        }
        self.current_state()
    }

    pub fn current_state(&self) -> ConnectivityState {
        if self.ready > 0 {
            ConnectivityState::Ready
        } else if self.connecting > 0 {
            ConnectivityState::Connecting
        } else if self.idle > 0 {
            ConnectivityState::Idle
        } else {
            ConnectivityState::TransientFailure
        }
    }

    fn counter(&mut self, state: ConnectivityState) -> Option<&mut usize> {
        match state {
            ConnectivityState::Ready => Some(&mut self.ready),
            ConnectivityState::Connecting => Some(&mut self.connecting),
            ConnectivityState::Idle => Some(&mut self.idle),
            ConnectivityState::TransientFailure => Some(&mut self.transient_failure),
            ConnectivityState::Shutdown => None,
        }
    }
}
