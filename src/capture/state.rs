//! Capture lifecycle states.
//!
//! - Idle -> Starting (process launched)
//! - Starting -> Listening (ready marker seen)
//! - Starting | Listening -> Stopping (stop token written)
//! - Starting -> Idle (launch failure)
//! - any -> Idle (process exit)

use serde::Serialize;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CaptureState {
    /// No engine process. Ready to start.
    Idle,
    /// Process launched, waiting for the ready marker.
    Starting,
    /// Engine reported that capture has begun.
    Listening,
    /// Stop token sent, waiting for the engine to exit.
    Stopping,
}

impl fmt::Display for CaptureState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CaptureState::Idle => write!(f, "Idle"),
            CaptureState::Starting => write!(f, "Starting"),
            CaptureState::Listening => write!(f, "Listening"),
            CaptureState::Stopping => write!(f, "Stopping"),
        }
    }
}

impl CaptureState {
    pub fn can_transition_to(&self, target: &CaptureState) -> bool {
        matches!(
            (self, target),
            (CaptureState::Idle, CaptureState::Starting)
                | (CaptureState::Starting, CaptureState::Listening)
                | (CaptureState::Starting, CaptureState::Stopping)
                | (CaptureState::Listening, CaptureState::Stopping)
                // Exit or launch failure
                | (CaptureState::Starting, CaptureState::Idle)
                | (CaptureState::Listening, CaptureState::Idle)
                | (CaptureState::Stopping, CaptureState::Idle)
        )
    }

    pub fn is_active(&self) -> bool {
        !matches!(self, CaptureState::Idle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_happy_path() {
        assert!(CaptureState::Idle.can_transition_to(&CaptureState::Starting));
        assert!(CaptureState::Starting.can_transition_to(&CaptureState::Listening));
        assert!(CaptureState::Listening.can_transition_to(&CaptureState::Stopping));
        assert!(CaptureState::Stopping.can_transition_to(&CaptureState::Idle));
    }

    #[test]
    fn test_exit_from_any_active_state() {
        for state in [
            CaptureState::Starting,
            CaptureState::Listening,
            CaptureState::Stopping,
        ] {
            assert!(state.can_transition_to(&CaptureState::Idle), "{state} -> Idle");
        }
    }

    #[test]
    fn test_rejected_transitions() {
        assert!(!CaptureState::Idle.can_transition_to(&CaptureState::Listening));
        assert!(!CaptureState::Idle.can_transition_to(&CaptureState::Stopping));
        assert!(!CaptureState::Stopping.can_transition_to(&CaptureState::Listening));
        assert!(!CaptureState::Listening.can_transition_to(&CaptureState::Starting));
    }
}
