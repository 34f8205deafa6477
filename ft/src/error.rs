//! Timer error taxonomy

use thiserror::Error;

use crate::domain::TimerState;
use crate::scheduler::SchedulingError;
use crate::state::StateError;

/// Errors surfaced by the timer engine
#[derive(Debug, Error)]
pub enum TimerError {
    /// Illegal transition attempted
    #[error("Cannot {operation} while {state}")]
    InvalidState { operation: &'static str, state: TimerState },

    /// Start requested while the active session slot is occupied
    #[error("Session {0} is already active")]
    SessionAlreadyActive(String),

    #[error("Planned duration must be greater than zero")]
    InvalidDuration,

    /// Host refused a background task
    #[error("Scheduling error: {0}")]
    Scheduling(#[from] SchedulingError),

    /// Durable read or write failed
    #[error("Persistence error: {0}")]
    Persistence(String),

    /// Stored state could not be parsed
    #[error("Corrupt state under '{key}': {reason}")]
    RecoveryCorruption { key: String, reason: String },

    /// An actor this call depends on has stopped
    #[error("Channel closed")]
    ChannelClosed,
}

impl From<StateError> for TimerError {
    fn from(err: StateError) -> Self {
        match err {
            StateError::Corrupt { key, reason } => Self::RecoveryCorruption { key, reason },
            StateError::ChannelError => Self::ChannelClosed,
            other => Self::Persistence(other.to_string()),
        }
    }
}

pub type TimerResult<T> = Result<T, TimerError>;

#[cfg(test)]
mod tests {
    use super::*;
    use sessionstore::StoreError;

    #[test]
    fn test_state_error_mapping() {
        let corrupt = StateError::Corrupt {
            key: "active_session".to_string(),
            reason: "EOF".to_string(),
        };
        assert!(matches!(
            TimerError::from(corrupt),
            TimerError::RecoveryCorruption { key, .. } if key == "active_session"
        ));

        let store = StateError::Store(StoreError::Injected("disk full".to_string()));
        assert!(matches!(TimerError::from(store), TimerError::Persistence(msg) if msg.contains("disk full")));

        assert!(matches!(TimerError::from(StateError::ChannelError), TimerError::ChannelClosed));
    }

    #[test]
    fn test_invalid_state_message() {
        let err = TimerError::InvalidState {
            operation: "pause",
            state: TimerState::Idle,
        };
        assert_eq!(err.to_string(), "Cannot pause while idle");
    }
}
