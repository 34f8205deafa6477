//! Message types for the Background Scheduler

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::oneshot;

/// Messages sent from the scheduler to the foreground controller
///
/// Delivered in order over a single channel. A message the foreground cannot
/// receive is recorded in the durable outbox instead.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum SchedulerMessage {
    /// Recurring liveness tick
    Heartbeat { timestamp: DateTime<Utc> },

    /// A registered completion task ran
    #[serde(rename_all = "camelCase")]
    CompletionFired { session_id: String, fired_at: DateTime<Utc> },

    /// The host withdrew a background task after registration
    SchedulerError { reason: String },
}

/// Host refused or could not run a background task
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SchedulingError {
    #[error("permission denied for {0}")]
    PermissionDenied(String),

    #[error("quota exceeded for {0}")]
    QuotaExceeded(String),

    #[error("scheduler unavailable")]
    Unavailable,
}

/// A pending completion registration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingCompletion {
    pub session_id: String,
    pub target: DateTime<Utc>,
}

/// Requests to the scheduler task
#[derive(Debug)]
pub enum SchedulerRequest {
    /// Register (or replace) the completion task for a session
    ScheduleCompletion {
        session_id: String,
        target: DateTime<Utc>,
        reply: oneshot::Sender<Result<(), SchedulingError>>,
    },

    CancelCompletion {
        session_id: String,
        reply: oneshot::Sender<()>,
    },

    /// Register (or replace) the recurring heartbeat; replies with the interval in effect
    ScheduleHeartbeat {
        interval: Duration,
        reply: oneshot::Sender<Result<Duration, SchedulingError>>,
    },

    /// Cancel a session's completion task and the heartbeat in one step
    CancelSession {
        session_id: String,
        reply: oneshot::Sender<()>,
    },

    CancelAll {
        reply: oneshot::Sender<()>,
    },

    PendingCompletions {
        reply: oneshot::Sender<Vec<PendingCompletion>>,
    },

    HeartbeatInterval {
        reply: oneshot::Sender<Option<Duration>>,
    },

    /// Internal: a completion timer elapsed
    CompletionDue { session_id: String, token: u64 },

    /// Internal: the heartbeat timer ticked
    HeartbeatDue { generation: u64 },

    Shutdown,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_message_layout() {
        let fired = SchedulerMessage::CompletionFired {
            session_id: "work-1".to_string(),
            fired_at: Utc.with_ymd_and_hms(2026, 10, 15, 9, 25, 2).unwrap(),
        };
        let json = serde_json::to_value(&fired).unwrap();
        assert_eq!(json["type"], "completionFired");
        assert_eq!(json["sessionId"], "work-1");
        assert_eq!(json["firedAt"], "2026-10-15T09:25:02Z");
    }
}
