//! Message types for the timer engine

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::oneshot;

use crate::domain::{SessionHistory, SessionKind, SessionRecord, TimerState};
use crate::error::TimerResult;

/// Result of handing a completion signal to the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalOutcome {
    /// The session completed
    Completed,
    /// Signal was off target; the session was reconciled against the clock
    /// and is still running
    Deferred,
    /// No running session matched
    Ignored,
}

/// Immutable view of the engine at a point in time
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSnapshot {
    pub state: TimerState,
    pub session: Option<SessionRecord>,
    pub elapsed_ms: u64,
    pub remaining_ms: u64,
    pub target_completion_time: Option<DateTime<Utc>>,
    /// Background scheduling unavailable
    pub degraded: bool,
    /// Some state is held only in memory
    pub unpersisted: bool,
    pub taken_at: DateTime<Utc>,
}

/// Commands sent to the engine actor
#[derive(Debug)]
pub enum EngineCommand {
    Start {
        kind: SessionKind,
        planned_duration_ms: u64,
        reply: oneshot::Sender<TimerResult<SessionSnapshot>>,
    },
    Pause {
        reply: oneshot::Sender<TimerResult<SessionSnapshot>>,
    },
    Resume {
        reply: oneshot::Sender<TimerResult<SessionSnapshot>>,
    },
    Cancel {
        reply: oneshot::Sender<TimerResult<SessionRecord>>,
    },
    RecordInterruption {
        reply: oneshot::Sender<TimerResult<SessionSnapshot>>,
    },
    CompletionSignal {
        session_id: String,
        fired_at: DateTime<Utc>,
        reply: oneshot::Sender<TimerResult<SignalOutcome>>,
    },
    Snapshot {
        reply: oneshot::Sender<SessionSnapshot>,
    },
    History {
        reply: oneshot::Sender<TimerResult<SessionHistory>>,
    },
    Shutdown {
        reply: oneshot::Sender<()>,
    },
}
