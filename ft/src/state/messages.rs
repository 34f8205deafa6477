//! State manager messages
//!
//! Commands and responses for the actor pattern.

use chrono::{DateTime, Utc};
use sessionstore::StoreError;
use thiserror::Error;
use tokio::sync::oneshot;

use crate::domain::{HeartbeatRecord, SessionHistory, SessionRecord};
use crate::scheduler::SchedulerMessage;

/// Errors from state operations
#[derive(Debug, Error)]
pub enum StateError {
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Corrupt record under '{key}': {reason}")]
    Corrupt { key: String, reason: String },

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Channel error")]
    ChannelError,
}

impl StateError {
    /// Whether a second attempt could succeed
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Store(_))
    }
}

/// Response from state operations
pub type StateResponse<T> = Result<T, StateError>;

/// Commands sent to the StateManager actor
#[derive(Debug)]
pub enum StateCommand {
    // Active session slot
    LoadActive {
        reply: oneshot::Sender<StateResponse<Option<SessionRecord>>>,
    },
    SaveActive {
        record: SessionRecord,
        reply: oneshot::Sender<StateResponse<()>>,
    },
    /// Remove the active slot (only if it holds `session_id`, when given)
    ClearActive {
        session_id: Option<String>,
        reply: oneshot::Sender<StateResponse<()>>,
    },

    // Heartbeat
    LoadHeartbeat {
        reply: oneshot::Sender<StateResponse<Option<HeartbeatRecord>>>,
    },
    SaveHeartbeat {
        heartbeat: HeartbeatRecord,
        reply: oneshot::Sender<StateResponse<()>>,
    },
    /// Remove the heartbeat (only if it belongs to `session_id`, when given)
    ClearHeartbeat {
        session_id: Option<String>,
        reply: oneshot::Sender<StateResponse<bool>>,
    },

    // History
    Archive {
        record: SessionRecord,
        now: DateTime<Utc>,
        reply: oneshot::Sender<StateResponse<()>>,
    },
    LoadHistory {
        now: DateTime<Utc>,
        reply: oneshot::Sender<StateResponse<SessionHistory>>,
    },

    // Scheduler outbox
    AppendOutbox {
        message: SchedulerMessage,
        reply: oneshot::Sender<StateResponse<()>>,
    },
    DrainOutbox {
        reply: oneshot::Sender<StateResponse<Vec<SchedulerMessage>>>,
    },

    // Degraded-mode flag
    SetDegraded {
        degraded: bool,
        reply: oneshot::Sender<StateResponse<()>>,
    },
    GetDegraded {
        reply: oneshot::Sender<StateResponse<bool>>,
    },

    // Shutdown
    Shutdown,
}
