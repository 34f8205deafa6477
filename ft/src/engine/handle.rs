//! EngineHandle - client interface for the timer engine

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, oneshot};
use tracing::debug;

use crate::config::ConfigProvider;
use crate::domain::{SessionHistory, SessionKind, SessionRecord};
use crate::error::{TimerError, TimerResult};

use super::messages::{EngineCommand, SessionSnapshot, SignalOutcome};

/// Handle to the foreground controller
///
/// Cloneable. Every call is queued behind earlier commands and scheduler
/// messages, and returns once the transition has been written (or has
/// failed explicitly).
#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<EngineCommand>,
    config: Arc<dyn ConfigProvider>,
}

impl EngineHandle {
    pub(crate) fn new(tx: mpsc::Sender<EngineCommand>, config: Arc<dyn ConfigProvider>) -> Self {
        Self { tx, config }
    }

    async fn request<T>(&self, make: impl FnOnce(oneshot::Sender<T>) -> EngineCommand) -> TimerResult<T> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(make(reply_tx))
            .await
            .map_err(|_| TimerError::ChannelClosed)?;
        reply_rx.await.map_err(|_| TimerError::ChannelClosed)
    }

    /// Start a session of `kind` lasting `planned_duration_ms`
    pub async fn start(&self, kind: SessionKind, planned_duration_ms: u64) -> TimerResult<SessionSnapshot> {
        debug!(%kind, planned_duration_ms, "start: called");
        self.request(|reply| EngineCommand::Start {
            kind,
            planned_duration_ms,
            reply,
        })
        .await?
    }

    /// Start a session with the configured duration for its kind
    pub async fn start_default(&self, kind: SessionKind) -> TimerResult<SessionSnapshot> {
        debug!(%kind, "start_default: called");
        self.start(kind, self.config.planned_duration(kind)).await
    }

    pub async fn pause(&self) -> TimerResult<SessionSnapshot> {
        debug!("pause: called");
        self.request(|reply| EngineCommand::Pause { reply }).await?
    }

    pub async fn resume(&self) -> TimerResult<SessionSnapshot> {
        debug!("resume: called");
        self.request(|reply| EngineCommand::Resume { reply }).await?
    }

    /// Cancel the active session, returning the archived record
    pub async fn cancel(&self) -> TimerResult<SessionRecord> {
        debug!("cancel: called");
        self.request(|reply| EngineCommand::Cancel { reply }).await?
    }

    pub async fn record_interruption(&self) -> TimerResult<SessionSnapshot> {
        debug!("record_interruption: called");
        self.request(|reply| EngineCommand::RecordInterruption { reply })
            .await?
    }

    /// Deliver a completion signal as if the scheduler had fired it
    pub async fn on_background_completion_signal(
        &self,
        session_id: &str,
        fired_at: DateTime<Utc>,
    ) -> TimerResult<SignalOutcome> {
        debug!(%session_id, %fired_at, "on_background_completion_signal: called");
        self.request(|reply| EngineCommand::CompletionSignal {
            session_id: session_id.to_string(),
            fired_at,
            reply,
        })
        .await?
    }

    pub async fn snapshot(&self) -> TimerResult<SessionSnapshot> {
        self.request(|reply| EngineCommand::Snapshot { reply }).await
    }

    /// Archived sessions, newest first
    pub async fn history(&self) -> TimerResult<SessionHistory> {
        debug!("history: called");
        self.request(|reply| EngineCommand::History { reply }).await?
    }

    /// Stop the engine; the active session is left as persisted
    pub async fn shutdown(&self) -> TimerResult<()> {
        debug!("shutdown: called");
        self.request(|reply| EngineCommand::Shutdown { reply }).await
    }
}
