//! SchedulerHandle - client interface for the Background Scheduler

use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, oneshot};
use tracing::debug;

use super::messages::{PendingCompletion, SchedulerRequest, SchedulingError};

/// Handle for the foreground controller to register background work
///
/// Cloneable; every call is a message to the scheduler task.
#[derive(Clone)]
pub struct SchedulerHandle {
    tx: mpsc::Sender<SchedulerRequest>,
}

impl SchedulerHandle {
    pub(crate) fn new(tx: mpsc::Sender<SchedulerRequest>) -> Self {
        Self { tx }
    }

    async fn request<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<T>) -> SchedulerRequest,
    ) -> Result<T, SchedulingError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(make(reply_tx))
            .await
            .map_err(|_| SchedulingError::Unavailable)?;
        reply_rx.await.map_err(|_| SchedulingError::Unavailable)
    }

    /// Register the completion task for a session, replacing any prior one
    pub async fn schedule_completion(&self, session_id: &str, target: DateTime<Utc>) -> Result<(), SchedulingError> {
        debug!(%session_id, %target, "schedule_completion: called");
        self.request(|reply| SchedulerRequest::ScheduleCompletion {
            session_id: session_id.to_string(),
            target,
            reply,
        })
        .await?
    }

    /// Remove a session's completion task; no-op if absent
    pub async fn cancel_completion(&self, session_id: &str) -> Result<(), SchedulingError> {
        debug!(%session_id, "cancel_completion: called");
        self.request(|reply| SchedulerRequest::CancelCompletion {
            session_id: session_id.to_string(),
            reply,
        })
        .await
    }

    /// Register the recurring heartbeat
    ///
    /// Returns the interval actually in effect, which is never finer than the
    /// host's minimum.
    pub async fn schedule_heartbeat(&self, interval: Duration) -> Result<Duration, SchedulingError> {
        debug!(interval_ms = interval.as_millis() as u64, "schedule_heartbeat: called");
        self.request(|reply| SchedulerRequest::ScheduleHeartbeat { interval, reply })
            .await?
    }

    /// Cancel the session's completion task and the heartbeat together
    pub async fn cancel_session(&self, session_id: &str) -> Result<(), SchedulingError> {
        debug!(%session_id, "cancel_session: called");
        self.request(|reply| SchedulerRequest::CancelSession {
            session_id: session_id.to_string(),
            reply,
        })
        .await
    }

    /// Remove every pending task
    pub async fn cancel_all(&self) -> Result<(), SchedulingError> {
        debug!("cancel_all: called");
        self.request(|reply| SchedulerRequest::CancelAll { reply }).await
    }

    pub async fn pending_completions(&self) -> Result<Vec<PendingCompletion>, SchedulingError> {
        self.request(|reply| SchedulerRequest::PendingCompletions { reply }).await
    }

    /// Interval of the active heartbeat, if one is registered
    pub async fn heartbeat_interval(&self) -> Result<Option<Duration>, SchedulingError> {
        self.request(|reply| SchedulerRequest::HeartbeatInterval { reply }).await
    }

    pub async fn shutdown(&self) -> Result<(), SchedulingError> {
        debug!("shutdown: called");
        self.tx
            .send(SchedulerRequest::Shutdown)
            .await
            .map_err(|_| SchedulingError::Unavailable)
    }
}
