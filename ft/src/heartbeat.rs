//! Heartbeat Monitor
//!
//! Tracks liveness of the active session through the persisted
//! `crash_heartbeat` record, so a later process can tell whether the previous
//! owner stopped ticking.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use crate::clock::Clock;
use crate::domain::HeartbeatRecord;
use crate::error::TimerResult;
use crate::state::{StateError, StateManager};

/// Liveness tracker for the active session
#[derive(Clone)]
pub struct HeartbeatMonitor {
    state: StateManager,
    clock: Arc<dyn Clock>,
    default_threshold_ms: u64,
}

impl HeartbeatMonitor {
    pub fn new(state: StateManager, clock: Arc<dyn Clock>, default_threshold_ms: u64) -> Self {
        Self {
            state,
            clock,
            default_threshold_ms,
        }
    }

    pub fn default_threshold_ms(&self) -> u64 {
        self.default_threshold_ms
    }

    /// Overwrite the heartbeat with the current time and `elapsed_ms`
    pub async fn tick(&self, session_id: &str, elapsed_ms: u64) -> TimerResult<HeartbeatRecord> {
        self.tick_at(session_id, self.clock.now(), elapsed_ms).await
    }

    /// Overwrite the heartbeat as observed at `at`
    pub(crate) async fn tick_at(
        &self,
        session_id: &str,
        at: DateTime<Utc>,
        elapsed_ms: u64,
    ) -> TimerResult<HeartbeatRecord> {
        debug!(%session_id, %at, elapsed_ms, "tick: called");
        let heartbeat = HeartbeatRecord::new(session_id, at, elapsed_ms);
        self.state.save_heartbeat(&heartbeat).await?;
        Ok(heartbeat)
    }

    /// The stored heartbeat, if it belongs to `session_id`
    ///
    /// An unreadable heartbeat is reported as absent.
    pub async fn last_heartbeat(&self, session_id: &str) -> TimerResult<Option<HeartbeatRecord>> {
        match self.state.load_heartbeat().await {
            Ok(hb) => Ok(hb.filter(|hb| hb.session_id == session_id)),
            Err(StateError::Corrupt { reason, .. }) => {
                warn!(%session_id, %reason, "heartbeat record unreadable");
                Ok(None)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Whether the session's heartbeat is at least `threshold_ms` old
    ///
    /// A session with no heartbeat of its own is stale.
    pub async fn is_stale(&self, session_id: &str, threshold_ms: u64) -> TimerResult<bool> {
        let now = self.clock.now();
        let stale = match self.last_heartbeat(session_id).await? {
            Some(hb) => hb.is_stale_at(now, threshold_ms),
            None => true,
        };
        debug!(%session_id, threshold_ms, stale, "is_stale: checked");
        Ok(stale)
    }

    pub async fn is_stale_default(&self, session_id: &str) -> TimerResult<bool> {
        self.is_stale(session_id, self.default_threshold_ms).await
    }

    /// Remove the heartbeat if it belongs to `session_id`
    pub async fn clear(&self, session_id: &str) -> TimerResult<()> {
        debug!(%session_id, "clear: called");
        self.state.clear_heartbeat(Some(session_id)).await?;
        Ok(())
    }
}
