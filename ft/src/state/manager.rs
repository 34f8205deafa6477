//! StateManager - actor that owns the session store
//!
//! Processes commands via channels so every durable read and write of timer
//! state is serialized through one task.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use rand::Rng;
use serde::Serialize;
use serde::de::DeserializeOwned;
use sessionstore::KvStore;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::config::TimerConfig;
use crate::domain::{HeartbeatRecord, SessionHistory, SessionRecord};
use crate::scheduler::SchedulerMessage;

use super::messages::{StateCommand, StateError, StateResponse};

/// Keys of the persisted records
pub mod keys {
    pub const ACTIVE_SESSION: &str = "active_session";
    pub const CRASH_HEARTBEAT: &str = "crash_heartbeat";
    pub const SESSION_HISTORY: &str = "session_history";
    pub const SCHEDULER_OUTBOX: &str = "scheduler_outbox";
    pub const SCHEDULER_DEGRADED: &str = "scheduler_degraded";
}

/// Retention and retry settings for the persistence actor
#[derive(Debug, Clone)]
pub struct StateConfig {
    pub history_limit: usize,
    pub history_max_age_days: u32,
    /// Base delay before the single retry of a failed write
    pub retry_backoff: Duration,
}

impl From<&TimerConfig> for StateConfig {
    fn from(config: &TimerConfig) -> Self {
        Self {
            history_limit: config.history_limit(),
            history_max_age_days: config.history_max_age_days(),
            retry_backoff: config.persistence_retry_backoff(),
        }
    }
}

impl Default for StateConfig {
    fn default() -> Self {
        Self::from(&TimerConfig::default())
    }
}

/// Handle to send commands to the StateManager
#[derive(Clone)]
pub struct StateManager {
    tx: mpsc::Sender<StateCommand>,
    retry_backoff: Duration,
}

impl StateManager {
    /// Spawn a new StateManager actor
    pub fn spawn(store: Arc<dyn KvStore>, config: StateConfig) -> Self {
        debug!(?config, "spawn: called");
        let (tx, rx) = mpsc::channel(256);
        let retry_backoff = config.retry_backoff;

        tokio::spawn(actor_loop(StateStore { store, config }, rx));

        info!("StateManager spawned");
        Self { tx, retry_backoff }
    }

    async fn request<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<StateResponse<T>>) -> StateCommand,
    ) -> StateResponse<T> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(make(reply_tx))
            .await
            .map_err(|_| StateError::ChannelError)?;
        reply_rx.await.map_err(|_| StateError::ChannelError)?
    }

    /// Send a write, retrying once after a jittered backoff if the store failed
    async fn write<T>(
        &self,
        op: &'static str,
        make: impl Fn(oneshot::Sender<StateResponse<T>>) -> StateCommand,
    ) -> StateResponse<T> {
        match self.request(&make).await {
            Err(e) if e.is_transient() => {
                let delay = self.retry_delay();
                warn!(op, error = %e, delay_ms = delay.as_millis() as u64, "write failed, retrying once");
                tokio::time::sleep(delay).await;
                let result = self.request(&make).await;
                if let Err(e) = &result {
                    warn!(op, error = %e, "write failed after retry");
                }
                result
            }
            result => result,
        }
    }

    fn retry_delay(&self) -> Duration {
        let base = self.retry_backoff.as_millis() as u64;
        let jitter = rand::rng().random_range(0..=base / 2);
        Duration::from_millis(base + jitter)
    }

    // === Active session ===

    /// Load the active session record
    ///
    /// Returns `StateError::Corrupt` if the stored bytes do not parse.
    pub async fn load_active(&self) -> StateResponse<Option<SessionRecord>> {
        debug!("load_active: called");
        self.request(|reply| StateCommand::LoadActive { reply }).await
    }

    pub async fn save_active(&self, record: &SessionRecord) -> StateResponse<()> {
        debug!(session_id = %record.id, status = %record.status, "save_active: called");
        self.write("save_active", |reply| StateCommand::SaveActive {
            record: record.clone(),
            reply,
        })
        .await
    }

    /// Clear the active slot; with `Some(id)` only if it holds that session
    pub async fn clear_active(&self, session_id: Option<&str>) -> StateResponse<()> {
        debug!(?session_id, "clear_active: called");
        self.write("clear_active", |reply| StateCommand::ClearActive {
            session_id: session_id.map(str::to_string),
            reply,
        })
        .await
    }

    // === Heartbeat ===

    pub async fn load_heartbeat(&self) -> StateResponse<Option<HeartbeatRecord>> {
        debug!("load_heartbeat: called");
        self.request(|reply| StateCommand::LoadHeartbeat { reply }).await
    }

    pub async fn save_heartbeat(&self, heartbeat: &HeartbeatRecord) -> StateResponse<()> {
        debug!(session_id = %heartbeat.session_id, elapsed_ms = heartbeat.elapsed_ms, "save_heartbeat: called");
        self.write("save_heartbeat", |reply| StateCommand::SaveHeartbeat {
            heartbeat: heartbeat.clone(),
            reply,
        })
        .await
    }

    /// Remove the heartbeat; with `Some(id)` only if it belongs to that session
    ///
    /// Returns whether a record was removed.
    pub async fn clear_heartbeat(&self, session_id: Option<&str>) -> StateResponse<bool> {
        debug!(?session_id, "clear_heartbeat: called");
        self.write("clear_heartbeat", |reply| StateCommand::ClearHeartbeat {
            session_id: session_id.map(str::to_string),
            reply,
        })
        .await
    }

    // === History ===

    /// Move a terminal record into history
    ///
    /// The terminal record is first written to the active slot (if the slot is
    /// empty or holds the same session), then inserted into history, then the
    /// slot is cleared. A crash part way through leaves a terminal record in
    /// the slot, which recovery finishes archiving. Archiving the same record
    /// twice leaves one history entry.
    pub async fn archive(&self, record: &SessionRecord, now: DateTime<Utc>) -> StateResponse<()> {
        debug!(session_id = %record.id, status = %record.status, "archive: called");
        self.write("archive", |reply| StateCommand::Archive {
            record: record.clone(),
            now,
            reply,
        })
        .await
    }

    /// Load history, purging entries outside the count and age bounds
    pub async fn load_history(&self, now: DateTime<Utc>) -> StateResponse<SessionHistory> {
        debug!(%now, "load_history: called");
        self.request(|reply| StateCommand::LoadHistory { now, reply }).await
    }

    // === Scheduler outbox ===

    /// Durably record a scheduler message the foreground could not receive
    pub async fn append_outbox(&self, message: SchedulerMessage) -> StateResponse<()> {
        debug!(?message, "append_outbox: called");
        self.write("append_outbox", |reply| StateCommand::AppendOutbox {
            message: message.clone(),
            reply,
        })
        .await
    }

    /// Take every recorded message, oldest first, leaving the outbox empty
    pub async fn drain_outbox(&self) -> StateResponse<Vec<SchedulerMessage>> {
        debug!("drain_outbox: called");
        self.request(|reply| StateCommand::DrainOutbox { reply }).await
    }

    // === Degraded mode ===

    pub async fn set_degraded(&self, degraded: bool) -> StateResponse<()> {
        debug!(degraded, "set_degraded: called");
        self.write("set_degraded", |reply| StateCommand::SetDegraded { degraded, reply })
            .await
    }

    pub async fn is_degraded(&self) -> StateResponse<bool> {
        debug!("is_degraded: called");
        self.request(|reply| StateCommand::GetDegraded { reply }).await
    }

    /// Shutdown the StateManager
    pub async fn shutdown(&self) -> StateResponse<()> {
        debug!("shutdown: called");
        self.tx
            .send(StateCommand::Shutdown)
            .await
            .map_err(|_| StateError::ChannelError)
    }
}

/// Typed access to the byte-level store, owned by the actor
struct StateStore {
    store: Arc<dyn KvStore>,
    config: StateConfig,
}

impl StateStore {
    fn read_json<T: DeserializeOwned>(&self, key: &str) -> StateResponse<Option<T>> {
        let Some(bytes) = self.store.get(key)? else {
            return Ok(None);
        };
        serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|e| StateError::Corrupt {
                key: key.to_string(),
                reason: e.to_string(),
            })
    }

    fn write_json<T: Serialize>(&self, key: &str, value: &T) -> StateResponse<()> {
        let bytes = serde_json::to_vec(value).map_err(|e| StateError::Serialization(e.to_string()))?;
        self.store.put(key, &bytes)?;
        Ok(())
    }

    /// Read a record that may be discarded when unreadable
    fn read_or_default<T: DeserializeOwned + Default>(&self, key: &str) -> StateResponse<T> {
        match self.read_json(key) {
            Ok(value) => Ok(value.unwrap_or_default()),
            Err(StateError::Corrupt { key, reason }) => {
                warn!(%key, %reason, "discarding unreadable record");
                Ok(T::default())
            }
            Err(e) => Err(e),
        }
    }

    fn clear_active(&self, session_id: Option<&str>) -> StateResponse<()> {
        if let Some(id) = session_id {
            match self.read_json::<SessionRecord>(keys::ACTIVE_SESSION) {
                Ok(Some(current)) if current.id != id => {
                    debug!(%id, current = %current.id, "clear_active: slot holds another session");
                    return Ok(());
                }
                Ok(_) | Err(StateError::Corrupt { .. }) => {}
                Err(e) => return Err(e),
            }
        }
        self.store.delete(keys::ACTIVE_SESSION)?;
        Ok(())
    }

    fn clear_heartbeat(&self, session_id: Option<&str>) -> StateResponse<bool> {
        let existing = match self.read_json::<HeartbeatRecord>(keys::CRASH_HEARTBEAT) {
            Ok(existing) => existing,
            Err(StateError::Corrupt { .. }) => {
                self.store.delete(keys::CRASH_HEARTBEAT)?;
                return Ok(true);
            }
            Err(e) => return Err(e),
        };
        match (existing, session_id) {
            (None, _) => Ok(false),
            (Some(hb), Some(id)) if hb.session_id != id => Ok(false),
            (Some(_), _) => {
                self.store.delete(keys::CRASH_HEARTBEAT)?;
                Ok(true)
            }
        }
    }

    fn archive(&self, record: &SessionRecord, now: DateTime<Utc>) -> StateResponse<()> {
        let owns_slot = match self.read_json::<SessionRecord>(keys::ACTIVE_SESSION) {
            Ok(Some(current)) => current.id == record.id,
            Ok(None) | Err(StateError::Corrupt { .. }) => true,
            Err(e) => return Err(e),
        };
        if owns_slot {
            self.write_json(keys::ACTIVE_SESSION, record)?;
        }

        let mut history: SessionHistory = self.read_or_default(keys::SESSION_HISTORY)?;
        history.purge(now, self.config.history_max_age_days, self.config.history_limit);
        if history.insert(record.clone(), self.config.history_limit) {
            self.write_json(keys::SESSION_HISTORY, &history)?;
        } else {
            debug!(session_id = %record.id, "archive: already in history");
        }

        if owns_slot {
            self.store.delete(keys::ACTIVE_SESSION)?;
        }
        Ok(())
    }

    fn load_history(&self, now: DateTime<Utc>) -> StateResponse<SessionHistory> {
        let mut history: SessionHistory = self.read_or_default(keys::SESSION_HISTORY)?;
        let purged = history.purge(now, self.config.history_max_age_days, self.config.history_limit);
        if purged > 0 {
            debug!(purged, "load_history: purged expired entries");
            // Lazy write-back; a failure here only delays the purge
            if let Err(e) = self.write_json(keys::SESSION_HISTORY, &history) {
                warn!(error = %e, "load_history: failed to write back purged history");
            }
        }
        Ok(history)
    }

    fn append_outbox(&self, message: SchedulerMessage) -> StateResponse<()> {
        let mut outbox: Vec<SchedulerMessage> = self.read_or_default(keys::SCHEDULER_OUTBOX)?;
        outbox.push(message);
        self.write_json(keys::SCHEDULER_OUTBOX, &outbox)
    }

    fn drain_outbox(&self) -> StateResponse<Vec<SchedulerMessage>> {
        let outbox: Vec<SchedulerMessage> = self.read_or_default(keys::SCHEDULER_OUTBOX)?;
        self.store.delete(keys::SCHEDULER_OUTBOX)?;
        Ok(outbox)
    }
}

/// The actor loop that owns the store and processes commands
async fn actor_loop(store: StateStore, mut rx: mpsc::Receiver<StateCommand>) {
    debug!("StateManager actor started");

    while let Some(cmd) = rx.recv().await {
        match cmd {
            StateCommand::LoadActive { reply } => {
                debug!("actor_loop: LoadActive command");
                let _ = reply.send(store.read_json(keys::ACTIVE_SESSION));
            }

            StateCommand::SaveActive { record, reply } => {
                debug!(session_id = %record.id, "actor_loop: SaveActive command");
                let _ = reply.send(store.write_json(keys::ACTIVE_SESSION, &record));
            }

            StateCommand::ClearActive { session_id, reply } => {
                debug!(?session_id, "actor_loop: ClearActive command");
                let _ = reply.send(store.clear_active(session_id.as_deref()));
            }

            StateCommand::LoadHeartbeat { reply } => {
                debug!("actor_loop: LoadHeartbeat command");
                let _ = reply.send(store.read_json(keys::CRASH_HEARTBEAT));
            }

            StateCommand::SaveHeartbeat { heartbeat, reply } => {
                debug!(session_id = %heartbeat.session_id, "actor_loop: SaveHeartbeat command");
                let _ = reply.send(store.write_json(keys::CRASH_HEARTBEAT, &heartbeat));
            }

            StateCommand::ClearHeartbeat { session_id, reply } => {
                debug!(?session_id, "actor_loop: ClearHeartbeat command");
                let _ = reply.send(store.clear_heartbeat(session_id.as_deref()));
            }

            StateCommand::Archive { record, now, reply } => {
                debug!(session_id = %record.id, "actor_loop: Archive command");
                let _ = reply.send(store.archive(&record, now));
            }

            StateCommand::LoadHistory { now, reply } => {
                debug!("actor_loop: LoadHistory command");
                let _ = reply.send(store.load_history(now));
            }

            StateCommand::AppendOutbox { message, reply } => {
                debug!("actor_loop: AppendOutbox command");
                let _ = reply.send(store.append_outbox(message));
            }

            StateCommand::DrainOutbox { reply } => {
                debug!("actor_loop: DrainOutbox command");
                let _ = reply.send(store.drain_outbox());
            }

            StateCommand::SetDegraded { degraded, reply } => {
                debug!(degraded, "actor_loop: SetDegraded command");
                let result = if degraded {
                    store.write_json(keys::SCHEDULER_DEGRADED, &true)
                } else {
                    store.store.delete(keys::SCHEDULER_DEGRADED).map_err(StateError::from)
                };
                let _ = reply.send(result);
            }

            StateCommand::GetDegraded { reply } => {
                debug!("actor_loop: GetDegraded command");
                let _ = reply.send(store.read_or_default(keys::SCHEDULER_DEGRADED));
            }

            StateCommand::Shutdown => {
                debug!("actor_loop: Shutdown command");
                info!("StateManager shutting down");
                break;
            }
        }
    }

    debug!("StateManager actor stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::add_ms;
    use crate::domain::SessionKind;
    use chrono::TimeZone;
    use sessionstore::{FileStore, MemoryStore};
    use tempfile::tempdir;

    const DAY_MS: u64 = 86_400_000;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 10, 15, 9, 0, 0).unwrap()
    }

    fn test_config() -> StateConfig {
        StateConfig {
            retry_backoff: Duration::from_millis(1),
            ..StateConfig::default()
        }
    }

    fn spawn_memory() -> (Arc<MemoryStore>, StateManager) {
        let store = Arc::new(MemoryStore::new());
        let manager = StateManager::spawn(store.clone(), test_config());
        (store, manager)
    }

    fn cancelled(id: &str, at: DateTime<Utc>) -> SessionRecord {
        let mut record = SessionRecord::with_id(id, SessionKind::Work, 1_500_000, at);
        record.mark_cancelled(at);
        record
    }

    #[tokio::test]
    async fn test_active_session_roundtrip_on_disk() {
        let temp = tempdir().unwrap();
        let store = Arc::new(FileStore::open(temp.path()).unwrap());
        let manager = StateManager::spawn(store, test_config());

        let record = SessionRecord::with_id("work-1", SessionKind::Work, 1_500_000, t0());
        manager.save_active(&record).await.unwrap();

        let loaded = manager.load_active().await.unwrap();
        assert_eq!(loaded, Some(record));

        manager.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_clear_active_only_for_matching_session() {
        let (_store, manager) = spawn_memory();
        let record = SessionRecord::with_id("work-1", SessionKind::Work, 1_500_000, t0());
        manager.save_active(&record).await.unwrap();

        manager.clear_active(Some("work-other")).await.unwrap();
        assert!(manager.load_active().await.unwrap().is_some());

        manager.clear_active(Some("work-1")).await.unwrap();
        assert!(manager.load_active().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_archive_moves_record_into_history() {
        let (store, manager) = spawn_memory();
        let running = SessionRecord::with_id("work-1", SessionKind::Work, 1_500_000, t0());
        manager.save_active(&running).await.unwrap();

        let record = cancelled("work-1", add_ms(t0(), 5));
        manager.archive(&record, add_ms(t0(), 5)).await.unwrap();
        manager.archive(&record, add_ms(t0(), 6)).await.unwrap();

        assert!(store.get(keys::ACTIVE_SESSION).unwrap().is_none());
        let history = manager.load_history(add_ms(t0(), 10)).await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history.entries()[0], record);
    }

    #[tokio::test]
    async fn test_archive_leaves_other_active_session_alone() {
        let (_store, manager) = spawn_memory();
        let current = SessionRecord::with_id("work-new", SessionKind::Work, 1_500_000, t0());
        manager.save_active(&current).await.unwrap();

        manager.archive(&cancelled("work-old", t0()), t0()).await.unwrap();

        assert_eq!(manager.load_active().await.unwrap(), Some(current));
        assert!(manager.load_history(t0()).await.unwrap().contains("work-old"));
    }

    #[tokio::test]
    async fn test_load_history_purges_and_writes_back() {
        let (store, manager) = spawn_memory();
        manager.archive(&cancelled("work-old", t0()), t0()).await.unwrap();
        let later = add_ms(t0(), 20 * DAY_MS);
        manager.archive(&cancelled("work-new", later), later).await.unwrap();

        let history = manager.load_history(add_ms(t0(), 31 * DAY_MS)).await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history.entries()[0].id, "work-new");

        let raw = store.get(keys::SESSION_HISTORY).unwrap().unwrap();
        let persisted: SessionHistory = serde_json::from_slice(&raw).unwrap();
        assert_eq!(persisted.len(), 1);
    }

    #[tokio::test]
    async fn test_corrupt_active_session_reported() {
        let (store, manager) = spawn_memory();
        store.put(keys::ACTIVE_SESSION, b"{\"id\": \"work-1\", \"kin").unwrap();

        let err = manager.load_active().await.unwrap_err();
        assert!(matches!(err, StateError::Corrupt { ref key, .. } if key == keys::ACTIVE_SESSION));
    }

    #[tokio::test]
    async fn test_corrupt_history_treated_as_empty() {
        let (store, manager) = spawn_memory();
        store.put(keys::SESSION_HISTORY, b"not json").unwrap();

        assert!(manager.load_history(t0()).await.unwrap().is_empty());

        manager.archive(&cancelled("work-1", t0()), t0()).await.unwrap();
        assert_eq!(manager.load_history(t0()).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_single_write_failure_is_retried() {
        let (store, manager) = spawn_memory();
        let record = SessionRecord::with_id("work-1", SessionKind::Work, 1_500_000, t0());

        store.fail_next_writes(1);
        manager.save_active(&record).await.unwrap();
        assert_eq!(manager.load_active().await.unwrap(), Some(record));
    }

    #[tokio::test]
    async fn test_repeated_write_failure_surfaces() {
        let (store, manager) = spawn_memory();
        let record = SessionRecord::with_id("work-1", SessionKind::Work, 1_500_000, t0());

        store.fail_next_writes(2);
        let err = manager.save_active(&record).await.unwrap_err();
        assert!(matches!(err, StateError::Store(_)));
        assert!(manager.load_active().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_clear_heartbeat_checks_owner() {
        let (_store, manager) = spawn_memory();
        manager
            .save_heartbeat(&HeartbeatRecord::new("work-1", t0(), 1_000))
            .await
            .unwrap();

        assert!(!manager.clear_heartbeat(Some("work-2")).await.unwrap());
        assert!(manager.load_heartbeat().await.unwrap().is_some());
        assert!(manager.clear_heartbeat(Some("work-1")).await.unwrap());
        assert!(manager.load_heartbeat().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_outbox_drain_empties() {
        let (_store, manager) = spawn_memory();
        manager
            .append_outbox(SchedulerMessage::Heartbeat { timestamp: t0() })
            .await
            .unwrap();
        manager
            .append_outbox(SchedulerMessage::CompletionFired {
                session_id: "work-1".to_string(),
                fired_at: add_ms(t0(), 1),
            })
            .await
            .unwrap();

        let drained = manager.drain_outbox().await.unwrap();
        assert_eq!(drained.len(), 2);
        assert!(matches!(drained[0], SchedulerMessage::Heartbeat { .. }));
        assert!(manager.drain_outbox().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_degraded_flag() {
        let (_store, manager) = spawn_memory();
        assert!(!manager.is_degraded().await.unwrap());
        manager.set_degraded(true).await.unwrap();
        assert!(manager.is_degraded().await.unwrap());
        manager.set_degraded(false).await.unwrap();
        assert!(!manager.is_degraded().await.unwrap());
    }
}
