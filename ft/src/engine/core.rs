//! Foreground controller task implementation

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::clock::{Clock, ms_between};
use crate::config::ConfigProvider;
use crate::domain::{SessionHistory, SessionKind, SessionRecord, TimerState};
use crate::error::{TimerError, TimerResult};
use crate::heartbeat::HeartbeatMonitor;
use crate::notify::{EventKind, Notice, NotificationSink};
use crate::scheduler::{SchedulerHandle, SchedulerMessage, SchedulingError};
use crate::state::StateManager;

use super::handle::EngineHandle;
use super::machine::{self, SignalVerdict};
use super::messages::{EngineCommand, SessionSnapshot, SignalOutcome};

/// Collaborators injected into the engine
#[derive(Clone)]
pub struct EngineDeps {
    pub state: StateManager,
    pub scheduler: SchedulerHandle,
    pub heartbeat: HeartbeatMonitor,
    pub clock: Arc<dyn Clock>,
    pub config: Arc<dyn ConfigProvider>,
    pub sink: Arc<dyn NotificationSink>,
}

/// The timer engine actor
///
/// Owns the active session. User commands, scheduler messages and the
/// fallback ticker are all handled by this one task, so transitions are
/// applied strictly one at a time and in arrival order.
pub struct Engine {
    deps: EngineDeps,
    rx: mpsc::Receiver<EngineCommand>,
    scheduler_rx: mpsc::UnboundedReceiver<SchedulerMessage>,
    active: Option<SessionRecord>,
    /// The active record changed in memory but the write failed
    active_dirty: bool,
    /// Terminal records not yet archived
    pending_archive: Vec<SessionRecord>,
    degraded: bool,
}

impl Engine {
    /// Spawn the engine task
    ///
    /// `restored` is the non-terminal session handed over by recovery and
    /// `unpersisted` says whether recovery failed to write it back.
    /// `degraded` is the persisted degraded-mode flag.
    pub fn spawn(
        deps: EngineDeps,
        scheduler_rx: mpsc::UnboundedReceiver<SchedulerMessage>,
        restored: Option<SessionRecord>,
        unpersisted: bool,
        degraded: bool,
    ) -> EngineHandle {
        let (tx, rx) = mpsc::channel(64);
        let config = deps.config.clone();

        let engine = Self {
            deps,
            rx,
            scheduler_rx,
            active: None,
            active_dirty: unpersisted && restored.is_some(),
            pending_archive: Vec::new(),
            degraded,
        };
        tokio::spawn(engine.run(restored));

        info!("Engine spawned");
        EngineHandle::new(tx, config)
    }

    async fn run(mut self, restored: Option<SessionRecord>) {
        debug!("Engine task started");
        self.adopt(restored).await;

        let period = self.deps.config.heartbeat_interval().max(Duration::from_millis(1));
        let mut fallback = tokio::time::interval_at(Instant::now() + period, period);
        fallback.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut scheduler_open = true;

        loop {
            // The in-process tick keeps liveness fresh whatever cadence the
            // host grants the background heartbeat
            let ticking = self.active.is_some() || self.unpersisted();
            let deadline = self.foreground_deadline();

            tokio::select! {
                cmd = self.rx.recv() => match cmd {
                    Some(EngineCommand::Shutdown { reply }) => {
                        info!("Engine shutting down");
                        let _ = reply.send(());
                        break;
                    }
                    Some(cmd) => self.handle_command(cmd).await,
                    None => break,
                },

                msg = self.scheduler_rx.recv(), if scheduler_open => match msg {
                    Some(msg) => self.on_scheduler_message(msg).await,
                    None => {
                        warn!("scheduler channel closed");
                        scheduler_open = false;
                    }
                },

                _ = fallback.tick(), if ticking => {
                    self.on_tick().await;
                }

                _ = sleep_until(deadline), if deadline.is_some() => {
                    self.on_tick().await;
                }
            }
        }

        debug!("Engine task stopped");
    }

    async fn handle_command(&mut self, cmd: EngineCommand) {
        match cmd {
            EngineCommand::Start {
                kind,
                planned_duration_ms,
                reply,
            } => {
                let _ = reply.send(self.start(kind, planned_duration_ms).await);
            }
            EngineCommand::Pause { reply } => {
                let _ = reply.send(self.pause().await);
            }
            EngineCommand::Resume { reply } => {
                let _ = reply.send(self.resume().await);
            }
            EngineCommand::Cancel { reply } => {
                let _ = reply.send(self.cancel().await);
            }
            EngineCommand::RecordInterruption { reply } => {
                let _ = reply.send(self.record_interruption().await);
            }
            EngineCommand::CompletionSignal {
                session_id,
                fired_at,
                reply,
            } => {
                let _ = reply.send(self.on_completion_signal(&session_id, fired_at).await);
            }
            EngineCommand::Snapshot { reply } => {
                let _ = reply.send(self.snapshot(self.deps.clock.now()));
            }
            EngineCommand::History { reply } => {
                let result = self.history().await;
                let _ = reply.send(result);
            }
            EngineCommand::Shutdown { reply } => {
                let _ = reply.send(());
            }
        }
    }

    // === Transitions ===

    async fn start(&mut self, kind: SessionKind, planned_duration_ms: u64) -> TimerResult<SessionSnapshot> {
        debug!(%kind, planned_duration_ms, "start: called");
        self.flush_pending().await;
        let now = self.deps.clock.now();
        let record = machine::begin(self.active.as_ref(), kind, planned_duration_ms, now)?;
        info!(session_id = %record.id, %kind, planned_duration_ms, "session started");

        self.active = Some(record.clone());
        let persisted = self.persist_active().await;
        self.tick_heartbeat(&record.id, 0).await;
        self.register_running(&record).await;
        self.deps.sink.notify(&record.id, EventKind::Started);

        persisted.map(|_| self.snapshot(now))
    }

    async fn pause(&mut self) -> TimerResult<SessionSnapshot> {
        debug!("pause: called");
        self.flush_pending().await;
        let now = self.deps.clock.now();
        if self.settle_overdue(now).await?.is_some() {
            return Ok(self.snapshot(now));
        }
        let record = machine::pause(self.active.as_ref(), now)?;
        info!(session_id = %record.id, elapsed_ms = record.accumulated_elapsed_ms, "session paused");

        self.active = Some(record.clone());
        let persisted = self.persist_active().await;
        self.tick_heartbeat(&record.id, record.accumulated_elapsed_ms).await;
        self.register_paused(&record).await;

        persisted.map(|_| self.snapshot(now))
    }

    async fn resume(&mut self) -> TimerResult<SessionSnapshot> {
        debug!("resume: called");
        self.flush_pending().await;
        let now = self.deps.clock.now();
        let record = machine::resume(self.active.as_ref(), now)?;
        info!(session_id = %record.id, target = ?record.target_completion_time, "session resumed");

        self.active = Some(record.clone());
        let persisted = self.persist_active().await;
        self.tick_heartbeat(&record.id, record.accumulated_elapsed_ms).await;
        self.register_running(&record).await;

        persisted.map(|_| self.snapshot(now))
    }

    async fn cancel(&mut self) -> TimerResult<SessionRecord> {
        debug!("cancel: called");
        self.flush_pending().await;
        let now = self.deps.clock.now();
        if let Some(completed) = self.settle_overdue(now).await? {
            return Ok(completed);
        }
        let record = machine::cancel(self.active.as_ref(), now)?;

        // Both background registrations go in one step; on failure the
        // session stays as it was
        self.deps.scheduler.cancel_session(&record.id).await?;

        info!(session_id = %record.id, elapsed_ms = record.accumulated_elapsed_ms, "session cancelled");
        self.finish(&record, now).await?;
        Ok(record)
    }

    async fn record_interruption(&mut self) -> TimerResult<SessionSnapshot> {
        debug!("record_interruption: called");
        self.flush_pending().await;
        let now = self.deps.clock.now();
        if self.settle_overdue(now).await?.is_some() {
            return Ok(self.snapshot(now));
        }
        let record = machine::record_interruption(self.active.as_ref())?;
        info!(session_id = %record.id, interruptions = record.interruptions, "interruption recorded");

        self.active = Some(record);
        let persisted = self.persist_active().await;
        persisted.map(|_| self.snapshot(now))
    }

    async fn on_completion_signal(&mut self, session_id: &str, fired_at: DateTime<Utc>) -> TimerResult<SignalOutcome> {
        debug!(%session_id, %fired_at, "on_completion_signal: called");
        let tolerance_ms = self.deps.config.completion_tolerance().as_millis() as u64;

        match machine::judge_completion_signal(self.active.as_ref(), session_id, fired_at, tolerance_ms) {
            SignalVerdict::Ignore => {
                debug!(%session_id, "on_completion_signal: no running session matches, ignoring");
                Ok(SignalOutcome::Ignored)
            }
            SignalVerdict::Accept => {
                let elapsed = self.active.as_ref().map(|r| r.elapsed_at(fired_at)).unwrap_or_default();
                self.complete(fired_at, elapsed).await?;
                Ok(SignalOutcome::Completed)
            }
            SignalVerdict::Stale => {
                warn!(%session_id, %fired_at, "completion signal outside tolerance, reconciling");
                self.reconcile().await
            }
        }
    }

    /// Settle a running session against the clock instead of trusting a signal
    async fn reconcile(&mut self) -> TimerResult<SignalOutcome> {
        let now = self.deps.clock.now();
        let Some(record) = self.active.clone() else {
            return Ok(SignalOutcome::Ignored);
        };

        if record.elapsed_at(now) >= record.planned_duration_ms {
            self.complete_overdue(now).await?;
            return Ok(SignalOutcome::Completed);
        }

        if let Some(target) = record.target_completion_time {
            debug!(session_id = %record.id, %target, "reconcile: not yet due, re-registering completion");
            if let Err(e) = self.deps.scheduler.schedule_completion(&record.id, target).await {
                self.enter_degraded(&record.id, e.to_string()).await;
            }
        }
        Ok(SignalOutcome::Deferred)
    }

    async fn complete(&mut self, end: DateTime<Utc>, elapsed_ms: u64) -> TimerResult<SessionRecord> {
        let record = machine::complete(self.active.as_ref(), end, elapsed_ms)?;
        info!(session_id = %record.id, elapsed_ms, "session completed");

        if let Err(e) = self.deps.scheduler.cancel_session(&record.id).await {
            warn!(session_id = %record.id, error = %e, "failed to cancel background tasks on completion");
        }
        let archived = self.finish(&record, self.deps.clock.now()).await;
        self.deps.sink.notify(&record.id, EventKind::Completed);
        archived.map(|_| record)
    }

    /// Complete a running session whose planned time has fully elapsed
    async fn complete_overdue(&mut self, now: DateTime<Utc>) -> TimerResult<Option<SessionRecord>> {
        let Some(record) = &self.active else {
            return Ok(None);
        };
        let planned = record.planned_duration_ms;
        let end = record.target_completion_time.map_or(now, |target| target.min(now));
        self.complete(end, planned).await.map(Some)
    }

    /// Complete the running session if its planned time ran out before the
    /// completion signal was handled
    ///
    /// Returns the completed record; user commands that would otherwise act
    /// on the running session stop there.
    async fn settle_overdue(&mut self, now: DateTime<Utc>) -> TimerResult<Option<SessionRecord>> {
        let overdue = self
            .active
            .as_ref()
            .is_some_and(|r| r.is_running() && r.elapsed_at(now) >= r.planned_duration_ms);
        if !overdue {
            return Ok(None);
        }
        debug!("settle_overdue: planned time already elapsed, completing first");
        self.complete_overdue(now).await
    }

    /// Release the active slot and archive a terminal record
    async fn finish(&mut self, record: &SessionRecord, now: DateTime<Utc>) -> TimerResult<()> {
        self.active = None;
        self.active_dirty = false;

        match self.deps.state.archive(record, now).await {
            Ok(()) => {
                self.clear_heartbeat(&record.id).await;
                Ok(())
            }
            Err(e) => {
                let err = TimerError::from(e);
                warn!(session_id = %record.id, error = %err, "archive failed, will retry");
                self.pending_archive.push(record.clone());
                self.deps.sink.notify(
                    &record.id,
                    EventKind::Error(Notice::Unpersisted {
                        reason: err.to_string(),
                    }),
                );
                Err(err)
            }
        }
    }

    // === Background work ===

    async fn on_scheduler_message(&mut self, msg: SchedulerMessage) {
        match msg {
            SchedulerMessage::Heartbeat { timestamp } => {
                debug!(%timestamp, "on_scheduler_message: heartbeat");
                self.on_tick().await;
            }
            SchedulerMessage::CompletionFired { session_id, fired_at } => {
                match self.on_completion_signal(&session_id, fired_at).await {
                    Ok(outcome) => debug!(%session_id, ?outcome, "completion signal handled"),
                    Err(e) => warn!(%session_id, error = %e, "completion signal failed"),
                }
            }
            SchedulerMessage::SchedulerError { reason } => {
                let session_id = self.active.as_ref().map(|r| r.id.clone()).unwrap_or_default();
                self.enter_degraded(&session_id, reason).await;
            }
        }
    }

    /// Periodic work: retry pending writes, refresh the heartbeat, and
    /// complete an overdue session
    async fn on_tick(&mut self) {
        self.flush_pending().await;
        let now = self.deps.clock.now();
        let Some(record) = self.active.clone() else {
            return;
        };

        let elapsed = record.elapsed_at(now);
        if record.is_running() && elapsed >= record.planned_duration_ms {
            if let Err(e) = self.complete_overdue(now).await {
                warn!(session_id = %record.id, error = %e, "overdue completion not persisted");
            }
            return;
        }
        self.tick_heartbeat(&record.id, elapsed).await;
    }

    /// When running without background scheduling, wake at the target time
    fn foreground_deadline(&self) -> Option<Instant> {
        if !self.degraded {
            return None;
        }
        let record = self.active.as_ref().filter(|r| r.is_running())?;
        let target = record.target_completion_time?;
        let wait = ms_between(self.deps.clock.now(), target).max(1);
        Some(Instant::now() + Duration::from_millis(wait))
    }

    async fn register_running(&mut self, record: &SessionRecord) {
        let Some(target) = record.target_completion_time else {
            return;
        };
        let registered = match self.deps.scheduler.schedule_completion(&record.id, target).await {
            Ok(()) => {
                self.deps
                    .scheduler
                    .schedule_heartbeat(self.deps.config.heartbeat_interval())
                    .await
            }
            Err(e) => Err(e),
        };
        self.settle_registration(&record.id, registered).await;
    }

    async fn register_paused(&mut self, record: &SessionRecord) {
        let registered = match self.deps.scheduler.cancel_completion(&record.id).await {
            Ok(()) => {
                self.deps
                    .scheduler
                    .schedule_heartbeat(self.deps.config.paused_heartbeat_interval())
                    .await
            }
            Err(e) => Err(e),
        };
        self.settle_registration(&record.id, registered).await;
    }

    async fn settle_registration(&mut self, session_id: &str, result: Result<Duration, SchedulingError>) {
        match result {
            Ok(interval) => {
                debug!(%session_id, interval_ms = interval.as_millis() as u64, "background tasks registered");
                let threshold = self.deps.config.staleness_threshold();
                if interval >= threshold {
                    warn!(
                        %session_id,
                        interval_ms = interval.as_millis() as u64,
                        threshold_ms = threshold.as_millis() as u64,
                        "host heartbeat coarser than staleness threshold, liveness relies on the foreground tick"
                    );
                }
                if self.degraded {
                    info!("background scheduling available again");
                    self.degraded = false;
                    if let Err(e) = self.deps.state.set_degraded(false).await {
                        warn!(error = %e, "failed to clear degraded flag");
                    }
                }
            }
            Err(e) => self.enter_degraded(session_id, e.to_string()).await,
        }
    }

    async fn enter_degraded(&mut self, session_id: &str, reason: String) {
        warn!(%session_id, %reason, "background scheduling refused, ticking in foreground");
        if self.degraded {
            return;
        }
        self.degraded = true;
        if let Err(e) = self.deps.state.set_degraded(true).await {
            warn!(error = %e, "failed to persist degraded flag");
        }
        self.deps.sink.notify(
            session_id,
            EventKind::Error(Notice::Degraded { reason }),
        );
    }

    // === Persistence ===

    fn unpersisted(&self) -> bool {
        self.active_dirty || !self.pending_archive.is_empty()
    }

    async fn persist_active(&mut self) -> TimerResult<()> {
        let Some(record) = &self.active else {
            return Ok(());
        };
        match self.deps.state.save_active(record).await {
            Ok(()) => {
                self.active_dirty = false;
                Ok(())
            }
            Err(e) => {
                let err = TimerError::from(e);
                warn!(session_id = %record.id, error = %err, "session state held in memory only");
                self.deps.sink.notify(
                    &record.id,
                    EventKind::Error(Notice::Unpersisted {
                        reason: err.to_string(),
                    }),
                );
                self.active_dirty = true;
                Err(err)
            }
        }
    }

    /// Retry writes that failed earlier
    async fn flush_pending(&mut self) {
        if self.active_dirty
            && let Some(record) = &self.active
        {
            match self.deps.state.save_active(record).await {
                Ok(()) => {
                    info!(session_id = %record.id, "unpersisted session state saved");
                    self.active_dirty = false;
                }
                Err(e) => debug!(error = %e, "flush_pending: active session still unpersisted"),
            }
        }

        if self.pending_archive.is_empty() {
            return;
        }
        let now = self.deps.clock.now();
        for record in std::mem::take(&mut self.pending_archive) {
            match self.deps.state.archive(&record, now).await {
                Ok(()) => {
                    info!(session_id = %record.id, "pending archive saved");
                    self.clear_heartbeat(&record.id).await;
                }
                Err(e) => {
                    debug!(session_id = %record.id, error = %e, "flush_pending: archive still failing");
                    self.pending_archive.push(record);
                }
            }
        }
    }

    async fn tick_heartbeat(&self, session_id: &str, elapsed_ms: u64) {
        if let Err(e) = self.deps.heartbeat.tick(session_id, elapsed_ms).await {
            warn!(%session_id, error = %e, "heartbeat write failed");
        }
    }

    async fn clear_heartbeat(&self, session_id: &str) {
        if let Err(e) = self.deps.heartbeat.clear(session_id).await {
            warn!(%session_id, error = %e, "failed to clear heartbeat");
        }
    }

    // === Restore ===

    /// Take over a session restored by recovery
    async fn adopt(&mut self, restored: Option<SessionRecord>) {
        let Some(record) = restored.filter(|r| !r.is_terminal()) else {
            return;
        };
        info!(session_id = %record.id, status = %record.status, "adopting restored session");
        let now = self.deps.clock.now();
        self.active = Some(record.clone());

        if record.is_running() {
            if record.elapsed_at(now) >= record.planned_duration_ms {
                if let Err(e) = self.complete_overdue(now).await {
                    warn!(session_id = %record.id, error = %e, "overdue completion not persisted");
                }
                return;
            }
            self.tick_heartbeat(&record.id, record.elapsed_at(now)).await;
            self.register_running(&record).await;
        } else {
            self.register_paused(&record).await;
        }
    }

    // === Queries ===

    fn snapshot(&self, now: DateTime<Utc>) -> SessionSnapshot {
        let session = self.active.clone();
        SessionSnapshot {
            state: TimerState::of(session.as_ref()),
            elapsed_ms: session.as_ref().map_or(0, |r| r.elapsed_at(now)),
            remaining_ms: session.as_ref().map_or(0, |r| r.remaining_at(now)),
            target_completion_time: session.as_ref().and_then(|r| r.target_completion_time),
            session,
            degraded: self.degraded,
            unpersisted: self.unpersisted(),
            taken_at: now,
        }
    }

    async fn history(&self) -> TimerResult<SessionHistory> {
        Ok(self.deps.state.load_history(self.deps.clock.now()).await?)
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
