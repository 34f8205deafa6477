//! Crash recovery
//!
//! Reconciles persisted state at process start, before the engine takes over
//! and before anything is shown to the user.

use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::clock::{Clock, add_ms, ms_between};
use crate::config::ConfigProvider;
use crate::domain::SessionRecord;
use crate::engine::SignalVerdict;
use crate::engine::machine;
use crate::error::TimerResult;
use crate::heartbeat::HeartbeatMonitor;
use crate::notify::{EventKind, Notice, NotificationSink};
use crate::scheduler::SchedulerMessage;
use crate::state::{StateError, StateManager};

/// What recovery did with the persisted state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RecoveryOutcome {
    /// No active session was stored
    NothingToRecover,
    /// Session restored in its persisted state
    Resumed,
    /// Crashed session whose planned time had fully elapsed
    Completed,
    /// Crashed session frozen as paused, awaiting a user decision
    CrashPaused,
    /// A terminal record left mid-archive was archived
    ArchiveFinished,
    /// Stored state was unreadable and has been discarded
    CorruptDiscarded,
}

impl std::fmt::Display for RecoveryOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let text = match self {
            Self::NothingToRecover => "nothing to recover",
            Self::Resumed => "resumed",
            Self::Completed => "completed",
            Self::CrashPaused => "paused after crash",
            Self::ArchiveFinished => "archive finished",
            Self::CorruptDiscarded => "corrupt state discarded",
        };
        write!(f, "{}", text)
    }
}

/// Result of a recovery pass
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecoveryReport {
    pub outcome: RecoveryOutcome,
    /// Non-terminal session to hand to the engine
    pub active: Option<SessionRecord>,
    /// Record the outcome concerns (terminal for Completed/ArchiveFinished)
    pub session: Option<SessionRecord>,
    /// Outbox messages replayed
    pub replayed: usize,
    /// A recovery write failed; `active` is held in memory only
    pub unpersisted: bool,
}

impl RecoveryReport {
    fn new(outcome: RecoveryOutcome) -> Self {
        Self {
            outcome,
            active: None,
            session: None,
            replayed: 0,
            unpersisted: false,
        }
    }

    /// Whether the user must decide what to do with a crashed session
    pub fn needs_prompt(&self) -> bool {
        self.outcome == RecoveryOutcome::CrashPaused
    }
}

/// Startup reconciliation of the active session
pub struct RecoveryCoordinator {
    state: StateManager,
    heartbeat: HeartbeatMonitor,
    clock: Arc<dyn Clock>,
    config: Arc<dyn ConfigProvider>,
    sink: Arc<dyn NotificationSink>,
}

impl RecoveryCoordinator {
    pub fn new(
        state: StateManager,
        heartbeat: HeartbeatMonitor,
        clock: Arc<dyn Clock>,
        config: Arc<dyn ConfigProvider>,
        sink: Arc<dyn NotificationSink>,
    ) -> Self {
        Self {
            state,
            heartbeat,
            clock,
            config,
            sink,
        }
    }

    /// Run one recovery pass
    ///
    /// Unreadable state is discarded and reported, never returned as an
    /// error. Failed cleanup writes are logged and skipped; errors are limited
    /// to reads the store refused and archives it would not take.
    pub async fn run(&self) -> TimerResult<RecoveryReport> {
        debug!("run: called");
        let outbox = match self.state.drain_outbox().await {
            Ok(outbox) => outbox,
            Err(e) => {
                warn!(error = %e, "could not read scheduler outbox, skipping replay");
                Vec::new()
            }
        };

        let record = match self.state.load_active().await {
            Ok(Some(record)) => record,
            Ok(None) => {
                match self.state.clear_heartbeat(None).await {
                    Ok(true) => debug!("run: removed orphan heartbeat"),
                    Ok(false) => {}
                    Err(e) => warn!(error = %e, "could not remove orphan heartbeat"),
                }
                if !outbox.is_empty() {
                    debug!(count = outbox.len(), "run: dropping outbox with no active session");
                }
                info!("Recovery: nothing to recover");
                return Ok(RecoveryReport::new(RecoveryOutcome::NothingToRecover));
            }
            Err(StateError::Corrupt { key, reason }) => return self.discard_corrupt(&key, reason).await,
            Err(e) => return Err(e.into()),
        };

        if record.is_terminal() {
            return self.finish_archive(record).await;
        }

        let (record, replayed) = match self.replay_outbox(record, outbox).await? {
            Replay::Completed(report) => return Ok(report),
            Replay::Pending(record, replayed) => (record, replayed),
        };

        let mut report = if record.is_paused() {
            // Elapsed time is already frozen; nothing to judge
            info!(session_id = %record.id, "Recovery: restoring paused session");
            RecoveryReport {
                active: Some(record),
                ..RecoveryReport::new(RecoveryOutcome::Resumed)
            }
        } else if !self.heartbeat.is_stale_default(&record.id).await? {
            info!(session_id = %record.id, "Recovery: heartbeat fresh, resuming running session");
            RecoveryReport {
                active: Some(record),
                ..RecoveryReport::new(RecoveryOutcome::Resumed)
            }
        } else {
            self.recover_crashed(record).await?
        };
        report.replayed = replayed;
        Ok(report)
    }

    async fn discard_corrupt(&self, key: &str, reason: String) -> TimerResult<RecoveryReport> {
        warn!(%key, %reason, "Recovery: discarding unreadable session state");
        if let Err(e) = self.state.clear_active(None).await {
            warn!(error = %e, "could not clear unreadable session state");
        }
        if let Err(e) = self.state.clear_heartbeat(None).await {
            warn!(error = %e, "could not clear heartbeat of unreadable session");
        }
        self.sink
            .notify("", EventKind::Error(Notice::RecoveryFailed { reason }));
        Ok(RecoveryReport::new(RecoveryOutcome::CorruptDiscarded))
    }

    /// Complete an archive interrupted after the terminal write
    async fn finish_archive(&self, record: SessionRecord) -> TimerResult<RecoveryReport> {
        info!(session_id = %record.id, status = %record.status, "Recovery: finishing interrupted archive");
        self.state.archive(&record, self.clock.now()).await?;
        self.heartbeat.clear(&record.id).await?;
        Ok(RecoveryReport {
            session: Some(record),
            ..RecoveryReport::new(RecoveryOutcome::ArchiveFinished)
        })
    }

    /// Apply scheduler messages that never reached a foreground
    async fn replay_outbox(&self, record: SessionRecord, outbox: Vec<SchedulerMessage>) -> TimerResult<Replay> {
        let replayed = outbox.len();
        let tolerance_ms = self.config.completion_tolerance().as_millis() as u64;

        for message in outbox {
            match message {
                SchedulerMessage::CompletionFired { session_id, fired_at } => {
                    let verdict = machine::judge_completion_signal(Some(&record), &session_id, fired_at, tolerance_ms);
                    debug!(%session_id, %fired_at, ?verdict, "replay: completionFired");
                    if verdict == SignalVerdict::Accept {
                        let done = machine::complete(Some(&record), fired_at, record.elapsed_at(fired_at))?;
                        let mut report = self.archive_completed(done).await?;
                        report.replayed = replayed;
                        return Ok(Replay::Completed(report));
                    }
                }
                SchedulerMessage::Heartbeat { timestamp } => {
                    if !record.is_running() {
                        continue;
                    }
                    let newer = self
                        .heartbeat
                        .last_heartbeat(&record.id)
                        .await?
                        .is_none_or(|hb| hb.last_update < timestamp);
                    if newer {
                        debug!(session_id = %record.id, %timestamp, "replay: heartbeat");
                        self.heartbeat
                            .tick_at(&record.id, timestamp, record.elapsed_at(timestamp))
                            .await?;
                    }
                }
                SchedulerMessage::SchedulerError { reason } => {
                    warn!(%reason, "replay: scheduler reported an error while unattended");
                    if let Err(e) = self.state.set_degraded(true).await {
                        warn!(error = %e, "failed to persist degraded flag");
                    }
                }
            }
        }
        Ok(Replay::Pending(record, replayed))
    }

    /// Decide the fate of a running session whose heartbeat went stale
    async fn recover_crashed(&self, record: SessionRecord) -> TimerResult<RecoveryReport> {
        let now = self.clock.now();
        let (last_seen, last_elapsed) = match self.heartbeat.last_heartbeat(&record.id).await? {
            Some(hb) => (hb.last_update, hb.elapsed_ms),
            None => (
                record.running_since.unwrap_or(record.start_time),
                record.accumulated_elapsed_ms,
            ),
        };
        let gap = ms_between(last_seen, now);
        let planned = record.planned_duration_ms;
        warn!(
            session_id = %record.id,
            last_elapsed,
            gap_ms = gap,
            planned,
            "Recovery: stale heartbeat, session presumed crashed"
        );

        if last_elapsed.saturating_add(gap) >= planned {
            let end = add_ms(last_seen, planned.saturating_sub(last_elapsed)).min(now);
            let done = machine::complete(Some(&record), end, planned)?;
            return self.archive_completed(done).await;
        }

        let frozen = machine::freeze_after_crash(Some(&record), last_elapsed)?;
        let unpersisted = match self.state.save_active(&frozen).await {
            Ok(()) => false,
            Err(e) => {
                warn!(session_id = %frozen.id, error = %e, "paused session held in memory only");
                self.sink.notify(
                    &frozen.id,
                    EventKind::Error(Notice::Unpersisted { reason: e.to_string() }),
                );
                true
            }
        };
        if let Err(e) = self.heartbeat.tick(&frozen.id, frozen.accumulated_elapsed_ms).await {
            warn!(session_id = %frozen.id, error = %e, "heartbeat write failed");
        }
        info!(
            session_id = %frozen.id,
            elapsed_ms = frozen.accumulated_elapsed_ms,
            "Recovery: session paused, prompting user"
        );
        self.sink.notify(&frozen.id, EventKind::RecoveryPrompt);

        Ok(RecoveryReport {
            active: Some(frozen.clone()),
            session: Some(frozen),
            unpersisted,
            ..RecoveryReport::new(RecoveryOutcome::CrashPaused)
        })
    }

    async fn archive_completed(&self, done: SessionRecord) -> TimerResult<RecoveryReport> {
        info!(session_id = %done.id, end = ?done.end_time, "Recovery: session completed while unattended");
        self.state.archive(&done, self.clock.now()).await?;
        self.heartbeat.clear(&done.id).await?;
        self.sink.notify(&done.id, EventKind::Completed);
        Ok(RecoveryReport {
            session: Some(done),
            ..RecoveryReport::new(RecoveryOutcome::Completed)
        })
    }
}

enum Replay {
    Completed(RecoveryReport),
    Pending(SessionRecord, usize),
}
