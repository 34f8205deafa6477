//! Main Background Scheduler task implementation

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::clock::{Clock, ms_between};
use crate::state::StateManager;

use super::handle::SchedulerHandle;
use super::host::{TaskHost, TaskKind};
use super::messages::{PendingCompletion, SchedulerMessage, SchedulerRequest, SchedulingError};

/// Registered one-shot completion
struct CompletionTask {
    target: DateTime<Utc>,
    /// Distinguishes this registration from any it replaced
    token: u64,
    handle: JoinHandle<()>,
}

/// Registered recurring heartbeat
struct HeartbeatTask {
    interval: Duration,
    generation: u64,
    handle: JoinHandle<()>,
}

/// Executes completion and heartbeat work apart from the foreground controller
///
/// Runs as its own task. The foreground talks to it only through
/// [`SchedulerHandle`] and hears back only through the ordered
/// [`SchedulerMessage`] channel.
pub struct BackgroundScheduler {
    host: Arc<dyn TaskHost>,
    clock: Arc<dyn Clock>,
    state: StateManager,
    tx: mpsc::Sender<SchedulerRequest>,
    rx: mpsc::Receiver<SchedulerRequest>,
    out: mpsc::UnboundedSender<SchedulerMessage>,
    completions: HashMap<String, CompletionTask>,
    heartbeat: Option<HeartbeatTask>,
    next_token: u64,
}

impl BackgroundScheduler {
    /// Spawn the scheduler task
    ///
    /// Returns the request handle and the receiving end of the outbound
    /// message channel.
    pub fn spawn(
        host: Arc<dyn TaskHost>,
        clock: Arc<dyn Clock>,
        state: StateManager,
    ) -> (SchedulerHandle, mpsc::UnboundedReceiver<SchedulerMessage>) {
        let (tx, rx) = mpsc::channel(64);
        let (out, out_rx) = mpsc::unbounded_channel();

        let scheduler = Self {
            host,
            clock,
            state,
            tx: tx.clone(),
            rx,
            out,
            completions: HashMap::new(),
            heartbeat: None,
            next_token: 0,
        };
        tokio::spawn(scheduler.run());

        info!("BackgroundScheduler spawned");
        (SchedulerHandle::new(tx), out_rx)
    }

    async fn run(mut self) {
        debug!("BackgroundScheduler task started");

        while let Some(request) = self.rx.recv().await {
            match request {
                SchedulerRequest::ScheduleCompletion {
                    session_id,
                    target,
                    reply,
                } => {
                    let _ = reply.send(self.schedule_completion(session_id, target));
                }

                SchedulerRequest::CancelCompletion { session_id, reply } => {
                    self.cancel_completion(&session_id);
                    let _ = reply.send(());
                }

                SchedulerRequest::ScheduleHeartbeat { interval, reply } => {
                    let _ = reply.send(self.schedule_heartbeat(interval));
                }

                SchedulerRequest::CancelSession { session_id, reply } => {
                    debug!(%session_id, "run: CancelSession");
                    self.cancel_completion(&session_id);
                    self.cancel_heartbeat();
                    let _ = reply.send(());
                }

                SchedulerRequest::CancelAll { reply } => {
                    self.cancel_all();
                    let _ = reply.send(());
                }

                SchedulerRequest::PendingCompletions { reply } => {
                    let pending = self
                        .completions
                        .iter()
                        .map(|(id, task)| PendingCompletion {
                            session_id: id.clone(),
                            target: task.target,
                        })
                        .collect();
                    let _ = reply.send(pending);
                }

                SchedulerRequest::HeartbeatInterval { reply } => {
                    let _ = reply.send(self.heartbeat.as_ref().map(|hb| hb.interval));
                }

                SchedulerRequest::CompletionDue { session_id, token } => {
                    self.on_completion_due(session_id, token).await;
                }

                SchedulerRequest::HeartbeatDue { generation } => {
                    self.on_heartbeat_due(generation).await;
                }

                SchedulerRequest::Shutdown => {
                    info!("BackgroundScheduler shutting down");
                    break;
                }
            }
        }

        self.cancel_all();
        debug!("BackgroundScheduler task stopped");
    }

    fn schedule_completion(&mut self, session_id: String, target: DateTime<Utc>) -> Result<(), SchedulingError> {
        self.host.admit(&TaskKind::Completion {
            session_id: session_id.clone(),
            target,
        })?;

        if let Some(existing) = self.completions.get(&session_id)
            && existing.target == target
        {
            debug!(%session_id, %target, "schedule_completion: already registered");
            return Ok(());
        }
        self.cancel_completion(&session_id);

        self.next_token += 1;
        let token = self.next_token;
        let delay = Duration::from_millis(ms_between(self.clock.now(), target));
        let tx = self.tx.clone();
        let id = session_id.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = tx.send(SchedulerRequest::CompletionDue { session_id: id, token }).await;
        });

        debug!(%session_id, %target, delay_ms = delay.as_millis() as u64, "schedule_completion: registered");
        self.completions.insert(session_id, CompletionTask { target, token, handle });
        Ok(())
    }

    fn cancel_completion(&mut self, session_id: &str) {
        if let Some(task) = self.completions.remove(session_id) {
            debug!(%session_id, "cancel_completion: removed");
            task.handle.abort();
        }
    }

    fn schedule_heartbeat(&mut self, requested: Duration) -> Result<Duration, SchedulingError> {
        let interval = requested
            .max(self.host.min_periodic_interval())
            .max(Duration::from_millis(1));
        if interval != requested {
            debug!(
                requested_ms = requested.as_millis() as u64,
                interval_ms = interval.as_millis() as u64,
                "schedule_heartbeat: clamped to host minimum"
            );
        }
        self.host.admit(&TaskKind::Heartbeat { interval })?;

        if let Some(existing) = &self.heartbeat
            && existing.interval == interval
        {
            return Ok(interval);
        }
        self.cancel_heartbeat();

        let generation = self.next_token + 1;
        self.next_token = generation;
        let tx = self.tx.clone();
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                if tx.send(SchedulerRequest::HeartbeatDue { generation }).await.is_err() {
                    break;
                }
            }
        });

        debug!(interval_ms = interval.as_millis() as u64, "schedule_heartbeat: registered");
        self.heartbeat = Some(HeartbeatTask {
            interval,
            generation,
            handle,
        });
        Ok(interval)
    }

    fn cancel_heartbeat(&mut self) {
        if let Some(task) = self.heartbeat.take() {
            debug!("cancel_heartbeat: removed");
            task.handle.abort();
        }
    }

    fn cancel_all(&mut self) {
        debug!(pending = self.completions.len(), "cancel_all: called");
        for (_, task) in self.completions.drain() {
            task.handle.abort();
        }
        self.cancel_heartbeat();
    }

    async fn on_completion_due(&mut self, session_id: String, token: u64) {
        // A replaced or cancelled registration may still deliver its timer
        let current = self.completions.get(&session_id).is_some_and(|t| t.token == token);
        if !current {
            debug!(%session_id, token, "on_completion_due: registration superseded");
            return;
        }
        self.completions.remove(&session_id);

        let fired_at = self.clock.now();
        info!(%session_id, %fired_at, "completion task fired");
        self.deliver(SchedulerMessage::CompletionFired { session_id, fired_at })
            .await;
    }

    async fn on_heartbeat_due(&mut self, generation: u64) {
        let Some(task) = &self.heartbeat else {
            return;
        };
        if task.generation != generation {
            return;
        }

        let interval = task.interval;
        if let Err(e) = self.host.admit(&TaskKind::Heartbeat { interval }) {
            warn!(error = %e, "host withdrew heartbeat task");
            self.cancel_heartbeat();
            self.deliver(SchedulerMessage::SchedulerError { reason: e.to_string() })
                .await;
            return;
        }

        self.deliver(SchedulerMessage::Heartbeat {
            timestamp: self.clock.now(),
        })
        .await;
    }

    /// Send to the foreground, or record durably if it is gone
    async fn deliver(&self, message: SchedulerMessage) {
        if let Err(mpsc::error::SendError(message)) = self.out.send(message) {
            warn!(?message, "foreground unavailable, recording message in outbox");
            if let Err(e) = self.state.append_outbox(message).await {
                error!(error = %e, "failed to record undeliverable scheduler message");
            }
        }
    }
}
