//! Notifications for the user-facing layer
//!
//! The engine and recovery report lifecycle events through a
//! [`NotificationSink`]. Sinks are fire-and-forget and must never block the
//! caller.

use std::fmt;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

/// Non-blocking warnings surfaced as `error` events
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notice {
    /// Background scheduling unavailable; foreground ticking only
    Degraded { reason: String },
    /// A state change is held in memory but not yet durable
    Unpersisted { reason: String },
    /// Stored state was unreadable and discarded at startup
    RecoveryFailed { reason: String },
}

impl fmt::Display for Notice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Degraded { reason } => write!(f, "background scheduling unavailable ({})", reason),
            Self::Unpersisted { reason } => write!(f, "session state not saved ({})", reason),
            Self::RecoveryFailed { reason } => write!(f, "stored session discarded ({})", reason),
        }
    }
}

/// Kind of event delivered to the sink
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventKind {
    Started,
    Completed,
    /// A crashed session was frozen and awaits a user decision
    RecoveryPrompt,
    Error(Notice),
}

impl EventKind {
    /// Wire name of the event
    pub fn name(&self) -> &'static str {
        match self {
            Self::Started => "started",
            Self::Completed => "completed",
            Self::RecoveryPrompt => "recoveryPrompt",
            Self::Error(_) => "error",
        }
    }
}

/// Receiver of session events
pub trait NotificationSink: Send + Sync {
    fn notify(&self, session_id: &str, event: EventKind);
}

/// Event as seen by bus subscribers
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimerEvent {
    pub session_id: String,
    pub kind: EventKind,
    pub at: DateTime<Utc>,
}

/// Default channel capacity (events)
pub const DEFAULT_CHANNEL_CAPACITY: usize = 256;

/// Pub/sub fan-out of timer events over a tokio broadcast channel
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<TimerEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        debug!(capacity, "EventBus::new: creating event bus");
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Receive every event emitted after this call
    pub fn subscribe(&self) -> broadcast::Receiver<TimerEvent> {
        self.tx.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_CHANNEL_CAPACITY)
    }
}

impl NotificationSink for EventBus {
    fn notify(&self, session_id: &str, event: EventKind) {
        // No subscribers is fine
        let _ = self.tx.send(TimerEvent {
            session_id: session_id.to_string(),
            kind: event,
            at: Utc::now(),
        });
    }
}

/// Writes every event to the log
#[derive(Debug, Clone, Copy, Default)]
pub struct LogSink;

impl NotificationSink for LogSink {
    fn notify(&self, session_id: &str, event: EventKind) {
        match &event {
            EventKind::Error(notice) => warn!(%session_id, %notice, "session warning"),
            EventKind::RecoveryPrompt => warn!(%session_id, "session recovered after crash, awaiting decision"),
            other => info!(%session_id, event = other.name(), "session event"),
        }
    }
}

/// Forwards to several sinks in order
#[derive(Clone, Default)]
pub struct FanoutSink {
    sinks: Vec<Arc<dyn NotificationSink>>,
}

impl FanoutSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, sink: Arc<dyn NotificationSink>) -> Self {
        self.sinks.push(sink);
        self
    }
}

impl NotificationSink for FanoutSink {
    fn notify(&self, session_id: &str, event: EventKind) {
        for sink in &self.sinks {
            sink.notify(session_id, event.clone());
        }
    }
}

/// Keeps every event in memory, in order
#[derive(Debug, Default)]
pub struct RecordingSink {
    events: Mutex<Vec<(String, EventKind)>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<(String, EventKind)> {
        self.events.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Events of one kind name (`started`, `completed`, `recoveryPrompt`, `error`)
    pub fn named(&self, name: &str) -> Vec<(String, EventKind)> {
        self.events().into_iter().filter(|(_, kind)| kind.name() == name).collect()
    }
}

impl NotificationSink for RecordingSink {
    fn notify(&self, session_id: &str, event: EventKind) {
        self.events
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push((session_id.to_string(), event));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_bus_delivers_to_subscribers() {
        let bus = EventBus::default();
        let mut rx = bus.subscribe();

        bus.notify("work-1", EventKind::Started);
        let event = rx.recv().await.unwrap();
        assert_eq!(event.session_id, "work-1");
        assert_eq!(event.kind, EventKind::Started);
    }

    #[test]
    fn test_notify_without_subscribers_is_fine() {
        let bus = EventBus::default();
        bus.notify("work-1", EventKind::Completed);
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[test]
    fn test_recording_sink_keeps_order() {
        let sink = RecordingSink::new();
        sink.notify("work-1", EventKind::Started);
        sink.notify("work-1", EventKind::Completed);

        let names: Vec<_> = sink.events().iter().map(|(_, kind)| kind.name()).collect();
        assert_eq!(names, vec!["started", "completed"]);
        assert_eq!(sink.named("completed").len(), 1);
    }

    #[tokio::test]
    async fn test_fanout_forwards_to_all() {
        let a = EventBus::default();
        let b = EventBus::default();
        let mut rx_a = a.subscribe();
        let mut rx_b = b.subscribe();
        let fanout = FanoutSink::new()
            .with(Arc::new(LogSink))
            .with(Arc::new(a.clone()))
            .with(Arc::new(b.clone()));

        fanout.notify("work-1", EventKind::RecoveryPrompt);

        assert_eq!(rx_a.recv().await.unwrap().kind, EventKind::RecoveryPrompt);
        assert_eq!(rx_b.recv().await.unwrap().kind.name(), "recoveryPrompt");
    }
}
