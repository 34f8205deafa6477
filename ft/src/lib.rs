//! Focustimer - crash-safe Pomodoro timer engine
//!
//! Runs focus and break sessions whose elapsed time survives process
//! suspension and crashes. Sessions are measured against wall-clock
//! timestamps, never against a counter, and every state change is written to
//! durable storage before it is acknowledged.
//!
//! # Modules
//!
//! - [`engine`] - foreground controller owning the session state machine
//! - [`scheduler`] - background one-shot completion and periodic heartbeat tasks
//! - [`heartbeat`] - liveness records used to detect crashes
//! - [`recovery`] - startup reconciliation of persisted state
//! - [`state`] - persistence actor over a [`sessionstore::KvStore`]
//! - [`notify`] - event sinks for the user-facing layer
//! - [`config`] - configuration types and loading
//! - [`cli`] - command-line interface

pub mod app;
pub mod cli;
pub mod clock;
pub mod config;
pub mod domain;
pub mod engine;
pub mod error;
pub mod heartbeat;
pub mod notify;
pub mod recovery;
pub mod scheduler;
pub mod state;

// Re-export commonly used types
pub use app::{App, AppBuilder};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{Config, ConfigError, ConfigProvider, StorageConfig, TimerConfig, TimerSettings};
pub use domain::{HeartbeatRecord, SessionHistory, SessionKind, SessionRecord, SessionStatus, TimerState};
pub use engine::{Engine, EngineDeps, EngineHandle, SessionSnapshot, SignalOutcome};
pub use error::{TimerError, TimerResult};
pub use heartbeat::HeartbeatMonitor;
pub use notify::{EventBus, EventKind, FanoutSink, LogSink, Notice, NotificationSink, RecordingSink, TimerEvent};
pub use recovery::{RecoveryCoordinator, RecoveryOutcome, RecoveryReport};
pub use scheduler::{
    BackgroundScheduler, InProcessHost, PendingCompletion, SchedulerHandle, SchedulerMessage, SchedulingError,
    TaskHost, TaskKind,
};
pub use state::{StateConfig, StateError, StateManager};
