//! Host environment seam for background tasks

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};

use super::messages::SchedulingError;

/// A background task the scheduler asks the host to run
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskKind {
    Completion { session_id: String, target: DateTime<Utc> },
    Heartbeat { interval: Duration },
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Completion { session_id, .. } => write!(f, "completion task for {}", session_id),
            Self::Heartbeat { interval } => write!(f, "heartbeat every {}ms", interval.as_millis()),
        }
    }
}

/// The environment that actually runs background work
///
/// Hosts bound how often recurring work may run and may refuse tasks
/// outright. Admission is checked on registration and again each time a
/// recurring task fires.
pub trait TaskHost: Send + Sync {
    /// Finest recurring interval the host allows
    fn min_periodic_interval(&self) -> Duration;

    /// Accept or refuse a task
    fn admit(&self, task: &TaskKind) -> Result<(), SchedulingError>;
}

/// Runs everything on the local tokio runtime
#[derive(Debug, Clone)]
pub struct InProcessHost {
    min_interval: Duration,
}

impl InProcessHost {
    pub fn new(min_interval: Duration) -> Self {
        Self { min_interval }
    }
}

impl Default for InProcessHost {
    fn default() -> Self {
        Self::new(Duration::from_secs(1))
    }
}

impl TaskHost for InProcessHost {
    fn min_periodic_interval(&self) -> Duration {
        self.min_interval
    }

    fn admit(&self, _task: &TaskKind) -> Result<(), SchedulingError> {
        Ok(())
    }
}
