//! Background Scheduler
//!
//! Runs completion signals and the recurring heartbeat outside the
//! foreground controller:
//! - **Completion:** one pending task per session, fired at an absolute time
//! - **Heartbeat:** at most one recurring task, never finer than the host allows
//!
//! Results flow back over an ordered [`SchedulerMessage`] channel; anything
//! the foreground cannot receive is written to the durable outbox.

mod core;
mod handle;
mod host;
mod messages;

pub use core::BackgroundScheduler;
pub use handle::SchedulerHandle;
pub use host::{InProcessHost, TaskHost, TaskKind};
pub use messages::{PendingCompletion, SchedulerMessage, SchedulerRequest, SchedulingError};
