//! Timer engine
//!
//! The foreground controller for one session at a time:
//! - `machine` validates transitions without side effects
//! - `core` is the actor that persists, schedules and notifies
//! - `handle` is the cloneable client interface

mod core;
mod handle;
pub(crate) mod machine;
mod messages;

pub use core::{Engine, EngineDeps};
pub use handle::EngineHandle;
pub use machine::SignalVerdict;
pub use messages::{EngineCommand, SessionSnapshot, SignalOutcome};
