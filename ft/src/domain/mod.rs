//! Domain types for the focus timer
//!
//! Core records: SessionRecord, HeartbeatRecord, SessionHistory.
//! All are plain serde values; the persisted layout is camelCase JSON.

mod heartbeat;
mod history;
mod id;
mod session;

pub use heartbeat::HeartbeatRecord;
pub use history::SessionHistory;
pub use id::generate_session_id;
pub use session::{SessionKind, SessionRecord, SessionStatus, TimerState};
