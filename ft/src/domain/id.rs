//! Session ID generation
//!
//! IDs use the format `{kind}-{uuid-v7}`, e.g. `work-01927f3a-...`.
//! UUID v7 is time-ordered, so IDs sort by creation time within a kind.

use super::SessionKind;

/// Generate a unique session ID for a session of the given kind
pub fn generate_session_id(kind: SessionKind) -> String {
    format!("{}-{}", kind, uuid::Uuid::now_v7())
}
