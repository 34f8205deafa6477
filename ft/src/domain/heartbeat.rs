//! Heartbeat record

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::clock::ms_between;

/// Last liveness signal for a running session
///
/// Exactly one exists per active session; it is removed on any terminal
/// transition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HeartbeatRecord {
    /// Owning session
    pub session_id: String,
    /// When the heartbeat was written
    pub last_update: DateTime<Utc>,
    /// Session elapsed time as of `last_update`
    pub elapsed_ms: u64,
}

impl HeartbeatRecord {
    pub fn new(session_id: impl Into<String>, last_update: DateTime<Utc>, elapsed_ms: u64) -> Self {
        Self {
            session_id: session_id.into(),
            last_update,
            elapsed_ms,
        }
    }

    /// Milliseconds since the last update
    pub fn age_ms(&self, now: DateTime<Utc>) -> u64 {
        ms_between(self.last_update, now)
    }

    /// A heartbeat is stale once its age reaches `threshold_ms`
    pub fn is_stale_at(&self, now: DateTime<Utc>, threshold_ms: u64) -> bool {
        self.age_ms(now) >= threshold_ms
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::add_ms;
    use chrono::TimeZone;

    #[test]
    fn test_staleness_boundary() {
        let interval = 30_000;
        let threshold = interval * 4;
        let last = Utc.with_ymd_and_hms(2026, 10, 15, 9, 0, 0).unwrap();
        let hb = HeartbeatRecord::new("work-1", last, 0);

        assert!(hb.is_stale_at(add_ms(last, threshold), threshold));
        assert!(!hb.is_stale_at(add_ms(last, threshold - 1), threshold));
    }

    #[test]
    fn test_camel_case_layout() {
        let last = Utc.with_ymd_and_hms(2026, 10, 15, 9, 0, 0).unwrap();
        let json = serde_json::to_value(HeartbeatRecord::new("work-1", last, 600_000)).unwrap();
        assert_eq!(json["sessionId"], "work-1");
        assert_eq!(json["elapsedMs"], 600_000);
        assert_eq!(json["lastUpdate"], "2026-10-15T09:00:00Z");
    }
}
