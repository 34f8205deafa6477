//! Session history
//!
//! Archived terminal sessions, newest first.

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};

use super::session::SessionRecord;

/// Ordered list of archived session records, newest first
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionHistory {
    entries: Vec<SessionRecord>,
}

impl SessionHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> &[SessionRecord] {
        &self.entries
    }

    pub fn into_entries(self) -> Vec<SessionRecord> {
        self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.entries.iter().any(|e| e.id == id)
    }

    /// Insert an archived record at the front and drop anything beyond `limit`
    ///
    /// Returns false (and changes nothing) if a record with the same id is
    /// already archived.
    pub fn insert(&mut self, record: SessionRecord, limit: usize) -> bool {
        if self.contains(&record.id) {
            return false;
        }
        self.entries.insert(0, record);
        self.entries.truncate(limit);
        true
    }

    /// Drop entries older than `max_age_days` and beyond `limit`
    ///
    /// Age is measured from the end time (start time for records that somehow
    /// lack one). Returns the number of entries removed.
    pub fn purge(&mut self, now: DateTime<Utc>, max_age_days: u32, limit: usize) -> usize {
        let before = self.entries.len();
        let max_age = TimeDelta::try_days(i64::from(max_age_days)).unwrap_or(TimeDelta::MAX);
        let cutoff = now.checked_sub_signed(max_age).unwrap_or(DateTime::<Utc>::MIN_UTC);

        self.entries
            .retain(|e| e.end_time.unwrap_or(e.start_time) >= cutoff);
        self.entries.truncate(limit);
        before - self.entries.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::add_ms;
    use crate::domain::SessionKind;
    use chrono::TimeZone;

    const DAY_MS: u64 = 86_400_000;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 10, 15, 9, 0, 0).unwrap()
    }

    fn archived(id: &str, end: DateTime<Utc>) -> SessionRecord {
        let mut record = SessionRecord::with_id(id, SessionKind::Work, 1_000, end);
        record.mark_completed(end, 1_000);
        record
    }

    #[test]
    fn test_insert_caps_at_limit_keeping_newest() {
        let mut history = SessionHistory::new();
        for i in 0..101u64 {
            history.insert(archived(&format!("work-{}", i), add_ms(t0(), i * 1_000)), 100);
        }

        assert_eq!(history.len(), 100);
        assert_eq!(history.entries()[0].id, "work-100");
        assert!(!history.contains("work-0"));
    }

    #[test]
    fn test_insert_is_idempotent_by_id() {
        let mut history = SessionHistory::new();
        assert!(history.insert(archived("work-a", t0()), 100));
        assert!(!history.insert(archived("work-a", t0()), 100));
        assert_eq!(history.len(), 1);
    }

    #[test]
    fn test_purge_removes_entries_older_than_window() {
        let now = add_ms(t0(), 31 * DAY_MS);
        let mut history = SessionHistory::new();
        history.insert(archived("work-old", t0()), 100);
        history.insert(archived("work-new", add_ms(t0(), 30 * DAY_MS)), 100);

        let removed = history.purge(now, 30, 100);

        assert_eq!(removed, 1);
        assert_eq!(history.len(), 1);
        assert_eq!(history.entries()[0].id, "work-new");
    }

    #[test]
    fn test_purge_keeps_entry_exactly_at_window_edge() {
        let now = add_ms(t0(), 30 * DAY_MS);
        let mut history = SessionHistory::new();
        history.insert(archived("work-edge", t0()), 100);

        assert_eq!(history.purge(now, 30, 100), 0);
    }

    #[test]
    fn test_serializes_as_plain_array() {
        let mut history = SessionHistory::new();
        history.insert(archived("work-a", t0()), 100);
        let json = serde_json::to_value(&history).unwrap();
        assert!(json.is_array());
        assert_eq!(json[0]["id"], "work-a");
    }
}
