//! SessionRecord domain type
//!
//! Tracks one timed work or break interval from start to its terminal state.

use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::id::generate_session_id;
use crate::clock::{add_ms, ms_between};

/// Kind of focus session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SessionKind {
    Work,
    ShortBreak,
    LongBreak,
}

impl std::fmt::Display for SessionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Work => write!(f, "work"),
            Self::ShortBreak => write!(f, "short-break"),
            Self::LongBreak => write!(f, "long-break"),
        }
    }
}

impl FromStr for SessionKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().replace('_', "-").as_str() {
            "work" => Ok(Self::Work),
            "short-break" | "short" => Ok(Self::ShortBreak),
            "long-break" | "long" => Ok(Self::LongBreak),
            other => Err(format!("unknown session kind '{}'", other)),
        }
    }
}

/// Persisted status of a session record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    /// Time is advancing
    Running,
    /// Elapsed time frozen
    Paused,
    /// Planned duration reached
    Completed,
    /// Stopped by the user before completion
    Cancelled,
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Running => write!(f, "running"),
            Self::Paused => write!(f, "paused"),
            Self::Completed => write!(f, "completed"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// State of the timer state machine (a controller with no session is Idle)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimerState {
    Idle,
    Running,
    Paused,
    Completed,
    Cancelled,
}

impl TimerState {
    /// Derive the machine state from the active record, if any
    pub fn of(record: Option<&SessionRecord>) -> Self {
        match record.map(|r| r.status) {
            None => Self::Idle,
            Some(SessionStatus::Running) => Self::Running,
            Some(SessionStatus::Paused) => Self::Paused,
            Some(SessionStatus::Completed) => Self::Completed,
            Some(SessionStatus::Cancelled) => Self::Cancelled,
        }
    }
}

impl std::fmt::Display for TimerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Running => write!(f, "running"),
            Self::Paused => write!(f, "paused"),
            Self::Completed => write!(f, "completed"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// A timed work or break interval
///
/// Elapsed time is tracked as `accumulated_elapsed_ms` (frozen at the last
/// pause) plus the wall-clock span since `running_since` while running. The
/// completion target is always recomputed from the remaining duration at the
/// moment the session (re)starts running, never by summing relative deltas.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionRecord {
    /// Unique identifier
    pub id: String,

    /// Work or break
    pub kind: SessionKind,

    /// Current status
    pub status: SessionStatus,

    /// Planned duration (always > 0)
    pub planned_duration_ms: u64,

    /// When the session was started
    pub start_time: DateTime<Utc>,

    /// Set if and only if the session is terminal
    pub end_time: Option<DateTime<Utc>>,

    /// True only for sessions that ran their full planned duration
    pub completed: bool,

    /// Number of recorded interruptions
    pub interruptions: u32,

    /// Elapsed time up to `running_since` (or total, when not running)
    pub accumulated_elapsed_ms: u64,

    /// Start of the current running segment
    #[serde(default)]
    pub running_since: Option<DateTime<Utc>>,

    /// Absolute completion target of the current running segment
    #[serde(default)]
    pub target_completion_time: Option<DateTime<Utc>>,
}

impl SessionRecord {
    /// Create a running session starting at `now`
    pub fn new(kind: SessionKind, planned_duration_ms: u64, now: DateTime<Utc>) -> Self {
        Self::with_id(generate_session_id(kind), kind, planned_duration_ms, now)
    }

    /// Create with a specific ID (for testing or recovery)
    pub fn with_id(id: impl Into<String>, kind: SessionKind, planned_duration_ms: u64, now: DateTime<Utc>) -> Self {
        Self {
            id: id.into(),
            kind,
            status: SessionStatus::Running,
            planned_duration_ms,
            start_time: now,
            end_time: None,
            completed: false,
            interruptions: 0,
            accumulated_elapsed_ms: 0,
            running_since: Some(now),
            target_completion_time: Some(add_ms(now, planned_duration_ms)),
        }
    }

    /// Elapsed time as of `now`
    pub fn elapsed_at(&self, now: DateTime<Utc>) -> u64 {
        match (self.status, self.running_since) {
            (SessionStatus::Running, Some(since)) => self.accumulated_elapsed_ms.saturating_add(ms_between(since, now)),
            _ => self.accumulated_elapsed_ms,
        }
    }

    /// Remaining planned time as of `now`
    pub fn remaining_at(&self, now: DateTime<Utc>) -> u64 {
        self.planned_duration_ms.saturating_sub(self.elapsed_at(now))
    }

    /// Check if the session is in a terminal state
    pub fn is_terminal(&self) -> bool {
        matches!(self.status, SessionStatus::Completed | SessionStatus::Cancelled)
    }

    pub fn is_running(&self) -> bool {
        self.status == SessionStatus::Running
    }

    pub fn is_paused(&self) -> bool {
        self.status == SessionStatus::Paused
    }

    // === Mutations (state checks live in the engine's transition layer) ===

    /// Freeze elapsed time at `now` and stop the clock
    pub(crate) fn freeze(&mut self, now: DateTime<Utc>) {
        self.accumulated_elapsed_ms = self.elapsed_at(now);
        self.running_since = None;
        self.target_completion_time = None;
    }

    pub(crate) fn mark_paused(&mut self, now: DateTime<Utc>) {
        self.freeze(now);
        self.status = SessionStatus::Paused;
    }

    /// Restart the clock at `now`; the target is `now + remaining`
    pub(crate) fn mark_running(&mut self, now: DateTime<Utc>) {
        let remaining = self.remaining_at(now);
        self.status = SessionStatus::Running;
        self.running_since = Some(now);
        self.target_completion_time = Some(add_ms(now, remaining));
    }

    /// Pause with an explicit elapsed value (crash recovery)
    pub(crate) fn mark_paused_at_elapsed(&mut self, elapsed_ms: u64) {
        self.accumulated_elapsed_ms = elapsed_ms;
        self.running_since = None;
        self.target_completion_time = None;
        self.status = SessionStatus::Paused;
    }

    pub(crate) fn mark_completed(&mut self, end: DateTime<Utc>, elapsed_ms: u64) {
        self.accumulated_elapsed_ms = elapsed_ms;
        self.running_since = None;
        self.target_completion_time = None;
        self.status = SessionStatus::Completed;
        self.completed = true;
        self.end_time = Some(end);
    }

    pub(crate) fn mark_cancelled(&mut self, now: DateTime<Utc>) {
        self.freeze(now);
        self.status = SessionStatus::Cancelled;
        self.completed = false;
        self.end_time = Some(now);
    }

    pub(crate) fn increment_interruptions(&mut self) {
        self.interruptions = self.interruptions.saturating_add(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::add_ms;
    use chrono::TimeZone;
    use proptest::prelude::*;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 10, 15, 9, 0, 0).unwrap()
    }

    #[test]
    fn test_new_session_is_running_with_target() {
        let record = SessionRecord::new(SessionKind::Work, 1_500_000, t0());
        assert_eq!(record.status, SessionStatus::Running);
        assert_eq!(record.target_completion_time, Some(add_ms(t0(), 1_500_000)));
        assert!(record.end_time.is_none());
        assert_eq!(record.elapsed_at(add_ms(t0(), 60_000)), 60_000);
        assert_eq!(record.remaining_at(add_ms(t0(), 60_000)), 1_440_000);
    }

    #[test]
    fn test_pause_freezes_and_resume_recomputes_target() {
        let mut record = SessionRecord::new(SessionKind::Work, 1_500_000, t0());

        record.mark_paused(add_ms(t0(), 100_000));
        assert_eq!(record.accumulated_elapsed_ms, 100_000);
        // Time passing while paused does not count
        assert_eq!(record.elapsed_at(add_ms(t0(), 900_000)), 100_000);

        let resumed_at = add_ms(t0(), 900_000);
        record.mark_running(resumed_at);
        assert_eq!(record.target_completion_time, Some(add_ms(resumed_at, 1_400_000)));
    }

    #[test]
    fn test_cancel_sets_end_time_and_not_completed() {
        let mut record = SessionRecord::new(SessionKind::ShortBreak, 300_000, t0());
        record.mark_cancelled(add_ms(t0(), 10));
        assert!(record.is_terminal());
        assert!(!record.completed);
        assert_eq!(record.end_time, Some(add_ms(t0(), 10)));
        assert_eq!(record.accumulated_elapsed_ms, 10);
    }

    #[test]
    fn test_kind_parsing() {
        assert_eq!("work".parse::<SessionKind>().unwrap(), SessionKind::Work);
        assert_eq!("short_break".parse::<SessionKind>().unwrap(), SessionKind::ShortBreak);
        assert_eq!("LONG".parse::<SessionKind>().unwrap(), SessionKind::LongBreak);
        assert!("nap".parse::<SessionKind>().is_err());
    }

    #[test]
    fn test_persisted_layout() {
        let record = SessionRecord::with_id("work-1", SessionKind::Work, 1_500_000, t0());
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["id"], "work-1");
        assert_eq!(json["kind"], "work");
        assert_eq!(json["plannedDurationMs"], 1_500_000);
        assert_eq!(json["startTime"], "2026-10-15T09:00:00Z");
        assert!(json["endTime"].is_null());
        assert_eq!(json["completed"], false);
        assert_eq!(json["interruptions"], 0);
        assert_eq!(json["accumulatedElapsedMs"], 0);
    }

    fn arb_kind() -> impl Strategy<Value = SessionKind> {
        prop_oneof![
            Just(SessionKind::Work),
            Just(SessionKind::ShortBreak),
            Just(SessionKind::LongBreak)
        ]
    }

    fn arb_time() -> impl Strategy<Value = DateTime<Utc>> {
        (0i64..4_102_444_800, 0u32..1_000_000_000)
            .prop_map(|(secs, nanos)| Utc.timestamp_opt(secs, nanos).single().unwrap_or_default())
    }

    proptest! {
        #[test]
        fn prop_serialization_roundtrip(
            kind in arb_kind(),
            planned in 1u64..86_400_000,
            start in arb_time(),
            end in proptest::option::of(arb_time()),
            since in proptest::option::of(arb_time()),
            interruptions in 0u32..1_000,
            elapsed in 0u64..86_400_000,
            completed in any::<bool>(),
        ) {
            let mut record = SessionRecord::with_id("work-prop", kind, planned, start);
            record.end_time = end;
            record.running_since = since;
            record.target_completion_time = since.map(|s| add_ms(s, planned));
            record.interruptions = interruptions;
            record.accumulated_elapsed_ms = elapsed;
            record.completed = completed;

            let bytes = serde_json::to_vec(&record).unwrap();
            let back: SessionRecord = serde_json::from_slice(&bytes).unwrap();
            prop_assert_eq!(back, record);
        }
    }
}
