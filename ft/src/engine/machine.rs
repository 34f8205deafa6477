//! Timer state machine transitions
//!
//! Pure functions from the current active record (if any) to the next one.
//! Nothing here touches storage, timers or the clock; the controller decides
//! when to call them and what to do with the result.
//!
//! ```text
//! Idle -> Running -> {Paused, Completed, Cancelled}
//!         Paused  -> {Running, Cancelled}
//! ```

use chrono::{DateTime, Utc};

use crate::clock::signed_ms;
use crate::domain::{SessionKind, SessionRecord, SessionStatus, TimerState};
use crate::error::{TimerError, TimerResult};

/// How to treat a completion signal from the scheduler
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalVerdict {
    /// Within tolerance of the target: complete the session
    Accept,
    /// Session is running but the signal is far from its target
    Stale,
    /// No running session with that id
    Ignore,
}

fn require<'a>(
    active: Option<&'a SessionRecord>,
    operation: &'static str,
    allowed: &[SessionStatus],
) -> TimerResult<&'a SessionRecord> {
    match active {
        Some(record) if allowed.contains(&record.status) => Ok(record),
        other => Err(TimerError::InvalidState {
            operation,
            state: TimerState::of(other),
        }),
    }
}

/// Create a running session; the slot must be free
pub fn begin(
    active: Option<&SessionRecord>,
    kind: SessionKind,
    planned_duration_ms: u64,
    now: DateTime<Utc>,
) -> TimerResult<SessionRecord> {
    if planned_duration_ms == 0 {
        return Err(TimerError::InvalidDuration);
    }
    if let Some(record) = active
        && !record.is_terminal()
    {
        return Err(TimerError::SessionAlreadyActive(record.id.clone()));
    }
    Ok(SessionRecord::new(kind, planned_duration_ms, now))
}

/// Running -> Paused, freezing elapsed time
pub fn pause(active: Option<&SessionRecord>, now: DateTime<Utc>) -> TimerResult<SessionRecord> {
    let mut record = require(active, "pause", &[SessionStatus::Running])?.clone();
    record.mark_paused(now);
    Ok(record)
}

/// Paused -> Running, with a fresh target of `now + remaining`
pub fn resume(active: Option<&SessionRecord>, now: DateTime<Utc>) -> TimerResult<SessionRecord> {
    let mut record = require(active, "resume", &[SessionStatus::Paused])?.clone();
    record.mark_running(now);
    Ok(record)
}

/// Running | Paused -> Cancelled
pub fn cancel(active: Option<&SessionRecord>, now: DateTime<Utc>) -> TimerResult<SessionRecord> {
    let mut record = require(active, "cancel", &[SessionStatus::Running, SessionStatus::Paused])?.clone();
    record.mark_cancelled(now);
    Ok(record)
}

/// Running -> Completed with the given end time and elapsed value
pub fn complete(active: Option<&SessionRecord>, end: DateTime<Utc>, elapsed_ms: u64) -> TimerResult<SessionRecord> {
    let mut record = require(active, "complete", &[SessionStatus::Running])?.clone();
    record.mark_completed(end, elapsed_ms);
    Ok(record)
}

/// Running -> Paused at an explicit elapsed value (crash recovery)
pub fn freeze_after_crash(active: Option<&SessionRecord>, elapsed_ms: u64) -> TimerResult<SessionRecord> {
    let mut record = require(active, "recover", &[SessionStatus::Running])?.clone();
    record.mark_paused_at_elapsed(elapsed_ms.min(record.planned_duration_ms));
    Ok(record)
}

/// Increment the interruption count of a running session
pub fn record_interruption(active: Option<&SessionRecord>) -> TimerResult<SessionRecord> {
    let mut record = require(active, "record an interruption", &[SessionStatus::Running])?.clone();
    record.increment_interruptions();
    Ok(record)
}

/// Judge a completion signal against the active session
///
/// Accepted when `|fired_at - target| <= tolerance_ms`. A signal for any
/// other session, or for a session that is no longer running, is ignored.
pub fn judge_completion_signal(
    active: Option<&SessionRecord>,
    session_id: &str,
    fired_at: DateTime<Utc>,
    tolerance_ms: u64,
) -> SignalVerdict {
    let Some(record) = active.filter(|r| r.id == session_id && r.is_running()) else {
        return SignalVerdict::Ignore;
    };
    let Some(target) = record.target_completion_time else {
        return SignalVerdict::Stale;
    };
    if signed_ms(fired_at, target).unsigned_abs() <= tolerance_ms {
        SignalVerdict::Accept
    } else {
        SignalVerdict::Stale
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::add_ms;
    use crate::domain::SessionHistory;
    use chrono::TimeZone;
    use proptest::prelude::*;

    const PLAN_MS: u64 = 1_500_000;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 10, 15, 9, 0, 0).unwrap()
    }

    fn running() -> SessionRecord {
        begin(None, SessionKind::Work, PLAN_MS, t0()).unwrap()
    }

    #[test]
    fn test_begin_rejects_zero_duration() {
        assert!(matches!(
            begin(None, SessionKind::Work, 0, t0()),
            Err(TimerError::InvalidDuration)
        ));
    }

    #[test]
    fn test_begin_rejects_occupied_slot() {
        let active = running();
        let err = begin(Some(&active), SessionKind::ShortBreak, 300_000, t0()).unwrap_err();
        assert!(matches!(err, TimerError::SessionAlreadyActive(id) if id == active.id));
    }

    #[test]
    fn test_invalid_transitions() {
        assert!(matches!(
            pause(None, t0()),
            Err(TimerError::InvalidState {
                state: TimerState::Idle,
                ..
            })
        ));
        assert!(matches!(
            resume(Some(&running()), t0()),
            Err(TimerError::InvalidState {
                state: TimerState::Running,
                ..
            })
        ));

        let paused = pause(Some(&running()), t0()).unwrap();
        assert!(pause(Some(&paused), t0()).is_err());
        assert!(record_interruption(Some(&paused)).is_err());
        assert!(complete(Some(&paused), t0(), 0).is_err());

        let cancelled = cancel(Some(&paused), t0()).unwrap();
        assert!(cancel(Some(&cancelled), t0()).is_err());
        assert!(resume(Some(&cancelled), t0()).is_err());
    }

    #[test]
    fn test_drift_compensation_across_pause() {
        let record = running();
        let paused_at = add_ms(t0(), 400_000);
        let paused = pause(Some(&record), paused_at).unwrap();
        let remaining_before = paused.remaining_at(paused_at);

        // Ten minutes of wall time pass while paused
        let resumed_at = add_ms(paused_at, 600_000);
        let resumed = resume(Some(&paused), resumed_at).unwrap();

        assert_eq!(resumed.remaining_at(resumed_at), remaining_before);
        assert_eq!(
            resumed.target_completion_time,
            Some(add_ms(resumed_at, remaining_before))
        );
    }

    #[test]
    fn test_repeated_pause_resume_does_not_skew() {
        let mut record = running();
        let mut now = t0();
        for _ in 0..10 {
            now = add_ms(now, 60_000);
            record = pause(Some(&record), now).unwrap();
            now = add_ms(now, 37_123);
            record = resume(Some(&record), now).unwrap();
        }
        assert_eq!(record.elapsed_at(now), 600_000);
        assert_eq!(record.target_completion_time, Some(add_ms(now, PLAN_MS - 600_000)));
    }

    #[test]
    fn test_record_interruption_keeps_state() {
        let record = record_interruption(Some(&running())).unwrap();
        assert_eq!(record.interruptions, 1);
        assert_eq!(record.status, SessionStatus::Running);
    }

    #[test]
    fn test_judge_completion_signal() {
        let record = running();
        let target = add_ms(t0(), PLAN_MS);

        let judge = |fired_at| judge_completion_signal(Some(&record), &record.id, fired_at, 60_000);
        assert_eq!(judge(add_ms(target, 2_000)), SignalVerdict::Accept);
        assert_eq!(judge(add_ms(target, 60_000)), SignalVerdict::Accept);
        assert_eq!(judge(add_ms(target, 60_001)), SignalVerdict::Stale);
        assert_eq!(judge(add_ms(t0(), 1_000)), SignalVerdict::Stale);

        assert_eq!(
            judge_completion_signal(Some(&record), "work-other", target, 60_000),
            SignalVerdict::Ignore
        );
        let cancelled = cancel(Some(&record), t0()).unwrap();
        assert_eq!(
            judge_completion_signal(Some(&cancelled), &record.id, target, 60_000),
            SignalVerdict::Ignore
        );
    }

    #[test]
    fn test_freeze_after_crash() {
        let frozen = freeze_after_crash(Some(&running()), 600_000).unwrap();
        assert_eq!(frozen.status, SessionStatus::Paused);
        assert_eq!(frozen.accumulated_elapsed_ms, 600_000);
        assert!(frozen.end_time.is_none());
        assert!(frozen.target_completion_time.is_none());
    }

    proptest! {
        #[test]
        fn test_start_then_cancel_keeps_no_elapsed_time(planned in 1..u32::MAX as u64) {
            let record = begin(None, SessionKind::Work, planned, t0()).unwrap();
            let cancelled = cancel(Some(&record), t0()).unwrap();

            prop_assert_eq!(cancelled.status, SessionStatus::Cancelled);
            prop_assert_eq!(cancelled.accumulated_elapsed_ms, 0);
            prop_assert_eq!(cancelled.end_time, Some(t0()));
            prop_assert!(!cancelled.completed);

            let mut history = SessionHistory::new();
            prop_assert!(history.insert(cancelled, 100));
            prop_assert_eq!(history.len(), 1);
        }
    }
}
