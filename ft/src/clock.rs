//! Wall-clock abstraction
//!
//! Every time read in the engine goes through an injected [`Clock`] so that
//! tests can drive time explicitly. Durations are integer milliseconds.

use std::sync::{Arc, Mutex};

use chrono::{DateTime, TimeDelta, Utc};

/// Source of the current wall-clock time
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// The real system clock
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A clock that only moves when told to
///
/// Clones share the same underlying time.
#[derive(Debug, Clone)]
pub struct ManualClock {
    now: Arc<Mutex<DateTime<Utc>>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Arc::new(Mutex::new(start)),
        }
    }

    /// Move the clock forward by `ms` milliseconds
    pub fn advance_ms(&self, ms: u64) {
        let mut now = self.now.lock().unwrap_or_else(|e| e.into_inner());
        *now = add_ms(*now, ms);
    }

    /// Jump to an absolute time
    pub fn set(&self, at: DateTime<Utc>) {
        *self.now.lock().unwrap_or_else(|e| e.into_inner()) = at;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// `at + ms`, saturating at the maximum representable time
pub fn add_ms(at: DateTime<Utc>, ms: u64) -> DateTime<Utc> {
    let delta = i64::try_from(ms)
        .ok()
        .and_then(TimeDelta::try_milliseconds)
        .unwrap_or(TimeDelta::MAX);
    at.checked_add_signed(delta).unwrap_or(DateTime::<Utc>::MAX_UTC)
}

/// Milliseconds from `from` to `to`, zero if `to` is not after `from`
pub fn ms_between(from: DateTime<Utc>, to: DateTime<Utc>) -> u64 {
    u64::try_from((to - from).num_milliseconds()).unwrap_or(0)
}

/// Signed milliseconds `a - b`
pub fn signed_ms(a: DateTime<Utc>, b: DateTime<Utc>) -> i64 {
    (a - b).num_milliseconds()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 10, 15, 9, 0, 0).unwrap()
    }

    #[test]
    fn test_manual_clock_advances_shared_time() {
        let clock = ManualClock::new(t0());
        let other = clock.clone();
        clock.advance_ms(1_500);
        assert_eq!(other.now(), t0() + TimeDelta::milliseconds(1_500));
    }

    #[test]
    fn test_ms_between_never_negative() {
        let later = add_ms(t0(), 42);
        assert_eq!(ms_between(t0(), later), 42);
        assert_eq!(ms_between(later, t0()), 0);
        assert_eq!(signed_ms(t0(), later), -42);
    }

    #[test]
    fn test_add_ms_saturates() {
        assert_eq!(add_ms(t0(), u64::MAX), DateTime::<Utc>::MAX_UTC);
    }
}
