//! Time source injected into every engine.

use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Manually advanced clock for tests and replays.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock();
        *now += by;
    }

    pub fn set(&self, to: DateTime<Utc>) {
        *self.now.lock() = to;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock()
    }
}

/// `now`, bumped just past `floor` when the clock has not moved beyond it.
///
/// Ordering of reviews and decisions is by timestamp, so a new entry must
/// sort strictly after the entry it follows.
pub fn monotonic_after(now: DateTime<Utc>, floor: Option<DateTime<Utc>>) -> DateTime<Utc> {
    match floor {
        Some(f) if f >= now => f + Duration::milliseconds(1),
        _ => now,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_monotonic_after() {
        let t0 = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
        assert_eq!(monotonic_after(t0, None), t0);
        assert_eq!(monotonic_after(t0, Some(t0 - Duration::seconds(1))), t0);
        assert_eq!(
            monotonic_after(t0, Some(t0)),
            t0 + Duration::milliseconds(1)
        );
        assert_eq!(
            monotonic_after(t0, Some(t0 + Duration::seconds(5))),
            t0 + Duration::seconds(5) + Duration::milliseconds(1)
        );
    }

    #[test]
    fn test_manual_clock_advances() {
        let t0 = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
        let clock = ManualClock::new(t0);
        clock.advance(Duration::minutes(2));
        assert_eq!(clock.now(), t0 + Duration::minutes(2));
    }
}
