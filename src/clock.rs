// =============================================================================
// Clock — pluggable time source
// =============================================================================
//
// Day-rollover comparisons use the process's **local date**. Tests drive a
// manual clock to cross date boundaries deterministically.
// =============================================================================

use chrono::{DateTime, Local, NaiveDate, Utc};
use parking_lot::RwLock;

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;

    /// The local calendar date, used for daily counter resets.
    fn local_date(&self) -> NaiveDate;
}

/// Wall-clock implementation used in production.
#[derive(Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }

    fn local_date(&self) -> NaiveDate {
        Local::now().date_naive()
    }
}

/// A settable clock for tests.
#[derive(Debug)]
pub struct ManualClock {
    now: RwLock<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            now: RwLock::new(now),
        }
    }

    pub fn set(&self, now: DateTime<Utc>) {
        *self.now.write() = now;
    }

    pub fn advance(&self, duration: chrono::Duration) {
        let mut now = self.now.write();
        *now += duration;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.read()
    }

    fn local_date(&self) -> NaiveDate {
        // The manual clock treats its UTC instant as local time; tests only
        // care about relative day boundaries.
        self.now.read().date_naive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn manual_clock_advances() {
        let clock = ManualClock::new(Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap());
        let d1 = clock.local_date();
        clock.advance(chrono::Duration::hours(13));
        let d2 = clock.local_date();
        assert_ne!(d1, d2, "crossing midnight must change the date");
    }

    #[test]
    fn system_clock_is_monotonic_enough() {
        let clock = SystemClock;
        let a = clock.now();
        let b = clock.now();
        assert!(b >= a);
    }
}
