//! Daily gate for pair recalculation.

use chrono::{DateTime, NaiveDate, Timelike, Utc};

/// Fires once per UTC calendar day, on the first bar at or after `hour`.
#[derive(Debug, Clone)]
pub struct RecalcSchedule {
    hour: u32,
    last_run: Option<NaiveDate>,
}

impl RecalcSchedule {
    pub fn new(hour: u32) -> Self {
        Self {
            hour,
            last_run: None,
        }
    }

    /// Check the gate for a bar at `now`, consuming the day's slot if it fires.
    pub fn poll(&mut self, now: DateTime<Utc>) -> bool {
        let today = now.date_naive();
        if now.hour() < self.hour || self.last_run == Some(today) {
            return false;
        }
        self.last_run = Some(today);
        true
    }

    /// Record a run that happened outside the gate (e.g., a forced recalculation).
    pub fn mark_run(&mut self, now: DateTime<Utc>) {
        self.last_run = Some(now.date_naive());
    }

    pub fn last_run(&self) -> Option<NaiveDate> {
        self.last_run
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(day: u32, hour: u32, minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, day, hour, minute, 0).unwrap()
    }

    #[test]
    fn test_fires_once_per_day_after_hour() {
        let mut schedule = RecalcSchedule::new(6);

        assert!(!schedule.poll(at(4, 5, 59)));
        assert!(schedule.poll(at(4, 6, 0)));
        assert!(!schedule.poll(at(4, 6, 15)));
        assert!(!schedule.poll(at(4, 23, 0)));

        // Next day: still gated by the hour
        assert!(!schedule.poll(at(5, 2, 0)));
        assert!(schedule.poll(at(5, 9, 0)));
        assert_eq!(schedule.last_run(), Some(at(5, 9, 0).date_naive()));
    }

    #[test]
    fn test_hour_zero_fires_on_first_bar() {
        let mut schedule = RecalcSchedule::new(0);
        assert!(schedule.poll(at(4, 0, 0)));
        assert!(!schedule.poll(at(4, 0, 1)));
    }

    #[test]
    fn test_mark_run_suppresses_same_day() {
        let mut schedule = RecalcSchedule::new(0);
        schedule.mark_run(at(4, 3, 0));
        assert!(!schedule.poll(at(4, 12, 0)));
        assert!(schedule.poll(at(5, 0, 0)));
    }
}
