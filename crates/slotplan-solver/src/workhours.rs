//! Working-hours evaluation
//!
//! Evaluates a weekly plan for a single instant, converting the UTC slot
//! time to the entity's local timezone first. Ranges that wrap past
//! midnight are honored both on their own weekday and as the early-morning
//! tail of the following day.

use chrono::{DateTime, Datelike, Timelike, Utc};
use chrono_tz::Tz;
use slotplan_core::{ScheduleError, WeekPlan};

/// Resolve an IANA timezone name
pub fn resolve_tz(name: &str) -> Result<Tz, ScheduleError> {
    name.parse()
        .map_err(|_| ScheduleError::InvalidTimezone(name.to_string()))
}

/// Weekday index (0 = Monday) and minute of day, in local time
fn local_parts(when: DateTime<Utc>, tz: Option<Tz>) -> (usize, u16) {
    match tz {
        Some(tz) => {
            let local = when.with_timezone(&tz);
            (
                local.weekday().num_days_from_monday() as usize,
                (local.hour() * 60 + local.minute()) as u16,
            )
        }
        None => (
            when.weekday().num_days_from_monday() as usize,
            (when.hour() * 60 + when.minute()) as u16,
        ),
    }
}

/// Whether the instant falls within the plan's working time
pub fn on_shift(plan: &WeekPlan, when: DateTime<Utc>, tz: Option<Tz>) -> bool {
    let (weekday, minute) = local_parts(when, tz);

    for range in plan.ranges(weekday) {
        if range.crosses_midnight() {
            // Working time runs from start to midnight; the remainder
            // belongs to the next day's early morning
            if minute >= range.start || minute < range.end {
                return true;
            }
        } else if range.start <= minute && minute < range.end {
            return true;
        }
    }

    // Early-morning tail of a cross-midnight range on the previous weekday
    let prev = (weekday + 6) % 7;
    plan.ranges(prev)
        .iter()
        .any(|r| r.crosses_midnight() && minute < r.end)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use slotplan_core::TimeRange;

    fn ts(y: i32, mo: u32, d: u32, h: u32, mi: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, mo, d, h, mi, 0).unwrap()
    }

    #[test]
    fn standard_week_in_utc() {
        let plan = WeekPlan::standard();
        // Monday 2025-05-12
        assert!(on_shift(&plan, ts(2025, 5, 12, 9, 0), None));
        assert!(on_shift(&plan, ts(2025, 5, 12, 16, 59), None));
        assert!(!on_shift(&plan, ts(2025, 5, 12, 17, 0), None));
        assert!(!on_shift(&plan, ts(2025, 5, 12, 8, 59), None));
        // Sunday
        assert!(!on_shift(&plan, ts(2025, 5, 11, 12, 0), None));
    }

    #[test]
    fn tokyo_hours_evaluate_in_local_time() {
        // 09:00-18:00 JST is 00:00-09:00 UTC
        let plan = WeekPlan::empty().weekdays(0..=4, &[TimeRange::new(9, 0, 18, 0)]);
        let tz = resolve_tz("Asia/Tokyo").unwrap();

        // Thursday 2025-05-01 00:00 UTC = 09:00 JST
        assert!(on_shift(&plan, ts(2025, 5, 1, 0, 0), Some(tz)));
        assert!(on_shift(&plan, ts(2025, 5, 1, 8, 59), Some(tz)));
        assert!(!on_shift(&plan, ts(2025, 5, 1, 9, 0), Some(tz)));
        // 23:00 UTC Wednesday = 08:00 JST Thursday, before shift
        assert!(!on_shift(&plan, ts(2025, 4, 30, 23, 0), Some(tz)));
    }

    #[test]
    fn new_york_hours_respect_dst() {
        // 09:00-17:00 local; in May (EDT, UTC-4) that is 13:00-21:00 UTC
        let plan = WeekPlan::empty().weekdays(0..=4, &[TimeRange::new(9, 0, 17, 0)]);
        let tz = resolve_tz("America/New_York").unwrap();

        assert!(on_shift(&plan, ts(2025, 5, 1, 13, 0), Some(tz)));
        assert!(!on_shift(&plan, ts(2025, 5, 1, 12, 59), Some(tz)));
        // In January (EST, UTC-5) the same shift is 14:00-22:00 UTC
        assert!(!on_shift(&plan, ts(2025, 1, 16, 13, 30), Some(tz)));
        assert!(on_shift(&plan, ts(2025, 1, 16, 14, 30), Some(tz)));
    }

    #[test]
    fn cross_midnight_range_wraps() {
        // Night shift 22:00-06:00, Monday through Friday
        let plan = WeekPlan::empty().weekdays(0..=4, &[TimeRange::new(22, 0, 6, 0)]);

        // Monday 23:00 is inside
        assert!(on_shift(&plan, ts(2025, 5, 12, 23, 0), None));
        // Tuesday 05:00 is the tail of Monday's shift
        assert!(on_shift(&plan, ts(2025, 5, 13, 5, 0), None));
        // Tuesday 06:00 is past the tail
        assert!(!on_shift(&plan, ts(2025, 5, 13, 6, 0), None));
        // Monday 05:00 has no preceding Sunday shift
        assert!(!on_shift(&plan, ts(2025, 5, 12, 5, 0), None));
        // Saturday 05:00 is the tail of Friday's shift
        assert!(on_shift(&plan, ts(2025, 5, 17, 5, 0), None));
    }

    #[test]
    fn unknown_timezone_is_rejected() {
        assert!(resolve_tz("Mars/Olympus").is_err());
        assert!(resolve_tz("Europe/Berlin").is_ok());
    }

    #[test]
    fn empty_plan_is_never_on_shift() {
        let plan = WeekPlan::empty();
        assert!(!on_shift(&plan, ts(2025, 5, 12, 12, 0), None));
    }
}
