//! Booking limits
//!
//! Each limit caps booked slots per bucket. Daily buckets align to calendar
//! days, weekly buckets to ISO weeks (Monday start, spanning year
//! boundaries via the ISO week of Dec 28), monthly buckets are nominal 30
//! days, and interval limits use a single bucket. Caps are stored in slots
//! (`hours * 3600 / granularity`); `inc` and `dec` are symmetric so a
//! rollback restores the exact prior state.

use chrono::{DateTime, Datelike, Duration, NaiveDate, Utc};
use slotplan_core::{LimitPeriod, LimitSpec, TimeInterval};

const DAY_SECONDS: i64 = 86_400;

/// A single capped counter vector
#[derive(Clone, Debug)]
pub struct Limit {
    period: LimitPeriod,
    /// Cap per bucket, in slots
    cap: i64,
    upper: bool,
    /// Arena index of the resource this limit is scoped to, if any
    resource: Option<u32>,
    interval: TimeInterval,
    counters: Vec<i64>,
    axis_start: DateTime<Utc>,
    granularity: i64,
}

impl Limit {
    pub fn new(
        spec: &LimitSpec,
        resource: Option<u32>,
        project_span: TimeInterval,
        axis_start: DateTime<Utc>,
        granularity: u32,
    ) -> Self {
        let interval = spec.interval.unwrap_or(project_span);
        let granularity = i64::from(granularity);
        let slot_hours = granularity as f64 / 3600.0;
        let cap = (spec.hours / slot_hours) as i64;

        let total = interval.seconds().max(0);
        let period_seconds = match spec.period {
            LimitPeriod::Daily => DAY_SECONDS,
            LimitPeriod::Weekly => 7 * DAY_SECONDS,
            LimitPeriod::Monthly => 30 * DAY_SECONDS,
            LimitPeriod::Interval => total.max(1),
        };
        let buckets = (total / period_seconds) as usize + 2;

        Self {
            period: spec.period,
            cap,
            upper: spec.upper,
            resource,
            interval,
            counters: vec![0; buckets],
            axis_start,
            granularity,
        }
    }

    /// Bucket index for a project slot, or `None` when the slot falls
    /// outside the limit's interval
    fn bucket(&self, idx: i64) -> Option<usize> {
        let when = self.axis_start + Duration::seconds(idx * self.granularity);
        if !self.interval.contains(when) {
            return None;
        }

        let raw = match self.period {
            LimitPeriod::Daily => {
                (when.date_naive() - self.interval.start.date_naive()).num_days()
            }
            LimitPeriod::Weekly => iso_week_offset(self.interval.start.date_naive(), when.date_naive()),
            LimitPeriod::Monthly => {
                (when - self.interval.start).num_seconds() / (30 * DAY_SECONDS)
            }
            LimitPeriod::Interval => 0,
        };

        if raw < 0 || raw as usize >= self.counters.len() {
            None
        } else {
            Some(raw as usize)
        }
    }

    pub fn inc(&mut self, idx: i64, resource: Option<u32>) {
        if self.resource.is_some() && self.resource != resource {
            return;
        }
        if let Some(b) = self.bucket(idx) {
            self.counters[b] += 1;
        }
    }

    pub fn dec(&mut self, idx: i64, resource: Option<u32>) {
        if self.resource.is_some() && self.resource != resource {
            return;
        }
        if let Some(b) = self.bucket(idx) {
            self.counters[b] -= 1;
        }
    }

    /// Whether a booking at `idx` would stay within the limit.
    ///
    /// A limit whose upper/lower sense differs from the query, or whose
    /// resource scope does not match, never objects.
    pub fn ok(&self, idx: i64, upper: bool, resource: Option<u32>) -> bool {
        if self.upper != upper {
            return true;
        }
        if self.resource.is_some() && self.resource != resource {
            return true;
        }
        match self.bucket(idx) {
            None => true,
            Some(b) => {
                if self.upper {
                    self.counters[b] < self.cap
                } else {
                    self.counters[b] >= self.cap
                }
            }
        }
    }

    pub fn reset(&mut self) {
        self.counters.iter_mut().for_each(|c| *c = 0);
    }

    pub fn cap_slots(&self) -> i64 {
        self.cap
    }
}

/// ISO-week distance between two dates, Monday-aligned.
///
/// Crossing a year boundary counts the weeks remaining in the start year
/// (taken from the ISO week of Dec 28, always in the last ISO week) plus
/// full 52-week blocks for any whole years in between.
fn iso_week_offset(start: NaiveDate, date: NaiveDate) -> i64 {
    let start_iso = start.iso_week();
    let date_iso = date.iso_week();

    if date_iso.year() == start_iso.year() {
        i64::from(date_iso.week()) - i64::from(start_iso.week())
    } else {
        let weeks_in_start_year = NaiveDate::from_ymd_opt(start.year(), 12, 28)
            .map_or(52, |d| i64::from(d.iso_week().week()));
        (weeks_in_start_year - i64::from(start_iso.week()) + 1)
            + (i64::from(date_iso.week()) - 1)
            + 52 * (i64::from(date_iso.year()) - i64::from(start_iso.year()) - 1)
    }
}

/// All limits declared on one entity
#[derive(Clone, Debug, Default)]
pub struct LimitSet {
    limits: Vec<Limit>,
}

impl LimitSet {
    pub fn push(&mut self, limit: Limit) {
        self.limits.push(limit);
    }

    pub fn is_empty(&self) -> bool {
        self.limits.is_empty()
    }

    pub fn ok(&self, idx: i64, upper: bool, resource: Option<u32>) -> bool {
        self.limits.iter().all(|l| l.ok(idx, upper, resource))
    }

    pub fn inc(&mut self, idx: i64, resource: Option<u32>) {
        for limit in &mut self.limits {
            limit.inc(idx, resource);
        }
    }

    pub fn dec(&mut self, idx: i64, resource: Option<u32>) {
        for limit in &mut self.limits {
            limit.dec(idx, resource);
        }
    }

    pub fn reset(&mut self) {
        self.limits.iter_mut().for_each(Limit::reset);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use pretty_assertions::assert_eq;

    fn ts(y: i32, mo: u32, d: u32, h: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, mo, d, h, 0, 0).unwrap()
    }

    fn span(start: DateTime<Utc>, end: DateTime<Utc>) -> TimeInterval {
        TimeInterval::new(start, end)
    }

    fn idx_of(start: DateTime<Utc>, when: DateTime<Utc>) -> i64 {
        (when - start).num_seconds() / 3600
    }

    #[test]
    fn daily_cap_converts_hours_to_slots() {
        let start = ts(2025, 6, 2, 0);
        let spec = LimitSpec::daily_max(4.0);
        let limit = Limit::new(&spec, None, span(start, ts(2025, 6, 13, 0)), start, 3600);
        assert_eq!(limit.cap_slots(), 4);
    }

    #[test]
    fn daily_buckets_align_to_calendar_days() {
        let start = ts(2025, 6, 2, 0);
        let spec = LimitSpec::daily_max(4.0);
        let mut limit = Limit::new(&spec, None, span(start, ts(2025, 6, 13, 0)), start, 3600);

        // Fill Monday June 2: four bookings hit the cap
        for h in 9..13 {
            let idx = idx_of(start, ts(2025, 6, 2, h));
            assert!(limit.ok(idx, true, None));
            limit.inc(idx, None);
        }
        assert!(!limit.ok(idx_of(start, ts(2025, 6, 2, 14)), true, None));
        // Tuesday is a fresh bucket
        assert!(limit.ok(idx_of(start, ts(2025, 6, 3, 9)), true, None));
    }

    #[test]
    fn weekly_buckets_reset_on_monday() {
        let start = ts(2025, 6, 4, 0); // Wednesday
        let spec = LimitSpec::weekly_max(2.0);
        let mut limit = Limit::new(&spec, None, span(start, ts(2025, 6, 30, 0)), start, 3600);

        limit.inc(idx_of(start, ts(2025, 6, 5, 9)), None); // Thursday
        limit.inc(idx_of(start, ts(2025, 6, 6, 9)), None); // Friday
        assert!(!limit.ok(idx_of(start, ts(2025, 6, 6, 10)), true, None));
        // Monday June 9 is the next ISO week even though fewer than seven
        // days have elapsed since the interval start
        assert!(limit.ok(idx_of(start, ts(2025, 6, 9, 9)), true, None));
    }

    #[test]
    fn iso_week_offset_spans_year_boundary() {
        // Mon 2025-12-29 belongs to ISO week 1 of 2026
        let start = NaiveDate::from_ymd_opt(2025, 12, 22).unwrap(); // ISO week 52
        let next = NaiveDate::from_ymd_opt(2025, 12, 29).unwrap();
        assert_eq!(iso_week_offset(start, next), 1);

        let later = NaiveDate::from_ymd_opt(2026, 1, 12).unwrap(); // ISO week 3
        assert_eq!(iso_week_offset(start, later), 3);
    }

    #[test]
    fn inc_dec_are_symmetric() {
        let start = ts(2025, 6, 2, 0);
        let spec = LimitSpec::daily_max(1.0);
        let mut limit = Limit::new(&spec, None, span(start, ts(2025, 6, 13, 0)), start, 3600);

        let idx = idx_of(start, ts(2025, 6, 2, 9));
        limit.inc(idx, None);
        assert!(!limit.ok(idx, true, None));
        limit.dec(idx, None);
        assert!(limit.ok(idx, true, None));
    }

    #[test]
    fn resource_scoped_limit_ignores_other_resources() {
        let start = ts(2025, 6, 2, 0);
        let spec = LimitSpec::daily_max(1.0).for_resource("qa");
        let mut limit = Limit::new(&spec, Some(3), span(start, ts(2025, 6, 13, 0)), start, 3600);

        let idx = idx_of(start, ts(2025, 6, 2, 9));
        limit.inc(idx, Some(5)); // different resource, not counted
        assert!(limit.ok(idx, true, Some(3)));

        limit.inc(idx, Some(3));
        assert!(!limit.ok(idx, true, Some(3)));
        // Queries for other resources are unaffected
        assert!(limit.ok(idx, true, Some(5)));
        assert!(limit.ok(idx, true, None));
    }

    #[test]
    fn lower_limits_check_the_opposite_direction() {
        let start = ts(2025, 6, 2, 0);
        let spec = LimitSpec::new(LimitPeriod::Daily, false, 2.0);
        let mut limit = Limit::new(&spec, None, span(start, ts(2025, 6, 13, 0)), start, 3600);

        let idx = idx_of(start, ts(2025, 6, 2, 9));
        // Upper queries never object to a lower limit
        assert!(limit.ok(idx, true, None));
        // Lower query fails until the bucket reaches the floor
        assert!(!limit.ok(idx, false, None));
        limit.inc(idx, None);
        limit.inc(idx, None);
        assert!(limit.ok(idx, false, None));
    }

    #[test]
    fn out_of_interval_slots_are_unconstrained() {
        let start = ts(2025, 6, 2, 0);
        let spec = LimitSpec::daily_max(1.0).over(span(ts(2025, 6, 4, 0), ts(2025, 6, 5, 0)));
        let limit = Limit::new(&spec, None, span(start, ts(2025, 6, 13, 0)), start, 3600);

        assert!(limit.ok(idx_of(start, ts(2025, 6, 2, 9)), true, None));
        assert!(limit.ok(idx_of(start, ts(2025, 6, 10, 9)), true, None));
    }

    #[test]
    fn interval_limit_uses_one_bucket() {
        let start = ts(2025, 6, 2, 0);
        let spec = LimitSpec::maximum(2.0);
        let mut limit = Limit::new(&spec, None, span(start, ts(2025, 6, 13, 0)), start, 3600);

        limit.inc(idx_of(start, ts(2025, 6, 2, 9)), None);
        limit.inc(idx_of(start, ts(2025, 6, 10, 9)), None);
        assert!(!limit.ok(idx_of(start, ts(2025, 6, 12, 9)), true, None));
    }
}
