//! Time axis and project calendar
//!
//! Maps absolute timestamps to integer slot indices at project granularity
//! and answers whether a slot falls within the project's default working
//! time. Each slot covers the half-open interval
//! `[start + i*G, start + (i+1)*G)`.

use chrono::{DateTime, Duration, Utc};
use slotplan_core::{Leave, Project, WeekPlan};

use crate::workhours;

/// Timestamp ↔ slot-index mapping over the project span
#[derive(Clone, Debug)]
pub struct TimeAxis {
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    granularity: i64,
    size: usize,
}

impl TimeAxis {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>, granularity: u32) -> Self {
        let granularity = i64::from(granularity);
        let diff = (end - start).num_seconds();
        let size = (diff + granularity - 1).div_euclid(granularity) as usize + 1;
        Self {
            start,
            end,
            granularity,
            size,
        }
    }

    pub fn start(&self) -> DateTime<Utc> {
        self.start
    }

    pub fn end(&self) -> DateTime<Utc> {
        self.end
    }

    pub fn granularity(&self) -> i64 {
        self.granularity
    }

    /// Number of slots, including the final partial one
    pub fn size(&self) -> usize {
        self.size
    }

    pub fn last_idx(&self) -> i64 {
        self.size as i64 - 1
    }

    /// Slot index containing the timestamp; floored, not clamped
    pub fn idx_of(&self, date: DateTime<Utc>) -> i64 {
        (date - self.start).num_seconds().div_euclid(self.granularity)
    }

    /// Slot index clamped into the project span
    pub fn clamped_idx_of(&self, date: DateTime<Utc>) -> i64 {
        self.idx_of(date).clamp(0, self.last_idx())
    }

    /// Start timestamp of the slot
    pub fn date_of(&self, idx: i64) -> DateTime<Utc> {
        self.start + Duration::seconds(idx * self.granularity)
    }

    pub fn contains(&self, idx: i64) -> bool {
        idx >= 0 && idx < self.size as i64
    }
}

/// The project-level working-time predicate: the default weekly plan
/// evaluated in UTC, blanked by global leaves
#[derive(Clone, Debug)]
pub struct ProjectCalendar {
    axis: TimeAxis,
    hours: WeekPlan,
    leaves: Vec<Leave>,
}

impl ProjectCalendar {
    pub fn new(project: &Project, effective_end: DateTime<Utc>) -> Self {
        Self {
            axis: TimeAxis::new(project.start, effective_end, project.granularity),
            hours: project.working_hours.clone(),
            leaves: project.leaves.clone(),
        }
    }

    pub fn axis(&self) -> &TimeAxis {
        &self.axis
    }

    pub fn global_leaves(&self) -> &[Leave] {
        &self.leaves
    }

    /// Global leave covering the slot, if any
    pub fn leave_at(&self, idx: i64) -> Option<&Leave> {
        let date = self.axis.date_of(idx);
        self.leaves.iter().find(|l| l.interval.contains(date))
    }

    /// Whether the slot is global working time
    pub fn is_working(&self, idx: i64) -> bool {
        let date = self.axis.date_of(idx);
        if self.leaves.iter().any(|l| l.interval.contains(date)) {
            return false;
        }
        workhours::on_shift(&self.hours, date, None)
    }
}

/// Effective project end: the declared end, extended when the declared span
/// cannot fit the total leaf effort plus dependency gaps.
///
/// The heuristic assumes six productive hours per calendar day and pads the
/// estimate by 50% plus a one-week buffer.
pub fn effective_end(project: &Project) -> DateTime<Utc> {
    let leaves = project.leaf_tasks();
    if leaves.is_empty() {
        return project.end;
    }

    let mut effort_hours = 0.0;
    let mut gap_seconds: i64 = 0;
    for task in &leaves {
        effort_hours += task.effort_hours;
        for dep in &task.depends {
            gap_seconds += dep.gap_duration + dep.gap_length;
        }
    }

    let work_days = effort_hours / 6.0;
    let gap_days = gap_seconds as f64 / 86_400.0;
    let days_needed = ((work_days + gap_days) * 1.5) as i64 + 7;
    let min_end = project.start + Duration::days(days_needed);

    project.end.max(min_end)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use pretty_assertions::assert_eq;
    use slotplan_core::{LeaveKind, Task};

    fn ts(y: i32, mo: u32, d: u32, h: u32, mi: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, mo, d, h, mi, 0).unwrap()
    }

    #[test]
    fn axis_roundtrip() {
        let axis = TimeAxis::new(ts(2025, 5, 10, 0, 0), ts(2025, 5, 17, 0, 0), 3600);
        assert_eq!(axis.size(), 7 * 24 + 1);
        assert_eq!(axis.idx_of(ts(2025, 5, 10, 0, 0)), 0);
        assert_eq!(axis.idx_of(ts(2025, 5, 12, 9, 0)), 2 * 24 + 9);
        assert_eq!(axis.date_of(2 * 24 + 9), ts(2025, 5, 12, 9, 0));
    }

    #[test]
    fn axis_floors_mid_slot_dates() {
        let axis = TimeAxis::new(ts(2025, 5, 10, 0, 0), ts(2025, 5, 17, 0, 0), 3600);
        assert_eq!(axis.idx_of(ts(2025, 5, 10, 0, 59)), 0);
        assert_eq!(axis.idx_of(ts(2025, 5, 10, 1, 0)), 1);
    }

    #[test]
    fn axis_clamps_out_of_range() {
        let axis = TimeAxis::new(ts(2025, 5, 10, 0, 0), ts(2025, 5, 17, 0, 0), 3600);
        assert_eq!(axis.clamped_idx_of(ts(2025, 5, 9, 12, 0)), 0);
        assert_eq!(axis.clamped_idx_of(ts(2025, 6, 1, 0, 0)), axis.last_idx());
        assert!(!axis.contains(-1));
        assert!(axis.contains(0));
    }

    #[test]
    fn default_calendar_is_weekday_nine_to_five() {
        let project = Project::new("p", ts(2025, 5, 10, 0, 0), ts(2025, 5, 17, 0, 0));
        let cal = ProjectCalendar::new(&project, project.end);

        // Saturday May 10, 10:00
        assert!(!cal.is_working(cal.axis().idx_of(ts(2025, 5, 10, 10, 0))));
        // Monday May 12, 09:00 and 16:00
        assert!(cal.is_working(cal.axis().idx_of(ts(2025, 5, 12, 9, 0))));
        assert!(cal.is_working(cal.axis().idx_of(ts(2025, 5, 12, 16, 0))));
        // Monday May 12, 17:00 is past the working day
        assert!(!cal.is_working(cal.axis().idx_of(ts(2025, 5, 12, 17, 0))));
    }

    #[test]
    fn global_leave_blanks_working_time() {
        let mut project = Project::new("p", ts(2025, 6, 2, 0, 0), ts(2025, 6, 13, 0, 0));
        project.leaves.push(Leave::new(
            LeaveKind::Holiday,
            ts(2025, 6, 4, 0, 0),
            ts(2025, 6, 5, 0, 0),
        ));
        let cal = ProjectCalendar::new(&project, project.end);

        assert!(cal.is_working(cal.axis().idx_of(ts(2025, 6, 3, 10, 0))));
        assert!(!cal.is_working(cal.axis().idx_of(ts(2025, 6, 4, 10, 0))));
        assert!(cal.leave_at(cal.axis().idx_of(ts(2025, 6, 4, 10, 0))).is_some());
    }

    #[test]
    fn effective_end_extends_short_projects() {
        let mut project = Project::new("p", ts(2025, 1, 1, 0, 0), ts(2025, 1, 3, 0, 0));
        project.tasks.push(Task::new("big").effort_hours(120.0));

        let end = effective_end(&project);
        assert!(end > project.end);
        // 120h / 6h per day = 20 days, * 1.5 + 7 = 37 days
        assert_eq!(end, ts(2025, 1, 1, 0, 0) + Duration::days(37));
    }

    #[test]
    fn effective_end_keeps_generous_spans() {
        let mut project = Project::new("p", ts(2025, 1, 1, 0, 0), ts(2025, 12, 31, 0, 0));
        project.tasks.push(Task::new("small").effort_hours(8.0));
        assert_eq!(effective_end(&project), project.end);
    }
}
