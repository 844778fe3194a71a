//! # slotplan-solver
//!
//! Slot-scoreboard scheduling engine for slotplan.
//!
//! The solver assigns concrete start and end times to every task and
//! concrete slot bookings to every work-consuming task, honoring
//! dependencies with gap constraints, per-resource calendars and
//! timezones, partial-slot precision, and hierarchical booking limits.
//! Tasks schedule forward (ASAP) or backward (ALAP); ALAP deadlines
//! back-propagate along dependency chains so whole trains of work pack
//! against their due date.
//!
//! Scheduling one scenario is single-threaded and deterministic: the same
//! model produces byte-identical bookings on every run. Scenarios share no
//! mutable state, so [`batch::schedule_scenarios`] can run them in
//! parallel.
//!
//! ## Example
//!
//! ```rust
//! use chrono::{TimeZone, Utc};
//! use slotplan_core::{CancelFlag, Project, Resource, Scheduler, Task};
//! use slotplan_solver::SlotScheduler;
//!
//! let mut project = Project::new(
//!     "oven",
//!     Utc.with_ymd_and_hms(2025, 5, 10, 0, 0, 0).unwrap(),
//!     Utc.with_ymd_and_hms(2025, 5, 17, 0, 0, 0).unwrap(),
//! );
//! project.resources.push(Resource::new("heater"));
//! project
//!     .tasks
//!     .push(Task::new("heat").effort_hours(2.0).allocate("heater"));
//!
//! let schedule = SlotScheduler::new()
//!     .schedule_scenario(&project, 0, &CancelFlag::new())
//!     .unwrap();
//! let heat = schedule.task("heat").unwrap();
//! // The first working slot is Monday 09:00; two hours of effort end at 11:00
//! assert_eq!(heat.start, Some(Utc.with_ymd_and_hms(2025, 5, 12, 9, 0, 0).unwrap()));
//! assert_eq!(heat.end, Some(Utc.with_ymd_and_hms(2025, 5, 12, 11, 0, 0).unwrap()));
//! ```

use slotplan_core::{
    CancelFlag, Project, Schedule, ScheduleError, ScenarioSchedule, Scheduler,
};

pub mod batch;
pub mod calendar;
pub mod graph;
pub mod limits;
pub mod scoreboard;
pub mod workhours;

mod driver;
mod selection;
mod walker;

pub use driver::SlotScheduler;

/// Schedule a single scenario by index
pub fn schedule(
    project: &Project,
    scenario: usize,
    cancel: &CancelFlag,
) -> Result<ScenarioSchedule, ScheduleError> {
    SlotScheduler::new().schedule_scenario(project, scenario, cancel)
}

/// Schedule every active scenario in declaration order
pub fn schedule_all(project: &Project, cancel: &CancelFlag) -> Result<Schedule, ScheduleError> {
    SlotScheduler::new().schedule_all(project, cancel)
}
