//! Parallel scenario batch
//!
//! Scenarios share no mutable state: every run clones its limits and
//! builds its own scoreboards, so independent scenarios can be scheduled
//! on separate workers. Results are reassembled in declaration order and
//! the first failing scenario (by that order) decides the error.

use rayon::prelude::*;
use slotplan_core::{CancelFlag, Project, Schedule, ScheduleError, Scheduler};

use crate::SlotScheduler;

/// Schedule every active scenario in parallel
pub fn schedule_scenarios(project: &Project, cancel: &CancelFlag) -> Result<Schedule, ScheduleError> {
    let active: Vec<usize> = project
        .scenarios
        .iter()
        .enumerate()
        .filter(|(_, s)| s.active)
        .map(|(i, _)| i)
        .collect();

    let results: Vec<_> = active
        .par_iter()
        .map(|&idx| SlotScheduler::new().schedule_scenario(project, idx, cancel))
        .collect();

    let mut scenarios = Vec::with_capacity(results.len());
    for result in results {
        scenarios.push(result?);
    }
    Ok(Schedule { scenarios })
}
