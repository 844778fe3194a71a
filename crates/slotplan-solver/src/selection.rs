//! Alternative-resource routing
//!
//! A task may name an alternative resource set next to its primary one.
//! At the first booking attempt both paths are simulated forward from the
//! current slot and the set that would finish the effort earlier wins; ties
//! go to the primary set. The choice is sticky for the rest of the task.

use chrono::{DateTime, Duration, Utc};
use tracing::debug;

use crate::driver::ScenarioRun;
use crate::graph::AllocPlan;

/// Pick the resource set to book for the task
pub(crate) fn select_resources(
    run: &ScenarioRun,
    t: usize,
    alloc: &AllocPlan,
    effort: f64,
) -> Vec<usize> {
    if alloc.primary.is_empty() {
        return alloc.alternatives.clone();
    }
    if alloc.alternatives.is_empty() {
        return alloc.primary.clone();
    }

    let from = run.states[t].cur.unwrap_or(0).max(0);
    let primary_end = estimate_completion(run, &alloc.primary, effort, from);
    let alternative_end = estimate_completion(run, &alloc.alternatives, effort, from);

    let use_alternative = match (primary_end, alternative_end) {
        (Some(p), Some(a)) => a < p,
        (None, Some(_)) => true,
        _ => false,
    };

    if use_alternative {
        debug!(
            task = %run.tasks.nodes[t].path,
            "alternative resources finish earlier"
        );
        alloc.alternatives.clone()
    } else {
        alloc.primary.clone()
    }
}

/// Walk the first resource's availability forward, accumulating one slot's
/// effort per bookable slot, and return the finish timestamp
fn estimate_completion(
    run: &ScenarioRun,
    set: &[usize],
    effort: f64,
    from: i64,
) -> Option<DateTime<Utc>> {
    let resource = *set.first()?;
    if effort <= 0.0 {
        return None;
    }

    let g = run.cal.axis().granularity();
    let effort_per_slot = g as f64 / 3600.0 * run.rplans[resource].efficiency;
    if effort_per_slot <= 0.0 {
        return None;
    }

    let size = run.cal.axis().size() as i64;
    let mut remaining = effort;
    let mut idx = from;
    while remaining > 1e-9 && idx < size {
        if run.resource_available(resource, idx) {
            remaining -= effort_per_slot;
        }
        idx += 1;
    }

    if remaining > 1e-9 {
        return None;
    }
    Some(run.cal.axis().date_of(idx - 1) + Duration::seconds(g))
}
