//! Project driver
//!
//! Owns the global scheduling loop for one scenario: prepares the arenas
//! and scoreboards, back-propagates ALAP anchors, sweeps milestones, then
//! repeatedly picks the highest-ranked ready task and walks it. Containers
//! roll up as their children complete; a pass with pending tasks but no
//! ready candidate is a deadlock. Warnings accumulate on the run and are
//! returned with the scenario result.

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use slotplan_core::{
    Booking, CancelFlag, Money, Project, ResourceUsage, Schedule, ScheduleError, ScheduleWarning,
    ScenarioSchedule, ScheduledTask, Scheduler, TimeInterval, WarningKind,
};
use std::collections::{BTreeMap, HashSet};
use tracing::{debug, warn};

use crate::calendar::{self, ProjectCalendar};
use crate::graph::{self, DepEdge, Hours, ResPlan, ResourceArena, TaskArena, TaskPlan};
use crate::scoreboard::Scoreboard;
use crate::walker::TaskState;
use crate::workhours;

/// The slot-scoreboard scheduler
#[derive(Clone, Copy, Debug, Default)]
pub struct SlotScheduler;

impl SlotScheduler {
    pub fn new() -> Self {
        Self
    }
}

impl Scheduler for SlotScheduler {
    fn schedule_scenario(
        &self,
        project: &Project,
        scenario: usize,
        cancel: &CancelFlag,
    ) -> Result<ScenarioSchedule, ScheduleError> {
        let mut run = ScenarioRun::build(project, scenario)?;
        run.prepare();
        run.schedule_loop(cancel)?;
        run.finish()
    }

    fn schedule_all(
        &self,
        project: &Project,
        cancel: &CancelFlag,
    ) -> Result<Schedule, ScheduleError> {
        let mut scenarios = Vec::new();
        for (idx, scenario) in project.scenarios.iter().enumerate() {
            if !scenario.active {
                debug!(scenario = %scenario.id, "skipping inactive scenario");
                continue;
            }
            scenarios.push(self.schedule_scenario(project, idx, cancel)?);
        }
        Ok(Schedule { scenarios })
    }
}

/// All mutable state of one scenario's scheduling run.
///
/// Scoreboards and limit counters are created here and die with the run;
/// the input model is never mutated, so scenarios can be scheduled
/// independently and in parallel.
pub(crate) struct ScenarioRun<'p> {
    pub(crate) project: &'p Project,
    pub(crate) scenario: usize,
    pub(crate) cal: ProjectCalendar,
    pub(crate) tasks: TaskArena,
    pub(crate) plans: Vec<TaskPlan>,
    pub(crate) states: Vec<TaskState>,
    pub(crate) task_ancestors: Vec<Vec<usize>>,
    pub(crate) resources: ResourceArena,
    pub(crate) rplans: Vec<ResPlan>,
    pub(crate) res_ancestors: Vec<Vec<usize>>,
    pub(crate) boards: Vec<Option<Scoreboard>>,
    /// Per node: the leaf tasks depending on it, with their edges
    pub(crate) successors: Vec<Vec<(usize, DepEdge)>>,
    pub(crate) warnings: Vec<ScheduleWarning>,
}

impl<'p> ScenarioRun<'p> {
    pub(crate) fn build(project: &'p Project, scenario: usize) -> Result<Self, ScheduleError> {
        if scenario >= project.scenarios.len() {
            return Err(ScheduleError::UnknownScenario(scenario));
        }
        if project.end <= project.start {
            return Err(ScheduleError::InvalidModel(
                "project end must be after its start".into(),
            ));
        }

        let effective_end = calendar::effective_end(project);
        let cal = ProjectCalendar::new(project, effective_end);
        let span = TimeInterval::new(project.start, effective_end);

        let tasks = TaskArena::build(&project.tasks);
        let resources = ResourceArena::build(&project.resources);
        let plans =
            graph::build_task_plans(project, scenario, &tasks, &resources, span, project.granularity)?;
        let rplans =
            graph::build_res_plans(project, scenario, &resources, span, project.granularity)?;

        let task_ancestors: Vec<Vec<usize>> = (0..tasks.len()).map(|i| tasks.ancestors(i)).collect();
        let res_ancestors: Vec<Vec<usize>> =
            (0..resources.len()).map(|i| resources.ancestors(i)).collect();

        let size = cal.axis().size();
        let mut boards: Vec<Option<Scoreboard>> = Vec::with_capacity(resources.len());
        for (r, node) in resources.nodes.iter().enumerate() {
            if !node.is_leaf() {
                boards.push(None);
                continue;
            }
            let mut board = Scoreboard::new(size, project.granularity);
            for i in 0..size {
                let date = cal.axis().date_of(i as i64);
                let on = match &rplans[r].hours {
                    Hours::Plan(plan) => workhours::on_shift(plan, date, rplans[r].tz),
                    Hours::ProjectDefault => {
                        workhours::on_shift(&project.working_hours, date, None)
                    }
                };
                if !on {
                    board.mark_off_shift(i);
                }
            }
            for leave in cal.global_leaves() {
                mark_leave_range(&mut board, &cal, leave);
            }
            for leave in &rplans[r].leaves {
                mark_leave_range(&mut board, &cal, leave);
            }
            boards.push(Some(board));
        }

        let states = vec![TaskState::default(); tasks.len()];
        let mut run = Self {
            project,
            scenario,
            cal,
            successors: vec![Vec::new(); tasks.len()],
            tasks,
            plans,
            states,
            task_ancestors,
            resources,
            rplans,
            res_ancestors,
            boards,
            warnings: Vec::new(),
        };

        let mut edges = Vec::new();
        for leaf in run.tasks.leaves() {
            for edge in run.effective_deps(leaf) {
                edges.push((edge.pred, leaf, edge));
            }
        }
        for (pred, leaf, edge) in edges {
            run.successors[pred].push((leaf, edge));
        }

        Ok(run)
    }

    // ========================================================================
    // Preparation
    // ========================================================================

    pub(crate) fn prepare(&mut self) {
        debug!(
            scenario = %self.project.scenarios[self.scenario].id,
            tasks = self.tasks.len(),
            resources = self.resources.len(),
            "preparing scenario"
        );
        self.propagate_container_ends();
        self.propagate_alap();
        self.compute_criticalness();
        self.milestone_sweep();
    }

    /// Push container end dates down to their terminal ALAP leaves.
    ///
    /// Only leaves with no finish-to-start successor and no `on_start`
    /// dependency anchor on the container end; the others derive their end
    /// from the tasks that follow them.
    fn propagate_container_ends(&mut self) {
        let leaves = self.tasks.leaves();
        let mut has_fs_successor: HashSet<usize> = HashSet::new();
        let mut has_onstart_dep: HashSet<usize> = HashSet::new();
        for &leaf in &leaves {
            for edge in self.effective_deps(leaf) {
                if edge.on_start {
                    has_onstart_dep.insert(leaf);
                } else {
                    has_fs_successor.insert(edge.pred);
                }
            }
        }

        let roots: Vec<usize> = (0..self.tasks.len())
            .filter(|&i| self.tasks.nodes[i].parent.is_none())
            .collect();
        for root in roots {
            self.propagate_end_rec(root, None, &has_fs_successor, &has_onstart_dep);
        }
    }

    fn propagate_end_rec(
        &mut self,
        idx: usize,
        inherited: Option<DateTime<Utc>>,
        has_fs_successor: &HashSet<usize>,
        has_onstart_dep: &HashSet<usize>,
    ) {
        let own = self.plans[idx].end;
        let effective = own.or(inherited);

        if self.tasks.nodes[idx].is_leaf() {
            if !self.plans[idx].forward && own.is_none() {
                if let Some(container_end) = inherited {
                    let terminal =
                        !has_fs_successor.contains(&idx) && !has_onstart_dep.contains(&idx);
                    if terminal {
                        self.plans[idx].end = Some(container_end);
                    }
                }
            }
        } else {
            let children = self.tasks.nodes[idx].children.clone();
            for child in children {
                self.propagate_end_rec(child, effective, has_fs_successor, has_onstart_dep);
            }
        }
    }

    /// Mark the predecessors of every ALAP deadline anchor as ALAP too, so
    /// whole chains pack against the deadline. Tasks pinned ASAP with an
    /// explicit start keep their direction.
    fn propagate_alap(&mut self) {
        let anchors: Vec<usize> = self
            .tasks
            .leaves()
            .into_iter()
            .filter(|&t| !self.plans[t].forward && self.plans[t].end.is_some())
            .collect();

        let mut processed: HashSet<usize> = HashSet::new();
        for anchor in anchors {
            processed.insert(anchor);
            for edge in self.effective_deps(anchor) {
                self.mark_alap(edge.pred, &mut processed);
            }
        }
    }

    fn mark_alap(&mut self, t: usize, processed: &mut HashSet<usize>) {
        if !processed.insert(t) {
            return;
        }
        if !self.tasks.nodes[t].is_leaf() {
            return;
        }
        let plan = &self.plans[t];
        if plan.explicit_direction && plan.forward && plan.start.is_some() {
            return;
        }
        self.plans[t].forward = false;
        for edge in self.effective_deps(t) {
            self.mark_alap(edge.pred, processed);
        }
    }

    /// Resource criticalness (allocated effort over free capacity) rolled
    /// along dependency chains into the ready-queue ranking
    fn compute_criticalness(&mut self) {
        let n_res = self.resources.len();
        let leaves = self.tasks.leaves();

        let mut alloc_effort = vec![0.0f64; n_res];
        for &t in &leaves {
            if let Some(alloc) = &self.plans[t].alloc {
                for &r in &alloc.primary {
                    alloc_effort[r] += self.plans[t].effort;
                }
            }
        }

        let mut res_crit = vec![0.0f64; n_res];
        for r in 0..n_res {
            if let Some(board) = &self.boards[r] {
                let free = board.free_slots();
                res_crit[r] = if free == 0 {
                    1.0
                } else {
                    alloc_effort[r] / free as f64
                };
            }
        }

        let crit: Vec<f64> = (0..self.tasks.len())
            .map(|t| {
                self.plans[t].alloc.as_ref().map_or(0.0, |a| {
                    a.primary.iter().map(|&r| res_crit[r]).fold(0.0, f64::max)
                })
            })
            .collect();

        let mut memo: Vec<Option<f64>> = vec![None; self.tasks.len()];
        let mut visiting = HashSet::new();
        for &t in &leaves {
            self.path_criticalness(t, &crit, &mut memo, &mut visiting);
        }
        for t in 0..self.tasks.len() {
            if let Some(v) = memo[t] {
                self.plans[t].path_criticalness = v;
            }
        }
    }

    fn path_criticalness(
        &self,
        t: usize,
        crit: &[f64],
        memo: &mut Vec<Option<f64>>,
        visiting: &mut HashSet<usize>,
    ) -> f64 {
        if let Some(v) = memo[t] {
            return v;
        }
        if !visiting.insert(t) {
            // Cycle; the deadlock check reports it later
            return crit[t];
        }
        let downstream = self.successors[t]
            .iter()
            .map(|(s, _)| *s)
            .collect::<Vec<_>>()
            .into_iter()
            .map(|s| self.path_criticalness(s, crit, memo, visiting))
            .fold(0.0, f64::max);
        visiting.remove(&t);
        let value = crit[t] + downstream;
        memo[t] = Some(value);
        value
    }

    /// Mark milestones whose dates are already derivable as scheduled; the
    /// one known date is mirrored onto the other
    fn milestone_sweep(&mut self) {
        for t in self.tasks.leaves() {
            let plan = &self.plans[t];
            let implicit = !plan.has_work() && (plan.start.is_some() || plan.end.is_some());
            if !(plan.milestone || implicit) {
                continue;
            }
            // A fixed-window task with allocations still walks its span so
            // the resources get booked for reporting
            if plan.start.is_some() && plan.end.is_some() && plan.alloc.is_some() && !plan.milestone
            {
                continue;
            }
            match (plan.start, plan.end) {
                (Some(start), None) => {
                    self.plans[t].end = Some(start);
                    self.states[t].scheduled = true;
                }
                (None, Some(end)) => {
                    self.plans[t].start = Some(end);
                    self.states[t].scheduled = true;
                }
                (Some(_), Some(_)) => {
                    self.states[t].scheduled = true;
                }
                (None, None) => {}
            }
        }
    }

    // ========================================================================
    // The scheduling loop
    // ========================================================================

    pub(crate) fn schedule_loop(&mut self, cancel: &CancelFlag) -> Result<(), ScheduleError> {
        let mut pending: Vec<usize> = self
            .tasks
            .leaves()
            .into_iter()
            .filter(|&t| !self.states[t].scheduled)
            .collect();
        pending.sort_by(|&a, &b| {
            self.plans[b]
                .priority
                .cmp(&self.plans[a].priority)
                .then(
                    self.plans[b]
                        .path_criticalness
                        .total_cmp(&self.plans[a].path_criticalness),
                )
                .then(self.tasks.nodes[a].seqno.cmp(&self.tasks.nodes[b].seqno))
        });

        let mut failed: Vec<usize> = Vec::new();
        while !pending.is_empty() {
            if cancel.is_cancelled() {
                return Err(ScheduleError::Cancelled);
            }

            let picked = pending
                .iter()
                .copied()
                .find(|&t| self.ready_for_scheduling(t));
            match picked {
                Some(t) => {
                    if !self.schedule_task(t, cancel)? {
                        failed.push(t);
                    }
                    pending.retain(|&x| x != t);
                    self.update_containers();
                }
                None => {
                    if failed.is_empty() {
                        let names: Vec<&str> = pending
                            .iter()
                            .map(|&t| self.tasks.nodes[t].path.as_str())
                            .collect();
                        warn!(remaining = pending.len(), "scheduling deadlock");
                        self.warnings.push(ScheduleWarning::new(
                            WarningKind::Deadlock,
                            format!(
                                "deadlock: no task is ready while {} remain ({})",
                                pending.len(),
                                names.join(", ")
                            ),
                        ));
                    }
                    break;
                }
            }
        }

        if !failed.is_empty() {
            let names: Vec<&str> = failed
                .iter()
                .map(|&t| self.tasks.nodes[t].path.as_str())
                .collect();
            warn!(count = failed.len(), "tasks left the project window");
            self.warnings.push(ScheduleWarning::new(
                WarningKind::UnscheduledTask,
                format!(
                    "{} task(s) could not be scheduled: {}",
                    failed.len(),
                    names.join(", ")
                ),
            ));
            if failed.iter().any(|&t| self.limits_in_play(t)) {
                self.warnings.push(ScheduleWarning::new(
                    WarningKind::LimitInfeasible,
                    "booking limits kept tasks from completing within the project window",
                ));
            }
        }

        self.check_max_gaps();
        Ok(())
    }

    /// Whether the task, its containers, or any allocated resource chain
    /// carries booking limits
    fn limits_in_play(&self, t: usize) -> bool {
        if !self.plans[t].limits.is_empty() {
            return true;
        }
        if self
            .task_ancestors[t]
            .iter()
            .any(|&a| !self.plans[a].limits.is_empty())
        {
            return true;
        }
        let Some(alloc) = &self.plans[t].alloc else {
            return false;
        };
        alloc
            .primary
            .iter()
            .chain(alloc.alternatives.iter())
            .any(|&r| {
                !self.rplans[r].limits.is_empty()
                    || self
                        .res_ancestors[r]
                        .iter()
                        .any(|&a| !self.rplans[a].limits.is_empty())
            })
    }

    /// Roll up containers whose children are all scheduled; runs bottom-up
    /// so nested containers settle in one pass
    pub(crate) fn update_containers(&mut self) {
        for idx in (0..self.tasks.len()).rev() {
            if self.tasks.nodes[idx].is_leaf() || self.states[idx].scheduled {
                continue;
            }
            let children = self.tasks.nodes[idx].children.clone();
            if children.is_empty() || children.iter().any(|&c| !self.states[c].scheduled) {
                continue;
            }

            let mut min_start: Option<DateTime<Utc>> = None;
            let mut max_end: Option<DateTime<Utc>> = None;
            let mut complete = true;
            for &c in &children {
                match (self.plans[c].start, self.plans[c].end) {
                    (Some(s), Some(e)) => {
                        if min_start.map_or(true, |m| s < m) {
                            min_start = Some(s);
                        }
                        if max_end.map_or(true, |m| e > m) {
                            max_end = Some(e);
                        }
                    }
                    _ => {
                        complete = false;
                        break;
                    }
                }
            }
            if !complete {
                continue;
            }

            if let Some(s) = min_start {
                if self.plans[idx].start.map_or(true, |cur| cur > s) {
                    self.plans[idx].start = Some(s);
                }
            }
            if let Some(e) = max_end {
                if self.plans[idx].end.map_or(true, |cur| cur < e) {
                    self.plans[idx].end = Some(e);
                }
            }
            self.states[idx].scheduled = true;
        }
    }

    /// A predecessor that finished earlier than its capped gap allows is a
    /// warning, never a failure
    fn check_max_gaps(&mut self) {
        let mut found = Vec::new();
        for t in self.tasks.leaves() {
            for edge in self.effective_deps(t) {
                let Some(max_gap) = edge.max_gap else { continue };
                let anchor = if edge.on_start {
                    self.plans[edge.pred].start
                } else {
                    self.plans[edge.pred].end
                };
                if let (Some(anchor), Some(start)) = (anchor, self.plans[t].start) {
                    let idle = (start - anchor).num_seconds();
                    if idle > max_gap {
                        found.push(ScheduleWarning::new(
                            WarningKind::MaxGapViolation,
                            format!(
                                "idle gap of {idle}s between {} and {} exceeds the {max_gap}s bound",
                                self.tasks.nodes[edge.pred].path, self.tasks.nodes[t].path
                            ),
                        ));
                    }
                }
            }
        }
        self.warnings.extend(found);
    }

    // ========================================================================
    // Result assembly
    // ========================================================================

    pub(crate) fn finish(mut self) -> Result<ScenarioSchedule, ScheduleError> {
        self.update_containers();
        let project_end = self.cal.axis().end();

        let mut tasks_out = BTreeMap::new();
        for (idx, node) in self.tasks.nodes.iter().enumerate() {
            tasks_out.insert(
                node.path.clone(),
                ScheduledTask {
                    start: self.plans[idx].start,
                    end: self.plans[idx].end,
                    scheduled: self.states[idx].scheduled,
                    container: !node.is_leaf(),
                    criticalness: self.plans[idx].path_criticalness,
                },
            );
        }

        let mut resources_out: BTreeMap<String, ResourceUsage> = BTreeMap::new();
        for (r, node) in self.resources.nodes.iter().enumerate() {
            let Some(board) = &self.boards[r] else { continue };
            board.check_consistency()?;

            let mut usage = ResourceUsage::default();
            let mut duty_tasks: Vec<usize> = Vec::new();
            let mut open: Option<Booking> = None;

            for (slot, entries) in board.usage() {
                let slot_start = self.cal.axis().date_of(slot as i64);
                for entry in entries {
                    if entry.seconds == 0 {
                        continue;
                    }
                    let task_idx = entry.task as usize;
                    let task_path = self.tasks.nodes[task_idx].path.clone();
                    *usage.per_task_seconds.entry(task_path.clone()).or_insert(0) +=
                        i64::from(entry.seconds);
                    if !duty_tasks.contains(&task_idx) {
                        duty_tasks.push(task_idx);
                    }

                    let booking_start = slot_start + Duration::seconds(i64::from(entry.offset));
                    let booking_end = booking_start + Duration::seconds(i64::from(entry.seconds));
                    match &mut open {
                        Some(b) if b.task == task_path && b.interval.end == booking_start => {
                            b.interval.end = booking_end;
                        }
                        _ => {
                            if let Some(b) = open.take() {
                                usage.bookings.push(b);
                            }
                            open = Some(Booking {
                                task: task_path,
                                interval: TimeInterval::new(booking_start, booking_end),
                            });
                        }
                    }
                }
            }
            if let Some(b) = open {
                usage.bookings.push(b);
            }

            // Duties list the worked tasks first, then their containers
            for &t in &duty_tasks {
                usage.duties.push(self.tasks.nodes[t].path.clone());
            }
            for &t in &duty_tasks {
                for &a in &self.task_ancestors[t] {
                    let path = self.tasks.nodes[a].path.clone();
                    if !usage.duties.contains(&path) {
                        usage.duties.push(path);
                    }
                }
            }

            usage.free_slots = board.free_slots();
            usage.work_slots = board.work_slots();
            if let Some(rate) = &self.rplans[r].rate {
                let hours = Decimal::from(usage.allocated_seconds()) / Decimal::from(3600);
                usage.cost = Some(Money::new(hours * rate.amount, rate.currency.clone()));
            }
            resources_out.insert(node.path.clone(), usage);
        }

        // Parent resources aggregate their descendants' duties and time
        for r in (0..self.resources.len()).rev() {
            if self.resources.nodes[r].is_leaf() {
                continue;
            }
            let mut aggregate = ResourceUsage::default();
            for &c in &self.resources.nodes[r].children {
                if let Some(child) = resources_out.get(&self.resources.nodes[c].path) {
                    for (task, seconds) in &child.per_task_seconds {
                        *aggregate.per_task_seconds.entry(task.clone()).or_insert(0) += seconds;
                    }
                    for duty in &child.duties {
                        if !aggregate.duties.contains(duty) {
                            aggregate.duties.push(duty.clone());
                        }
                    }
                }
            }
            resources_out.insert(self.resources.nodes[r].path.clone(), aggregate);
        }

        Ok(ScenarioSchedule {
            scenario_id: self.project.scenarios[self.scenario].id.clone(),
            project_end,
            tasks: tasks_out,
            resources: resources_out,
            warnings: self.warnings,
        })
    }
}

fn mark_leave_range(board: &mut Scoreboard, cal: &ProjectCalendar, leave: &slotplan_core::Leave) {
    let start = cal.axis().clamped_idx_of(leave.interval.start);
    let end = cal
        .axis()
        .idx_of(leave.interval.end)
        .clamp(0, cal.axis().size() as i64);
    for idx in start..end {
        board.mark_leave(idx as usize, leave.kind);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use pretty_assertions::assert_eq;
    use slotplan_core::{Resource, Task};

    fn ts(y: i32, mo: u32, d: u32, h: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, mo, d, h, 0, 0).unwrap()
    }

    fn project() -> Project {
        let mut p = Project::new("p", ts(2025, 5, 5, 0), ts(2025, 5, 19, 0));
        p.resources.push(Resource::new("dev"));
        p
    }

    #[test]
    fn unknown_scenario_index_is_rejected() {
        let p = project();
        let err = SlotScheduler::new()
            .schedule_scenario(&p, 7, &CancelFlag::new())
            .unwrap_err();
        assert!(matches!(err, ScheduleError::UnknownScenario(7)));
    }

    #[test]
    fn inverted_project_bounds_are_rejected() {
        let mut p = project();
        p.end = p.start;
        let err = SlotScheduler::new()
            .schedule_scenario(&p, 0, &CancelFlag::new())
            .unwrap_err();
        assert!(matches!(err, ScheduleError::InvalidModel(_)));
    }

    #[test]
    fn cancellation_aborts_the_run() {
        let mut p = project();
        p.tasks.push(Task::new("work").effort_hours(8.0).allocate("dev"));
        let cancel = CancelFlag::new();
        cancel.cancel();
        let err = SlotScheduler::new()
            .schedule_scenario(&p, 0, &cancel)
            .unwrap_err();
        assert!(matches!(err, ScheduleError::Cancelled));
    }

    #[test]
    fn alap_propagation_marks_predecessor_chains() {
        let mut p = project();
        p.tasks.push(Task::new("a").effort_hours(4.0).allocate("dev"));
        p.tasks.push(
            Task::new("b")
                .effort_hours(4.0)
                .allocate("dev")
                .depends_on("a"),
        );
        p.tasks.push(
            Task::new("c")
                .effort_hours(4.0)
                .allocate("dev")
                .depends_on("b")
                .alap()
                .ends(ts(2025, 5, 16, 16)),
        );

        let mut run = ScenarioRun::build(&p, 0).unwrap();
        run.prepare();
        assert!(!run.plans[0].forward);
        assert!(!run.plans[1].forward);
        assert!(!run.plans[2].forward);
    }

    #[test]
    fn explicit_asap_start_resists_alap_propagation() {
        let mut p = project();
        p.tasks.push(
            Task::new("a")
                .effort_hours(4.0)
                .allocate("dev")
                .asap()
                .starts(ts(2025, 5, 5, 9)),
        );
        p.tasks.push(
            Task::new("b")
                .effort_hours(4.0)
                .allocate("dev")
                .depends_on("a")
                .alap()
                .ends(ts(2025, 5, 16, 16)),
        );

        let mut run = ScenarioRun::build(&p, 0).unwrap();
        run.prepare();
        assert!(run.plans[0].forward);
        assert!(!run.plans[1].forward);
    }

    #[test]
    fn milestone_sweep_mirrors_known_dates() {
        let mut p = project();
        p.tasks.push(Task::new("kickoff").starts(ts(2025, 5, 5, 9)));
        p.tasks.push(Task::new("handover").ends(ts(2025, 5, 16, 16)));

        let mut run = ScenarioRun::build(&p, 0).unwrap();
        run.prepare();
        assert!(run.states[0].scheduled);
        assert_eq!(run.plans[0].end, Some(ts(2025, 5, 5, 9)));
        assert!(run.states[1].scheduled);
        assert_eq!(run.plans[1].start, Some(ts(2025, 5, 16, 16)));
    }

    #[test]
    fn container_ends_reach_only_terminal_leaves() {
        let mut p = project();
        p.tasks.push(
            Task::new("phase")
                .alap()
                .ends(ts(2025, 5, 16, 16))
                .child(Task::new("first").effort_hours(4.0).allocate("dev"))
                .child(
                    Task::new("second")
                        .effort_hours(4.0)
                        .allocate("dev")
                        .depends_on("first"),
                ),
        );

        let mut run = ScenarioRun::build(&p, 0).unwrap();
        run.prepare();
        // "second" is terminal and anchors on the container end
        assert_eq!(run.plans[2].end, Some(ts(2025, 5, 16, 16)));
        // "first" has a finish-to-start successor and derives its end later
        assert_eq!(run.plans[1].end, None);
    }
}
