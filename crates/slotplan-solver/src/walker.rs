//! Per-task scheduling state machine
//!
//! Drives one leaf task across the slot axis: picks the initial slot from
//! dependency anchors and gaps, walks forward (ASAP) or backward (ALAP)
//! booking resources slot by slot, and computes a second-precise end time
//! when the remaining effort no longer fills a whole slot. The unused tail
//! of the final slot is released so a successor can book it.
//!
//! The walk is an explicit state struct advanced by `schedule_slot` calls;
//! a task whose walk leaves the project window is a run-away and is
//! reported, not an error.

use chrono::{DateTime, Duration, Utc};
use slotplan_core::{CancelFlag, ScheduleError};
use tracing::{debug, trace};

use crate::driver::ScenarioRun;
use crate::selection;

/// Walk registers of one task within one scenario
#[derive(Clone, Debug, Default)]
pub(crate) struct TaskState {
    pub scheduled: bool,
    pub run_away: bool,
    /// Current slot of the walk
    pub cur: Option<i64>,
    /// Accumulated effort, hours
    pub done_effort: f64,
    /// Accumulated calendar slots
    pub done_duration: i64,
    /// Accumulated working slots
    pub done_length: i64,
    /// Seconds into the entry slot already consumed by the predecessor
    pub slot_start_offset: i64,
    pub entry_slot: Option<i64>,
    /// Sticky resource-set choice
    pub selected: Option<Vec<usize>>,
    /// First slot that received a booking (the latest one under ALAP)
    pub first_booked: Option<i64>,
    /// Bookings placed in the current slot
    pub slot_records: Vec<SlotBooking>,
}

/// One resource's booking within the current slot
#[derive(Clone, Copy, Debug)]
pub(crate) struct SlotBooking {
    pub res: usize,
    pub offset: u32,
    pub seconds: u32,
    pub effort: f64,
}

/// What drives a task's walk
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum TaskKind {
    Milestone,
    Effort,
    Duration,
    Length,
    StartEnd,
}

impl<'p> ScenarioRun<'p> {
    pub(crate) fn task_kind(&self, t: usize) -> TaskKind {
        let plan = &self.plans[t];
        if plan.milestone {
            TaskKind::Milestone
        } else if plan.effort > 0.0 {
            TaskKind::Effort
        } else if plan.duration > 0 {
            TaskKind::Duration
        } else if plan.length > 0 {
            TaskKind::Length
        } else if plan.start.is_some() && plan.end.is_some() && plan.alloc.is_some() {
            TaskKind::StartEnd
        } else {
            TaskKind::Milestone
        }
    }

    // ========================================================================
    // Readiness
    // ========================================================================

    /// Own dependencies plus those inherited from enclosing containers
    pub(crate) fn effective_deps(&self, t: usize) -> Vec<crate::graph::DepEdge> {
        let mut deps = self.plans[t].deps.clone();
        for &a in &self.task_ancestors[t] {
            deps.extend(self.plans[a].deps.iter().copied());
        }
        deps
    }

    pub(crate) fn ready_for_scheduling(&self, t: usize) -> bool {
        if self.plans[t].forward {
            self.effective_deps(t)
                .iter()
                .all(|e| self.states[e.pred].scheduled)
        } else {
            self.alap_ready(t)
        }
    }

    /// An ALAP task needs an end anchor: an explicit end, scheduled
    /// `on_start` predecessors, or scheduled successors to derive it from
    fn alap_ready(&self, t: usize) -> bool {
        if self.plans[t].end.is_some() {
            return true;
        }
        for edge in self.effective_deps(t) {
            if edge.on_start && !self.states[edge.pred].scheduled {
                return false;
            }
        }
        let succs = &self.successors[t];
        if succs.is_empty() {
            return true;
        }
        succs.iter().all(|(s, _)| self.states[*s].scheduled)
    }

    // ========================================================================
    // Top-level walk
    // ========================================================================

    /// Schedule one leaf task to completion. Returns `Ok(false)` when the
    /// walk ran out of the project window.
    pub(crate) fn schedule_task(
        &mut self,
        t: usize,
        cancel: &CancelFlag,
    ) -> Result<bool, ScheduleError> {
        if self.states[t].scheduled {
            return Ok(true);
        }

        let forward = self.plans[t].forward;
        let effort = self.plans[t].effort;
        let has_alloc = self.plans[t].alloc.is_some();
        let upper = self.cal.axis().last_idx();

        if self.states[t].cur.is_none() {
            if forward {
                self.init_forward_slot(t);
            } else {
                self.init_backward_slot(t);
            }
        }

        // Non-effort forward tasks pin their start to the first working
        // slot; effort tasks get theirs from the first booking instead
        let kind = self.task_kind(t);
        if forward
            && self.plans[t].start.is_none()
            && kind != TaskKind::Milestone
            && (effort == 0.0 || !has_alloc)
        {
            let mut cur = self.states[t].cur.unwrap_or(0);
            while cur < upper && !self.cal.is_working(cur) {
                cur += 1;
            }
            self.states[t].cur = Some(cur);
            self.plans[t].start = Some(self.cal.axis().date_of(cur));
        }

        let start_slot = self.states[t].cur.unwrap_or(0);
        let delta: i64 = if forward { 1 } else { -1 };

        loop {
            if cancel.is_cancelled() {
                return Err(ScheduleError::Cancelled);
            }
            if !self.schedule_slot(t)? {
                break;
            }
            let next = self.states[t].cur.unwrap_or(0) + delta;
            self.states[t].cur = Some(next);
            if next < 0 || next > upper {
                self.states[t].run_away = true;
                debug!(task = %self.tasks.nodes[t].path, "walk left the project window");
                return Ok(false);
            }
        }

        if forward {
            if self.plans[t].start.is_none() {
                self.plans[t].start = Some(self.cal.axis().date_of(start_slot));
            }
        } else {
            let cur = self.states[t].cur.unwrap_or(0);
            if self.plans[t].start.is_none() {
                self.plans[t].start = Some(self.cal.axis().date_of(cur));
            }
            // The deadline said when to end by; the first booked slot says
            // when the work actually ends
            let end_slot = self.states[t].first_booked.unwrap_or(start_slot);
            if effort > 0.0 || self.plans[t].end.is_none() {
                self.plans[t].end = Some(self.cal.axis().date_of(end_slot + 1));
            }
        }

        self.states[t].scheduled = true;
        debug!(
            task = %self.tasks.nodes[t].path,
            start = ?self.plans[t].start,
            end = ?self.plans[t].end,
            "scheduled"
        );
        Ok(true)
    }

    // ========================================================================
    // Initial slot selection
    // ========================================================================

    fn init_forward_slot(&mut self, t: usize) {
        if let Some(start) = self.plans[t].start {
            let slot = self.cal.axis().idx_of(start);
            self.states[t].cur = Some(slot);
            self.states[t].entry_slot = Some(slot);
            return;
        }

        let upper = self.cal.axis().last_idx();
        let g = self.cal.axis().granularity();
        let mut earliest = self.cal.axis().start();

        for edge in self.effective_deps(t) {
            let anchor = if edge.on_start {
                self.plans[edge.pred].start
            } else {
                self.plans[edge.pred].end
            };
            let Some(mut dep_time) = anchor else { continue };

            if edge.gap_duration > 0 {
                dep_time += Duration::seconds(edge.gap_duration);
            } else if edge.gap_length > 0 {
                // Working-time gaps are consumed slot by slot
                let mut idx = self.cal.axis().idx_of(dep_time);
                let mut worked: i64 = 0;
                while worked < edge.gap_length && idx <= upper {
                    if self.cal.is_working(idx) {
                        worked += g;
                    }
                    idx += 1;
                }
                dep_time = self.cal.axis().date_of(idx);
            }
            if dep_time > earliest {
                earliest = dep_time;
            }
        }

        if self.plans[t].effort > 0.0 {
            let delayed = self.max_gap_delayed_start(t, earliest);
            if delayed > earliest {
                earliest = delayed;
            }
        }

        let slot = self.cal.axis().idx_of(earliest);
        let slot_start = self.cal.axis().date_of(slot);
        self.states[t].slot_start_offset = (earliest - slot_start).num_seconds().max(0);
        self.states[t].cur = Some(slot);
        self.states[t].entry_slot = Some(slot);
    }

    fn init_backward_slot(&mut self, t: usize) {
        let end_date = self.plans[t].end.unwrap_or_else(|| {
            let mut latest = self.cal.axis().end();
            for edge in self.effective_deps(t) {
                if !edge.on_start {
                    continue;
                }
                if let Some(mut pred_start) = self.plans[edge.pred].start {
                    if edge.gap_duration > 0 {
                        pred_start -= Duration::seconds(edge.gap_duration);
                    }
                    if pred_start < latest {
                        latest = pred_start;
                    }
                }
            }
            for (succ, _) in &self.successors[t] {
                if let Some(succ_start) = self.plans[*succ].start {
                    if succ_start < latest {
                        latest = succ_start;
                    }
                }
            }
            latest
        });

        let mut cur = (self.cal.axis().idx_of(end_date) - 1).max(0);
        let resource_aware = self.plans[t].effort > 0.0 && self.plans[t].alloc.is_some();
        while cur > 0 {
            let usable = if resource_aware {
                self.any_alloc_on_shift(t, cur)
            } else {
                self.cal.is_working(cur)
            };
            if usable {
                break;
            }
            cur -= 1;
        }
        self.states[t].cur = Some(cur);
        self.states[t].entry_slot = Some(cur);
    }

    fn any_alloc_on_shift(&self, t: usize, idx: i64) -> bool {
        let Some(alloc) = &self.plans[t].alloc else {
            return self.cal.is_working(idx);
        };
        alloc
            .primary
            .iter()
            .chain(alloc.alternatives.iter())
            .any(|&r| self.resource_on_shift(r, idx))
    }

    // ========================================================================
    // Max-gap back-propagation
    // ========================================================================

    /// When a successor caps the idle gap after this task, delay the start
    /// so the effort ends right where the successor can pick up
    fn max_gap_delayed_start(&self, t: usize, earliest: DateTime<Utc>) -> DateTime<Utc> {
        let capped: Vec<(usize, i64)> = self.successors[t]
            .iter()
            .filter_map(|(succ, edge)| edge.max_gap.map(|_| (*succ, edge.gap_duration)))
            .collect();
        if capped.is_empty() {
            return earliest;
        }

        let mut delayed = earliest;
        for (succ, gap) in capped {
            let succ_start = self.successor_earliest_start(succ);
            let desired_end = succ_start - Duration::seconds(gap);
            let required = self.start_from_end(t, desired_end);
            if required > delayed {
                delayed = required;
            }
        }
        delayed
    }

    /// Earliest slot where the successor's primary resource is on shift
    fn successor_earliest_start(&self, succ: usize) -> DateTime<Utc> {
        let upper = self.cal.axis().last_idx();
        let resource = self.plans[succ]
            .alloc
            .as_ref()
            .and_then(|a| a.primary.first().copied());

        for idx in 0..=upper {
            let on = match resource {
                Some(r) => self.resource_on_shift(r, idx),
                None => self.cal.is_working(idx),
            };
            if on {
                return self.cal.axis().date_of(idx);
            }
        }
        self.cal.axis().end()
    }

    /// Walk backward from `end_time` over working slots until the task's
    /// effort is covered; returns the required start
    fn start_from_end(&self, t: usize, end_time: DateTime<Utc>) -> DateTime<Utc> {
        let resource = self.plans[t]
            .alloc
            .as_ref()
            .and_then(|a| a.primary.first().copied());
        let effort = self.plans[t].effort;
        let slot_hours = self.cal.axis().granularity() as f64 / 3600.0;

        let mut idx = self.cal.axis().idx_of(end_time) - 1;
        let mut worked = 0.0;
        while idx >= 0 && worked < effort {
            let on = match resource {
                Some(r) => self.resource_on_shift(r, idx),
                None => self.cal.is_working(idx),
            };
            if on {
                worked += slot_hours;
            }
            idx -= 1;
        }
        self.cal.axis().date_of(idx + 1)
    }

    // ========================================================================
    // Slot step
    // ========================================================================

    /// Process the current slot; `Ok(true)` keeps the walk going
    fn schedule_slot(&mut self, t: usize) -> Result<bool, ScheduleError> {
        let kind = self.task_kind(t);
        let forward = self.plans[t].forward;
        let cur = self.states[t].cur.unwrap_or(0);
        let g = self.cal.axis().granularity();

        match kind {
            TaskKind::Milestone => {
                if forward {
                    if let Some(start) = self.plans[t].start {
                        self.plans[t].end = Some(start);
                    } else {
                        let date = self.cal.axis().date_of(cur)
                            + Duration::seconds(self.states[t].slot_start_offset);
                        self.plans[t].start = Some(date);
                        self.plans[t].end = Some(date);
                    }
                } else if let Some(end) = self.plans[t].end {
                    self.plans[t].start = Some(end);
                } else {
                    let date = self.cal.axis().date_of(cur);
                    self.plans[t].start = Some(date);
                    self.plans[t].end = Some(date);
                }
                Ok(false)
            }

            TaskKind::Effort => {
                if self.plans[t].contiguous
                    && self.states[t].done_effort == 0.0
                    && !self.has_contiguous_block(t, cur)
                {
                    return Ok(true);
                }

                let effort_before = self.states[t].done_effort;
                self.book_resources(t)?;

                if self.states[t].done_effort >= self.plans[t].effort - 1e-9 {
                    let end = self.finish_effort_slot(t, effort_before)?;
                    self.propagate_date(t, end, forward);
                    return Ok(false);
                }
                Ok(true)
            }

            TaskKind::Duration => {
                self.book_resources(t)?;
                self.states[t].done_duration += 1;
                let target = (self.plans[t].duration + g - 1) / g;
                if self.states[t].done_duration >= target {
                    let date = self.cal.axis().date_of(cur + i64::from(forward));
                    self.propagate_date(t, date, forward);
                    return Ok(false);
                }
                Ok(true)
            }

            TaskKind::Length => {
                self.book_resources(t)?;
                if self.cal.is_working(cur) {
                    self.states[t].done_length += 1;
                }
                let target = (self.plans[t].length + g - 1) / g;
                if self.states[t].done_length >= target {
                    let date = self.cal.axis().date_of(cur + i64::from(forward));
                    self.propagate_date(t, date, forward);
                    return Ok(false);
                }
                Ok(true)
            }

            TaskKind::StartEnd => {
                let target = if forward {
                    self.plans[t].end
                } else {
                    self.plans[t].start
                };
                if let Some(target) = target {
                    let target_idx = self.cal.axis().idx_of(target);
                    if (forward && cur >= target_idx) || (!forward && cur <= target_idx) {
                        return Ok(false);
                    }
                }
                self.book_resources(t)?;
                Ok(true)
            }
        }
    }

    fn propagate_date(&mut self, t: usize, date: DateTime<Utc>, at_end: bool) {
        if at_end {
            self.plans[t].end = Some(date);
        } else {
            self.plans[t].start = Some(date);
        }
    }

    // ========================================================================
    // Booking
    // ========================================================================

    /// Book the selected resource set for the current slot.
    ///
    /// A team of several resources must be available in full; effort counts
    /// clock time, so the slot contributes the best single-resource gain,
    /// not the sum.
    fn book_resources(&mut self, t: usize) -> Result<(), ScheduleError> {
        let Some(alloc) = self.plans[t].alloc.clone() else {
            return Ok(());
        };
        let effort = self.plans[t].effort;
        let cur = self.states[t].cur.unwrap_or(0);
        self.states[t].slot_records.clear();

        if self.states[t].selected.is_none() {
            let chosen = selection::select_resources(self, t, &alloc, effort);
            self.states[t].selected = Some(chosen);
        }
        let selected = self.states[t].selected.clone().unwrap_or_default();
        if selected.is_empty() {
            return Ok(());
        }

        if effort > 0.0 && selected.len() > 1 {
            for &r in &selected {
                if !self.resource_available(r, cur) || !self.task_limits_ok(t, cur, r) {
                    return Ok(());
                }
            }
        }

        let mut booked_any = false;
        let mut best_gain = 0.0;
        for &r in &selected {
            let gain = self.book_resource(t, r);
            if gain > 0.0 {
                booked_any = true;
                if gain > best_gain {
                    best_gain = gain;
                }
            }
        }

        if booked_any {
            if effort > 0.0 && self.states[t].done_effort == 0.0 && self.plans[t].forward {
                // The mid-slot offset only holds if the booking landed in
                // the slot the dependency anchor pointed at
                let offset = if self.states[t].entry_slot == Some(cur) {
                    self.states[t].slot_start_offset
                } else {
                    0
                };
                self.plans[t].start = Some(self.cal.axis().date_of(cur) + Duration::seconds(offset));
            }
            if !self.plans[t].forward && self.states[t].first_booked.is_none() {
                self.states[t].first_booked = Some(cur);
            }
            self.states[t].done_effort += best_gain;
            trace!(
                task = %self.tasks.nodes[t].path,
                slot = cur,
                gain = best_gain,
                "booked slot"
            );
        }
        Ok(())
    }

    /// Book one resource at the current slot; 0.0 means it refused
    fn book_resource(&mut self, t: usize, r: usize) -> f64 {
        let cur = self.states[t].cur.unwrap_or(0);
        let slot = cur as usize;

        // The predecessor's share of the entry slot is not ours to book
        let state = &self.states[t];
        if state.slot_start_offset > 0
            && state.done_effort == 0.0
            && state.entry_slot == Some(cur)
        {
            let offset = state.slot_start_offset as u32;
            if let Some(board) = self.boards[r].as_mut() {
                board.reserve_offset(slot, offset);
            }
        }

        if !self.resource_available(r, cur) || !self.task_limits_ok(t, cur, r) {
            return 0.0;
        }

        let efficiency = self.rplans[r].efficiency;
        let Some(board) = self.boards[r].as_mut() else {
            return 0.0;
        };
        let gain = board.book(slot, t as u32, efficiency);

        self.rplans[r].limits.inc(cur, None);
        let res_ancestors = self.res_ancestors[r].clone();
        for a in res_ancestors {
            self.rplans[a].limits.inc(cur, None);
        }
        self.plans[t].limits.inc(cur, Some(r as u32));
        let task_ancestors = self.task_ancestors[t].clone();
        for a in task_ancestors {
            self.plans[a].limits.inc(cur, Some(r as u32));
        }

        self.states[t].slot_records.push(SlotBooking {
            res: r,
            offset: gain.offset,
            seconds: gain.seconds,
            effort: gain.effort_hours,
        });
        gain.effort_hours
    }

    /// Whether the resource is within working hours at the slot
    pub(crate) fn resource_on_shift(&self, r: usize, idx: i64) -> bool {
        if idx < 0 {
            return false;
        }
        self.boards[r]
            .as_ref()
            .is_some_and(|b| b.on_shift(idx as usize))
    }

    /// Whether the resource can take a booking at the slot: on shift, time
    /// left in the slot, and every limit up the resource chain satisfied
    pub(crate) fn resource_available(&self, r: usize, idx: i64) -> bool {
        if idx < 0 {
            return false;
        }
        let Some(board) = self.boards[r].as_ref() else {
            return false;
        };
        if !board.is_available(idx as usize) {
            return false;
        }
        if !self.rplans[r].limits.ok(idx, true, None) {
            return false;
        }
        self.res_ancestors[r]
            .iter()
            .all(|&a| self.rplans[a].limits.ok(idx, true, None))
    }

    /// Check the task's own limits and those of its enclosing containers
    fn task_limits_ok(&self, t: usize, idx: i64, r: usize) -> bool {
        if !self.plans[t].limits.ok(idx, true, Some(r as u32)) {
            return false;
        }
        self.task_ancestors[t]
            .iter()
            .all(|&a| self.plans[a].limits.ok(idx, true, Some(r as u32)))
    }

    // ========================================================================
    // Precise end & partial-slot release
    // ========================================================================

    /// Compute the second-precise boundary inside the final slot and give
    /// the unused tail back to every resource booked there.
    ///
    /// Forward: end = slot start + booked offset + needed seconds.
    /// Backward: start = slot end - needed seconds.
    fn finish_effort_slot(
        &mut self,
        t: usize,
        effort_before: f64,
    ) -> Result<DateTime<Utc>, ScheduleError> {
        let cur = self.states[t].cur.unwrap_or(0);
        let slot = cur as usize;
        let records = self.states[t].slot_records.clone();
        let Some(first) = records.first() else {
            return Err(ScheduleError::Internal(format!(
                "task {} finished slot {cur} without a booking",
                self.tasks.nodes[t].path
            )));
        };

        let mut best = *first;
        for rec in &records[1..] {
            if rec.effort > best.effort {
                best = *rec;
            }
        }

        let efficiency = self.rplans[best.res].efficiency;
        let needed_hours = (self.plans[t].effort - effort_before).max(0.0);
        let needed_seconds = ((needed_hours * 3600.0 / efficiency).round() as i64)
            .clamp(0, i64::from(best.seconds));

        let keep_tail = !self.plans[t].forward;
        for rec in &records {
            let kept = (needed_seconds.min(i64::from(rec.seconds))) as u32;
            let board = self.boards[rec.res].as_mut().ok_or_else(|| {
                ScheduleError::Internal(format!("booking on container resource {}", rec.res))
            })?;
            board.trim_booking(slot, t as u32, kept, keep_tail)?;
        }

        let slot_start = self.cal.axis().date_of(cur);
        let g = self.cal.axis().granularity();
        if self.plans[t].forward {
            Ok(slot_start + Duration::seconds(i64::from(best.offset) + needed_seconds))
        } else {
            Ok(slot_start + Duration::seconds(g - needed_seconds))
        }
    }

    // ========================================================================
    // Contiguous blocks
    // ========================================================================

    /// Whether an unbroken run of bookable slots long enough for the whole
    /// effort starts at `cur`
    fn has_contiguous_block(&self, t: usize, cur: i64) -> bool {
        let resource = self.plans[t]
            .alloc
            .as_ref()
            .and_then(|a| a.primary.first().copied());
        let efficiency = resource.map_or(1.0, |r| self.rplans[r].efficiency);
        let slot_hours = self.cal.axis().granularity() as f64 / 3600.0;
        let slots_needed = (self.plans[t].effort / efficiency / slot_hours).ceil() as i64;

        let upper = self.cal.axis().last_idx();
        let mut count = 0;
        let mut idx = cur;
        while idx <= upper && count < slots_needed {
            let usable = match resource {
                Some(r) => self.resource_available(r, idx),
                None => self.cal.is_working(idx),
            };
            if !usable {
                return false;
            }
            count += 1;
            idx += 1;
        }
        count >= slots_needed
    }
}
