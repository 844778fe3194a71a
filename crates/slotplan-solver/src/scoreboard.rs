//! Per-resource slot scoreboard
//!
//! A dense array of per-slot cells plus parallel fractional accounting.
//! Cells record why a slot is unusable (off shift, on leave) or which task
//! booked it; `used` tracks how many seconds of each slot are consumed so
//! tasks can start and end mid-slot and hand the remainder to a successor.
//!
//! Invariants: `0 <= used[i] <= granularity`, and the per-task usage
//! entries of a slot always sum to `used[i]`.

use slotplan_core::{LeaveKind, ScheduleError};
use std::collections::BTreeMap;

/// State of one slot
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Cell {
    /// Working time, not booked
    Free,
    /// Outside the resource's working hours
    OffShift,
    /// Blanked by a leave of the given kind
    OnLeave(LeaveKind),
    /// Booked by the task with this arena index
    Booked(u32),
}

/// One task's share of a slot
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct UsageEntry {
    pub task: u32,
    /// Seconds into the slot at which this task's share begins
    pub offset: u32,
    /// Seconds of the slot consumed by this task
    pub seconds: u32,
}

/// Outcome of a successful booking
#[derive(Clone, Copy, Debug)]
pub struct BookingGain {
    /// Effort hours gained, scaled by efficiency
    pub effort_hours: f64,
    /// Seconds into the slot at which the booked share begins
    pub offset: u32,
    /// Seconds booked
    pub seconds: u32,
}

#[derive(Clone, Debug)]
pub struct Scoreboard {
    cells: Vec<Cell>,
    used: Vec<u32>,
    usage: BTreeMap<usize, Vec<UsageEntry>>,
    /// Seconds consumed by dependency-gap offsets rather than bookings
    reserved: BTreeMap<usize, u32>,
    first_booked: Option<usize>,
    last_booked: Option<usize>,
    granularity: u32,
}

impl Scoreboard {
    pub fn new(size: usize, granularity: u32) -> Self {
        Self {
            cells: vec![Cell::Free; size],
            used: vec![0; size],
            usage: BTreeMap::new(),
            reserved: BTreeMap::new(),
            first_booked: None,
            last_booked: None,
            granularity,
        }
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    pub fn granularity(&self) -> u32 {
        self.granularity
    }

    pub fn cell(&self, idx: usize) -> Cell {
        self.cells[idx]
    }

    pub fn first_booked(&self) -> Option<usize> {
        self.first_booked
    }

    pub fn last_booked(&self) -> Option<usize> {
        self.last_booked
    }

    pub fn mark_off_shift(&mut self, idx: usize) {
        if self.cells[idx] == Cell::Free {
            self.cells[idx] = Cell::OffShift;
        }
    }

    /// Overlay a leave; a higher-ranked kind replaces a lower-ranked one,
    /// and leaves replace a plain off-shift tag
    pub fn mark_leave(&mut self, idx: usize, kind: LeaveKind) {
        match self.cells[idx] {
            Cell::Free | Cell::OffShift => self.cells[idx] = Cell::OnLeave(kind),
            Cell::OnLeave(existing) if kind.rank() > existing.rank() => {
                self.cells[idx] = Cell::OnLeave(kind);
            }
            _ => {}
        }
    }

    /// Whether the slot is working time for this resource (booked or not)
    pub fn on_shift(&self, idx: usize) -> bool {
        !matches!(self.cells[idx], Cell::OffShift | Cell::OnLeave(_))
    }

    /// Unconsumed seconds remaining in the slot
    pub fn available_seconds(&self, idx: usize) -> u32 {
        self.granularity.saturating_sub(self.used[idx])
    }

    /// Whether any time in the slot can still be booked
    pub fn is_available(&self, idx: usize) -> bool {
        self.on_shift(idx) && self.available_seconds(idx) > 0
    }

    /// Mark the leading `seconds` of the slot as already consumed, used when
    /// a task enters a slot mid-way because its predecessor ended there
    pub fn reserve_offset(&mut self, idx: usize, seconds: u32) {
        let clamped = seconds.min(self.granularity);
        if self.used[idx] < clamped {
            *self.reserved.entry(idx).or_insert(0) += clamped - self.used[idx];
            self.used[idx] = clamped;
        }
    }

    /// Book the remaining time of a slot for a task.
    ///
    /// Returns the effort gained (hours, scaled by `efficiency`) together
    /// with the offset and length of the booked share.
    pub fn book(&mut self, idx: usize, task: u32, efficiency: f64) -> BookingGain {
        let offset = self.used[idx];
        let seconds = self.granularity - offset;

        self.usage.entry(idx).or_default().push(UsageEntry {
            task,
            offset,
            seconds,
        });
        self.used[idx] = self.granularity;
        self.cells[idx] = Cell::Booked(task);

        if self.first_booked.map_or(true, |f| idx < f) {
            self.first_booked = Some(idx);
        }
        if self.last_booked.map_or(true, |l| idx > l) {
            self.last_booked = Some(idx);
        }

        BookingGain {
            effort_hours: f64::from(seconds) / 3600.0 * efficiency,
            offset,
            seconds,
        }
    }

    /// Shrink the task's most recent share of a slot to `seconds_kept`,
    /// releasing the remainder for other tasks. The cell returns to `Free`
    /// so a successor can book what is left. With `keep_tail` the share is
    /// anchored to the end of the slot (a backward walk works the tail).
    pub fn trim_booking(
        &mut self,
        idx: usize,
        task: u32,
        seconds_kept: u32,
        keep_tail: bool,
    ) -> Result<(), ScheduleError> {
        let entries = self
            .usage
            .get_mut(&idx)
            .ok_or_else(|| ScheduleError::Internal(format!("no usage to trim in slot {idx}")))?;
        let entry = entries
            .iter_mut()
            .rev()
            .find(|e| e.task == task)
            .ok_or_else(|| {
                ScheduleError::Internal(format!("task {task} holds no share of slot {idx}"))
            })?;

        if seconds_kept > entry.seconds {
            return Err(ScheduleError::Internal(format!(
                "cannot grow share of slot {idx} from {} to {seconds_kept}",
                entry.seconds
            )));
        }

        let released = entry.seconds - seconds_kept;
        entry.seconds = seconds_kept;
        if keep_tail {
            entry.offset += released;
        }
        if released > 0 {
            self.used[idx] -= released;
            self.cells[idx] = Cell::Free;
        }
        Ok(())
    }

    /// Usage entries of a slot, in booking order
    pub fn usage_at(&self, idx: usize) -> &[UsageEntry] {
        self.usage.get(&idx).map_or(&[], Vec::as_slice)
    }

    /// Iterate all slots with usage, ascending
    pub fn usage(&self) -> impl Iterator<Item = (usize, &[UsageEntry])> {
        self.usage.iter().map(|(idx, entries)| (*idx, entries.as_slice()))
    }

    pub fn used_seconds(&self, idx: usize) -> u32 {
        self.used[idx]
    }

    /// Total booked seconds of one task across all slots
    pub fn task_seconds(&self, task: u32) -> i64 {
        self.usage
            .values()
            .flatten()
            .filter(|e| e.task == task)
            .map(|e| i64::from(e.seconds))
            .sum()
    }

    /// Count of working-time slots that are still unbooked
    pub fn free_slots(&self) -> usize {
        self.cells.iter().filter(|c| matches!(c, Cell::Free)).count()
    }

    /// Count of working-time slots (free or booked)
    pub fn work_slots(&self) -> usize {
        self.cells
            .iter()
            .filter(|c| matches!(c, Cell::Free | Cell::Booked(_)))
            .count()
    }

    /// Verify the fractional accounting invariants, used after a scenario
    /// completes to catch internal bookkeeping errors
    pub fn check_consistency(&self) -> Result<(), ScheduleError> {
        for (&idx, entries) in &self.usage {
            let booked: u32 = entries.iter().map(|e| e.seconds).sum();
            let reserved = self.reserved.get(&idx).copied().unwrap_or(0);
            if booked + reserved != self.used[idx] {
                return Err(ScheduleError::Internal(format!(
                    "slot {idx}: {booked}s booked plus {reserved}s reserved does not match {}s used",
                    self.used[idx]
                )));
            }
            if self.used[idx] > self.granularity {
                return Err(ScheduleError::Internal(format!(
                    "slot {idx}: used {} exceeds granularity",
                    self.used[idx]
                )));
            }
        }
        Ok(())
    }
}
