//! # slotplan-core
//!
//! Domain model and traits for the slotplan scheduling engine.
//!
//! This crate provides:
//! - Domain types: `Project`, `Task`, `Resource`, `Shift`, `Scenario`
//! - The schedule result types handed to reporters: `Schedule`,
//!   `ScenarioSchedule`, `ResourceUsage`
//! - The `Scheduler` trait, error and warning types, and `CancelFlag`
//!
//! The model is the fully resolved form a parser produces: dependency
//! targets and resource references are dotted paths, never symbolic
//! shortcuts. Timestamps are UTC throughout; working hours are evaluated in
//! each resource's local timezone by the solver.
//!
//! ## Example
//!
//! ```rust
//! use chrono::{TimeZone, Utc};
//! use slotplan_core::{Project, Resource, Task};
//!
//! let mut project = Project::new(
//!     "oven",
//!     Utc.with_ymd_and_hms(2025, 5, 10, 0, 0, 0).unwrap(),
//!     Utc.with_ymd_and_hms(2025, 5, 17, 0, 0, 0).unwrap(),
//! );
//! project.resources.push(Resource::new("heater"));
//! project.tasks.push(Task::new("heat").effort_hours(2.0).allocate("heater"));
//! ```

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;

// ============================================================================
// Type Aliases & Constants
// ============================================================================

/// Dotted path uniquely identifying a task (e.g. `"build.compile"`)
pub type TaskId = String;

/// Dotted path uniquely identifying a resource
pub type ResourceId = String;

/// Identifier of a shift definition
pub type ShiftId = String;

/// Default slot granularity in seconds (one hour)
pub const DEFAULT_GRANULARITY: u32 = 3600;

/// Default task priority
pub const DEFAULT_PRIORITY: u32 = 500;

// ============================================================================
// Time Primitives
// ============================================================================

/// Half-open interval `[start, end)` of absolute time
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeInterval {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl TimeInterval {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self { start, end }
    }

    /// Whether the instant falls inside the interval
    pub fn contains(&self, t: DateTime<Utc>) -> bool {
        self.start <= t && t < self.end
    }

    pub fn seconds(&self) -> i64 {
        (self.end - self.start).num_seconds()
    }
}

/// Time range within a day, in minutes from midnight.
///
/// A range whose `end` is not after its `start` wraps past midnight into the
/// following day (e.g. `22:00 - 06:00`).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeRange {
    pub start: u16,
    pub end: u16,
}

impl TimeRange {
    pub fn new(start_h: u16, start_m: u16, end_h: u16, end_m: u16) -> Self {
        Self {
            start: start_h * 60 + start_m,
            end: end_h * 60 + end_m,
        }
    }

    pub fn crosses_midnight(&self) -> bool {
        self.end <= self.start
    }

    pub fn duration_hours(&self) -> f64 {
        let minutes = if self.crosses_midnight() {
            24 * 60 - self.start + self.end
        } else {
            self.end - self.start
        };
        f64::from(minutes) / 60.0
    }
}

/// Weekly working-hour plan: a list of intraday ranges per weekday.
///
/// Index 0 is Monday. Days without ranges are non-working.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct WeekPlan {
    days: [Vec<TimeRange>; 7],
}

impl WeekPlan {
    /// A plan with no working time at all
    pub fn empty() -> Self {
        Self::default()
    }

    /// The conventional Mon-Fri 09:00-17:00 week
    pub fn standard() -> Self {
        Self::empty().weekdays(0..=4, &[TimeRange::new(9, 0, 17, 0)])
    }

    /// Set the ranges for a single weekday (0 = Monday .. 6 = Sunday)
    pub fn day(mut self, weekday: usize, ranges: &[TimeRange]) -> Self {
        self.days[weekday] = ranges.to_vec();
        self
    }

    /// Set the same ranges for a span of weekdays
    pub fn weekdays(mut self, weekdays: impl IntoIterator<Item = usize>, ranges: &[TimeRange]) -> Self {
        for d in weekdays {
            self.days[d] = ranges.to_vec();
        }
        self
    }

    /// Ranges defined for the given weekday (0 = Monday)
    pub fn ranges(&self, weekday: usize) -> &[TimeRange] {
        &self.days[weekday % 7]
    }

    pub fn is_empty(&self) -> bool {
        self.days.iter().all(Vec::is_empty)
    }

    /// Total working hours on the given weekday
    pub fn daily_hours(&self, weekday: usize) -> f64 {
        self.ranges(weekday).iter().map(TimeRange::duration_hours).sum()
    }
}

// ============================================================================
// Money
// ============================================================================

/// Monetary amount with currency
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Money {
    pub amount: Decimal,
    pub currency: String,
}

impl Money {
    pub fn new(amount: impl Into<Decimal>, currency: impl Into<String>) -> Self {
        Self {
            amount: amount.into(),
            currency: currency.into(),
        }
    }
}

// ============================================================================
// Leaves
// ============================================================================

/// Classification of off-duty intervals
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum LeaveKind {
    Project,
    Holiday,
    Sick,
    Special,
    Unpaid,
    Annual,
    Unemployed,
}

impl LeaveKind {
    /// Rank used when overlapping leaves compete for a slot; higher wins
    pub fn rank(self) -> u8 {
        match self {
            LeaveKind::Project => 0,
            LeaveKind::Holiday => 1,
            LeaveKind::Sick => 2,
            LeaveKind::Special => 3,
            LeaveKind::Unpaid => 4,
            LeaveKind::Annual => 5,
            LeaveKind::Unemployed => 6,
        }
    }
}

/// An off-duty interval attached to the project, a shift or a resource
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Leave {
    pub kind: LeaveKind,
    pub interval: TimeInterval,
}

impl Leave {
    pub fn new(kind: LeaveKind, start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self {
            kind,
            interval: TimeInterval::new(start, end),
        }
    }
}

// ============================================================================
// Dependencies & Allocations
// ============================================================================

/// A dependency of one task on another.
///
/// The anchor defaults to the predecessor's end; `on_start` switches it to
/// the predecessor's start. `gap_duration` inserts calendar time after the
/// anchor, `gap_length` inserts working time, and `max_gap_duration` caps
/// the idle time between the anchor and the dependent task's start.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Dependency {
    /// Dotted path of the predecessor task
    pub target: TaskId,
    /// Calendar seconds inserted after the anchor
    pub gap_duration: i64,
    /// Working seconds inserted after the anchor
    pub gap_length: i64,
    /// Upper bound in calendar seconds on the idle gap
    pub max_gap_duration: Option<i64>,
    /// Anchor on the predecessor's start instead of its end
    pub on_start: bool,
    /// Anchor on the predecessor's end (the default)
    pub on_end: bool,
}

impl Dependency {
    pub fn on(target: impl Into<TaskId>) -> Self {
        Self {
            target: target.into(),
            gap_duration: 0,
            gap_length: 0,
            max_gap_duration: None,
            on_start: false,
            on_end: true,
        }
    }

    /// Insert calendar time between the anchor and the dependent start
    pub fn gap_duration(mut self, seconds: i64) -> Self {
        self.gap_duration = seconds;
        self
    }

    /// Insert working time between the anchor and the dependent start
    pub fn gap_length(mut self, seconds: i64) -> Self {
        self.gap_length = seconds;
        self
    }

    /// Cap the idle time between the anchor and the dependent start
    pub fn max_gap_duration(mut self, seconds: i64) -> Self {
        self.max_gap_duration = Some(seconds);
        self
    }

    /// Anchor on the predecessor's start
    pub fn on_start(mut self) -> Self {
        self.on_start = true;
        self.on_end = false;
        self
    }
}

/// Resource demand of a task: a primary set and an optional alternative set.
///
/// All resources of the chosen set must be available simultaneously for a
/// slot to be booked. The set is chosen once, at the first booking.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Allocation {
    pub resources: Vec<ResourceId>,
    pub alternatives: Vec<ResourceId>,
    /// Keep the chosen set for the rest of the task
    pub persistent: bool,
}

impl Allocation {
    pub fn of(resources: impl IntoIterator<Item = impl Into<ResourceId>>) -> Self {
        Self {
            resources: resources.into_iter().map(Into::into).collect(),
            alternatives: Vec::new(),
            persistent: true,
        }
    }

    pub fn alternative(mut self, resources: impl IntoIterator<Item = impl Into<ResourceId>>) -> Self {
        self.alternatives = resources.into_iter().map(Into::into).collect();
        self
    }
}

// ============================================================================
// Limits
// ============================================================================

/// Bucketing period of a booking limit
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum LimitPeriod {
    /// Calendar-day buckets
    Daily,
    /// ISO-week buckets, Monday start
    Weekly,
    /// Nominal 30-day buckets
    Monthly,
    /// One bucket over the whole interval
    Interval,
}

/// A booking-time cap declared on a task or resource.
///
/// `hours` is the cap per bucket in working hours; the engine converts it to
/// slots. An `upper` limit rejects bookings at the cap, a lower limit keeps
/// buckets from being satisfied below it. When `resource` is set, the limit
/// only applies to bookings of that resource.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LimitSpec {
    pub period: LimitPeriod,
    pub upper: bool,
    pub hours: f64,
    /// Interval the limit covers; defaults to the whole project span
    pub interval: Option<TimeInterval>,
    pub resource: Option<ResourceId>,
}

impl LimitSpec {
    pub fn daily_max(hours: f64) -> Self {
        Self::new(LimitPeriod::Daily, true, hours)
    }

    pub fn weekly_max(hours: f64) -> Self {
        Self::new(LimitPeriod::Weekly, true, hours)
    }

    pub fn monthly_max(hours: f64) -> Self {
        Self::new(LimitPeriod::Monthly, true, hours)
    }

    pub fn maximum(hours: f64) -> Self {
        Self::new(LimitPeriod::Interval, true, hours)
    }

    pub fn new(period: LimitPeriod, upper: bool, hours: f64) -> Self {
        Self {
            period,
            upper,
            hours,
            interval: None,
            resource: None,
        }
    }

    pub fn over(mut self, interval: TimeInterval) -> Self {
        self.interval = Some(interval);
        self
    }

    pub fn for_resource(mut self, resource: impl Into<ResourceId>) -> Self {
        self.resource = Some(resource.into());
        self
    }
}

// ============================================================================
// Scenario
// ============================================================================

/// A scheduling scenario; the first one is conventionally called "plan"
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Scenario {
    pub id: String,
    pub name: String,
    pub active: bool,
    pub overrides: Vec<ScenarioOverride>,
}

impl Scenario {
    pub fn new(id: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            active: true,
            overrides: Vec::new(),
        }
    }

    pub fn inactive(mut self) -> Self {
        self.active = false;
        self
    }

    pub fn with_override(mut self, o: ScenarioOverride) -> Self {
        self.overrides.push(o);
        self
    }
}

/// A scenario-specific attribute value, replacing the inherited one
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum ScenarioOverride {
    TaskEffort { task: TaskId, hours: f64 },
    TaskDuration { task: TaskId, seconds: i64 },
    TaskLength { task: TaskId, seconds: i64 },
    TaskStart { task: TaskId, start: DateTime<Utc> },
    TaskEnd { task: TaskId, end: DateTime<Utc> },
    TaskPriority { task: TaskId, priority: u32 },
    ResourceEfficiency { resource: ResourceId, efficiency: f64 },
    ResourceRate { resource: ResourceId, rate: Money },
}

// ============================================================================
// Task
// ============================================================================

/// A node of the task tree. Tasks without children are leaves and carry the
/// actual work; containers roll up their children's dates.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Task {
    /// Local identifier; the dotted path is formed by the tree position
    pub id: String,
    pub name: String,
    /// Working hours of effort; 0 means unset
    pub effort_hours: f64,
    /// Calendar seconds; 0 means unset
    pub duration: i64,
    /// Working seconds; 0 means unset
    pub length: i64,
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
    /// ASAP (`true`) or ALAP (`false`); `None` inherits from the parent or
    /// the project default
    pub forward: Option<bool>,
    pub milestone: bool,
    /// `None` inherits from the parent (project default 500)
    pub priority: Option<u32>,
    pub depends: Vec<Dependency>,
    /// Inverse dependencies: this task precedes each target
    pub precedes: Vec<Dependency>,
    /// `None` inherits the parent's allocation
    pub allocate: Option<Allocation>,
    pub limits: Vec<LimitSpec>,
    pub flags: Vec<String>,
    pub children: Vec<Task>,
}

/// Flag marking a task that may not be split across non-working intervals
pub const FLAG_CONTIGUOUS: &str = "contiguous";

impl Task {
    pub fn new(id: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            effort_hours: 0.0,
            duration: 0,
            length: 0,
            start: None,
            end: None,
            forward: None,
            milestone: false,
            priority: None,
            depends: Vec::new(),
            precedes: Vec::new(),
            allocate: None,
            limits: Vec::new(),
            flags: Vec::new(),
            children: Vec::new(),
        }
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Set the effort in working hours
    pub fn effort_hours(mut self, hours: f64) -> Self {
        self.effort_hours = hours;
        self
    }

    /// Set the calendar duration in seconds
    pub fn duration(mut self, seconds: i64) -> Self {
        self.duration = seconds;
        self
    }

    /// Set the working-time length in seconds
    pub fn length(mut self, seconds: i64) -> Self {
        self.length = seconds;
        self
    }

    pub fn starts(mut self, start: DateTime<Utc>) -> Self {
        self.start = Some(start);
        self
    }

    pub fn ends(mut self, end: DateTime<Utc>) -> Self {
        self.end = Some(end);
        self
    }

    /// Schedule as soon as possible (forward)
    pub fn asap(mut self) -> Self {
        self.forward = Some(true);
        self
    }

    /// Schedule as late as possible (backward)
    pub fn alap(mut self) -> Self {
        self.forward = Some(false);
        self
    }

    pub fn milestone(mut self) -> Self {
        self.milestone = true;
        self
    }

    pub fn priority(mut self, priority: u32) -> Self {
        self.priority = Some(priority);
        self
    }

    /// Add a finish-to-start dependency on the given task path
    pub fn depends_on(mut self, target: impl Into<TaskId>) -> Self {
        self.depends.push(Dependency::on(target));
        self
    }

    pub fn with_dependency(mut self, dep: Dependency) -> Self {
        self.depends.push(dep);
        self
    }

    /// Declare that this task precedes the given task path
    pub fn precedes(mut self, target: impl Into<TaskId>) -> Self {
        self.precedes.push(Dependency::on(target));
        self
    }

    /// Add a resource to the primary allocation set
    pub fn allocate(mut self, resource: impl Into<ResourceId>) -> Self {
        self.allocate
            .get_or_insert_with(Allocation::default)
            .resources
            .push(resource.into());
        self
    }

    /// Replace the allocation wholesale
    pub fn allocation(mut self, allocation: Allocation) -> Self {
        self.allocate = Some(allocation);
        self
    }

    pub fn limit(mut self, limit: LimitSpec) -> Self {
        self.limits.push(limit);
        self
    }

    pub fn flag(mut self, flag: impl Into<String>) -> Self {
        self.flags.push(flag.into());
        self
    }

    pub fn child(mut self, child: Task) -> Self {
        self.children.push(child);
        self
    }

    pub fn is_leaf(&self) -> bool {
        self.children.is_empty()
    }

    pub fn is_container(&self) -> bool {
        !self.children.is_empty()
    }

    /// A leaf with no work metric and some explicit date acts as a milestone
    pub fn is_implicit_milestone(&self) -> bool {
        self.is_leaf()
            && self.effort_hours == 0.0
            && self.duration == 0
            && self.length == 0
            && (self.start.is_some() || self.end.is_some())
    }
}

// ============================================================================
// Resource & Shift
// ============================================================================

/// A node of the resource tree. Leaves hold bookings; parents aggregate
/// their children and may carry limits that cap the whole group.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Resource {
    pub id: String,
    pub name: String,
    /// Effort produced per booked hour (default 1.0)
    pub efficiency: f64,
    /// Hourly rate for cost computation
    pub rate: Option<Money>,
    /// IANA timezone name the working hours are local to
    pub timezone: Option<String>,
    /// Direct working hours; overrides any shift reference
    pub working_hours: Option<WeekPlan>,
    /// Reference to a named shift
    pub shift: Option<ShiftId>,
    pub leaves: Vec<Leave>,
    pub limits: Vec<LimitSpec>,
    pub managers: Vec<ResourceId>,
    pub children: Vec<Resource>,
}

impl Resource {
    pub fn new(id: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            efficiency: 1.0,
            rate: None,
            timezone: None,
            working_hours: None,
            shift: None,
            leaves: Vec::new(),
            limits: Vec::new(),
            managers: Vec::new(),
            children: Vec::new(),
        }
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn efficiency(mut self, efficiency: f64) -> Self {
        self.efficiency = efficiency;
        self
    }

    pub fn rate(mut self, rate: Money) -> Self {
        self.rate = Some(rate);
        self
    }

    /// Set the IANA timezone the resource's working hours are local to
    pub fn timezone(mut self, tz: impl Into<String>) -> Self {
        self.timezone = Some(tz.into());
        self
    }

    pub fn working_hours(mut self, plan: WeekPlan) -> Self {
        self.working_hours = Some(plan);
        self
    }

    pub fn shift(mut self, shift: impl Into<ShiftId>) -> Self {
        self.shift = Some(shift.into());
        self
    }

    pub fn leave(mut self, leave: Leave) -> Self {
        self.leaves.push(leave);
        self
    }

    pub fn limit(mut self, limit: LimitSpec) -> Self {
        self.limits.push(limit);
        self
    }

    pub fn manager(mut self, manager: impl Into<ResourceId>) -> Self {
        self.managers.push(manager.into());
        self
    }

    pub fn child(mut self, child: Resource) -> Self {
        self.children.push(child);
        self
    }

    pub fn is_leaf(&self) -> bool {
        self.children.is_empty()
    }
}

/// A named bundle of working hours and leaves, referenced by resources
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Shift {
    pub id: ShiftId,
    pub name: String,
    pub working_hours: WeekPlan,
    pub leaves: Vec<Leave>,
}

impl Shift {
    pub fn new(id: impl Into<ShiftId>, working_hours: WeekPlan) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            working_hours,
            leaves: Vec::new(),
        }
    }

    pub fn leave(mut self, leave: Leave) -> Self {
        self.leaves.push(leave);
        self
    }
}

// ============================================================================
// Project
// ============================================================================

/// The root of the model: bounds, granularity, default working time, global
/// leaves, scenarios, and the task/resource/shift trees.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Project {
    pub id: String,
    pub name: String,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    /// Slot granularity in seconds
    pub granularity: u32,
    /// Default working-time predicate for entities without own hours
    pub working_hours: WeekPlan,
    /// Global leaves blanking every resource
    pub leaves: Vec<Leave>,
    /// Project-wide scheduling direction default (`true` = ALAP)
    pub alap: bool,
    pub currency: String,
    pub scenarios: Vec<Scenario>,
    pub tasks: Vec<Task>,
    pub resources: Vec<Resource>,
    pub shifts: Vec<Shift>,
}

impl Project {
    pub fn new(name: impl Into<String>, start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        let name = name.into();
        Self {
            id: name.clone(),
            name,
            start,
            end,
            granularity: DEFAULT_GRANULARITY,
            working_hours: WeekPlan::standard(),
            leaves: Vec::new(),
            alap: false,
            currency: "EUR".into(),
            scenarios: vec![Scenario::new("plan")],
            tasks: Vec::new(),
            resources: Vec::new(),
            shifts: Vec::new(),
        }
    }

    /// Look up a task by dotted path, falling back to a recursive search by
    /// simple id when the path does not resolve
    pub fn get_task(&self, path: &str) -> Option<&Task> {
        if let Some(task) = lookup_by_path(&self.tasks, path, Task::children_ref) {
            return Some(task);
        }
        find_by_id(&self.tasks, path, Task::children_ref, |t| &t.id)
    }

    /// Look up a resource by dotted path or simple id
    pub fn get_resource(&self, path: &str) -> Option<&Resource> {
        if let Some(res) = lookup_by_path(&self.resources, path, Resource::children_ref) {
            return Some(res);
        }
        find_by_id(&self.resources, path, Resource::children_ref, |r| &r.id)
    }

    pub fn get_shift(&self, id: &str) -> Option<&Shift> {
        self.shifts.iter().find(|s| s.id == id)
    }

    /// All leaf tasks in declaration order
    pub fn leaf_tasks(&self) -> Vec<&Task> {
        let mut leaves = Vec::new();
        fn collect<'a>(tasks: &'a [Task], out: &mut Vec<&'a Task>) {
            for task in tasks {
                if task.is_leaf() {
                    out.push(task);
                } else {
                    collect(&task.children, out);
                }
            }
        }
        collect(&self.tasks, &mut leaves);
        leaves
    }

    /// Sum of leaf-task effort hours in the base scenario
    pub fn total_effort_hours(&self) -> f64 {
        self.leaf_tasks().iter().map(|t| t.effort_hours).sum()
    }
}

impl Task {
    fn children_ref(&self) -> &[Task] {
        &self.children
    }
}

impl Resource {
    fn children_ref(&self) -> &[Resource] {
        &self.children
    }
}

fn lookup_by_path<'a, T>(nodes: &'a [T], path: &str, children: fn(&T) -> &[T]) -> Option<&'a T>
where
    T: HasId,
{
    let mut segments = path.split('.');
    let first = segments.next()?;
    let mut current = nodes.iter().find(|n| n.node_id() == first)?;
    for segment in segments {
        current = children(current).iter().find(|n| n.node_id() == segment)?;
    }
    Some(current)
}

fn find_by_id<'a, T>(
    nodes: &'a [T],
    id: &str,
    children: fn(&T) -> &[T],
    get_id: fn(&T) -> &str,
) -> Option<&'a T> {
    for node in nodes {
        if get_id(node) == id {
            return Some(node);
        }
        if let Some(found) = find_by_id(children(node), id, children, get_id) {
            return Some(found);
        }
    }
    None
}

trait HasId {
    fn node_id(&self) -> &str;
}

impl HasId for Task {
    fn node_id(&self) -> &str {
        &self.id
    }
}

impl HasId for Resource {
    fn node_id(&self) -> &str {
        &self.id
    }
}

// ============================================================================
// Schedule (Result)
// ============================================================================

/// The result of scheduling every active scenario of a project
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Schedule {
    pub scenarios: Vec<ScenarioSchedule>,
}

/// The computed schedule of one scenario
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ScenarioSchedule {
    pub scenario_id: String,
    /// Effective end bound; may exceed the declared project end when the
    /// driver extended the span to fit the workload
    pub project_end: DateTime<Utc>,
    pub tasks: BTreeMap<TaskId, ScheduledTask>,
    pub resources: BTreeMap<ResourceId, ResourceUsage>,
    pub warnings: Vec<ScheduleWarning>,
}

impl ScenarioSchedule {
    pub fn task(&self, path: &str) -> Option<&ScheduledTask> {
        self.tasks.get(path)
    }

    pub fn resource(&self, path: &str) -> Option<&ResourceUsage> {
        self.resources.get(path)
    }

    pub fn has_warning(&self, kind: WarningKind) -> bool {
        self.warnings.iter().any(|w| w.kind == kind)
    }
}

/// A task with computed schedule information
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ScheduledTask {
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
    pub scheduled: bool,
    pub container: bool,
    /// Path criticalness the ready queue ranked the task by
    pub criticalness: f64,
}

/// Booked time of one leaf resource in one scenario
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourceUsage {
    /// Merged per-task booking intervals, ordered by start
    pub bookings: Vec<Booking>,
    /// Exact booked seconds per task, including fractional final slots
    pub per_task_seconds: BTreeMap<TaskId, i64>,
    /// Tasks this resource (or a descendant) worked on
    pub duties: Vec<TaskId>,
    /// Slots that stayed free within working time
    pub free_slots: usize,
    /// Working-time slots (free or booked)
    pub work_slots: usize,
    /// `Σ (seconds/3600) × rate`, when the resource has a rate
    pub cost: Option<Money>,
}

impl ResourceUsage {
    pub fn allocated_seconds(&self) -> i64 {
        self.per_task_seconds.values().sum()
    }
}

/// A contiguous interval a resource spent on one task
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Booking {
    pub task: TaskId,
    pub interval: TimeInterval,
}

// ============================================================================
// Warnings & Errors
// ============================================================================

/// Non-fatal conditions collected while scheduling a scenario
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum WarningKind {
    /// A task's slot walk left the project window
    UnscheduledTask,
    /// No task was ready while unscheduled tasks remained
    Deadlock,
    /// Limits were so tight no progress was possible
    LimitInfeasible,
    /// A `max_gap_duration` bound could not be met
    MaxGapViolation,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ScheduleWarning {
    pub kind: WarningKind,
    pub message: String,
}

impl ScheduleWarning {
    pub fn new(kind: WarningKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

/// Fatal scheduling errors
#[derive(Debug, Error)]
pub enum ScheduleError {
    #[error("unknown task reference: {0}")]
    UnknownTask(String),

    #[error("unknown resource reference: {0}")]
    UnknownResource(String),

    #[error("unknown shift reference: {0}")]
    UnknownShift(String),

    #[error("no scenario with index {0}")]
    UnknownScenario(usize),

    #[error("invalid timezone: {0}")]
    InvalidTimezone(String),

    #[error("invalid project: {0}")]
    InvalidModel(String),

    #[error("scheduling cancelled")]
    Cancelled,

    #[error("internal error: {0}")]
    Internal(String),
}

// ============================================================================
// Cancellation
// ============================================================================

/// Cooperative cancellation flag checked by the driver between tasks and on
/// every iteration of a slot walk's outer loop
#[derive(Clone, Debug, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

// ============================================================================
// Traits
// ============================================================================

/// Core scheduling abstraction
pub trait Scheduler: Send + Sync {
    /// Schedule a single scenario by index
    fn schedule_scenario(
        &self,
        project: &Project,
        scenario: usize,
        cancel: &CancelFlag,
    ) -> Result<ScenarioSchedule, ScheduleError>;

    /// Schedule every active scenario in declaration order
    fn schedule_all(&self, project: &Project, cancel: &CancelFlag) -> Result<Schedule, ScheduleError>;
}

// ============================================================================
// Tests
// ============================================================================
