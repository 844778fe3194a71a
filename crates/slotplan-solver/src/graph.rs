//! Task and resource arenas
//!
//! The model trees are flattened into index-addressed arenas before
//! scheduling: parent/child links and cross-references (dependencies,
//! allocations, limit scopes) become dense indices, and every node carries
//! its qualified dotted path. Scenario overrides and parent inheritance are
//! resolved here into per-scenario plans the walker operates on.

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use slotplan_core::{
    Money, Project, Resource, ScenarioOverride, ScheduleError, Task, TimeInterval, WeekPlan,
    DEFAULT_PRIORITY, FLAG_CONTIGUOUS,
};

use crate::limits::{Limit, LimitSet};
use crate::workhours;

// ============================================================================
// Arenas
// ============================================================================

/// A task node in declaration (preorder) order
#[derive(Clone, Debug)]
pub struct TaskNode {
    pub path: String,
    pub name: String,
    pub parent: Option<usize>,
    pub children: Vec<usize>,
    /// Declaration order; doubles as the ready-queue tie breaker
    pub seqno: usize,
    /// Declared attributes, children stripped
    pub decl: Task,
}

impl TaskNode {
    pub fn is_leaf(&self) -> bool {
        self.children.is_empty()
    }
}

#[derive(Clone, Debug)]
pub struct ResourceNode {
    pub path: String,
    pub name: String,
    pub parent: Option<usize>,
    pub children: Vec<usize>,
    pub decl: Resource,
}

impl ResourceNode {
    pub fn is_leaf(&self) -> bool {
        self.children.is_empty()
    }
}

/// Flattened task tree
#[derive(Clone, Debug, Default)]
pub struct TaskArena {
    pub nodes: Vec<TaskNode>,
}

impl TaskArena {
    pub fn build(tasks: &[Task]) -> Self {
        let mut arena = Self::default();
        for task in tasks {
            arena.push_subtree(task, None, "");
        }
        arena
    }

    fn push_subtree(&mut self, task: &Task, parent: Option<usize>, prefix: &str) -> usize {
        let path = if prefix.is_empty() {
            task.id.clone()
        } else {
            format!("{prefix}.{}", task.id)
        };
        let idx = self.nodes.len();
        self.nodes.push(TaskNode {
            path: path.clone(),
            name: task.name.clone(),
            parent,
            children: Vec::new(),
            seqno: idx,
            decl: Task {
                children: Vec::new(),
                ..task.clone()
            },
        });
        for child in &task.children {
            let child_idx = self.push_subtree(child, Some(idx), &path);
            self.nodes[idx].children.push(child_idx);
        }
        idx
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Leaf node indices in declaration order
    pub fn leaves(&self) -> Vec<usize> {
        (0..self.nodes.len()).filter(|&i| self.nodes[i].is_leaf()).collect()
    }

    /// Ancestor indices from the immediate parent to the root
    pub fn ancestors(&self, mut idx: usize) -> Vec<usize> {
        let mut chain = Vec::new();
        while let Some(parent) = self.nodes[idx].parent {
            chain.push(parent);
            idx = parent;
        }
        chain
    }

    /// Resolve a reference to a node index.
    ///
    /// Tries, in order: the exact dotted path, the reference relative to
    /// each enclosing container of `context`, and finally the first node
    /// (in declaration order) whose path ends with the reference.
    pub fn resolve(&self, context: Option<usize>, target: &str) -> Option<usize> {
        if let Some(idx) = self.find_path(target) {
            return Some(idx);
        }

        if let Some(ctx) = context {
            let mut scope = self.nodes[ctx].parent;
            while let Some(s) = scope {
                let qualified = format!("{}.{target}", self.nodes[s].path);
                if let Some(idx) = self.find_path(&qualified) {
                    return Some(idx);
                }
                scope = self.nodes[s].parent;
            }
        }

        let suffix = format!(".{target}");
        self.nodes
            .iter()
            .position(|n| n.path.ends_with(&suffix))
    }

    fn find_path(&self, path: &str) -> Option<usize> {
        self.nodes.iter().position(|n| n.path == path)
    }
}

/// Flattened resource tree
#[derive(Clone, Debug, Default)]
pub struct ResourceArena {
    pub nodes: Vec<ResourceNode>,
}

impl ResourceArena {
    pub fn build(resources: &[Resource]) -> Self {
        let mut arena = Self::default();
        for resource in resources {
            arena.push_subtree(resource, None, "");
        }
        arena
    }

    fn push_subtree(&mut self, resource: &Resource, parent: Option<usize>, prefix: &str) -> usize {
        let path = if prefix.is_empty() {
            resource.id.clone()
        } else {
            format!("{prefix}.{}", resource.id)
        };
        let idx = self.nodes.len();
        self.nodes.push(ResourceNode {
            path: path.clone(),
            name: resource.name.clone(),
            parent,
            children: Vec::new(),
            decl: Resource {
                children: Vec::new(),
                ..resource.clone()
            },
        });
        for child in &resource.children {
            let child_idx = self.push_subtree(child, Some(idx), &path);
            self.nodes[idx].children.push(child_idx);
        }
        idx
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn leaves(&self) -> Vec<usize> {
        (0..self.nodes.len()).filter(|&i| self.nodes[i].is_leaf()).collect()
    }

    pub fn ancestors(&self, mut idx: usize) -> Vec<usize> {
        let mut chain = Vec::new();
        while let Some(parent) = self.nodes[idx].parent {
            chain.push(parent);
            idx = parent;
        }
        chain
    }

    pub fn resolve(&self, target: &str) -> Option<usize> {
        if let Some(idx) = self.nodes.iter().position(|n| n.path == target) {
            return Some(idx);
        }
        let suffix = format!(".{target}");
        self.nodes.iter().position(|n| n.path.ends_with(&suffix))
    }
}

// ============================================================================
// Per-scenario plans
// ============================================================================

/// A resolved dependency edge
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct DepEdge {
    /// Predecessor node index
    pub pred: usize,
    /// Calendar seconds inserted after the anchor
    pub gap_duration: i64,
    /// Working seconds inserted after the anchor
    pub gap_length: i64,
    /// Cap on the idle gap, calendar seconds
    pub max_gap: Option<i64>,
    /// Anchor on the predecessor's start instead of its end
    pub on_start: bool,
}

/// Resolved allocation sets, resource arena indices
#[derive(Clone, Debug, Default)]
pub struct AllocPlan {
    pub primary: Vec<usize>,
    pub alternatives: Vec<usize>,
}

/// Effective per-scenario attributes of one task node
#[derive(Clone, Debug)]
pub struct TaskPlan {
    /// Effort in working hours
    pub effort: f64,
    /// Calendar seconds
    pub duration: i64,
    /// Working seconds
    pub length: i64,
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
    /// ASAP when true
    pub forward: bool,
    /// Direction came from the task itself, not inheritance
    pub explicit_direction: bool,
    pub milestone: bool,
    pub priority: u32,
    pub path_criticalness: f64,
    /// Own dependencies (inherited ones are walked via the ancestor chain)
    pub deps: Vec<DepEdge>,
    /// Effective allocation, inherited from the nearest ancestor when unset
    pub alloc: Option<AllocPlan>,
    pub limits: LimitSet,
    pub contiguous: bool,
}

impl TaskPlan {
    pub fn has_work(&self) -> bool {
        self.effort > 0.0 || self.duration > 0 || self.length > 0
    }
}

/// How a resource's working time is evaluated
#[derive(Clone, Debug)]
pub enum Hours {
    Plan(WeekPlan),
    ProjectDefault,
}

/// Effective per-scenario attributes of one resource node
#[derive(Clone, Debug)]
pub struct ResPlan {
    pub efficiency: f64,
    pub rate: Option<Money>,
    pub tz: Option<Tz>,
    pub hours: Hours,
    /// Resource leaves merged with the referenced shift's leaves
    pub leaves: Vec<slotplan_core::Leave>,
    pub limits: LimitSet,
}

/// Build the effective resource plans for one scenario
pub fn build_res_plans(
    project: &Project,
    scenario: usize,
    resources: &ResourceArena,
    span: TimeInterval,
    granularity: u32,
) -> Result<Vec<ResPlan>, ScheduleError> {
    let overrides = &project.scenarios[scenario].overrides;
    let mut plans = Vec::with_capacity(resources.len());

    for node in &resources.nodes {
        let decl = &node.decl;
        let mut efficiency = decl.efficiency;
        let mut rate = decl.rate.clone();

        for o in overrides {
            match o {
                ScenarioOverride::ResourceEfficiency { resource, efficiency: e }
                    if matches_node(resources, resource, &node.path) =>
                {
                    efficiency = *e;
                }
                ScenarioOverride::ResourceRate { resource, rate: r }
                    if matches_node(resources, resource, &node.path) =>
                {
                    rate = Some(r.clone());
                }
                _ => {}
            }
        }

        let tz = match &decl.timezone {
            Some(name) => Some(workhours::resolve_tz(name)?),
            None => None,
        };

        let mut leaves = decl.leaves.clone();
        let hours = if let Some(plan) = &decl.working_hours {
            Hours::Plan(plan.clone())
        } else if let Some(shift_id) = &decl.shift {
            let shift = project
                .get_shift(shift_id)
                .ok_or_else(|| ScheduleError::UnknownShift(shift_id.clone()))?;
            leaves.extend(shift.leaves.iter().cloned());
            Hours::Plan(shift.working_hours.clone())
        } else {
            Hours::ProjectDefault
        };

        let mut limit_set = LimitSet::default();
        for spec in &decl.limits {
            let scoped = match &spec.resource {
                Some(r) => Some(
                    resources
                        .resolve(r)
                        .ok_or_else(|| ScheduleError::UnknownResource(r.clone()))?
                        as u32,
                ),
                None => None,
            };
            limit_set.push(Limit::new(spec, scoped, span, span.start, granularity));
        }

        plans.push(ResPlan {
            efficiency,
            rate,
            tz,
            hours,
            leaves,
            limits: limit_set,
        });
    }

    Ok(plans)
}

/// Build the effective task plans for one scenario.
///
/// Applies scenario overrides, inherits priority / direction / allocation
/// from enclosing containers, resolves dependency targets to node indices,
/// and folds `precedes` declarations into forward edges on their targets.
pub fn build_task_plans(
    project: &Project,
    scenario: usize,
    tasks: &TaskArena,
    resources: &ResourceArena,
    span: TimeInterval,
    granularity: u32,
) -> Result<Vec<TaskPlan>, ScheduleError> {
    let overrides = &project.scenarios[scenario].overrides;
    let mut plans: Vec<TaskPlan> = Vec::with_capacity(tasks.len());

    for (idx, node) in tasks.nodes.iter().enumerate() {
        let decl = &node.decl;
        let mut effort = decl.effort_hours;
        let mut duration = decl.duration;
        let mut length = decl.length;
        let mut start = decl.start;
        let mut end = decl.end;
        let mut priority = decl.priority;

        for o in overrides {
            match o {
                ScenarioOverride::TaskEffort { task, hours }
                    if matches_task(tasks, task, &node.path) =>
                {
                    effort = *hours;
                }
                ScenarioOverride::TaskDuration { task, seconds }
                    if matches_task(tasks, task, &node.path) =>
                {
                    duration = *seconds;
                }
                ScenarioOverride::TaskLength { task, seconds }
                    if matches_task(tasks, task, &node.path) =>
                {
                    length = *seconds;
                }
                ScenarioOverride::TaskStart { task, start: s }
                    if matches_task(tasks, task, &node.path) =>
                {
                    start = Some(*s);
                }
                ScenarioOverride::TaskEnd { task, end: e }
                    if matches_task(tasks, task, &node.path) =>
                {
                    end = Some(*e);
                }
                ScenarioOverride::TaskPriority { task, priority: p }
                    if matches_task(tasks, task, &node.path) =>
                {
                    priority = Some(*p);
                }
                _ => {}
            }
        }

        // Inherited attributes come from the nearest ancestor that sets them
        let ancestors = tasks.ancestors(idx);
        let priority = priority
            .or_else(|| {
                ancestors
                    .iter()
                    .find_map(|&a| tasks.nodes[a].decl.priority)
            })
            .unwrap_or(DEFAULT_PRIORITY);

        let explicit_direction = decl.forward.is_some();
        let forward = decl
            .forward
            .or_else(|| ancestors.iter().find_map(|&a| tasks.nodes[a].decl.forward))
            .unwrap_or(!project.alap);

        let alloc_decl = decl.allocate.as_ref().or_else(|| {
            ancestors
                .iter()
                .find_map(|&a| tasks.nodes[a].decl.allocate.as_ref())
        });
        let alloc = match alloc_decl {
            Some(a) => Some(AllocPlan {
                primary: resolve_resources(resources, &a.resources)?,
                alternatives: resolve_resources(resources, &a.alternatives)?,
            }),
            None => None,
        };

        let contiguous = decl.flags.iter().any(|f| f == FLAG_CONTIGUOUS)
            || ancestors
                .iter()
                .any(|&a| tasks.nodes[a].decl.flags.iter().any(|f| f == FLAG_CONTIGUOUS));

        let mut deps = Vec::with_capacity(decl.depends.len());
        for dep in &decl.depends {
            let pred = tasks
                .resolve(Some(idx), &dep.target)
                .ok_or_else(|| ScheduleError::UnknownTask(dep.target.clone()))?;
            deps.push(DepEdge {
                pred,
                gap_duration: dep.gap_duration,
                gap_length: dep.gap_length,
                max_gap: dep.max_gap_duration,
                on_start: dep.on_start,
            });
        }

        let mut limit_set = LimitSet::default();
        for spec in &decl.limits {
            let scoped = match &spec.resource {
                Some(r) => Some(
                    resources
                        .resolve(r)
                        .ok_or_else(|| ScheduleError::UnknownResource(r.clone()))?
                        as u32,
                ),
                None => None,
            };
            limit_set.push(Limit::new(spec, scoped, span, span.start, granularity));
        }

        plans.push(TaskPlan {
            effort,
            duration,
            length,
            start,
            end,
            forward,
            explicit_direction,
            milestone: decl.milestone,
            priority,
            path_criticalness: 0.0,
            deps,
            alloc,
            limits: limit_set,
            contiguous,
        });
    }

    // Fold `precedes` declarations into forward edges on their targets
    for (idx, node) in tasks.nodes.iter().enumerate() {
        for dep in &node.decl.precedes {
            let succ = tasks
                .resolve(Some(idx), &dep.target)
                .ok_or_else(|| ScheduleError::UnknownTask(dep.target.clone()))?;
            let edge = DepEdge {
                pred: idx,
                gap_duration: dep.gap_duration,
                gap_length: dep.gap_length,
                max_gap: dep.max_gap_duration,
                on_start: dep.on_start,
            };
            // An identical back-reference already present on the target is
            // a duplicate, not a cycle
            let exists = plans[succ]
                .deps
                .iter()
                .any(|e| e.pred == idx && e.on_start == edge.on_start);
            if !exists {
                plans[succ].deps.push(edge);
            }
        }
    }

    Ok(plans)
}

fn resolve_resources(
    resources: &ResourceArena,
    refs: &[String],
) -> Result<Vec<usize>, ScheduleError> {
    refs.iter()
        .map(|r| {
            resources
                .resolve(r)
                .ok_or_else(|| ScheduleError::UnknownResource(r.clone()))
        })
        .collect()
}

fn matches_task(tasks: &TaskArena, reference: &str, path: &str) -> bool {
    tasks
        .resolve(None, reference)
        .is_some_and(|idx| tasks.nodes[idx].path == path)
}

fn matches_node(resources: &ResourceArena, reference: &str, path: &str) -> bool {
    resources
        .resolve(reference)
        .is_some_and(|idx| resources.nodes[idx].path == path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use pretty_assertions::assert_eq;
    use slotplan_core::Dependency;

    fn ts(y: i32, mo: u32, d: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, mo, d, 0, 0, 0).unwrap()
    }

    fn span() -> TimeInterval {
        TimeInterval::new(ts(2025, 1, 1), ts(2025, 3, 1))
    }

    fn project_with(tasks: Vec<Task>, resources: Vec<Resource>) -> Project {
        let mut p = Project::new("p", ts(2025, 1, 1), ts(2025, 3, 1));
        p.tasks = tasks;
        p.resources = resources;
        p
    }

    #[test]
    fn arena_paths_and_leaves() {
        let arena = TaskArena::build(&[
            Task::new("build")
                .child(Task::new("compile"))
                .child(Task::new("link")),
            Task::new("ship"),
        ]);

        assert_eq!(arena.len(), 4);
        assert_eq!(arena.nodes[0].path, "build");
        assert_eq!(arena.nodes[1].path, "build.compile");
        assert_eq!(arena.nodes[2].path, "build.link");
        assert_eq!(arena.leaves(), vec![1, 2, 3]);
        assert_eq!(arena.ancestors(1), vec![0]);
    }

    #[test]
    fn resolve_exact_relative_and_suffix() {
        let arena = TaskArena::build(&[
            Task::new("build")
                .child(Task::new("compile"))
                .child(Task::new("link")),
            Task::new("ship"),
        ]);

        // Exact path
        assert_eq!(arena.resolve(None, "build.compile"), Some(1));
        // Sibling reference from inside the container
        assert_eq!(arena.resolve(Some(2), "compile"), Some(1));
        // Suffix fallback
        assert_eq!(arena.resolve(None, "link"), Some(2));
        // Container reference
        assert_eq!(arena.resolve(Some(3), "build"), Some(0));
        assert_eq!(arena.resolve(None, "missing"), None);
    }

    #[test]
    fn plans_inherit_priority_direction_and_allocation() {
        let project = project_with(
            vec![Task::new("phase")
                .priority(700)
                .alap()
                .allocate("dev")
                .child(Task::new("a").effort_hours(8.0))
                .child(Task::new("b").effort_hours(4.0).priority(100).asap())],
            vec![Resource::new("dev")],
        );
        let tasks = TaskArena::build(&project.tasks);
        let resources = ResourceArena::build(&project.resources);
        let plans =
            build_task_plans(&project, 0, &tasks, &resources, span(), 3600).unwrap();

        // "a" inherits everything from the phase
        assert_eq!(plans[1].priority, 700);
        assert!(!plans[1].forward);
        assert!(!plans[1].explicit_direction);
        assert_eq!(plans[1].alloc.as_ref().unwrap().primary, vec![1]);

        // "b" keeps its own values
        assert_eq!(plans[2].priority, 100);
        assert!(plans[2].forward);
        assert!(plans[2].explicit_direction);
    }

    #[test]
    fn precedes_becomes_a_dependency_on_the_target() {
        let project = project_with(
            vec![
                Task::new("prep").effort_hours(2.0).precedes("main"),
                Task::new("main").effort_hours(4.0),
            ],
            vec![],
        );
        let tasks = TaskArena::build(&project.tasks);
        let resources = ResourceArena::build(&project.resources);
        let plans =
            build_task_plans(&project, 0, &tasks, &resources, span(), 3600).unwrap();

        assert_eq!(plans[1].deps.len(), 1);
        assert_eq!(plans[1].deps[0].pred, 0);
    }

    #[test]
    fn precedes_duplicate_of_existing_depends_is_dropped() {
        let project = project_with(
            vec![
                Task::new("prep").effort_hours(2.0).precedes("main"),
                Task::new("main").effort_hours(4.0).depends_on("prep"),
            ],
            vec![],
        );
        let tasks = TaskArena::build(&project.tasks);
        let resources = ResourceArena::build(&project.resources);
        let plans =
            build_task_plans(&project, 0, &tasks, &resources, span(), 3600).unwrap();

        assert_eq!(plans[1].deps.len(), 1);
    }

    #[test]
    fn unknown_dependency_is_an_error() {
        let project = project_with(vec![Task::new("a").depends_on("ghost")], vec![]);
        let tasks = TaskArena::build(&project.tasks);
        let resources = ResourceArena::build(&project.resources);
        let err = build_task_plans(&project, 0, &tasks, &resources, span(), 3600)
            .unwrap_err();
        assert!(matches!(err, ScheduleError::UnknownTask(t) if t == "ghost"));
    }

    #[test]
    fn scenario_overrides_replace_base_values() {
        let mut project = project_with(
            vec![Task::new("work").effort_hours(8.0)],
            vec![Resource::new("dev")],
        );
        project.scenarios.push(
            slotplan_core::Scenario::new("crunch")
                .with_override(ScenarioOverride::TaskEffort {
                    task: "work".into(),
                    hours: 16.0,
                })
                .with_override(ScenarioOverride::ResourceEfficiency {
                    resource: "dev".into(),
                    efficiency: 1.5,
                }),
        );
        let tasks = TaskArena::build(&project.tasks);
        let resources = ResourceArena::build(&project.resources);

        let base = build_task_plans(&project, 0, &tasks, &resources, span(), 3600).unwrap();
        let crunch = build_task_plans(&project, 1, &tasks, &resources, span(), 3600).unwrap();
        assert_eq!(base[0].effort, 8.0);
        assert_eq!(crunch[0].effort, 16.0);

        let base_r = build_res_plans(&project, 0, &resources, span(), 3600).unwrap();
        let crunch_r = build_res_plans(&project, 1, &resources, span(), 3600).unwrap();
        assert_eq!(base_r[0].efficiency, 1.0);
        assert_eq!(crunch_r[0].efficiency, 1.5);
    }

    #[test]
    fn shift_reference_supplies_hours_and_leaves(){
        let mut project = project_with(
            vec![],
            vec![Resource::new("op").shift("nights")],
        );
        project.shifts.push(
            slotplan_core::Shift::new(
                "nights",
                WeekPlan::empty().weekdays(0..=4, &[slotplan_core::TimeRange::new(22, 0, 6, 0)]),
            )
            .leave(slotplan_core::Leave::new(
                slotplan_core::LeaveKind::Holiday,
                ts(2025, 1, 6),
                ts(2025, 1, 7),
            )),
        );
        let resources = ResourceArena::build(&project.resources);
        let plans = build_res_plans(&project, 0, &resources, span(), 3600).unwrap();

        assert!(matches!(plans[0].hours, Hours::Plan(_)));
        assert_eq!(plans[0].leaves.len(), 1);
    }

    #[test]
    fn missing_shift_is_an_error() {
        let project = project_with(vec![], vec![Resource::new("op").shift("ghost")]);
        let resources = ResourceArena::build(&project.resources);
        let err = build_res_plans(&project, 0, &resources, span(), 3600).unwrap_err();
        assert!(matches!(err, ScheduleError::UnknownShift(s) if s == "ghost"));
    }

    #[test]
    fn dependency_gap_fields_survive_resolution() {
        let project = project_with(
            vec![
                Task::new("a").effort_hours(1.0),
                Task::new("b").effort_hours(1.0).with_dependency(
                    Dependency::on("a")
                        .gap_duration(29 * 60)
                        .max_gap_duration(7200),
                ),
            ],
            vec![],
        );
        let tasks = TaskArena::build(&project.tasks);
        let resources = ResourceArena::build(&project.resources);
        let plans =
            build_task_plans(&project, 0, &tasks, &resources, span(), 3600).unwrap();

        let edge = plans[1].deps[0];
        assert_eq!(edge.pred, 0);
        assert_eq!(edge.gap_duration, 29 * 60);
        assert_eq!(edge.max_gap, Some(7200));
        assert!(!edge.on_start);
    }
}
