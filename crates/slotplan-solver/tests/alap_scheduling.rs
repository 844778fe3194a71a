//! Backward (ALAP) scheduling: deadline anchors, back-propagated ALAP
//! chains, resource leveling against a shared machine, and container end
//! propagation.

use chrono::{DateTime, Datelike, TimeZone, Utc, Weekday};
use pretty_assertions::assert_eq;
use slotplan_core::{CancelFlag, Project, Resource, Scheduler, Task, TimeRange, WeekPlan};
use slotplan_solver::SlotScheduler;

fn ts(y: i32, mo: u32, d: u32, h: u32, mi: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(y, mo, d, h, mi, 0).unwrap()
}

fn run(project: &Project) -> slotplan_core::ScenarioSchedule {
    SlotScheduler::new()
        .schedule_scenario(project, 0, &CancelFlag::new())
        .unwrap()
}

/// One machine on an 08:00-16:00 weekday shift, July 2025
fn workshop_project() -> Project {
    let mut p = Project::new("workshop", ts(2025, 7, 7, 0, 0), ts(2025, 7, 19, 0, 0));
    p.resources.push(
        Resource::new("machine")
            .working_hours(WeekPlan::empty().weekdays(0..=4, &[TimeRange::new(8, 0, 16, 0)])),
    );
    p
}

#[test]
fn alap_levels_two_assemblies_before_the_packing_deadline() {
    let mut p = workshop_project();
    p.tasks.push(Task::new("asm1").effort_hours(16.0).allocate("machine"));
    p.tasks.push(Task::new("asm2").effort_hours(16.0).allocate("machine"));
    p.tasks.push(
        Task::new("pack")
            .effort_hours(8.0)
            .allocate("machine")
            .depends_on("asm1")
            .depends_on("asm2")
            .alap()
            .ends(ts(2025, 7, 18, 16, 0)),
    );

    let schedule = run(&p);

    // Packing fills the last shift before the deadline
    let pack = schedule.task("pack").unwrap();
    assert_eq!(pack.start, Some(ts(2025, 7, 18, 8, 0)));
    assert_eq!(pack.end, Some(ts(2025, 7, 18, 16, 0)));

    // The assemblies fill the two preceding shift pairs; which assembly
    // gets which pair is not fixed
    let asm1 = schedule.task("asm1").unwrap();
    let asm2 = schedule.task("asm2").unwrap();
    let mut spans = vec![
        (asm1.start.unwrap(), asm1.end.unwrap()),
        (asm2.start.unwrap(), asm2.end.unwrap()),
    ];
    spans.sort();
    assert_eq!(
        spans,
        vec![
            (ts(2025, 7, 14, 8, 0), ts(2025, 7, 15, 16, 0)),
            (ts(2025, 7, 16, 8, 0), ts(2025, 7, 17, 16, 0)),
        ]
    );

    // Every task finished by the deadline, nothing on a weekend
    for t in [&pack, &asm1, &asm2] {
        assert!(t.end.unwrap() <= ts(2025, 7, 18, 16, 0));
    }
    let machine = schedule.resource("machine").unwrap();
    for booking in &machine.bookings {
        let day = booking.interval.start.weekday();
        assert!(day != Weekday::Sat && day != Weekday::Sun);
    }
}

#[test]
fn alap_chain_packs_against_the_anchor() {
    let mut p = workshop_project();
    p.tasks.push(Task::new("weld").effort_hours(8.0).allocate("machine"));
    p.tasks.push(
        Task::new("paint")
            .effort_hours(8.0)
            .allocate("machine")
            .depends_on("weld")
            .alap()
            .ends(ts(2025, 7, 18, 16, 0)),
    );

    let schedule = run(&p);
    // The anchor pulls its predecessor backward too: weld sits directly
    // before paint instead of starting at the project begin
    let paint = schedule.task("paint").unwrap();
    let weld = schedule.task("weld").unwrap();
    assert_eq!(paint.start, Some(ts(2025, 7, 18, 8, 0)));
    assert_eq!(paint.end, Some(ts(2025, 7, 18, 16, 0)));
    assert_eq!(weld.start, Some(ts(2025, 7, 17, 8, 0)));
    assert_eq!(weld.end, Some(ts(2025, 7, 17, 16, 0)));
}

#[test]
fn container_end_reaches_terminal_leaves_only() {
    let mut p = workshop_project();
    p.tasks.push(
        Task::new("order")
            .alap()
            .ends(ts(2025, 7, 18, 16, 0))
            .child(Task::new("cut").effort_hours(8.0).allocate("machine"))
            .child(
                Task::new("polish")
                    .effort_hours(8.0)
                    .allocate("machine")
                    .depends_on("cut"),
            ),
    );

    let schedule = run(&p);
    let polish = schedule.task("order.polish").unwrap();
    let cut = schedule.task("order.cut").unwrap();
    assert_eq!(polish.end, Some(ts(2025, 7, 18, 16, 0)));
    assert_eq!(cut.end, Some(ts(2025, 7, 17, 16, 0)));

    let order = schedule.task("order").unwrap();
    assert_eq!(order.start, cut.start);
    assert_eq!(order.end, polish.end);
}

#[test]
fn alap_deadline_is_never_overshot() {
    let mut p = workshop_project();
    p.tasks.push(
        Task::new("job")
            .effort_hours(10.0)
            .allocate("machine")
            .alap()
            .ends(ts(2025, 7, 16, 12, 0)),
    );

    let schedule = run(&p);
    let job = schedule.task("job").unwrap();
    assert!(job.end.unwrap() <= ts(2025, 7, 16, 12, 0));
    assert!(job.scheduled);
}

#[test]
fn asap_and_alap_subgraphs_converge_in_one_pass() {
    let mut p = workshop_project();
    // A feeder pinned ASAP with a fixed start resists ALAP propagation...
    p.tasks.push(
        Task::new("feed")
            .effort_hours(8.0)
            .allocate("machine")
            .asap()
            .starts(ts(2025, 7, 7, 8, 0)),
    );
    // ...and a backward-scheduled consumer anchored on a deadline
    p.tasks.push(
        Task::new("consume")
            .effort_hours(8.0)
            .allocate("machine")
            .depends_on("feed")
            .alap()
            .ends(ts(2025, 7, 18, 16, 0)),
    );

    let schedule = run(&p);
    let feed = schedule.task("feed").unwrap();
    let consume = schedule.task("consume").unwrap();
    assert!(feed.scheduled && consume.scheduled);
    assert!(consume.start.unwrap() >= feed.end.unwrap());
    assert_eq!(consume.end, Some(ts(2025, 7, 18, 16, 0)));
}
