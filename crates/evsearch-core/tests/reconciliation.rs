//! End-to-end runs of the events search task against the in-memory source.


use evsearch_core::config::TaskConfig;
use evsearch_core::error::{ErrorCode, classify};
use evsearch_core::model::{EntityKind, EventType, NewEvent};
use evsearch_core::source::{LoadCall, MemoryDataSource};
use evsearch_core::EventsSearchTask;
use fixtures::*;

fn run(source: &MemoryDataSource) -> evsearch_core::RunReport {
    EventsSearchTask::default().execute(source).expect("run")
}

fn row(source: &MemoryDataSource, identifier: &str) -> NewEvent {
    source
        .row_for(identifier)
        .unwrap_or_else(|| panic!("no events_search row for {identifier}"))
}

fn example_source() -> MemoryDataSource {
    MemoryDataSource::new()
        .with_space(space(1, "SPACE1"))
        .with_project(project("PROJ1", "PROJ-1", "SPACE1"))
        .with_experiment(experiment("EXP1", "EXP-1", "PROJ1"))
        .with_event(deletion(
            1,
            EntityKind::Sample,
            &["S1"],
            day(2021, 1, 1),
            Some(&sample_in_experiment("S1", "EXP1")),
        ))
}

// ---------------------------------------------------------------------------
// Ownership resolution
// ---------------------------------------------------------------------------

#[test]
fn sample_deletion_is_enriched_with_experiment_chain() {
    let source = example_source();
    let report = run(&source);
    assert_eq!(report.rows_written(), 1);

    let s1 = row(&source, "S1");
    assert_eq!(s1.entity_type, EntityKind::Sample);
    assert_eq!(s1.entity_experiment_perm_id.as_deref(), Some("EXP1"));
    assert_eq!(s1.entity_project_perm_id.as_deref(), Some("PROJ1"));
    assert_eq!(s1.entity_project.as_deref(), Some("/SPACE1/PROJ-1"));
    assert_eq!(s1.entity_space.as_deref(), Some("SPACE1"));
    assert_eq!(s1.entity_space_perm_id.as_deref(), Some("1"));
    assert_eq!(s1.entity_sample_perm_id, None);
    assert!(s1.content.as_deref().is_some_and(|c| c.contains("EXP1")));
    assert_eq!(s1.reason.as_deref(), Some("cleanup"));

    let calls = source.entity_calls();
    assert!(calls.contains(&LoadCall::Experiments(vec!["EXP1".into()])));
    assert!(calls.contains(&LoadCall::Projects(vec!["PROJ1".into()])));
    assert!(calls.contains(&LoadCall::Spaces(vec!["SPACE1".into()])));
}

#[test]
fn moved_experiment_resolves_project_at_event_time() {
    let mut moved = experiment("E1", "EXP", "PB");
    moved.history = vec![
        owned_by_project("PA", day(2019, 1, 1), Some(day(2020, 6, 1))),
        owned_by_project("PB", day(2020, 6, 1), None),
    ];
    let source = MemoryDataSource::new()
        .with_space(space(1, "LA"))
        .with_space(space(2, "LB"))
        .with_project(project("PA", "ALPHA", "LA"))
        .with_project(project("PB", "BETA", "LB"))
        .with_experiment(moved)
        .with_event(deletion(
            1,
            EntityKind::Sample,
            &["S1"],
            day(2020, 3, 1),
            Some(&sample_in_experiment("S1", "E1")),
        ))
        .with_event(deletion(
            2,
            EntityKind::Sample,
            &["S2"],
            day(2021, 3, 1),
            Some(&sample_in_experiment("S2", "E1")),
        ));

    run(&source);

    let before = row(&source, "S1");
    assert_eq!(before.entity_project.as_deref(), Some("/LA/ALPHA"));
    assert_eq!(before.entity_space.as_deref(), Some("LA"));

    let after = row(&source, "S2");
    assert_eq!(after.entity_project.as_deref(), Some("/LB/BETA"));
    assert_eq!(after.entity_space_perm_id.as_deref(), Some("2"));
}

#[test]
fn deleted_parents_feed_later_processors() {
    let source = MemoryDataSource::new()
        .with_space(space(7, "LAB"))
        .with_event(deletion(
            1,
            EntityKind::Project,
            &["P1"],
            day(2021, 5, 1),
            Some(
                r#"{"P1": [
                    {"type": "ATTRIBUTE", "key": "CODE", "value": "PROJ"},
                    {"type": "RELATIONSHIP", "entityType": "SPACE", "value": "LAB",
                     "validFrom": "2020-01-01 00:00:00.000"}
                ]}"#,
            ),
        ))
        .with_event(deletion(
            2,
            EntityKind::Experiment,
            &["E1"],
            day(2021, 4, 1),
            Some(
                r#"{"E1": [
                    {"type": "ATTRIBUTE", "key": "CODE", "value": "EXP"},
                    {"type": "RELATIONSHIP", "entityType": "PROJECT", "value": "P1",
                     "validFrom": "2020-02-01 00:00:00.000"}
                ]}"#,
            ),
        ));

    run(&source);

    let p1 = row(&source, "P1");
    assert_eq!(p1.entity_project_perm_id.as_deref(), Some("P1"));
    assert_eq!(p1.entity_project.as_deref(), Some("/LAB/PROJ"));
    assert_eq!(p1.entity_space_perm_id.as_deref(), Some("7"));

    let e1 = row(&source, "E1");
    assert_eq!(e1.entity_experiment_perm_id, None);
    assert_eq!(e1.entity_project_perm_id.as_deref(), Some("P1"));
    assert_eq!(e1.entity_project.as_deref(), Some("/LAB/PROJ"));
    assert_eq!(e1.entity_space.as_deref(), Some("LAB"));
}

#[test]
fn unknown_owner_prefers_most_specific_store() {
    let source = MemoryDataSource::new()
        .with_space(space(5, "SHARED"))
        .with_space(space(6, "LAB"))
        .with_project(project("SHARED", "PRJ", "LAB"))
        .with_event(deletion(
            1,
            EntityKind::Sample,
            &["S5"],
            day(2021, 1, 1),
            Some(
                r#"{"S5": [
                    {"type": "RELATIONSHIP", "key": "OWNED", "entityType": "UNKNOWN", "value": "SHARED",
                     "validFrom": "2020-06-01 00:00:00.000"}
                ]}"#,
            ),
        ));

    run(&source);

    let s5 = row(&source, "S5");
    assert_eq!(s5.entity_project_perm_id.as_deref(), Some("SHARED"));
    assert_eq!(s5.entity_project.as_deref(), Some("/LAB/PRJ"));
    assert_eq!(s5.entity_space.as_deref(), Some("LAB"));
}

#[test]
fn unresolvable_owner_leaves_row_without_ownership() {
    let source = MemoryDataSource::new().with_event(deletion(
        1,
        EntityKind::Sample,
        &["S6"],
        day(2021, 1, 1),
        Some(
            r#"{"S6": [
                {"type": "RELATIONSHIP", "entityType": "UNKNOWN", "value": "GHOST",
                 "validFrom": "2020-06-01 00:00:00.000"}
            ]}"#,
        ),
    ));

    let report = run(&source);
    assert_eq!(report.rows_written(), 1);

    let s6 = row(&source, "S6");
    assert_eq!(s6.entity_space, None);
    assert_eq!(s6.entity_project_perm_id, None);
    assert_eq!(s6.entity_experiment_perm_id, None);
}

#[test]
fn empty_payload_yields_one_row_per_identifier() {
    let source = MemoryDataSource::new()
        .with_event(deletion(1, EntityKind::Space, &["OLD"], day(2021, 1, 15), Some("  ")))
        .with_event(deletion(2, EntityKind::Project, &["P8", "P9"], day(2021, 2, 1), None));

    let report = run(&source);
    assert_eq!(report.rows_written(), 3);

    let old = row(&source, "OLD");
    assert_eq!(old.entity_space.as_deref(), Some("OLD"));
    assert_eq!(old.entity_space_perm_id, None);
    assert_eq!(old.content, None);

    for perm_id in ["P8", "P9"] {
        let project = row(&source, perm_id);
        assert_eq!(project.entity_project_perm_id.as_deref(), Some(perm_id));
        assert_eq!(project.entity_space, None);
        assert_eq!(project.entity_project, None);
    }
}

#[test]
fn attachment_deletion_uses_owner_chain() {
    let source = MemoryDataSource::new()
        .with_space(space(3, "LAB"))
        .with_project(project("P1", "PROJ", "LAB"))
        .with_experiment(experiment("E1", "EXP", "P1"))
        .with_event(deletion(
            1,
            EntityKind::Attachment,
            &["experiment/E1/protocol.pdf(2)"],
            day(2021, 3, 1),
            None,
        ));

    run(&source);

    let attachment = row(&source, "experiment/E1/protocol.pdf(2)");
    assert_eq!(attachment.entity_type, EntityKind::Attachment);
    assert_eq!(attachment.entity_experiment_perm_id.as_deref(), Some("E1"));
    assert_eq!(attachment.entity_project.as_deref(), Some("/LAB/PROJ"));
    assert_eq!(attachment.entity_space_perm_id.as_deref(), Some("3"));
}

#[test]
fn freezing_and_movement_copy_each_identifier() {
    let source = MemoryDataSource::new()
        .with_event(event(
            1,
            EventType::Freezing,
            EntityKind::Sample,
            &["A", "B"],
            day(2021, 1, 1),
            Some(r#"{"freeze": true}"#),
        ))
        .with_event(event(
            2,
            EventType::Movement,
            EntityKind::Experiment,
            &["E"],
            day(2021, 1, 2),
            None,
        ));

    let report = run(&source);
    assert_eq!(report.rows_written(), 3);

    let a = row(&source, "A");
    assert_eq!(a.event_type, EventType::Freezing);
    assert_eq!(a.content.as_deref(), Some(r#"{"freeze": true}"#));
    assert_eq!(a.entity_space, None);

    let e = row(&source, "E");
    assert_eq!(e.event_type, EventType::Movement);
    assert_eq!(e.entity_type, EntityKind::Experiment);
}

// ---------------------------------------------------------------------------
// Resumability
// ---------------------------------------------------------------------------

#[test]
fn second_run_writes_nothing_new() {
    let source = example_source();
    run(&source);
    let first = source.events_search();

    let again = run(&source);
    assert_eq!(again.rows_written(), 0);
    assert_eq!(source.events_search(), first);
}

#[test]
fn future_watermark_makes_run_a_no_op() {
    let mut source = example_source();
    for event_type in EventType::ALL {
        for kind in EntityKind::ALL {
            source = source.with_last_timestamp(event_type, kind, day(2999, 1, 1));
        }
    }

    let report = run(&source);
    assert_eq!(report.events_read(), 0);
    assert!(source.events_search().is_empty());
    assert!(source.entity_calls().is_empty());
}

#[test]
fn failing_batch_keeps_earlier_batches() {
    let source = MemoryDataSource::new()
        .with_event(deletion(1, EntityKind::Sample, &["S1"], day(2021, 1, 1), None))
        .with_event(deletion(
            2,
            EntityKind::Sample,
            &["S2"],
            day(2021, 1, 2),
            Some(r#"{"S2": [{"type": "ATTRIBUTE", "key": "REGISTRATION_TIMESTAMP", "value": "soon"}]}"#),
        ));
    let task = EventsSearchTask::new(TaskConfig { batch_size: 1 });

    let err = task.execute(&source).expect_err("second batch must fail");
    assert_eq!(classify(&err), ErrorCode::TimestampUnparseable);
    assert!(source.row_for("S1").is_some());
    assert!(source.row_for("S2").is_none());
    assert_eq!(source.rollbacks(), 1);

    assert!(task.execute(&source).is_err());
    assert_eq!(source.events_search().len(), 1);
}

#[test]
fn batch_size_does_not_change_output() {
    let build = || {
        MemoryDataSource::new()
            .with_space(space(1, "SPACE1"))
            .with_project(project("PROJ1", "PROJ-1", "SPACE1"))
            .with_experiment(experiment("EXP1", "EXP-1", "PROJ1"))
            .with_event(deletion(
                1,
                EntityKind::Sample,
                &["S1"],
                day(2021, 1, 1),
                Some(&sample_in_experiment("S1", "EXP1")),
            ))
            .with_event(deletion(
                2,
                EntityKind::Sample,
                &["S2"],
                day(2021, 1, 2),
                Some(&sample_in_experiment("S2", "EXP1")),
            ))
            .with_event(deletion(3, EntityKind::Material, &["M1"], day(2021, 1, 3), None))
            .with_event(event(
                4,
                EventType::Movement,
                EntityKind::Sample,
                &["S3"],
                day(2021, 1, 4),
                None,
            ))
    };

    let small = build();
    EventsSearchTask::new(TaskConfig { batch_size: 1 })
        .execute(&small)
        .expect("small batches");
    let large = build();
    EventsSearchTask::new(TaskConfig { batch_size: 100 })
        .execute(&large)
        .expect("one batch");

    assert_eq!(small.events_search().len(), 4);
    assert_eq!(small.events_search(), large.events_search());
    assert!(small.commits() > large.commits());
}

#[test]
fn deletions_at_one_instant_survive_small_batches() {
    let source = MemoryDataSource::new()
        .with_space(space(1, "SPACE1"))
        .with_project(project("PROJ1", "PROJ-1", "SPACE1"))
        .with_experiment(experiment("EXP1", "EXP-1", "PROJ1"))
        .with_event(deletion(
            1,
            EntityKind::Sample,
            &["S1"],
            day(2021, 1, 1),
            Some(&sample_in_experiment("S1", "EXP1")),
        ))
        .with_event(deletion(
            2,
            EntityKind::Sample,
            &["S2"],
            day(2021, 1, 1),
            Some(&sample_in_experiment("S2", "EXP1")),
        ))
        .with_event(deletion(3, EntityKind::Material, &["M1"], day(2021, 1, 2), None))
        .with_event(deletion(4, EntityKind::Material, &["M2"], day(2021, 1, 2), None));

    EventsSearchTask::new(TaskConfig { batch_size: 1 })
        .execute(&source)
        .expect("run");

    assert_eq!(source.events_search().len(), 4);
    for sample in ["S1", "S2"] {
        let row = source.row_for(sample).expect("sample row");
        assert_eq!(row.entity_experiment_perm_id.as_deref(), Some("EXP1"));
        assert_eq!(row.entity_space.as_deref(), Some("SPACE1"));
    }
    assert!(source.row_for("M2").is_some());

    EventsSearchTask::new(TaskConfig { batch_size: 1 })
        .execute(&source)
        .expect("rerun");
    assert_eq!(source.events_search().len(), 4);
}

#[test]
fn parents_are_requested_once_per_run() {
    let source = MemoryDataSource::new()
        .with_space(space(1, "SPACE1"))
        .with_project(project("PROJ1", "PROJ-1", "SPACE1"))
        .with_experiment(experiment("EXP1", "EXP-1", "PROJ1"))
        .with_event(deletion(
            1,
            EntityKind::Sample,
            &["S1"],
            day(2021, 1, 1),
            Some(&sample_in_experiment("S1", "EXP1")),
        ))
        .with_event(deletion(
            2,
            EntityKind::Sample,
            &["S2"],
            day(2021, 1, 2),
            Some(&sample_in_experiment("S2", "EXP1")),
        ));

    EventsSearchTask::new(TaskConfig { batch_size: 1 })
        .execute(&source)
        .expect("run");

    let experiment_loads = source
        .entity_calls()
        .into_iter()
        .filter(|call| matches!(call, LoadCall::Experiments(_)))
        .count();
    assert_eq!(experiment_loads, 1);
    assert_eq!(
        row(&source, "S2").entity_experiment_perm_id.as_deref(),
        Some("EXP1")
    );
}
