mod support;

use agent_tasks::error::Error;
use agent_tasks::index::{StatusFilter, TaskFilter};
use agent_tasks::store::CompleteOptions;
use agent_tasks::task::{NewTask, SessionEvent, TaskPatch, TaskStatus};

use support::{ids, record_line, TestProject};

#[test]
fn category_query_after_completion() -> Result<(), Box<dyn std::error::Error>> {
    let project = TestProject::new()?;
    let store = project.store();

    let a = store.add(NewTask::new("A").with_category("simple"), false)?;
    let b = store.add(NewTask::new("B").with_category("simple"), false)?;
    let simple = TaskFilter::default().category("simple");
    assert_eq!(ids(&store.query(&simple)?), vec![a.id, b.id]);

    store.complete(a.id, CompleteOptions::default())?;
    assert_eq!(ids(&store.query(&simple)?), vec![b.id]);
    assert_eq!(
        ids(&store.query(&simple.clone().status(StatusFilter::Any))?),
        vec![b.id, a.id]
    );
    Ok(())
}

#[test]
fn hand_ordered_file_keeps_its_order() -> Result<(), Box<dyn std::error::Error>> {
    let project = TestProject::new()?;
    let lines = [
        record_line(5, "five", ""),
        record_line(2, "two", r#""category":"simple""#),
        record_line(9, "nine", ""),
    ];
    project.write_active(&(lines.join("\n") + "\n"))?;

    let store = project.store();
    assert_eq!(ids(&store.query(&TaskFilter::default())?), vec![5, 2, 9]);

    let added = store.add(NewTask::new("ten"), false)?;
    assert_eq!(added.id, 10);
    store.delete(2)?;
    assert_eq!(project.active_ids(), vec![5, 9, 10]);
    Ok(())
}

#[test]
fn unknown_fields_survive_mutations() -> Result<(), Box<dyn std::error::Error>> {
    let project = TestProject::new()?;
    project.write_active(&format!(
        "{}\n",
        record_line(1, "legacy", r#""priority":"P0","labels":["x"]"#)
    ))?;

    let store = project.store();
    store.update(1, &TaskPatch::new().title("renamed"))?;

    let raw = std::fs::read_to_string(project.settings().active_path)?;
    assert!(raw.contains(r#""priority":"P0""#));
    assert!(raw.contains(r#""labels":["x"]"#));
    assert!(raw.contains("renamed"));
    Ok(())
}

#[test]
fn ids_stay_monotonic_across_completion_and_reload() -> Result<(), Box<dyn std::error::Error>> {
    let project = TestProject::new()?;
    let store = project.store();

    let first = store.add(NewTask::new("first"), false)?;
    let second = store.add(NewTask::new("second"), false)?;
    store.complete(second.id, CompleteOptions::default())?;

    // New handle, nothing cached in memory.
    let store = project.store();
    let third = store.add(NewTask::new("third"), false)?;
    assert_eq!(third.id, 3);
    assert_eq!(project.active_ids(), vec![first.id, third.id]);
    assert_eq!(project.completed_ids(), vec![second.id]);
    Ok(())
}

#[test]
fn story_lifecycle_archives_session_journal() -> Result<(), Box<dyn std::error::Error>> {
    let project = TestProject::new()?;
    let store = project.store();

    let story = store.add(NewTask::story("Parser rewrite"), false)?;
    let lexer = store.add(NewTask::new("Lexer").with_parent(story.id), false)?;
    let grammar = store.add(NewTask::new("Grammar").with_parent(story.id), false)?;

    store.record_session_event(
        story.id,
        SessionEvent::new("iteration").with_field("iteration", 1),
    )?;
    assert_eq!(
        ids(&store.blocking_children(story.id)?),
        vec![lexer.id, grammar.id]
    );

    store.complete(lexer.id, CompleteOptions::default())?;
    match store.complete(story.id, CompleteOptions::default()) {
        Err(Error::BlockingChildren { children, .. }) => assert_eq!(children, vec![grammar.id]),
        other => return Err(format!("expected blocking children, got {other:?}").into()),
    }

    store.complete(
        grammar.id,
        CompleteOptions {
            status: Some(TaskStatus::Done),
            note: Some("waiting on merge".into()),
        },
    )?;
    let done = store.complete(story.id, CompleteOptions::default())?;
    assert_eq!(done.task.session_events.len(), 1);

    let archived = project.completed();
    assert_eq!(ids(&archived), vec![lexer.id, grammar.id, story.id]);
    assert_eq!(archived[1].status, TaskStatus::Done);
    assert_eq!(archived[1].description, "waiting on merge");
    assert_eq!(archived[2].session_events[0].event_type, "iteration");
    assert!(project.active().is_empty());
    Ok(())
}

#[test]
fn rejected_update_leaves_file_untouched() -> Result<(), Box<dyn std::error::Error>> {
    let project = TestProject::new()?;
    let store = project.store();
    let task = store.add(NewTask::new("stable"), false)?;
    let before = std::fs::read(project.settings().active_path)?;

    for patch in [
        TaskPatch::new().set("status", "bogus"),
        TaskPatch::new().set("title", ""),
        TaskPatch::new().parent(Some(404)),
        TaskPatch::new().set("id", 77),
    ] {
        let err = store.update(task.id, &patch).unwrap_err();
        assert!(matches!(err, Error::SchemaInvalid { .. }), "{err:?}");
    }

    assert_eq!(std::fs::read(project.settings().active_path)?, before);
    assert!(!project.settings().lock_path.exists());
    Ok(())
}

#[test]
fn malformed_store_fails_unless_skipping() -> Result<(), Box<dyn std::error::Error>> {
    let project = TestProject::new()?;
    project.write_active(&format!("{}\nnot json\n", record_line(1, "ok", "")))?;

    match project.store().add(NewTask::new("blocked"), false) {
        Err(Error::MalformedRecord { line, .. }) => assert_eq!(line, 2),
        other => return Err(format!("expected malformed record, got {other:?}").into()),
    }

    project.write_config("[store]\nmalformed = \"skip\"\n")?;
    let added = project.store().add(NewTask::new("after skip"), false)?;
    assert_eq!(added.id, 2);
    assert_eq!(project.active_ids(), vec![1, 2]);
    Ok(())
}

#[test]
fn custom_layout_from_config() -> Result<(), Box<dyn std::error::Error>> {
    let project = TestProject::new()?;
    project.write_config(
        r#"
[store]
dir = "work/queue"
active_file = "open.jsonl"
completed_file = "done.jsonl"
"#,
    )?;

    let store = project.store();
    let task = store.add(NewTask::new("configured"), false)?;
    store.complete(task.id, CompleteOptions::default())?;

    let dir = project.root().join("work/queue");
    assert!(dir.join("open.jsonl").exists());
    assert!(dir.join("done.jsonl").exists());
    Ok(())
}

#[test]
fn panicking_transaction_releases_lock() -> Result<(), Box<dyn std::error::Error>> {
    let project = TestProject::new()?;
    let store = project.store();

    let result: agent_tasks::Result<()> = store.transaction(|_| panic!("boom"));
    match result {
        Err(Error::CallbackPanicked(message)) => assert!(message.contains("boom")),
        other => return Err(format!("expected panic capture, got {other:?}").into()),
    }

    assert!(!project.settings().lock_path.exists());
    store.add(NewTask::new("still writable"), false)?;
    Ok(())
}
