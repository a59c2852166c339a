//! agent-tasks task command implementations.

use serde::Serialize;
use serde_json::Value;

use crate::cli::parse_pairs;
use crate::error::{Error, Result};
use crate::execution::ExecutionState;
use crate::index::{StatusFilter, TaskFilter};
use crate::output::{emit_success, HumanOutput, OutputOptions};
use crate::store::{CompleteOptions, TaskStore};
use crate::task::{NewTask, SessionEvent, Task, TaskPatch, TaskStatus, TaskType};

pub struct AddOptions {
    pub title: String,
    pub parent: Option<u64>,
    pub task_type: String,
    pub status: Option<String>,
    pub category: Option<String>,
    pub description: Option<String>,
    pub design: Option<String>,
    pub meta: Vec<String>,
    pub prepend: bool,
}

pub struct ListOptions {
    pub status: Option<String>,
    pub category: Option<String>,
    pub parent: Option<u64>,
    pub title: Option<String>,
}

pub struct UpdateOptions {
    pub id: u64,
    pub title: Option<String>,
    pub status: Option<String>,
    pub task_type: Option<String>,
    pub description: Option<String>,
    pub design: Option<String>,
    pub category: Option<String>,
    pub parent: Option<u64>,
    pub no_parent: bool,
    pub meta: Vec<String>,
    pub patch: Option<String>,
}

#[derive(Serialize)]
struct TaskListOutput {
    total: usize,
    tasks: Vec<Task>,
}

#[derive(Serialize)]
struct StartOutput {
    task: Task,
    execution: ExecutionState,
}

pub fn add(store: &TaskStore, options: AddOptions, output: OutputOptions) -> Result<()> {
    let task_type: TaskType = options.task_type.parse()?;
    let mut new = NewTask::new(options.title).with_type(task_type);
    if let Some(parent) = options.parent {
        new = new.with_parent(parent);
    }
    if let Some(status) = options.status.as_deref() {
        new = new.with_status(status.parse()?);
    }
    if let Some(category) = options.category {
        new = new.with_category(category);
    }
    if let Some(description) = options.description {
        new = new.with_description(description);
    }
    if let Some(design) = options.design {
        new.design = design;
    }
    for (key, value) in parse_pairs(&options.meta)? {
        new.meta.insert(key, value);
    }

    let task = store.add(new, options.prepend)?;

    let mut human = HumanOutput::new("Task added");
    push_task_summary(&mut human, &task);
    human.push_next_step(format!("agent-tasks start {}", task.id));

    emit_success(output, "add", &task, Some(&human))
}

pub fn list(store: &TaskStore, options: ListOptions, output: OutputOptions) -> Result<()> {
    let status: StatusFilter = match options.status.as_deref() {
        Some(raw) => raw.parse()?,
        None => StatusFilter::Open,
    };
    let filter = TaskFilter {
        category: options.category,
        parent_id: options.parent,
        title_pattern: options.title,
        status,
    };

    let tasks = store.query(&filter)?;

    let mut human = HumanOutput::new("Tasks");
    human.push_summary("Total", tasks.len().to_string());
    for task in &tasks {
        human.push_detail(task_line(task));
    }

    let report = TaskListOutput {
        total: tasks.len(),
        tasks,
    };
    emit_success(output, "list", &report, Some(&human))
}

pub fn show(store: &TaskStore, id: u64, output: OutputOptions) -> Result<()> {
    let task = store.get(id)?;
    let children = store.children(id)?;

    let mut human = HumanOutput::new(format!("Task {}: {}", task.id, task.title));
    push_task_summary(&mut human, &task);
    if !task.description.is_empty() {
        human.push_detail(task.description.clone());
    }
    for (key, value) in &task.meta {
        human.push_summary(format!("meta.{key}"), value.clone());
    }
    for child in &children {
        human.push_detail(format!("child {}", task_line(child)));
    }
    if !task.session_events.is_empty() {
        human.push_summary("Session events", task.session_events.len().to_string());
    }

    emit_success(output, "show", &task, Some(&human))
}

pub fn update(store: &TaskStore, options: UpdateOptions, output: OutputOptions) -> Result<()> {
    let patch = build_patch(&options)?;
    if patch.is_empty() {
        return Err(Error::InvalidArgument(
            "nothing to update; pass at least one field".to_string(),
        ));
    }

    let task = store.update(options.id, &patch)?;

    let mut human = HumanOutput::new("Task updated");
    push_task_summary(&mut human, &task);
    emit_success(output, "update", &task, Some(&human))
}

fn build_patch(options: &UpdateOptions) -> Result<TaskPatch> {
    let mut patch = match options.patch.as_deref() {
        Some(raw) => {
            let value: Value = serde_json::from_str(raw)
                .map_err(|err| Error::InvalidArgument(format!("--patch is not JSON: {err}")))?;
            TaskPatch::from_json(value)?
        }
        None => TaskPatch::new(),
    };

    if let Some(title) = &options.title {
        patch = patch.title(title.clone());
    }
    if let Some(status) = &options.status {
        patch = patch.set("status", status.clone());
    }
    if let Some(task_type) = &options.task_type {
        patch = patch.set("type", task_type.clone());
    }
    if let Some(description) = &options.description {
        patch = patch.description(description.clone());
    }
    if let Some(design) = &options.design {
        patch = patch.design(design.clone());
    }
    if let Some(category) = &options.category {
        patch = patch.category(category.clone());
    }
    if options.no_parent {
        patch = patch.parent(None);
    } else if let Some(parent) = options.parent {
        patch = patch.parent(Some(parent));
    }
    for (key, value) in parse_pairs(&options.meta)? {
        let value = if value.is_empty() { None } else { Some(value) };
        patch = patch.meta(key, value);
    }
    Ok(patch)
}

pub fn delete(store: &TaskStore, id: u64, output: OutputOptions) -> Result<()> {
    let task = store.delete(id)?;

    let mut human = HumanOutput::new("Task deleted");
    push_task_summary(&mut human, &task);
    emit_success(output, "delete", &task, Some(&human))
}

pub fn complete(
    store: &TaskStore,
    id: u64,
    status: Option<String>,
    note: Option<String>,
    output: OutputOptions,
) -> Result<()> {
    let status = status.as_deref().map(str::parse::<TaskStatus>).transpose()?;
    let completion = store.complete(id, CompleteOptions { status, note })?;

    let mut human = HumanOutput::new("Task completed");
    push_task_summary(&mut human, &completion.task);
    match &completion.execution {
        Some(state) => human.push_summary("Execution", describe_state(state)),
        None => human.push_summary("Execution", "idle"),
    }
    if let Some(story_id) = completion.execution.as_ref().and_then(|s| s.story_id) {
        human.push_next_step(format!("agent-tasks list --parent {story_id}"));
    }

    emit_success(output, "complete", &completion, Some(&human))
}

pub fn start(store: &TaskStore, id: u64, output: OutputOptions) -> Result<()> {
    let (task, execution) = store.start(id)?;

    let mut human = HumanOutput::new("Task started");
    push_task_summary(&mut human, &task);
    human.push_summary("Execution", describe_state(&execution));
    human.push_next_step(format!("agent-tasks complete {}", task.id));

    emit_success(output, "start", &StartOutput { task, execution }, Some(&human))
}

pub fn event(
    store: &TaskStore,
    story_id: u64,
    event_type: String,
    fields: Vec<String>,
    output: OutputOptions,
) -> Result<()> {
    let mut event = SessionEvent::new(event_type);
    for (key, raw) in parse_pairs(&fields)? {
        if matches!(key.as_str(), "timestamp" | "event_type") {
            return Err(Error::InvalidArgument(format!("'{key}' is set automatically")));
        }
        let value = serde_json::from_str(&raw).unwrap_or(Value::String(raw));
        event = event.with_field(key, value);
    }

    let story = store.record_session_event(story_id, event)?;

    let mut human = HumanOutput::new("Session event recorded");
    human.push_summary("Story", story.id.to_string());
    human.push_summary("Events", story.session_events.len().to_string());
    emit_success(output, "event", &story, Some(&human))
}

pub(crate) fn describe_state(state: &ExecutionState) -> String {
    match (state.story_id, state.task_id) {
        (Some(story), Some(task)) => format!("task {task} in story {story}"),
        (Some(story), None) => format!("story {story}"),
        (None, Some(task)) => format!("task {task}"),
        (None, None) => "none".to_string(),
    }
}

fn push_task_summary(human: &mut HumanOutput, task: &Task) {
    human.push_summary("ID", task.id.to_string());
    human.push_summary("Title", task.title.clone());
    human.push_summary("Status", task.status.to_string());
    human.push_summary("Type", task.task_type.to_string());
    if !task.category.is_empty() {
        human.push_summary("Category", task.category.clone());
    }
    if let Some(parent) = task.parent_id {
        human.push_summary("Parent", parent.to_string());
    }
}

fn task_line(task: &Task) -> String {
    let mut line = format!("[{}][{}] {} {}", task.status, task.task_type, task.id, task.title);
    if !task.category.is_empty() {
        line.push_str(&format!(" (category: {})", task.category));
    }
    if let Some(parent) = task.parent_id {
        line.push_str(&format!(" (parent: {})", parent));
    }
    line
}

#[cfg(test)]
mod tests {
    use super::*;

    fn update_options(id: u64) -> UpdateOptions {
        UpdateOptions {
            id,
            title: None,
            status: None,
            task_type: None,
            description: None,
            design: None,
            category: None,
            parent: None,
            no_parent: false,
            meta: Vec::new(),
            patch: None,
        }
    }

    #[test]
    fn flags_override_raw_patch() {
        let mut options = update_options(1);
        options.patch = Some(r#"{"title":"from json","design":"d"}"#.to_string());
        options.title = Some("from flag".to_string());
        options.meta = vec!["pr=".to_string(), "branch=feat/x".to_string()];

        let patch = build_patch(&options).unwrap();
        assert_eq!(patch.fields()["title"], Value::from("from flag"));
        assert_eq!(patch.fields()["design"], Value::from("d"));
        assert_eq!(patch.fields()["meta"]["pr"], Value::Null);
        assert_eq!(patch.fields()["meta"]["branch"], Value::from("feat/x"));
    }

    #[test]
    fn meta_flags_survive_non_object_meta_in_patch() {
        let mut options = update_options(1);
        options.patch = Some(r#"{"meta":null}"#.to_string());
        options.meta = vec!["branch=feat/x".to_string()];

        let patch = build_patch(&options).unwrap();
        assert_eq!(patch.fields()["meta"], serde_json::json!({ "branch": "feat/x" }));
    }

    #[test]
    fn no_parent_clears() {
        let mut options = update_options(1);
        options.no_parent = true;
        let patch = build_patch(&options).unwrap();
        assert_eq!(patch.fields()["parent_id"], Value::Null);
    }

    #[test]
    fn invalid_patch_json_is_user_error() {
        let mut options = update_options(1);
        options.patch = Some("{".to_string());
        assert!(matches!(build_patch(&options), Err(Error::InvalidArgument(_))));
    }

    #[test]
    fn describe_state_variants() {
        assert_eq!(describe_state(&ExecutionState::task(2, Some(1))), "task 2 in story 1");
        assert_eq!(describe_state(&ExecutionState::story(1)), "story 1");
    }
}
