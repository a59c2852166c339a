//! agent-tasks state command implementations.

use serde::Serialize;

use crate::cli::task::describe_state;
use crate::error::Result;
use crate::execution::ExecutionState;
use crate::output::{emit_success, HumanOutput, OutputOptions};
use crate::store::{Recovery, TaskStore};

#[derive(Serialize)]
struct StateOutput {
    path: String,
    state: Option<ExecutionState>,
}

#[derive(Serialize)]
struct ClearOutput {
    path: String,
    removed: bool,
}

pub fn show(store: &TaskStore, output: OutputOptions) -> Result<()> {
    let file = store.execution();
    let state = file.read();

    let mut human = HumanOutput::new("Execution state");
    match &state {
        Some(state) => {
            human.push_summary("Working on", describe_state(state));
            human.push_summary("Started", state.started_at.to_rfc3339());
        }
        None => human.push_summary("Working on", "nothing"),
    }

    let report = StateOutput {
        path: file.path().display().to_string(),
        state,
    };
    emit_success(output, "state show", &report, Some(&human))
}

pub fn clear(store: &TaskStore, output: OutputOptions) -> Result<()> {
    let file = store.execution();
    let removed = file.clear()?;

    let header = if removed {
        "Execution state cleared"
    } else {
        "Execution state: nothing to clear"
    };
    let human = HumanOutput::new(header);

    let report = ClearOutput {
        path: file.path().display().to_string(),
        removed,
    };
    emit_success(output, "state clear", &report, Some(&human))
}

pub fn recover(store: &TaskStore, output: OutputOptions) -> Result<()> {
    let recovery = store.recover()?;

    let mut human = match &recovery {
        Recovery::Idle => HumanOutput::new("Nothing to recover"),
        Recovery::Resume { state, story, task } => {
            let mut human = HumanOutput::new("Resume previous work");
            human.push_summary("Working on", describe_state(state));
            if let Some(story) = story {
                human.push_detail(format!("story {}: {}", story.id, story.title));
            }
            if let Some(task) = task {
                human.push_detail(format!("task {}: {} [{}]", task.id, task.title, task.status));
                human.push_next_step(format!("agent-tasks complete {}", task.id));
            } else if let Some(story) = story {
                human.push_next_step(format!("agent-tasks list --parent {}", story.id));
            }
            human
        }
        Recovery::Cleared { state } => {
            let mut human = HumanOutput::new("Cleared stale execution state");
            human.push_summary("Was working on", describe_state(state));
            human
        }
    };
    if matches!(recovery, Recovery::Idle) {
        human.push_next_step("agent-tasks list");
    }

    emit_success(output, "state recover", &recovery, Some(&human))
}
