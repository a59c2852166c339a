//! Task store facade.
//!
//! [`TaskStore`] is what command handlers and other consumers talk to. Each
//! mutating call takes the directory lock, loads a fresh index, applies the
//! change, and releases the lock. The execution state is updated after the
//! lock is released; it belongs to this directory's session alone.

use std::path::Path;

use chrono::Utc;
use serde::Serialize;

use crate::config::{Config, StoreSettings};
use crate::error::{Error, Result};
use crate::execution::{ExecutionState, ExecutionStateFile};
use crate::index::{TaskFilter, TaskIndex};
use crate::lock;
use crate::task::{NewTask, SessionEvent, Task, TaskPatch, TaskStatus};

/// How to finish a task.
#[derive(Debug, Clone, Default)]
pub struct CompleteOptions {
    /// Terminal status to record; `closed` when unset.
    pub status: Option<TaskStatus>,
    /// Appended to the description before archiving.
    pub note: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Completion {
    pub task: Task,
    /// Execution state after the completion was applied.
    pub execution: Option<ExecutionState>,
}

/// What a new session should do about a previous one's execution state.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Recovery {
    /// Nothing was executing.
    Idle,
    /// The recorded work is still active.
    Resume {
        state: ExecutionState,
        story: Option<Task>,
        task: Option<Task>,
    },
    /// Everything the state pointed at is gone; the file was removed.
    Cleared { state: ExecutionState },
}

pub struct TaskStore {
    settings: StoreSettings,
    execution: ExecutionStateFile,
}

impl TaskStore {
    pub fn new(settings: StoreSettings) -> Self {
        let execution = ExecutionStateFile::new(settings.state_path.clone());
        Self {
            settings,
            execution,
        }
    }

    /// Resolve `.agent-tasks.toml` under `root` and open the store it names.
    pub fn open(root: &Path) -> Result<Self> {
        let config = Config::load_from_root(root);
        Ok(Self::new(config.resolve(root)?))
    }

    pub fn settings(&self) -> &StoreSettings {
        &self.settings
    }

    pub fn execution(&self) -> &ExecutionStateFile {
        &self.execution
    }

    /// Create the task directory and the active file.
    pub fn init(&self) -> Result<()> {
        lock::with_lock(&self.settings, || Ok(()))
    }

    /// Unlocked snapshot for reads.
    pub fn load_index(&self) -> Result<TaskIndex> {
        let mut index = TaskIndex::with_policy(self.settings.malformed);
        index.load(&self.settings.active_path, Some(&self.settings.completed_path))?;
        Ok(index)
    }

    /// Run `f` against a freshly loaded index while holding the lock.
    pub fn transaction<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut TaskIndex) -> Result<T>,
    {
        lock::with_lock(&self.settings, || {
            let mut index = self.load_index()?;
            f(&mut index)
        })
    }

    /// Active or archived record by id.
    pub fn get(&self, id: u64) -> Result<Task> {
        let index = self.load_index()?;
        index
            .get(id)
            .or_else(|| index.archived(id))
            .cloned()
            .ok_or(Error::TaskNotFound(id))
    }

    pub fn query(&self, filter: &TaskFilter) -> Result<Vec<Task>> {
        Ok(self.load_index()?.query(filter))
    }

    pub fn children(&self, parent_id: u64) -> Result<Vec<Task>> {
        let index = self.load_index()?;
        Ok(index.children(parent_id).into_iter().cloned().collect())
    }

    pub fn blocking_children(&self, story_id: u64) -> Result<Vec<Task>> {
        let index = self.load_index()?;
        Ok(index
            .children(story_id)
            .into_iter()
            .filter(|task| task.status.is_blocking())
            .cloned()
            .collect())
    }

    pub fn add(&self, new: NewTask, prepend: bool) -> Result<Task> {
        self.transaction(|index| index.add(new, prepend))
    }

    pub fn update(&self, id: u64, patch: &TaskPatch) -> Result<Task> {
        self.transaction(|index| index.update(id, patch))
    }

    pub fn delete(&self, id: u64) -> Result<Task> {
        let removed = self.transaction(|index| index.delete(id))?;
        self.settle_execution(&removed)?;
        Ok(removed)
    }

    pub fn record_session_event(&self, story_id: u64, event: SessionEvent) -> Result<Task> {
        self.transaction(|index| index.append_session_event(story_id, event))
    }

    /// Mark a task finished and move it to the completed store.
    pub fn complete(&self, id: u64, options: CompleteOptions) -> Result<Completion> {
        let status = options.status.unwrap_or(TaskStatus::Closed);
        if !status.is_terminal() {
            return Err(Error::schema(
                "status",
                "a terminal status (closed|deleted|done)",
                status.as_str(),
            ));
        }

        let task = self.transaction(|index| {
            let current = index.get(id).ok_or(Error::TaskNotFound(id))?;
            if current.is_story() {
                let children = index.blocking_children(id);
                if !children.is_empty() {
                    return Err(Error::BlockingChildren {
                        story_id: id,
                        children,
                    });
                }
            }

            let now = Utc::now();
            index.archive_task(id, |task| {
                task.status = status;
                if let Some(note) = options.note.as_deref() {
                    task.append_note(note);
                }
                task.completed_at = Some(now);
                task.updated_at = Some(now);
            })
        })?;

        let execution = self.settle_execution(&task)?;
        Ok(Completion { task, execution })
    }

    /// Mark a task or story in progress and record it as executing here.
    pub fn start(&self, id: u64) -> Result<(Task, ExecutionState)> {
        let (task, story_id) = self.transaction(|index| {
            let task = index.update(id, &TaskPatch::new().status(TaskStatus::InProgress))?;
            let story_id = task
                .parent_id
                .and_then(|parent| index.get(parent).or_else(|| index.archived(parent)))
                .filter(|parent| parent.is_story())
                .map(|parent| parent.id);
            Ok((task, story_id))
        })?;

        let state = if task.is_story() {
            ExecutionState::story(task.id)
        } else {
            ExecutionState::task(task.id, story_id)
        };
        self.execution.write(&state)?;
        tracing::info!(id, story_id = ?state.story_id, "execution started");
        Ok((task, state))
    }

    /// Reconcile the execution state left behind by an earlier session.
    pub fn recover(&self) -> Result<Recovery> {
        let Some(state) = self.execution.read() else {
            return Ok(Recovery::Idle);
        };

        let index = self.load_index()?;
        let story = state.story_id.and_then(|id| index.get(id)).cloned();
        let task = state.task_id.and_then(|id| index.get(id)).cloned();

        if story.is_none() && task.is_none() {
            self.execution.clear()?;
            tracing::info!(story_id = ?state.story_id, task_id = ?state.task_id, "cleared stale execution state");
            return Ok(Recovery::Cleared { state });
        }

        if state.task_id.is_some() && task.is_none() {
            // Task finished elsewhere; the story is still open.
            let demoted = self.execution.demote_on_child_completion()?;
            return Ok(Recovery::Resume {
                state: demoted.unwrap_or(state),
                story,
                task: None,
            });
        }

        Ok(Recovery::Resume { state, story, task })
    }

    fn settle_execution(&self, finished: &Task) -> Result<Option<ExecutionState>> {
        let Some(state) = self.execution.read() else {
            return Ok(None);
        };

        if state.story_id == Some(finished.id) {
            self.execution.clear()?;
            return Ok(None);
        }
        if state.task_id == Some(finished.id) {
            return self.execution.demote_on_child_completion();
        }
        Ok(Some(state))
    }
}
