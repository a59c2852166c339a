//! Execution state: which task or story this directory's agent is working on.
//!
//! One small JSON file per task directory, overwritten wholesale on every
//! write. It is deliberately outside the store lock: each worktree has its
//! own directory, so two sessions never share a file.
//!
//! Reads never fail. A missing, unparseable, or invalid file all read as
//! "nothing executing" so a fresh session can always start.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::lock;

pub const STATE_FILE: &str = ".execution_state.json";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ExecutionState {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub story_id: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_id: Option<u64>,
    pub started_at: DateTime<Utc>,
}

impl ExecutionState {
    /// Working on a task, optionally inside a story.
    pub fn task(task_id: u64, story_id: Option<u64>) -> Self {
        Self {
            story_id,
            task_id: Some(task_id),
            started_at: Utc::now(),
        }
    }

    /// Working on a story as a whole.
    pub fn story(story_id: u64) -> Self {
        Self {
            story_id: Some(story_id),
            task_id: None,
            started_at: Utc::now(),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.story_id.is_none() && self.task_id.is_none() {
            return Err(Error::schema(
                "execution_state",
                "story_id or task_id",
                "neither",
            ));
        }
        Ok(())
    }

    /// Whether this state points at `id` as either its task or its story.
    pub fn involves(&self, id: u64) -> bool {
        self.story_id == Some(id) || self.task_id == Some(id)
    }

    /// Story-level view: same story and start time, no task.
    pub fn demoted(&self) -> Option<Self> {
        self.story_id.map(|story_id| Self {
            story_id: Some(story_id),
            task_id: None,
            started_at: self.started_at,
        })
    }
}

/// Handle on one directory's execution-state file.
#[derive(Debug, Clone)]
pub struct ExecutionStateFile {
    path: PathBuf,
}

impl ExecutionStateFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Default file name inside a task directory.
    pub fn for_dir(tasks_dir: &Path) -> Self {
        Self::new(tasks_dir.join(STATE_FILE))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn read(&self) -> Option<ExecutionState> {
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(err) => {
                if err.kind() != std::io::ErrorKind::NotFound {
                    tracing::warn!(path = %self.path.display(), error = %err, "cannot read execution state");
                }
                return None;
            }
        };

        let state: ExecutionState = match serde_json::from_str(&content) {
            Ok(state) => state,
            Err(err) => {
                tracing::warn!(path = %self.path.display(), error = %err, "ignoring unparseable execution state");
                return None;
            }
        };

        if let Err(err) = state.validate() {
            tracing::warn!(path = %self.path.display(), error = %err, "ignoring invalid execution state");
            return None;
        }
        Some(state)
    }

    pub fn write(&self, state: &ExecutionState) -> Result<()> {
        state.validate()?;
        let mut data = serde_json::to_vec_pretty(state)?;
        data.push(b'\n');
        lock::write_atomic(&self.path, &data)?;
        tracing::debug!(path = %self.path.display(), story_id = ?state.story_id, task_id = ?state.task_id, "execution state written");
        Ok(())
    }

    /// Remove the file. Returns whether there was one.
    pub fn clear(&self) -> Result<bool> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(true),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(err) => Err(Error::Io(err)),
        }
    }

    /// A child task finished: fall back to the story, or clear if there is none.
    pub fn demote_on_child_completion(&self) -> Result<Option<ExecutionState>> {
        let Some(current) = self.read() else {
            return Ok(None);
        };
        match current.demoted() {
            Some(story_level) => {
                self.write(&story_level)?;
                Ok(Some(story_level))
            }
            None => {
                self.clear()?;
                Ok(None)
            }
        }
    }
}
