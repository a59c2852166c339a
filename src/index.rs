//! In-memory mirror of the active task store.
//!
//! The index keeps the active file's order as-is (users reorder the file by
//! hand, so order is never re-derived from ids), an id→record map, and the
//! parent/child adjacency in both directions. Records from the completed
//! store are cached read-only: they feed id allocation and `Any` queries.
//!
//! Every mutation persists the active order back through the codec. If the
//! write fails, the in-memory state is rolled back to what it was before.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

use chrono::Utc;
use regex::Regex;

use crate::codec;
use crate::config::MalformedPolicy;
use crate::error::{Error, Result};
use crate::id;
use crate::task::{NewTask, SessionEvent, Task, TaskPatch, TaskStatus};

/// Status clause of a [`TaskFilter`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum StatusFilter {
    /// Active records whose status is not terminal.
    #[default]
    Open,
    /// Active records, then completed records, in file order.
    Any,
    /// Active records with exactly this status.
    Exactly(TaskStatus),
}

impl std::str::FromStr for StatusFilter {
    type Err = Error;

    fn from_str(raw: &str) -> Result<Self> {
        match raw.trim() {
            "" | "default" => Ok(StatusFilter::Open),
            "any" | ":any" => Ok(StatusFilter::Any),
            other => other.parse().map(StatusFilter::Exactly),
        }
    }
}

/// Query filters; every set clause must match.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TaskFilter {
    pub category: Option<String>,
    pub parent_id: Option<u64>,
    pub title_pattern: Option<String>,
    pub status: StatusFilter,
}

impl TaskFilter {
    pub fn category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }

    pub fn parent(mut self, parent_id: u64) -> Self {
        self.parent_id = Some(parent_id);
        self
    }

    pub fn title(mut self, pattern: impl Into<String>) -> Self {
        self.title_pattern = Some(pattern.into());
        self
    }

    pub fn status(mut self, status: StatusFilter) -> Self {
        self.status = status;
        self
    }
}

enum TitleMatcher {
    Pattern(Regex),
    Substring(String),
}

impl TitleMatcher {
    fn new(raw: &str) -> Self {
        match Regex::new(raw) {
            Ok(regex) => TitleMatcher::Pattern(regex),
            Err(err) => {
                tracing::debug!(pattern = raw, error = %err, "title pattern is not a regex; using substring match");
                TitleMatcher::Substring(raw.to_string())
            }
        }
    }

    fn matches(&self, title: &str) -> bool {
        match self {
            TitleMatcher::Pattern(regex) => regex.is_match(title),
            TitleMatcher::Substring(needle) => title.contains(needle.as_str()),
        }
    }
}

#[derive(Debug, Clone, Default)]
struct ActiveState {
    order: Vec<u64>,
    tasks: HashMap<u64, Task>,
    children: HashMap<u64, HashSet<u64>>,
    parents: HashMap<u64, u64>,
}

impl ActiveState {
    fn link(&mut self, child: u64, parent: u64) {
        self.parents.insert(child, parent);
        self.children.entry(parent).or_default().insert(child);
    }

    fn unlink(&mut self, child: u64) {
        if let Some(parent) = self.parents.remove(&child) {
            if let Some(set) = self.children.get_mut(&parent) {
                set.remove(&child);
                if set.is_empty() {
                    self.children.remove(&parent);
                }
            }
        }
    }

    /// Drop `id` from the order and map, keeping the edges of its children.
    fn purge(&mut self, id: u64) -> Option<Task> {
        let task = self.tasks.remove(&id)?;
        self.order.retain(|existing| *existing != id);
        self.unlink(id);
        Some(task)
    }

    fn ordered(&self) -> Vec<Task> {
        self.order
            .iter()
            .filter_map(|id| self.tasks.get(id))
            .cloned()
            .collect()
    }
}

/// Process-local index over one task store. Owned by the caller.
#[derive(Debug, Clone)]
pub struct TaskIndex {
    active: ActiveState,
    archive: Vec<Task>,
    next_id: u64,
    active_path: Option<PathBuf>,
    completed_path: Option<PathBuf>,
    malformed: MalformedPolicy,
}

impl Default for TaskIndex {
    fn default() -> Self {
        Self::new()
    }
}

impl TaskIndex {
    pub fn new() -> Self {
        Self::with_policy(MalformedPolicy::default())
    }

    pub fn with_policy(malformed: MalformedPolicy) -> Self {
        Self {
            active: ActiveState::default(),
            archive: Vec::new(),
            next_id: 1,
            active_path: None,
            completed_path: None,
            malformed,
        }
    }

    // =========================================================================
    // Loading and saving
    // =========================================================================

    /// Reset and load from `active_path`; `completed_path` only feeds the
    /// archive cache and id allocation. Returns the number of active records.
    pub fn load(&mut self, active_path: &Path, completed_path: Option<&Path>) -> Result<usize> {
        self.active = ActiveState::default();
        self.archive = Vec::new();
        self.next_id = 1;
        self.active_path = Some(active_path.to_path_buf());
        self.completed_path = completed_path.map(Path::to_path_buf);

        if let Some(completed) = completed_path {
            self.archive = codec::read_records_with(completed, self.malformed)?;
        }

        if !active_path.exists() {
            self.next_id = id::next_id(&[], &self.archive)?;
            return Ok(0);
        }

        let records = codec::read_records_with(active_path, self.malformed)?;
        self.next_id = id::next_id(&records, &self.archive)?;

        let mut state = ActiveState::default();
        for task in records {
            if state.tasks.contains_key(&task.id) {
                return Err(Error::schema(
                    "id",
                    "unique id per store",
                    format!("{} repeated in {}", task.id, active_path.display()),
                ));
            }
            if let Some(parent) = task.parent_id {
                state.link(task.id, parent);
            }
            state.order.push(task.id);
            state.tasks.insert(task.id, task);
        }
        self.active = state;

        tracing::debug!(
            path = %active_path.display(),
            active = self.active.order.len(),
            archived = self.archive.len(),
            next_id = self.next_id,
            "task index loaded"
        );
        Ok(self.active.order.len())
    }

    /// Write the active order to `path`. Returns the number of records written.
    pub fn save(&self, path: &Path) -> Result<usize> {
        let records = self.active.ordered();
        codec::write_records(path, &records)?;
        Ok(records.len())
    }

    fn persist(&self) -> Result<()> {
        match &self.active_path {
            Some(path) => self.save(path).map(|_| ()),
            None => Ok(()),
        }
    }

    fn commit(&mut self, before: ActiveState) -> Result<()> {
        if let Err(err) = self.persist() {
            self.active = before;
            return Err(err);
        }
        Ok(())
    }

    // =========================================================================
    // Reads
    // =========================================================================

    pub fn get(&self, id: u64) -> Option<&Task> {
        self.active.tasks.get(&id)
    }

    /// Children of `parent_id` that are still active, in file order.
    pub fn children(&self, parent_id: u64) -> Vec<&Task> {
        let Some(set) = self.active.children.get(&parent_id) else {
            return Vec::new();
        };
        self.active
            .order
            .iter()
            .filter(|id| set.contains(id))
            .filter_map(|id| self.active.tasks.get(id))
            .collect()
    }

    pub fn parent_of(&self, id: u64) -> Option<u64> {
        self.active.parents.get(&id).copied()
    }

    /// Active children of a story that still represent incomplete work.
    pub fn blocking_children(&self, story_id: u64) -> Vec<u64> {
        self.children(story_id)
            .into_iter()
            .filter(|task| task.status.is_blocking())
            .map(|task| task.id)
            .collect()
    }

    /// A record from the completed store, as of the last load.
    pub fn archived(&self, id: u64) -> Option<&Task> {
        self.archive.iter().find(|task| task.id == id)
    }

    pub fn archive(&self) -> &[Task] {
        &self.archive
    }

    /// Active ids in file order.
    pub fn ids(&self) -> &[u64] {
        &self.active.order
    }

    pub fn tasks(&self) -> impl Iterator<Item = &Task> {
        self.active
            .order
            .iter()
            .filter_map(|id| self.active.tasks.get(id))
    }

    pub fn len(&self) -> usize {
        self.active.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.active.order.is_empty()
    }

    pub fn next_id(&self) -> u64 {
        self.next_id
    }

    pub fn active_path(&self) -> Option<&Path> {
        self.active_path.as_deref()
    }

    pub fn completed_path(&self) -> Option<&Path> {
        self.completed_path.as_deref()
    }

    pub fn query(&self, filter: &TaskFilter) -> Vec<Task> {
        let title = filter.title_pattern.as_deref().map(TitleMatcher::new);
        let matches = |task: &Task| {
            filter
                .category
                .as_deref()
                .map_or(true, |category| task.category == category)
                && filter
                    .parent_id
                    .map_or(true, |parent| task.parent_id == Some(parent))
                && title.as_ref().map_or(true, |m| m.matches(&task.title))
        };

        let active = self.tasks().filter(|task| match filter.status {
            StatusFilter::Open => !task.status.is_terminal(),
            StatusFilter::Any => true,
            StatusFilter::Exactly(status) => task.status == status,
        });

        let mut results: Vec<Task> = active.filter(|task| matches(*task)).cloned().collect();
        if filter.status == StatusFilter::Any {
            results.extend(self.archive.iter().filter(|task| matches(*task)).cloned());
        }
        results
    }

    // =========================================================================
    // Mutations
    // =========================================================================

    /// Assign the next id, insert at the head (`prepend`) or tail, persist.
    pub fn add(&mut self, new: NewTask, prepend: bool) -> Result<Task> {
        let id = self.next_id;
        let following = id::successor(id)?;
        let task = new.into_task(id, Utc::now());
        task.validate()?;
        if let Some(parent) = task.parent_id {
            self.check_parent(id, parent)?;
        }

        let before = self.active.clone();
        if prepend {
            self.active.order.insert(0, id);
        } else {
            self.active.order.push(id);
        }
        if let Some(parent) = task.parent_id {
            self.active.link(id, parent);
        }
        self.active.tasks.insert(id, task.clone());
        self.commit(before)?;

        self.next_id = following;
        tracing::debug!(id, prepend, "task added");
        Ok(task)
    }

    /// Merge `patch` onto task `id`. On any error the index is unchanged.
    pub fn update(&mut self, id: u64, patch: &TaskPatch) -> Result<Task> {
        let current = self.active.tasks.get(&id).ok_or(Error::TaskNotFound(id))?;
        let mut merged = current.merged(patch)?;
        let reparented = merged.parent_id != current.parent_id;
        if reparented {
            if let Some(parent) = merged.parent_id {
                self.check_parent(id, parent)?;
            }
        }
        if !patch.is_empty() {
            merged.updated_at = Some(Utc::now());
        }

        let before = self.active.clone();
        if reparented {
            self.active.unlink(id);
            if let Some(parent) = merged.parent_id {
                self.active.link(id, parent);
            }
        }
        self.active.tasks.insert(id, merged.clone());
        self.commit(before)?;
        Ok(merged)
    }

    /// Remove task `id`. Its children stay active with `parent_id` cleared.
    pub fn delete(&mut self, id: u64) -> Result<Task> {
        if !self.active.tasks.contains_key(&id) {
            return Err(Error::TaskNotFound(id));
        }

        let before = self.active.clone();
        let removed = self.active.purge(id).ok_or(Error::TaskNotFound(id))?;
        let orphans: Vec<u64> = self
            .active
            .children
            .remove(&id)
            .map(|set| set.into_iter().collect())
            .unwrap_or_default();
        for child in &orphans {
            self.active.parents.remove(child);
            if let Some(task) = self.active.tasks.get_mut(child) {
                task.parent_id = None;
                task.updated_at = Some(Utc::now());
            }
        }
        self.commit(before)?;

        if !orphans.is_empty() {
            tracing::warn!(id, ?orphans, "deleted task had children; detached them");
        }
        Ok(removed)
    }

    /// Move task `id` from `from_path` to the end of `to_path`.
    ///
    /// The record leaves the active index; if `to_path` is the completed
    /// store it becomes visible through [`TaskIndex::archived`].
    pub fn move_task(&mut self, id: u64, from_path: &Path, to_path: &Path) -> Result<Task> {
        let task = self.active.tasks.get(&id).cloned().ok_or(Error::TaskNotFound(id))?;
        self.relocate(task, from_path, to_path)
    }

    /// Finalize task `id` with `finish` and move it into the completed store.
    pub fn archive_task<F>(&mut self, id: u64, finish: F) -> Result<Task>
    where
        F: FnOnce(&mut Task),
    {
        let (from, to) = match (&self.active_path, &self.completed_path) {
            (Some(from), Some(to)) => (from.clone(), to.clone()),
            _ => {
                return Err(Error::OperationFailed(
                    "index was not loaded with both store files".to_string(),
                ))
            }
        };
        let mut task = self.active.tasks.get(&id).cloned().ok_or(Error::TaskNotFound(id))?;
        finish(&mut task);
        task.id = id;
        task.validate()?;
        self.relocate(task, &from, &to)
    }

    fn relocate(&mut self, task: Task, from_path: &Path, to_path: &Path) -> Result<Task> {
        let id = task.id;

        // Append first: a crash in between leaves a duplicate, never a loss.
        codec::append_record(to_path, &task)?;
        let remaining: Vec<Task> = codec::read_records_with(from_path, self.malformed)?
            .into_iter()
            .filter(|record| record.id != id)
            .collect();
        codec::write_records(from_path, &remaining)?;

        self.active.purge(id);
        if self.completed_path.as_deref() == Some(to_path) {
            self.archive.push(task.clone());
        }
        self.next_id = self.next_id.max(id.saturating_add(1));

        tracing::info!(
            id,
            from = %from_path.display(),
            to = %to_path.display(),
            "task moved"
        );
        Ok(task)
    }

    /// Append an event to a story's session journal.
    pub fn append_session_event(&mut self, story_id: u64, event: SessionEvent) -> Result<Task> {
        let current = self
            .active
            .tasks
            .get(&story_id)
            .ok_or(Error::TaskNotFound(story_id))?;
        if !current.is_story() {
            return Err(Error::schema(
                "session_events",
                "a story",
                format!("task {} of type {}", story_id, current.task_type),
            ));
        }

        let mut updated = current.clone();
        updated.session_events.push(event);
        updated.updated_at = Some(Utc::now());
        updated.validate()?;

        let before = self.active.clone();
        self.active.tasks.insert(story_id, updated.clone());
        self.commit(before)?;
        Ok(updated)
    }

    /// A new `parent_id` must name a known task and must not close a cycle.
    fn check_parent(&self, child: u64, parent: u64) -> Result<()> {
        let known = self.active.tasks.contains_key(&parent) || self.archived(parent).is_some();
        if !known {
            return Err(Error::schema(
                "parent_id",
                "id of an existing task",
                parent.to_string(),
            ));
        }

        let mut cursor = Some(parent);
        let mut seen = HashSet::new();
        while let Some(current) = cursor {
            if current == child {
                return Err(Error::schema(
                    "parent_id",
                    "a parent outside the task's own subtree",
                    parent.to_string(),
                ));
            }
            if !seen.insert(current) {
                break;
            }
            cursor = self.active.parents.get(&current).copied();
        }
        Ok(())
    }
}
