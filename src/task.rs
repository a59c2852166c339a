//! Task records for the agent task store.
//!
//! One [`Task`] is one JSON line in the active or completed store file.
//! Partial updates arrive as [`TaskPatch`] objects and are merged field by
//! field, so a bad value is reported against the field that carried it.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Open,
    InProgress,
    Blocked,
    Closed,
    Deleted,
    /// Finished but waiting on something external, e.g. a merge.
    Done,
}

impl TaskStatus {
    pub const ALL: [TaskStatus; 6] = [
        TaskStatus::Open,
        TaskStatus::InProgress,
        TaskStatus::Blocked,
        TaskStatus::Closed,
        TaskStatus::Deleted,
        TaskStatus::Done,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            TaskStatus::Open => "open",
            TaskStatus::InProgress => "in_progress",
            TaskStatus::Blocked => "blocked",
            TaskStatus::Closed => "closed",
            TaskStatus::Deleted => "deleted",
            TaskStatus::Done => "done",
        }
    }

    /// Incomplete work that keeps a parent story open.
    pub fn is_blocking(self) -> bool {
        matches!(
            self,
            TaskStatus::Open | TaskStatus::InProgress | TaskStatus::Blocked
        )
    }

    pub fn is_terminal(self) -> bool {
        !self.is_blocking()
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskStatus {
    type Err = Error;

    fn from_str(raw: &str) -> Result<Self> {
        let trimmed = raw.trim();
        TaskStatus::ALL
            .into_iter()
            .find(|status| status.as_str().eq_ignore_ascii_case(trimmed))
            .ok_or_else(|| Error::schema("status", expected_status(), quoted(raw)))
    }
}

fn expected_status() -> String {
    let names: Vec<&str> = TaskStatus::ALL.iter().map(|s| s.as_str()).collect();
    format!("one of {}", names.join("|"))
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
    #[default]
    Task,
    Bug,
    Feature,
    Story,
    Chore,
}

impl TaskType {
    pub const ALL: [TaskType; 5] = [
        TaskType::Task,
        TaskType::Bug,
        TaskType::Feature,
        TaskType::Story,
        TaskType::Chore,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            TaskType::Task => "task",
            TaskType::Bug => "bug",
            TaskType::Feature => "feature",
            TaskType::Story => "story",
            TaskType::Chore => "chore",
        }
    }
}

impl fmt::Display for TaskType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskType {
    type Err = Error;

    fn from_str(raw: &str) -> Result<Self> {
        let trimmed = raw.trim();
        TaskType::ALL
            .into_iter()
            .find(|kind| kind.as_str().eq_ignore_ascii_case(trimmed))
            .ok_or_else(|| Error::schema("type", "one of task|bug|feature|story|chore", quoted(raw)))
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum RelationType {
    BlockedBy,
    Related,
    DiscoveredDuring,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Relation {
    pub id: u64,
    pub relates_to: u64,
    pub as_type: RelationType,
}

/// One entry in a story's execution journal.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SessionEvent {
    pub timestamp: DateTime<Utc>,
    pub event_type: String,
    #[serde(flatten)]
    pub fields: BTreeMap<String, Value>,
}

impl SessionEvent {
    pub fn new(event_type: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            event_type: event_type.into(),
            fields: BTreeMap::new(),
        }
    }

    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(key.into(), value.into());
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Task {
    pub id: u64,
    #[serde(default)]
    pub parent_id: Option<u64>,
    pub status: TaskStatus,
    #[serde(rename = "type", default)]
    pub task_type: TaskType,
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub design: String,
    #[serde(default)]
    pub category: String,
    #[serde(default)]
    pub meta: BTreeMap<String, String>,
    #[serde(default)]
    pub relations: Vec<Relation>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub session_events: Vec<SessionEvent>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    /// Keys this version does not know about, kept so rewrites are lossless.
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl Task {
    pub fn is_story(&self) -> bool {
        self.task_type == TaskType::Story
    }

    /// Record-level schema checks. Cross-record rules live in the index.
    pub fn validate(&self) -> Result<()> {
        if self.id == 0 {
            return Err(Error::schema("id", "positive integer", "0"));
        }
        if self.title.trim().is_empty() {
            return Err(Error::schema("title", "non-empty string", quoted(&self.title)));
        }
        if self.parent_id == Some(self.id) {
            return Err(Error::schema(
                "parent_id",
                "id of another task",
                self.id.to_string(),
            ));
        }
        if !self.session_events.is_empty() && !self.is_story() {
            return Err(Error::schema(
                "session_events",
                "empty list unless type is story",
                format!("{} events on a {}", self.session_events.len(), self.task_type),
            ));
        }
        if let Some(key) = self.meta.keys().find(|key| key.trim().is_empty()) {
            return Err(Error::schema("meta", "non-empty keys", quoted(key)));
        }
        for relation in &self.relations {
            if relation.relates_to == self.id {
                return Err(Error::schema(
                    "relations",
                    "relations to other tasks",
                    format!("{} relates to itself", self.id),
                ));
            }
        }
        Ok(())
    }

    /// Merge `patch` onto a copy of this task.
    ///
    /// The original is never touched; the merged copy is validated before
    /// it is returned.
    pub fn merged(&self, patch: &TaskPatch) -> Result<Task> {
        let mut task = self.clone();
        for (key, value) in patch.fields() {
            match key.as_str() {
                "id" => {
                    let id: u64 = decode("id", "positive integer", value)?;
                    if id != self.id {
                        return Err(Error::schema(
                            "id",
                            format!("immutable id {}", self.id),
                            value.to_string(),
                        ));
                    }
                }
                "parent_id" => {
                    task.parent_id = decode("parent_id", "integer or null", value)?;
                }
                "status" => {
                    task.status = match value {
                        Value::String(raw) => raw.parse()?,
                        other => {
                            return Err(Error::schema("status", expected_status(), other.to_string()))
                        }
                    };
                }
                "type" => {
                    task.task_type = match value {
                        Value::String(raw) => raw.parse()?,
                        other => {
                            return Err(Error::schema(
                                "type",
                                "one of task|bug|feature|story|chore",
                                other.to_string(),
                            ))
                        }
                    };
                }
                "title" => task.title = decode("title", "string", value)?,
                "description" => task.description = decode("description", "string", value)?,
                "design" => task.design = decode("design", "string", value)?,
                "category" => task.category = decode("category", "string", value)?,
                "meta" => {
                    let entries: BTreeMap<String, Option<String>> =
                        decode("meta", "object of string or null values", value)?;
                    for (meta_key, meta_value) in entries {
                        match meta_value {
                            Some(meta_value) => {
                                task.meta.insert(meta_key, meta_value);
                            }
                            None => {
                                task.meta.remove(&meta_key);
                            }
                        }
                    }
                }
                "relations" => {
                    task.relations = decode(
                        "relations",
                        "list of {id, relates_to, as_type}",
                        value,
                    )?;
                }
                "session_events" => {
                    task.session_events = decode(
                        "session_events",
                        "list of {timestamp, event_type, ...}",
                        value,
                    )?;
                }
                other => {
                    return Err(Error::schema(other, "updatable task field", value.to_string()));
                }
            }
        }
        task.validate()?;
        Ok(task)
    }

    /// Append a completion note to the description.
    pub fn append_note(&mut self, note: &str) {
        let note = note.trim();
        if note.is_empty() {
            return;
        }
        if self.description.trim().is_empty() {
            self.description = note.to_string();
        } else {
            self.description = format!("{}\n\n{}", self.description.trim_end(), note);
        }
    }
}

fn decode<T: DeserializeOwned>(field: &str, expected: &str, value: &Value) -> Result<T> {
    serde_json::from_value(value.clone())
        .map_err(|_| Error::schema(field, expected, value.to_string()))
}

fn quoted(raw: &str) -> String {
    format!("{raw:?}")
}

/// Fields for a task that has not been assigned an id yet.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct NewTask {
    pub title: String,
    #[serde(default)]
    pub parent_id: Option<u64>,
    #[serde(default)]
    pub status: Option<TaskStatus>,
    #[serde(rename = "type", default)]
    pub task_type: TaskType,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub design: String,
    #[serde(default)]
    pub category: String,
    #[serde(default)]
    pub meta: BTreeMap<String, String>,
    #[serde(default)]
    pub relations: Vec<Relation>,
}

impl NewTask {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            ..Self::default()
        }
    }

    pub fn story(title: impl Into<String>) -> Self {
        Self {
            task_type: TaskType::Story,
            ..Self::new(title)
        }
    }

    pub fn with_parent(mut self, parent_id: u64) -> Self {
        self.parent_id = Some(parent_id);
        self
    }

    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = category.into();
        self
    }

    pub fn with_status(mut self, status: TaskStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_type(mut self, task_type: TaskType) -> Self {
        self.task_type = task_type;
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Build the full record under `id`.
    pub fn into_task(self, id: u64, now: DateTime<Utc>) -> Task {
        Task {
            id,
            parent_id: self.parent_id,
            status: self.status.unwrap_or(TaskStatus::Open),
            task_type: self.task_type,
            title: self.title,
            description: self.description,
            design: self.design,
            category: self.category,
            meta: self.meta,
            relations: self.relations,
            session_events: Vec::new(),
            created_at: Some(now),
            updated_at: Some(now),
            completed_at: None,
            extra: BTreeMap::new(),
        }
    }
}

/// Partial update, keyed by task field name.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TaskPatch {
    fields: Map<String, Value>,
}

impl TaskPatch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Accept a JSON object as delivered by a tool call.
    pub fn from_json(value: Value) -> Result<Self> {
        match value {
            Value::Object(fields) => Ok(Self { fields }),
            other => Err(Error::schema("patch", "JSON object", other.to_string())),
        }
    }

    /// Set a raw field value. Checked when the patch is merged.
    pub fn set(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(key.into(), value.into());
        self
    }

    pub fn status(self, status: TaskStatus) -> Self {
        self.set("status", status.as_str())
    }

    pub fn title(self, title: impl Into<String>) -> Self {
        self.set("title", title.into())
    }

    pub fn description(self, description: impl Into<String>) -> Self {
        self.set("description", description.into())
    }

    pub fn design(self, design: impl Into<String>) -> Self {
        self.set("design", design.into())
    }

    pub fn category(self, category: impl Into<String>) -> Self {
        self.set("category", category.into())
    }

    pub fn parent(self, parent_id: Option<u64>) -> Self {
        self.set("parent_id", parent_id.map(Value::from).unwrap_or(Value::Null))
    }

    pub fn task_type(self, task_type: TaskType) -> Self {
        self.set("type", task_type.as_str())
    }

    /// Upsert one meta key; `None` removes it. A non-object `meta` already
    /// in the patch is replaced.
    pub fn meta(mut self, key: impl Into<String>, value: Option<String>) -> Self {
        let entry = self
            .fields
            .entry("meta")
            .or_insert_with(|| Value::Object(Map::new()));
        if !entry.is_object() {
            *entry = Value::Object(Map::new());
        }
        if let Value::Object(map) = entry {
            map.insert(key.into(), value.map(Value::from).unwrap_or(Value::Null));
        }
        self
    }

    pub fn fields(&self) -> &Map<String, Value> {
        &self.fields
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn touches(&self, key: &str) -> bool {
        self.fields.contains_key(key)
    }
}
