//! Error types for agent-tasks
//!
//! Exit codes:
//! - 0: Success
//! - 2: User error (bad args, unknown task, schema violation)
//! - 3: Blocked (lock held elsewhere, story has open children)
//! - 4: Operation failed (I/O, malformed store file)

use std::path::PathBuf;

use serde_json::{json, Value};
use thiserror::Error;

/// Exit codes for the agent-tasks CLI
pub mod exit_codes {
    pub const SUCCESS: i32 = 0;
    pub const USER_ERROR: i32 = 2;
    pub const BLOCKED: i32 = 3;
    pub const OPERATION_FAILED: i32 = 4;
}

/// Main error type for task store operations
#[derive(Error, Debug)]
pub enum Error {
    // User errors (exit code 2)
    #[error("Task not found: {0}")]
    TaskNotFound(u64),

    #[error("Schema invalid: `{field}` expected {expected}, got {found}")]
    SchemaInvalid {
        field: String,
        expected: String,
        found: String,
    },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    // Blocked (exit code 3)
    #[error("Timed out after {waited_ms}ms waiting for lock {path}{}", holder_suffix(.holder))]
    LockTimeout {
        path: PathBuf,
        waited_ms: u64,
        holder: Option<String>,
    },

    #[error("Story {story_id} has blocking children: {}", join_ids(.children))]
    BlockingChildren { story_id: u64, children: Vec<u64> },

    // Operation failures (exit code 4)
    #[error("Malformed record in {path} at line {line}: {message}")]
    MalformedRecord {
        path: PathBuf,
        line: usize,
        message: String,
    },

    #[error("Locked operation panicked: {0}")]
    CallbackPanicked(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    #[error("Operation failed: {0}")]
    OperationFailed(String),
}

fn holder_suffix(holder: &Option<String>) -> String {
    match holder {
        Some(holder) => format!(" (held by {holder})"),
        None => String::new(),
    }
}

fn join_ids(ids: &[u64]) -> String {
    ids.iter()
        .map(|id| id.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

impl Error {
    /// Shorthand for a schema violation on one field.
    pub fn schema(
        field: impl Into<String>,
        expected: impl Into<String>,
        found: impl Into<String>,
    ) -> Self {
        Error::SchemaInvalid {
            field: field.into(),
            expected: expected.into(),
            found: found.into(),
        }
    }

    /// Get the exit code for this error
    pub fn exit_code(&self) -> i32 {
        match self {
            // User errors
            Error::TaskNotFound(_)
            | Error::SchemaInvalid { .. }
            | Error::InvalidConfig(_)
            | Error::InvalidArgument(_) => exit_codes::USER_ERROR,

            // Blocked
            Error::LockTimeout { .. } | Error::BlockingChildren { .. } => exit_codes::BLOCKED,

            // Operation failures
            Error::MalformedRecord { .. }
            | Error::CallbackPanicked(_)
            | Error::Io(_)
            | Error::Json(_)
            | Error::TomlParse(_)
            | Error::TomlSerialize(_)
            | Error::OperationFailed(_) => exit_codes::OPERATION_FAILED,
        }
    }

    /// Stable machine-readable name for the failure.
    pub fn kind(&self) -> &'static str {
        match self {
            Error::TaskNotFound(_) => "not_found",
            Error::SchemaInvalid { .. } => "schema_invalid",
            Error::InvalidConfig(_) => "invalid_config",
            Error::InvalidArgument(_) => "invalid_argument",
            Error::LockTimeout { .. } => "lock_timeout",
            Error::BlockingChildren { .. } => "blocking_children",
            Error::MalformedRecord { .. } => "malformed_record",
            Error::CallbackPanicked(_) => "callback_panicked",
            Error::Io(_) => "io",
            Error::Json(_) | Error::TomlParse(_) | Error::TomlSerialize(_) => "encoding",
            Error::OperationFailed(_) => "operation_failed",
        }
    }

    /// Structured fields describing the failure, for JSON output.
    pub fn details(&self) -> Option<Value> {
        match self {
            Error::TaskNotFound(id) => Some(json!({ "id": id })),
            Error::SchemaInvalid {
                field,
                expected,
                found,
            } => Some(json!({
                "field": field,
                "expected": expected,
                "found": found,
            })),
            Error::InvalidConfig(message) | Error::InvalidArgument(message) => {
                Some(json!({ "message": message }))
            }
            Error::LockTimeout {
                path,
                waited_ms,
                holder,
            } => Some(json!({
                "path": path.display().to_string(),
                "waited_ms": waited_ms,
                "holder": holder,
            })),
            Error::BlockingChildren { story_id, children } => Some(json!({
                "story_id": story_id,
                "children": children,
            })),
            Error::MalformedRecord {
                path,
                line,
                message,
            } => Some(json!({
                "path": path.display().to_string(),
                "line": line,
                "message": message,
            })),
            _ => None,
        }
    }
}

/// Result type alias for task store operations
pub type Result<T> = std::result::Result<T, Error>;

/// Wrapper for displaying errors in JSON format
#[derive(serde::Serialize)]
pub struct JsonError {
    pub error: String,
    pub kind: &'static str,
    pub code: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

impl From<&Error> for JsonError {
    fn from(err: &Error) -> Self {
        JsonError {
            error: err.to_string(),
            kind: err.kind(),
            code: err.exit_code(),
            details: err.details(),
        }
    }
}
