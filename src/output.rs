//! Human and JSON rendering for agent-tasks commands.
//!
//! Every command reports through [`emit_success`] or [`emit_error`]. With
//! `--json` both print one envelope on stdout:
//!
//! ```json
//! { "schema_version": "agent-tasks.v1", "command": "add", "status": "success", "data": { ... } }
//! { "schema_version": "agent-tasks.v1", "command": "complete", "status": "error", "error": { ... } }
//! ```

use std::fmt;

use serde::Serialize;
use serde_json::Value;

use crate::error::{Error, Result};

pub const SCHEMA_VERSION: &str = "agent-tasks.v1";

#[derive(Debug, Clone, Copy, Default)]
pub struct OutputOptions {
    pub json: bool,
    pub quiet: bool,
}

/// Report printed when `--json` is off: a header line, `key: value` pairs,
/// free-form detail lines and suggested follow-up commands.
#[derive(Debug, Clone)]
pub struct HumanOutput {
    header: String,
    summary: Vec<(String, String)>,
    details: Vec<String>,
    next_steps: Vec<String>,
}

impl HumanOutput {
    pub fn new(header: impl Into<String>) -> Self {
        Self {
            header: header.into(),
            summary: Vec::new(),
            details: Vec::new(),
            next_steps: Vec::new(),
        }
    }

    pub fn push_summary(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.summary.push((key.into(), value.into()));
    }

    pub fn push_detail(&mut self, value: impl Into<String>) {
        self.details.push(value.into());
    }

    pub fn push_next_step(&mut self, command: impl Into<String>) {
        self.next_steps.push(command.into());
    }
}

impl fmt::Display for HumanOutput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.header)?;
        if !self.summary.is_empty() {
            // Align values under the longest key.
            let width = self.summary.iter().map(|(key, _)| key.len()).max().unwrap_or(0);
            writeln!(f)?;
            for (key, value) in &self.summary {
                write!(f, "\n  {key:<width$}  {value}")?;
            }
        }
        if !self.details.is_empty() {
            writeln!(f)?;
            for line in &self.details {
                write!(f, "\n  {line}")?;
            }
        }
        if !self.next_steps.is_empty() {
            write!(f, "\n\nNext:")?;
            for step in &self.next_steps {
                write!(f, "\n  $ {step}")?;
            }
        }
        Ok(())
    }
}

#[derive(Serialize)]
struct Envelope<'a, T: Serialize> {
    schema_version: &'static str,
    command: &'a str,
    #[serde(flatten)]
    outcome: Outcome<'a, T>,
    #[serde(skip_serializing_if = "<[String]>::is_empty")]
    next_steps: &'a [String],
}

#[derive(Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
enum Outcome<'a, T: Serialize> {
    Success { data: &'a T },
    Error { error: ErrorBody },
}

#[derive(Serialize)]
struct ErrorBody {
    kind: &'static str,
    code: i32,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<Value>,
}

fn print_envelope<T: Serialize>(envelope: &Envelope<'_, T>) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(envelope)?);
    Ok(())
}

/// Print a command's result: the JSON envelope around `data`, or the human
/// report unless `--quiet` is set.
pub fn emit_success<T: Serialize>(
    options: OutputOptions,
    command: &str,
    data: &T,
    human: Option<&HumanOutput>,
) -> Result<()> {
    if options.json {
        let next_steps = human.map(|h| h.next_steps.as_slice()).unwrap_or_default();
        return print_envelope(&Envelope {
            schema_version: SCHEMA_VERSION,
            command,
            outcome: Outcome::Success { data },
            next_steps,
        });
    }

    match human {
        Some(human) if !options.quiet => println!("{human}"),
        _ => {}
    }
    Ok(())
}

/// Print a failed command. JSON goes to stdout so callers can parse a single
/// stream; the human form goes to stderr.
pub fn emit_error(command: &str, err: &Error, json: bool) -> Result<()> {
    let next_steps = error_next_steps(err);
    if json {
        return print_envelope::<()>(&Envelope {
            schema_version: SCHEMA_VERSION,
            command,
            outcome: Outcome::Error {
                error: ErrorBody {
                    kind: err.kind(),
                    code: err.exit_code(),
                    message: err.to_string(),
                    details: err.details(),
                },
            },
            next_steps: &next_steps,
        });
    }

    eprintln!("error: {err}");
    for step in &next_steps {
        eprintln!("  try: {step}");
    }
    Ok(())
}

/// Commands that move an agent past `err`.
pub fn error_next_steps(err: &Error) -> Vec<String> {
    match err {
        Error::TaskNotFound(_) => vec!["agent-tasks list --status any".to_string()],
        Error::LockTimeout { path, .. } => vec![format!(
            "wait for the holder to finish, or remove {} if no agent is running",
            path.display()
        )],
        Error::BlockingChildren { children, .. } => children
            .iter()
            .map(|id| format!("agent-tasks complete {id}"))
            .collect(),
        Error::MalformedRecord { path, line, .. } => vec![format!(
            "fix line {line} of {}, or set store.malformed = \"skip\"",
            path.display()
        )],
        Error::InvalidConfig(_) => vec!["fix .agent-tasks.toml then retry".to_string()],
        _ => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn success_envelope_shape() {
        let data = serde_json::json!({ "id": 3 });
        let envelope = Envelope {
            schema_version: SCHEMA_VERSION,
            command: "add",
            outcome: Outcome::Success { data: &data },
            next_steps: &[],
        };
        let value = serde_json::to_value(&envelope).unwrap();
        assert_eq!(value["status"], "success");
        assert_eq!(value["data"]["id"], 3);
        assert!(value.get("next_steps").is_none());
        assert!(value.get("error").is_none());
    }

    #[test]
    fn error_envelope_carries_kind_and_details() {
        let err = Error::BlockingChildren {
            story_id: 1,
            children: vec![4],
        };
        let steps = error_next_steps(&err);
        let envelope = Envelope::<()> {
            schema_version: SCHEMA_VERSION,
            command: "complete",
            outcome: Outcome::Error {
                error: ErrorBody {
                    kind: err.kind(),
                    code: err.exit_code(),
                    message: err.to_string(),
                    details: err.details(),
                },
            },
            next_steps: &steps,
        };
        let value = serde_json::to_value(&envelope).unwrap();
        assert_eq!(value["status"], "error");
        assert_eq!(value["error"]["kind"], "blocking_children");
        assert_eq!(value["error"]["code"], 3);
        assert_eq!(value["error"]["details"]["children"][0], 4);
        assert_eq!(value["next_steps"][0], "agent-tasks complete 4");
    }

    #[test]
    fn io_errors_suggest_nothing() {
        let err = Error::from(std::io::Error::new(std::io::ErrorKind::Other, "disk"));
        assert!(error_next_steps(&err).is_empty());
    }
}
