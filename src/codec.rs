//! JSON-lines record files
//!
//! The active and completed task stores are plain JSONL files: one
//! self-contained record per line, file order is meaningful.
//!
//! ```text
//! .tasks/
//!   tasks.jsonl               # active tasks, user-ordered
//!   completed.jsonl           # archived tasks, in completion order
//!   .execution_state.json     # what this directory's agent is working on
//!   .tasks.lock               # present while a writer holds the store
//! ```

use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::Path;

use serde::{de::DeserializeOwned, Serialize};

use crate::config::MalformedPolicy;
use crate::error::{Error, Result};
use crate::lock;
use crate::task::Task;

/// Read every record from a JSONL file.
///
/// A missing file reads as empty. Blank lines are ignored. The first line
/// that fails to parse aborts the read with [`Error::MalformedRecord`].
pub fn read_jsonl<T: DeserializeOwned>(path: &Path) -> Result<Vec<T>> {
    read_jsonl_with(path, MalformedPolicy::Fail)
}

/// Like [`read_jsonl`], with a choice of what to do about bad lines.
pub fn read_jsonl_with<T: DeserializeOwned>(path: &Path, policy: MalformedPolicy) -> Result<Vec<T>> {
    if !path.exists() {
        return Ok(Vec::new());
    }

    let file = File::open(path)?;
    let reader = BufReader::new(file);
    let mut records = Vec::new();

    for (idx, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str(&line) {
            Ok(record) => records.push(record),
            Err(err) => match policy {
                MalformedPolicy::Fail => {
                    return Err(Error::MalformedRecord {
                        path: path.to_path_buf(),
                        line: idx + 1,
                        message: err.to_string(),
                    });
                }
                MalformedPolicy::Skip => {
                    tracing::warn!(
                        path = %path.display(),
                        line = idx + 1,
                        error = %err,
                        "skipping malformed record"
                    );
                }
            },
        }
    }

    Ok(records)
}

/// Overwrite `path` with `records`, one per line, in order.
///
/// Goes through a temp file + rename so readers never see a half-written
/// store.
pub fn write_jsonl<T: Serialize>(path: &Path, records: &[T]) -> Result<()> {
    let mut buffer = Vec::new();
    for record in records {
        serde_json::to_writer(&mut buffer, record)?;
        buffer.push(b'\n');
    }
    lock::write_atomic(path, &buffer)
}

/// Append one record without touching the rest of the file.
///
/// Not atomic on its own; callers hold the store lock.
pub fn append_jsonl<T: Serialize>(path: &Path, record: &T) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    let json = serde_json::to_string(record)?;
    let mut file = OpenOptions::new().create(true).append(true).open(path)?;

    // Keep the new record on its own line if a user left the file unterminated.
    if needs_leading_newline(path)? {
        writeln!(file)?;
    }
    writeln!(file, "{}", json)?;
    file.sync_all()?;

    Ok(())
}

fn needs_leading_newline(path: &Path) -> Result<bool> {
    use std::io::{Read, Seek, SeekFrom};

    let mut file = File::open(path)?;
    let len = file.metadata()?.len();
    if len == 0 {
        return Ok(false);
    }
    file.seek(SeekFrom::Start(len - 1))?;
    let mut last = [0u8; 1];
    file.read_exact(&mut last)?;
    Ok(last[0] != b'\n')
}

pub fn read_records(path: &Path) -> Result<Vec<Task>> {
    read_jsonl(path)
}

pub fn read_records_with(path: &Path, policy: MalformedPolicy) -> Result<Vec<Task>> {
    read_jsonl_with(path, policy)
}

pub fn write_records(path: &Path, records: &[Task]) -> Result<()> {
    write_jsonl(path, records)
}

pub fn append_record(path: &Path, record: &Task) -> Result<()> {
    append_jsonl(path, record)
}
