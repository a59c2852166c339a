//! agent-tasks init command implementation
//!
//! Writes a default `.agent-tasks.toml`, creates the task directory with its
//! store files, and keeps per-session files out of version control.

use std::path::{Path, PathBuf};

use crate::config::{Config, CONFIG_FILE};
use crate::error::{Error, Result};
use crate::output::{emit_success, HumanOutput, OutputOptions};
use crate::store::TaskStore;

#[derive(serde::Serialize)]
struct InitReport {
    root: PathBuf,
    tasks_dir: PathBuf,
    created: InitCreated,
    updated: InitUpdated,
}

#[derive(serde::Serialize)]
struct InitCreated {
    config: bool,
    tasks_dir: bool,
    completed_file: bool,
}

#[derive(serde::Serialize)]
struct InitUpdated {
    gitignore: bool,
}

pub fn run(root: &Path, output: OutputOptions) -> Result<()> {
    let created_config = ensure_config(root)?;
    let store = TaskStore::open(root)?;
    let settings = store.settings();

    let created_tasks_dir = !settings.tasks_dir.exists();
    store.init()?;
    let created_completed = ensure_file(&settings.completed_path)?;

    let session_files: Vec<String> = [&settings.state_path, &settings.lock_path]
        .iter()
        .filter_map(|path| path.file_name())
        .map(|name| name.to_string_lossy().into_owned())
        .collect();
    let updated_gitignore = ensure_gitignore(&settings.tasks_dir, &session_files)?;

    let report = InitReport {
        root: root.to_path_buf(),
        tasks_dir: settings.tasks_dir.clone(),
        created: InitCreated {
            config: created_config,
            tasks_dir: created_tasks_dir,
            completed_file: created_completed,
        },
        updated: InitUpdated {
            gitignore: updated_gitignore,
        },
    };

    let mut created_items = Vec::new();
    if created_config {
        created_items.push(CONFIG_FILE.to_string());
    }
    if created_tasks_dir {
        created_items.push(format!("{}/", settings.tasks_dir.display()));
    }

    let header = if created_items.is_empty() && !updated_gitignore {
        "agent-tasks init: nothing to do".to_string()
    } else {
        "agent-tasks init: initialized task store".to_string()
    };

    let mut human = HumanOutput::new(header);
    human.push_summary("root", root.display().to_string());
    human.push_summary(
        "created",
        if created_items.is_empty() {
            "none".to_string()
        } else {
            created_items.join(", ")
        },
    );
    human.push_next_step("agent-tasks add \"<title>\"");

    emit_success(output, "init", &report, Some(&human))
}

fn ensure_config(root: &Path) -> Result<bool> {
    let config_path = root.join(CONFIG_FILE);
    if config_path.exists() {
        if !config_path.is_file() {
            return Err(Error::OperationFailed(format!(
                "{CONFIG_FILE} exists but is not a file: {}",
                config_path.display()
            )));
        }
        return Ok(false);
    }

    Config::default().save(&config_path)?;
    Ok(true)
}

fn ensure_file(path: &Path) -> Result<bool> {
    if path.exists() {
        return Ok(false);
    }
    std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)?;
    Ok(true)
}

/// The lock marker and execution state belong to one session; never commit them.
fn ensure_gitignore(tasks_dir: &Path, entries: &[String]) -> Result<bool> {
    let path = tasks_dir.join(".gitignore");
    if path.exists() && !path.is_file() {
        return Err(Error::OperationFailed(format!(
            ".gitignore exists but is not a file: {}",
            path.display()
        )));
    }

    let existing = if path.exists() {
        std::fs::read_to_string(&path)?
    } else {
        String::new()
    };

    let missing: Vec<&String> = entries
        .iter()
        .filter(|entry| !existing.lines().any(|line| line.trim() == entry.as_str()))
        .collect();
    if missing.is_empty() {
        return Ok(false);
    }

    let mut updated = existing;
    if !updated.is_empty() && !updated.ends_with('\n') {
        updated.push('\n');
    }
    for entry in missing {
        updated.push_str(entry);
        updated.push('\n');
    }
    std::fs::write(&path, updated)?;
    Ok(true)
}
