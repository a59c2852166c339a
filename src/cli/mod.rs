//! Command-line interface for agent-tasks
//!
//! This module defines the CLI structure using clap derive macros.
//! Handlers live in submodules and talk to the store through
//! [`crate::store::TaskStore`].

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::error::{Error, Result};
use crate::output::OutputOptions;
use crate::store::TaskStore;

mod init;
mod state;
mod task;

/// agent-tasks - a file-backed task store shared by coding agents
///
/// Tasks live in JSON-lines files under the project; every write holds a
/// directory lock so parallel agent sessions never lose updates.
#[derive(Parser, Debug)]
#[command(name = "agent-tasks")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Project root holding .agent-tasks.toml (defaults to current directory)
    #[arg(long, global = true, env = "AGENT_TASKS_ROOT")]
    pub root: Option<PathBuf>,

    /// Output in JSON format
    #[arg(long, global = true)]
    pub json: bool,

    /// Suppress non-essential output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Commands,
}

/// Available subcommands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Create the task directory, store files and config
    Init,

    /// Add a task
    Add {
        /// Task title
        title: String,

        /// Parent task or story id
        #[arg(long)]
        parent: Option<u64>,

        /// Task type: task, bug, feature, story, chore
        #[arg(long = "type", default_value = "task")]
        task_type: String,

        /// Initial status (defaults to open)
        #[arg(long)]
        status: Option<String>,

        /// Category label
        #[arg(long)]
        category: Option<String>,

        /// Description text
        #[arg(short, long)]
        description: Option<String>,

        /// Design notes
        #[arg(long)]
        design: Option<String>,

        /// Metadata entry (repeatable)
        #[arg(long = "meta", value_name = "KEY=VALUE")]
        meta: Vec<String>,

        /// Insert at the head of the active file instead of the tail
        #[arg(long)]
        prepend: bool,
    },

    /// List tasks in file order
    List {
        /// Status filter: a status name, or "any" to include completed tasks
        #[arg(short, long)]
        status: Option<String>,

        /// Only tasks in this category
        #[arg(short, long)]
        category: Option<String>,

        /// Only children of this task
        #[arg(short, long)]
        parent: Option<u64>,

        /// Title regex (falls back to substring match)
        #[arg(short, long)]
        title: Option<String>,
    },

    /// Show one task, active or completed
    Show {
        /// Task id
        id: u64,
    },

    /// Update fields of an active task
    Update {
        /// Task id
        id: u64,

        /// New title
        #[arg(long)]
        title: Option<String>,

        /// New status
        #[arg(long)]
        status: Option<String>,

        /// New task type
        #[arg(long = "type")]
        task_type: Option<String>,

        /// New description
        #[arg(short, long)]
        description: Option<String>,

        /// New design notes
        #[arg(long)]
        design: Option<String>,

        /// New category
        #[arg(long)]
        category: Option<String>,

        /// New parent id
        #[arg(long, conflicts_with = "no_parent")]
        parent: Option<u64>,

        /// Detach from the current parent
        #[arg(long)]
        no_parent: bool,

        /// Metadata upsert; an empty value removes the key (repeatable)
        #[arg(long = "meta", value_name = "KEY=VALUE")]
        meta: Vec<String>,

        /// Raw JSON object merged as a patch
        #[arg(long)]
        patch: Option<String>,
    },

    /// Delete an active task; its children are detached
    Delete {
        /// Task id
        id: u64,
    },

    /// Finish a task and move it to the completed store
    Complete {
        /// Task id
        id: u64,

        /// Terminal status: closed, done, deleted (defaults to closed)
        #[arg(long)]
        status: Option<String>,

        /// Note appended to the description
        #[arg(short, long)]
        note: Option<String>,
    },

    /// Mark a task in progress and record it as executing here
    Start {
        /// Task or story id
        id: u64,
    },

    /// Append a session event to a story
    Event {
        /// Story id
        story_id: u64,

        /// Event type, e.g. iteration or test_run
        event_type: String,

        /// Event field; values are parsed as JSON when possible (repeatable)
        #[arg(long = "field", value_name = "KEY=VALUE")]
        fields: Vec<String>,
    },

    /// Execution state of this task directory
    #[command(subcommand)]
    State(StateCommands),
}

/// Execution state subcommands
#[derive(Subcommand, Debug)]
pub enum StateCommands {
    /// Print the current execution state
    Show,

    /// Remove the execution state file
    Clear,

    /// Reconcile a previous session's state against the store
    Recover,
}

impl Cli {
    /// Name reported in the JSON envelope, e.g. `add` or `state recover`.
    pub fn command_name(&self) -> &'static str {
        match &self.command {
            Commands::Init => "init",
            Commands::Add { .. } => "add",
            Commands::List { .. } => "list",
            Commands::Show { .. } => "show",
            Commands::Update { .. } => "update",
            Commands::Delete { .. } => "delete",
            Commands::Complete { .. } => "complete",
            Commands::Start { .. } => "start",
            Commands::Event { .. } => "event",
            Commands::State(StateCommands::Show) => "state show",
            Commands::State(StateCommands::Clear) => "state clear",
            Commands::State(StateCommands::Recover) => "state recover",
        }
    }

    /// Execute the CLI command
    pub fn run(self) -> Result<()> {
        let output = OutputOptions {
            json: self.json,
            quiet: self.quiet,
        };
        let root = resolve_root(self.root)?;

        match self.command {
            Commands::Init => init::run(&root, output),
            Commands::Add {
                title,
                parent,
                task_type,
                status,
                category,
                description,
                design,
                meta,
                prepend,
            } => {
                let store = TaskStore::open(&root)?;
                task::add(
                    &store,
                    task::AddOptions {
                        title,
                        parent,
                        task_type,
                        status,
                        category,
                        description,
                        design,
                        meta,
                        prepend,
                    },
                    output,
                )
            }
            Commands::List {
                status,
                category,
                parent,
                title,
            } => {
                let store = TaskStore::open(&root)?;
                task::list(
                    &store,
                    task::ListOptions {
                        status,
                        category,
                        parent,
                        title,
                    },
                    output,
                )
            }
            Commands::Show { id } => task::show(&TaskStore::open(&root)?, id, output),
            Commands::Update {
                id,
                title,
                status,
                task_type,
                description,
                design,
                category,
                parent,
                no_parent,
                meta,
                patch,
            } => {
                let store = TaskStore::open(&root)?;
                task::update(
                    &store,
                    task::UpdateOptions {
                        id,
                        title,
                        status,
                        task_type,
                        description,
                        design,
                        category,
                        parent,
                        no_parent,
                        meta,
                        patch,
                    },
                    output,
                )
            }
            Commands::Delete { id } => task::delete(&TaskStore::open(&root)?, id, output),
            Commands::Complete { id, status, note } => {
                task::complete(&TaskStore::open(&root)?, id, status, note, output)
            }
            Commands::Start { id } => task::start(&TaskStore::open(&root)?, id, output),
            Commands::Event {
                story_id,
                event_type,
                fields,
            } => task::event(&TaskStore::open(&root)?, story_id, event_type, fields, output),
            Commands::State(cmd) => {
                let store = TaskStore::open(&root)?;
                match cmd {
                    StateCommands::Show => state::show(&store, output),
                    StateCommands::Clear => state::clear(&store, output),
                    StateCommands::Recover => state::recover(&store, output),
                }
            }
        }
    }
}

fn resolve_root(root: Option<PathBuf>) -> Result<PathBuf> {
    match root {
        Some(path) => Ok(path),
        None => Ok(std::env::current_dir()?),
    }
}

/// Split `KEY=VALUE` arguments.
pub(crate) fn parse_pairs(raw: &[String]) -> Result<Vec<(String, String)>> {
    raw.iter()
        .map(|pair| {
            let (key, value) = pair.split_once('=').ok_or_else(|| {
                Error::InvalidArgument(format!("expected KEY=VALUE, got '{pair}'"))
            })?;
            let key = key.trim();
            if key.is_empty() {
                return Err(Error::InvalidArgument(format!("empty key in '{pair}'")));
            }
            Ok((key.to_string(), value.to_string()))
        })
        .collect()
}
