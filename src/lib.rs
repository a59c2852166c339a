//! agent-tasks - task store library for parallel coding agents
//!
//! This library provides the core of the agent-tasks CLI: a file-backed
//! task store that many agent sessions can share without losing updates.
//!
//! # Core Concepts
//!
//! - **Active / completed stores**: JSON-lines files; file order is the user's order
//! - **Task index**: in-memory mirror with parent/child adjacency
//! - **Directory lock**: marker file serializing writers across processes
//! - **Execution state**: per-directory record of what is being worked on
//!
//! # Module Organization
//!
//! - `cli`: Command-line interface using clap
//! - `codec`: JSONL record files
//! - `config`: Configuration loading from `.agent-tasks.toml`
//! - `error`: Error types and result aliases
//! - `execution`: Execution state tracker
//! - `id`: Task id allocation
//! - `index`: Task index and queries
//! - `lock`: Directory lock and atomic writes
//! - `output`: Human and JSON output
//! - `store`: Locked operations over the index and execution state
//! - `task`: Task records and patches

pub mod cli;
pub mod codec;
pub mod config;
pub mod error;
pub mod execution;
pub mod id;
pub mod index;
pub mod lock;
pub mod output;
pub mod store;
pub mod task;

pub use error::{Error, Result};
pub use index::{StatusFilter, TaskFilter, TaskIndex};
pub use store::TaskStore;
