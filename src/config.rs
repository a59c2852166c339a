//! Configuration loading and management
//!
//! Handles parsing of `.agent-tasks.toml` configuration files and resolving
//! them into [`StoreSettings`] for a project root.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Name of the configuration file at the project root
pub const CONFIG_FILE: &str = ".agent-tasks.toml";

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Task store layout
    #[serde(default)]
    pub store: StoreConfig,

    /// Directory lock tuning
    #[serde(default)]
    pub lock: LockConfig,
}

/// Task store layout configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Task directory, relative to the project root unless absolute
    #[serde(default = "default_store_dir")]
    pub dir: PathBuf,

    /// File holding not-yet-completed tasks
    #[serde(default = "default_active_file")]
    pub active_file: String,

    /// File holding archived tasks
    #[serde(default = "default_completed_file")]
    pub completed_file: String,

    /// Per-directory execution state record
    #[serde(default = "default_state_file")]
    pub state_file: String,

    /// Lock marker created while a writer holds the store
    #[serde(default = "default_lock_file")]
    pub lock_file: String,

    /// What to do with unparseable lines when loading the task index
    #[serde(default)]
    pub malformed: MalformedPolicy,
}

/// Handling of unparseable lines in store files
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MalformedPolicy {
    /// Abort the load with `MalformedRecord`
    #[default]
    Fail,
    /// Drop the line and log a warning
    Skip,
}

fn default_store_dir() -> PathBuf {
    PathBuf::from(".tasks")
}

fn default_active_file() -> String {
    "tasks.jsonl".to_string()
}

fn default_completed_file() -> String {
    "completed.jsonl".to_string()
}

fn default_state_file() -> String {
    ".execution_state.json".to_string()
}

fn default_lock_file() -> String {
    ".tasks.lock".to_string()
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            dir: default_store_dir(),
            active_file: default_active_file(),
            completed_file: default_completed_file(),
            state_file: default_state_file(),
            lock_file: default_lock_file(),
            malformed: MalformedPolicy::default(),
        }
    }
}

/// Directory lock configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockConfig {
    /// Sleep between acquisition attempts
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Give up after this long
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    /// Minimum marker age before an unheld marker counts as stale
    #[serde(default = "default_stale_grace_ms")]
    pub stale_grace_ms: u64,
}

fn default_poll_interval_ms() -> u64 {
    crate::lock::DEFAULT_POLL_INTERVAL_MS
}

fn default_timeout_ms() -> u64 {
    crate::lock::DEFAULT_LOCK_TIMEOUT_MS
}

/// Shortest stale grace accepted from config; a marker younger than this is
/// never treated as abandoned.
pub const MIN_STALE_GRACE_MS: u64 = 100;

fn default_stale_grace_ms() -> u64 {
    crate::lock::DEFAULT_STALE_GRACE_MS
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
            timeout_ms: default_timeout_ms(),
            stale_grace_ms: default_stale_grace_ms(),
        }
    }
}

impl LockConfig {
    pub fn options(&self) -> crate::lock::LockOptions {
        crate::lock::LockOptions {
            poll_interval: Duration::from_millis(self.poll_interval_ms),
            timeout: Duration::from_millis(self.timeout_ms),
            stale_grace: Duration::from_millis(self.stale_grace_ms),
        }
    }

    fn validate(&self) -> Result<()> {
        if self.poll_interval_ms == 0 {
            return Err(Error::InvalidConfig(
                "lock.poll_interval_ms must be > 0".to_string(),
            ));
        }
        if self.stale_grace_ms < MIN_STALE_GRACE_MS {
            return Err(Error::InvalidConfig(format!(
                "lock.stale_grace_ms ({}) must be >= {MIN_STALE_GRACE_MS}",
                self.stale_grace_ms
            )));
        }
        if self.timeout_ms < self.poll_interval_ms {
            return Err(Error::InvalidConfig(format!(
                "lock.timeout_ms ({}) must be >= lock.poll_interval_ms ({})",
                self.timeout_ms, self.poll_interval_ms
            )));
        }
        Ok(())
    }
}

impl StoreConfig {
    fn validate(&self) -> Result<()> {
        if self.dir.as_os_str().is_empty() {
            return Err(Error::InvalidConfig("store.dir cannot be empty".to_string()));
        }

        let names = [
            ("store.active_file", &self.active_file),
            ("store.completed_file", &self.completed_file),
            ("store.state_file", &self.state_file),
            ("store.lock_file", &self.lock_file),
        ];

        let mut seen = std::collections::HashSet::new();
        for (field, name) in names {
            validate_file_name(name, field)?;
            if !seen.insert(name.as_str()) {
                return Err(Error::InvalidConfig(format!(
                    "{field}: '{name}' is already used by another store file"
                )));
            }
        }
        Ok(())
    }
}

fn validate_file_name(name: &str, field: &str) -> Result<()> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Err(Error::InvalidConfig(format!("{field} cannot be empty")));
    }
    if trimmed != name {
        return Err(Error::InvalidConfig(format!(
            "{field}: '{name}' has surrounding whitespace"
        )));
    }
    if name.contains('/') || name.contains('\\') || name == "." || name == ".." {
        return Err(Error::InvalidConfig(format!(
            "{field}: '{name}' must be a plain file name"
        )));
    }
    Ok(())
}

impl Config {
    /// Load configuration from a `.agent-tasks.toml` file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from the project root, or return defaults
    pub fn load_from_root(root: &Path) -> Self {
        let config_path = root.join(CONFIG_FILE);
        if !config_path.exists() {
            return Self::default();
        }
        match Self::load(&config_path) {
            Ok(config) => config,
            Err(err) => {
                tracing::warn!(path = %config_path.display(), error = %err, "ignoring invalid config");
                Self::default()
            }
        }
    }

    /// Save configuration to a file
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Resolve paths against `root` and produce typed settings.
    pub fn resolve(&self, root: &Path) -> Result<StoreSettings> {
        self.validate()?;
        let tasks_dir = if self.store.dir.is_absolute() {
            self.store.dir.clone()
        } else {
            root.join(&self.store.dir)
        };
        Ok(StoreSettings {
            active_path: tasks_dir.join(&self.store.active_file),
            completed_path: tasks_dir.join(&self.store.completed_file),
            state_path: tasks_dir.join(&self.store.state_file),
            lock_path: tasks_dir.join(&self.store.lock_file),
            tasks_dir,
            malformed: self.store.malformed,
            lock: self.lock.options(),
        })
    }

    fn validate(&self) -> Result<()> {
        self.store.validate()?;
        self.lock.validate()?;
        Ok(())
    }
}

/// Fully resolved store settings. Built once through [`Config::resolve`].
#[derive(Debug, Clone)]
pub struct StoreSettings {
    pub tasks_dir: PathBuf,
    pub active_path: PathBuf,
    pub completed_path: PathBuf,
    pub state_path: PathBuf,
    pub lock_path: PathBuf,
    pub malformed: MalformedPolicy,
    pub lock: crate::lock::LockOptions,
}

impl StoreSettings {
    /// Default layout rooted at `tasks_dir` itself.
    pub fn for_dir(tasks_dir: impl Into<PathBuf>) -> Self {
        let mut config = Config::default();
        config.store.dir = tasks_dir.into();
        let store = &config.store;
        let tasks_dir = store.dir.clone();
        Self {
            active_path: tasks_dir.join(&store.active_file),
            completed_path: tasks_dir.join(&store.completed_file),
            state_path: tasks_dir.join(&store.state_file),
            lock_path: tasks_dir.join(&store.lock_file),
            tasks_dir,
            malformed: store.malformed,
            lock: config.lock.options(),
        }
    }

    pub fn with_lock_options(mut self, lock: crate::lock::LockOptions) -> Self {
        self.lock = lock;
        self
    }
}
