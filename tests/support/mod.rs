#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};

use agent_tasks::codec;
use agent_tasks::config::{Config, StoreSettings, CONFIG_FILE};
use agent_tasks::store::TaskStore;
use agent_tasks::task::Task;
use tempfile::TempDir;

/// A scratch project root with the default store layout.
pub struct TestProject {
    dir: TempDir,
}

impl TestProject {
    pub fn new() -> std::io::Result<Self> {
        Ok(Self {
            dir: tempfile::tempdir()?,
        })
    }

    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    pub fn tasks_dir(&self) -> PathBuf {
        self.settings().tasks_dir
    }

    pub fn settings(&self) -> StoreSettings {
        Config::load_from_root(self.root())
            .resolve(self.root())
            .expect("resolve settings")
    }

    pub fn store(&self) -> TaskStore {
        TaskStore::new(self.settings())
    }

    pub fn write_config(&self, contents: &str) -> std::io::Result<PathBuf> {
        let path = self.root().join(CONFIG_FILE);
        fs::write(&path, contents)?;
        Ok(path)
    }

    pub fn write_active(&self, contents: &str) -> std::io::Result<PathBuf> {
        let path = self.settings().active_path;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&path, contents)?;
        Ok(path)
    }

    pub fn active(&self) -> Vec<Task> {
        codec::read_records(&self.settings().active_path).expect("read active store")
    }

    pub fn completed(&self) -> Vec<Task> {
        codec::read_records(&self.settings().completed_path).expect("read completed store")
    }

    pub fn active_ids(&self) -> Vec<u64> {
        ids(&self.active())
    }

    pub fn completed_ids(&self) -> Vec<u64> {
        ids(&self.completed())
    }
}

pub fn ids(tasks: &[Task]) -> Vec<u64> {
    tasks.iter().map(|task| task.id).collect()
}

/// One hand-written JSONL line.
pub fn record_line(id: u64, title: &str, extra: &str) -> String {
    let mut line = format!(r#"{{"id":{id},"status":"open","type":"task","title":"{title}""#);
    if !extra.is_empty() {
        line.push(',');
        line.push_str(extra);
    }
    line.push('}');
    line
}
