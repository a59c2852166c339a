use std::fs;
use std::time::Duration;

use agent_tasks::config::{Config, MalformedPolicy, CONFIG_FILE};

#[test]
fn load_from_root_defaults_on_invalid_config() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join(CONFIG_FILE);
    fs::write(&path, "[store]\ndir = 123").expect("write invalid config");

    let cfg = Config::load_from_root(dir.path());
    assert_eq!(cfg.store.dir, std::path::PathBuf::from(".tasks"));
    assert_eq!(cfg.store.active_file, "tasks.jsonl");
}

#[test]
fn load_from_root_defaults_on_clashing_file_names() {
    let dir = tempfile::tempdir().expect("tempdir");
    let content = r#"
[store]
active_file = "tasks.jsonl"
completed_file = "tasks.jsonl"
"#;
    fs::write(dir.path().join(CONFIG_FILE), content.trim()).expect("write config");

    assert!(Config::load(&dir.path().join(CONFIG_FILE)).is_err());
    let cfg = Config::load_from_root(dir.path());
    assert_eq!(cfg.store.completed_file, "completed.jsonl");
}

#[test]
fn config_overrides_from_toml() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempfile::tempdir()?;
    let toml = r#"
[store]
dir = "/var/agents/queue"
malformed = "skip"

[lock]
poll_interval_ms = 20
timeout_ms = 800
stale_grace_ms = 250
"#;
    fs::write(dir.path().join(CONFIG_FILE), toml)?;

    let config = Config::load_from_root(dir.path());
    assert_eq!(config.store.malformed, MalformedPolicy::Skip);

    let settings = config.resolve(dir.path())?;
    assert_eq!(settings.tasks_dir, std::path::PathBuf::from("/var/agents/queue"));
    assert_eq!(settings.lock.poll_interval, Duration::from_millis(20));
    assert_eq!(settings.lock.timeout, Duration::from_millis(800));
    assert_eq!(settings.lock.stale_grace, Duration::from_millis(250));
    assert_eq!(settings.malformed, MalformedPolicy::Skip);
    Ok(())
}

#[test]
fn saved_default_config_loads_back() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join(CONFIG_FILE);
    Config::default().save(&path)?;

    let loaded = Config::load(&path)?;
    let settings = loaded.resolve(dir.path())?;
    assert_eq!(settings.active_path, dir.path().join(".tasks").join("tasks.jsonl"));
    assert_eq!(settings.state_path, dir.path().join(".tasks").join(".execution_state.json"));
    Ok(())
}
