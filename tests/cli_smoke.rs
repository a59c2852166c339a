mod support;

use assert_cmd::Command;
use predicates::str::contains;
use serde_json::Value;

use support::TestProject;

fn agent_tasks(project: &TestProject) -> Command {
    let mut cmd = Command::cargo_bin("agent-tasks").expect("binary");
    cmd.env_remove("RUST_LOG");
    cmd.env("AGENT_TASKS_ROOT", project.root());
    cmd
}

fn json_output(project: &TestProject, args: &[&str]) -> Value {
    let output = agent_tasks(project)
        .arg("--json")
        .args(args)
        .output()
        .expect("run agent-tasks");
    serde_json::from_slice(&output.stdout).expect("json envelope")
}

#[test]
fn help_works() {
    Command::cargo_bin("agent-tasks")
        .expect("binary")
        .arg("--help")
        .assert()
        .success()
        .stdout(contains("task store"));
}

#[test]
fn subcommand_help_works() {
    let subcommands = [
        "init", "add", "list", "show", "update", "delete", "complete", "start", "event", "state",
    ];

    for cmd in subcommands {
        Command::cargo_bin("agent-tasks")
            .expect("binary")
            .arg(cmd)
            .arg("--help")
            .assert()
            .success();
    }
}

#[test]
fn init_creates_store_layout() -> Result<(), Box<dyn std::error::Error>> {
    let project = TestProject::new()?;
    agent_tasks(&project)
        .arg("init")
        .assert()
        .success()
        .stdout(contains("initialized task store"));

    let settings = project.settings();
    assert!(project.root().join(".agent-tasks.toml").exists());
    assert!(settings.active_path.exists());
    assert!(settings.completed_path.exists());
    let ignore = std::fs::read_to_string(settings.tasks_dir.join(".gitignore"))?;
    assert!(ignore.contains(".execution_state.json"));
    assert!(ignore.contains(".tasks.lock"));

    agent_tasks(&project)
        .arg("init")
        .assert()
        .success()
        .stdout(contains("nothing to do"));
    Ok(())
}

#[test]
fn add_and_list_emit_envelope() -> Result<(), Box<dyn std::error::Error>> {
    let project = TestProject::new()?;
    let added = json_output(
        &project,
        &["add", "Write lexer", "--category", "simple", "--meta", "branch=feat/lexer"],
    );
    assert_eq!(added["schema_version"], "agent-tasks.v1");
    assert_eq!(added["command"], "add");
    assert_eq!(added["status"], "success");
    assert_eq!(added["data"]["id"], 1);
    assert_eq!(added["data"]["meta"]["branch"], "feat/lexer");

    json_output(&project, &["add", "Other", "--category", "hard"]);

    let listed = json_output(&project, &["list", "--category", "simple"]);
    assert_eq!(listed["data"]["total"], 1);
    assert_eq!(listed["data"]["tasks"][0]["title"], "Write lexer");
    Ok(())
}

#[test]
fn unknown_task_is_user_error() -> Result<(), Box<dyn std::error::Error>> {
    let project = TestProject::new()?;
    agent_tasks(&project).arg("init").assert().success();

    agent_tasks(&project)
        .args(["show", "42"])
        .assert()
        .code(2)
        .stderr(contains("42"));

    let output = agent_tasks(&project)
        .args(["--json", "show", "42"])
        .output()?;
    assert_eq!(output.status.code(), Some(2));
    let envelope: Value = serde_json::from_slice(&output.stdout)?;
    assert_eq!(envelope["status"], "error");
    assert_eq!(envelope["error"]["kind"], "not_found");
    assert_eq!(envelope["error"]["details"]["id"], 42);
    Ok(())
}

#[test]
fn invalid_status_reports_field() -> Result<(), Box<dyn std::error::Error>> {
    let project = TestProject::new()?;
    json_output(&project, &["add", "t"]);

    let output = agent_tasks(&project)
        .args(["--json", "update", "1", "--status", "bogus"])
        .output()?;
    assert_eq!(output.status.code(), Some(2));
    let envelope: Value = serde_json::from_slice(&output.stdout)?;
    assert_eq!(envelope["error"]["details"]["field"], "status");
    assert_eq!(envelope["error"]["details"]["found"], "\"bogus\"");
    Ok(())
}

#[test]
fn story_completion_blocked_by_children() -> Result<(), Box<dyn std::error::Error>> {
    let project = TestProject::new()?;
    json_output(&project, &["add", "Story", "--type", "story"]);
    json_output(&project, &["add", "Child", "--parent", "1"]);

    let output = agent_tasks(&project)
        .args(["--json", "complete", "1"])
        .output()?;
    assert_eq!(output.status.code(), Some(3));
    let envelope: Value = serde_json::from_slice(&output.stdout)?;
    assert_eq!(envelope["error"]["kind"], "blocking_children");
    assert_eq!(envelope["error"]["details"]["children"][0], 2);
    assert_eq!(envelope["next_steps"][0], "agent-tasks complete 2");

    agent_tasks(&project).args(["complete", "2"]).assert().success();
    agent_tasks(&project)
        .args(["complete", "1", "--note", "all merged"])
        .assert()
        .success();
    assert_eq!(project.completed_ids(), vec![2, 1]);
    Ok(())
}

#[test]
fn start_event_and_state_flow() -> Result<(), Box<dyn std::error::Error>> {
    let project = TestProject::new()?;
    json_output(&project, &["add", "Story", "--type", "story"]);
    json_output(&project, &["add", "Child", "--parent", "1"]);

    let started = json_output(&project, &["start", "2"]);
    assert_eq!(started["data"]["task"]["status"], "in_progress");
    assert_eq!(started["data"]["execution"]["story_id"], 1);
    assert_eq!(started["data"]["execution"]["task_id"], 2);

    let event = json_output(
        &project,
        &["event", "1", "test_run", "--field", "passed=12", "--field", "note=green"],
    );
    assert_eq!(event["data"]["session_events"][0]["passed"], 12);
    assert_eq!(event["data"]["session_events"][0]["note"], "green");

    let shown = json_output(&project, &["state", "show"]);
    assert_eq!(shown["command"], "state show");
    assert_eq!(shown["data"]["state"]["task_id"], 2);

    let completed = json_output(&project, &["complete", "2"]);
    assert_eq!(completed["data"]["execution"]["story_id"], 1);
    assert!(completed["data"]["execution"].get("task_id").is_none());

    let recovered = json_output(&project, &["state", "recover"]);
    assert_eq!(recovered["data"]["action"], "resume");
    assert_eq!(recovered["data"]["story"]["id"], 1);

    let cleared = json_output(&project, &["state", "clear"]);
    assert_eq!(cleared["data"]["removed"], true);
    let recovered = json_output(&project, &["state", "recover"]);
    assert_eq!(recovered["data"]["action"], "idle");
    Ok(())
}

#[test]
fn list_any_includes_completed() -> Result<(), Box<dyn std::error::Error>> {
    let project = TestProject::new()?;
    json_output(&project, &["add", "A", "--category", "simple"]);
    json_output(&project, &["add", "B", "--category", "simple"]);
    agent_tasks(&project).args(["complete", "1"]).assert().success();

    let open = json_output(&project, &["list", "--category", "simple"]);
    assert_eq!(open["data"]["total"], 1);

    let any = json_output(&project, &["list", "--category", "simple", "--status", "any"]);
    let ids: Vec<u64> = any["data"]["tasks"]
        .as_array()
        .expect("tasks array")
        .iter()
        .filter_map(|task| task["id"].as_u64())
        .collect();
    assert_eq!(ids, vec![2, 1]);
    Ok(())
}
