use std::path::PathBuf;

use agent_tasks::error::{exit_codes, Error, JsonError};
use serde_json::Value;

#[test]
fn exit_code_user_error() {
    let err = Error::InvalidArgument("bad input".to_string());
    assert_eq!(err.exit_code(), exit_codes::USER_ERROR);
    assert_eq!(Error::TaskNotFound(3).exit_code(), exit_codes::USER_ERROR);
}

#[test]
fn exit_code_blocked() {
    let err = Error::BlockingChildren {
        story_id: 1,
        children: vec![2, 3],
    };
    assert_eq!(err.exit_code(), exit_codes::BLOCKED);
    assert_eq!(err.to_string(), "Story 1 has blocking children: 2, 3");
}

#[test]
fn exit_code_operation_failed() {
    let err = Error::OperationFailed("boom".to_string());
    assert_eq!(err.exit_code(), exit_codes::OPERATION_FAILED);
    assert_eq!(
        Error::CallbackPanicked("boom".to_string()).exit_code(),
        exit_codes::OPERATION_FAILED
    );
}

#[test]
fn details_include_schema_fields() {
    let err = Error::schema("status", "one of open|closed", "\"bogus\"");
    let details = err.details().expect("details");
    assert_eq!(details["field"], Value::String("status".to_string()));
    assert_eq!(details["expected"], Value::String("one of open|closed".to_string()));
    assert_eq!(details["found"], Value::String("\"bogus\"".to_string()));
}

#[test]
fn lock_timeout_names_holder() {
    let err = Error::LockTimeout {
        path: PathBuf::from(".tasks/.tasks.lock"),
        waited_ms: 5000,
        holder: Some("pid 42 since 2024-05-01T10:00:00+00:00".to_string()),
    };
    assert_eq!(err.exit_code(), exit_codes::BLOCKED);
    assert!(err.to_string().contains("pid 42"));
    let details = err.details().expect("details");
    assert_eq!(details["waited_ms"], 5000);
    assert_eq!(details["path"], Value::String(".tasks/.tasks.lock".to_string()));
}

#[test]
fn json_error_includes_details() {
    let err = Error::InvalidConfig("bad config".to_string());
    let json = JsonError::from(&err);
    assert_eq!(json.code, exit_codes::USER_ERROR);
    assert_eq!(json.kind, "invalid_config");
    let details = json.details.expect("details");
    assert_eq!(details["message"], Value::String("bad config".to_string()));
}

#[test]
fn io_errors_have_no_details() {
    let err = Error::from(std::io::Error::new(std::io::ErrorKind::Other, "disk"));
    assert!(err.details().is_none());
    assert_eq!(err.exit_code(), exit_codes::OPERATION_FAILED);
}

#[test]
fn kinds_follow_variants_not_exit_codes() {
    assert_eq!(Error::TaskNotFound(1).kind(), "not_found");
    assert_eq!(Error::schema("id", "integer", "\"x\"").kind(), "schema_invalid");
    let timeout = Error::LockTimeout {
        path: PathBuf::from(".tasks/.tasks.lock"),
        waited_ms: 10,
        holder: None,
    };
    assert_eq!(timeout.kind(), "lock_timeout");
    let blocked = Error::BlockingChildren {
        story_id: 1,
        children: vec![2],
    };
    assert_eq!(blocked.kind(), "blocking_children");
    assert_eq!(timeout.exit_code(), blocked.exit_code());
}
