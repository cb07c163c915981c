//! Rollback and branch against real files.

use std::fs;

use tether_engine::tether_types::{ApprovalDecision, FileSnapshot};
use tether_engine::CheckpointLedger;

use crate::common::{TestSession, auto_decide, call, policy, session, write_call};

#[tokio::test]
async fn rollback_keeps_first_snapshot_of_a_path() {
    let dir = tempfile::tempdir().unwrap();
    let file = dir.path().join("a.txt");
    fs::write(&file, "old").unwrap();
    let mut t = session(dir.path(), policy(false));

    t.session.submit_user_message("set up", Vec::new());
    t.session.execute_tool(write_call(&dir.path().join("x.txt"), "x")).await;
    t.session.execute_tool(write_call(&dir.path().join("y.txt"), "y")).await;
    let anchor = t.session.submit_user_message("change a", Vec::new());
    assert_eq!(anchor, 3);

    t.session.execute_tool(write_call(&file, "newer")).await;
    t.session.execute_tool(write_call(&file, "newest")).await;
    let snapshot = t.session.ledger().current().unwrap().snapshot(&file).unwrap();
    assert_eq!(snapshot.content_before.as_deref(), Some("old"));

    let result = t.session.rollback_to_checkpoint(anchor, false);
    assert!(result.success, "{:?}", result.failed);
    assert_eq!(fs::read_to_string(&file).unwrap(), "old");
    assert!(dir.path().join("x.txt").exists());
    assert_eq!(t.session.turns().len(), anchor + 1);
    assert_eq!(result.turns_removed, 2);
}

#[test]
fn ledger_first_write_wins_without_a_session() {
    let mut ledger = CheckpointLedger::new();
    ledger.begin(3, "edit", std::time::SystemTime::now());
    let path = std::path::PathBuf::from("/a.txt");
    assert!(ledger.record_file_change(FileSnapshot::new(path.clone(), Some("old".into()), false)));
    assert!(!ledger.record_file_change(FileSnapshot::new(path.clone(), Some("newer".into()), false)));

    let plan = ledger.rollback_plan(3).unwrap();
    assert_eq!(plan.snapshots[&path].content_before.as_deref(), Some("old"));
}

#[tokio::test]
async fn rollback_spans_later_checkpoints_and_removes_created_files() {
    let dir = tempfile::tempdir().unwrap();
    let existing = dir.path().join("keep.txt");
    let created = dir.path().join("new.txt");
    fs::write(&existing, "v0").unwrap();
    let mut t = session(dir.path(), policy(false));

    let first = t.session.submit_user_message("one", Vec::new());
    t.session.execute_tool(write_call(&existing, "v1")).await;
    t.session.submit_user_message("two", Vec::new());
    t.session.execute_tool(write_call(&existing, "v2")).await;
    t.session.execute_tool(call("run_command", serde_json::json!({ "command": "ls" }))).await;
    t.session.submit_user_message("three", Vec::new());
    t.session.execute_tool(write_call(&created, "fresh")).await;

    let result = t.session.rollback_to_checkpoint(first, true);
    assert!(result.success);
    assert_eq!(fs::read_to_string(&existing).unwrap(), "v0");
    assert!(!created.exists());
    assert!(t.session.turns().is_empty());
    assert!(t.session.checkpoints().is_empty());
    assert_eq!(result.irreversible_commands, vec!["ls".to_string()]);
}

// Known edge case: earliest original wins across the span even when a file
// was deleted in one checkpoint and recreated in a later one.
#[tokio::test]
async fn delete_then_recreate_restores_earliest_original() {
    let dir = tempfile::tempdir().unwrap();
    let file = dir.path().join("a.txt");
    fs::write(&file, "orig").unwrap();
    let TestSession {
        mut session, events, ..
    } = session(dir.path(), policy(false));
    let _decider = auto_decide(events, session.resolver(), ApprovalDecision::approve);

    let first = session.submit_user_message("delete it", Vec::new());
    let deleted = session
        .execute_tool(call("delete_file", serde_json::json!({ "path": file.to_string_lossy() })))
        .await;
    assert!(!deleted.is_error, "{}", deleted.content);
    assert!(!file.exists());

    let second = session.submit_user_message("recreate it", Vec::new());
    session.execute_tool(write_call(&file, "recreated")).await;
    let snapshot = session.ledger().current().unwrap().snapshot(&file).unwrap();
    assert!(snapshot.was_created);
    assert_eq!(snapshot.content_before, None);

    let mid = session.diff_between(first, Some(second));
    assert_eq!(mid.len(), 1);

    let result = session.rollback_to_checkpoint(first, false);
    assert!(result.success);
    assert_eq!(fs::read_to_string(&file).unwrap(), "orig");
}

#[tokio::test]
async fn rollback_to_later_checkpoint_removes_recreated_file() {
    let dir = tempfile::tempdir().unwrap();
    let file = dir.path().join("a.txt");
    fs::write(&file, "orig").unwrap();
    let TestSession {
        mut session, events, ..
    } = session(dir.path(), policy(false));
    let _decider = auto_decide(events, session.resolver(), ApprovalDecision::approve);

    session.submit_user_message("delete it", Vec::new());
    session
        .execute_tool(call("delete_file", serde_json::json!({ "path": file.to_string_lossy() })))
        .await;
    let second = session.submit_user_message("recreate it", Vec::new());
    session.execute_tool(write_call(&file, "recreated")).await;

    let result = session.rollback_to_checkpoint(second, false);
    assert!(result.success);
    assert!(!file.exists());
    assert_eq!(session.checkpoints().len(), 1);
}

#[tokio::test]
async fn branch_never_touches_files() {
    let dir = tempfile::tempdir().unwrap();
    let file = dir.path().join("a.txt");
    let mut t = session(dir.path(), policy(false));

    let anchor = t.session.submit_user_message("write", Vec::new());
    t.session.execute_tool(write_call(&file, "agent output")).await;
    let before = fs::metadata(&file).unwrap().modified().unwrap();

    let index = t.session.branch_from_checkpoint(anchor, "write it differently").unwrap();
    assert_eq!(index, anchor);
    assert_eq!(fs::read_to_string(&file).unwrap(), "agent output");
    assert_eq!(fs::metadata(&file).unwrap().modified().unwrap(), before);
    assert_eq!(t.session.turns()[anchor].content, "write it differently");
    assert!(t.session.checkpoints().is_empty());
    assert!(t.session.file_change_history().is_empty());
}

#[tokio::test]
async fn unknown_checkpoint_is_a_failed_no_op() {
    let dir = tempfile::tempdir().unwrap();
    let mut t = session(dir.path(), policy(false));
    t.session.submit_user_message("hello", Vec::new());

    let result = t.session.rollback_to_checkpoint(42, false);
    assert!(!result.success);
    assert_eq!(result.turns_removed, 0);
    assert_eq!(t.session.turns().len(), 1);
    assert!(t.session.branch_from_checkpoint(42, "x").is_none());
}
