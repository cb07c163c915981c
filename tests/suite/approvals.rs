//! Approval gating through the full tool pipeline.

use std::fs;

use serde_json::json;
use tether_engine::pipeline::remap_partial_arguments;
use tether_engine::tether_types::{ApprovalDecision, ApprovalPayload};
use tether_engine::{ApprovalPolicy, SessionEvent};

use crate::common::{TestSession, auto_decide, call, policy, session};

fn approvals(events: &[SessionEvent]) -> Vec<ApprovalPayload> {
    events
        .iter()
        .filter_map(|e| match e {
            SessionEvent::ApprovalRequested(pending) => Some(pending.payload.clone()),
            _ => None,
        })
        .collect()
}

#[tokio::test]
async fn forced_delete_is_gated_and_rejection_leaves_file() {
    let dir = tempfile::tempdir().unwrap();
    let file = dir.path().join("precious.txt");
    fs::write(&file, "keep me").unwrap();
    let TestSession {
        mut session, events, ..
    } = session(dir.path(), policy(false));
    let decider = auto_decide(events, session.resolver(), ApprovalDecision::reject);

    session.submit_user_message("clean up", Vec::new());
    let result = session
        .execute_tool(call("delete_file", json!({ "path": file.to_string_lossy() })))
        .await;

    assert!(result.is_error);
    assert_eq!(fs::read_to_string(&file).unwrap(), "keep me");
    assert!(session.ledger().current().unwrap().snapshots.is_empty());
    assert_eq!(session.file_change_history().len(), 1);

    drop(session);
    let seen = decider.await.unwrap();
    assert!(matches!(
        approvals(&seen).as_slice(),
        [ApprovalPayload::FileChange { .. }]
    ));
}

#[tokio::test]
async fn destructive_command_is_gated_and_runs_edited_text() {
    let dir = tempfile::tempdir().unwrap();
    let TestSession {
        mut session, events, ..
    } = session(dir.path(), ApprovalPolicy::default());
    let decider = auto_decide(events, session.resolver(), |id| {
        ApprovalDecision::approve_edited_command(id, "rm -rf /tmp/x/cache")
    });

    session.submit_user_message("tidy", Vec::new());
    let read_only = session.execute_tool(call("run_command", json!({ "command": "ls" }))).await;
    assert!(!read_only.is_error);

    let result = session
        .execute_tool(call("run_command", json!({ "command": "rm -rf /tmp/x" })))
        .await;
    assert!(!result.is_error, "{}", result.content);
    assert_eq!(result.content, "ran: rm -rf /tmp/x/cache");
    assert_eq!(
        session.ledger().current().unwrap().commands,
        vec!["ls".to_string(), "rm -rf /tmp/x/cache".to_string()]
    );

    drop(session);
    let seen = decider.await.unwrap();
    assert_eq!(
        approvals(&seen),
        vec![ApprovalPayload::Command {
            command: "rm -rf /tmp/x".into()
        }]
    );
}

#[tokio::test]
async fn partial_approval_writes_modified_content() {
    let dir = tempfile::tempdir().unwrap();
    let file = dir.path().join("list.txt");
    fs::write(&file, "foo\nbaz\n").unwrap();
    let TestSession {
        mut session, events, ..
    } = session(dir.path(), policy(true));
    let _decider = auto_decide(events, session.resolver(), |id| {
        ApprovalDecision::partial(id, "foo\nbar\n")
    });

    session.submit_user_message("edit", Vec::new());
    let result = session
        .execute_tool(call(
            "edit_file",
            json!({
                "path": file.to_string_lossy(),
                "old_string": "baz",
                "new_string": "qux",
            }),
        ))
        .await;

    assert!(!result.is_error, "{}", result.content);
    assert_eq!(fs::read_to_string(&file).unwrap(), "foo\nbar\n");
    let snapshot = session.ledger().current().unwrap().snapshot(&file).unwrap();
    assert_eq!(snapshot.content_before.as_deref(), Some("foo\nbaz\n"));
}

#[test]
fn remapped_arguments_drop_incremental_edit_fields() {
    let args = json!({
        "path": "a.txt",
        "old_string": "baz",
        "new_string": "qux",
        "replace_all": true,
    });
    let remapped = remap_partial_arguments(args, "foo\nbar\n");
    assert_eq!(remapped, json!({ "path": "a.txt", "content": "foo\nbar\n" }));
}
