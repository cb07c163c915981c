//! Provider streaming into session turns via a mock OpenAI-compatible server.

use serde_json::json;
use tether_engine::tether_types::{AgentEventKind, ApiUsage, Role};
use tether_engine::StreamError;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use crate::common::{mount_chat_stream, policy, session_with, text_chunk};

fn base_url(server: &MockServer) -> String {
    format!("{}/v1", server.uri())
}

#[tokio::test]
async fn usage_in_final_event_is_authoritative() {
    let server = MockServer::start().await;
    mount_chat_stream(
        &server,
        &[
            text_chunk("Hel"),
            text_chunk("lo, "),
            text_chunk("world"),
            json!({ "choices": [], "usage": { "prompt_tokens": 12, "completion_tokens": 34 } }),
        ],
    )
    .await;
    let dir = tempfile::tempdir().unwrap();
    let mut t = session_with(dir.path(), policy(false), Some(&base_url(&server)));

    t.session.submit_user_message("greet me", Vec::new());
    let outcome = t.session.stream_reply().await.unwrap();

    assert_eq!(outcome.text, "Hello, world");
    assert!(!outcome.cancelled);
    assert!(!outcome.usage_estimated);
    assert_eq!(outcome.usage, ApiUsage::new(12, 34));

    let reply = &t.session.turns()[1];
    assert_eq!(reply.role, Role::Assistant);
    assert_eq!(reply.content, "Hello, world");

    let entry = t.session.usage().last().unwrap();
    assert!(!entry.is_estimated);
    assert_eq!(entry.usage, ApiUsage::new(12, 34));
}

#[tokio::test]
async fn missing_usage_is_estimated() {
    let server = MockServer::start().await;
    mount_chat_stream(&server, &[text_chunk("a short answer")]).await;
    let dir = tempfile::tempdir().unwrap();
    let mut t = session_with(dir.path(), policy(false), Some(&base_url(&server)));

    t.session.submit_user_message("question", Vec::new());
    let outcome = t.session.stream_reply().await.unwrap();

    assert!(outcome.usage_estimated);
    assert!(outcome.usage.output_tokens > 0);
    assert!(t.session.usage().has_estimates());
}

#[tokio::test]
async fn http_failure_marks_turn_with_error_event() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(500).set_body_string(
            r#"{"error":{"message":"backend exploded"}}"#,
        ))
        .mount(&server)
        .await;
    let dir = tempfile::tempdir().unwrap();
    let mut t = session_with(dir.path(), policy(false), Some(&base_url(&server)));

    t.session.submit_user_message("question", Vec::new());
    let err = t.session.stream_reply().await.unwrap_err();

    assert!(matches!(err, StreamError::Provider { .. }));
    assert_eq!(err.partial_text(), "");
    let event = t.session.turns()[1].event.as_ref().unwrap();
    assert_eq!(event.kind, AgentEventKind::Error);
    assert!(t.session.usage().entries().is_empty());
}

#[tokio::test]
async fn cancelled_stream_keeps_partial_text() {
    let server = MockServer::start().await;
    mount_chat_stream(&server, &[text_chunk("never seen")]).await;
    let dir = tempfile::tempdir().unwrap();
    let mut t = session_with(dir.path(), policy(false), Some(&base_url(&server)));

    t.session.submit_user_message("question", Vec::new());
    t.session.cancel_flag().cancel();
    let outcome = t.session.stream_reply().await.unwrap();

    assert!(outcome.cancelled);
    assert_eq!(t.session.turns()[1].content, outcome.text);
}
