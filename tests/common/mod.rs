//! Shared fixtures for integration tests.

#![allow(dead_code)]

use std::path::Path;
use std::sync::Arc;

use serde_json::{Value, json};
use tether_engine::tether_types::{ApprovalId, Provider, ToolInvocation};
use tether_engine::{
    ApiConfig, ApprovalPolicy, CommandFinished, CommandRequest, EventSink, MemoryBlobStore,
    NoopNotifier, Session, SessionCollaborators, SessionConfig, SessionEvent, TerminalBridge,
    UiPresence,
};
use tokio::sync::mpsc;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

pub struct TestSession {
    pub session: Session,
    pub events: mpsc::UnboundedReceiver<SessionEvent>,
    pub store: MemoryBlobStore,
}

pub fn policy(require_approval: bool) -> ApprovalPolicy {
    ApprovalPolicy {
        require_approval,
        ..ApprovalPolicy::default()
    }
}

/// Session against a local provider at `base_url` with a terminal that
/// answers every command with `echo`-like output and exit code 0.
pub fn session_with(dir: &Path, approval: ApprovalPolicy, base_url: Option<&str>) -> TestSession {
    let mut api = ApiConfig::new(Provider::Local, "test-model", None).unwrap();
    if let Some(url) = base_url {
        api = api.with_base_url(url);
    }
    let config = SessionConfig {
        approval,
        ..SessionConfig::new(api, dir)
    };
    let (events, rx) = EventSink::channel();
    let (bridge, requests) = TerminalBridge::new();
    tokio::spawn(answer_commands(bridge.clone(), requests));
    let store = MemoryBlobStore::new();
    let session = Session::new(
        config,
        SessionCollaborators {
            events,
            terminal: Arc::new(bridge),
            notifier: Arc::new(NoopNotifier),
            presence: UiPresence::default(),
            store: Arc::new(store.clone()),
        },
    );
    TestSession {
        session,
        events: rx,
        store,
    }
}

pub fn session(dir: &Path, approval: ApprovalPolicy) -> TestSession {
    session_with(dir, approval, None)
}

async fn answer_commands(bridge: TerminalBridge, mut requests: mpsc::UnboundedReceiver<CommandRequest>) {
    while let Some(request) = requests.recv().await {
        bridge.publish(CommandFinished {
            output: format!("ran: {}", request.command),
            command: request.command,
            session_id: request.session_id,
            exit_code: Some(0),
        });
    }
}

/// Spawn a task that answers every approval request with `decide`.
pub fn auto_decide<F>(
    mut events: mpsc::UnboundedReceiver<SessionEvent>,
    resolver: tether_engine::ApprovalResolver,
    decide: F,
) -> tokio::task::JoinHandle<Vec<SessionEvent>>
where
    F: Fn(ApprovalId) -> tether_engine::tether_types::ApprovalDecision + Send + 'static,
{
    tokio::spawn(async move {
        let mut seen = Vec::new();
        while let Some(event) = events.recv().await {
            if let SessionEvent::ApprovalRequested(pending) = &event {
                resolver.resolve(decide(pending.id.clone()));
            }
            seen.push(event);
        }
        seen
    })
}

pub fn write_call(path: &Path, content: &str) -> ToolInvocation {
    call("write_file", json!({ "path": path.to_string_lossy(), "content": content }))
}

pub fn call(name: &str, args: Value) -> ToolInvocation {
    ToolInvocation::new(format!("call-{name}"), name, args)
}

/// Mount an OpenAI-compatible streaming reply at `/v1/chat/completions`.
pub async fn mount_chat_stream(server: &MockServer, chunks: &[Value]) {
    let mut body = String::new();
    for chunk in chunks {
        body.push_str(&format!("data: {chunk}\n\n"));
    }
    body.push_str("data: [DONE]\n\n");

    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", "text/event-stream")
                .set_body_string(body),
        )
        .mount(server)
        .await;
}

pub fn text_chunk(text: &str) -> Value {
    json!({ "choices": [{ "delta": { "content": text } }] })
}
