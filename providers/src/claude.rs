use serde_json::{Value, json};

use crate::sse_types::claude as typed;
use crate::{
    ApiConfig, ApiUsage, ChatTurn, DEFAULT_MAX_OUTPUT_TOKENS, ProviderError, SendMessageRequest,
    SseParseAction, SseParser, StreamEvent, StreamFailure, client_for, emit_or_continue,
    parse_sse_payload, send_sse_request,
};

const ANTHROPIC_VERSION: &str = "2023-06-01";

#[derive(Default)]
struct ClaudeParser;

impl SseParser for ClaudeParser {
    fn parse(&mut self, json: &Value) -> SseParseAction {
        let Some(event) = parse_sse_payload::<typed::Event>(json, self.provider_name()) else {
            return SseParseAction::Continue;
        };

        match event {
            typed::Event::MessageStart { message } => {
                let input = message
                    .usage
                    .map_or(0, |usage| usage.total_input_tokens());
                emit_or_continue(if input > 0 {
                    vec![StreamEvent::Usage(ApiUsage::new(input, 0))]
                } else {
                    Vec::new()
                })
            }
            typed::Event::ContentBlockDelta {
                delta: typed::Delta::TextDelta { text },
            } if !text.is_empty() => SseParseAction::Emit(vec![StreamEvent::TextDelta(text)]),
            typed::Event::MessageDelta { usage: Some(usage) } if usage.output_tokens > 0 => {
                SseParseAction::Emit(vec![StreamEvent::Usage(ApiUsage::new(
                    0,
                    usage.output_tokens,
                ))])
            }
            typed::Event::MessageStop => SseParseAction::Done,
            typed::Event::Error { error } => {
                let message = if error.message.is_empty() {
                    error.error_type
                } else {
                    error.message
                };
                SseParseAction::Error(StreamFailure::new(format!("Anthropic stream error: {message}")))
            }
            _ => SseParseAction::Continue,
        }
    }

    fn provider_name(&self) -> &'static str {
        "anthropic"
    }
}

/// Anthropic rejects consecutive turns with the same role, so they are merged.
pub(crate) fn build_request_body(
    config: &ApiConfig,
    turns: &[ChatTurn],
    system_prompt: Option<&str>,
) -> Value {
    let mut messages: Vec<(&'static str, String)> = Vec::with_capacity(turns.len());
    for turn in turns {
        let text = turn.prompt_text();
        if text.trim().is_empty() {
            continue;
        }
        let role = turn.role.as_str();
        match messages.last_mut() {
            Some((last_role, content)) if *last_role == role => {
                content.push_str("\n\n");
                content.push_str(&text);
            }
            _ => messages.push((role, text)),
        }
    }

    let messages: Vec<Value> = messages
        .into_iter()
        .map(|(role, content)| json!({ "role": role, "content": content }))
        .collect();

    let mut body = json!({
        "model": config.model(),
        "max_tokens": config.max_output_tokens().unwrap_or(DEFAULT_MAX_OUTPUT_TOKENS),
        "stream": true,
        "messages": messages,
    });
    if let Some(system) = system_prompt.filter(|s| !s.trim().is_empty()) {
        body["system"] = json!(system);
    }
    body
}

pub async fn send_message(request: &SendMessageRequest<'_>) -> Result<(), ProviderError> {
    let config = request.config;
    let url = config.endpoint();
    let body = build_request_body(config, request.turns, request.system_prompt);

    let builder = client_for(&url)?
        .post(&url)
        .header("content-type", "application/json")
        .header("anthropic-version", ANTHROPIC_VERSION)
        .header("x-api-key", config.api_key().unwrap_or_default())
        .json(&body);

    let mut parser = ClaudeParser;
    send_sse_request(config, builder, &mut parser, &request.tx).await
}

#[cfg(test)]
mod tests {
    use std::time::SystemTime;

    use serde_json::json;
    use tether_types::{ApiUsage, ChatTurn, Provider, StreamEvent};
    use tokio::sync::mpsc;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::build_request_body;
    use crate::{ApiConfig, ApiKey, SendMessageRequest};

    fn config(base: Option<String>) -> ApiConfig {
        let config =
            ApiConfig::new(Provider::Anthropic, "claude-sonnet-4-5", Some(ApiKey::new("ak")))
                .unwrap();
        match base {
            Some(base) => config.with_base_url(base),
            None => config,
        }
    }

    #[test]
    fn body_merges_same_role_turns_and_lifts_system() {
        let t = SystemTime::UNIX_EPOCH;
        let turns = vec![
            ChatTurn::user("one", t),
            ChatTurn::user("two", t),
            ChatTurn::assistant("ok", t),
        ];
        let body = build_request_body(&config(None), &turns, Some("sys"));
        assert_eq!(body["system"], "sys");
        assert_eq!(body["max_tokens"], 4096);
        assert_eq!(
            body["messages"],
            json!([
                {"role": "user", "content": "one\n\ntwo"},
                {"role": "assistant", "content": "ok"},
            ])
        );
    }

    #[tokio::test]
    async fn stream_splits_usage_across_events() {
        let server = MockServer::start().await;
        let body = concat!(
            "event: message_start\n",
            "data: {\"type\":\"message_start\",\"message\":{\"usage\":{\"input_tokens\":21}}}\n\n",
            "event: ping\n",
            "data: {\"type\":\"ping\"}\n\n",
            "event: content_block_delta\n",
            "data: {\"type\":\"content_block_delta\",\"index\":0,\"delta\":{\"type\":\"text_delta\",\"text\":\"Hi\"}}\n\n",
            "event: message_delta\n",
            "data: {\"type\":\"message_delta\",\"delta\":{\"stop_reason\":\"end_turn\"},\"usage\":{\"output_tokens\":7}}\n\n",
            "event: message_stop\n",
            "data: {\"type\":\"message_stop\"}\n\n",
        );
        Mock::given(method("POST"))
            .and(path("/v1/messages"))
            .and(header("x-api-key", "ak"))
            .and(header("anthropic-version", "2023-06-01"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", "text/event-stream")
                    .set_body_string(body),
            )
            .mount(&server)
            .await;

        let config = config(Some(server.uri()));
        let turns = vec![ChatTurn::user("hello", SystemTime::UNIX_EPOCH)];
        let (tx, mut rx) = mpsc::channel(16);
        crate::send_message(SendMessageRequest {
            config: &config,
            turns: &turns,
            system_prompt: None,
            tx,
        })
        .await
        .unwrap();

        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        assert_eq!(
            events,
            vec![
                StreamEvent::Usage(ApiUsage::new(21, 0)),
                StreamEvent::TextDelta("Hi".into()),
                StreamEvent::Usage(ApiUsage::new(0, 7)),
                StreamEvent::Done,
            ]
        );
    }

    #[tokio::test]
    async fn error_event_terminates_stream() {
        let server = MockServer::start().await;
        let body = concat!(
            "data: {\"type\":\"content_block_delta\",\"index\":0,\"delta\":{\"type\":\"text_delta\",\"text\":\"par\"}}\n\n",
            "data: {\"type\":\"error\",\"error\":{\"type\":\"overloaded_error\",\"message\":\"Overloaded\"}}\n\n",
            "data: {\"type\":\"content_block_delta\",\"index\":0,\"delta\":{\"type\":\"text_delta\",\"text\":\"never\"}}\n\n",
        );
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_string(body))
            .mount(&server)
            .await;

        let config = config(Some(server.uri()));
        let (tx, mut rx) = mpsc::channel(16);
        crate::send_message(SendMessageRequest {
            config: &config,
            turns: &[],
            system_prompt: None,
            tx,
        })
        .await
        .unwrap();

        assert_eq!(rx.try_recv().unwrap(), StreamEvent::TextDelta("par".into()));
        match rx.try_recv().unwrap() {
            StreamEvent::Error(failure) => assert!(failure.message.contains("Overloaded")),
            other => panic!("expected error, got {other:?}"),
        }
        assert!(rx.try_recv().is_err());
    }
}
