use serde_json::{Value, json};

use crate::sse_types::openai as typed;
use crate::{
    ApiConfig, ApiUsage, ChatTurn, ProviderError, SendMessageRequest, SseParseAction, SseParser,
    StreamEvent, StreamFailure, client_for, emit_or_continue, parse_sse_payload, send_sse_request,
};

#[derive(Default)]
struct OpenAIParser;

impl SseParser for OpenAIParser {
    fn parse(&mut self, json: &Value) -> SseParseAction {
        let Some(chunk) = parse_sse_payload::<typed::Chunk>(json, self.provider_name()) else {
            return SseParseAction::Continue;
        };

        if let Some(error) = chunk.error {
            return SseParseAction::Error(StreamFailure::new(if error.message.is_empty() {
                "Stream reported an error".to_string()
            } else {
                error.message
            }));
        }

        let mut events = Vec::new();
        for choice in chunk.choices {
            if let Some(text) = choice
                .delta
                .and_then(|d| d.content)
                .filter(|t| !t.is_empty())
            {
                events.push(StreamEvent::TextDelta(text));
            }
        }
        // With `include_usage`, counts arrive in a final chunk whose `choices` is empty.
        if let Some(usage) = chunk.usage {
            events.push(StreamEvent::Usage(ApiUsage::new(
                usage.prompt_tokens,
                usage.completion_tokens,
            )));
        }
        emit_or_continue(events)
    }

    fn provider_name(&self) -> &'static str {
        "openai"
    }
}

pub(crate) fn build_request_body(
    config: &ApiConfig,
    turns: &[ChatTurn],
    system_prompt: Option<&str>,
) -> Value {
    let mut messages: Vec<Value> = Vec::with_capacity(turns.len() + 1);
    if let Some(system) = system_prompt.filter(|s| !s.trim().is_empty()) {
        messages.push(json!({ "role": "system", "content": system }));
    }
    for turn in turns {
        messages.push(json!({
            "role": turn.role.as_str(),
            "content": turn.prompt_text(),
        }));
    }

    let mut body = json!({
        "model": config.model(),
        "messages": messages,
        "stream": true,
        "stream_options": { "include_usage": true },
    });
    if let Some(max) = config.max_output_tokens() {
        body["max_tokens"] = json!(max);
    }
    body
}

pub async fn send_message(request: &SendMessageRequest<'_>) -> Result<(), ProviderError> {
    let config = request.config;
    let url = config.endpoint();
    let body = build_request_body(config, request.turns, request.system_prompt);

    let mut builder = client_for(&url)?
        .post(&url)
        .header("content-type", "application/json")
        .json(&body);
    if let Some(key) = config.api_key() {
        builder = builder.header("Authorization", format!("Bearer {key}"));
    }

    let mut parser = OpenAIParser;
    send_sse_request(config, builder, &mut parser, &request.tx).await
}
