use serde_json::{Value, json};

use crate::sse_types::gemini as typed;
use crate::{
    ApiConfig, ApiUsage, ChatTurn, ProviderError, Role, SendMessageRequest, SseParseAction,
    SseParser, StreamEvent, StreamFailure, client_for, emit_or_continue, parse_sse_payload,
    send_sse_request,
};

#[derive(Default)]
struct GeminiParser;

impl SseParser for GeminiParser {
    fn parse(&mut self, json: &Value) -> SseParseAction {
        let Some(response) = parse_sse_payload::<typed::Response>(json, self.provider_name())
        else {
            return SseParseAction::Continue;
        };

        if let Some(error) = response.error {
            let message = match error.code {
                Some(code) => format!("Gemini error {code}: {}", error.message_or_default()),
                None => format!("Gemini error: {}", error.message_or_default()),
            };
            return SseParseAction::Error(StreamFailure::new(message));
        }

        let mut events = Vec::new();
        let text: String = response
            .candidates
            .into_iter()
            .flatten()
            .filter_map(|candidate| candidate.content)
            .filter_map(|content| content.parts)
            .flatten()
            .filter(|part| !part.thought)
            .filter_map(|part| part.text)
            .collect();
        if !text.is_empty() {
            events.push(StreamEvent::TextDelta(text));
        }
        if let Some(usage) = response.usage_metadata {
            events.push(StreamEvent::Usage(ApiUsage::new(
                usage.prompt_token_count,
                usage.candidates_token_count,
            )));
        }
        emit_or_continue(events)
    }

    fn provider_name(&self) -> &'static str {
        "google"
    }
}

pub(crate) fn build_request_body(
    config: &ApiConfig,
    turns: &[ChatTurn],
    system_prompt: Option<&str>,
) -> Value {
    let contents: Vec<Value> = turns
        .iter()
        .filter(|turn| !turn.content.trim().is_empty() || !turn.context.is_empty())
        .map(|turn| {
            let role = match turn.role {
                Role::User => "user",
                Role::Assistant => "model",
            };
            json!({ "role": role, "parts": [{ "text": turn.prompt_text() }] })
        })
        .collect();

    let mut body = json!({ "contents": contents });
    if let Some(system) = system_prompt.filter(|s| !s.trim().is_empty()) {
        body["systemInstruction"] = json!({ "parts": [{ "text": system }] });
    }
    if let Some(max) = config.max_output_tokens() {
        body["generationConfig"] = json!({ "maxOutputTokens": max });
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
        .header("x-goog-api-key", config.api_key().unwrap_or_default())
        .json(&body);

    let mut parser = GeminiParser;
    send_sse_request(config, builder, &mut parser, &request.tx).await
}

#[cfg(test)]
mod tests {
    use std::time::SystemTime;

    use serde_json::json;
    use tether_types::{ApiUsage, ChatTurn, Provider, StreamEvent};
    use tokio::sync::mpsc;
    use wiremock::matchers::{header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::{GeminiParser, build_request_body};
    use crate::{ApiConfig, ApiKey, SendMessageRequest, SseParseAction, SseParser};

    #[test]
    fn parts_are_concatenated_and_thoughts_dropped() {
        let mut parser = GeminiParser;
        let action = parser.parse(&json!({
            "candidates": [{"content": {"parts": [
                {"text": "thinking...", "thought": true},
                {"text": "Hello, "},
                {"text": "world"}
            ]}}]
        }));
        match action {
            SseParseAction::Emit(events) => {
                assert_eq!(events, vec![StreamEvent::TextDelta("Hello, world".into())]);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn assistant_turns_use_model_role() {
        let config =
            ApiConfig::new(Provider::Google, "gemini-2.5-flash", Some(ApiKey::new("g"))).unwrap();
        let t = SystemTime::UNIX_EPOCH;
        let body = build_request_body(
            &config,
            &[ChatTurn::user("q", t), ChatTurn::assistant("a", t)],
            Some("sys"),
        );
        assert_eq!(body["contents"][1]["role"], "model");
        assert_eq!(body["systemInstruction"]["parts"][0]["text"], "sys");
        assert!(body.get("generationConfig").is_none());
    }

    #[tokio::test]
    async fn stream_without_terminator_completes_at_eof() {
        let server = MockServer::start().await;
        let body = concat!(
            "data: {\"candidates\":[{\"content\":{\"parts\":[{\"text\":\"Hi\"}]}}]}\r\n\r\n",
            "data: {\"candidates\":[{\"content\":{\"parts\":[{\"text\":\" there\"}]},\"finishReason\":\"STOP\"}],",
            "\"usageMetadata\":{\"promptTokenCount\":4,\"candidatesTokenCount\":2}}\r\n\r\n",
        );
        Mock::given(method("POST"))
            .and(path("/models/gemini-2.5-flash:streamGenerateContent"))
            .and(query_param("alt", "sse"))
            .and(header("x-goog-api-key", "g"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", "text/event-stream")
                    .set_body_string(body),
            )
            .mount(&server)
            .await;

        let config = ApiConfig::new(Provider::Google, "gemini-2.5-flash", Some(ApiKey::new("g")))
            .unwrap()
            .with_base_url(server.uri());
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
                StreamEvent::TextDelta("Hi".into()),
                StreamEvent::TextDelta(" there".into()),
                StreamEvent::Usage(ApiUsage::new(4, 2)),
                StreamEvent::Done,
            ]
        );
    }
}
