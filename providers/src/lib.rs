//! Provider transport adapters with unified streaming support.
//!
//! # Architecture
//!
//! - [`send_message`] - entry point that dispatches on [`Provider`]
//! - [`openai`] - Chat Completions, shared by OpenAI and local OpenAI-compatible servers
//! - [`claude`] - Anthropic Messages API
//! - [`gemini`] - Google `streamGenerateContent`
//!
//! All adapters push [`StreamEvent`]s into a [`tokio::sync::mpsc::Sender`].
//! Payload-level problems (an `error` event inside the stream) arrive as
//! `StreamEvent::Error`; failures that prevent streaming at all (non-2xx,
//! unreachable host) are returned as [`ProviderError`].
//!
//! # Wire handling
//!
//! Events are framed on blank lines, `data:` lines are joined, and `[DONE]`
//! ends the stream. A payload that matches no known shape is logged and
//! skipped. End of body counts as completion for protocols without an
//! explicit terminator.

pub mod error;
pub mod sse_types;

use std::fmt;
use std::sync::OnceLock;
use std::time::Duration;

pub(crate) use tether_types::{ApiUsage, ChatTurn, Provider, Role, StreamEvent, StreamFailure};
pub(crate) use tokio::sync::mpsc;

pub use error::ProviderError;
pub use tether_types;

/// Canonical OpenAI Chat Completions endpoint.
pub const OPENAI_CHAT_COMPLETIONS_URL: &str = "https://api.openai.com/v1/chat/completions";
/// Canonical Anthropic Messages API endpoint.
pub const CLAUDE_MESSAGES_API_URL: &str = "https://api.anthropic.com/v1/messages";
/// Canonical Gemini API base URL.
pub const GEMINI_API_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";
/// Default base URL for a local OpenAI-compatible server (LM Studio's default port).
pub const DEFAULT_LOCAL_BASE_URL: &str = "http://localhost:1234/v1";

const CONNECT_TIMEOUT_SECS: u64 = 30;
const DEFAULT_STREAM_IDLE_TIMEOUT_SECS: u64 = 120;
const TCP_KEEPALIVE_SECS: u64 = 60;
const POOL_IDLE_TIMEOUT_SECS: u64 = 90;

const MAX_SSE_BUFFER_BYTES: usize = 4 * 1024 * 1024;
const MAX_ERROR_BODY_BYTES: usize = 32 * 1024;

pub const DEFAULT_MAX_OUTPUT_TOKENS: u32 = 4096;

fn base_client_builder() -> reqwest::ClientBuilder {
    reqwest::Client::builder()
        .connect_timeout(Duration::from_secs(CONNECT_TIMEOUT_SECS))
        .redirect(reqwest::redirect::Policy::none())
        .tcp_keepalive(Some(Duration::from_secs(TCP_KEEPALIVE_SECS)))
        .pool_idle_timeout(Some(Duration::from_secs(POOL_IDLE_TIMEOUT_SECS)))
}

/// HTTPS-only client for cloud providers.
fn https_client() -> Result<&'static reqwest::Client, ProviderError> {
    static CLIENT: OnceLock<Result<reqwest::Client, String>> = OnceLock::new();
    client_from(&CLIENT, || base_client_builder().https_only(true).build())
}

/// Client that also speaks plain HTTP, for local servers and overridden base URLs.
fn plain_client() -> Result<&'static reqwest::Client, ProviderError> {
    static CLIENT: OnceLock<Result<reqwest::Client, String>> = OnceLock::new();
    client_from(&CLIENT, || base_client_builder().build())
}

fn client_from(
    cell: &'static OnceLock<Result<reqwest::Client, String>>,
    build: impl FnOnce() -> Result<reqwest::Client, reqwest::Error>,
) -> Result<&'static reqwest::Client, ProviderError> {
    cell.get_or_init(|| {
        build().map_err(|e| {
            tracing::error!("Failed to build HTTP client: {e}");
            e.to_string()
        })
    })
    .as_ref()
    .map_err(|e| ProviderError::Protocol(format!("HTTP client unavailable: {e}")))
}

/// Pick the client for a URL: cloud HTTPS endpoints never downgrade.
pub(crate) fn client_for(url: &str) -> Result<&'static reqwest::Client, ProviderError> {
    if url.starts_with("https://") {
        https_client()
    } else {
        tracing::debug!(url, "Using plain HTTP client");
        plain_client()
    }
}

fn find_sse_event_boundary(buffer: &[u8]) -> Option<(usize, usize)> {
    let lf = buffer.windows(2).position(|w| w == b"\n\n");
    let crlf = buffer.windows(4).position(|w| w == b"\r\n\r\n");
    match (lf, crlf) {
        (Some(a), Some(b)) => Some(if a <= b { (a, 2) } else { (b, 4) }),
        (Some(a), None) => Some((a, 2)),
        (None, Some(b)) => Some((b, 4)),
        (None, None) => None,
    }
}

fn drain_next_sse_event(buffer: &mut Vec<u8>) -> Option<Vec<u8>> {
    let (pos, delim_len) = find_sse_event_boundary(buffer)?;
    let event = buffer[..pos].to_vec();
    buffer.drain(..pos + delim_len);
    Some(event)
}

/// Join the `data:` lines of one event. `None` when the event has no data.
fn extract_sse_data(event: &str) -> Option<String> {
    let mut data = String::new();
    let mut found = false;

    for line in event.lines() {
        let line = line.strip_suffix('\r').unwrap_or(line);
        if let Some(mut rest) = line.strip_prefix("data:") {
            if let Some(stripped) = rest.strip_prefix(' ') {
                rest = stripped;
            }
            if found {
                data.push('\n');
            }
            data.push_str(rest);
            found = true;
        }
    }

    if found { Some(data) } else { None }
}

#[derive(Debug)]
pub(crate) enum SseParseAction {
    /// Nothing to emit for this payload.
    Continue,
    Emit(Vec<StreamEvent>),
    /// Protocol-level completion (`message_stop`).
    Done,
    Error(StreamFailure),
}

pub(crate) trait SseParser {
    fn parse(&mut self, json: &serde_json::Value) -> SseParseAction;
    fn provider_name(&self) -> &'static str;
}

pub(crate) fn stream_idle_timeout() -> Duration {
    static TIMEOUT: OnceLock<Duration> = OnceLock::new();
    *TIMEOUT.get_or_init(|| {
        let timeout = std::env::var("TETHER_STREAM_IDLE_TIMEOUT_SECS")
            .ok()
            .and_then(|value| value.parse::<u64>().ok())
            .filter(|value| *value > 0)
            .unwrap_or(DEFAULT_STREAM_IDLE_TIMEOUT_SECS);
        Duration::from_secs(timeout)
    })
}

/// Decode a payload into a typed event; a mismatch is logged and skipped.
pub(crate) fn parse_sse_payload<T>(json: &serde_json::Value, provider_name: &'static str) -> Option<T>
where
    T: serde::de::DeserializeOwned,
{
    match serde_json::from_value(json.clone()) {
        Ok(event) => Some(event),
        Err(e) => {
            tracing::debug!(%e, provider = provider_name, "Skipping SSE payload with unknown shape");
            None
        }
    }
}

pub(crate) fn emit_or_continue(events: Vec<StreamEvent>) -> SseParseAction {
    if events.is_empty() {
        SseParseAction::Continue
    } else {
        SseParseAction::Emit(events)
    }
}

/// Drive an SSE body through a provider parser.
///
/// Returns once a terminal event has been sent, the body ends, or the
/// receiver is gone. A closed receiver means the caller stopped listening
/// (cancellation), which is not an error.
pub(crate) async fn process_sse_stream<P: SseParser>(
    response: reqwest::Response,
    parser: &mut P,
    tx: &mpsc::Sender<StreamEvent>,
    idle_timeout: Duration,
) -> Result<(), ProviderError> {
    use futures_util::StreamExt;

    let mut stream = response.bytes_stream();
    let mut buffer: Vec<u8> = Vec::new();

    loop {
        let Ok(next) = tokio::time::timeout(idle_timeout, stream.next()).await else {
            return Err(ProviderError::Protocol(format!(
                "no data received for {}s",
                idle_timeout.as_secs()
            )));
        };

        let Some(chunk) = next else { break };
        buffer.extend_from_slice(&chunk?);

        if buffer.len() > MAX_SSE_BUFFER_BYTES {
            return Err(ProviderError::BufferOverflow {
                limit: MAX_SSE_BUFFER_BYTES,
            });
        }

        while let Some(event) = drain_next_sse_event(&mut buffer) {
            match handle_sse_event(&event, parser, tx).await? {
                EventFlow::Continue => {}
                EventFlow::Finished => return Ok(()),
            }
        }
    }

    // A trailing event without its blank-line terminator still counts.
    if !buffer.is_empty() {
        let rest = std::mem::take(&mut buffer);
        if let EventFlow::Finished = handle_sse_event(&rest, parser, tx).await? {
            return Ok(());
        }
    }

    tracing::debug!(provider = parser.provider_name(), "Stream body ended");
    let _ = tx.send(StreamEvent::Done).await;
    Ok(())
}

enum EventFlow {
    Continue,
    Finished,
}

async fn handle_sse_event<P: SseParser>(
    event: &[u8],
    parser: &mut P,
    tx: &mpsc::Sender<StreamEvent>,
) -> Result<EventFlow, ProviderError> {
    if event.is_empty() {
        return Ok(EventFlow::Continue);
    }
    let event = std::str::from_utf8(event).map_err(|_| ProviderError::InvalidUtf8)?;
    let Some(data) = extract_sse_data(event) else {
        return Ok(EventFlow::Continue);
    };
    if data.trim() == "[DONE]" {
        let _ = tx.send(StreamEvent::Done).await;
        return Ok(EventFlow::Finished);
    }

    let json = match serde_json::from_str::<serde_json::Value>(&data) {
        Ok(json) => json,
        Err(e) => {
            tracing::debug!(
                %e,
                payload_bytes = data.len(),
                provider = parser.provider_name(),
                "Skipping malformed SSE payload"
            );
            return Ok(EventFlow::Continue);
        }
    };

    let events = match parser.parse(&json) {
        SseParseAction::Continue => return Ok(EventFlow::Continue),
        SseParseAction::Emit(events) => events,
        SseParseAction::Done => vec![StreamEvent::Done],
        SseParseAction::Error(failure) => vec![StreamEvent::Error(failure)],
    };
    for event in events {
        let is_terminal = matches!(&event, StreamEvent::Done | StreamEvent::Error(_));
        if tx.send(event).await.is_err() || is_terminal {
            return Ok(EventFlow::Finished);
        }
    }
    Ok(EventFlow::Continue)
}

/// Read at most 32 KiB of an error body.
pub async fn read_capped_error_body(response: reqwest::Response) -> String {
    use futures_util::StreamExt;
    let mut body = Vec::new();
    let mut stream = response.bytes_stream();
    while let Some(chunk) = stream.next().await {
        let Ok(chunk) = chunk else { break };
        body.extend_from_slice(&chunk);
        if body.len() > MAX_ERROR_BODY_BYTES {
            body.truncate(MAX_ERROR_BODY_BYTES);
            let text = String::from_utf8_lossy(&body);
            return format!("{text}...(truncated)");
        }
    }
    String::from_utf8_lossy(&body).into_owned()
}

/// Send a built request and hand a successful response to `parser`.
///
/// Never retried: a failed attempt fails the turn.
pub(crate) async fn send_sse_request<P: SseParser>(
    config: &ApiConfig,
    request: reqwest::RequestBuilder,
    parser: &mut P,
    tx: &mpsc::Sender<StreamEvent>,
) -> Result<(), ProviderError> {
    let response = match request.send().await {
        Ok(response) => response,
        Err(source) if config.provider() == Provider::Local && source.is_connect() => {
            return Err(ProviderError::LocalServerUnreachable {
                base_url: config.local_base_url().to_string(),
                source,
            });
        }
        Err(e) => return Err(ProviderError::Transport(e)),
    };

    let status = response.status();
    if !status.is_success() {
        tracing::warn!(
            provider = config.provider().as_str(),
            status = status.as_u16(),
            "Provider returned an error status"
        );
        let body = read_capped_error_body(response).await;
        return Err(ProviderError::from_status(
            config.provider(),
            config.model(),
            status.as_u16(),
            body,
        ));
    }

    process_sse_stream(response, parser, tx, stream_idle_timeout()).await
}

/// An API key whose `Debug` output never shows the secret.
#[derive(Clone, PartialEq, Eq)]
pub struct ApiKey(String);

impl ApiKey {
    #[must_use]
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    #[must_use]
    pub fn expose_secret(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for ApiKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ApiKey(<redacted>)")
    }
}

/// Provider, model, credentials, and endpoint for one conversation.
#[derive(Debug, Clone)]
pub struct ApiConfig {
    provider: Provider,
    model: String,
    api_key: Option<ApiKey>,
    base_url: Option<String>,
    max_output_tokens: Option<u32>,
}

impl ApiConfig {
    /// Cloud providers require a non-empty key; local servers accept none.
    pub fn new(
        provider: Provider,
        model: impl Into<String>,
        api_key: Option<ApiKey>,
    ) -> Result<Self, ProviderError> {
        let api_key = api_key.filter(|k| !k.expose_secret().trim().is_empty());
        if provider.requires_api_key() && api_key.is_none() {
            return Err(ProviderError::MissingApiKey(provider));
        }
        Ok(Self {
            provider,
            model: model.into(),
            api_key,
            base_url: None,
            max_output_tokens: None,
        })
    }

    /// Override the endpoint base (local server URL, proxies, tests).
    #[must_use]
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = Some(base_url.into());
        self
    }

    #[must_use]
    pub fn with_max_output_tokens(mut self, max_output_tokens: Option<u32>) -> Self {
        self.max_output_tokens = max_output_tokens;
        self
    }

    #[must_use]
    pub fn provider(&self) -> Provider {
        self.provider
    }

    #[must_use]
    pub fn model(&self) -> &str {
        &self.model
    }

    #[must_use]
    pub fn api_key(&self) -> Option<&str> {
        self.api_key.as_ref().map(ApiKey::expose_secret)
    }

    #[must_use]
    pub fn base_url(&self) -> Option<&str> {
        self.base_url.as_deref()
    }

    #[must_use]
    pub fn max_output_tokens(&self) -> Option<u32> {
        self.max_output_tokens
    }

    fn local_base_url(&self) -> &str {
        self.base_url.as_deref().unwrap_or(DEFAULT_LOCAL_BASE_URL)
    }

    /// Full request URL for this provider.
    #[must_use]
    pub fn endpoint(&self) -> String {
        let base = self.base_url.as_deref().map(|b| b.trim_end_matches('/'));
        match self.provider {
            Provider::Local => format!(
                "{}/chat/completions",
                self.local_base_url().trim_end_matches('/')
            ),
            Provider::OpenAI => base.map_or_else(
                || OPENAI_CHAT_COMPLETIONS_URL.to_string(),
                |b| format!("{b}/chat/completions"),
            ),
            Provider::Anthropic => base.map_or_else(
                || CLAUDE_MESSAGES_API_URL.to_string(),
                |b| format!("{b}/v1/messages"),
            ),
            Provider::Google => format!(
                "{}/models/{}:streamGenerateContent?alt=sse",
                base.unwrap_or(GEMINI_API_BASE_URL),
                self.model
            ),
        }
    }
}

pub struct SendMessageRequest<'a> {
    pub config: &'a ApiConfig,
    pub turns: &'a [ChatTurn],
    pub system_prompt: Option<&'a str>,
    pub tx: mpsc::Sender<StreamEvent>,
}

/// Stream one model reply into `request.tx`.
pub async fn send_message(request: SendMessageRequest<'_>) -> Result<(), ProviderError> {
    tracing::debug!(
        provider = request.config.provider().as_str(),
        model = request.config.model(),
        turns = request.turns.len(),
        "Sending message"
    );
    match request.config.provider() {
        Provider::Local | Provider::OpenAI => openai::send_message(&request).await,
        Provider::Anthropic => claude::send_message(&request).await,
        Provider::Google => gemini::send_message(&request).await,
    }
}

/// Chat Completions streaming, for OpenAI and local compatible servers.
pub mod openai;

/// Anthropic Messages API streaming.
pub mod claude;

/// Google Gemini `streamGenerateContent` streaming.
pub mod gemini;
