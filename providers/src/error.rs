//! Provider failures and their user-facing translation.
//!
//! Every error carries a short message for the conversation and, where the
//! server sent one, the diagnostic body for logs and detail views.

use serde_json::Value;
use thiserror::Error;

use tether_types::{Provider, StreamFailure};

#[derive(Debug, Error)]
pub enum ProviderError {
    /// Non-2xx response. `message` is already user-facing.
    #[error("{message}")]
    Http {
        status: u16,
        message: String,
        detail: String,
    },
    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("could not connect to local server at {base_url}")]
    LocalServerUnreachable {
        base_url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("received invalid UTF-8 from the event stream")]
    InvalidUtf8,
    #[error("event stream buffer exceeded {limit} bytes")]
    BufferOverflow { limit: usize },
    #[error("no API key configured for {0}")]
    MissingApiKey(Provider),
    #[error("{0}")]
    Protocol(String),
}

impl ProviderError {
    /// Translate a non-2xx response into a friendly error.
    #[must_use]
    pub fn from_status(provider: Provider, model: &str, status: u16, body: String) -> Self {
        let extracted = extract_error_message(&body);
        let name = provider.display_name();
        let message = if status == 401 || status == 403 || is_auth_error(&body) {
            auth_message(provider)
        } else if status == 429 {
            format!("{name} rate limit reached. Wait a moment and try again.")
        } else if status == 404 {
            format!("Model '{model}' or its endpoint was not found at {name}.")
        } else if (500..600).contains(&status) {
            format!("{name} is unavailable right now (HTTP {status}). Try again shortly.")
        } else {
            let summary = extracted
                .as_deref()
                .map(|m| truncate_with_ellipsis(m, 200))
                .unwrap_or_default();
            if summary.is_empty() {
                format!("{name} request failed (HTTP {status}).")
            } else {
                format!("{name} request failed (HTTP {status}): {summary}")
            }
        };
        Self::Http {
            status,
            message,
            detail: body,
        }
    }

    #[must_use]
    pub fn friendly_message(&self) -> String {
        match self {
            Self::Http { message, .. } => message.clone(),
            Self::Transport(e) if e.is_timeout() => "The request timed out.".to_string(),
            Self::Transport(e) if e.is_connect() => {
                "Could not connect to the provider. Check your network connection.".to_string()
            }
            Self::Transport(_) => "The connection to the provider failed.".to_string(),
            Self::LocalServerUnreachable { base_url, .. } => format!(
                "Could not connect to the local server at {base_url}. Is the local server running?"
            ),
            Self::InvalidUtf8 | Self::BufferOverflow { .. } | Self::Protocol(_) => {
                format!("The provider sent an unreadable response: {self}")
            }
            Self::MissingApiKey(provider) => auth_message(*provider),
        }
    }

    /// Full diagnostic text, when there is more than the friendly message.
    #[must_use]
    pub fn detail(&self) -> Option<String> {
        match self {
            Self::Http { detail, .. } if !detail.trim().is_empty() => Some(detail.clone()),
            Self::Http { .. } | Self::MissingApiKey(_) => None,
            Self::Transport(e) | Self::LocalServerUnreachable { source: e, .. } => {
                Some(error_chain(e))
            }
            other => Some(other.to_string()),
        }
    }

    #[must_use]
    pub fn to_failure(&self) -> StreamFailure {
        let failure = StreamFailure::new(self.friendly_message());
        match self.detail() {
            Some(detail) => failure.with_detail(detail),
            None => failure,
        }
    }
}

fn auth_message(provider: Provider) -> String {
    match provider.env_var() {
        Some(env_var) => format!(
            "{} authentication failed. Set {env_var} or add the key to ~/.tether/config.toml under [api_keys].",
            provider.display_name()
        ),
        None => "The local server rejected the request credentials. Check [local] api_key in ~/.tether/config.toml.".to_string(),
    }
}

fn error_chain(err: &dyn std::error::Error) -> String {
    let mut out = err.to_string();
    let mut source = err.source();
    while let Some(inner) = source {
        out.push_str(": ");
        out.push_str(&inner.to_string());
        source = inner.source();
    }
    out
}

/// Pull `error.message` (or a close variant) out of a JSON error body.
#[must_use]
pub fn extract_error_message(body: &str) -> Option<String> {
    let payload: Value = serde_json::from_str(body.trim()).ok()?;
    payload
        .pointer("/error/message")
        .or_else(|| payload.pointer("/0/error/message"))
        .or_else(|| payload.pointer("/message"))
        .and_then(Value::as_str)
        .map(ToString::to_string)
}

#[must_use]
pub fn is_auth_error(raw: &str) -> bool {
    let lower = raw.to_ascii_lowercase();
    let mentions_key =
        lower.contains("api key") || lower.contains("x-api-key") || lower.contains("authorization");
    let auth_words = lower.contains("invalid")
        || lower.contains("incorrect")
        || lower.contains("missing")
        || lower.contains("unauthorized")
        || lower.contains("authentication");

    lower.contains("invalid_api_key") || (mentions_key && auth_words)
}

fn truncate_with_ellipsis(text: &str, max_chars: usize) -> String {
    let text = text.trim();
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let mut out: String = text.chars().take(max_chars.saturating_sub(3)).collect();
    out.push_str("...");
    out
}
