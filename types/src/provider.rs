//! Provider identity.
//!
//! Model catalogs are a configuration concern; a model is carried as a plain
//! string alongside the provider that serves it.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Backend that serves a conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    /// Generic OpenAI-compatible server running on the user's machine.
    #[default]
    Local,
    OpenAI,
    Anthropic,
    Google,
}

const PROVIDER_PARSE_VALUES: &[&str] = &[
    "local",
    "lmstudio",
    "ollama",
    "openai",
    "gpt",
    "anthropic",
    "claude",
    "google",
    "gemini",
];

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid provider '{raw}'; expected one of: {expected:?}")]
pub struct ProviderParseError {
    raw: String,
    expected: &'static [&'static str],
}

impl Provider {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Provider::Local => "local",
            Provider::OpenAI => "openai",
            Provider::Anthropic => "anthropic",
            Provider::Google => "google",
        }
    }

    #[must_use]
    pub fn display_name(&self) -> &'static str {
        match self {
            Provider::Local => "Local server",
            Provider::OpenAI => "OpenAI",
            Provider::Anthropic => "Anthropic",
            Provider::Google => "Google",
        }
    }

    /// Environment variable consulted for the API key. Local servers need none.
    #[must_use]
    pub fn env_var(&self) -> Option<&'static str> {
        match self {
            Provider::Local => None,
            Provider::OpenAI => Some("OPENAI_API_KEY"),
            Provider::Anthropic => Some("ANTHROPIC_API_KEY"),
            Provider::Google => Some("GEMINI_API_KEY"),
        }
    }

    #[must_use]
    pub fn requires_api_key(&self) -> bool {
        self.env_var().is_some()
    }

    #[must_use]
    pub fn default_model(&self) -> &'static str {
        match self {
            Provider::Local => "local-model",
            Provider::OpenAI => "gpt-4o",
            Provider::Anthropic => "claude-sonnet-4-5",
            Provider::Google => "gemini-2.5-flash",
        }
    }

    pub fn parse(s: &str) -> Result<Self, ProviderParseError> {
        match s.trim().to_ascii_lowercase().as_str() {
            "local" | "lmstudio" | "ollama" => Ok(Provider::Local),
            "openai" | "gpt" => Ok(Provider::OpenAI),
            "anthropic" | "claude" => Ok(Provider::Anthropic),
            "google" | "gemini" => Ok(Provider::Google),
            _ => Err(ProviderParseError {
                raw: s.trim().to_string(),
                expected: PROVIDER_PARSE_VALUES,
            }),
        }
    }

    #[must_use]
    pub fn all() -> &'static [Provider] {
        &[
            Provider::Local,
            Provider::OpenAI,
            Provider::Anthropic,
            Provider::Google,
        ]
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.display_name())
    }
}
