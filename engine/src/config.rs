//! `~/.tether/config.toml` loading and resolution into runtime settings.
//!
//! ```toml
//! [app]
//! provider = "anthropic"
//! model = "claude-sonnet-4-5"
//!
//! [api_keys]
//! anthropic = "${ANTHROPIC_API_KEY}"
//!
//! [approval]
//! require_approval = true
//! auto_approve_read_only = true
//! timeout_secs = 300
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;
use std::{env, fs};

use serde::Deserialize;
use thiserror::Error;

use tether_providers::{ApiConfig, ApiKey, ProviderError};
use tether_types::Provider;

use crate::approval::ApprovalPolicy;
use crate::command_policy::CommandPolicy;
use crate::streaming::StreamSettings;
use crate::tools::shell::TerminalSettings;

/// Environment variable that overrides the config file location.
pub const CONFIG_PATH_ENV: &str = "TETHER_CONFIG";

pub(crate) const fn default_true() -> bool {
    true
}

#[derive(Debug, Default, Deserialize)]
pub struct TetherConfig {
    pub app: Option<AppConfig>,
    pub api_keys: Option<ApiKeys>,
    pub local: Option<LocalConfig>,
    pub approval: Option<ApprovalConfig>,
    pub terminal: Option<TerminalConfig>,
    pub streaming: Option<StreamingConfig>,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config at {}: {source}", path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse config at {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("invalid provider in [app]: {0}")]
    Provider(#[from] tether_types::ProviderParseError),
    #[error("invalid destructive command pattern: {0}")]
    Pattern(#[from] regex::Error),
}

#[derive(Debug, Default, Deserialize)]
pub struct AppConfig {
    pub provider: Option<String>,
    pub model: Option<String>,
    pub working_dir: Option<String>,
    pub system_prompt: Option<String>,
}

#[derive(Default, Deserialize)]
pub struct ApiKeys {
    pub anthropic: Option<String>,
    pub openai: Option<String>,
    pub google: Option<String>,
}

// Keys must never reach logs.
impl std::fmt::Debug for ApiKeys {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        fn mask(opt: Option<&String>) -> &'static str {
            if opt.is_some() { "[REDACTED]" } else { "None" }
        }
        f.debug_struct("ApiKeys")
            .field("anthropic", &mask(self.anthropic.as_ref()))
            .field("openai", &mask(self.openai.as_ref()))
            .field("google", &mask(self.google.as_ref()))
            .finish()
    }
}

#[derive(Default, Deserialize)]
pub struct LocalConfig {
    pub base_url: Option<String>,
    pub api_key: Option<String>,
}

impl std::fmt::Debug for LocalConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalConfig")
            .field("base_url", &self.base_url)
            .field("api_key", &self.api_key.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}

#[derive(Debug, Deserialize)]
pub struct ApprovalConfig {
    #[serde(default = "default_true")]
    pub require_approval: bool,
    #[serde(default = "default_true")]
    pub auto_approve_read_only: bool,
    /// Replaces the built-in read-only allowlist.
    pub read_only_commands: Option<Vec<String>>,
    /// Replaces the built-in destructive patterns (regex).
    pub destructive_patterns: Option<Vec<String>>,
    pub timeout_secs: Option<u64>,
    pub poll_interval_ms: Option<u64>,
    #[serde(default = "default_true")]
    pub notify_when_unattended: bool,
}

#[derive(Debug, Default, Deserialize)]
pub struct TerminalConfig {
    pub command_timeout_secs: Option<u64>,
    pub max_output_bytes: Option<usize>,
}

#[derive(Debug, Default, Deserialize)]
pub struct StreamingConfig {
    pub throttle_ms: Option<u64>,
    pub max_output_tokens: Option<u32>,
}

/// Expand `${VAR}` references; unknown variables become empty.
pub fn expand_env_vars(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut rest = value;
    while let Some(start) = rest.find("${") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        match after.find('}') {
            Some(end) if end > 0 => {
                out.push_str(&env::var(&after[..end]).unwrap_or_default());
                rest = &after[end + 1..];
            }
            _ => {
                out.push_str(&rest[start..start + 2]);
                rest = after;
            }
        }
    }
    out.push_str(rest);
    out
}

#[must_use]
pub fn config_path() -> Option<PathBuf> {
    if let Some(path) = env::var_os(CONFIG_PATH_ENV).filter(|p| !p.is_empty()) {
        return Some(PathBuf::from(path));
    }
    dirs::home_dir().map(|home| home.join(".tether").join("config.toml"))
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

impl TetherConfig {
    /// Load from [`config_path`]. A missing file yields `Ok(None)`.
    pub fn load() -> Result<Option<Self>, ConfigError> {
        match config_path() {
            Some(path) => Self::load_from(&path),
            None => Ok(None),
        }
    }

    pub fn load_from(path: &Path) -> Result<Option<Self>, ConfigError> {
        if !path.exists() {
            return Ok(None);
        }
        let content = fs::read_to_string(path).map_err(|source| {
            tracing::warn!("Failed to read config at {}: {source}", path.display());
            ConfigError::Read {
                path: path.to_path_buf(),
                source,
            }
        })?;
        Self::parse(&content)
            .map(Some)
            .map_err(|source| {
                tracing::warn!("Failed to parse config at {}: {source}", path.display());
                ConfigError::Parse {
                    path: path.to_path_buf(),
                    source,
                }
            })
    }

    pub fn parse(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    pub fn provider(&self) -> Result<Provider, ConfigError> {
        match self.app.as_ref().and_then(|a| a.provider.as_deref()) {
            Some(raw) => Ok(Provider::parse(raw)?),
            None => Ok(Provider::default()),
        }
    }

    #[must_use]
    pub fn model(&self, provider: Provider) -> String {
        self.app
            .as_ref()
            .and_then(|a| non_empty(a.model.clone()))
            .unwrap_or_else(|| provider.default_model().to_string())
    }

    #[must_use]
    pub fn working_dir(&self) -> Option<PathBuf> {
        self.app
            .as_ref()
            .and_then(|a| non_empty(a.working_dir.clone()))
            .map(|dir| PathBuf::from(expand_env_vars(&dir)))
    }

    #[must_use]
    pub fn system_prompt(&self) -> Option<String> {
        self.app.as_ref().and_then(|a| non_empty(a.system_prompt.clone()))
    }

    /// Key for `provider`: environment first, then the config file.
    #[must_use]
    pub fn api_key(&self, provider: Provider) -> Option<String> {
        let from_env = provider
            .env_var()
            .and_then(|var| non_empty(env::var(var).ok()));
        if from_env.is_some() {
            return from_env;
        }
        let from_file = match provider {
            Provider::Local => self.local.as_ref().and_then(|l| l.api_key.clone()),
            Provider::OpenAI => self.api_keys.as_ref().and_then(|k| k.openai.clone()),
            Provider::Anthropic => self.api_keys.as_ref().and_then(|k| k.anthropic.clone()),
            Provider::Google => self.api_keys.as_ref().and_then(|k| k.google.clone()),
        };
        non_empty(from_file.map(|k| expand_env_vars(&k)))
    }

    /// Provider configuration for a session.
    pub fn api_config(&self, provider: Provider, model: &str) -> Result<ApiConfig, ProviderError> {
        let config = ApiConfig::new(provider, model, self.api_key(provider).map(ApiKey::new))?
            .with_max_output_tokens(self.streaming.as_ref().and_then(|s| s.max_output_tokens));
        let base_url = match provider {
            Provider::Local => self.local.as_ref().and_then(|l| non_empty(l.base_url.clone())),
            _ => None,
        };
        Ok(match base_url {
            Some(url) => config.with_base_url(url),
            None => config,
        })
    }

    pub fn approval_policy(&self) -> Result<ApprovalPolicy, ConfigError> {
        let Some(section) = self.approval.as_ref() else {
            return Ok(ApprovalPolicy::default());
        };
        let defaults = ApprovalPolicy::default();
        let commands = CommandPolicy::from_overrides(
            section.read_only_commands.clone(),
            section.destructive_patterns.clone(),
        )?;
        Ok(ApprovalPolicy {
            require_approval: section.require_approval,
            auto_approve_read_only: section.auto_approve_read_only,
            commands,
            timeout: section
                .timeout_secs
                .filter(|s| *s > 0)
                .map_or(defaults.timeout, Duration::from_secs),
            poll_interval: section
                .poll_interval_ms
                .filter(|ms| *ms > 0)
                .map_or(defaults.poll_interval, Duration::from_millis),
            notify_when_unattended: section.notify_when_unattended,
        })
    }

    #[must_use]
    pub fn stream_settings(&self) -> StreamSettings {
        let defaults = StreamSettings::default();
        let Some(section) = self.streaming.as_ref() else {
            return defaults;
        };
        StreamSettings {
            throttle: section
                .throttle_ms
                .map_or(defaults.throttle, Duration::from_millis),
            ..defaults
        }
    }

    #[must_use]
    pub fn terminal_settings(&self) -> TerminalSettings {
        let defaults = TerminalSettings::default();
        let Some(section) = self.terminal.as_ref() else {
            return defaults;
        };
        TerminalSettings {
            command_timeout: section
                .command_timeout_secs
                .filter(|s| *s > 0)
                .map_or(defaults.command_timeout, Duration::from_secs),
            max_output_bytes: section
                .max_output_bytes
                .filter(|b| *b > 0)
                .unwrap_or(defaults.max_output_bytes),
            ..defaults
        }
    }
}
