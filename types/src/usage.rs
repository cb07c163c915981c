use std::time::SystemTime;

use serde::{Deserialize, Serialize};

use crate::provider::Provider;

/// Token counts for one model response.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiUsage {
    pub input_tokens: u32,
    pub output_tokens: u32,
}

impl ApiUsage {
    #[must_use]
    pub fn new(input_tokens: u32, output_tokens: u32) -> Self {
        Self {
            input_tokens,
            output_tokens,
        }
    }

    #[must_use]
    pub fn total(&self) -> u32 {
        self.input_tokens.saturating_add(self.output_tokens)
    }

    #[must_use]
    pub fn is_zero(&self) -> bool {
        self.input_tokens == 0 && self.output_tokens == 0
    }

    /// Folds a later usage report into this one.
    ///
    /// Providers split counts across events (Anthropic reports input at
    /// message start and output at message delta), so each field keeps the
    /// latest non-zero value.
    pub fn merge(&mut self, other: ApiUsage) {
        if other.input_tokens > 0 {
            self.input_tokens = other.input_tokens;
        }
        if other.output_tokens > 0 {
            self.output_tokens = other.output_tokens;
        }
    }
}

/// One recorded usage figure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageEntry {
    pub provider: Provider,
    pub model: String,
    pub usage: ApiUsage,
    /// `true` when the counts came from the local estimator instead of the provider.
    pub is_estimated: bool,
    pub recorded_at: SystemTime,
}
