//! Token estimation using tiktoken.
//!
//! Counts come from the `o200k_base` encoding, which matches current OpenAI
//! models. Other providers use proprietary tokenizers, so their estimates are
//! scaled up:
//!
//! - **Anthropic**: `o200k_base` count × 1.10
//! - **Google**: `o200k_base` count × 1.05
//! - **Local / OpenAI**: the raw count
//!
//! When the encoder cannot be loaded the estimate falls back to one token per
//! four characters.

use std::sync::OnceLock;

use tiktoken_rs::{CoreBPE, o200k_base};

use tether_types::{ChatTurn, Provider};

/// Loading the vocabulary is expensive; one encoder serves every counter.
static ENCODER: OnceLock<Option<CoreBPE>> = OnceLock::new();

fn get_encoder() -> Option<&'static CoreBPE> {
    ENCODER.get_or_init(|| o200k_base().ok()).as_ref()
}

/// Role markers and message delimiters.
const MESSAGE_OVERHEAD: u32 = 4;

/// Approximate, model-aware token counter.
#[derive(Clone, Copy)]
pub struct TokenCounter {
    encoder: Option<&'static CoreBPE>,
}

impl std::fmt::Debug for TokenCounter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenCounter")
            .field("encoder", &self.encoder.as_ref().map(|_| "<CoreBPE>"))
            .finish()
    }
}

impl TokenCounter {
    #[must_use]
    pub fn new() -> Self {
        let encoder = get_encoder();
        if encoder.is_none() {
            tracing::error!(
                "Failed to initialize tiktoken o200k_base encoder. Falling back to character estimates."
            );
        }
        Self { encoder }
    }

    /// Counter that never consults the encoder.
    #[must_use]
    pub fn heuristic() -> Self {
        Self { encoder: None }
    }

    /// Raw count with no provider adjustment.
    #[must_use]
    pub fn count_str(&self, text: &str) -> u32 {
        let len = match self.encoder {
            Some(encoder) => encoder.encode_ordinary(text).len(),
            None => text.chars().count().div_ceil(4),
        };
        u32::try_from(len).unwrap_or(u32::MAX)
    }

    /// Estimate for `text` as the given provider would count it.
    #[must_use]
    pub fn estimate(&self, provider: Provider, text: &str) -> u32 {
        let raw = self.count_str(text);
        if self.encoder.is_none() {
            return raw;
        }
        scale(raw, provider_factor(provider))
    }

    /// Estimate for a full prompt: every turn plus per-message overhead.
    #[must_use]
    pub fn estimate_turns(
        &self,
        provider: Provider,
        system_prompt: Option<&str>,
        turns: &[ChatTurn],
    ) -> u32 {
        let mut total = system_prompt.map_or(0, |s| {
            self.estimate(provider, s).saturating_add(MESSAGE_OVERHEAD)
        });
        for turn in turns {
            total = total
                .saturating_add(self.estimate(provider, &turn.prompt_text()))
                .saturating_add(MESSAGE_OVERHEAD);
        }
        total
    }
}

impl Default for TokenCounter {
    fn default() -> Self {
        Self::new()
    }
}

/// Multiplier in hundredths.
fn provider_factor(provider: Provider) -> u64 {
    match provider {
        Provider::Local | Provider::OpenAI => 100,
        Provider::Anthropic => 110,
        Provider::Google => 105,
    }
}

fn scale(count: u32, factor: u64) -> u32 {
    let scaled = (u64::from(count) * factor).div_ceil(100);
    u32::try_from(scaled).unwrap_or(u32::MAX)
}
