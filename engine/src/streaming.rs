//! Provider stream normalization into an assistant turn.
//!
//! Deltas are accumulated and pushed to the target at most once per throttle
//! interval; the complete text is always written once more when the stream
//! ends, whether it finished, failed or was cancelled.

use std::time::Duration;

use thiserror::Error;
use tokio::sync::mpsc;
use tokio::time::Instant;

use tether_context::TokenCounter;
use tether_types::{ApiUsage, Provider, StreamEvent, StreamFailure};

use crate::approval::DEFAULT_POLL_INTERVAL;
use crate::cancel::CancelFlag;

pub const DEFAULT_STREAM_THROTTLE: Duration = Duration::from_millis(50);

/// Capacity of the provider-to-normalizer channel.
pub(crate) const STREAM_EVENT_CHANNEL_CAPACITY: usize = 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamSettings {
    pub throttle: Duration,
    pub cancel_poll: Duration,
}

impl Default for StreamSettings {
    fn default() -> Self {
        Self {
            throttle: DEFAULT_STREAM_THROTTLE,
            cancel_poll: DEFAULT_POLL_INTERVAL,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamOutcome {
    pub text: String,
    pub usage: ApiUsage,
    /// `usage` came from the local estimator rather than the provider.
    pub usage_estimated: bool,
    pub cancelled: bool,
}

#[derive(Debug, Error)]
pub enum StreamError {
    #[error("{}", failure.message)]
    Provider {
        failure: StreamFailure,
        partial: String,
    },
    #[error("provider stream ended without completing")]
    ChannelClosed { partial: String },
    #[error("assistant turn {0} no longer exists")]
    TargetTurnMissing(usize),
}

impl StreamError {
    /// Text received before the stream broke.
    #[must_use]
    pub fn partial_text(&self) -> &str {
        match self {
            Self::Provider { partial, .. } | Self::ChannelClosed { partial } => partial,
            Self::TargetTurnMissing(_) => "",
        }
    }
}

pub struct StreamNormalizer {
    provider: Provider,
    settings: StreamSettings,
    cancel: CancelFlag,
    counter: TokenCounter,
}

async fn sleep_until_opt(deadline: Option<Instant>) {
    match deadline {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}

impl StreamNormalizer {
    #[must_use]
    pub fn new(
        provider: Provider,
        settings: StreamSettings,
        cancel: CancelFlag,
        counter: TokenCounter,
    ) -> Self {
        Self {
            provider,
            settings,
            cancel,
            counter,
        }
    }

    /// Drain `rx` into `on_update`.
    ///
    /// `prompt_tokens` is the caller's estimate for the request, used only
    /// when the provider reports no usage.
    pub async fn run<F>(
        &self,
        mut rx: mpsc::Receiver<StreamEvent>,
        prompt_tokens: u32,
        mut on_update: F,
    ) -> Result<StreamOutcome, StreamError>
    where
        F: FnMut(&str),
    {
        let mut text = String::new();
        let mut reported = ApiUsage::default();
        let mut last_flush = Instant::now();
        let mut dirty = false;
        let mut cancelled = false;

        loop {
            if self.cancel.is_cancelled() {
                cancelled = true;
                break;
            }
            let flush_at = dirty.then(|| last_flush + self.settings.throttle);

            tokio::select! {
                () = self.cancel.cancelled(self.settings.cancel_poll) => {
                    cancelled = true;
                    break;
                }
                () = sleep_until_opt(flush_at) => {
                    on_update(&text);
                    last_flush = Instant::now();
                    dirty = false;
                }
                event = rx.recv() => match event {
                    Some(StreamEvent::TextDelta(delta)) => {
                        text.push_str(&delta);
                        if last_flush.elapsed() >= self.settings.throttle {
                            on_update(&text);
                            last_flush = Instant::now();
                            dirty = false;
                        } else {
                            dirty = true;
                        }
                    }
                    Some(StreamEvent::Usage(usage)) => reported.merge(usage),
                    Some(StreamEvent::Done) => break,
                    Some(StreamEvent::Error(failure)) => {
                        tracing::warn!(provider = self.provider.as_str(), "Stream failed: {}", failure.message);
                        on_update(&text);
                        return Err(StreamError::Provider { failure, partial: text });
                    }
                    None => {
                        on_update(&text);
                        return Err(StreamError::ChannelClosed { partial: text });
                    }
                },
            }
        }

        on_update(&text);
        if cancelled {
            tracing::info!(chars = text.len(), "Stream cancelled; keeping partial text");
        }

        // Reports can be partial (input at message start, output never
        // arrives on cancel), so each missing count is estimated on its own.
        let mut usage = reported;
        let mut usage_estimated = reported.is_zero();
        if usage.input_tokens == 0 {
            usage.input_tokens = prompt_tokens;
            usage_estimated |= prompt_tokens > 0;
        }
        if usage.output_tokens == 0 && !text.is_empty() {
            usage.output_tokens = self.counter.estimate(self.provider, &text);
            usage_estimated = true;
        }
        Ok(StreamOutcome {
            text,
            usage,
            usage_estimated,
            cancelled,
        })
    }
}
