use crate::usage::ApiUsage;

/// Provider-neutral streaming event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    TextDelta(String),
    Usage(ApiUsage),
    Done,
    Error(StreamFailure),
}

/// Transport or protocol failure surfaced through the stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamFailure {
    /// Short human-readable message.
    pub message: String,
    /// Full diagnostic body, when one was available.
    pub detail: Option<String>,
}

impl StreamFailure {
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            detail: None,
        }
    }

    #[must_use]
    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }
}
