//! Session-wide cancellation.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

/// Shared stop flag observed by streaming, approval waits and command waits.
///
/// Cloning shares the flag. Waiters poll it rather than being woken, so a
/// cancel is observed within one poll interval.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn reset(&self) {
        self.0.store(false, Ordering::SeqCst);
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// Resolves once the flag is set, checking every `poll`.
    pub async fn cancelled(&self, poll: Duration) {
        while !self.is_cancelled() {
            tokio::time::sleep(poll).await;
        }
    }
}
