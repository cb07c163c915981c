//! Events published by a session to whatever front end is attached.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::mpsc;

use tether_types::{ApprovalId, ChatTurn, PendingApproval, UsageEntry};

/// How a pending approval left the waiting state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApprovalResolution {
    Approved,
    Rejected,
    Cancelled,
    TimedOut,
}

#[derive(Debug, Clone)]
pub enum SessionEvent {
    /// A tool is blocked until the user decides.
    ApprovalRequested(PendingApproval),
    ApprovalResolved {
        approval_id: ApprovalId,
        resolution: ApprovalResolution,
    },
    TurnAppended {
        index: usize,
        turn: ChatTurn,
    },
    /// Content or agent-event state of an existing turn changed.
    TurnUpdated {
        index: usize,
        turn: ChatTurn,
    },
    /// The conversation now has exactly `len` turns.
    TurnsTruncated {
        len: usize,
    },
    CheckpointFinalized {
        message_index: usize,
    },
    UsageRecorded(UsageEntry),
}

/// Fire-and-forget publisher. Nobody listening is not an error.
#[derive(Debug, Clone)]
pub struct EventSink {
    tx: Option<mpsc::UnboundedSender<SessionEvent>>,
}

impl EventSink {
    #[must_use]
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<SessionEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx: Some(tx) }, rx)
    }

    #[must_use]
    pub fn disconnected() -> Self {
        Self { tx: None }
    }

    pub fn emit(&self, event: SessionEvent) {
        if let Some(tx) = &self.tx {
            let _ = tx.send(event);
        }
    }
}

/// Out-of-band alert for when nobody is looking at the session.
pub trait Notifier: Send + Sync {
    fn notify(&self, title: &str, body: &str);
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoopNotifier;

impl Notifier for NoopNotifier {
    fn notify(&self, _title: &str, _body: &str) {}
}

/// Whether the UI currently has the user's attention.
#[derive(Debug, Clone)]
pub struct UiPresence(Arc<AtomicBool>);

impl Default for UiPresence {
    fn default() -> Self {
        Self(Arc::new(AtomicBool::new(true)))
    }
}

impl UiPresence {
    pub fn set_foreground(&self, foreground: bool) {
        self.0.store(foreground, Ordering::Relaxed);
    }

    #[must_use]
    pub fn is_foreground(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}
