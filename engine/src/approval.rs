//! The approval gate: suspends a tool until the user decides, the wait times
//! out, or the session is cancelled.
//!
//! Each request registers a one-shot slot keyed by its [`ApprovalId`]. The
//! front end answers through an [`ApprovalResolver`]; the first answer for an
//! id is delivered and every later one is ignored. Timeout and cancellation
//! both resolve as a rejection.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::oneshot;

use tether_types::{
    ApprovalDecision, ApprovalId, ApprovalOutcome, ApprovalPayload, CommandApproval,
    PendingApproval,
};

use crate::cancel::CancelFlag;
use crate::command_policy::{CommandPolicy, truncate_command};
use crate::events::{ApprovalResolution, EventSink, Notifier, SessionEvent, UiPresence};

pub const DEFAULT_APPROVAL_TIMEOUT: Duration = Duration::from_secs(300);
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(500);

#[derive(Debug, Clone)]
pub struct ApprovalPolicy {
    pub require_approval: bool,
    pub auto_approve_read_only: bool,
    pub commands: CommandPolicy,
    pub timeout: Duration,
    pub poll_interval: Duration,
    pub notify_when_unattended: bool,
}

impl Default for ApprovalPolicy {
    fn default() -> Self {
        Self {
            require_approval: true,
            auto_approve_read_only: true,
            commands: default_command_policy(),
            timeout: DEFAULT_APPROVAL_TIMEOUT,
            poll_interval: DEFAULT_POLL_INTERVAL,
            notify_when_unattended: true,
        }
    }
}

fn default_command_policy() -> CommandPolicy {
    CommandPolicy::with_defaults().unwrap_or_else(|e| {
        tracing::error!("Built-in command patterns failed to compile: {e}");
        CommandPolicy::empty()
    })
}

impl ApprovalPolicy {
    /// Whether a file-change preview must wait for the user.
    #[must_use]
    pub fn gates_file_change(&self, force: bool) -> bool {
        self.require_approval || force
    }

    /// Whether a shell command must wait for the user.
    #[must_use]
    pub fn gates_command(&self, command: &str) -> bool {
        if self.commands.is_destructive(command) {
            return true;
        }
        if !self.require_approval {
            return false;
        }
        !(self.auto_approve_read_only && self.commands.is_read_only(command))
    }
}

type PendingSlots = Arc<Mutex<HashMap<ApprovalId, oneshot::Sender<ApprovalDecision>>>>;

fn lock(slots: &PendingSlots) -> MutexGuard<'_, HashMap<ApprovalId, oneshot::Sender<ApprovalDecision>>> {
    slots.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Releases a waiter's slot however the wait ends, including when the
/// waiting future is dropped.
struct SlotGuard<'a> {
    slots: &'a PendingSlots,
    id: ApprovalId,
}

impl Drop for SlotGuard<'_> {
    fn drop(&mut self) {
        lock(self.slots).remove(&self.id);
    }
}

/// Front-end handle for answering pending approvals.
#[derive(Clone)]
pub struct ApprovalResolver {
    slots: PendingSlots,
}

impl ApprovalResolver {
    /// Deliver a decision. Returns `false` when the id is unknown or already
    /// resolved; such decisions have no effect.
    pub fn resolve(&self, decision: ApprovalDecision) -> bool {
        // Send while holding the lock so a waiter that times out concurrently
        // either sees the decision or still owns the slot.
        let mut slots = lock(&self.slots);
        match slots.remove(&decision.approval_id) {
            Some(tx) => tx.send(decision).is_ok(),
            None => {
                tracing::debug!(
                    approval_id = %decision.approval_id,
                    "Ignoring decision for unknown or resolved approval"
                );
                false
            }
        }
    }

    #[must_use]
    pub fn pending_count(&self) -> usize {
        lock(&self.slots).len()
    }
}

pub struct ApprovalGate {
    policy: ApprovalPolicy,
    slots: PendingSlots,
    events: EventSink,
    notifier: Arc<dyn Notifier>,
    presence: UiPresence,
    cancel: CancelFlag,
}

enum Wait {
    Decided(ApprovalDecision),
    Cancelled,
    TimedOut,
}

impl ApprovalGate {
    #[must_use]
    pub fn new(
        policy: ApprovalPolicy,
        events: EventSink,
        notifier: Arc<dyn Notifier>,
        presence: UiPresence,
        cancel: CancelFlag,
    ) -> Self {
        Self {
            policy,
            slots: Arc::default(),
            events,
            notifier,
            presence,
            cancel,
        }
    }

    #[must_use]
    pub fn policy(&self) -> &ApprovalPolicy {
        &self.policy
    }

    #[must_use]
    pub fn resolver(&self) -> ApprovalResolver {
        ApprovalResolver {
            slots: Arc::clone(&self.slots),
        }
    }

    /// Gate a file change. `force` is the tool's own always-ask flag and
    /// overrides `require_approval = false`.
    pub async fn request_file_change(
        &self,
        pending: PendingApproval,
        force: bool,
    ) -> ApprovalOutcome {
        if !self.policy.gates_file_change(force) {
            tracing::debug!(tool = %pending.tool_name, "File change auto-approved by policy");
            return ApprovalOutcome::Approved;
        }
        match self.wait_for_decision(pending).await {
            Some(decision) => decision.outcome(),
            None => ApprovalOutcome::Rejected,
        }
    }

    /// Gate a shell command. An approval may replace the command text.
    pub async fn request_command(&self, pending: PendingApproval) -> CommandApproval {
        let ApprovalPayload::Command { command } = &pending.payload else {
            tracing::warn!(approval_id = %pending.id, "Command gate received a non-command payload");
            return CommandApproval::Rejected;
        };
        let command = command.clone();

        if let Some(reason) = self.policy.commands.destructive_reason(&command) {
            tracing::info!(
                command = %truncate_command(&command, 100),
                reason,
                "Destructive command requires approval"
            );
        } else if !self.policy.gates_command(&command) {
            tracing::debug!(command = %truncate_command(&command, 100), "Command auto-approved");
            return CommandApproval::Approved(command);
        }

        match self.wait_for_decision(pending).await {
            Some(decision) if decision.approved => CommandApproval::Approved(
                decision
                    .edited_command
                    .filter(|c| !c.trim().is_empty())
                    .unwrap_or(command),
            ),
            _ => CommandApproval::Rejected,
        }
    }

    /// `None` means the wait ended without a decision.
    async fn wait_for_decision(&self, pending: PendingApproval) -> Option<ApprovalDecision> {
        let id = pending.id.clone();
        let (tx, mut rx) = oneshot::channel();
        lock(&self.slots).insert(id.clone(), tx);
        let _slot = SlotGuard {
            slots: &self.slots,
            id: id.clone(),
        };

        tracing::info!(approval_id = %id, tool = %pending.tool_name, "Awaiting approval");
        let summary = describe(&pending);
        self.events.emit(SessionEvent::ApprovalRequested(pending));
        if self.policy.notify_when_unattended && !self.presence.is_foreground() {
            self.notifier.notify("Approval needed", &summary);
        }

        let wait = tokio::select! {
            decision = &mut rx => match decision {
                Ok(decision) => Wait::Decided(decision),
                Err(_) => Wait::Cancelled,
            },
            () = self.cancel.cancelled(self.policy.poll_interval) => Wait::Cancelled,
            () = tokio::time::sleep(self.policy.timeout) => Wait::TimedOut,
        };

        let wait = match wait {
            Wait::Decided(decision) => Wait::Decided(decision),
            other => {
                // A resolver that won the slot has already sent; honor it.
                let owned_slot = lock(&self.slots).remove(&id).is_some();
                match rx.try_recv() {
                    Ok(decision) if !owned_slot => Wait::Decided(decision),
                    _ => other,
                }
            }
        };

        let (resolution, decision) = match wait {
            Wait::Decided(decision) => {
                let resolution = if decision.approved {
                    ApprovalResolution::Approved
                } else {
                    ApprovalResolution::Rejected
                };
                (resolution, Some(decision))
            }
            Wait::Cancelled => {
                tracing::info!(approval_id = %id, "Approval cancelled");
                (ApprovalResolution::Cancelled, None)
            }
            Wait::TimedOut => {
                tracing::warn!(approval_id = %id, timeout = ?self.policy.timeout, "Approval timed out");
                (ApprovalResolution::TimedOut, None)
            }
        };
        self.events.emit(SessionEvent::ApprovalResolved {
            approval_id: id,
            resolution,
        });
        decision
    }
}

fn describe(pending: &PendingApproval) -> String {
    match &pending.payload {
        ApprovalPayload::FileChange { change } => {
            format!("{} wants to change {}", pending.tool_name, change.path.display())
        }
        ApprovalPayload::Command { command } => {
            format!("Run `{}`?", truncate_command(command, 80))
        }
    }
}
