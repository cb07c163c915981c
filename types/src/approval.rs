//! Approval requests, user decisions, and their outcomes.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::change::FileChange;
use crate::ids::{ApprovalId, SessionId};

/// What the user is asked to approve.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ApprovalPayload {
    FileChange { change: FileChange },
    Command { command: String },
}

/// A gated action waiting for a decision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingApproval {
    pub id: ApprovalId,
    pub session_id: SessionId,
    pub payload: ApprovalPayload,
    pub tool_name: String,
    pub arguments: Value,
}

/// A decision delivered out-of-band by the UI.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalDecision {
    pub approval_id: ApprovalId,
    pub approved: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub edited_command: Option<String>,
    #[serde(default)]
    pub partial: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub modified_content: Option<String>,
}

impl ApprovalDecision {
    #[must_use]
    pub fn approve(approval_id: ApprovalId) -> Self {
        Self {
            approval_id,
            approved: true,
            edited_command: None,
            partial: false,
            modified_content: None,
        }
    }

    #[must_use]
    pub fn reject(approval_id: ApprovalId) -> Self {
        Self {
            approved: false,
            ..Self::approve(approval_id)
        }
    }

    #[must_use]
    pub fn approve_edited_command(approval_id: ApprovalId, command: impl Into<String>) -> Self {
        Self {
            edited_command: Some(command.into()),
            ..Self::approve(approval_id)
        }
    }

    #[must_use]
    pub fn partial(approval_id: ApprovalId, modified_content: impl Into<String>) -> Self {
        Self {
            partial: true,
            modified_content: Some(modified_content.into()),
            ..Self::approve(approval_id)
        }
    }

    /// Outcome for a file-change request.
    #[must_use]
    pub fn outcome(&self) -> ApprovalOutcome {
        if !self.approved {
            return ApprovalOutcome::Rejected;
        }
        match (&self.modified_content, self.partial) {
            (Some(content), true) => ApprovalOutcome::PartiallyApproved(content.clone()),
            _ => ApprovalOutcome::Approved,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", content = "content", rename_all = "snake_case")]
pub enum ApprovalOutcome {
    Approved,
    Rejected,
    /// Only valid for file changes: the merged content the user accepted.
    PartiallyApproved(String),
}

impl ApprovalOutcome {
    #[must_use]
    pub fn is_go_ahead(&self) -> bool {
        !matches!(self, Self::Rejected)
    }
}

/// Outcome for a command request. Acceptance carries the command to run,
/// which the user may have edited.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandApproval {
    Approved(String),
    Rejected,
}
