//! Core domain types for Tether.
//!
//! This crate contains pure domain types with no IO, no async, and minimal dependencies.
//! Everything here can be used from any layer of the application.

#![allow(clippy::missing_errors_doc)]

mod approval;
mod change;
mod checkpoint;
mod ids;
mod provider;
mod stream;
mod tool;
mod turn;
mod usage;

pub use approval::{
    ApprovalDecision, ApprovalOutcome, ApprovalPayload, CommandApproval, PendingApproval,
};
pub use change::{FileChange, FileOperation};
pub use checkpoint::{Checkpoint, FileSnapshot, RollbackResult};
pub use ids::{ApprovalId, ChangeId, SessionId};
pub use provider::{Provider, ProviderParseError};
pub use stream::{StreamEvent, StreamFailure};
pub use tool::{ToolInvocation, ToolResult};
pub use turn::{AgentEvent, AgentEventKind, ChatTurn, ContextSnippet, ExecutionStatus, Role};
pub use usage::{ApiUsage, UsageEntry};
