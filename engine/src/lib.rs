//! Session orchestration for Tether.
//!
//! A [`Session`] owns the conversation and drives three suspension points:
//! provider streaming ([`streaming`]), user approvals ([`approval`]) and
//! terminal commands ([`tools::shell`]). File effects go through the
//! [`pipeline`] so every mutation is gated and snapshotted into the
//! [`checkpoints`] ledger first.

#![allow(clippy::missing_errors_doc)]

pub mod approval;
pub mod cancel;
pub mod checkpoints;
pub mod command_policy;
pub mod config;
pub mod events;
pub mod history;
pub mod persistence;
pub mod pipeline;
pub mod session;
pub mod streaming;
pub mod tools;

pub use approval::{ApprovalGate, ApprovalPolicy, ApprovalResolver};
pub use cancel::CancelFlag;
pub use checkpoints::{CheckpointLedger, PathDiff, RollbackPlan, format_checkpoint_line};
pub use command_policy::CommandPolicy;
pub use config::{ConfigError, TetherConfig};
pub use events::{ApprovalResolution, EventSink, NoopNotifier, Notifier, SessionEvent, UiPresence};
pub use history::FileChangeEntry;
pub use persistence::{BlobStore, FileBlobStore, MemoryBlobStore, PersistError};
pub use pipeline::{ToolObserver, ToolPipeline, ToolRun};
pub use session::{Session, SessionCollaborators, SessionConfig};
pub use streaming::{StreamError, StreamNormalizer, StreamOutcome, StreamSettings};
pub use tools::shell::{
    CommandFinished, CommandRequest, TerminalBridge, TerminalRunner, TerminalSettings,
};
pub use tools::{ToolError, ToolExecutor, ToolRegistry};

pub use tether_context::{TokenCounter, UsageLedger};
pub use tether_providers::{ApiConfig, ApiKey, ProviderError};
pub use tether_types;
