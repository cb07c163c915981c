//! Conversation turns and the agent events embedded in them.
//!
//! Constructors take `SystemTime` explicitly; callers own the clock.

use std::time::SystemTime;

use serde::{Deserialize, Serialize};

use crate::change::FileChange;
use crate::ids::ApprovalId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }
}

/// A piece of workspace context the user attached to a message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContextSnippet {
    pub label: String,
    pub content: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentEventKind {
    Status,
    Step,
    FileChange,
    CommandApproval,
    Checklist,
    PlanCreated,
    ModeSwitch,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Pending,
    Running,
    Streaming,
    Succeeded,
    Failed,
}

impl ExecutionStatus {
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed)
    }
}

/// Structured description of an agent-driven occurrence.
///
/// One event rides on at most one [`ChatTurn`] and is mutated in place while
/// the tool it describes moves through its lifecycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentEvent {
    pub kind: AgentEventKind,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_change: Option<FileChange>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub approval_id: Option<ApprovalId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<ExecutionStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
}

impl AgentEvent {
    #[must_use]
    pub fn new(kind: AgentEventKind, title: impl Into<String>) -> Self {
        Self {
            kind,
            title: title.into(),
            details: None,
            command: None,
            output: None,
            file_change: None,
            approval_id: None,
            tool_name: None,
            tool_call_id: None,
            status: None,
            category: None,
        }
    }

    #[must_use]
    pub fn with_tool(mut self, tool_name: impl Into<String>, tool_call_id: impl Into<String>) -> Self {
        self.tool_name = Some(tool_name.into());
        self.tool_call_id = Some(tool_call_id.into());
        self
    }

    #[must_use]
    pub fn with_command(mut self, command: impl Into<String>) -> Self {
        self.command = Some(command.into());
        self
    }

    #[must_use]
    pub fn with_status(mut self, status: ExecutionStatus) -> Self {
        self.status = Some(status);
        self
    }

    /// True while the user still owes a decision for this event.
    #[must_use]
    pub fn is_awaiting_decision(&self) -> bool {
        self.approval_id.is_some() && self.status == Some(ExecutionStatus::Pending)
    }
}

/// One message in the conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatTurn {
    pub role: Role,
    pub content: String,
    pub created_at: SystemTime,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event: Option<AgentEvent>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub context: Vec<ContextSnippet>,
}

impl ChatTurn {
    #[must_use]
    pub fn user(content: impl Into<String>, created_at: SystemTime) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
            created_at,
            event: None,
            context: Vec::new(),
        }
    }

    #[must_use]
    pub fn assistant(content: impl Into<String>, created_at: SystemTime) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
            created_at,
            event: None,
            context: Vec::new(),
        }
    }

    /// Assistant-side status turn that carries an agent event.
    #[must_use]
    pub fn agent_event(event: AgentEvent, created_at: SystemTime) -> Self {
        Self {
            role: Role::Assistant,
            content: event.title.clone(),
            created_at,
            event: Some(event),
            context: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_context(mut self, context: Vec<ContextSnippet>) -> Self {
        self.context = context;
        self
    }

    /// Text sent to the model: the content followed by any attached snippets.
    #[must_use]
    pub fn prompt_text(&self) -> String {
        if self.context.is_empty() {
            return self.content.clone();
        }
        let mut text = self.content.clone();
        for snippet in &self.context {
            text.push_str("\n\n<context label=\"");
            text.push_str(&snippet.label);
            text.push_str("\">\n");
            text.push_str(&snippet.content);
            text.push_str("\n</context>");
        }
        text
    }
}
