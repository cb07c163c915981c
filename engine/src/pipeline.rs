//! Tool execution pipeline: preview, gate, snapshot, execute.
//!
//! Every invocation that passes argument validation is tracked by one
//! [`AgentEvent`] whose status moves `Pending -> Running -> Succeeded|Failed`.
//! The observer sees every state change. File snapshots are taken only after
//! approval and before the tool writes anything, so a rejected change leaves
//! no trace in the ledger.

use std::path::Path;
use std::sync::Arc;

use serde_json::Value;

use tether_types::{
    AgentEvent, AgentEventKind, ApprovalId, ApprovalOutcome, ApprovalPayload, CommandApproval,
    ExecutionStatus, FileSnapshot, PendingApproval, SessionId, ToolInvocation, ToolResult,
};

use crate::approval::ApprovalGate;
use crate::cancel::CancelFlag;
use crate::checkpoints::CheckpointLedger;
use crate::command_policy::truncate_command;
use crate::tools::builtins::read_existing;
use crate::tools::shell::{
    CommandRequest, CommandWait, RUN_COMMAND_TOOL, TerminalRunner, TerminalSettings,
    run_command_schema, run_in_terminal,
};
use crate::tools::{ToolCtx, ToolError, ToolExecutor, ToolRegistry, truncate_output, validate_args};

/// Tool used to apply partially approved content.
const OVERWRITE_TOOL: &str = "write_file";

/// Arguments that describe an incremental edit and are meaningless once the
/// full content is known.
const INCREMENTAL_EDIT_KEYS: &[&str] = &["old_string", "new_string", "replace_all"];

/// Receives every state change of the event tracking one invocation.
pub trait ToolObserver: Send {
    fn event_changed(&mut self, event: &AgentEvent);
}

/// Session state a single invocation may touch.
pub struct ToolRun<'a> {
    pub session_id: &'a SessionId,
    pub working_dir: &'a Path,
    pub ledger: &'a mut CheckpointLedger,
    pub observer: &'a mut dyn ToolObserver,
}

/// Rewrite a content-bearing call so it overwrites the file with `content`.
#[must_use]
pub fn remap_partial_arguments(args: Value, content: &str) -> Value {
    let mut args = match args {
        Value::Object(map) => map,
        _ => serde_json::Map::new(),
    };
    for key in INCREMENTAL_EDIT_KEYS {
        args.remove(*key);
    }
    args.insert("content".to_string(), Value::String(content.to_string()));
    Value::Object(args)
}

fn new_approval_id() -> ApprovalId {
    ApprovalId::new(uuid::Uuid::new_v4().to_string())
}

struct Tracker<'o> {
    event: AgentEvent,
    observer: &'o mut dyn ToolObserver,
}

impl<'o> Tracker<'o> {
    fn start(event: AgentEvent, observer: &'o mut dyn ToolObserver) -> Self {
        let mut tracker = Self { event, observer };
        tracker.publish();
        tracker
    }

    fn publish(&mut self) {
        self.observer.event_changed(&self.event);
    }

    fn await_approval(&mut self, id: ApprovalId) {
        self.event.approval_id = Some(id);
        self.publish();
    }

    fn running(&mut self) {
        self.event.status = Some(ExecutionStatus::Running);
        self.publish();
    }

    fn finish(mut self, result: ToolResult) -> ToolResult {
        self.event.status = Some(if result.is_error {
            ExecutionStatus::Failed
        } else {
            ExecutionStatus::Succeeded
        });
        self.event.output = Some(result.content.clone());
        self.publish();
        result
    }
}

pub struct ToolPipeline {
    registry: ToolRegistry,
    gate: ApprovalGate,
    terminal: Arc<dyn TerminalRunner>,
    settings: TerminalSettings,
    cancel: CancelFlag,
}

impl ToolPipeline {
    #[must_use]
    pub fn new(
        registry: ToolRegistry,
        gate: ApprovalGate,
        terminal: Arc<dyn TerminalRunner>,
        settings: TerminalSettings,
        cancel: CancelFlag,
    ) -> Self {
        Self {
            registry,
            gate,
            terminal,
            settings,
            cancel,
        }
    }

    #[must_use]
    pub fn gate(&self) -> &ApprovalGate {
        &self.gate
    }

    #[must_use]
    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    pub async fn execute(&self, run: ToolRun<'_>, invocation: ToolInvocation) -> ToolResult {
        if invocation.name == RUN_COMMAND_TOOL {
            return self.run_command(run, invocation).await;
        }
        let ToolInvocation {
            id,
            name,
            arguments,
        } = invocation;
        let ToolRun {
            session_id,
            working_dir,
            ledger,
            observer,
        } = run;

        let tool = match self.registry.lookup(&name) {
            Ok(tool) => tool,
            Err(e) => return ToolResult::error(id, name, e.to_string()),
        };
        if let Err(e) = validate_args(&tool.schema(), &arguments) {
            return ToolResult::error(id, name, e.to_string());
        }
        let ctx = ToolCtx {
            working_dir: working_dir.to_path_buf(),
            max_output_bytes: self.settings.max_output_bytes,
        };
        let preview = if tool.supports_preview() {
            match tool.preview(&arguments, &ctx) {
                Ok(preview) => preview,
                Err(e) => return ToolResult::error(id, name, e.to_string()),
            }
        } else {
            None
        };

        let mut event = match &preview {
            Some(change) => AgentEvent::new(
                AgentEventKind::FileChange,
                format!("{} {}", change.operation.as_str(), change.path.display()),
            ),
            None => AgentEvent::new(AgentEventKind::Step, format!("Run {name}")),
        }
        .with_tool(&name, &id)
        .with_status(ExecutionStatus::Pending);
        event.file_change.clone_from(&preview);
        let mut tracker = Tracker::start(event, observer);

        let mut arguments = arguments;
        let mut executor: &dyn ToolExecutor = tool;
        if let Some(change) = preview {
            let force = tool.always_requires_approval();
            let approval_id = new_approval_id();
            if self.gate.policy().gates_file_change(force) {
                tracker.await_approval(approval_id.clone());
            }
            let pending = PendingApproval {
                id: approval_id,
                session_id: session_id.clone(),
                payload: ApprovalPayload::FileChange {
                    change: change.clone(),
                },
                tool_name: name.clone(),
                arguments: arguments.clone(),
            };

            match self.gate.request_file_change(pending, force).await {
                ApprovalOutcome::Rejected => {
                    tracing::info!(tool = %name, path = %change.path.display(), "File change rejected");
                    return tracker.finish(ToolResult::error(id, name, ToolError::Rejected.to_string()));
                }
                ApprovalOutcome::Approved => {}
                ApprovalOutcome::PartiallyApproved(content) => {
                    executor = match self.registry.lookup(OVERWRITE_TOOL) {
                        Ok(tool) => tool,
                        Err(e) => return tracker.finish(ToolResult::error(id, name, e.to_string())),
                    };
                    arguments = remap_partial_arguments(arguments, &content);
                    tracker.event.file_change = Some(change.with_content_after(content));
                }
            }

            // The approval wait can be long; snapshot what is on disk now.
            let before = match read_existing(&change.path) {
                Ok(before) => before,
                Err(e) => return tracker.finish(ToolResult::error(id, name, e.to_string())),
            };
            let was_created = before.is_none();
            ledger.record_file_change(FileSnapshot::new(change.path.clone(), before, was_created));
        }

        tracker.running();
        let result = match executor.execute(arguments, &ctx).await {
            Ok(output) => ToolResult::success(&id, &name, truncate_output(output, ctx.max_output_bytes)),
            Err(e) => {
                tracing::warn!(tool = %name, "Tool failed: {e}");
                ToolResult::error(&id, &name, e.to_string())
            }
        };
        tracker.finish(result)
    }

    async fn run_command(&self, run: ToolRun<'_>, invocation: ToolInvocation) -> ToolResult {
        let ToolInvocation {
            id,
            name,
            arguments,
        } = invocation;
        let ToolRun {
            session_id,
            working_dir,
            ledger,
            observer,
        } = run;

        if let Err(e) = validate_args(&run_command_schema(), &arguments) {
            return ToolResult::error(id, name, e.to_string());
        }
        let command = arguments
            .get("command")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();

        let event = AgentEvent::new(
            AgentEventKind::CommandApproval,
            format!("Run `{}`", truncate_command(&command, 60)),
        )
        .with_tool(&name, &id)
        .with_command(&command)
        .with_status(ExecutionStatus::Pending);
        let mut tracker = Tracker::start(event, observer);

        let approval_id = new_approval_id();
        if self.gate.policy().gates_command(&command) {
            tracker.await_approval(approval_id.clone());
        }
        let pending = PendingApproval {
            id: approval_id,
            session_id: session_id.clone(),
            payload: ApprovalPayload::Command {
                command: command.clone(),
            },
            tool_name: name.clone(),
            arguments,
        };
        let approval = self.gate.request_command(pending).await;

        let to_run = match &approval {
            CommandApproval::Approved(approved) => approved.clone(),
            CommandApproval::Rejected => command.clone(),
        };
        ledger.record_shell_command(&to_run);
        if approval == CommandApproval::Rejected {
            return tracker.finish(ToolResult::error(id, name, ToolError::Rejected.to_string()));
        }
        if to_run != command {
            tracker.event.command = Some(to_run.clone());
        }
        tracker.running();

        let request = CommandRequest {
            command: to_run,
            working_dir: working_dir.to_path_buf(),
            session_id: session_id.clone(),
        };
        let result = match run_in_terminal(&*self.terminal, request, &self.cancel, &self.settings).await {
            Ok(done) => {
                let output = truncate_output(done.output, self.settings.max_output_bytes);
                match done.exit_code {
                    Some(0) => ToolResult::success(&id, &name, output),
                    Some(code) => ToolResult::error(&id, &name, format!("Exit code {code}\n{output}")),
                    None => ToolResult::error(&id, &name, format!("Terminated by signal\n{output}")),
                }
            }
            Err(CommandWait::TimedOut) => ToolResult::error(
                &id,
                &name,
                format!(
                    "Command timed out after {}s",
                    self.settings.command_timeout.as_secs()
                ),
            ),
            Err(CommandWait::Cancelled) => ToolResult::error(&id, &name, "Command cancelled"),
            Err(CommandWait::TerminalClosed) => {
                ToolResult::error(&id, &name, "Terminal closed before the command finished")
            }
        };
        tracker.finish(result)
    }
}
