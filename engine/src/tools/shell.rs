//! Shell commands run through an external terminal.
//!
//! The engine never spawns processes itself. It dispatches a
//! [`CommandRequest`] to whatever terminal the front end owns and waits for
//! the matching [`CommandFinished`] on a broadcast channel.

use std::path::PathBuf;
use std::time::Duration;

use serde_json::{Value, json};
use tokio::sync::{broadcast, mpsc};

use tether_types::SessionId;

use super::DEFAULT_MAX_OUTPUT_BYTES;
use crate::approval::DEFAULT_POLL_INTERVAL;
use crate::cancel::CancelFlag;

pub const RUN_COMMAND_TOOL: &str = "run_command";

pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(300);

const FINISHED_CHANNEL_CAPACITY: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TerminalSettings {
    pub command_timeout: Duration,
    pub max_output_bytes: usize,
    pub cancel_poll: Duration,
}

impl Default for TerminalSettings {
    fn default() -> Self {
        Self {
            command_timeout: DEFAULT_COMMAND_TIMEOUT,
            max_output_bytes: DEFAULT_MAX_OUTPUT_BYTES,
            cancel_poll: DEFAULT_POLL_INTERVAL,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandRequest {
    pub command: String,
    pub working_dir: PathBuf,
    pub session_id: SessionId,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandFinished {
    pub command: String,
    pub session_id: SessionId,
    pub output: String,
    /// `None` when the process was killed by a signal.
    pub exit_code: Option<i32>,
}

impl CommandFinished {
    fn matches(&self, request: &CommandRequest) -> bool {
        self.command == request.command && self.session_id == request.session_id
    }
}

/// The terminal collaborator.
pub trait TerminalRunner: Send + Sync {
    /// Fire-and-forget; completion arrives through [`TerminalRunner::subscribe`].
    fn dispatch(&self, request: CommandRequest);
    fn subscribe(&self) -> broadcast::Receiver<CommandFinished>;
}

/// Channel-backed [`TerminalRunner`]: requests go out on an mpsc queue and
/// whoever executes them reports back through [`TerminalBridge::publish`].
#[derive(Debug, Clone)]
pub struct TerminalBridge {
    requests: mpsc::UnboundedSender<CommandRequest>,
    finished: broadcast::Sender<CommandFinished>,
}

impl TerminalBridge {
    #[must_use]
    pub fn new() -> (Self, mpsc::UnboundedReceiver<CommandRequest>) {
        let (requests, rx) = mpsc::unbounded_channel();
        let (finished, _) = broadcast::channel(FINISHED_CHANNEL_CAPACITY);
        (Self { requests, finished }, rx)
    }

    pub fn publish(&self, finished: CommandFinished) {
        if self.finished.send(finished).is_err() {
            tracing::debug!("Command finished with nobody waiting");
        }
    }
}

impl TerminalRunner for TerminalBridge {
    fn dispatch(&self, request: CommandRequest) {
        if self.requests.send(request).is_err() {
            tracing::warn!("Terminal is gone; command was not dispatched");
        }
    }

    fn subscribe(&self) -> broadcast::Receiver<CommandFinished> {
        self.finished.subscribe()
    }
}

/// Why a command produced no completion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandWait {
    Cancelled,
    TimedOut,
    TerminalClosed,
}

/// Dispatch `request` and wait for its completion.
///
/// Subscribes before dispatching so a fast terminal cannot finish unseen.
pub async fn run_in_terminal(
    terminal: &dyn TerminalRunner,
    request: CommandRequest,
    cancel: &CancelFlag,
    settings: &TerminalSettings,
) -> Result<CommandFinished, CommandWait> {
    let mut finished = terminal.subscribe();
    terminal.dispatch(request.clone());

    let wait_for_match = async {
        loop {
            match finished.recv().await {
                Ok(done) if done.matches(&request) => return Ok(done),
                Ok(_) => {}
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "Missed command completions while waiting");
                }
                Err(broadcast::error::RecvError::Closed) => return Err(CommandWait::TerminalClosed),
            }
        }
    };

    tokio::select! {
        result = wait_for_match => result,
        () = cancel.cancelled(settings.cancel_poll) => Err(CommandWait::Cancelled),
        () = tokio::time::sleep(settings.command_timeout) => Err(CommandWait::TimedOut),
    }
}

#[must_use]
pub fn run_command_schema() -> Value {
    json!({
        "type": "object",
        "properties": { "command": { "type": "string", "minLength": 1 } },
        "required": ["command"]
    })
}
