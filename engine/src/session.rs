//! One conversation: turn list, checkpoint ledger, usage, and the agent loop
//! primitives that mutate them.
//!
//! All mutation goes through `&mut Session`, so stream updates, tool runs and
//! rollbacks are serialized by construction. Collaborators (UI, terminal,
//! notifier, store) only ever see events and never hold session state.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use tether_context::{TokenCounter, UsageLedger};
use tether_providers::{ApiConfig, SendMessageRequest, send_message};
use tether_types::{
    AgentEvent, AgentEventKind, ChangeId, ChatTurn, Checkpoint, ContextSnippet, ExecutionStatus,
    RollbackResult, SessionId, StreamEvent, ToolInvocation, ToolResult,
};

use crate::approval::{ApprovalGate, ApprovalPolicy, ApprovalResolver};
use crate::cancel::CancelFlag;
use crate::checkpoints::{CheckpointLedger, PathDiff, restore_snapshots};
use crate::events::{EventSink, Notifier, SessionEvent, UiPresence};
use crate::history::{self, FileChangeEntry};
use crate::persistence::{self, BlobStore, PersistError};
use crate::pipeline::{ToolObserver, ToolPipeline, ToolRun};
use crate::streaming::{
    STREAM_EVENT_CHANNEL_CAPACITY, StreamError, StreamNormalizer, StreamOutcome, StreamSettings,
};
use crate::tools::ToolRegistry;
use crate::tools::shell::{TerminalRunner, TerminalSettings};

/// Resolved settings for a session.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub api: ApiConfig,
    pub working_dir: PathBuf,
    pub system_prompt: Option<String>,
    pub stream: StreamSettings,
    pub approval: ApprovalPolicy,
    pub terminal: TerminalSettings,
}

impl SessionConfig {
    #[must_use]
    pub fn new(api: ApiConfig, working_dir: impl Into<PathBuf>) -> Self {
        Self {
            api,
            working_dir: working_dir.into(),
            system_prompt: None,
            stream: StreamSettings::default(),
            approval: ApprovalPolicy::default(),
            terminal: TerminalSettings::default(),
        }
    }
}

/// Everything outside the session it talks to.
pub struct SessionCollaborators {
    pub events: EventSink,
    pub terminal: Arc<dyn TerminalRunner>,
    pub notifier: Arc<dyn Notifier>,
    pub presence: UiPresence,
    pub store: Arc<dyn BlobStore>,
}

pub struct Session {
    id: SessionId,
    api: ApiConfig,
    working_dir: PathBuf,
    system_prompt: Option<String>,
    turns: Vec<ChatTurn>,
    ledger: CheckpointLedger,
    usage: UsageLedger,
    counter: TokenCounter,
    pipeline: ToolPipeline,
    events: EventSink,
    cancel: CancelFlag,
    store: Arc<dyn BlobStore>,
    stream_settings: StreamSettings,
    stream_task: Option<JoinHandle<()>>,
}

/// Mirrors a tool's agent event into the turn list: the first change appends
/// a turn, later ones update it in place.
struct TurnObserver<'a> {
    turns: &'a mut Vec<ChatTurn>,
    events: &'a EventSink,
    index: Option<usize>,
}

impl ToolObserver for TurnObserver<'_> {
    fn event_changed(&mut self, event: &AgentEvent) {
        if let Some(index) = self.index
            && let Some(turn) = self.turns.get_mut(index)
        {
            turn.content.clone_from(&event.title);
            turn.event = Some(event.clone());
            self.events.emit(SessionEvent::TurnUpdated {
                index,
                turn: turn.clone(),
            });
            return;
        }
        let turn = ChatTurn::agent_event(event.clone(), SystemTime::now());
        let index = self.turns.len();
        self.turns.push(turn.clone());
        self.index = Some(index);
        self.events.emit(SessionEvent::TurnAppended { index, turn });
    }
}

impl Session {
    #[must_use]
    pub fn new(config: SessionConfig, collaborators: SessionCollaborators) -> Self {
        Self::with_state(config, collaborators, Vec::new(), CheckpointLedger::new())
    }

    /// Rebuild a session from whatever `collaborators.store` holds.
    pub fn restore(
        config: SessionConfig,
        collaborators: SessionCollaborators,
    ) -> Result<Self, PersistError> {
        let turns = persistence::load_turns(collaborators.store.as_ref())?;
        let checkpoints = persistence::load_checkpoints(collaborators.store.as_ref())?;
        tracing::info!(
            turns = turns.len(),
            checkpoints = checkpoints.len(),
            "Session restored"
        );
        Ok(Self::with_state(
            config,
            collaborators,
            turns,
            CheckpointLedger::from_checkpoints(checkpoints),
        ))
    }

    fn with_state(
        config: SessionConfig,
        collaborators: SessionCollaborators,
        turns: Vec<ChatTurn>,
        ledger: CheckpointLedger,
    ) -> Self {
        let SessionCollaborators {
            events,
            terminal,
            notifier,
            presence,
            store,
        } = collaborators;
        let cancel = CancelFlag::new();
        let gate = ApprovalGate::new(
            config.approval,
            events.clone(),
            notifier,
            presence,
            cancel.clone(),
        );
        let pipeline = ToolPipeline::new(
            ToolRegistry::with_builtins(),
            gate,
            terminal,
            config.terminal,
            cancel.clone(),
        );
        Self {
            id: SessionId::new(uuid::Uuid::new_v4().to_string()),
            api: config.api,
            working_dir: config.working_dir,
            system_prompt: config.system_prompt,
            turns,
            ledger,
            usage: UsageLedger::new(),
            counter: TokenCounter::new(),
            pipeline,
            events,
            cancel,
            store,
            stream_settings: config.stream,
            stream_task: None,
        }
    }

    #[must_use]
    pub fn id(&self) -> &SessionId {
        &self.id
    }

    #[must_use]
    pub fn api(&self) -> &ApiConfig {
        &self.api
    }

    #[must_use]
    pub fn working_dir(&self) -> &Path {
        &self.working_dir
    }

    #[must_use]
    pub fn turns(&self) -> &[ChatTurn] {
        &self.turns
    }

    #[must_use]
    pub fn usage(&self) -> &UsageLedger {
        &self.usage
    }

    #[must_use]
    pub fn ledger(&self) -> &CheckpointLedger {
        &self.ledger
    }

    #[must_use]
    pub fn tools(&self) -> &ToolRegistry {
        self.pipeline.registry()
    }

    /// Handle the UI uses to answer approval requests.
    #[must_use]
    pub fn resolver(&self) -> ApprovalResolver {
        self.pipeline.gate().resolver()
    }

    /// Shared stop flag; setting it ends streaming, approvals and command waits.
    #[must_use]
    pub fn cancel_flag(&self) -> CancelFlag {
        self.cancel.clone()
    }

    fn push_turn(&mut self, turn: ChatTurn) -> usize {
        let index = self.turns.len();
        self.turns.push(turn.clone());
        self.events.emit(SessionEvent::TurnAppended { index, turn });
        index
    }

    /// Returns the number of turns removed.
    fn truncate_turns(&mut self, len: usize) -> usize {
        let removed = self.turns.len().saturating_sub(len);
        self.turns.truncate(len);
        self.events.emit(SessionEvent::TurnsTruncated {
            len: self.turns.len(),
        });
        removed
    }

    fn persist(&self) {
        if let Err(e) = self.save() {
            tracing::warn!("Failed to persist session: {e}");
        }
    }

    /// Write turns and finalized checkpoints to the store.
    pub fn save(&self) -> Result<(), PersistError> {
        persistence::save_turns(self.store.as_ref(), &self.turns)?;
        persistence::save_checkpoints(self.store.as_ref(), self.ledger.checkpoints())
    }

    /// Append a user turn and open its checkpoint. Returns the turn index.
    pub fn submit_user_message(&mut self, text: &str, context: Vec<ContextSnippet>) -> usize {
        self.cancel.reset();
        let now = SystemTime::now();
        let index = self.turns.len();
        if let Some(finalized) = self.ledger.begin(index, text, now) {
            self.events.emit(SessionEvent::CheckpointFinalized {
                message_index: finalized,
            });
        }
        self.push_turn(ChatTurn::user(text, now).with_context(context));
        self.persist();
        index
    }

    /// Stream one assistant reply into a new turn.
    ///
    /// Cancellation is not an error: the partial text is kept and
    /// `StreamOutcome::cancelled` is set. On failure the turn keeps whatever
    /// arrived and carries an error event.
    pub async fn stream_reply(&mut self) -> Result<StreamOutcome, StreamError> {
        let provider = self.api.provider();
        let prompt_turns = self.turns.clone();
        let prompt_tokens =
            self.counter
                .estimate_turns(provider, self.system_prompt.as_deref(), &prompt_turns);
        let index = self.push_turn(ChatTurn::assistant("", SystemTime::now()));

        let (tx, rx) = mpsc::channel(STREAM_EVENT_CHANNEL_CAPACITY);
        let config = self.api.clone();
        let system_prompt = self.system_prompt.clone();
        self.stream_task = Some(tokio::spawn(async move {
            let error_tx = tx.clone();
            let request = SendMessageRequest {
                config: &config,
                turns: &prompt_turns,
                system_prompt: system_prompt.as_deref(),
                tx,
            };
            if let Err(e) = send_message(request).await {
                tracing::warn!(provider = config.provider().as_str(), "Request failed: {e}");
                let _ = error_tx.send(StreamEvent::Error(e.to_failure())).await;
            }
        }));

        let normalizer = StreamNormalizer::new(
            provider,
            self.stream_settings,
            self.cancel.clone(),
            self.counter,
        );
        let turns = &mut self.turns;
        let events = &self.events;
        let mut target_missing = false;
        let result = normalizer
            .run(rx, prompt_tokens, |text| match turns.get_mut(index) {
                Some(turn) => {
                    if turn.content != text {
                        turn.content = text.to_string();
                        events.emit(SessionEvent::TurnUpdated {
                            index,
                            turn: turn.clone(),
                        });
                    }
                }
                None => target_missing = true,
            })
            .await;

        if let Some(task) = self.stream_task.take() {
            task.abort();
        }
        if target_missing {
            return Err(StreamError::TargetTurnMissing(index));
        }

        match result {
            Ok(outcome) => {
                let model = self.api.model().to_string();
                let entry = if outcome.usage_estimated {
                    self.usage.record_estimated(provider, &model, outcome.usage)
                } else {
                    self.usage.record_reported(provider, &model, outcome.usage)
                }
                .clone();
                self.events.emit(SessionEvent::UsageRecorded(entry));
                self.persist();
                Ok(outcome)
            }
            Err(e) => {
                if let StreamError::Provider { failure, .. } = &e
                    && let Some(turn) = self.turns.get_mut(index)
                {
                    let mut event = AgentEvent::new(AgentEventKind::Error, failure.message.clone())
                        .with_status(ExecutionStatus::Failed);
                    event.details.clone_from(&failure.detail);
                    turn.event = Some(event);
                    self.events.emit(SessionEvent::TurnUpdated {
                        index,
                        turn: turn.clone(),
                    });
                }
                self.persist();
                Err(e)
            }
        }
    }

    /// Run one tool call through approval, snapshot and execution.
    pub async fn execute_tool(&mut self, invocation: ToolInvocation) -> ToolResult {
        let mut observer = TurnObserver {
            turns: &mut self.turns,
            events: &self.events,
            index: None,
        };
        let run = ToolRun {
            session_id: &self.id,
            working_dir: &self.working_dir,
            ledger: &mut self.ledger,
            observer: &mut observer,
        };
        let result = self.pipeline.execute(run, invocation).await;
        self.persist();
        result
    }

    /// Signal every open wait to stop and drop any in-flight provider request.
    pub fn stop(&mut self) {
        self.cancel.cancel();
        if let Some(task) = self.stream_task.take() {
            task.abort();
        }
    }

    /// Finalize the active checkpoint and flush to the store.
    pub fn end(&mut self) -> Result<(), PersistError> {
        if let Some(message_index) = self.ledger.finalize() {
            self.events
                .emit(SessionEvent::CheckpointFinalized { message_index });
        }
        self.save()
    }

    /// Restore files to their state before the turn at `message_index` and
    /// drop everything from there on.
    ///
    /// The user turn itself is kept unless `remove_user_message`.
    pub fn rollback_to_checkpoint(
        &mut self,
        message_index: usize,
        remove_user_message: bool,
    ) -> RollbackResult {
        self.stop();
        let Some(plan) = self.ledger.rollback_plan(message_index) else {
            tracing::warn!(message_index, "Rollback requested for unknown checkpoint");
            self.cancel.reset();
            return RollbackResult::failed_without_changes();
        };

        let (restored, failed) = restore_snapshots(&plan);
        let keep = if remove_user_message {
            message_index
        } else {
            message_index + 1
        };
        let turns_removed = self.truncate_turns(keep);
        self.ledger.discard_from(message_index);
        self.usage.reset();
        self.persist();
        self.cancel.reset();

        tracing::info!(
            message_index,
            restored = restored.len(),
            failed = failed.len(),
            turns_removed,
            "Rolled back to checkpoint"
        );
        RollbackResult {
            success: failed.is_empty(),
            restored,
            failed,
            turns_removed,
            irreversible_commands: plan.commands,
        }
    }

    /// Replace the prompt at `message_index` with `prompt`, keeping the files
    /// as they are now. Returns the new turn index, or `None` when no
    /// checkpoint is anchored there.
    pub fn branch_from_checkpoint(&mut self, message_index: usize, prompt: &str) -> Option<usize> {
        self.stop();
        if self.ledger.checkpoint_for_turn(message_index).is_none() {
            tracing::warn!(message_index, "Branch requested for unknown checkpoint");
            self.cancel.reset();
            return None;
        }
        let turns_removed = self.truncate_turns(message_index);
        self.ledger.discard_from(message_index);
        self.usage.reset();
        tracing::info!(message_index, turns_removed, "Branched from checkpoint");
        Some(self.submit_user_message(prompt, Vec::new()))
    }

    #[must_use]
    pub fn checkpoints(&self) -> &[Checkpoint] {
        self.ledger.checkpoints()
    }

    #[must_use]
    pub fn changed_paths_since(&self, message_index: usize) -> Vec<PathBuf> {
        self.ledger.changed_paths_since(message_index)
    }

    #[must_use]
    pub fn diff_between(&self, from: usize, to: Option<usize>) -> Vec<PathDiff> {
        self.ledger.diff_between(from, to)
    }

    #[must_use]
    pub fn file_change_history(&self) -> Vec<FileChangeEntry> {
        history::file_change_history(&self.turns)
    }

    #[must_use]
    pub fn previous_change(&self, id: &ChangeId) -> Option<FileChangeEntry> {
        history::previous_change(&self.turns, id)
    }

    #[must_use]
    pub fn next_change(&self, id: &ChangeId) -> Option<FileChangeEntry> {
        history::next_change(&self.turns, id)
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if let Some(task) = self.stream_task.take() {
            task.abort();
        }
    }
}
