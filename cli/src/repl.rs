//! Line-oriented front end for one session.
//!
//! While the session is busy (streaming, waiting on approval, running a
//! command) stdin lines are treated as approval answers; otherwise they are
//! messages or slash commands.

use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::io::Write;

use anyhow::Result;
use serde_json::json;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;

use tether_engine::tether_types::{
    ApprovalDecision, ApprovalId, ApprovalPayload, ExecutionStatus, Role, ToolInvocation,
};
use tether_engine::{
    ApprovalResolution, ApprovalResolver, Session, SessionEvent, ToolExecutor,
    format_checkpoint_line,
};

const HELP: &str = "\
  <text>                      send a message
  /run <command>              run a shell command
  /write <path> <content>     write a file (\\n for newlines)
  /delete <path>              delete a file
  /checkpoints                list checkpoints
  /diff <n>                   changes since checkpoint n
  /rollback <n> [--drop-prompt]
  /branch <n> <prompt>        retry from checkpoint n keeping files
  /history                    file changes so far
  /quit
approvals: y | n | e <edited command> | p <partial content>";

#[derive(Debug, PartialEq, Eq)]
enum Input<'a> {
    Message(&'a str),
    Run(&'a str),
    Write { path: &'a str, content: String },
    Delete(&'a str),
    Checkpoints,
    Diff(usize),
    Rollback { index: usize, drop_prompt: bool },
    Branch { index: usize, prompt: &'a str },
    History,
    Help,
    Quit,
    Invalid(String),
}

fn unescape(text: &str) -> String {
    text.replace("\\n", "\n").replace("\\t", "\t")
}

fn parse_index(raw: Option<&str>, usage: &str) -> Result<usize, String> {
    raw.and_then(|n| n.parse().ok())
        .ok_or_else(|| format!("usage: {usage}"))
}

fn parse_input(line: &str) -> Input<'_> {
    let line = line.trim();
    let Some(command) = line.strip_prefix('/') else {
        return Input::Message(line);
    };
    let (name, rest) = command
        .split_once(char::is_whitespace)
        .map_or((command, ""), |(n, r)| (n, r.trim()));
    let parsed = match name {
        "run" if !rest.is_empty() => Ok(Input::Run(rest)),
        "write" => match rest.split_once(char::is_whitespace) {
            Some((path, content)) => Ok(Input::Write {
                path,
                content: unescape(content.trim_start()),
            }),
            None => Err("usage: /write <path> <content>".to_string()),
        },
        "delete" if !rest.is_empty() => Ok(Input::Delete(rest)),
        "checkpoints" => Ok(Input::Checkpoints),
        "diff" => parse_index(Some(rest), "/diff <n>").map(Input::Diff),
        "rollback" => {
            let mut parts = rest.split_whitespace();
            parse_index(parts.next(), "/rollback <n> [--drop-prompt]").map(|index| {
                Input::Rollback {
                    index,
                    drop_prompt: parts.any(|p| p == "--drop-prompt"),
                }
            })
        }
        "branch" => match rest.split_once(char::is_whitespace) {
            Some((n, prompt)) => {
                parse_index(Some(n), "/branch <n> <prompt>").map(|index| Input::Branch {
                    index,
                    prompt: prompt.trim(),
                })
            }
            None => Err("usage: /branch <n> <prompt>".to_string()),
        },
        "history" => Ok(Input::History),
        "help" => Ok(Input::Help),
        "quit" | "exit" => Ok(Input::Quit),
        "run" | "delete" => Err(format!("usage: /{name} <arg>")),
        other => Err(format!("unknown command /{other}; try /help")),
    };
    parsed.unwrap_or_else(Input::Invalid)
}

fn parse_answer(id: ApprovalId, line: &str) -> Option<ApprovalDecision> {
    let line = line.trim();
    let (head, rest) = line.split_once(' ').unwrap_or((line, ""));
    match head {
        "y" | "yes" => Some(ApprovalDecision::approve(id)),
        "n" | "no" => Some(ApprovalDecision::reject(id)),
        "e" if !rest.trim().is_empty() => Some(ApprovalDecision::approve_edited_command(id, rest.trim())),
        "p" if !rest.is_empty() => Some(ApprovalDecision::partial(id, unescape(rest))),
        _ => None,
    }
}

struct Ui {
    events: mpsc::UnboundedReceiver<SessionEvent>,
    lines: mpsc::UnboundedReceiver<String>,
    resolver: ApprovalResolver,
    pending: VecDeque<ApprovalId>,
    printed: HashMap<usize, usize>,
    statuses: HashMap<usize, ExecutionStatus>,
}

fn flush() {
    let _ = std::io::stdout().flush();
}

impl Ui {
    fn render(&mut self, event: SessionEvent) {
        match event {
            SessionEvent::ApprovalRequested(pending) => {
                match &pending.payload {
                    ApprovalPayload::FileChange { change } => println!(
                        "\n? {} {} via {} [y/n/p <content>]",
                        change.operation.as_str(),
                        change.path.display(),
                        pending.tool_name
                    ),
                    ApprovalPayload::Command { command } => {
                        println!("\n? run `{command}` [y/n/e <edited>]");
                    }
                }
                self.pending.push_back(pending.id);
            }
            SessionEvent::ApprovalResolved {
                approval_id,
                resolution,
            } => {
                self.pending.retain(|id| id != &approval_id);
                match resolution {
                    ApprovalResolution::TimedOut => println!("  approval timed out; treated as rejected"),
                    ApprovalResolution::Cancelled => println!("  approval cancelled"),
                    ApprovalResolution::Approved | ApprovalResolution::Rejected => {}
                }
            }
            SessionEvent::TurnAppended { index, turn } | SessionEvent::TurnUpdated { index, turn } => {
                if let Some(event) = &turn.event {
                    let Some(status) = event.status else { return };
                    if self.statuses.insert(index, status) != Some(status) {
                        println!("  • {} [{status:?}]", event.title);
                        if status.is_terminal()
                            && let Some(output) = event.output.as_deref().filter(|o| !o.is_empty())
                        {
                            println!("    {}", output.trim_end().replace('\n', "\n    "));
                        }
                    }
                } else if turn.role == Role::Assistant {
                    let printed = self.printed.entry(index).or_insert(0);
                    if let Some(delta) = turn.content.get(*printed..) {
                        print!("{delta}");
                        flush();
                        *printed = turn.content.len();
                    }
                }
            }
            SessionEvent::TurnsTruncated { len } => {
                self.printed.retain(|index, _| *index < len);
                self.statuses.retain(|index, _| *index < len);
            }
            SessionEvent::CheckpointFinalized { message_index } => {
                tracing::debug!(message_index, "Checkpoint finalized");
            }
            SessionEvent::UsageRecorded(entry) => {
                let marker = if entry.is_estimated { " (estimated)" } else { "" };
                println!(
                    "\n  [{} in / {} out tokens{marker}]",
                    entry.usage.input_tokens, entry.usage.output_tokens
                );
            }
        }
    }

    fn answer(&mut self, line: &str) {
        let Some(id) = self.pending.front().cloned() else {
            println!("  (busy; Ctrl-C to stop)");
            return;
        };
        match parse_answer(id, line) {
            Some(decision) => {
                if !self.resolver.resolve(decision) {
                    self.pending.pop_front();
                }
            }
            None => println!("  answer y, n, e <edited command> or p <content>"),
        }
    }

    /// Await `fut` while rendering events and routing stdin to approvals.
    async fn drive<F: Future>(&mut self, fut: F) -> F::Output {
        tokio::pin!(fut);
        loop {
            tokio::select! {
                out = &mut fut => {
                    while let Ok(event) = self.events.try_recv() {
                        self.render(event);
                    }
                    return out;
                }
                Some(event) = self.events.recv() => self.render(event),
                Some(line) = self.lines.recv() => self.answer(&line),
            }
        }
    }

    async fn next_line(&mut self) -> Option<String> {
        loop {
            tokio::select! {
                Some(event) = self.events.recv() => self.render(event),
                line = self.lines.recv() => return line,
            }
        }
    }
}

fn spawn_stdin_reader() -> mpsc::UnboundedReceiver<String> {
    let (tx, rx) = mpsc::unbounded_channel();
    tokio::spawn(async move {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => {
                    if tx.send(line).is_err() {
                        break;
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    tracing::warn!("stdin read failed: {e}");
                    break;
                }
            }
        }
    });
    rx
}

async fn reply(ui: &mut Ui, session: &mut Session) {
    match ui.drive(session.stream_reply()).await {
        Ok(outcome) if outcome.cancelled => println!("\n  [cancelled]"),
        Ok(_) => {}
        Err(e) => println!("\n  error: {e}"),
    }
}

fn invocation(counter: &mut u64, name: &str, args: serde_json::Value) -> ToolInvocation {
    *counter += 1;
    ToolInvocation::new(format!("cli-{counter}"), name, args)
}

pub async fn run(mut session: Session, events: mpsc::UnboundedReceiver<SessionEvent>) -> Result<()> {
    let mut ui = Ui {
        events,
        lines: spawn_stdin_reader(),
        resolver: session.resolver(),
        pending: VecDeque::new(),
        printed: HashMap::new(),
        statuses: HashMap::new(),
    };
    let mut calls = 0u64;
    println!("/help for commands");

    loop {
        print!("> ");
        flush();
        let Some(line) = ui.next_line().await else { break };
        if line.trim().is_empty() {
            continue;
        }
        match parse_input(&line) {
            Input::Message(text) => {
                session.submit_user_message(text, Vec::new());
                reply(&mut ui, &mut session).await;
            }
            Input::Run(command) => {
                let call = invocation(&mut calls, "run_command", json!({ "command": command }));
                ui.drive(session.execute_tool(call)).await;
            }
            Input::Write { path, content } => {
                let call = invocation(&mut calls, "write_file", json!({ "path": path, "content": content }));
                ui.drive(session.execute_tool(call)).await;
            }
            Input::Delete(path) => {
                let call = invocation(&mut calls, "delete_file", json!({ "path": path }));
                ui.drive(session.execute_tool(call)).await;
            }
            Input::Checkpoints => {
                if session.checkpoints().is_empty() && session.ledger().current().is_none() {
                    println!("  no checkpoints");
                }
                for checkpoint in session.checkpoints() {
                    println!("  {}", format_checkpoint_line(checkpoint));
                }
                if let Some(current) = session.ledger().current() {
                    println!("  {} (active)", format_checkpoint_line(current));
                }
            }
            Input::Diff(index) => {
                let diffs = session.diff_between(index, None);
                if diffs.is_empty() {
                    println!("  no changes since {index}");
                }
                for diff in diffs {
                    println!(
                        "  {} +{} -{}",
                        diff.path.display(),
                        diff.stats.additions,
                        diff.stats.deletions
                    );
                    print!("{}", diff.unified);
                }
            }
            Input::Rollback { index, drop_prompt } => {
                let result = session.rollback_to_checkpoint(index, drop_prompt);
                if result.restored.is_empty() && result.turns_removed == 0 && !result.success {
                    println!("  no checkpoint at {index}");
                    continue;
                }
                println!(
                    "  restored {} file(s), removed {} turn(s)",
                    result.restored.len(),
                    result.turns_removed
                );
                for (path, error) in &result.failed {
                    println!("  failed {}: {error}", path.display());
                }
                for command in &result.irreversible_commands {
                    println!("  not undone: {command}");
                }
            }
            Input::Branch { index, prompt } => {
                if session.branch_from_checkpoint(index, prompt).is_some() {
                    reply(&mut ui, &mut session).await;
                } else {
                    println!("  no checkpoint at {index}");
                }
            }
            Input::History => {
                let history = session.file_change_history();
                if history.is_empty() {
                    println!("  no file changes");
                }
                for entry in history {
                    println!(
                        "  [{}] {} {} ({})",
                        entry.turn_index,
                        entry.change.operation.as_str(),
                        entry.change.path.display(),
                        entry.change.id
                    );
                }
            }
            Input::Help => {
                println!("{HELP}");
                let tools = session.tools();
                for name in tools.names() {
                    if let Ok(tool) = tools.lookup(name) {
                        println!("  tool {name}: {}", tool.description());
                    }
                }
            }
            Input::Quit => break,
            Input::Invalid(message) => println!("  {message}"),
        }
    }

    session.end()?;
    Ok(())
}
