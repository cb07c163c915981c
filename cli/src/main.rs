//! Tether CLI - binary entry point.
//!
//! Wires one [`tether_engine::Session`] to stdin/stdout:
//!
//! ```text
//! main() -> config + args -> Session::restore -> repl::run()
//!                 |                                  |
//!                 v                                  v
//!       terminal executor task            session events / stdin lines
//! ```

mod repl;
mod terminal;

use std::fs::{self, OpenOptions};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::{env, process};

use anyhow::{Context, Result, bail};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use tether_engine::config::config_path;
use tether_engine::tether_types::Provider;
use tether_engine::{
    BlobStore, EventSink, FileBlobStore, MemoryBlobStore, NoopNotifier, Session,
    SessionCollaborators, SessionConfig, TerminalBridge, TetherConfig, UiPresence,
};

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("info"))
        .unwrap_or_else(|_| EnvFilter::new("warn"));

    let (log_file, init_warnings) = open_log_file();

    if let Some((log_path, file)) = log_file {
        tracing_subscriber::registry()
            .with(fmt::layer().with_ansi(false).with_writer(Mutex::new(file)))
            .with(env_filter)
            .init();

        tracing::info!(path = %log_path.display(), "Logging initialized");
        for warning in init_warnings {
            tracing::warn!("{warning}");
        }
        return;
    }

    // Stdout is the conversation; no log file means no logs.
    tracing_subscriber::registry().with(env_filter).init();
}

fn open_log_file() -> (Option<(PathBuf, fs::File)>, Vec<String>) {
    let mut warnings = Vec::new();

    for candidate in log_file_candidates() {
        if let Some(parent) = candidate.parent()
            && let Err(e) = fs::create_dir_all(parent)
        {
            warnings.push(format!(
                "Failed to create log dir {}: {e}",
                parent.display()
            ));
            continue;
        }

        match OpenOptions::new().create(true).append(true).open(&candidate) {
            Ok(file) => return (Some((candidate, file)), warnings),
            Err(e) => {
                warnings.push(format!(
                    "Failed to open log file {}: {e}",
                    candidate.display()
                ));
            }
        }
    }

    (None, warnings)
}

fn log_file_candidates() -> Vec<PathBuf> {
    let mut candidates = Vec::new();

    // ~/.tether/logs/tether.log
    if let Some(config_path) = config_path()
        && let Some(config_dir) = config_path.parent()
    {
        candidates.push(config_dir.join("logs").join("tether.log"));
    }

    candidates.push(PathBuf::from(".tether").join("logs").join("tether.log"));
    candidates
}

const USAGE: &str = "\
usage: tether [--provider P] [--model M] [--cwd DIR] [--session NAME]

  --provider   local | openai | anthropic | google
  --model      model name (defaults per provider)
  --cwd        working directory for file tools and commands
  --session    resume or create a named session";

#[derive(Debug, Default)]
struct Args {
    provider: Option<String>,
    model: Option<String>,
    cwd: Option<PathBuf>,
    session: Option<String>,
}

impl Args {
    fn parse(mut raw: impl Iterator<Item = String>) -> Result<Option<Self>> {
        let mut args = Self::default();
        while let Some(flag) = raw.next() {
            let mut value = || {
                raw.next()
                    .with_context(|| format!("{flag} expects a value"))
            };
            match flag.as_str() {
                "--provider" => args.provider = Some(value()?),
                "--model" => args.model = Some(value()?),
                "--cwd" => args.cwd = Some(PathBuf::from(value()?)),
                "--session" => args.session = Some(value()?),
                "-h" | "--help" => return Ok(None),
                other => bail!("unknown argument: {other}\n\n{USAGE}"),
            }
        }
        Ok(Some(args))
    }
}

fn session_store(name: &str) -> Arc<dyn BlobStore> {
    match FileBlobStore::for_session(name) {
        Some(store) => {
            tracing::info!(dir = %store.dir().display(), "Session store");
            Arc::new(store)
        }
        None => {
            tracing::warn!("No home directory; session will not be saved");
            Arc::new(MemoryBlobStore::new())
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let Some(args) = Args::parse(env::args().skip(1))? else {
        println!("{USAGE}");
        return Ok(());
    };
    init_tracing();

    let config = TetherConfig::load()?.unwrap_or_default();
    let provider = match args.provider.as_deref() {
        Some(raw) => Provider::parse(raw)?,
        None => config.provider()?,
    };
    let model = args.model.unwrap_or_else(|| config.model(provider));
    let api = match config.api_config(provider, &model) {
        Ok(api) => api,
        Err(e) => {
            eprintln!("{}", e.friendly_message());
            process::exit(2);
        }
    };
    let working_dir = match args.cwd.or_else(|| config.working_dir()) {
        Some(dir) => dir,
        None => env::current_dir().context("cannot determine working directory")?,
    };

    let session_config = SessionConfig {
        system_prompt: config.system_prompt(),
        stream: config.stream_settings(),
        approval: config.approval_policy()?,
        terminal: config.terminal_settings(),
        ..SessionConfig::new(api, &working_dir)
    };

    let (events, event_rx) = EventSink::channel();
    let (bridge, requests) = TerminalBridge::new();
    tokio::spawn(terminal::run_executor(bridge.clone(), requests));

    let session_name = args
        .session
        .unwrap_or_else(|| chrono::Local::now().format("%Y%m%d-%H%M%S").to_string());
    let session = Session::restore(
        session_config,
        SessionCollaborators {
            events,
            terminal: Arc::new(bridge),
            notifier: Arc::new(NoopNotifier),
            presence: UiPresence::default(),
            store: session_store(&session_name),
        },
    )?;

    let cancel = session.cancel_flag();
    tokio::spawn(async move {
        while tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Interrupt received; cancelling");
            cancel.cancel();
        }
    });

    println!(
        "tether · {} · {} · {} (session {session_name})",
        provider.display_name(),
        model,
        working_dir.display()
    );
    repl::run(session, event_rx).await
}
