//! Local process executor behind the session's terminal bridge.

use std::process::Stdio;

use tokio::process::Command;
use tokio::sync::mpsc;

use tether_engine::{CommandFinished, CommandRequest, TerminalBridge};

#[cfg(windows)]
fn shell(command: &str) -> Command {
    let mut cmd = Command::new("cmd");
    cmd.arg("/C").arg(command);
    cmd
}

#[cfg(not(windows))]
fn shell(command: &str) -> Command {
    let mut cmd = Command::new("sh");
    cmd.arg("-c").arg(command);
    cmd
}

async fn execute(request: &CommandRequest) -> (String, Option<i32>) {
    println!("$ {}", request.command);
    let output = shell(&request.command)
        .current_dir(&request.working_dir)
        .stdin(Stdio::null())
        .kill_on_drop(true)
        .output()
        .await;
    match output {
        Ok(out) => {
            let mut text = String::from_utf8_lossy(&out.stdout).into_owned();
            text.push_str(&String::from_utf8_lossy(&out.stderr));
            (text, out.status.code())
        }
        Err(e) => {
            tracing::warn!(command = %request.command, "Failed to spawn: {e}");
            (format!("failed to start command: {e}"), Some(127))
        }
    }
}

/// Run dispatched commands one at a time and publish their completion.
pub async fn run_executor(bridge: TerminalBridge, mut requests: mpsc::UnboundedReceiver<CommandRequest>) {
    while let Some(request) = requests.recv().await {
        let (output, exit_code) = execute(&request).await;
        tracing::debug!(command = %request.command, ?exit_code, "Command finished");
        bridge.publish(CommandFinished {
            command: request.command,
            session_id: request.session_id,
            output,
            exit_code,
        });
    }
}
