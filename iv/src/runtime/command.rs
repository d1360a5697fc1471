//! One-shot runtime command execution

use std::process::Stdio;
use std::time::Duration;

use tokio::process::Command;
use tracing::{debug, warn};

/// Default timeout for one-shot runtime commands
pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(25);

/// Uniform result of a runtime command
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutcome {
    /// Exited with status zero
    pub ok: bool,

    /// Trimmed standard output
    pub stdout: String,

    /// Trimmed standard error, or the spawn/timeout failure text
    pub stderr: String,

    /// The program itself could not be found
    pub missing_executable: bool,
}

impl CommandOutcome {
    fn failed(message: String, missing_executable: bool) -> Self {
        Self {
            ok: false,
            stdout: String::new(),
            stderr: message,
            missing_executable,
        }
    }

    /// Best description of a failure: stderr if present, else stdout
    pub fn message(&self) -> &str {
        if self.stderr.is_empty() { &self.stdout } else { &self.stderr }
    }
}

/// Run `argv` to completion, capturing output, bounded by `timeout`
///
/// Never fails: spawn errors and timeouts become a failed outcome.
pub async fn run_command(argv: &[String], timeout: Duration) -> CommandOutcome {
    debug!(?argv, ?timeout, "run_command: called");
    let Some((program, args)) = argv.split_first() else {
        return CommandOutcome::failed("empty command".to_string(), false);
    };

    let mut command = Command::new(program);
    command
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let output = match tokio::time::timeout(timeout, command.output()).await {
        Ok(Ok(output)) => output,
        Ok(Err(e)) => {
            let missing = e.kind() == std::io::ErrorKind::NotFound;
            warn!(%program, error = %e, "Failed to run runtime command");
            return CommandOutcome::failed(format!("{program}: {e}"), missing);
        }
        Err(_) => {
            warn!(%program, ?timeout, "Runtime command timed out");
            return CommandOutcome::failed(format!("{program}: timed out after {timeout:?}"), false);
        }
    };

    let outcome = CommandOutcome {
        ok: output.status.success(),
        stdout: String::from_utf8_lossy(&output.stdout).trim().to_string(),
        stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        missing_executable: false,
    };
    debug!(ok = outcome.ok, status = ?output.status.code(), "run_command: finished");
    outcome
}
