//! Producer run as a container through a docker-compatible CLI

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::{Child, Command};
use tracing::{debug, info, warn};

use super::{CommandOutcome, ProducerRuntime, run_command};
use crate::config::ProducerConfig;
use crate::error::SupervisorError;

/// Container-backed producer
#[derive(Debug, Clone)]
pub struct ContainerRuntime {
    bin: String,
    sudo: bool,
    name: String,
    image: String,
    host_dir: PathBuf,
    container_data_file: String,
    command_timeout: Duration,
}

impl ContainerRuntime {
    pub fn new(bin: String, config: &ProducerConfig, host_dir: &Path) -> Self {
        debug!(%bin, sudo = config.sudo, "ContainerRuntime::new: called");
        Self {
            bin,
            sudo: config.sudo,
            name: config.container_name.clone(),
            image: config.image.clone(),
            host_dir: host_dir.to_path_buf(),
            container_data_file: config.container_data_file.clone(),
            command_timeout: config.command_timeout(),
        }
    }

    /// Full argv for a runtime subcommand, with the sudo prefix when enabled
    fn argv<I, S>(&self, args: I) -> Vec<String>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut argv = Vec::new();
        if self.sudo {
            argv.push("sudo".to_string());
        }
        argv.push(self.bin.clone());
        argv.extend(args.into_iter().map(Into::into));
        argv
    }

    fn run_args(&self, server: &str) -> Vec<String> {
        self.argv([
            "run".to_string(),
            "-d".to_string(),
            "--name".to_string(),
            self.name.clone(),
            "-v".to_string(),
            format!("{}:/data", self.host_dir.display()),
            self.image.clone(),
            "-server".to_string(),
            server.to_string(),
            "-json".to_string(),
            "-v".to_string(),
            "-o".to_string(),
            self.container_data_file.clone(),
        ])
    }

    /// Spawn `logs -f` as the log follower
    fn follow_logs(&self) -> Result<Child, SupervisorError> {
        let argv = self.argv(["logs", "-f", self.name.as_str()]);
        debug!(?argv, "ContainerRuntime::follow_logs: called");
        let (program, args) = argv
            .split_first()
            .ok_or_else(|| SupervisorError::Launch("empty log follower command".to_string()))?;

        Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                if e.kind() == std::io::ErrorKind::NotFound {
                    SupervisorError::ExecutableNotFound(program.clone())
                } else {
                    SupervisorError::Io(e)
                }
            })
    }

    /// Remove a started container whose log follower could not be spawned
    async fn abandon(&self, error: SupervisorError) -> SupervisorError {
        warn!(name = %self.name, error = %error, "No log follower for started container, removing it");
        self.remove().await;
        error
    }
}

#[async_trait]
impl ProducerRuntime for ContainerRuntime {
    fn name(&self) -> &str {
        "container"
    }

    async fn is_alive(&self) -> bool {
        let argv = self.argv(["inspect", "-f", "{{.State.Running}}", self.name.as_str()]);
        let outcome = run_command(&argv, self.command_timeout).await;
        let alive = outcome.ok && outcome.stdout.to_lowercase().starts_with("true");
        debug!(alive, "ContainerRuntime::is_alive: checked");
        alive
    }

    async fn launch(&self, server: &str) -> Result<Child, SupervisorError> {
        debug!(%server, name = %self.name, "ContainerRuntime::launch: called");
        let outcome = run_command(&self.run_args(server), self.command_timeout).await;
        if !outcome.ok {
            if outcome.missing_executable {
                return Err(SupervisorError::ExecutableNotFound(self.bin.clone()));
            }
            return Err(SupervisorError::Launch(outcome.message().to_string()));
        }

        info!(container = %outcome.stdout, name = %self.name, "Producer container started");
        match self.follow_logs() {
            Ok(child) => Ok(child),
            Err(e) => Err(self.abandon(e).await),
        }
    }

    async fn remove(&self) -> CommandOutcome {
        let outcome = run_command(&self.argv(["rm", "-f", self.name.as_str()]), self.command_timeout).await;
        if !outcome.ok {
            // usually "no such container"
            warn!(name = %self.name, message = outcome.message(), "Container removal reported failure");
        }
        outcome
    }
}
