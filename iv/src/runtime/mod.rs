//! Producer runtime capability interface
//!
//! The supervisor drives the producer only through [`ProducerRuntime`], so its
//! state machine does not care whether the producer is a container managed by a
//! docker-compatible CLI or a plain child process.

mod command;
mod container;
mod local;

pub use command::{CommandOutcome, DEFAULT_COMMAND_TIMEOUT, run_command};
pub use container::ContainerRuntime;
pub use local::LocalRuntime;

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::process::Child;
use tracing::{debug, info};

use crate::config::{ProducerConfig, ProducerMode};
use crate::error::SupervisorError;

/// Capabilities the supervisor needs from a producer runtime
#[async_trait]
pub trait ProducerRuntime: Send + Sync {
    /// Short name for logs
    fn name(&self) -> &str;

    /// Query the runtime directly; failures read as not running
    async fn is_alive(&self) -> bool;

    /// Launch a producer instance writing to the source file
    ///
    /// Returns the process whose stdout/stderr carry the producer's log. It is
    /// the log follower the supervisor terminates on stop.
    async fn launch(&self, server: &str) -> Result<Child, SupervisorError>;

    /// Remove any producer instance, best-effort
    async fn remove(&self) -> CommandOutcome;
}

/// Result of probing an external tool
pub struct ToolCheck {
    pub name: String,
    pub available: bool,
    pub version: Option<String>,
}

impl ToolCheck {
    /// Check if a tool is available and get its version
    pub fn check(name: &str, version_args: &[&str]) -> Self {
        debug!(name, ?version_args, "ToolCheck::check: called");
        let result = std::process::Command::new(name).args(version_args).output();

        match result {
            Ok(output) if output.status.success() => {
                debug!(name, "ToolCheck::check: tool available");
                let version_str = String::from_utf8_lossy(&output.stdout);
                Self {
                    name: name.to_string(),
                    available: true,
                    version: Some(parse_version(&version_str)),
                }
            }
            _ => {
                debug!(name, "ToolCheck::check: tool not available");
                Self {
                    name: name.to_string(),
                    available: false,
                    version: None,
                }
            }
        }
    }
}

/// Extract the first version-like token from command output
fn parse_version(output: &str) -> String {
    for word in output.split_whitespace() {
        let word = word.trim_start_matches('v');
        if word.starts_with(|c: char| c.is_ascii_digit()) {
            let version: String = word.chars().take_while(|c| c.is_ascii_digit() || *c == '.').collect();
            if !version.is_empty() {
                return version;
            }
        }
    }
    "unknown".to_string()
}

/// Container runtimes probed in order when none is configured
pub const RUNTIME_CANDIDATES: &[&str] = &["docker", "podman"];

/// Probe every candidate runtime
pub fn check_runtimes() -> Vec<ToolCheck> {
    RUNTIME_CANDIDATES
        .iter()
        .map(|name| ToolCheck::check(name, &["--version"]))
        .collect()
}

/// Pick the container runtime binary
///
/// An explicit choice wins; otherwise the first available candidate, falling
/// back to `docker` so errors name a familiar binary.
pub fn discover_runtime_bin(explicit: Option<&str>) -> String {
    discover_with(explicit, |name| ToolCheck::check(name, &["--version"]).available)
}

fn discover_with<F>(explicit: Option<&str>, available: F) -> String
where
    F: Fn(&str) -> bool,
{
    if let Some(bin) = explicit.filter(|bin| !bin.is_empty()) {
        debug!(bin, "discover_runtime_bin: using configured runtime");
        return bin.to_string();
    }
    let bin = RUNTIME_CANDIDATES
        .iter()
        .copied()
        .find(|name| available(name))
        .unwrap_or("docker");
    debug!(bin, "discover_runtime_bin: discovered");
    bin.to_string()
}

/// Build the runtime selected by configuration
pub fn from_config(config: &ProducerConfig, data_dir: &Path, source_file: &Path) -> Arc<dyn ProducerRuntime> {
    match config.mode {
        ProducerMode::Container => {
            let bin = discover_runtime_bin(config.runtime_bin.as_deref());
            info!(%bin, name = %config.container_name, "Using container producer runtime");
            Arc::new(ContainerRuntime::new(bin, config, data_dir))
        }
        ProducerMode::Local => {
            info!(executable = %config.executable, "Using local producer runtime");
            Arc::new(LocalRuntime::new(config, source_file))
        }
    }
}
