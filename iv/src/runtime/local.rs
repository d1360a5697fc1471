//! Producer run as a direct child process
//!
//! The child handle goes to the log follower, which reaps it; this runtime only
//! keeps the PID and checks it is still its own child before signalling.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Mutex;

use async_trait::async_trait;
use tokio::process::{Child, Command};
use tracing::{debug, info};

use super::{CommandOutcome, ProducerRuntime};
use crate::config::ProducerConfig;
use crate::error::SupervisorError;

/// Child-process producer; its own output is the log stream
#[derive(Debug)]
pub struct LocalRuntime {
    executable: String,
    output_file: PathBuf,
    pid: Mutex<Option<u32>>,
}

impl LocalRuntime {
    pub fn new(config: &ProducerConfig, output_file: &Path) -> Self {
        debug!(executable = %config.executable, ?output_file, "LocalRuntime::new: called");
        Self {
            executable: config.executable.clone(),
            output_file: output_file.to_path_buf(),
            pid: Mutex::new(None),
        }
    }

    fn tracked_pid(&self) -> Option<u32> {
        *self.pid.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn set_pid(&self, pid: Option<u32>) {
        *self.pid.lock().unwrap_or_else(|poisoned| poisoned.into_inner()) = pid;
    }
}

/// Check that `pid` is still our own, unreaped, running child
///
/// Peeks with `WNOWAIT` so the log follower still reaps it. Once reaped the PID
/// is no longer our child and reads as not running, even if the OS reused it.
fn is_child_running(pid: u32) -> bool {
    use nix::sys::wait::{Id, WaitPidFlag, WaitStatus, waitid};
    use nix::unistd::Pid;
    let flags = WaitPidFlag::WEXITED | WaitPidFlag::WNOHANG | WaitPidFlag::WNOWAIT;
    let result = matches!(
        waitid(Id::Pid(Pid::from_raw(pid as i32)), flags),
        Ok(WaitStatus::StillAlive)
    );
    debug!(pid, result, "is_child_running: checked");
    result
}

#[async_trait]
impl ProducerRuntime for LocalRuntime {
    fn name(&self) -> &str {
        "local"
    }

    async fn is_alive(&self) -> bool {
        self.tracked_pid().is_some_and(is_child_running)
    }

    async fn launch(&self, server: &str) -> Result<Child, SupervisorError> {
        debug!(%server, executable = %self.executable, "LocalRuntime::launch: called");
        let child = Command::new(&self.executable)
            .arg("-server")
            .arg(server)
            .arg("-json")
            .arg("-v")
            .arg("-o")
            .arg(&self.output_file)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                if e.kind() == std::io::ErrorKind::NotFound {
                    SupervisorError::ExecutableNotFound(self.executable.clone())
                } else {
                    SupervisorError::Launch(e.to_string())
                }
            })?;

        self.set_pid(child.id());
        info!(pid = ?child.id(), "Producer process started");
        Ok(child)
    }

    async fn remove(&self) -> CommandOutcome {
        let pid = self.pid.lock().unwrap_or_else(|poisoned| poisoned.into_inner()).take();
        if let Some(pid) = pid
            && is_child_running(pid)
        {
            use nix::sys::signal::{Signal, kill};
            use nix::unistd::Pid;
            debug!(pid, "LocalRuntime::remove: sending SIGKILL");
            if let Err(e) = kill(Pid::from_raw(pid as i32), Signal::SIGKILL) {
                return CommandOutcome {
                    ok: false,
                    stderr: format!("kill {pid}: {e}"),
                    ..Default::default()
                };
            }
        }
        CommandOutcome {
            ok: true,
            ..Default::default()
        }
    }
}
