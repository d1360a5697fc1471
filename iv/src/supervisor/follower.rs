//! Producer log follower
//!
//! Owns the child process returned by the runtime's launch. One reader task
//! per pipe feeds lines into [`SupervisorState`]; a waiter task reaps the child
//! and marks the run exited.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Child;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::payload::PayloadMatcher;
use super::state::SupervisorState;

/// Running log follower for one producer run
#[derive(Debug)]
pub struct LogFollower {
    pid: Option<u32>,
    run_id: u64,
    kill_tx: Option<oneshot::Sender<()>>,
    waiter: JoinHandle<()>,
    readers: Vec<JoinHandle<()>>,
}

impl LogFollower {
    /// Start following `child`'s stdout and stderr
    pub fn spawn(
        mut child: Child,
        state: Arc<Mutex<SupervisorState>>,
        matcher: Arc<PayloadMatcher>,
        run_id: u64,
    ) -> Self {
        let pid = child.id();
        debug!(?pid, run_id, "LogFollower::spawn: called");

        let mut readers = Vec::new();
        if let Some(stdout) = child.stdout.take() {
            readers.push(tokio::spawn(read_log(stdout, state.clone(), matcher.clone(), run_id)));
        }
        if let Some(stderr) = child.stderr.take() {
            readers.push(tokio::spawn(read_log(stderr, state.clone(), matcher, run_id)));
        }

        let (kill_tx, kill_rx) = oneshot::channel::<()>();
        let waiter = tokio::spawn(async move {
            tokio::select! {
                status = child.wait() => match status {
                    Ok(status) => info!(?pid, %status, "Log follower exited"),
                    Err(e) => warn!(?pid, error = %e, "Failed to wait for log follower"),
                },
                _ = kill_rx => {
                    if let Err(e) = child.kill().await {
                        warn!(?pid, error = %e, "Failed to kill log follower");
                    }
                }
            }
            state
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner())
                .mark_exited(run_id);
        });

        Self {
            pid,
            run_id,
            kill_tx: Some(kill_tx),
            waiter,
            readers,
        }
    }

    /// Terminate gracefully, killing after `grace` if still running
    pub async fn terminate(mut self, grace: Duration) {
        debug!(pid = ?self.pid, ?grace, "LogFollower::terminate: called");
        if self.waiter.is_finished() {
            debug!("LogFollower::terminate: already exited");
        } else {
            if let Some(pid) = self.pid {
                use nix::sys::signal::{Signal, kill};
                use nix::unistd::Pid;
                debug!(pid, "LogFollower::terminate: sending SIGTERM");
                if let Err(e) = kill(Pid::from_raw(pid as i32), Signal::SIGTERM) {
                    debug!(pid, error = %e, "LogFollower::terminate: SIGTERM failed");
                }
            }

            if tokio::time::timeout(grace, &mut self.waiter).await.is_err() {
                warn!(pid = ?self.pid, "Log follower did not stop gracefully, killing");
                if let Some(kill_tx) = self.kill_tx.take() {
                    let _ = kill_tx.send(());
                }
                let _ = (&mut self.waiter).await;
            }
        }

        // pipes may be held open by grandchildren
        for reader in self.readers.drain(..) {
            reader.abort();
        }
        info!(pid = ?self.pid, run_id = self.run_id, "Log follower terminated");
    }
}

impl Drop for LogFollower {
    fn drop(&mut self) {
        for reader in &self.readers {
            reader.abort();
        }
    }
}

/// Read producer log lines from one pipe until EOF
async fn read_log<R>(pipe: R, state: Arc<Mutex<SupervisorState>>, matcher: Arc<PayloadMatcher>, run_id: u64)
where
    R: AsyncRead + Unpin,
{
    let mut segments = BufReader::new(pipe).split(b'\n');
    loop {
        match segments.next_segment().await {
            Ok(Some(bytes)) => {
                let line = String::from_utf8_lossy(&bytes);
                let line = line.trim_end();
                if line.is_empty() {
                    continue;
                }
                state
                    .lock()
                    .unwrap_or_else(|poisoned| poisoned.into_inner())
                    .record_line(run_id, line, &matcher);
            }
            Ok(None) => break,
            Err(e) => {
                warn!(run_id, error = %e, "Failed to read producer log");
                break;
            }
        }
    }
    debug!(run_id, "read_log: pipe closed");
}
