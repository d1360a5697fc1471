//! Supervisor implementation

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::Utc;
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, error, info, warn};

use super::follower::LogFollower;
use super::payload::PayloadMatcher;
use super::state::{STATUS_LOG_LINES, SupervisorState};
use super::{StartOptions, StartOutcome, StatusReport};
use crate::cache::EventCache;
use crate::config::Config;
use crate::error::SupervisorError;
use crate::runtime::ProducerRuntime;
use crate::tail::ensure_source_file;

/// Polling step while waiting for the first payload of a run
const PAYLOAD_POLL: Duration = Duration::from_millis(50);

/// Starts, stops and observes the external producer
pub struct Supervisor {
    runtime: Arc<dyn ProducerRuntime>,
    cache: Arc<EventCache>,
    source_file: PathBuf,
    default_server: String,
    grace_period: Duration,
    payload_wait: Duration,
    matcher: Arc<PayloadMatcher>,
    state: Arc<Mutex<SupervisorState>>,
    /// Held for the whole of every control operation
    follower: AsyncMutex<Option<LogFollower>>,
}

impl Supervisor {
    pub fn new(runtime: Arc<dyn ProducerRuntime>, cache: Arc<EventCache>, config: &Config) -> Result<Self, regex::Error> {
        debug!(runtime = runtime.name(), "Supervisor::new: called");
        Ok(Self {
            runtime,
            cache,
            source_file: config.source_file(),
            default_server: config.producer.default_server.clone(),
            grace_period: config.producer.grace_period(),
            payload_wait: config.producer.payload_wait(),
            matcher: Arc::new(PayloadMatcher::from_config(&config.producer)?),
            state: Arc::new(Mutex::new(SupervisorState::default())),
            follower: AsyncMutex::new(None),
        })
    }

    fn lock_state(&self) -> MutexGuard<'_, SupervisorState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn source_file(&self) -> &Path {
        &self.source_file
    }

    /// Start the producer
    ///
    /// A no-op returning the current payload if a producer is alive and
    /// `force` is not set. On launch failure the state is back to Stopped.
    pub async fn start(&self, options: StartOptions) -> Result<StartOutcome, SupervisorError> {
        debug!(?options, "Supervisor::start: called");
        let mut follower = self.follower.lock().await;
        self.start_locked(&mut follower, options).await
    }

    /// Stop the producer; always ends Stopped
    pub async fn stop(&self) {
        debug!("Supervisor::stop: called");
        let mut follower = self.follower.lock().await;
        self.stop_locked(&mut follower).await;
    }

    /// Stop, then force-start; `truncate` defaults to true
    pub async fn restart(&self, server: Option<String>, truncate: Option<bool>) -> Result<StartOutcome, SupervisorError> {
        debug!(?server, ?truncate, "Supervisor::restart: called");
        let mut follower = self.follower.lock().await;
        self.stop_locked(&mut follower).await;
        let options = StartOptions {
            server,
            truncate: truncate.unwrap_or(true),
            force: true,
        };
        self.start_locked(&mut follower, options).await
    }

    /// Current producer status, with liveness queried from the runtime
    pub async fn status(&self) -> StatusReport {
        debug!("Supervisor::status: called");
        let running = self.runtime.is_alive().await;
        let (captured, started_at, log_tail) = {
            let state = self.lock_state();
            (state.payload.clone(), state.started_at, state.recent_lines(STATUS_LOG_LINES))
        };

        let payload = match captured {
            Some(payload) => Some(payload),
            None => self.matcher.scan(&self.cache, &self.source_file).await,
        };

        StatusReport {
            running,
            payload,
            started_at,
            log_tail,
        }
    }

    /// Captured payload, else the best-effort scan of recorded events
    pub async fn payload(&self) -> Option<String> {
        let captured = self.lock_state().payload.clone();
        match captured {
            Some(payload) => Some(payload),
            None => self.matcher.scan(&self.cache, &self.source_file).await,
        }
    }

    /// Terminate the log follower without removing the producer
    pub async fn shutdown(&self) {
        debug!("Supervisor::shutdown: called");
        let mut follower = self.follower.lock().await;
        if let Some(current) = follower.take() {
            current.terminate(self.grace_period).await;
        }
    }

    async fn start_locked(
        &self,
        follower: &mut Option<LogFollower>,
        options: StartOptions,
    ) -> Result<StartOutcome, SupervisorError> {
        if !options.force && self.runtime.is_alive().await {
            let payload = self.payload().await;
            info!(?payload, "Producer already running");
            return Ok(StartOutcome::AlreadyRunning { payload });
        }

        if let Some(previous) = follower.take() {
            previous.terminate(self.grace_period).await;
        }
        let removed = self.runtime.remove().await;
        debug!(ok = removed.ok, "Supervisor::start_locked: removed stale producer");

        if options.truncate {
            // file first, then cache; tailers rewind on the generation bump
            if let Err(source) = tokio::fs::write(&self.source_file, b"").await {
                self.lock_state().reset();
                error!(path = ?self.source_file, error = %source, "Failed to truncate source file");
                return Err(SupervisorError::Truncate {
                    path: self.source_file.clone(),
                    source,
                });
            }
            self.cache.clear();
        }
        if let Err(e) = ensure_source_file(&self.source_file).await {
            warn!(path = ?self.source_file, error = %e, "Failed to create source file");
        }

        let server = options
            .server
            .filter(|server| !server.is_empty())
            .unwrap_or_else(|| self.default_server.clone());
        info!(%server, runtime = self.runtime.name(), "Launching producer");

        let child = match self.runtime.launch(&server).await {
            Ok(child) => child,
            Err(e) => {
                self.lock_state().reset();
                error!(error = %e, "Failed to launch producer");
                return Err(e);
            }
        };

        let run_id = self.lock_state().begin_run(Utc::now());
        *follower = Some(LogFollower::spawn(child, self.state.clone(), self.matcher.clone(), run_id));

        let payload = self.wait_for_payload(run_id).await;
        info!(?payload, run_id, "Producer started");
        Ok(StartOutcome::Started { payload })
    }

    async fn stop_locked(&self, follower: &mut Option<LogFollower>) {
        if let Some(current) = follower.take() {
            current.terminate(self.grace_period).await;
        }
        let removed = self.runtime.remove().await;
        self.lock_state().reset();
        info!(removed = removed.ok, "Producer stopped");
    }

    /// Wait up to the configured time for the run's first payload
    async fn wait_for_payload(&self, run_id: u64) -> Option<String> {
        let deadline = tokio::time::Instant::now() + self.payload_wait;
        loop {
            {
                let state = self.lock_state();
                if state.run_id() != run_id {
                    return None;
                }
                if state.payload.is_some() || !state.running {
                    return state.payload.clone();
                }
            }
            if tokio::time::Instant::now() >= deadline {
                debug!(run_id, "Supervisor::wait_for_payload: no payload yet");
                return None;
            }
            tokio::time::sleep(PAYLOAD_POLL).await;
        }
    }
}
