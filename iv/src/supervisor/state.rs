//! Supervisor state shared with the log follower

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use tracing::{debug, info};

use super::payload::PayloadMatcher;

/// Producer log lines retained
pub const LOG_TAIL_CAPACITY: usize = 200;

/// Log lines reported by status
pub const STATUS_LOG_LINES: usize = 30;

/// Tracked producer state
///
/// Every run gets a fresh `run_id`; updates from a follower of an older run are
/// ignored so a slow reader cannot leak lines or a payload into the next run.
#[derive(Debug, Default)]
pub struct SupervisorState {
    pub running: bool,
    pub payload: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub log_tail: VecDeque<String>,
    run_id: u64,
}

impl SupervisorState {
    pub fn run_id(&self) -> u64 {
        self.run_id
    }

    /// Reset for a freshly launched producer and return the new run id
    pub fn begin_run(&mut self, now: DateTime<Utc>) -> u64 {
        self.run_id += 1;
        self.running = true;
        self.payload = None;
        self.started_at = Some(now);
        self.log_tail.clear();
        debug!(run_id = self.run_id, "SupervisorState::begin_run: called");
        self.run_id
    }

    /// Back to Stopped with nothing tracked
    pub fn reset(&mut self) {
        self.run_id += 1;
        self.running = false;
        self.payload = None;
        self.started_at = None;
        self.log_tail.clear();
        debug!(run_id = self.run_id, "SupervisorState::reset: called");
    }

    /// Record one producer log line; the first payload match per run wins
    pub fn record_line(&mut self, run_id: u64, line: &str, matcher: &PayloadMatcher) {
        if run_id != self.run_id || line.is_empty() {
            return;
        }

        self.log_tail.push_back(line.to_string());
        while self.log_tail.len() > LOG_TAIL_CAPACITY {
            self.log_tail.pop_front();
        }

        if self.payload.is_none()
            && let Some(payload) = matcher.find(line)
        {
            info!(%payload, "Captured payload from producer log");
            self.payload = Some(payload);
        }
    }

    /// The follower of `run_id` exited
    pub fn mark_exited(&mut self, run_id: u64) {
        if run_id == self.run_id {
            self.running = false;
        }
    }

    /// The most recent `n` log lines, oldest first
    pub fn recent_lines(&self, n: usize) -> Vec<String> {
        let skip = self.log_tail.len().saturating_sub(n);
        self.log_tail.iter().skip(skip).cloned().collect()
    }
}
