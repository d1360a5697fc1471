//! Process supervisor for the external producer
//!
//! State machine over Stopped and Running (a failed start returns to Stopped).
//! Control operations are serialized; status reads never wait on them.

mod core;
mod follower;
mod payload;
mod state;

pub use core::Supervisor;
pub use follower::LogFollower;
pub use payload::{FALLBACK_SCAN_LINES, PayloadMatcher};
pub use state::{LOG_TAIL_CAPACITY, STATUS_LOG_LINES, SupervisorState};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Options for starting the producer
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StartOptions {
    /// Upstream server; the configured default when absent
    pub server: Option<String>,

    /// Truncate the source file and clear the cache first
    pub truncate: bool,

    /// Relaunch even if a producer is alive
    pub force: bool,
}

impl Default for StartOptions {
    fn default() -> Self {
        Self {
            server: None,
            truncate: true,
            force: false,
        }
    }
}

/// What `start` did
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StartOutcome {
    /// A producer was alive and `force` was not set; nothing changed
    AlreadyRunning { payload: Option<String> },
    /// A new producer was launched
    Started { payload: Option<String> },
}

impl StartOutcome {
    pub fn payload(&self) -> Option<&str> {
        match self {
            StartOutcome::AlreadyRunning { payload } | StartOutcome::Started { payload } => payload.as_deref(),
        }
    }
}

/// Snapshot reported by `status`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusReport {
    pub running: bool,
    pub payload: Option<String>,
    #[serde(with = "chrono::serde::ts_seconds_option")]
    pub started_at: Option<DateTime<Utc>>,
    pub log_tail: Vec<String>,
}
