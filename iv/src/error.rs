//! Supervisor error types

use std::path::PathBuf;

use thiserror::Error;

/// Errors surfaced by producer control operations
///
/// Only launch and truncate problems reach the caller. Runtime queries that fail are read
/// as "not running" and termination timeouts escalate to a kill instead.
#[derive(Debug, Error)]
pub enum SupervisorError {
    #[error("Failed to launch producer: {0}")]
    Launch(String),

    #[error("Executable not found: {0}")]
    ExecutableNotFound(String),

    #[error("Failed to truncate {}: {source}", .path.display())]
    Truncate { path: PathBuf, source: std::io::Error },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl SupervisorError {
    /// Check if the failure is a missing runtime or producer binary
    pub fn is_not_found(&self) -> bool {
        match self {
            SupervisorError::ExecutableNotFound(_) => true,
            SupervisorError::Io(e) => e.kind() == std::io::ErrorKind::NotFound,
            SupervisorError::Launch(_) | SupervisorError::Truncate { .. } => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_not_found() {
        assert!(SupervisorError::ExecutableNotFound("docker".to_string()).is_not_found());
        assert!(SupervisorError::Io(std::io::Error::from(std::io::ErrorKind::NotFound)).is_not_found());
        assert!(!SupervisorError::Launch("boom".to_string()).is_not_found());
        let truncate = SupervisorError::Truncate {
            path: PathBuf::from("/data/interactions.ndjson"),
            source: std::io::Error::from(std::io::ErrorKind::NotFound),
        };
        assert!(!truncate.is_not_found());
    }

    #[test]
    fn test_display() {
        let err = SupervisorError::Launch("name already in use".to_string());
        assert_eq!(err.to_string(), "Failed to launch producer: name already in use");
    }
}
