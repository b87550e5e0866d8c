//! Core error types for ekssm

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Result type alias for ekssm operations
pub type Result<T> = std::result::Result<T, EkssmError>;

/// Top-level error type for the session lifecycle engine
#[derive(Error, Debug)]
pub enum EkssmError {
    /// Missing or malformed required input
    #[error("Configuration error: {0}")]
    Config(String),

    /// Remote-access API call failed
    #[error("Session negotiation failed: {0}")]
    Negotiation(String),

    /// Could not obtain a local port
    #[error("Failed to allocate a local port: {0}")]
    PortAllocation(#[source] std::io::Error),

    /// Local port never became connectable
    #[error("Timed out after {timeout:?} waiting for local port {port} to be ready: {last_error}")]
    Timeout {
        port: u16,
        timeout: Duration,
        last_error: String,
    },

    /// Credential or state file could not be written
    #[error("Failed to write {path:?}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Referenced session does not exist
    #[error("Session '{0}' not found (use 'ekssm session list' to see available sessions)")]
    NotFound(String),

    /// Malformed store operation input
    #[error("Invalid input: {0}")]
    Validation(String),

    /// Cross-process state lock could not be acquired
    #[error("Timed out after {timeout:?} waiting for state lock {path:?}")]
    Lock { path: PathBuf, timeout: Duration },

    /// Spawning or signalling a process failed
    #[error("Process error: {0}")]
    Process(String),

    /// Persisted state is unreadable
    #[error("Failed to load session state from {path:?}: {reason}")]
    State { path: PathBuf, reason: String },

    /// The flow was interrupted by a signal
    #[error("Operation cancelled by signal")]
    Cancelled,

    /// The foreign command exited unsuccessfully
    #[error("Command exited with status {code}")]
    CommandFailed { code: i32 },

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl EkssmError {
    /// Build a `Write` error for `path`
    pub fn write(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Write {
            path: path.into(),
            source,
        }
    }

    /// Whether this error is a missing-session lookup
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_mentions_list_hint() {
        let err = EkssmError::NotFound("abc".to_string());
        assert!(err.is_not_found());
        assert!(err.to_string().contains("ekssm session list"));
    }

    #[test]
    fn test_timeout_message_includes_port() {
        let err = EkssmError::Timeout {
            port: 9443,
            timeout: Duration::from_secs(30),
            last_error: "connection refused".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("9443"));
        assert!(msg.contains("connection refused"));
    }
}
