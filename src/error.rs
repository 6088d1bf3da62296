//! Error types for the Vazal worker session manager

use std::process::ExitStatus;
use thiserror::Error;

use crate::protocol::Mode;

/// Main error type for worker session operations
#[derive(Error, Debug)]
pub enum AgentError {
    /// OS-level failure to start the worker process
    #[error("Failed to spawn worker process: {0}")]
    SpawnFailure(String),

    /// Worker never signaled readiness within the startup deadline
    #[error("Worker did not become ready within {timeout_secs}s")]
    StartupTimeout {
        /// Startup deadline that was exceeded, in seconds
        timeout_secs: u64,
    },

    /// Worker process exited or crashed while requests were outstanding
    #[error("Worker terminated{}", exit_label(.exit))]
    WorkerTerminated {
        /// Exit status, if the process exited on its own
        exit: Option<ExitStatus>,
    },

    /// Individual operation exceeded its deadline while the worker may
    /// still be healthy
    #[error("{mode} request timed out after {timeout_secs}s")]
    RequestTimeout {
        /// Mode of the timed-out operation
        mode: Mode,
        /// Deadline that was exceeded, in seconds
        timeout_secs: u64,
    },

    /// Worker answered the request with an error payload
    #[error("Worker reported an error: {0}")]
    WorkerReported(String),

    /// Worker result payload did not match the expected shape for the mode
    #[error("Unexpected worker response: {0}")]
    UnexpectedResponse(String),

    /// No live session exists for the given key
    #[error("No session for key: {0}")]
    SessionNotFound(String),

    /// JSON encode error when building a wire request
    #[error("JSON encode error: {0}")]
    JsonEncode(#[from] serde_json::Error),

    /// I/O error on the worker's stdio pipes
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Session manager is shutting down
    #[error("Session manager is shut down")]
    ShuttingDown,
}

fn exit_label(exit: &Option<ExitStatus>) -> String {
    match exit {
        Some(status) => format!(" ({status})"),
        None => String::new(),
    }
}

/// Result type alias for worker session operations
pub type Result<T> = std::result::Result<T, AgentError>;

impl AgentError {
    /// Create a spawn failure error
    pub fn spawn_failure(msg: impl Into<String>) -> Self {
        Self::SpawnFailure(msg.into())
    }

    /// Create a startup timeout error
    #[must_use]
    pub fn startup_timeout(timeout: std::time::Duration) -> Self {
        Self::StartupTimeout {
            timeout_secs: timeout.as_secs(),
        }
    }

    /// Create a worker terminated error
    #[must_use]
    pub fn worker_terminated(exit: Option<ExitStatus>) -> Self {
        Self::WorkerTerminated { exit }
    }

    /// Create a request timeout error
    #[must_use]
    pub fn request_timeout(mode: Mode, timeout: std::time::Duration) -> Self {
        Self::RequestTimeout {
            mode,
            timeout_secs: timeout.as_secs(),
        }
    }

    /// Create a worker-reported error
    pub fn worker_reported(msg: impl Into<String>) -> Self {
        Self::WorkerReported(msg.into())
    }

    /// Create an unexpected response error
    pub fn unexpected_response(msg: impl Into<String>) -> Self {
        Self::UnexpectedResponse(msg.into())
    }

    /// Create a session not found error
    pub fn session_not_found(key: impl Into<String>) -> Self {
        Self::SessionNotFound(key.into())
    }

    /// Whether a retry by the caller is reasonable
    ///
    /// A terminated or never-started worker is transparently respawned on
    /// the next request for the same key, and a timed-out request leaves the
    /// warm session intact, so all of these are worth retrying. Worker-side
    /// errors and malformed payloads are not.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::SpawnFailure(_)
                | Self::StartupTimeout { .. }
                | Self::WorkerTerminated { .. }
                | Self::RequestTimeout { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn retryable_classification() {
        assert!(AgentError::spawn_failure("no such file").is_retryable());
        assert!(AgentError::startup_timeout(Duration::from_secs(60)).is_retryable());
        assert!(AgentError::worker_terminated(None).is_retryable());
        assert!(
            AgentError::request_timeout(Mode::Execute, Duration::from_secs(120)).is_retryable()
        );

        assert!(!AgentError::worker_reported("boom").is_retryable());
        assert!(!AgentError::unexpected_response("not a plan").is_retryable());
        assert!(!AgentError::session_not_found("u1").is_retryable());
    }

    #[test]
    fn timeout_message_names_mode() {
        let err = AgentError::request_timeout(Mode::Classify, Duration::from_secs(30));
        assert_eq!(err.to_string(), "classify request timed out after 30s");
    }
}
