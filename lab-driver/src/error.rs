//! Error types for container driver operations.

use std::fmt;
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, DriverError>;

/// The driver call an error or log line refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DriverOp {
    Create,
    Start,
    Pause,
    Unpause,
    Stop,
    Remove,
    Endpoints,
    List,
}

impl DriverOp {
    pub fn as_str(&self) -> &'static str {
        match self {
            DriverOp::Create => "create",
            DriverOp::Start => "start",
            DriverOp::Pause => "pause",
            DriverOp::Unpause => "unpause",
            DriverOp::Stop => "stop",
            DriverOp::Remove => "remove",
            DriverOp::Endpoints => "endpoints",
            DriverOp::List => "list",
        }
    }
}

impl fmt::Display for DriverOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors that can occur while driving the container runtime.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DriverError {
    #[error("image '{image}' is unavailable: {reason}")]
    Image { image: String, reason: String },

    #[error("container {operation} failed: {reason}")]
    Lifecycle { operation: DriverOp, reason: String },

    #[error("endpoint resolution failed: {0}")]
    Endpoint(String),

    #[error("container network error: {0}")]
    Network(String),

    #[error("container not found: {0}")]
    ContainerNotFound(String),

    /// Timeouts and refused connections; retried by [`crate::Retrying`].
    #[error("transient backend error during {operation}: {reason}")]
    Transient { operation: DriverOp, reason: String },

    #[error("container backend unavailable: {operation} failed after {attempts} attempts: {reason}")]
    BackendUnavailable {
        operation: DriverOp,
        attempts: u32,
        reason: String,
    },

    /// The call did not finish within its deadline; its outcome is unknown.
    #[error("container {operation} timed out after {after:?}")]
    Timeout { operation: DriverOp, after: Duration },
}

impl DriverError {
    pub fn is_transient(&self) -> bool {
        matches!(self, DriverError::Transient { .. })
    }

    pub fn is_backend_unavailable(&self) -> bool {
        matches!(self, DriverError::BackendUnavailable { .. })
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, DriverError::ContainerNotFound(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_transient_errors_are_retryable() {
        let transient = DriverError::Transient {
            operation: DriverOp::Start,
            reason: "connection refused".to_string(),
        };
        assert!(transient.is_transient());
        assert!(!DriverError::Endpoint("no ports".to_string()).is_transient());
        assert!(!DriverError::Timeout {
            operation: DriverOp::Start,
            after: Duration::from_secs(1),
        }
        .is_transient());
    }

    #[test]
    fn messages_name_the_operation() {
        let err = DriverError::BackendUnavailable {
            operation: DriverOp::Unpause,
            attempts: 3,
            reason: "connection refused".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "container backend unavailable: unpause failed after 3 attempts: connection refused"
        );
    }
}
