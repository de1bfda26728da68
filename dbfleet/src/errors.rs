//! Error types for fleet operations.
//!
//! Connection- and operation-level failures are captured into task results
//! rather than propagated; only configuration errors abort startup.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Classification of a task failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Waiting for a pool slot or a fresh connection exceeded the
    /// target's connect timeout.
    ConnectTimeout,

    /// The endpoint refused or dropped the connection attempt.
    ConnectionRefused,

    /// The operation body exceeded its wall-clock timeout.
    OperationTimeout,

    /// The engine reported a failure, or transport broke mid-operation.
    OperationError,

    /// Some sub-results were collected, others errored.
    PartialFailure,

    /// Invalid configuration; fatal at startup only.
    ConfigInvalid,
}

impl ErrorKind {
    /// Transport-level failures leave the connection in an unknown state;
    /// the owning lease must be discarded instead of returned to the pool.
    pub fn poisons_connection(self) -> bool {
        matches!(
            self,
            ErrorKind::ConnectTimeout | ErrorKind::ConnectionRefused | ErrorKind::OperationTimeout
        )
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::ConnectTimeout => "connect_timeout",
            ErrorKind::ConnectionRefused => "connection_refused",
            ErrorKind::OperationTimeout => "operation_timeout",
            ErrorKind::OperationError => "operation_error",
            ErrorKind::PartialFailure => "partial_failure",
            ErrorKind::ConfigInvalid => "config_invalid",
        };
        write!(f, "{}", name)
    }
}

/// A classified failure produced while running a task against a target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskError {
    pub kind: ErrorKind,
    pub message: String,
}

impl TaskError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn connect_timeout(target: &str, waited_secs: u64) -> Self {
        Self::new(
            ErrorKind::ConnectTimeout,
            format!("timed out after {}s acquiring a connection to '{}'", waited_secs, target),
        )
    }

    pub fn connection_refused(target: &str, reason: impl fmt::Display) -> Self {
        Self::new(
            ErrorKind::ConnectionRefused,
            format!("connection to '{}' refused: {}", target, reason),
        )
    }

    pub fn operation_timeout(target: &str, operation: &str, limit_secs: u64) -> Self {
        Self::new(
            ErrorKind::OperationTimeout,
            format!("'{}' on '{}' exceeded {}s", operation, target, limit_secs),
        )
    }

    pub fn operation(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::OperationError, message)
    }

    pub fn partial(failed_parts: &[String]) -> Self {
        Self::new(
            ErrorKind::PartialFailure,
            format!("partial result; failed parts: {}", failed_parts.join(", ")),
        )
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::ConfigInvalid, message)
    }
}

impl fmt::Display for TaskError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

impl std::error::Error for TaskError {}
