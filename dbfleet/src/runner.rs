//! Single-target task execution with timing and timeout enforcement.
//!
//! The runner never propagates errors: acquisition failures, operation
//! errors and timeouts are all captured into a [`TaskResult`] so the
//! orchestration layer only ever reads statuses.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::timeout;
use tracing::warn;

use crate::config::Target;
use crate::errors::TaskError;
use crate::pool::{ConnectionLease, ConnectionManager};
use crate::telemetry::TelemetrySink;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    HealthCheck,
    Backup,
    Optimize,
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TaskKind::HealthCheck => "health_check",
            TaskKind::Backup => "backup",
            TaskKind::Optimize => "optimize",
        };
        write!(f, "{}", name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Success,
    Degraded,
    Failed,
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TaskStatus::Success => "success",
            TaskStatus::Degraded => "degraded",
            TaskStatus::Failed => "failed",
        };
        write!(f, "{}", name)
    }
}

/// What an operation hands back: a structured payload plus the names of any
/// sub-steps that failed without aborting the whole operation.
#[derive(Debug, Clone)]
pub struct TaskPayload {
    pub value: Value,
    pub partial_failures: Vec<String>,
}

impl TaskPayload {
    pub fn complete(value: Value) -> Self {
        Self {
            value,
            partial_failures: Vec::new(),
        }
    }

    pub fn partial(value: Value, partial_failures: Vec<String>) -> Self {
        Self {
            value,
            partial_failures,
        }
    }
}

/// Outcome of one runner invocation against one target.
#[derive(Debug, Clone, Serialize)]
pub struct TaskResult {
    pub target: String,
    pub kind: TaskKind,
    pub status: TaskStatus,
    pub payload: Value,
    pub error: Option<TaskError>,
    #[serde(serialize_with = "serialize_duration_ms")]
    pub duration: Duration,
    pub completed_at: DateTime<Utc>,
}

fn serialize_duration_ms<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    serializer.serialize_u64(duration.as_millis() as u64)
}

impl TaskResult {
    pub fn is_failed(&self) -> bool {
        self.status == TaskStatus::Failed
    }

    pub fn is_degraded(&self) -> bool {
        self.status == TaskStatus::Degraded
    }

    /// Result for a fan-out task that never produced one (e.g. it panicked).
    /// A target always yields a result, never an absent entry.
    pub fn aborted(target: impl Into<String>, kind: TaskKind, reason: impl fmt::Display) -> Self {
        Self {
            target: target.into(),
            kind,
            status: TaskStatus::Failed,
            payload: Value::Null,
            error: Some(TaskError::operation(format!("task aborted: {}", reason))),
            duration: Duration::ZERO,
            completed_at: Utc::now(),
        }
    }
}

/// One named unit of work to run against a target through a leased
/// connection. Implementations report partial failure through the payload
/// and total failure through `Err`.
#[async_trait]
pub trait Operation: Send + Sync {
    fn kind(&self) -> TaskKind;

    async fn execute(
        &self,
        target: &Target,
        lease: &mut ConnectionLease,
    ) -> Result<TaskPayload, TaskError>;
}

pub struct TaskRunner {
    connections: Arc<ConnectionManager>,
    telemetry: Arc<dyn TelemetrySink>,
}

impl TaskRunner {
    pub fn new(connections: Arc<ConnectionManager>, telemetry: Arc<dyn TelemetrySink>) -> Self {
        Self {
            connections,
            telemetry,
        }
    }

    /// Execute `operation` against `target` under a hard wall-clock limit.
    ///
    /// On timeout the operation future is dropped and the lease is marked
    /// broken: the connection's state is unknown, so it is discarded rather
    /// than returned to the pool.
    pub async fn run(&self, target: &Target, operation: &dyn Operation, limit: Duration) -> TaskResult {
        let kind = operation.kind();
        let started = Instant::now();

        let mut lease: ConnectionLease = match self.connections.acquire(&target.name).await {
            Ok(lease) => lease,
            Err(e) => {
                warn!(target_name = %target.name, task_kind = %kind, error = %e, "connection acquisition failed");
                return self.finish(target, kind, TaskStatus::Failed, Value::Null, Some(e), started);
            }
        };

        let outcome = timeout(limit, operation.execute(target, &mut lease)).await;
        let (status, payload, error) = match outcome {
            Ok(Ok(payload)) => {
                if payload.partial_failures.is_empty() {
                    (TaskStatus::Success, payload.value, None)
                } else {
                    let error = TaskError::partial(&payload.partial_failures);
                    (TaskStatus::Degraded, payload.value, Some(error))
                }
            }
            Ok(Err(e)) => (TaskStatus::Failed, Value::Null, Some(e)),
            Err(_) => {
                lease.mark_broken();
                let error =
                    TaskError::operation_timeout(&target.name, &kind.to_string(), limit.as_secs());
                warn!(target_name = %target.name, task_kind = %kind, "operation timed out, discarding connection");
                (TaskStatus::Failed, Value::Null, Some(error))
            }
        };

        drop(lease);
        self.finish(target, kind, status, payload, error, started)
    }

    fn finish(
        &self,
        target: &Target,
        kind: TaskKind,
        status: TaskStatus,
        payload: Value,
        error: Option<TaskError>,
        started: Instant,
    ) -> TaskResult {
        let duration = started.elapsed();
        self.telemetry
            .operation_finished(&target.name, kind, duration, status);

        TaskResult {
            target: target.name.clone(),
            kind,
            status,
            payload,
            error,
            duration,
            completed_at: Utc::now(),
        }
    }
}
