//! Telemetry sink boundary.
//!
//! The core emits one observation per task run (target, kind, duration,
//! status), backup sizes, and a per-target health gauge. An exporter can
//! implement [`TelemetrySink`]; the default sink writes structured tracing
//! events.

use std::time::Duration;
use tracing::debug;

use crate::runner::{TaskKind, TaskStatus};

pub trait TelemetrySink: Send + Sync {
    fn operation_finished(&self, target: &str, kind: TaskKind, duration: Duration, status: TaskStatus);

    fn backup_size(&self, target: &str, size_bytes: u64);

    fn health_gauge(&self, target: &str, healthy: bool);
}

/// Default sink: structured log events, nothing else.
pub struct LogTelemetry;

impl TelemetrySink for LogTelemetry {
    fn operation_finished(&self, target: &str, kind: TaskKind, duration: Duration, status: TaskStatus) {
        debug!(
            target_name = target,
            task_kind = %kind,
            duration_ms = duration.as_millis() as u64,
            status = %status,
            "task finished"
        );
    }

    fn backup_size(&self, target: &str, size_bytes: u64) {
        debug!(target_name = target, size_bytes, "backup size observed");
    }

    fn health_gauge(&self, target: &str, healthy: bool) {
        debug!(target_name = target, healthy, "health gauge");
    }
}
