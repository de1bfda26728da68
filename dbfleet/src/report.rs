//! Alert policy, digests and report files.
//!
//! The dispatcher delivers whatever it is given; deciding *what* warrants a
//! notification happens here, against orchestration summaries. Each
//! threshold is an independent rule; omitting one from the config disables
//! it.

use chrono::Utc;
use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use tracing::info;

use crate::alerts::AlertSeverity;
use crate::backup::CleanupReport;
use crate::config::Thresholds;
use crate::database::BackupRecord;
use crate::errors::TaskError;
use crate::orchestrator::OrchestrationSummary;
use crate::runner::{TaskResult, TaskStatus};

/// Threshold breaches in one health payload, one message per broken rule.
pub fn threshold_breaches(payload: &Value, thresholds: &Thresholds) -> Vec<String> {
    let mut breaches = Vec::new();

    if let Some(limit) = thresholds.max_active_connections {
        let connections = payload
            .get("active_connections")
            .and_then(|rows| rows.as_array())
            .and_then(|rows| rows.first())
            .and_then(|row| row.get("connections"))
            .and_then(Value::as_u64);
        if let Some(count) = connections {
            if count > limit {
                breaches.push(format!("active connections {} exceed limit {}", count, limit));
            }
        }
    }

    if let Some(limit) = thresholds.max_long_running_queries {
        let long_running = payload
            .get("long_running_queries")
            .and_then(Value::as_array)
            .map(|rows| rows.len() as u64);
        if let Some(count) = long_running {
            if count > limit {
                breaches.push(format!(
                    "{} long-running queries exceed limit {}",
                    count, limit
                ));
            }
        }
    }

    breaches
}

/// Alert decision for a periodic health round. Failures are CRITICAL,
/// threshold breaches WARNING; a clean round stays silent.
pub fn health_round_alert(
    summary: &OrchestrationSummary,
    thresholds: &Thresholds,
) -> Option<(AlertSeverity, String, String)> {
    let failed: Vec<&TaskResult> = summary.results.iter().filter(|r| r.is_failed()).collect();
    if !failed.is_empty() {
        let mut body = String::from("Health check failed for:\n");
        for result in &failed {
            let detail = result
                .error
                .as_ref()
                .map(|e| e.to_string())
                .unwrap_or_else(|| "unknown error".to_string());
            body.push_str(&format!("  - {}: {}\n", result.target, detail));
        }
        return Some((
            AlertSeverity::Critical,
            format!("Health Check Failed: {} target(s)", failed.len()),
            body,
        ));
    }

    let mut breaches = Vec::new();
    for result in &summary.results {
        for breach in threshold_breaches(&result.payload, thresholds) {
            breaches.push(format!("{}: {}", result.target, breach));
        }
    }
    if !breaches.is_empty() {
        return Some((
            AlertSeverity::Warning,
            "Database Health Alert".to_string(),
            breaches.join("\n"),
        ));
    }

    None
}

/// Digest severity shared by the daily and weekly digest jobs.
pub fn digest_severity(summary: &OrchestrationSummary) -> AlertSeverity {
    match summary.overall {
        TaskStatus::Failed => AlertSeverity::Critical,
        TaskStatus::Degraded => AlertSeverity::Warning,
        TaskStatus::Success => AlertSeverity::Info,
    }
}

pub fn maintenance_digest(summary: &OrchestrationSummary, cleanup: &CleanupReport) -> String {
    let mut digest = format!(
        "Daily Maintenance Summary\n\
         - Backups: {}/{} successful\n\
         - Cleanup: {} file(s) deleted, {} bytes freed\n",
        summary.succeeded(),
        summary.total_targets,
        cleanup.files_deleted,
        cleanup.bytes_freed,
    );

    for result in &summary.results {
        digest.push_str(&format!("\n{}: {}", result.target, result.status));
        if let Some(error) = &result.error {
            digest.push_str(&format!(" ({})", error));
        }
    }

    if !cleanup.errors.is_empty() {
        digest.push_str(&format!("\n\nCleanup errors:\n{}", cleanup.errors.join("\n")));
    }

    digest
}

pub fn optimization_digest(summary: &OrchestrationSummary) -> String {
    let mut digest = format!(
        "Weekly Optimization Summary\n\
         - Optimizations: {}/{} successful\n",
        summary.succeeded(),
        summary.total_targets,
    );

    for result in &summary.results {
        digest.push_str(&format!("\n{}: {}", result.target, result.status));
        if let Some(steps) = result.payload.get("steps").and_then(Value::as_array) {
            for step in steps {
                if let Some(step) = step.as_str() {
                    digest.push_str(&format!("\n  - {}", step));
                }
            }
        }
    }

    digest
}

/// Persist one round as a JSON report file, including the recent backup
/// history handed in by the caller.
pub async fn write_round_report(
    reports_dir: &Path,
    summary: &OrchestrationSummary,
    recent_backups: &[BackupRecord],
) -> Result<PathBuf, TaskError> {
    tokio::fs::create_dir_all(reports_dir).await.map_err(|e| {
        TaskError::operation(format!(
            "failed to create reports dir {}: {}",
            reports_dir.display(),
            e
        ))
    })?;

    let filename = format!(
        "{}_report_{}.json",
        summary.kind,
        summary.started_at.format("%Y%m%d_%H%M%S")
    );
    let path = reports_dir.join(filename);

    let report = json!({
        "generated_at": Utc::now(),
        "summary": summary,
        "recent_backups": recent_backups,
    });

    let body = serde_json::to_vec_pretty(&report)
        .map_err(|e| TaskError::operation(format!("failed to encode report: {}", e)))?;

    tokio::fs::write(&path, body)
        .await
        .map_err(|e| TaskError::operation(format!("failed to write {}: {}", path.display(), e)))?;

    info!(path = %path.display(), "round report written");
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runner::TaskKind;
    use chrono::Utc;
    use serde_json::json;
    use std::time::Duration;

    fn thresholds(connections: Option<u64>, long_running: Option<u64>) -> Thresholds {
        Thresholds {
            max_active_connections: connections,
            max_long_running_queries: long_running,
        }
    }

    fn health_payload(connections: u64, long_running: usize) -> Value {
        json!({
            "active_connections": [{ "connections": connections }],
            "long_running_queries": (0..long_running)
                .map(|i| json!({ "pid": i }))
                .collect::<Vec<_>>(),
        })
    }

    fn result(name: &str, status: TaskStatus, payload: Value) -> TaskResult {
        TaskResult {
            target: name.to_string(),
            kind: TaskKind::HealthCheck,
            status,
            payload,
            error: None,
            duration: Duration::ZERO,
            completed_at: Utc::now(),
        }
    }

    fn summary(results: Vec<TaskResult>) -> OrchestrationSummary {
        let overall = crate::orchestrator::rollup(&results);
        OrchestrationSummary {
            round_id: "round-1".to_string(),
            kind: TaskKind::HealthCheck,
            started_at: Utc::now(),
            duration: Duration::ZERO,
            total_targets: results.len(),
            overall,
            results,
        }
    }

    #[test]
    fn rules_are_independent() {
        let payload = health_payload(150, 2);

        let both = threshold_breaches(&payload, &thresholds(Some(100), Some(5)));
        assert_eq!(both.len(), 1);
        assert!(both[0].contains("150"));

        let only_queries = threshold_breaches(&payload, &thresholds(None, Some(1)));
        assert_eq!(only_queries.len(), 1);
        assert!(only_queries[0].contains("long-running"));

        assert!(threshold_breaches(&payload, &thresholds(None, None)).is_empty());
    }

    #[test]
    fn missing_metric_never_breaches() {
        let payload = json!({ "database_size": [] });
        assert!(threshold_breaches(&payload, &thresholds(Some(1), Some(0))).is_empty());
    }

    #[test]
    fn failed_round_is_critical() {
        let summary = summary(vec![
            result("a", TaskStatus::Success, health_payload(1, 0)),
            result("b", TaskStatus::Failed, Value::Null),
        ]);
        let (severity, subject, _) =
            health_round_alert(&summary, &thresholds(None, None)).unwrap();
        assert_eq!(severity, AlertSeverity::Critical);
        assert!(subject.contains("1 target"));
    }

    #[test]
    fn breach_round_is_warning() {
        let summary = summary(vec![result(
            "a",
            TaskStatus::Success,
            health_payload(500, 0),
        )]);
        let (severity, _, body) =
            health_round_alert(&summary, &thresholds(Some(100), None)).unwrap();
        assert_eq!(severity, AlertSeverity::Warning);
        assert!(body.contains("a:"));
    }

    #[test]
    fn clean_round_is_silent() {
        let summary = summary(vec![result(
            "a",
            TaskStatus::Success,
            health_payload(5, 0),
        )]);
        assert!(health_round_alert(&summary, &thresholds(Some(100), Some(5))).is_none());
    }
}
