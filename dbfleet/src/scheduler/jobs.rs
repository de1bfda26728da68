//! The standing fleet jobs, wired onto the orchestration core.
//!
//! Four jobs: daily maintenance (backup every target, clean old files,
//! digest), periodic health rounds, weekly optimization, and a standalone
//! retention cleanup. Alert policy per round lives in `report`.

use anyhow::{anyhow, Result};
use chrono::Utc;
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};
use uuid::Uuid;

use super::{Cadence, ScheduledJob};
use crate::alerts::{AlertDispatcher, AlertSeverity};
use crate::backup::{cleanup_old_backups, CleanupReport};
use crate::config::Config;
use crate::database::{BackupRecord, HistoryStore};
use crate::engine::EngineRegistry;
use crate::ops::{BackupOperation, HealthCheckOperation, OptimizeOperation};
use crate::orchestrator::Orchestrator;
use crate::report;
use crate::runner::{TaskResult, TaskStatus};
use crate::telemetry::TelemetrySink;

/// Everything a job needs, shared by Arc into each callback.
pub struct JobContext {
    pub config: Arc<Config>,
    pub orchestrator: Arc<Orchestrator>,
    pub engines: Arc<EngineRegistry>,
    pub alerts: Arc<AlertDispatcher>,
    pub history: Arc<HistoryStore>,
    pub telemetry: Arc<dyn TelemetrySink>,
}

/// Build the four standing jobs from the validated configuration.
pub fn standard_jobs(ctx: Arc<JobContext>) -> Result<Vec<ScheduledJob>> {
    let health_cadence = Cadence::Every(Duration::from_secs(
        ctx.config.monitoring.check_interval_seconds,
    ));
    let maintenance_cadence = Cadence::parse(&ctx.config.backup.schedule)
        .map_err(|e| anyhow!("backup.schedule: {}", e))?;
    let cleanup_cadence = Cadence::parse(&ctx.config.backup.cleanup_schedule)
        .map_err(|e| anyhow!("backup.cleanup_schedule: {}", e))?;
    let optimization_cadence = Cadence::parse(&ctx.config.optimization.schedule)
        .map_err(|e| anyhow!("optimization.schedule: {}", e))?;

    let health_ctx = ctx.clone();
    let maintenance_ctx = ctx.clone();
    let optimization_ctx = ctx.clone();
    let cleanup_ctx = ctx;

    Ok(vec![
        ScheduledJob::new("health-check", health_cadence, move || {
            let ctx = health_ctx.clone();
            Box::pin(async move { run_health_round(&ctx).await })
        }),
        ScheduledJob::new("daily-maintenance", maintenance_cadence, move || {
            let ctx = maintenance_ctx.clone();
            Box::pin(async move { run_daily_maintenance(&ctx).await })
        }),
        ScheduledJob::new("weekly-optimization", optimization_cadence, move || {
            let ctx = optimization_ctx.clone();
            Box::pin(async move { run_weekly_optimization(&ctx).await })
        }),
        ScheduledJob::new("retention-cleanup", cleanup_cadence, move || {
            let ctx = cleanup_ctx.clone();
            Box::pin(async move { run_retention_cleanup(&ctx).await })
        }),
    ])
}

async fn run_health_round(ctx: &JobContext) {
    let monitoring = &ctx.config.monitoring;
    let operation = Arc::new(HealthCheckOperation::new(ctx.engines.clone()));
    let summary = ctx
        .orchestrator
        .fan_out(
            operation,
            Duration::from_secs(monitoring.task_timeout_seconds),
            monitoring.max_parallel_checks,
        )
        .await;

    for result in &summary.results {
        ctx.telemetry
            .health_gauge(&result.target, !result.is_failed());
    }

    if let Some((severity, subject, body)) =
        report::health_round_alert(&summary, &monitoring.thresholds)
    {
        ctx.alerts.notify(&subject, &body, severity).await;
    }

    if let Err(e) = ctx.history.record_round(&summary).await {
        error!("failed to record health round: {}", e);
    }
}

async fn run_daily_maintenance(ctx: &JobContext) {
    let backup = &ctx.config.backup;
    info!("starting daily maintenance");

    let operation = Arc::new(BackupOperation::new(
        PathBuf::from(&backup.backup_dir),
        backup.compression,
    ));
    let summary = ctx
        .orchestrator
        .fan_out(
            operation,
            Duration::from_secs(backup.operation_timeout_seconds),
            backup.parallel_jobs,
        )
        .await;

    for result in &summary.results {
        let record = backup_record_from(result);
        if result.status == TaskStatus::Success {
            if let Some(size) = record.size_bytes {
                ctx.telemetry.backup_size(&result.target, size as u64);
            }
        }
        if let Err(e) = ctx.history.record_backup(&record).await {
            error!(target_name = %result.target, "failed to record backup: {}", e);
        }
    }

    let cleanup = cleanup_old_backups(Path::new(&backup.backup_dir), backup.retention_days)
        .unwrap_or_else(|e| {
            error!("backup cleanup failed: {}", e);
            CleanupReport {
                files_deleted: 0,
                bytes_freed: 0,
                deleted: Vec::new(),
                errors: vec![e.to_string()],
                cutoff: Utc::now(),
            }
        });

    let digest = report::maintenance_digest(&summary, &cleanup);
    ctx.alerts
        .notify(
            "Daily Maintenance Summary",
            &digest,
            report::digest_severity(&summary),
        )
        .await;

    let mut recent = Vec::new();
    for result in &summary.results {
        match ctx.history.recent_backups(&result.target, 5).await {
            Ok(mut records) => recent.append(&mut records),
            Err(e) => error!(target_name = %result.target, "failed to load recent backups: {}", e),
        }
    }
    if let Err(e) = report::write_round_report(
        Path::new(&ctx.config.fleet.reports_dir),
        &summary,
        &recent,
    )
    .await
    {
        error!("failed to write maintenance report: {}", e);
    }

    if let Err(e) = ctx.history.record_round(&summary).await {
        error!("failed to record maintenance round: {}", e);
    }
}

async fn run_weekly_optimization(ctx: &JobContext) {
    info!("starting weekly optimization");

    let operation = Arc::new(OptimizeOperation::new(ctx.engines.clone()));
    let summary = ctx
        .orchestrator
        .fan_out(
            operation,
            Duration::from_secs(ctx.config.optimization.operation_timeout_seconds),
            ctx.config.monitoring.max_parallel_checks,
        )
        .await;

    let digest = report::optimization_digest(&summary);
    ctx.alerts
        .notify(
            "Weekly Optimization Summary",
            &digest,
            report::digest_severity(&summary),
        )
        .await;

    if let Err(e) = report::write_round_report(
        Path::new(&ctx.config.fleet.reports_dir),
        &summary,
        &[],
    )
    .await
    {
        error!("failed to write optimization report: {}", e);
    }

    if let Err(e) = ctx.history.record_round(&summary).await {
        error!("failed to record optimization round: {}", e);
    }
}

async fn run_retention_cleanup(ctx: &JobContext) {
    let backup = &ctx.config.backup;
    match cleanup_old_backups(Path::new(&backup.backup_dir), backup.retention_days) {
        Ok(report) if report.errors.is_empty() => {
            info!(
                files_deleted = report.files_deleted,
                bytes_freed = report.bytes_freed,
                "retention cleanup finished"
            );
        }
        Ok(report) => {
            ctx.alerts
                .notify(
                    "Backup Cleanup Errors",
                    &report.errors.join("\n"),
                    AlertSeverity::Warning,
                )
                .await;
        }
        Err(e) => {
            error!("retention cleanup failed: {}", e);
            ctx.alerts
                .notify("Backup Cleanup Failed", &e.to_string(), AlertSeverity::Warning)
                .await;
        }
    }
}

fn backup_record_from(result: &TaskResult) -> BackupRecord {
    BackupRecord {
        id: Uuid::new_v4().to_string(),
        target_name: result.target.clone(),
        file_path: result
            .payload
            .get("file_path")
            .and_then(Value::as_str)
            .map(String::from),
        size_bytes: result.payload.get("size_bytes").and_then(Value::as_i64),
        status: result.status.to_string(),
        error_message: result.error.as_ref().map(|e| e.to_string()),
        created_at: result.completed_at,
    }
}
