//! SQLite persistence for operational history.
//!
//! Two tables: one row per fan-out round, one row per backup attempt. The
//! most recent backup records feed report generation; nothing else in the
//! core reads history back.

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::{Row, SqlitePool};
use std::path::Path;
use tracing::info;

use crate::orchestrator::OrchestrationSummary;

#[derive(Debug, Clone, Serialize)]
pub struct BackupRecord {
    pub id: String,
    pub target_name: String,
    pub file_path: Option<String>,
    pub size_bytes: Option<i64>,
    pub status: String,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
}

pub struct HistoryStore {
    pool: SqlitePool,
}

impl HistoryStore {
    pub async fn new(database_path: &str) -> Result<Self> {
        if let Some(parent) = Path::new(database_path).parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let database_url = format!("sqlite:{}?mode=rwc", database_path);
        let pool = SqlitePool::connect(&database_url).await?;

        let store = Self { pool };
        store.initialize_tables().await?;
        info!(path = database_path, "history store initialized");
        Ok(store)
    }

    async fn initialize_tables(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS round_summaries (
                id TEXT PRIMARY KEY,
                kind TEXT NOT NULL,
                overall TEXT NOT NULL,
                total_targets INTEGER NOT NULL,
                succeeded INTEGER NOT NULL,
                degraded INTEGER NOT NULL,
                failed INTEGER NOT NULL,
                started_at DATETIME NOT NULL,
                duration_ms INTEGER NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_rounds_kind_started \
             ON round_summaries(kind, started_at DESC)",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS backup_records (
                id TEXT PRIMARY KEY,
                target_name TEXT NOT NULL,
                file_path TEXT,
                size_bytes INTEGER,
                status TEXT NOT NULL,
                error_message TEXT,
                created_at DATETIME NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_backups_target_created \
             ON backup_records(target_name, created_at DESC)",
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn record_round(&self, summary: &OrchestrationSummary) -> Result<()> {
        sqlx::query(
            r#"
            INSERT OR REPLACE INTO round_summaries
                (id, kind, overall, total_targets, succeeded, degraded, failed, started_at, duration_ms)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&summary.round_id)
        .bind(summary.kind.to_string())
        .bind(summary.overall.to_string())
        .bind(summary.total_targets as i64)
        .bind(summary.succeeded() as i64)
        .bind(summary.degraded() as i64)
        .bind(summary.failed() as i64)
        .bind(summary.started_at)
        .bind(summary.duration.as_millis() as i64)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn record_backup(&self, record: &BackupRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT OR REPLACE INTO backup_records
                (id, target_name, file_path, size_bytes, status, error_message, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&record.id)
        .bind(&record.target_name)
        .bind(&record.file_path)
        .bind(record.size_bytes)
        .bind(&record.status)
        .bind(&record.error_message)
        .bind(record.created_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Most recent backup attempts for one target, newest first.
    pub async fn recent_backups(&self, target_name: &str, limit: i64) -> Result<Vec<BackupRecord>> {
        let rows = sqlx::query(
            r#"
            SELECT id, target_name, file_path, size_bytes, status, error_message, created_at
            FROM backup_records
            WHERE target_name = ?
            ORDER BY created_at DESC
            LIMIT ?
            "#,
        )
        .bind(target_name)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        let records = rows
            .into_iter()
            .map(|row| BackupRecord {
                id: row.get("id"),
                target_name: row.get("target_name"),
                file_path: row.get("file_path"),
                size_bytes: row.get("size_bytes"),
                status: row.get("status"),
                error_message: row.get("error_message"),
                created_at: row.get("created_at"),
            })
            .collect();

        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn record(id: &str, target: &str, created_at: DateTime<Utc>) -> BackupRecord {
        BackupRecord {
            id: id.to_string(),
            target_name: target.to_string(),
            file_path: Some(format!("/backups/{}.sql.gz", id)),
            size_bytes: Some(1024),
            status: "success".to_string(),
            error_message: None,
            created_at,
        }
    }

    #[tokio::test]
    async fn recent_backups_are_newest_first_and_limited() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("history.db");
        let store = HistoryStore::new(path.to_str().unwrap()).await.unwrap();

        let base = Utc::now();
        for i in 0..4 {
            store
                .record_backup(&record(
                    &format!("b{}", i),
                    "pg-primary",
                    base - chrono::Duration::hours(i),
                ))
                .await
                .unwrap();
        }
        store
            .record_backup(&record("other", "ms-reporting", base))
            .await
            .unwrap();

        let recent = store.recent_backups("pg-primary", 3).await.unwrap();
        assert_eq!(recent.len(), 3);
        assert_eq!(recent[0].id, "b0");
        assert_eq!(recent[2].id, "b2");
    }
}
