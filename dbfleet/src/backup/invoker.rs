//! Backup invokers for the two supported engines.
//!
//! PostgreSQL dumps go through `pg_dump` as a child process: argv array (no
//! shell), password via `PGPASSWORD`, and `kill_on_drop` so a runner-level
//! timeout terminates the dump instead of leaking it. SQL Server backups are
//! a `BACKUP DATABASE` statement issued through the leased connection; the
//! server writes the file, so a missing local file only means the size is
//! unknown.

use async_trait::async_trait;
use chrono::Utc;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::Command;
use tracing::{debug, info};

use crate::config::Target;
use crate::errors::TaskError;
use crate::pool::{ConnectionLease, QuerySpec};

#[derive(Debug, Clone, Serialize)]
pub struct BackupArtifact {
    pub file_path: PathBuf,
    pub size_bytes: Option<u64>,
    pub compressed: bool,
}

#[async_trait]
pub trait BackupInvoker: Send + Sync {
    async fn run_backup(
        &self,
        target: &Target,
        lease: &mut ConnectionLease,
        dest_dir: &Path,
    ) -> Result<BackupArtifact, TaskError>;
}

fn timestamp() -> String {
    Utc::now().format("%Y%m%d_%H%M%S").to_string()
}

async fn ensure_dest_dir(dest_dir: &Path) -> Result<(), TaskError> {
    tokio::fs::create_dir_all(dest_dir)
        .await
        .map_err(|e| TaskError::operation(format!("failed to create backup dir {}: {}", dest_dir.display(), e)))
}

pub struct PgDumpInvoker {
    compression: bool,
}

impl PgDumpInvoker {
    pub fn new(compression: bool) -> Self {
        Self { compression }
    }
}

#[async_trait]
impl BackupInvoker for PgDumpInvoker {
    async fn run_backup(
        &self,
        target: &Target,
        _lease: &mut ConnectionLease,
        dest_dir: &Path,
    ) -> Result<BackupArtifact, TaskError> {
        ensure_dest_dir(dest_dir).await?;

        let extension = if self.compression { "sql.gz" } else { "sql" };
        let file_path = dest_dir.join(format!("{}_{}.{}", target.name, timestamp(), extension));

        let mut command = Command::new("pg_dump");
        command
            .arg("--host")
            .arg(&target.host)
            .arg("--port")
            .arg(target.port.to_string())
            .arg("--username")
            .arg(&target.username)
            .arg("--dbname")
            .arg(&target.database)
            .arg("--file")
            .arg(&file_path)
            .arg("--no-password");
        if self.compression {
            command.arg("--compress=6");
        }
        command
            .env("PGPASSWORD", target.password.expose())
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        debug!(target_name = %target.name, file = %file_path.display(), "running pg_dump");

        let output = command
            .output()
            .await
            .map_err(|e| TaskError::operation(format!("failed to launch pg_dump: {}", e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(TaskError::operation(format!(
                "pg_dump exited with {}: {}",
                output.status,
                stderr.trim()
            )));
        }

        let size_bytes = match tokio::fs::metadata(&file_path).await {
            Ok(meta) => meta.len(),
            Err(_) => {
                return Err(TaskError::operation(format!(
                    "pg_dump reported success but {} was not created",
                    file_path.display()
                )))
            }
        };

        info!(
            target_name = %target.name,
            file = %file_path.display(),
            size_bytes,
            "postgres backup completed"
        );

        Ok(BackupArtifact {
            file_path,
            size_bytes: Some(size_bytes),
            compressed: self.compression,
        })
    }
}

pub struct SqlServerBackupInvoker {
    compression: bool,
}

impl SqlServerBackupInvoker {
    pub fn new(compression: bool) -> Self {
        Self { compression }
    }
}

#[async_trait]
impl BackupInvoker for SqlServerBackupInvoker {
    async fn run_backup(
        &self,
        target: &Target,
        lease: &mut ConnectionLease,
        dest_dir: &Path,
    ) -> Result<BackupArtifact, TaskError> {
        ensure_dest_dir(dest_dir).await?;

        let file_path = dest_dir.join(format!("{}_{}.bak", target.name, timestamp()));

        let mut options = vec!["FORMAT", "INIT", "SKIP", "NOREWIND", "NOUNLOAD", "STATS = 10"];
        if self.compression {
            options.push("COMPRESSION");
        }

        let sql = format!(
            "BACKUP DATABASE [{}] TO DISK = N'{}' WITH {}",
            target.database,
            file_path.display(),
            options.join(", ")
        );

        debug!(target_name = %target.name, file = %file_path.display(), "running BACKUP DATABASE");
        lease.execute(&QuerySpec::new("backup_database", sql)).await?;

        // The engine writes the file; it may live on the server's disk.
        let size_bytes = tokio::fs::metadata(&file_path).await.ok().map(|m| m.len());

        info!(
            target_name = %target.name,
            file = %file_path.display(),
            size_bytes = size_bytes.unwrap_or(0),
            "sqlserver backup completed"
        );

        Ok(BackupArtifact {
            file_path,
            size_bytes,
            compressed: self.compression,
        })
    }
}
