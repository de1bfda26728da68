//! Retention-based cleanup of the backup directory.
//!
//! Only files with backup extensions are considered; everything else in the
//! directory is left untouched. Cleanup is idempotent: an immediate re-run
//! deletes nothing further.

use chrono::{DateTime, Utc};
use glob::glob;
use serde::Serialize;
use std::path::Path;
use std::time::{Duration, SystemTime};
use tracing::{info, warn};

use crate::errors::TaskError;

const BACKUP_EXTENSIONS: [&str; 4] = ["sql", "sql.gz", "bak", "dump"];

#[derive(Debug, Clone, Serialize)]
pub struct CleanupReport {
    pub files_deleted: usize,
    pub bytes_freed: u64,
    pub deleted: Vec<String>,
    pub errors: Vec<String>,
    pub cutoff: DateTime<Utc>,
}

/// Delete backup files older than `retention_days`.
pub fn cleanup_old_backups(dir: &Path, retention_days: u32) -> Result<CleanupReport, TaskError> {
    let cutoff = SystemTime::now() - Duration::from_secs(u64::from(retention_days) * 86_400);
    let report = cleanup_older_than(dir, cutoff)?;
    info!(
        dir = %dir.display(),
        retention_days,
        files_deleted = report.files_deleted,
        bytes_freed = report.bytes_freed,
        "backup cleanup finished"
    );
    Ok(report)
}

/// Delete backup files whose modification time is before `cutoff`. Split
/// out so cadence-independent tests can inject the cutoff directly.
pub fn cleanup_older_than(dir: &Path, cutoff: SystemTime) -> Result<CleanupReport, TaskError> {
    let mut report = CleanupReport {
        files_deleted: 0,
        bytes_freed: 0,
        deleted: Vec::new(),
        errors: Vec::new(),
        cutoff: DateTime::<Utc>::from(cutoff),
    };

    if !dir.exists() {
        warn!(dir = %dir.display(), "backup directory does not exist, nothing to clean");
        return Ok(report);
    }

    for extension in BACKUP_EXTENSIONS {
        let pattern = format!("{}/*.{}", dir.display(), extension);
        let entries = glob(&pattern)
            .map_err(|e| TaskError::operation(format!("bad cleanup pattern '{}': {}", pattern, e)))?;

        for entry in entries {
            let path = match entry {
                Ok(path) => path,
                Err(e) => {
                    report.errors.push(e.to_string());
                    continue;
                }
            };

            if !path.is_file() {
                continue;
            }

            match file_older_than(&path, cutoff) {
                Ok(Some(size)) => match std::fs::remove_file(&path) {
                    Ok(()) => {
                        report.files_deleted += 1;
                        report.bytes_freed += size;
                        report.deleted.push(path.display().to_string());
                    }
                    Err(e) => {
                        report
                            .errors
                            .push(format!("failed to delete {}: {}", path.display(), e));
                    }
                },
                Ok(None) => {}
                Err(e) => report.errors.push(e),
            }
        }
    }

    Ok(report)
}

/// Size of the file when it is older than the cutoff, `None` otherwise.
fn file_older_than(path: &Path, cutoff: SystemTime) -> Result<Option<u64>, String> {
    let metadata = std::fs::metadata(path)
        .map_err(|e| format!("failed to stat {}: {}", path.display(), e))?;
    let modified = metadata
        .modified()
        .map_err(|e| format!("no modification time for {}: {}", path.display(), e))?;

    if modified < cutoff {
        Ok(Some(metadata.len()))
    } else {
        Ok(None)
    }
}
