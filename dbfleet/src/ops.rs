//! The fleet operations: health check, backup, optimize.
//!
//! Each is an [`Operation`] the orchestrator fans out over the enabled
//! targets. Engine selection is a registry lookup on the target's kind, so
//! nothing here grows vendor branches.

use async_trait::async_trait;
use serde_json::json;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use crate::backup::{BackupInvoker, PgDumpInvoker, SqlServerBackupInvoker};
use crate::config::Target;
use crate::engine::{EngineKind, EngineRegistry};
use crate::errors::TaskError;
use crate::pool::ConnectionLease;
use crate::runner::{Operation, TaskKind, TaskPayload};

pub struct HealthCheckOperation {
    engines: Arc<EngineRegistry>,
}

impl HealthCheckOperation {
    pub fn new(engines: Arc<EngineRegistry>) -> Self {
        Self { engines }
    }
}

#[async_trait]
impl Operation for HealthCheckOperation {
    fn kind(&self) -> TaskKind {
        TaskKind::HealthCheck
    }

    async fn execute(
        &self,
        target: &Target,
        lease: &mut ConnectionLease,
    ) -> Result<TaskPayload, TaskError> {
        let engine = self.engines.get(target.engine)?;
        engine.collect_health(lease).await
    }
}

pub struct OptimizeOperation {
    engines: Arc<EngineRegistry>,
}

impl OptimizeOperation {
    pub fn new(engines: Arc<EngineRegistry>) -> Self {
        Self { engines }
    }
}

#[async_trait]
impl Operation for OptimizeOperation {
    fn kind(&self) -> TaskKind {
        TaskKind::Optimize
    }

    async fn execute(
        &self,
        target: &Target,
        lease: &mut ConnectionLease,
    ) -> Result<TaskPayload, TaskError> {
        let engine = self.engines.get(target.engine)?;
        engine.optimize(lease).await
    }
}

pub struct BackupOperation {
    invokers: HashMap<EngineKind, Arc<dyn BackupInvoker>>,
    dest_dir: PathBuf,
}

impl BackupOperation {
    /// Backup operation with the real per-engine invokers.
    pub fn new(dest_dir: PathBuf, compression: bool) -> Self {
        let mut invokers: HashMap<EngineKind, Arc<dyn BackupInvoker>> = HashMap::new();
        invokers.insert(EngineKind::Postgres, Arc::new(PgDumpInvoker::new(compression)));
        invokers.insert(
            EngineKind::SqlServer,
            Arc::new(SqlServerBackupInvoker::new(compression)),
        );
        Self { invokers, dest_dir }
    }

    /// Replace an invoker; test harnesses substitute fakes here.
    pub fn with_invoker(mut self, kind: EngineKind, invoker: Arc<dyn BackupInvoker>) -> Self {
        self.invokers.insert(kind, invoker);
        self
    }
}

#[async_trait]
impl Operation for BackupOperation {
    fn kind(&self) -> TaskKind {
        TaskKind::Backup
    }

    async fn execute(
        &self,
        target: &Target,
        lease: &mut ConnectionLease,
    ) -> Result<TaskPayload, TaskError> {
        let invoker = self.invokers.get(&target.engine).ok_or_else(|| {
            TaskError::operation(format!("no backup invoker for engine '{}'", target.engine))
        })?;

        let artifact = invoker.run_backup(target, lease, &self.dest_dir).await?;

        Ok(TaskPayload::complete(json!({
            "file_path": artifact.file_path.display().to_string(),
            "size_bytes": artifact.size_bytes,
            "compressed": artifact.compressed,
        })))
    }
}
