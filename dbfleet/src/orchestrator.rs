//! Fan-out of one operation across all enabled targets.
//!
//! One runner task is spawned per target, bounded by a semaphore so a
//! configured parallelism cap holds even for large fleets. A slow or failing
//! target never cancels or blocks its siblings; a panicked task is folded
//! into a failed result so every attempted target appears in the summary.

use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{RwLock, Semaphore};
use tracing::{error, info};
use uuid::Uuid;

use crate::config::Target;
use crate::errors::TaskError;
use crate::runner::{Operation, TaskKind, TaskResult, TaskRunner, TaskStatus};

/// The configured fleet, keyed by target name. Read-mostly after startup;
/// the enabled flag can be toggled at runtime under the lock.
pub struct TargetRegistry {
    targets: RwLock<BTreeMap<String, Target>>,
}

impl TargetRegistry {
    pub fn new(targets: Vec<Target>) -> Self {
        let map = targets
            .into_iter()
            .map(|target| (target.name.clone(), target))
            .collect();
        Self {
            targets: RwLock::new(map),
        }
    }

    /// Name-ordered snapshot of the enabled targets. Disabled targets are
    /// skipped entirely and never appear in a summary.
    pub async fn enabled_targets(&self) -> Vec<Target> {
        let targets = self.targets.read().await;
        targets.values().filter(|t| t.enabled).cloned().collect()
    }

    pub async fn all_targets(&self) -> Vec<Target> {
        let targets = self.targets.read().await;
        targets.values().cloned().collect()
    }

    pub async fn get(&self, name: &str) -> Option<Target> {
        let targets = self.targets.read().await;
        targets.get(name).cloned()
    }

    pub async fn set_enabled(&self, name: &str, enabled: bool) -> Result<(), TaskError> {
        let mut targets = self.targets.write().await;
        match targets.get_mut(name) {
            Some(target) => {
                target.enabled = enabled;
                info!(target_name = name, enabled, "target enabled flag changed");
                Ok(())
            }
            None => Err(TaskError::operation(format!("unknown target '{}'", name))),
        }
    }
}

/// Aggregate over one fan-out round.
#[derive(Debug, Clone, Serialize)]
pub struct OrchestrationSummary {
    pub round_id: String,
    pub kind: TaskKind,
    pub started_at: DateTime<Utc>,
    #[serde(serialize_with = "serialize_duration_ms")]
    pub duration: Duration,
    pub total_targets: usize,
    pub overall: TaskStatus,
    pub results: Vec<TaskResult>,
}

fn serialize_duration_ms<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    serializer.serialize_u64(duration.as_millis() as u64)
}

impl OrchestrationSummary {
    pub fn succeeded(&self) -> usize {
        self.results
            .iter()
            .filter(|r| r.status == TaskStatus::Success)
            .count()
    }

    pub fn degraded(&self) -> usize {
        self.results.iter().filter(|r| r.is_degraded()).count()
    }

    pub fn failed(&self) -> usize {
        self.results.iter().filter(|r| r.is_failed()).count()
    }
}

/// Three-level rollup: failed dominates, degraded is next, success only if
/// everything succeeded. Deterministic regardless of completion order.
pub fn rollup(results: &[TaskResult]) -> TaskStatus {
    if results.iter().any(TaskResult::is_failed) {
        TaskStatus::Failed
    } else if results.iter().any(TaskResult::is_degraded) {
        TaskStatus::Degraded
    } else {
        TaskStatus::Success
    }
}

pub struct Orchestrator {
    registry: Arc<TargetRegistry>,
    runner: Arc<TaskRunner>,
}

impl Orchestrator {
    pub fn new(registry: Arc<TargetRegistry>, runner: Arc<TaskRunner>) -> Self {
        Self { registry, runner }
    }

    pub fn registry(&self) -> &Arc<TargetRegistry> {
        &self.registry
    }

    /// Run `operation` once against every enabled target, at most
    /// `max_concurrency` at a time, and aggregate the results.
    pub async fn fan_out(
        &self,
        operation: Arc<dyn Operation>,
        per_target_timeout: Duration,
        max_concurrency: usize,
    ) -> OrchestrationSummary {
        let kind = operation.kind();
        let started_at = Utc::now();
        let started = Instant::now();

        let targets = self.registry.enabled_targets().await;
        let total_targets = targets.len();
        let gate = Arc::new(Semaphore::new(max_concurrency.max(1)));

        let mut handles = Vec::with_capacity(total_targets);
        for target in targets {
            let runner = self.runner.clone();
            let operation = operation.clone();
            let gate = gate.clone();
            let name = target.name.clone();

            let handle = tokio::spawn(async move {
                let _slot = gate.acquire_owned().await.ok();
                runner.run(&target, operation.as_ref(), per_target_timeout).await
            });
            handles.push((name, handle));
        }

        let (names, handles): (Vec<_>, Vec<_>) = handles.into_iter().unzip();
        let mut results = Vec::with_capacity(total_targets);
        for (name, outcome) in names.into_iter().zip(join_all(handles).await) {
            match outcome {
                Ok(result) => results.push(result),
                Err(e) => {
                    error!(target_name = %name, task_kind = %kind, "fan-out task aborted: {}", e);
                    results.push(TaskResult::aborted(name, kind, e));
                }
            }
        }

        // Completion order is unspecified; summaries are name-ordered.
        results.sort_by(|a, b| a.target.cmp(&b.target));
        let overall = rollup(&results);

        info!(
            task_kind = %kind,
            total = total_targets,
            overall = %overall,
            duration_ms = started.elapsed().as_millis() as u64,
            "fan-out round finished"
        );

        OrchestrationSummary {
            round_id: Uuid::new_v4().to_string(),
            kind,
            started_at,
            duration: started.elapsed(),
            total_targets,
            overall,
            results,
        }
    }
}
