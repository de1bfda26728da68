//! Scripted fakes for the connection and operation seams.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use dbfleet::config::Target;
use dbfleet::pool::{ConnectionFactory, ConnectionLease, DbConnection, QueryOutcome, QuerySpec};
use dbfleet::runner::{Operation, TaskKind, TaskPayload};
use dbfleet::telemetry::TelemetrySink;
use dbfleet::{TaskError, TaskStatus};

/// Shared accounting for fake connections.
#[derive(Clone, Default)]
pub struct FactoryCounters {
    pub created: Arc<AtomicUsize>,
    pub live: Arc<AtomicUsize>,
    pub max_live: Arc<AtomicUsize>,
}

impl FactoryCounters {
    pub fn created(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }

    pub fn live(&self) -> usize {
        self.live.load(Ordering::SeqCst)
    }

    pub fn max_live(&self) -> usize {
        self.max_live.load(Ordering::SeqCst)
    }
}

pub struct FakeConnection {
    counters: FactoryCounters,
}

impl Drop for FakeConnection {
    fn drop(&mut self) {
        self.counters.live.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl DbConnection for FakeConnection {
    async fn execute(&mut self, _query: &QuerySpec) -> Result<QueryOutcome, TaskError> {
        Ok(QueryOutcome::Rows(vec![json!({ "ok": true })]))
    }

    fn is_open(&self) -> bool {
        true
    }
}

/// Factory that counts connections and can refuse specific targets.
pub struct FakeFactory {
    pub counters: FactoryCounters,
    refuse: HashSet<String>,
}

impl FakeFactory {
    pub fn new() -> Self {
        Self {
            counters: FactoryCounters::default(),
            refuse: HashSet::new(),
        }
    }

    pub fn refusing(mut self, target_name: &str) -> Self {
        self.refuse.insert(target_name.to_string());
        self
    }
}

impl Default for FakeFactory {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ConnectionFactory for FakeFactory {
    async fn connect(&self, target: &Target) -> Result<Box<dyn DbConnection>, TaskError> {
        if self.refuse.contains(&target.name) {
            return Err(TaskError::connection_refused(&target.name, "scripted refusal"));
        }

        self.counters.created.fetch_add(1, Ordering::SeqCst);
        let live = self.counters.live.fetch_add(1, Ordering::SeqCst) + 1;
        self.counters.max_live.fetch_max(live, Ordering::SeqCst);

        Ok(Box::new(FakeConnection {
            counters: self.counters.clone(),
        }))
    }
}

/// Per-target behavior for a scripted operation.
#[derive(Clone)]
pub enum Behavior {
    Succeed(Value),
    SucceedAfter(Duration, Value),
    Degrade(Value, Vec<String>),
    Fail(String),
    Hang,
    Panic,
}

/// Records the peak number of concurrently executing operations.
#[derive(Clone, Default)]
pub struct ConcurrencyGauge {
    current: Arc<AtomicUsize>,
    max: Arc<AtomicUsize>,
}

impl ConcurrencyGauge {
    pub fn max_seen(&self) -> usize {
        self.max.load(Ordering::SeqCst)
    }

    fn enter(&self) {
        let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.max.fetch_max(now, Ordering::SeqCst);
    }

    fn exit(&self) {
        self.current.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Operation whose outcome per target is scripted by the test.
pub struct ScriptedOperation {
    kind: TaskKind,
    behaviors: HashMap<String, Behavior>,
    gauge: Option<ConcurrencyGauge>,
}

impl ScriptedOperation {
    pub fn new(kind: TaskKind) -> Self {
        Self {
            kind,
            behaviors: HashMap::new(),
            gauge: None,
        }
    }

    pub fn behavior(mut self, target_name: &str, behavior: Behavior) -> Self {
        self.behaviors.insert(target_name.to_string(), behavior);
        self
    }

    pub fn with_gauge(mut self, gauge: ConcurrencyGauge) -> Self {
        self.gauge = Some(gauge);
        self
    }
}

#[async_trait]
impl Operation for ScriptedOperation {
    fn kind(&self) -> TaskKind {
        self.kind
    }

    async fn execute(
        &self,
        target: &Target,
        _lease: &mut ConnectionLease,
    ) -> Result<TaskPayload, TaskError> {
        if let Some(gauge) = &self.gauge {
            gauge.enter();
        }

        let behavior = self
            .behaviors
            .get(&target.name)
            .cloned()
            .unwrap_or(Behavior::Succeed(json!({ "ok": true })));

        let result = match behavior {
            Behavior::Succeed(value) => Ok(TaskPayload::complete(value)),
            Behavior::SucceedAfter(delay, value) => {
                tokio::time::sleep(delay).await;
                Ok(TaskPayload::complete(value))
            }
            Behavior::Degrade(value, failures) => Ok(TaskPayload::partial(value, failures)),
            Behavior::Fail(message) => Err(TaskError::operation(message)),
            Behavior::Hang => {
                std::future::pending::<()>().await;
                Err(TaskError::operation("unreachable"))
            }
            Behavior::Panic => panic!("scripted panic for {}", target.name),
        };

        if let Some(gauge) = &self.gauge {
            gauge.exit();
        }
        result
    }
}

/// Telemetry sink that records every emission for assertions.
#[derive(Default)]
pub struct RecordingTelemetry {
    pub operations: Mutex<Vec<(String, TaskKind, TaskStatus)>>,
    pub backup_sizes: Mutex<Vec<(String, u64)>>,
    pub gauges: Mutex<Vec<(String, bool)>>,
}

impl RecordingTelemetry {
    pub fn operation_statuses(&self, target: &str) -> Vec<TaskStatus> {
        self.operations
            .lock()
            .unwrap()
            .iter()
            .filter(|(name, _, _)| name == target)
            .map(|(_, _, status)| *status)
            .collect()
    }
}

impl TelemetrySink for RecordingTelemetry {
    fn operation_finished(
        &self,
        target: &str,
        kind: TaskKind,
        _duration: Duration,
        status: TaskStatus,
    ) {
        self.operations
            .lock()
            .unwrap()
            .push((target.to_string(), kind, status));
    }

    fn backup_size(&self, target: &str, size_bytes: u64) {
        self.backup_sizes
            .lock()
            .unwrap()
            .push((target.to_string(), size_bytes));
    }

    fn health_gauge(&self, target: &str, healthy: bool) {
        self.gauges
            .lock()
            .unwrap()
            .push((target.to_string(), healthy));
    }
}
