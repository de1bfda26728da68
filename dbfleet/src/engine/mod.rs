//! Engine capability layer.
//!
//! The orchestration core is generic over [`Engine`]; the closed set of
//! vendor implementations lives here. Nothing outside this module branches
//! on the engine kind: callers go through the registry and the dispatching
//! connection factory.

pub mod postgres;
pub mod sqlserver;

pub use postgres::{PostgresEngine, PostgresFactory};
pub use sqlserver::{SqlServerEngine, SqlServerFactory};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tracing::warn;

use crate::config::Target;
use crate::errors::TaskError;
use crate::pool::{ConnectionFactory, ConnectionLease, DbConnection, QuerySpec};
use crate::runner::TaskPayload;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EngineKind {
    Postgres,
    #[serde(rename = "sqlserver")]
    SqlServer,
}

impl fmt::Display for EngineKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EngineKind::Postgres => "postgres",
            EngineKind::SqlServer => "sqlserver",
        };
        write!(f, "{}", name)
    }
}

/// Vendor capability interface: health telemetry and performance
/// maintenance, both executed through a leased connection.
#[async_trait]
pub trait Engine: Send + Sync {
    fn kind(&self) -> EngineKind;

    async fn collect_health(&self, lease: &mut ConnectionLease) -> Result<TaskPayload, TaskError>;

    async fn optimize(&self, lease: &mut ConnectionLease) -> Result<TaskPayload, TaskError>;
}

/// The closed set of engines, looked up by kind.
pub struct EngineRegistry {
    engines: HashMap<EngineKind, Arc<dyn Engine>>,
}

impl EngineRegistry {
    /// Registry with both supported engines.
    pub fn standard() -> Self {
        let mut engines: HashMap<EngineKind, Arc<dyn Engine>> = HashMap::new();
        engines.insert(EngineKind::Postgres, Arc::new(PostgresEngine::new()));
        engines.insert(EngineKind::SqlServer, Arc::new(SqlServerEngine::new()));
        Self { engines }
    }

    pub fn get(&self, kind: EngineKind) -> Result<Arc<dyn Engine>, TaskError> {
        self.engines
            .get(&kind)
            .cloned()
            .ok_or_else(|| TaskError::operation(format!("no engine registered for '{}'", kind)))
    }
}

/// Connection factory for the whole fleet: dispatches to the vendor factory
/// matching the target's engine kind.
pub struct FleetConnectionFactory {
    postgres: PostgresFactory,
    sqlserver: SqlServerFactory,
}

impl FleetConnectionFactory {
    pub fn new() -> Self {
        Self {
            postgres: PostgresFactory,
            sqlserver: SqlServerFactory,
        }
    }
}

impl Default for FleetConnectionFactory {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ConnectionFactory for FleetConnectionFactory {
    async fn connect(&self, target: &Target) -> Result<Box<dyn DbConnection>, TaskError> {
        match target.engine {
            EngineKind::Postgres => self.postgres.connect(target).await,
            EngineKind::SqlServer => self.sqlserver.connect(target).await,
        }
    }
}

/// Run a set of labelled telemetry queries, collecting each result under its
/// label. A failing sub-query is recorded in-place and degrades the payload
/// instead of aborting the round; only a round where nothing at all was
/// collected is a hard failure.
pub(crate) async fn collect_named_queries(
    lease: &mut ConnectionLease,
    queries: &[QuerySpec],
) -> Result<TaskPayload, TaskError> {
    let mut payload = Map::new();
    let mut failed = Vec::new();

    for query in queries {
        match lease.execute(query).await {
            Ok(outcome) => {
                payload.insert(query.label.clone(), outcome.into_value());
            }
            Err(e) => {
                warn!(
                    target_name = lease.target_name(),
                    metric = %query.label,
                    "failed to collect metric: {}",
                    e
                );
                payload.insert(query.label.clone(), json!({ "error": e.to_string() }));
                failed.push(query.label.clone());
            }
        }
    }

    if !queries.is_empty() && failed.len() == queries.len() {
        return Err(TaskError::operation(format!(
            "all {} telemetry queries failed against '{}'",
            queries.len(),
            lease.target_name()
        )));
    }

    Ok(TaskPayload::partial(Value::Object(payload), failed))
}
