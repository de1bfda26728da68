//! SQL Server engine: driver glue, health telemetry and maintenance
//! routines.

use async_trait::async_trait;
use serde_json::{json, Map, Value};
use tiberius::{AuthMethod, Client, Config};
use tokio::net::TcpStream;
use tokio_util::compat::{Compat, TokioAsyncWriteCompatExt};
use tracing::warn;

use super::{collect_named_queries, Engine, EngineKind};
use crate::config::Target;
use crate::errors::{ErrorKind, TaskError};
use crate::pool::{ConnectionFactory, ConnectionLease, DbConnection, QueryOutcome, QuerySpec};
use crate::runner::TaskPayload;

pub struct SqlServerFactory;

#[async_trait]
impl ConnectionFactory for SqlServerFactory {
    async fn connect(&self, target: &Target) -> Result<Box<dyn DbConnection>, TaskError> {
        let mut config = Config::new();
        config.host(&target.host);
        config.port(target.port);
        config.database(&target.database);
        config.authentication(AuthMethod::sql_server(
            &target.username,
            target.password.expose(),
        ));
        config.trust_cert();

        let tcp = TcpStream::connect(config.get_addr())
            .await
            .map_err(|e| TaskError::connection_refused(&target.name, e))?;
        tcp.set_nodelay(true)
            .map_err(|e| TaskError::connection_refused(&target.name, e))?;

        let client = Client::connect(config, tcp.compat_write())
            .await
            .map_err(|e| TaskError::connection_refused(&target.name, e))?;

        Ok(Box::new(SqlServerConnection {
            client,
            alive: true,
        }))
    }
}

struct SqlServerConnection {
    client: Client<Compat<TcpStream>>,
    alive: bool,
}

#[async_trait]
impl DbConnection for SqlServerConnection {
    async fn execute(&mut self, query: &QuerySpec) -> Result<QueryOutcome, TaskError> {
        let head = query.sql.trim_start().to_ascii_uppercase();
        let result = if head.starts_with("SELECT") || head.starts_with("WITH") {
            match self.client.simple_query(query.sql.as_str()).await {
                Ok(stream) => match stream.into_results().await {
                    Ok(result_sets) => {
                        let rows = result_sets
                            .into_iter()
                            .flatten()
                            .map(|row| row_to_json(&row))
                            .collect();
                        Ok(QueryOutcome::Rows(rows))
                    }
                    Err(e) => Err(map_mssql_error(e)),
                },
                Err(e) => Err(map_mssql_error(e)),
            }
        } else {
            self.client
                .execute(query.sql.as_str(), &[])
                .await
                .map(|result| QueryOutcome::Affected(result.total()))
                .map_err(map_mssql_error)
        };

        if let Err(e) = &result {
            if e.kind.poisons_connection() {
                self.alive = false;
            }
        }
        result
    }

    fn is_open(&self) -> bool {
        self.alive
    }
}

fn map_mssql_error(e: tiberius::error::Error) -> TaskError {
    match e {
        tiberius::error::Error::Server(token) => TaskError::operation(format!(
            "sqlserver error {}: {}",
            token.code(),
            token.message()
        )),
        other => TaskError::new(
            ErrorKind::ConnectionRefused,
            format!("sqlserver transport failure: {}", other),
        ),
    }
}

fn row_to_json(row: &tiberius::Row) -> Value {
    let mut object = Map::new();
    for (i, column) in row.columns().iter().enumerate() {
        object.insert(column.name().to_string(), column_value(row, i));
    }
    Value::Object(object)
}

/// TDS types are looser than the catalog suggests, so values are probed in
/// descending order of likelihood rather than matched on column type.
fn column_value(row: &tiberius::Row, i: usize) -> Value {
    if let Ok(Some(v)) = row.try_get::<i64, _>(i) {
        return Value::from(v);
    }
    if let Ok(Some(v)) = row.try_get::<i32, _>(i) {
        return Value::from(v);
    }
    if let Ok(Some(v)) = row.try_get::<i16, _>(i) {
        return Value::from(v);
    }
    if let Ok(Some(v)) = row.try_get::<u8, _>(i) {
        return Value::from(v);
    }
    if let Ok(Some(v)) = row.try_get::<f64, _>(i) {
        return serde_json::Number::from_f64(v)
            .map(Value::Number)
            .unwrap_or(Value::Null);
    }
    if let Ok(Some(v)) = row.try_get::<f32, _>(i) {
        return serde_json::Number::from_f64(f64::from(v))
            .map(Value::Number)
            .unwrap_or(Value::Null);
    }
    if let Ok(Some(v)) = row.try_get::<bool, _>(i) {
        return Value::from(v);
    }
    if let Ok(Some(v)) = row.try_get::<&str, _>(i) {
        return Value::from(v.to_string());
    }
    if let Ok(Some(v)) = row.try_get::<chrono::NaiveDateTime, _>(i) {
        return Value::String(v.format("%Y-%m-%dT%H:%M:%S").to_string());
    }
    Value::Null
}

fn health_queries() -> Vec<QuerySpec> {
    vec![
        QuerySpec::new(
            "active_connections",
            "SELECT COUNT(*) AS connections \
             FROM sys.dm_exec_sessions \
             WHERE is_user_process = 1",
        ),
        QuerySpec::new(
            "database_size",
            "SELECT DB_NAME() AS database_name, \
                    CAST(SUM(size) * 8.0 / 1024 AS FLOAT) AS size_mb \
             FROM sys.master_files \
             WHERE database_id = DB_ID()",
        ),
        QuerySpec::new(
            "wait_stats",
            "SELECT TOP 10 wait_type, wait_time_ms, waiting_tasks_count \
             FROM sys.dm_os_wait_stats \
             WHERE wait_time_ms > 0 \
             ORDER BY wait_time_ms DESC",
        ),
    ]
}

pub struct SqlServerEngine {
    health: Vec<QuerySpec>,
}

impl SqlServerEngine {
    pub fn new() -> Self {
        Self {
            health: health_queries(),
        }
    }
}

impl Default for SqlServerEngine {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Engine for SqlServerEngine {
    fn kind(&self) -> EngineKind {
        EngineKind::SqlServer
    }

    async fn collect_health(&self, lease: &mut ConnectionLease) -> Result<TaskPayload, TaskError> {
        collect_named_queries(lease, &self.health).await
    }

    async fn optimize(&self, lease: &mut ConnectionLease) -> Result<TaskPayload, TaskError> {
        let mut steps = Vec::new();

        lease
            .execute(&QuerySpec::new("update_stats", "EXEC sp_updatestats"))
            .await?;
        steps.push("statistics updated with sp_updatestats");

        let fragmentation_query = QuerySpec::new(
            "fragmented_indexes",
            "SELECT OBJECT_NAME(ips.object_id) AS table_name, \
                    si.name AS index_name, \
                    CAST(ips.avg_fragmentation_in_percent AS FLOAT) AS avg_fragmentation_in_percent \
             FROM sys.dm_db_index_physical_stats(DB_ID(), NULL, NULL, NULL, 'SAMPLED') ips \
             INNER JOIN sys.indexes si \
                ON ips.object_id = si.object_id AND ips.index_id = si.index_id \
             WHERE ips.avg_fragmentation_in_percent > 30 \
             ORDER BY ips.avg_fragmentation_in_percent DESC",
        );

        let mut partial_failures = Vec::new();
        let fragmented = match lease.execute(&fragmentation_query).await {
            Ok(outcome) => outcome.into_value(),
            Err(e) => {
                warn!(
                    target_name = lease.target_name(),
                    "index fragmentation scan failed: {}",
                    e
                );
                partial_failures.push(fragmentation_query.label.clone());
                json!({ "error": e.to_string() })
            }
        };

        Ok(TaskPayload::partial(
            json!({
                "steps": steps,
                "fragmented_indexes": fragmented,
            }),
            partial_failures,
        ))
    }
}
