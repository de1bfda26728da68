//! PostgreSQL engine: driver glue, health telemetry and maintenance
//! routines.

use async_trait::async_trait;
use serde_json::{json, Map, Value};
use tokio_postgres::types::Type;
use tokio_postgres::{NoTls, Row};
use tracing::{debug, warn};

use super::{collect_named_queries, Engine, EngineKind};
use crate::config::Target;
use crate::errors::TaskError;
use crate::pool::{ConnectionFactory, ConnectionLease, DbConnection, QueryOutcome, QuerySpec};
use crate::runner::TaskPayload;

pub struct PostgresFactory;

#[async_trait]
impl ConnectionFactory for PostgresFactory {
    async fn connect(&self, target: &Target) -> Result<Box<dyn DbConnection>, TaskError> {
        let mut config = tokio_postgres::Config::new();
        config
            .host(&target.host)
            .port(target.port)
            .user(&target.username)
            .password(target.password.expose())
            .dbname(&target.database)
            .application_name("dbfleet")
            .connect_timeout(target.connect_timeout);

        let (client, connection) = config
            .connect(NoTls)
            .await
            .map_err(|e| TaskError::connection_refused(&target.name, e))?;

        // The driver task owns the socket; it ends when the client drops.
        let target_name = target.name.clone();
        tokio::spawn(async move {
            if let Err(e) = connection.await {
                debug!(target_name = %target_name, "postgres connection task ended: {}", e);
            }
        });

        Ok(Box::new(PostgresConnection { client }))
    }
}

struct PostgresConnection {
    client: tokio_postgres::Client,
}

#[async_trait]
impl DbConnection for PostgresConnection {
    async fn execute(&mut self, query: &QuerySpec) -> Result<QueryOutcome, TaskError> {
        let head = query.sql.trim_start().to_ascii_uppercase();
        if head.starts_with("SELECT") || head.starts_with("WITH") || head.starts_with("SHOW") {
            let rows = self
                .client
                .query(&query.sql, &[])
                .await
                .map_err(map_pg_error)?;
            Ok(QueryOutcome::Rows(rows.iter().map(row_to_json).collect()))
        } else {
            // Utility statements (ANALYZE, VACUUM) go over the simple
            // protocol; sum the completion tags for the affected count.
            let messages = self
                .client
                .simple_query(&query.sql)
                .await
                .map_err(map_pg_error)?;
            let affected = messages
                .iter()
                .map(|m| match m {
                    tokio_postgres::SimpleQueryMessage::CommandComplete(n) => *n,
                    _ => 0,
                })
                .sum();
            Ok(QueryOutcome::Affected(affected))
        }
    }

    fn is_open(&self) -> bool {
        !self.client.is_closed()
    }
}

fn map_pg_error(e: tokio_postgres::Error) -> TaskError {
    match e.as_db_error() {
        Some(db) => TaskError::operation(format!("postgres error {}: {}", db.code().code(), db.message())),
        None => TaskError::new(
            crate::errors::ErrorKind::ConnectionRefused,
            format!("postgres transport failure: {}", e),
        ),
    }
}

fn row_to_json(row: &Row) -> Value {
    let mut object = Map::new();
    for (i, column) in row.columns().iter().enumerate() {
        object.insert(column.name().to_string(), column_value(row, i, column.type_()));
    }
    Value::Object(object)
}

fn column_value(row: &Row, i: usize, ty: &Type) -> Value {
    if *ty == Type::INT8 {
        opt(row.try_get::<_, Option<i64>>(i))
    } else if *ty == Type::INT4 {
        opt(row.try_get::<_, Option<i32>>(i))
    } else if *ty == Type::INT2 {
        opt(row.try_get::<_, Option<i16>>(i))
    } else if *ty == Type::FLOAT8 {
        float(row.try_get::<_, Option<f64>>(i))
    } else if *ty == Type::FLOAT4 {
        float(row.try_get::<_, Option<f32>>(i).map(|v| v.map(f64::from)))
    } else if *ty == Type::BOOL {
        opt(row.try_get::<_, Option<bool>>(i))
    } else if *ty == Type::TIMESTAMPTZ {
        row.try_get::<_, Option<chrono::DateTime<chrono::Utc>>>(i)
            .ok()
            .flatten()
            .map(|ts| Value::String(ts.to_rfc3339()))
            .unwrap_or(Value::Null)
    } else {
        opt(row.try_get::<_, Option<String>>(i))
    }
}

fn opt<T: Into<Value>>(value: Result<Option<T>, tokio_postgres::Error>) -> Value {
    value.ok().flatten().map(Into::into).unwrap_or(Value::Null)
}

fn float(value: Result<Option<f64>, tokio_postgres::Error>) -> Value {
    value
        .ok()
        .flatten()
        .and_then(serde_json::Number::from_f64)
        .map(Value::Number)
        .unwrap_or(Value::Null)
}

/// Health telemetry queries. Numeric columns are cast so row conversion
/// stays lossless on every supported server version.
fn health_queries() -> Vec<QuerySpec> {
    vec![
        QuerySpec::new(
            "active_connections",
            "SELECT count(*)::int8 AS connections \
             FROM pg_stat_activity \
             WHERE state = 'active'",
        ),
        QuerySpec::new(
            "database_size",
            "SELECT pg_size_pretty(pg_database_size(current_database())) AS size, \
                    pg_database_size(current_database())::int8 AS size_bytes",
        ),
        QuerySpec::new(
            "long_running_queries",
            "SELECT pid::int8, \
                    extract(epoch FROM now() - query_start)::float8 AS running_secs, \
                    state::text, \
                    usename::text, \
                    left(query, 200) AS query \
             FROM pg_stat_activity \
             WHERE state = 'active' \
               AND now() - query_start > interval '5 minutes' \
               AND query NOT LIKE '%pg_stat_activity%'",
        ),
        QuerySpec::new(
            "table_stats",
            "SELECT schemaname::text, relname::text AS tablename, \
                    n_tup_ins::int8, n_tup_upd::int8, n_tup_del::int8, \
                    n_live_tup::int8, n_dead_tup::int8 \
             FROM pg_stat_user_tables \
             ORDER BY n_tup_ins DESC \
             LIMIT 10",
        ),
        QuerySpec::new(
            "index_usage",
            "SELECT schemaname::text, relname::text AS tablename, \
                    indexrelname::text AS indexname, \
                    idx_scan::int8, idx_tup_read::int8, idx_tup_fetch::int8 \
             FROM pg_stat_user_indexes \
             WHERE idx_scan > 0 \
             ORDER BY idx_scan DESC \
             LIMIT 10",
        ),
        QuerySpec::new(
            "replication_status",
            "SELECT client_addr::text, state::text, sync_state::text, \
                    sent_lsn::text, replay_lsn::text \
             FROM pg_stat_replication",
        ),
        QuerySpec::new(
            "database_conflicts",
            "SELECT confl_tablespace::int8, confl_lock::int8, confl_snapshot::int8, \
                    confl_bufferpin::int8, confl_deadlock::int8 \
             FROM pg_stat_database_conflicts \
             WHERE datname = current_database()",
        ),
    ]
}

pub struct PostgresEngine {
    health: Vec<QuerySpec>,
}

impl PostgresEngine {
    pub fn new() -> Self {
        Self {
            health: health_queries(),
        }
    }
}

impl Default for PostgresEngine {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Engine for PostgresEngine {
    fn kind(&self) -> EngineKind {
        EngineKind::Postgres
    }

    async fn collect_health(&self, lease: &mut ConnectionLease) -> Result<TaskPayload, TaskError> {
        collect_named_queries(lease, &self.health).await
    }

    async fn optimize(&self, lease: &mut ConnectionLease) -> Result<TaskPayload, TaskError> {
        let mut steps = Vec::new();

        lease.execute(&QuerySpec::new("analyze", "ANALYZE")).await?;
        steps.push("statistics updated with ANALYZE");

        lease
            .execute(&QuerySpec::new("vacuum", "VACUUM ANALYZE"))
            .await?;
        steps.push("tables vacuumed and analyzed");

        let candidates_query = QuerySpec::new(
            "index_candidates",
            "SELECT schemaname::text, tablename::text, attname::text, \
                    n_distinct::float8, correlation::float8 \
             FROM pg_stats \
             WHERE n_distinct > 100 AND correlation < 0.1 \
             ORDER BY n_distinct DESC \
             LIMIT 5",
        );

        let mut partial_failures = Vec::new();
        let candidates = match lease.execute(&candidates_query).await {
            Ok(outcome) => outcome.into_value(),
            Err(e) => {
                warn!(target_name = lease.target_name(), "index candidate scan failed: {}", e);
                partial_failures.push(candidates_query.label.clone());
                json!({ "error": e.to_string() })
            }
        };

        Ok(TaskPayload::partial(
            json!({
                "steps": steps,
                "index_candidates": candidates,
            }),
            partial_failures,
        ))
    }
}
