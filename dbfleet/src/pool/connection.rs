//! Connection seams: the query-executor boundary the pool hands out.
//!
//! The orchestration core never talks to a vendor driver directly; it sees
//! `DbConnection` (execute an opaque, pre-authored query) and
//! `ConnectionFactory` (open a connection for a target). Real
//! implementations live in `engine::postgres` and `engine::sqlserver`;
//! tests substitute scripted fakes.

use async_trait::async_trait;
use serde_json::Value;

use crate::config::Target;
use crate::errors::TaskError;

/// An opaque, pre-authored statement plus a label for logs and payload keys.
#[derive(Debug, Clone)]
pub struct QuerySpec {
    pub label: String,
    pub sql: String,
}

impl QuerySpec {
    pub fn new(label: impl Into<String>, sql: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            sql: sql.into(),
        }
    }
}

/// Result of executing one statement: rows for queries, an affected-row
/// count for everything else.
#[derive(Debug, Clone)]
pub enum QueryOutcome {
    Rows(Vec<Value>),
    Affected(u64),
}

impl QueryOutcome {
    pub fn rows(&self) -> Option<&[Value]> {
        match self {
            QueryOutcome::Rows(rows) => Some(rows),
            QueryOutcome::Affected(_) => None,
        }
    }

    pub fn into_value(self) -> Value {
        match self {
            QueryOutcome::Rows(rows) => Value::Array(rows),
            QueryOutcome::Affected(n) => serde_json::json!({ "affected_rows": n }),
        }
    }
}

/// One live connection. Errors must distinguish transport failures (which
/// poison the connection, see [`crate::errors::ErrorKind::poisons_connection`])
/// from engine-reported failures (which leave it reusable).
#[async_trait]
pub trait DbConnection: Send {
    async fn execute(&mut self, query: &QuerySpec) -> Result<QueryOutcome, TaskError>;

    /// Whether the connection is still usable. Checked before recycling.
    fn is_open(&self) -> bool;
}

#[async_trait]
pub trait ConnectionFactory: Send + Sync {
    /// Open a new connection. Expected failures are `ConnectionRefused`;
    /// the pool applies the connect-timeout ceiling around this call.
    async fn connect(&self, target: &Target) -> Result<Box<dyn DbConnection>, TaskError>;
}
