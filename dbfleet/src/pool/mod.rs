//! Bounded per-target connection pools.
//!
//! Each target gets a fixed number of slots; exceeding the bound blocks the
//! acquiring task instead of opening more connections. A [`ConnectionLease`]
//! is the exclusively-owned handle for one operation: dropping it returns
//! the connection to its pool, unless the lease was marked broken (timeout,
//! transport failure), in which case the connection is discarded. Release on
//! every exit path is therefore guaranteed by `Drop`, not by caller
//! discipline.

pub mod connection;
pub use connection::{ConnectionFactory, DbConnection, QueryOutcome, QuerySpec};

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::time::{timeout_at, Instant};
use tracing::debug;

use crate::config::Target;
use crate::errors::TaskError;

/// Accounting counters for one target's pool.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PoolStats {
    pub acquired: u64,
    pub returned: u64,
    pub discarded: u64,
    pub idle: usize,
}

struct TargetPool {
    target: Target,
    factory: Arc<dyn ConnectionFactory>,
    slots: Arc<Semaphore>,
    idle: Mutex<Vec<Box<dyn DbConnection>>>,
    acquired: AtomicU64,
    returned: AtomicU64,
    discarded: AtomicU64,
}

impl TargetPool {
    fn new(target: Target, factory: Arc<dyn ConnectionFactory>) -> Self {
        let bound = target.pool_size.max(1);
        Self {
            target,
            factory,
            slots: Arc::new(Semaphore::new(bound)),
            idle: Mutex::new(Vec::with_capacity(bound)),
            acquired: AtomicU64::new(0),
            returned: AtomicU64::new(0),
            discarded: AtomicU64::new(0),
        }
    }

    fn lock_idle(&self) -> MutexGuard<'_, Vec<Box<dyn DbConnection>>> {
        // A panic while holding this lock never leaves shared state
        // half-updated; recover the guard instead of propagating poison.
        self.idle.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn acquire(pool: &Arc<TargetPool>) -> Result<ConnectionLease, TaskError> {
        let deadline = Instant::now() + pool.target.connect_timeout;
        let waited_secs = pool.target.connect_timeout.as_secs();

        let permit = match timeout_at(deadline, pool.slots.clone().acquire_owned()).await {
            Ok(Ok(permit)) => permit,
            Ok(Err(_)) => {
                return Err(TaskError::operation(format!(
                    "connection pool for '{}' is closed",
                    pool.target.name
                )))
            }
            Err(_) => return Err(TaskError::connect_timeout(&pool.target.name, waited_secs)),
        };

        // Recycle the most recently returned connection; stale ones found
        // on the way are dropped and replaced.
        let conn = loop {
            let candidate = pool.lock_idle().pop();
            match candidate {
                Some(conn) if conn.is_open() => break conn,
                Some(_) => {
                    pool.discarded.fetch_add(1, Ordering::Relaxed);
                    debug!(target_name = %pool.target.name, "dropped stale idle connection");
                }
                None => {
                    let fresh = match timeout_at(deadline, pool.factory.connect(&pool.target)).await {
                        Ok(Ok(conn)) => conn,
                        Ok(Err(e)) => return Err(e),
                        Err(_) => {
                            return Err(TaskError::connect_timeout(&pool.target.name, waited_secs))
                        }
                    };
                    break fresh;
                }
            }
        };

        pool.acquired.fetch_add(1, Ordering::Relaxed);
        Ok(ConnectionLease {
            conn: Some(conn),
            pool: Arc::clone(pool),
            _permit: permit,
            broken: false,
        })
    }

    fn stats(&self) -> PoolStats {
        PoolStats {
            acquired: self.acquired.load(Ordering::Relaxed),
            returned: self.returned.load(Ordering::Relaxed),
            discarded: self.discarded.load(Ordering::Relaxed),
            idle: self.lock_idle().len(),
        }
    }
}

/// Hands out and reclaims live connections, one bounded pool per target.
pub struct ConnectionManager {
    pools: HashMap<String, Arc<TargetPool>>,
}

impl ConnectionManager {
    pub fn new(targets: &[Target], factory: Arc<dyn ConnectionFactory>) -> Self {
        let pools = targets
            .iter()
            .map(|target| {
                (
                    target.name.clone(),
                    Arc::new(TargetPool::new(target.clone(), factory.clone())),
                )
            })
            .collect();
        Self { pools }
    }

    /// Borrow a connection for one operation. Waits up to the target's
    /// connect timeout for a free slot and, when no idle connection is
    /// available, for a fresh connect, both under a single deadline.
    pub async fn acquire(&self, target_name: &str) -> Result<ConnectionLease, TaskError> {
        let pool = self.pools.get(target_name).ok_or_else(|| {
            TaskError::operation(format!("target '{}' has no connection pool", target_name))
        })?;
        TargetPool::acquire(pool).await
    }

    pub fn stats(&self, target_name: &str) -> Option<PoolStats> {
        self.pools.get(target_name).map(|pool| pool.stats())
    }
}

/// A borrowed connection, scoped to a single operation.
pub struct ConnectionLease {
    conn: Option<Box<dyn DbConnection>>,
    pool: Arc<TargetPool>,
    _permit: OwnedSemaphorePermit,
    broken: bool,
}

impl std::fmt::Debug for ConnectionLease {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionLease")
            .field("target", &self.pool.target.name)
            .field("has_conn", &self.conn.is_some())
            .field("broken", &self.broken)
            .finish()
    }
}

impl ConnectionLease {
    pub fn target_name(&self) -> &str {
        &self.pool.target.name
    }

    /// Execute one statement. A transport-level failure marks the lease
    /// broken so the connection is discarded on release.
    pub async fn execute(&mut self, query: &QuerySpec) -> Result<QueryOutcome, TaskError> {
        let conn = self
            .conn
            .as_mut()
            .ok_or_else(|| TaskError::operation("lease has no connection"))?;

        match conn.execute(query).await {
            Ok(outcome) => Ok(outcome),
            Err(e) => {
                if e.kind.poisons_connection() {
                    self.broken = true;
                }
                Err(e)
            }
        }
    }

    /// Prevent this connection from ever re-entering the pool. Used after
    /// an operation timeout, when its state is unknown.
    pub fn mark_broken(&mut self) {
        self.broken = true;
    }
}

impl Drop for ConnectionLease {
    fn drop(&mut self) {
        let Some(conn) = self.conn.take() else {
            return;
        };

        if self.broken || !conn.is_open() {
            self.pool.discarded.fetch_add(1, Ordering::Relaxed);
            debug!(
                target_name = %self.pool.target.name,
                "discarding connection instead of returning it to the pool"
            );
        } else {
            self.pool.returned.fetch_add(1, Ordering::Relaxed);
            self.pool.lock_idle().push(conn);
        }
    }
}
