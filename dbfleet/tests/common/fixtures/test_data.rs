//! Common test data and builders.

use std::time::Duration;

use dbfleet::config::Credential;
use dbfleet::{EngineKind, Target};

/// Common test target names
pub mod targets {
    pub const PG_PRIMARY: &str = "pg-primary";
    pub const PG_REPLICA: &str = "pg-replica";
    pub const MS_REPORTING: &str = "ms-reporting";
}

/// Common job names
pub mod job_names {
    pub const HEALTH: &str = "health-check";
    pub const MAINTENANCE: &str = "daily-maintenance";
    pub const OPTIMIZATION: &str = "weekly-optimization";
    pub const CLEANUP: &str = "retention-cleanup";
}

pub fn postgres_target(name: &str, pool_size: usize) -> Target {
    Target {
        name: name.to_string(),
        engine: EngineKind::Postgres,
        host: "localhost".to_string(),
        port: 5432,
        database: "postgres".to_string(),
        username: "postgres".to_string(),
        password: Credential::new("test-password"),
        pool_size,
        enabled: true,
        connect_timeout: Duration::from_secs(5),
    }
}

pub fn sqlserver_target(name: &str, pool_size: usize) -> Target {
    Target {
        name: name.to_string(),
        engine: EngineKind::SqlServer,
        host: "localhost".to_string(),
        port: 1433,
        database: "master".to_string(),
        username: "sa".to_string(),
        password: Credential::new("test-password"),
        pool_size,
        enabled: true,
        connect_timeout: Duration::from_secs(5),
    }
}

pub fn disabled_target(name: &str) -> Target {
    let mut target = postgres_target(name, 1);
    target.enabled = false;
    target
}
