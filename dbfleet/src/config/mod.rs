pub mod manager;
pub use manager::ConfigManager;

use serde::Deserialize;
use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

use crate::engine::EngineKind;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub fleet: FleetConfig,
    #[serde(default)]
    pub monitoring: MonitoringConfig,
    #[serde(default)]
    pub alerts: AlertConfig,
    #[serde(default)]
    pub backup: BackupConfig,
    #[serde(default)]
    pub optimization: OptimizationConfig,
    #[serde(default)]
    pub targets: HashMap<String, TargetConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FleetConfig {
    #[serde(default = "default_data_dir")]
    pub data_dir: String,
    #[serde(default = "default_reports_dir")]
    pub reports_dir: String,
}

fn default_data_dir() -> String {
    "data".to_string()
}

fn default_reports_dir() -> String {
    "reports".to_string()
}

impl Default for FleetConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            reports_dir: default_reports_dir(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct MonitoringConfig {
    /// Interval between health rounds. Sub-minute values are allowed.
    #[serde(default = "default_check_interval")]
    pub check_interval_seconds: u64,
    /// Wall-clock ceiling for one health/optimize task against one target.
    #[serde(default = "default_task_timeout")]
    pub task_timeout_seconds: u64,
    /// Fan-out bound for health rounds.
    #[serde(default = "default_max_parallel_checks")]
    pub max_parallel_checks: usize,
    #[serde(default)]
    pub thresholds: Thresholds,
}

fn default_check_interval() -> u64 {
    300
}

fn default_task_timeout() -> u64 {
    60
}

fn default_max_parallel_checks() -> usize {
    8
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self {
            check_interval_seconds: default_check_interval(),
            task_timeout_seconds: default_task_timeout(),
            max_parallel_checks: default_max_parallel_checks(),
            thresholds: Thresholds::default(),
        }
    }
}

/// Alerting thresholds. Each rule is independent; omitting one disables it.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Thresholds {
    /// WARNING when the reported active connection count exceeds this.
    pub max_active_connections: Option<u64>,
    /// WARNING when the reported long-running-query list is longer than this.
    pub max_long_running_queries: Option<u64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AlertConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub webhook_url: String,
    #[serde(default)]
    pub recipients: Vec<String>,
    #[serde(default = "default_send_timeout")]
    pub send_timeout_seconds: u64,
}

fn default_send_timeout() -> u64 {
    10
}

#[derive(Debug, Clone, Deserialize)]
pub struct BackupConfig {
    /// Cadence of the daily maintenance job (backups + cleanup + digest).
    #[serde(default = "default_backup_schedule")]
    pub schedule: String,
    /// Cadence of the standalone retention cleanup job.
    #[serde(default = "default_cleanup_schedule")]
    pub cleanup_schedule: String,
    #[serde(default = "default_retention_days")]
    pub retention_days: u32,
    #[serde(default = "default_backup_dir")]
    pub backup_dir: String,
    #[serde(default = "default_compression")]
    pub compression: bool,
    /// Concurrent backup tasks during daily maintenance.
    #[serde(default = "default_parallel_jobs")]
    pub parallel_jobs: usize,
    #[serde(default = "default_backup_timeout")]
    pub operation_timeout_seconds: u64,
}

fn default_backup_schedule() -> String {
    "daily 02:00".to_string()
}

fn default_cleanup_schedule() -> String {
    "daily 03:00".to_string()
}

fn default_retention_days() -> u32 {
    7
}

fn default_backup_dir() -> String {
    "/var/backups/dbfleet".to_string()
}

fn default_compression() -> bool {
    true
}

fn default_parallel_jobs() -> usize {
    2
}

fn default_backup_timeout() -> u64 {
    3600
}

impl Default for BackupConfig {
    fn default() -> Self {
        Self {
            schedule: default_backup_schedule(),
            cleanup_schedule: default_cleanup_schedule(),
            retention_days: default_retention_days(),
            backup_dir: default_backup_dir(),
            compression: default_compression(),
            parallel_jobs: default_parallel_jobs(),
            operation_timeout_seconds: default_backup_timeout(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct OptimizationConfig {
    #[serde(default = "default_optimization_schedule")]
    pub schedule: String,
    #[serde(default = "default_optimization_timeout")]
    pub operation_timeout_seconds: u64,
}

fn default_optimization_schedule() -> String {
    "weekly sun 01:00".to_string()
}

fn default_optimization_timeout() -> u64 {
    900
}

impl Default for OptimizationConfig {
    fn default() -> Self {
        Self {
            schedule: default_optimization_schedule(),
            operation_timeout_seconds: default_optimization_timeout(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct TargetConfig {
    pub engine: EngineKind,
    pub host: String,
    pub port: u16,
    pub database: String,
    pub username: String,
    /// Inline password; used only when `password_env` is absent or unset.
    pub password: Option<String>,
    /// Name of an environment variable holding the password.
    pub password_env: Option<String>,
    #[serde(default = "default_pool_size")]
    pub pool_size: usize,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_seconds: u64,
}

fn default_pool_size() -> usize {
    10
}

fn default_enabled() -> bool {
    true
}

fn default_connect_timeout() -> u64 {
    30
}

/// A password that never appears in logs or debug output.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential(String);

impl Credential {
    pub fn new(secret: impl Into<String>) -> Self {
        Self(secret.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Credential(***)")
    }
}

/// One configured database endpoint, credentials resolved.
#[derive(Debug, Clone)]
pub struct Target {
    pub name: String,
    pub engine: EngineKind,
    pub host: String,
    pub port: u16,
    pub database: String,
    pub username: String,
    pub password: Credential,
    pub pool_size: usize,
    pub enabled: bool,
    pub connect_timeout: Duration,
}
