//! Configuration loading and validation.
//!
//! The whole fleet is described by one TOML file. Passwords are resolved at
//! load time: a `password_env` reference wins over an inline `password`, and
//! a target with neither is rejected. Validation failures abort startup;
//! nothing else does.

use anyhow::{anyhow, Result};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use super::{Config, Credential, Target, TargetConfig};
use crate::errors::TaskError;
use crate::scheduler::Cadence;

pub struct ConfigManager {
    config: Arc<Config>,
    targets: Vec<Target>,
}

impl ConfigManager {
    pub async fn load(path: &Path) -> Result<Self> {
        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| anyhow!("failed to read config {}: {}", path.display(), e))?;

        let config: Config = toml::from_str(&content)
            .map_err(|e| anyhow!("failed to parse config {}: {}", path.display(), e))?;

        Self::validate(&config)?;

        let targets = Self::build_targets(&config)?;

        info!(
            "Configuration loaded from {}: {} targets ({} enabled)",
            path.display(),
            targets.len(),
            targets.iter().filter(|t| t.enabled).count()
        );

        Ok(Self {
            config: Arc::new(config),
            targets,
        })
    }

    pub fn config(&self) -> Arc<Config> {
        self.config.clone()
    }

    pub fn targets(&self) -> Vec<Target> {
        self.targets.clone()
    }

    fn validate(config: &Config) -> Result<(), TaskError> {
        if config.targets.is_empty() {
            return Err(TaskError::config("no [targets] configured"));
        }

        for (name, target) in &config.targets {
            if target.host.is_empty() {
                return Err(TaskError::config(format!("target '{}': host is empty", name)));
            }
            if target.username.is_empty() {
                return Err(TaskError::config(format!("target '{}': username is empty", name)));
            }
            if target.pool_size == 0 {
                return Err(TaskError::config(format!("target '{}': pool_size must be at least 1", name)));
            }
            if target.connect_timeout_seconds == 0 {
                return Err(TaskError::config(format!(
                    "target '{}': connect_timeout_seconds must be at least 1",
                    name
                )));
            }
        }

        if config.backup.retention_days == 0 {
            return Err(TaskError::config("backup.retention_days must be at least 1"));
        }
        if config.backup.parallel_jobs == 0 {
            return Err(TaskError::config("backup.parallel_jobs must be at least 1"));
        }
        if config.monitoring.check_interval_seconds == 0 {
            return Err(TaskError::config("monitoring.check_interval_seconds must be at least 1"));
        }
        if config.monitoring.max_parallel_checks == 0 {
            return Err(TaskError::config("monitoring.max_parallel_checks must be at least 1"));
        }

        for (field, expr) in [
            ("backup.schedule", &config.backup.schedule),
            ("backup.cleanup_schedule", &config.backup.cleanup_schedule),
            ("optimization.schedule", &config.optimization.schedule),
        ] {
            Cadence::parse(expr)
                .map_err(|e| TaskError::config(format!("{} '{}': {}", field, expr, e)))?;
        }

        if config.alerts.enabled && config.alerts.webhook_url.is_empty() {
            return Err(TaskError::config("alerts.enabled is set but alerts.webhook_url is empty"));
        }

        Ok(())
    }

    fn build_targets(config: &Config) -> Result<Vec<Target>> {
        let mut targets = Vec::with_capacity(config.targets.len());

        for (name, spec) in &config.targets {
            let password = Self::resolve_password(name, spec)?;
            targets.push(Target {
                name: name.clone(),
                engine: spec.engine,
                host: spec.host.clone(),
                port: spec.port,
                database: spec.database.clone(),
                username: spec.username.clone(),
                password,
                pool_size: spec.pool_size,
                enabled: spec.enabled,
                connect_timeout: Duration::from_secs(spec.connect_timeout_seconds),
            });
        }

        // Stable ordering for logs and summaries.
        targets.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(targets)
    }

    fn resolve_password(name: &str, spec: &TargetConfig) -> Result<Credential> {
        if let Some(var) = &spec.password_env {
            match std::env::var(var) {
                Ok(value) if !value.is_empty() => return Ok(Credential::new(value)),
                _ => {
                    if spec.password.is_none() {
                        return Err(anyhow!(
                            "target '{}': password_env '{}' is not set and no inline password is configured",
                            name,
                            var
                        ));
                    }
                    warn!(
                        "target '{}': password_env '{}' is not set, falling back to inline password",
                        name, var
                    );
                }
            }
        }

        spec.password
            .as_ref()
            .map(|p| Credential::new(p.clone()))
            .ok_or_else(|| anyhow!("target '{}': no password or password_env configured", name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(content: &str) -> Config {
        toml::from_str(content).unwrap()
    }

    const MINIMAL: &str = r#"
        [targets.pg_primary]
        engine = "postgres"
        host = "localhost"
        port = 5432
        database = "postgres"
        username = "postgres"
        password = "secret"
    "#;

    #[test]
    fn minimal_config_is_valid() {
        let config = parse(MINIMAL);
        assert!(ConfigManager::validate(&config).is_ok());

        let targets = ConfigManager::build_targets(&config).unwrap();
        assert_eq!(targets.len(), 1);
        assert_eq!(targets[0].name, "pg_primary");
        assert_eq!(targets[0].pool_size, 10);
        assert!(targets[0].enabled);
        assert_eq!(targets[0].connect_timeout, Duration::from_secs(30));
    }

    #[test]
    fn empty_targets_rejected() {
        let config = parse("[monitoring]\ncheck_interval_seconds = 60\n");
        let err = ConfigManager::validate(&config).unwrap_err();
        assert_eq!(err.kind, crate::errors::ErrorKind::ConfigInvalid);
    }

    #[test]
    fn zero_pool_size_rejected() {
        let config = parse(&MINIMAL.replace("password = \"secret\"", "password = \"secret\"\npool_size = 0"));
        assert!(ConfigManager::validate(&config).is_err());
    }

    #[test]
    fn bad_cadence_rejected() {
        let mut config = parse(MINIMAL);
        config.backup.schedule = "whenever".to_string();
        assert!(ConfigManager::validate(&config).is_err());
    }

    #[test]
    fn enabled_alerts_require_webhook() {
        let mut config = parse(MINIMAL);
        config.alerts.enabled = true;
        assert!(ConfigManager::validate(&config).is_err());
        config.alerts.webhook_url = "http://localhost:9999/hook".to_string();
        assert!(ConfigManager::validate(&config).is_ok());
    }

    #[test]
    fn missing_password_rejected() {
        let config = parse(&MINIMAL.replace("password = \"secret\"\n", ""));
        assert!(ConfigManager::build_targets(&config).is_err());
    }

    #[test]
    fn targets_sorted_by_name() {
        let content = format!(
            "{}\n[targets.a_first]\nengine = \"sqlserver\"\nhost = \"h\"\nport = 1433\ndatabase = \"master\"\nusername = \"sa\"\npassword = \"x\"\n",
            MINIMAL
        );
        let targets = ConfigManager::build_targets(&parse(&content)).unwrap();
        assert_eq!(targets[0].name, "a_first");
        assert_eq!(targets[1].name, "pg_primary");
    }
}
