use anyhow::Result;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, EnvFilter};

use dbfleet::config::ConfigManager;
use dbfleet::engine::{EngineRegistry, FleetConnectionFactory};
use dbfleet::scheduler::jobs::{standard_jobs, JobContext};
use dbfleet::telemetry::{LogTelemetry, TelemetrySink};
use dbfleet::{
    AlertDispatcher, ConnectionManager, HistoryStore, Orchestrator, Scheduler, TargetRegistry,
    TaskRunner,
};

#[tokio::main]
async fn main() -> Result<()> {
    let env_filter = EnvFilter::from_default_env()
        .add_directive("dbfleet=info".parse()?)
        .add_directive("sqlx=warn".parse()?)
        .add_directive("hyper=warn".parse()?)
        .add_directive("reqwest=warn".parse()?)
        .add_directive("tokio_postgres=warn".parse()?)
        .add_directive("tiberius=warn".parse()?);

    fmt().with_env_filter(env_filter).init();

    info!("Starting database fleet automation");

    // Load configuration
    let config_path =
        std::env::var("DBFLEET_CONFIG").unwrap_or_else(|_| "config/dbfleet.toml".to_string());
    let config_manager = ConfigManager::load(Path::new(&config_path)).await?;
    let config = config_manager.config();
    let targets = config_manager.targets();

    // Connection pools and orchestration core
    let factory = Arc::new(FleetConnectionFactory::new());
    let connections = Arc::new(ConnectionManager::new(&targets, factory));
    info!("Connection manager initialized for {} targets", targets.len());

    let registry = Arc::new(TargetRegistry::new(targets));
    let telemetry: Arc<dyn TelemetrySink> = Arc::new(LogTelemetry);
    let runner = Arc::new(TaskRunner::new(connections, telemetry.clone()));
    let orchestrator = Arc::new(Orchestrator::new(registry, runner));
    let engines = Arc::new(EngineRegistry::standard());
    info!("Orchestrator initialized");

    // Alerting
    let alerts = Arc::new(AlertDispatcher::new(&config.alerts));
    if alerts.is_enabled() {
        info!("Alert dispatcher enabled");
    } else {
        warn!("Alerting is disabled; no notifications will be sent");
    }

    // Operational history
    let history_path = format!("{}/dbfleet.db", config.fleet.data_dir);
    let history = Arc::new(HistoryStore::new(&history_path).await?);

    // Scheduler with the four standing jobs
    let ctx = Arc::new(JobContext {
        config: config.clone(),
        orchestrator,
        engines,
        alerts,
        history,
        telemetry,
    });
    let jobs = standard_jobs(ctx)?;

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    let scheduler = Scheduler::new(jobs, shutdown_rx);
    let tracker = scheduler.tracker();
    let scheduler_handle = tokio::spawn(scheduler.run());
    info!(
        "Scheduler started (health every {}s, maintenance '{}', optimization '{}', cleanup '{}')",
        config.monitoring.check_interval_seconds,
        config.backup.schedule,
        config.optimization.schedule,
        config.backup.cleanup_schedule
    );

    wait_for_shutdown_signal().await;

    info!("Shutdown signal received, stopping scheduler");
    let _ = shutdown_tx.send(true);
    if let Err(e) = scheduler_handle.await {
        error!("scheduler task failed: {}", e);
    }

    // Let in-flight jobs finish; no new firings are dispatched past here.
    tracker.wait_idle(Duration::from_secs(30)).await;
    info!("Database fleet automation stopped");
    Ok(())
}

#[cfg(unix)]
async fn wait_for_shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    match signal(SignalKind::terminate()) {
        Ok(mut sigterm) => {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => info!("SIGINT received"),
                _ = sigterm.recv() => info!("SIGTERM received"),
            }
        }
        Err(e) => {
            error!("failed to register SIGTERM handler: {}", e);
            let _ = tokio::signal::ctrl_c().await;
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
