//! Timeout enforcement and connection discard in the task runner.

mod common;

use common::fixtures::*;
use std::sync::Arc;
use std::time::{Duration, Instant};

use dbfleet::runner::TaskKind;
use dbfleet::telemetry::TelemetrySink;
use dbfleet::{ConnectionManager, ErrorKind, TaskRunner, TaskStatus};

#[tokio::test]
async fn hanging_operation_times_out_and_discards_the_connection() {
    let factory = FakeFactory::new();
    let counters = factory.counters.clone();

    let target = postgres_target("pg-primary", 2);
    let connections = Arc::new(ConnectionManager::new(
        &[target.clone()],
        Arc::new(factory),
    ));
    let telemetry = Arc::new(RecordingTelemetry::default());
    let runner = TaskRunner::new(connections.clone(), telemetry.clone());

    let operation =
        ScriptedOperation::new(TaskKind::HealthCheck).behavior("pg-primary", Behavior::Hang);

    let started = Instant::now();
    let result = runner
        .run(&target, &operation, Duration::from_millis(100))
        .await;
    let elapsed = started.elapsed();

    assert_eq!(result.status, TaskStatus::Failed);
    assert_eq!(result.error.as_ref().unwrap().kind, ErrorKind::OperationTimeout);
    assert!(
        elapsed < Duration::from_millis(600),
        "timeout took {:?}, expected timeout + <500ms slack",
        elapsed
    );

    // The interrupted connection must not go back to the pool.
    let stats = connections.stats("pg-primary").unwrap();
    assert_eq!(stats.discarded, 1);
    assert_eq!(stats.returned, 0);

    // A later run opens a fresh connection and succeeds.
    let healthy = ScriptedOperation::new(TaskKind::HealthCheck);
    let result = runner
        .run(&target, &healthy, Duration::from_millis(100))
        .await;
    assert_eq!(result.status, TaskStatus::Success);
    assert_eq!(counters.created(), 2);

    assert_eq!(
        telemetry.operation_statuses("pg-primary"),
        vec![TaskStatus::Failed, TaskStatus::Success]
    );
}

#[tokio::test]
async fn acquisition_failure_is_captured_not_thrown() {
    let target = postgres_target("pg-primary", 1);
    let connections = Arc::new(ConnectionManager::new(
        &[target.clone()],
        Arc::new(FakeFactory::new().refusing("pg-primary")),
    ));
    let telemetry = Arc::new(RecordingTelemetry::default());
    let runner = TaskRunner::new(connections, telemetry);

    let operation = ScriptedOperation::new(TaskKind::HealthCheck);
    let result = runner
        .run(&target, &operation, Duration::from_secs(1))
        .await;

    assert_eq!(result.status, TaskStatus::Failed);
    assert_eq!(
        result.error.as_ref().unwrap().kind,
        ErrorKind::ConnectionRefused
    );
}

#[tokio::test]
async fn successful_operation_returns_its_connection() {
    let factory = FakeFactory::new();
    let counters = factory.counters.clone();

    let target = postgres_target("pg-primary", 1);
    let connections = Arc::new(ConnectionManager::new(
        &[target.clone()],
        Arc::new(factory),
    ));
    let telemetry = Arc::new(RecordingTelemetry::default());
    let runner = TaskRunner::new(connections.clone(), telemetry);

    let operation = ScriptedOperation::new(TaskKind::HealthCheck);
    for _ in 0..3 {
        let result = runner
            .run(&target, &operation, Duration::from_secs(1))
            .await;
        assert_eq!(result.status, TaskStatus::Success);
    }

    assert_eq!(counters.created(), 1, "the connection should be recycled");
    let stats = connections.stats("pg-primary").unwrap();
    assert_eq!(stats.returned, 3);
}
