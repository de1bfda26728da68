//! Fan-out and rollup behavior across heterogeneous outcomes.

mod common;

use common::fixtures::*;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

use dbfleet::runner::TaskKind;
use dbfleet::telemetry::TelemetrySink;
use dbfleet::{
    ConnectionManager, ErrorKind, Orchestrator, Target, TargetRegistry, TaskRunner, TaskStatus,
};

fn harness(targets: Vec<Target>, factory: FakeFactory) -> Arc<Orchestrator> {
    let telemetry: Arc<dyn TelemetrySink> = Arc::new(RecordingTelemetry::default());
    let connections = Arc::new(ConnectionManager::new(&targets, Arc::new(factory)));
    let runner = Arc::new(TaskRunner::new(connections, telemetry));
    let registry = Arc::new(TargetRegistry::new(targets));
    Arc::new(Orchestrator::new(registry, runner))
}

const TIMEOUT: Duration = Duration::from_secs(5);

#[tokio::test]
async fn one_failure_fails_the_round_regardless_of_completion_order() {
    let targets = vec![
        postgres_target("a", 2),
        postgres_target("b", 2),
        postgres_target("c", 2),
        sqlserver_target("d", 2),
    ];
    let orchestrator = harness(targets, FakeFactory::new());

    // Deliberately uneven delays so completion order differs from name order.
    let operation = Arc::new(
        ScriptedOperation::new(TaskKind::HealthCheck)
            .behavior("a", Behavior::SucceedAfter(Duration::from_millis(80), json!({})))
            .behavior("b", Behavior::Fail("engine exploded".to_string()))
            .behavior("c", Behavior::SucceedAfter(Duration::from_millis(10), json!({})))
            .behavior("d", Behavior::Degrade(json!({}), vec!["wait_stats".to_string()])),
    );

    let summary = orchestrator.fan_out(operation, TIMEOUT, 8).await;

    assert_eq!(summary.overall, TaskStatus::Failed);
    assert_eq!(summary.total_targets, 4);
    assert_eq!(summary.failed(), 1);
    assert_eq!(summary.degraded(), 1);
    assert_eq!(summary.succeeded(), 2);

    // Summaries are name-ordered, not completion-ordered.
    let names: Vec<&str> = summary.results.iter().map(|r| r.target.as_str()).collect();
    assert_eq!(names, vec!["a", "b", "c", "d"]);
}

#[tokio::test]
async fn degraded_without_failures_rolls_up_degraded() {
    let targets = vec![postgres_target("a", 1), postgres_target("b", 1)];
    let orchestrator = harness(targets, FakeFactory::new());

    let operation = Arc::new(
        ScriptedOperation::new(TaskKind::HealthCheck)
            .behavior("b", Behavior::Degrade(json!({}), vec!["replication_status".to_string()])),
    );

    let summary = orchestrator.fan_out(operation, TIMEOUT, 8).await;
    assert_eq!(summary.overall, TaskStatus::Degraded);

    let degraded = &summary.results[1];
    assert_eq!(degraded.target, "b");
    assert_eq!(
        degraded.error.as_ref().unwrap().kind,
        ErrorKind::PartialFailure
    );
}

#[tokio::test]
async fn all_success_rolls_up_success() {
    let targets = vec![postgres_target("a", 1), sqlserver_target("b", 1)];
    let orchestrator = harness(targets, FakeFactory::new());

    let operation = Arc::new(ScriptedOperation::new(TaskKind::HealthCheck));
    let summary = orchestrator.fan_out(operation, TIMEOUT, 8).await;

    assert_eq!(summary.overall, TaskStatus::Success);
    assert_eq!(summary.succeeded(), 2);
}

#[tokio::test]
async fn disabled_targets_never_appear_in_a_summary() {
    let targets = vec![
        postgres_target("a", 1),
        disabled_target("sleeping"),
        postgres_target("z", 1),
    ];
    let orchestrator = harness(targets, FakeFactory::new());

    let operation = Arc::new(ScriptedOperation::new(TaskKind::HealthCheck));
    let summary = orchestrator.fan_out(operation, TIMEOUT, 8).await;

    assert_eq!(summary.total_targets, 2);
    assert!(summary.results.iter().all(|r| r.target != "sleeping"));
}

#[tokio::test]
async fn panicked_task_yields_a_failed_result_not_an_absent_one() {
    let targets = vec![postgres_target("a", 1), postgres_target("boom", 1)];
    let orchestrator = harness(targets, FakeFactory::new());

    let operation = Arc::new(
        ScriptedOperation::new(TaskKind::HealthCheck).behavior("boom", Behavior::Panic),
    );

    let summary = orchestrator.fan_out(operation, TIMEOUT, 8).await;

    assert_eq!(summary.overall, TaskStatus::Failed);
    assert_eq!(summary.results.len(), 2);
    let aborted = summary.results.iter().find(|r| r.target == "boom").unwrap();
    assert!(aborted.is_failed());
    assert!(aborted.error.as_ref().unwrap().message.contains("aborted"));

    // The sibling is unaffected.
    let ok = summary.results.iter().find(|r| r.target == "a").unwrap();
    assert_eq!(ok.status, TaskStatus::Success);
}

#[tokio::test]
async fn unreachable_target_degrades_only_itself() {
    let targets = vec![postgres_target("a", 1), postgres_target("refused", 1)];
    let orchestrator = harness(targets, FakeFactory::new().refusing("refused"));

    let operation = Arc::new(ScriptedOperation::new(TaskKind::HealthCheck));
    let summary = orchestrator.fan_out(operation, TIMEOUT, 8).await;

    assert_eq!(summary.overall, TaskStatus::Failed);
    let refused = summary.results.iter().find(|r| r.target == "refused").unwrap();
    assert_eq!(
        refused.error.as_ref().unwrap().kind,
        ErrorKind::ConnectionRefused
    );
    assert_eq!(summary.succeeded(), 1);
}

#[tokio::test]
async fn fan_out_respects_the_concurrency_bound() {
    let targets: Vec<Target> = (0..6)
        .map(|i| postgres_target(&format!("t{}", i), 2))
        .collect();
    let orchestrator = harness(targets, FakeFactory::new());

    let gauge = ConcurrencyGauge::default();
    let mut operation = ScriptedOperation::new(TaskKind::HealthCheck).with_gauge(gauge.clone());
    for i in 0..6 {
        operation = operation.behavior(
            &format!("t{}", i),
            Behavior::SucceedAfter(Duration::from_millis(40), json!({})),
        );
    }

    let summary = orchestrator.fan_out(Arc::new(operation), TIMEOUT, 2).await;

    assert_eq!(summary.overall, TaskStatus::Success);
    assert!(
        gauge.max_seen() <= 2,
        "saw {} concurrent operations with a bound of 2",
        gauge.max_seen()
    );
}

#[tokio::test]
async fn repeated_fan_outs_produce_structurally_equivalent_summaries() {
    let targets = vec![postgres_target("a", 2), sqlserver_target("b", 2)];
    let orchestrator = harness(targets, FakeFactory::new());

    let operation = Arc::new(ScriptedOperation::new(TaskKind::HealthCheck));
    let first = orchestrator.fan_out(operation.clone(), TIMEOUT, 8).await;
    let second = orchestrator.fan_out(operation, TIMEOUT, 8).await;

    assert_eq!(first.total_targets, second.total_targets);
    assert_eq!(first.overall, second.overall);
    let names = |s: &dbfleet::OrchestrationSummary| {
        s.results.iter().map(|r| r.target.clone()).collect::<Vec<_>>()
    };
    assert_eq!(names(&first), names(&second));
    assert_ne!(first.round_id, second.round_id);
}
