mod common;

use std::sync::Arc;
use std::time::Duration;

use dagflow::context::Stopper;
use dagflow::dag::WorkflowDefinition;
use dagflow::dependent::{DependentItem, MemoryProcessStore, ProcessInstanceStore};
use dagflow::engine::{TaskOutcome, WorkflowReport, WorkflowRunner};
use dagflow::types::{CycleType, DependentRelation, ExecutionStatus};
use dagflow_test_utils::builders::{DependentParamsBuilder, WorkflowBuilder};
use dagflow_test_utils::fakes::FakeClusterJobClient;
use dagflow_test_utils::with_timeout;
use tempfile::TempDir;

fn runner(
    dir: &TempDir,
    definition: WorkflowDefinition,
    definition_id: i64,
    store: Arc<MemoryProcessStore>,
    stopper: Stopper,
) -> WorkflowRunner {
    let env = common::environment(store.clone(), FakeClusterJobClient::new(), stopper);
    WorkflowRunner::new(
        definition,
        definition_id,
        store,
        env,
        common::worker_settings(dir.path()),
    )
}

async fn run(definition: WorkflowDefinition) -> (TempDir, Arc<MemoryProcessStore>, WorkflowReport) {
    common::init_tracing();
    let dir = TempDir::new().unwrap();
    let store = Arc::new(MemoryProcessStore::new());
    let report = with_timeout(runner(&dir, definition, 1, store.clone(), Stopper::new()).run())
        .await
        .unwrap();
    (dir, store, report)
}

#[tokio::test]
async fn diamond_runs_every_task_and_records_instances() {
    let definition = WorkflowBuilder::new()
        .shell("extract", "echo extracting", &[])
        .shell("left", "echo left", &["extract"])
        .shell("right", "echo right", &["extract"])
        .shell("load", "echo loading", &["left", "right"])
        .build();

    let (dir, store, report) = run(definition).await;

    assert!(report.is_success());
    assert_eq!(report.tasks.len(), 4);
    assert!(report.tasks.iter().all(|(_, o)| *o == TaskOutcome::Succeeded));
    assert_eq!(report.tasks.first().map(|(n, _)| n.as_str()), Some("extract"));
    assert_eq!(report.tasks.last().map(|(n, _)| n.as_str()), Some("load"));

    let process = store.process(report.process_instance_id).unwrap();
    assert_eq!(process.state, ExecutionStatus::Success);
    assert!(process.manual);
    assert!(process.end_time.is_some());

    let tasks = store.find_valid_task_instances(report.process_instance_id).unwrap();
    assert_eq!(tasks.len(), 4);
    assert!(tasks.iter().all(|t| t.state == ExecutionStatus::Success));

    let extract = tasks.iter().find(|t| t.name == "extract").unwrap();
    let pid = report.process_instance_id;
    let log = dir
        .path()
        .join("1")
        .join(pid.to_string())
        .join(extract.id.to_string())
        .join(format!("{pid}_{}.log", extract.id));
    assert_eq!(std::fs::read_to_string(log).unwrap(), "extracting\n");
}

#[tokio::test]
async fn failure_skips_downstream_but_not_siblings() {
    let definition = WorkflowBuilder::new()
        .shell("a", "true", &[])
        .shell("broken", "exit 4", &["a"])
        .shell("sibling", "true", &["a"])
        .shell("after_broken", "true", &["broken"])
        .shell("end", "true", &["after_broken", "sibling"])
        .build();

    let (_dir, store, report) = run(definition).await;

    assert_eq!(report.state, ExecutionStatus::Failure);
    assert_eq!(report.outcome("broken"), Some(TaskOutcome::Failed(4)));
    assert_eq!(report.outcome("sibling"), Some(TaskOutcome::Succeeded));
    assert_eq!(report.outcome("after_broken"), Some(TaskOutcome::Skipped));
    assert_eq!(report.outcome("end"), Some(TaskOutcome::Skipped));

    let recorded = store.find_valid_task_instances(report.process_instance_id).unwrap();
    assert_eq!(recorded.len(), 3, "skipped tasks get no instance");
}

#[tokio::test]
async fn forbidden_task_is_not_run() {
    let definition = WorkflowBuilder::new()
        .shell("gate", "exit 1", &[])
        .forbidden("gate")
        .shell("after", "true", &["gate"])
        .build();

    let (_dir, _store, report) = run(definition).await;

    assert!(report.is_success());
    assert_eq!(report.outcome("gate"), Some(TaskOutcome::Forbidden));
    assert_eq!(report.outcome("after"), Some(TaskOutcome::Succeeded));
}

#[tokio::test]
async fn invalid_parameters_fail_the_task() {
    let definition = WorkflowBuilder::new()
        .spark("submit", "", &[])
        .shell("after", "true", &["submit"])
        .build();

    let (_dir, _store, report) = run(definition).await;

    assert_eq!(report.outcome("submit"), Some(TaskOutcome::Failed(-1)));
    assert_eq!(report.outcome("after"), Some(TaskOutcome::Skipped));
    assert_eq!(report.state, ExecutionStatus::Failure);
}

#[tokio::test]
async fn dependent_task_observes_earlier_run() {
    common::init_tracing();
    let dir = TempDir::new().unwrap();
    let store = Arc::new(MemoryProcessStore::new());

    let upstream = WorkflowBuilder::new().shell("produce", "true", &[]).build();
    let first = with_timeout(runner(&dir, upstream, 7, store.clone(), Stopper::new()).run())
        .await
        .unwrap();
    assert!(first.is_success());

    let params = DependentParamsBuilder::new(DependentRelation::And)
        .group(
            DependentRelation::And,
            vec![
                DependentItem::new(7, "ALL", CycleType::Day, "today"),
                DependentItem::new(7, "produce", CycleType::Day, "today"),
            ],
        )
        .build();
    let downstream = WorkflowBuilder::new()
        .dependent("wait_for_upstream", &params, &[])
        .shell("consume", "true", &["wait_for_upstream"])
        .build();

    let second = with_timeout(runner(&dir, downstream, 8, store.clone(), Stopper::new()).run())
        .await
        .unwrap();
    assert!(second.is_success());
    assert_eq!(second.outcome("consume"), Some(TaskOutcome::Succeeded));

    let missing = DependentParamsBuilder::new(DependentRelation::And)
        .group(
            DependentRelation::And,
            vec![DependentItem::new(99, "ALL", CycleType::Day, "today")],
        )
        .build();
    let unmet = WorkflowBuilder::new().dependent("never", &missing, &[]).build();
    let third = with_timeout(runner(&dir, unmet, 9, store, Stopper::new()).run())
        .await
        .unwrap();
    assert_eq!(third.outcome("never"), Some(TaskOutcome::Failed(-1)));
}

#[tokio::test]
async fn stop_request_kills_running_tasks() {
    common::init_tracing();
    let dir = TempDir::new().unwrap();
    let store = Arc::new(MemoryProcessStore::new());
    let stopper = Stopper::new();
    let definition = WorkflowBuilder::new()
        .shell("long", "sleep 30", &[])
        .shell("after", "true", &["long"])
        .build();

    let run = tokio::spawn({
        let runner = runner(&dir, definition, 1, store.clone(), stopper.clone());
        async move { runner.run().await }
    });
    tokio::time::sleep(Duration::from_millis(300)).await;
    stopper.stop();

    let report = with_timeout(run).await.unwrap().unwrap();
    assert_eq!(report.state, ExecutionStatus::Kill);
    assert_eq!(report.outcome("long"), Some(TaskOutcome::Killed));
    assert_eq!(report.outcome("after"), Some(TaskOutcome::Skipped));
    assert_eq!(
        store.process(report.process_instance_id).unwrap().state,
        ExecutionStatus::Kill
    );
}

#[tokio::test]
async fn stop_before_tasks_start_still_kills_them() {
    common::init_tracing();
    let dir = TempDir::new().unwrap();
    let stopper = Stopper::new();
    stopper.stop();
    let definition = WorkflowBuilder::new()
        .shell("long", "sleep 30", &[])
        .shell("after", "true", &["long"])
        .build();

    let report = with_timeout(
        runner(&dir, definition, 1, Arc::new(MemoryProcessStore::new()), stopper).run(),
    )
    .await
    .unwrap();

    assert_eq!(report.state, ExecutionStatus::Kill);
    assert_eq!(report.outcome("long"), Some(TaskOutcome::Killed));
    assert_eq!(report.outcome("after"), Some(TaskOutcome::Skipped));
}

#[tokio::test]
async fn workflow_timeout_fails_the_run() {
    let definition = WorkflowBuilder::new()
        .shell("long", "sleep 30", &[])
        .timeout(1)
        .build();

    let (_dir, _store, report) = run(definition).await;

    assert_eq!(report.state, ExecutionStatus::Failure);
    assert_eq!(report.outcome("long"), Some(TaskOutcome::Killed));
}

#[tokio::test]
async fn task_timeout_fails_only_that_task() {
    let definition = WorkflowBuilder::new()
        .shell("slow", "sleep 30", &[])
        .task_timeout("slow", 1)
        .shell("fast", "true", &[])
        .build();

    let (_dir, _store, report) = run(definition).await;

    assert_eq!(report.outcome("slow"), Some(TaskOutcome::Failed(-1)));
    assert_eq!(report.outcome("fast"), Some(TaskOutcome::Succeeded));
    assert_eq!(report.state, ExecutionStatus::Failure);
}

#[tokio::test]
async fn cyclic_definition_is_rejected() {
    let dir = TempDir::new().unwrap();
    let definition = WorkflowBuilder::new()
        .shell("a", "true", &["b"])
        .shell("b", "true", &["a"])
        .build();

    let result = runner(&dir, definition, 1, Arc::new(MemoryProcessStore::new()), Stopper::new())
        .run()
        .await;
    assert!(result.is_err());
}
