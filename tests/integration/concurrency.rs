//! Races between admin calls and workers, plus deadline and outage behavior.

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use tokio_util::sync::CancellationToken;

use conductor::admin::{CancelTasksRequest, ReplayTasksRequest};
use conductor::core::{RunId, Task, TaskId, TaskStatus, WorkflowDefinition, WorkflowDraft, WorkflowId, WorkflowRun};
use conductor::orchestration::{CancelOutcome, ReplayOutcome, ReplayScope, RunRequest, TaskFilter};
use conductor::store::{CasOutcome, TaskQuery, TaskStore, VersionStore};
use conductor::{AdminApi, CallContext, Config, ControlPlane, Error, InMemoryStore, Result};

use crate::fixtures::{ctx, fan_out_draft, linear_draft, wf, Harness};

fn serial_config() -> Config {
    Config {
        bulk_concurrency: 1,
        ..Config::default()
    }
}

/// Test: Cancel racing worker completion
/// Given many running tasks
/// When a bulk cancel and worker completions run at the same time
/// Then each task ends in exactly one terminal state, matching what both sides were told
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_cancel_races_completion() {
    let harness = Arc::new(Harness::new());
    harness.publish(fan_out_draft("batch", 30)).await;
    let run_id = harness.trigger("batch").await;
    let ids: Vec<TaskId> = harness.snapshot(run_id).await.tasks.iter().map(|t| t.id).collect();
    for id in &ids {
        assert!(harness.plane.workers().start(*id).await.unwrap().is_applied());
    }

    let worker = {
        let harness = Arc::clone(&harness);
        let ids = ids.clone();
        tokio::spawn(async move {
            let mut applied = HashSet::new();
            for id in ids {
                if harness
                    .plane
                    .workers()
                    .complete(id, json!({ "done": true }))
                    .await
                    .unwrap()
                    .is_applied()
                {
                    applied.insert(id);
                }
            }
            applied
        })
    };
    let cancel = {
        let harness = Arc::clone(&harness);
        tokio::spawn(async move {
            harness
                .plane
                .cancel_tasks(&ctx(), CancelTasksRequest { filter: TaskFilter::Run(run_id) })
                .await
                .unwrap()
        })
    };

    let completed_by_worker = worker.await.unwrap();
    let cancelled = cancel.await.unwrap();
    assert!(cancelled.failures.is_empty());
    assert_eq!(cancelled.outcomes.len(), ids.len());

    let snapshot = harness.snapshot(run_id).await;
    for item in &cancelled.outcomes {
        let task = snapshot.tasks.iter().find(|t| t.id == item.task_id).unwrap();
        match item.outcome {
            CancelOutcome::Cancelled => {
                assert_eq!(task.status, TaskStatus::Cancelled);
                assert!(!completed_by_worker.contains(&task.id));
            }
            CancelOutcome::AlreadyTerminal { status } => {
                assert_eq!(status, TaskStatus::Completed);
                assert_eq!(task.status, TaskStatus::Completed);
                assert!(completed_by_worker.contains(&task.id));
            }
            CancelOutcome::NotFound => panic!("task {} vanished", task.id),
        }
    }
}

/// Test: Concurrent identical publishes
/// Given many callers submitting the same definition at once
/// When all calls finish
/// Then exactly one version exists and every caller got it
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_identical_publishes() {
    let harness = Arc::new(Harness::new());

    let handles: Vec<_> = (0..10)
        .map(|_| {
            let harness = Arc::clone(&harness);
            tokio::spawn(async move {
                harness
                    .plane
                    .put_workflow(&ctx(), linear_draft("etl"))
                    .await
                    .unwrap()
            })
        })
        .collect();

    let mut created = 0;
    for handle in handles {
        let response = handle.await.unwrap();
        assert_eq!(response.version, 1);
        if !response.unchanged {
            created += 1;
        }
    }
    assert_eq!(created, 1);
    assert_eq!(harness.store.version_count(&wf("etl")).await, 1);
}

/// Test: Concurrent distinct publishes
/// Given callers submitting different definitions at once
/// When all calls finish
/// Then the versions are exactly 1..=n with no gaps or duplicates
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_distinct_publishes() {
    let harness = Arc::new(Harness::with_config(Config {
        version_cas_retries: 50,
        ..Config::default()
    }));
    let count = 8;

    let handles: Vec<_> = (0..count)
        .map(|i| {
            let harness = Arc::clone(&harness);
            tokio::spawn(async move {
                harness
                    .plane
                    .put_workflow(&ctx(), fan_out_draft("batch", i + 1))
                    .await
                    .unwrap()
                    .version
            })
        })
        .collect();

    let mut versions = Vec::new();
    for handle in handles {
        versions.push(handle.await.unwrap());
    }
    versions.sort_unstable();
    assert_eq!(versions, (1..=count as u32).collect::<Vec<_>>());
}

/// Test: Concurrent replays of one task
/// Given a failed task
/// When two replays of it run at once
/// Then it is replayed once and the other call sees it already queued
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_replays_single_flight() {
    let harness = Arc::new(Harness::new());
    harness.publish(linear_draft("etl")).await;
    let run_id = harness.trigger("etl").await;
    harness.drive(run_id, "a", TaskStatus::Failed).await;
    let a = harness.task_id(run_id, "a").await;

    let handles: Vec<_> = (0..2)
        .map(|_| {
            let harness = Arc::clone(&harness);
            tokio::spawn(async move {
                harness
                    .plane
                    .replay_tasks(
                        &ctx(),
                        ReplayTasksRequest {
                            filter: TaskFilter::Ids(vec![a]),
                            scope: ReplayScope::Downstream,
                        },
                    )
                    .await
            })
        })
        .collect();

    let mut replayed = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(response) => match &response.outcomes[0].outcome {
                ReplayOutcome::Replayed { attempt, .. } => {
                    assert_eq!(*attempt, 2);
                    replayed += 1;
                }
                other => panic!("unexpected outcome {:?}", other),
            },
            // The loser finds the task queued, its only candidate.
            Err(Error::InvalidState(_)) => {}
            Err(e) => panic!("unexpected error {}", e),
        }
    }
    assert_eq!(replayed, 1);

    let task = harness.snapshot(run_id).await.task("a").unwrap().clone();
    assert_eq!(task.status, TaskStatus::Queued);
    assert_eq!(task.attempt, 2);
    assert_eq!(task.history.len(), 1);
}

/// Test: Store outage mid-cancel
/// Given a store that rejects writes part-way through a bulk cancel
/// When the cancel runs serially
/// Then finished tasks are reported and the rest come back as failures
#[tokio::test]
async fn test_cancel_write_outage_reports_failures() {
    let harness = Harness::with_config(serial_config());
    harness.publish(fan_out_draft("batch", 5)).await;
    let run_id = harness.trigger("batch").await;

    // Two writes per cancelled task.
    harness.store.fail_writes_after(4);
    let response = harness
        .plane
        .cancel_tasks(&ctx(), CancelTasksRequest { filter: TaskFilter::Run(run_id) })
        .await
        .unwrap();

    assert_eq!(response.outcomes.len(), 2);
    assert_eq!(response.failures.len(), 3);
    assert!(response
        .failures
        .iter()
        .all(|f| matches!(f.error, Error::StoreUnavailable(_))));
    assert!(!response.incomplete());

    harness.store.reset_faults();
    let statuses: Vec<TaskStatus> = harness.snapshot(run_id).await.tasks.iter().map(|t| t.status).collect();
    assert_eq!(
        statuses,
        vec![
            TaskStatus::Cancelled,
            TaskStatus::Cancelled,
            TaskStatus::Queued,
            TaskStatus::Queued,
            TaskStatus::Queued,
        ]
    );
}

/// Test: Store fully unavailable
/// Given an offline store
/// When a bulk cancel is issued
/// Then the filter cannot be resolved and the call fails as a whole
#[tokio::test]
async fn test_offline_store_fails_call() {
    let harness = Harness::new();
    harness.publish(linear_draft("etl")).await;
    let run_id = harness.trigger("etl").await;

    harness.store.set_available(false);
    let result = harness
        .plane
        .cancel_tasks(&ctx(), CancelTasksRequest { filter: TaskFilter::Run(run_id) })
        .await;
    assert!(matches!(result, Err(Error::StoreUnavailable(_))));
}

/// Test: Expired call
/// Given a context whose deadline already passed
/// When any admin operation is issued
/// Then it fails with DeadlineExceeded and writes nothing
#[tokio::test]
async fn test_expired_context_rejected() {
    let harness = Harness::new();
    harness.publish(linear_draft("etl")).await;
    let run_id = harness.trigger("etl").await;

    let expired = CallContext::with_timeout(Duration::ZERO);
    let cancel = harness
        .plane
        .cancel_tasks(&expired, CancelTasksRequest { filter: TaskFilter::Run(run_id) })
        .await;
    assert!(matches!(cancel, Err(Error::DeadlineExceeded)));

    let trigger = harness
        .plane
        .trigger_workflow_run(&expired, RunRequest::new(wf("etl")))
        .await;
    assert!(matches!(trigger, Err(Error::DeadlineExceeded)));

    let publish = harness
        .plane
        .put_workflow(&expired, fan_out_draft("etl", 2))
        .await;
    assert!(matches!(publish, Err(Error::DeadlineExceeded)));

    assert_eq!(harness.store.task_count().await, 3);
    assert_eq!(harness.store.version_count(&wf("etl")).await, 1);
}

/// Delegates to an [`InMemoryStore`] and cancels a token after a fixed
/// number of task writes.
#[derive(Debug)]
struct TrippingStore {
    inner: InMemoryStore,
    writes: AtomicUsize,
    trip_after: usize,
    token: CancellationToken,
}

#[async_trait]
impl TaskStore for TrippingStore {
    async fn create_run(&self, run: WorkflowRun, tasks: Vec<Task>) -> Result<()> {
        self.inner.create_run(run, tasks).await
    }

    async fn get_run(&self, run_id: RunId) -> Result<Option<WorkflowRun>> {
        self.inner.get_run(run_id).await
    }

    async fn get_task(&self, task_id: TaskId) -> Result<Option<Task>> {
        self.inner.get_task(task_id).await
    }

    async fn run_tasks(&self, run_id: RunId) -> Result<Vec<Task>> {
        self.inner.run_tasks(run_id).await
    }

    async fn find_tasks(&self, query: &TaskQuery) -> Result<Vec<TaskId>> {
        self.inner.find_tasks(query).await
    }

    async fn compare_and_swap(&self, expected: &Task, next: Task) -> Result<CasOutcome<Task>> {
        let outcome = self.inner.compare_and_swap(expected, next).await;
        if self.writes.fetch_add(1, Ordering::SeqCst) + 1 == self.trip_after {
            self.token.cancel();
        }
        outcome
    }
}

#[async_trait]
impl VersionStore for TrippingStore {
    async fn latest_version(&self, workflow_id: &WorkflowId) -> Result<u32> {
        self.inner.latest_version(workflow_id).await
    }

    async fn active_version(&self, workflow_id: &WorkflowId) -> Result<Option<u32>> {
        self.inner.active_version(workflow_id).await
    }

    async fn get_version(&self, workflow_id: &WorkflowId, version: u32) -> Result<Option<WorkflowDefinition>> {
        self.inner.get_version(workflow_id, version).await
    }

    async fn find_by_hash(&self, workflow_id: &WorkflowId, content_hash: &str) -> Result<Option<WorkflowDefinition>> {
        self.inner.find_by_hash(workflow_id, content_hash).await
    }

    async fn publish_version(&self, expected_latest: u32, definition: WorkflowDefinition) -> Result<CasOutcome<u32>> {
        self.inner.publish_version(expected_latest, definition).await
    }
}

/// Test: Deadline mid-cancel
/// Given a serial bulk cancel whose call is cancelled after two tasks
/// When the cancel returns
/// Then the finished tasks are reported, the rest are skipped, and the
///   response is marked incomplete
#[tokio::test]
async fn test_cancel_deadline_returns_partial_result() {
    let token = CancellationToken::new();
    let store = Arc::new(TrippingStore {
        inner: InMemoryStore::new(),
        writes: AtomicUsize::new(0),
        trip_after: 4,
        token: token.clone(),
    });
    let plane = ControlPlane::new(store.clone(), &serial_config());

    plane
        .put_workflow(&CallContext::new(), fan_out_draft("batch", 5))
        .await
        .unwrap();
    let run = plane
        .trigger_workflow_run(&CallContext::new(), RunRequest::new(wf("batch")))
        .await
        .unwrap();

    let call = CallContext::new().with_cancel(token);
    let response = plane
        .cancel_tasks(&call, CancelTasksRequest { filter: TaskFilter::Run(run.run_id) })
        .await
        .unwrap();

    assert_eq!(response.outcomes.len(), 2);
    assert!(response.outcomes.iter().all(|o| o.outcome == CancelOutcome::Cancelled));
    assert_eq!(response.skipped, 3);
    assert!(response.incomplete());
    assert!(response.failures.is_empty());

    let snapshot = plane.snapshot(run.run_id).await.unwrap();
    let cancelled = snapshot
        .tasks
        .iter()
        .filter(|t| t.status == TaskStatus::Cancelled)
        .count();
    assert_eq!(cancelled, 2);
}

/// Test: Replay leaves unrelated runs alone
/// Given two runs of the same workflow, one failed
/// When failed tasks of the workflow are replayed
/// Then only the failed run changes
#[tokio::test]
async fn test_replay_scoped_to_failed_run() {
    let harness = Harness::new();
    let draft: WorkflowDraft = linear_draft("etl");
    harness.publish(draft).await;
    let healthy = harness.trigger("etl").await;
    let broken = harness.trigger("etl").await;
    harness.complete_all(healthy, &["a", "b", "c"]).await;
    harness.drive(broken, "a", TaskStatus::Failed).await;

    let response = harness
        .plane
        .replay_tasks(
            &ctx(),
            ReplayTasksRequest {
                filter: TaskFilter::Workflow(conductor::orchestration::WorkflowSelector::new(
                    wf("etl"),
                    &[TaskStatus::Failed],
                )),
                scope: ReplayScope::Downstream,
            },
        )
        .await
        .unwrap();
    assert_eq!(response.outcomes.len(), 1);
    assert_eq!(response.outcomes[0].task_id, harness.task_id(broken, "a").await);
    assert!(harness
        .snapshot(healthy)
        .await
        .tasks
        .iter()
        .all(|t| t.status == TaskStatus::Completed && t.attempt == 1));
}
