//! Test fixtures for integration tests.
//!
//! Provides a control plane over an in-memory store, predefined workflow
//! drafts, and a simulated worker that drives tasks to a chosen status.

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;

use conductor::core::{RunId, RunSnapshot, StepDefinition, TaskId, TaskStatus, WorkflowDraft, WorkflowId};
use conductor::orchestration::RunRequest;
use conductor::{AdminApi, CallContext, Config, ControlPlane, InMemoryStore};

/// A control plane with direct access to its store.
pub struct Harness {
    pub plane: ControlPlane,
    pub store: Arc<InMemoryStore>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(Config::default())
    }

    pub fn with_config(config: Config) -> Self {
        let store = Arc::new(InMemoryStore::new());
        let plane = ControlPlane::new(store.clone(), &config);
        Self { plane, store }
    }

    /// Publish a draft and return its version.
    pub async fn publish(&self, draft: WorkflowDraft) -> u32 {
        self.plane
            .put_workflow(&ctx(), draft)
            .await
            .expect("publish workflow")
            .version
    }

    /// Trigger a run of the latest version.
    pub async fn trigger(&self, workflow: &str) -> RunId {
        self.trigger_with(RunRequest::new(wf(workflow))).await
    }

    pub async fn trigger_with(&self, request: RunRequest) -> RunId {
        self.plane
            .trigger_workflow_run(&ctx(), request)
            .await
            .expect("trigger run")
            .run_id
    }

    pub async fn snapshot(&self, run_id: RunId) -> RunSnapshot {
        self.plane.snapshot(run_id).await.expect("run snapshot")
    }

    /// Id of the task for `step` in `run_id`.
    pub async fn task_id(&self, run_id: RunId, step: &str) -> TaskId {
        self.snapshot(run_id)
            .await
            .task(step)
            .unwrap_or_else(|| panic!("no task for step {}", step))
            .id
    }

    pub async fn status(&self, run_id: RunId, step: &str) -> TaskStatus {
        self.snapshot(run_id)
            .await
            .task(step)
            .unwrap_or_else(|| panic!("no task for step {}", step))
            .status
    }

    /// Drive a task to `target` through the worker surface.
    ///
    /// Supports `Running`, `Completed` and `Failed`. The task must be
    /// eligible to start.
    pub async fn drive(&self, run_id: RunId, step: &str, target: TaskStatus) {
        let task_id = self.task_id(run_id, step).await;
        let workers = self.plane.workers();
        assert!(
            workers.start(task_id).await.unwrap().is_applied(),
            "step {} could not start",
            step
        );
        let outcome = match target {
            TaskStatus::Running => return,
            TaskStatus::Completed => workers
                .complete(task_id, json!({ "step": step }))
                .await
                .unwrap(),
            TaskStatus::Failed => workers.fail(task_id, "simulated failure").await.unwrap(),
            other => panic!("cannot drive a task to {}", other),
        };
        assert!(outcome.is_applied(), "step {} did not finish", step);
    }

    /// Complete every step in order.
    pub async fn complete_all(&self, run_id: RunId, steps: &[&str]) {
        for step in steps {
            self.drive(run_id, step, TaskStatus::Completed).await;
        }
    }
}

pub fn ctx() -> CallContext {
    CallContext::with_timeout(Duration::from_secs(5))
}

pub fn wf(name: &str) -> WorkflowId {
    WorkflowId::parse(name).expect("valid workflow id")
}

/// `a -> b -> c`
pub fn linear_draft(name: &str) -> WorkflowDraft {
    WorkflowDraft::new(
        wf(name),
        vec![
            StepDefinition::new("a", "extract"),
            StepDefinition::new("b", "transform").after(&["a"]),
            StepDefinition::new("c", "load").after(&["b"]),
        ],
    )
}

/// `root -> {left, right} -> join`
pub fn diamond_draft(name: &str) -> WorkflowDraft {
    WorkflowDraft::new(
        wf(name),
        vec![
            StepDefinition::new("root", "fetch"),
            StepDefinition::new("left", "parse").after(&["root"]),
            StepDefinition::new("right", "index").after(&["root"]),
            StepDefinition::new("join", "publish").after(&["left", "right"]),
        ],
    )
}

/// `count` independent steps.
pub fn fan_out_draft(name: &str, count: usize) -> WorkflowDraft {
    WorkflowDraft::new(
        wf(name),
        (0..count)
            .map(|i| StepDefinition::new(&format!("s{}", i), "noop"))
            .collect(),
    )
}
