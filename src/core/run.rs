//! Workflow runs and their derived status.

use crate::core::task::{Task, TaskId, TaskStatus};
use crate::core::workflow::WorkflowId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use uuid::Uuid;

uuid_id!(
    /// Unique identifier for a workflow run.
    RunId
);

pub const DEFAULT_PRIORITY: u8 = 1;
pub const MAX_PRIORITY: u8 = 3;

/// One instantiation of a workflow version against an input.
///
/// The run record itself never changes after creation; its status is
/// derived from its tasks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowRun {
    pub run_id: RunId,
    pub workflow_id: WorkflowId,
    /// Version pinned at trigger time.
    pub version: u32,
    pub input: serde_json::Value,
    /// Caller-supplied labels, usable in task filters.
    #[serde(default)]
    pub additional_metadata: BTreeMap<String, String>,
    pub priority: u8,
    pub created_at: DateTime<Utc>,
}

impl WorkflowRun {
    pub fn new(workflow_id: WorkflowId, version: u32, input: serde_json::Value) -> Self {
        Self {
            run_id: RunId::new(),
            workflow_id,
            version,
            input,
            additional_metadata: BTreeMap::new(),
            priority: DEFAULT_PRIORITY,
            created_at: Utc::now(),
        }
    }

    pub fn with_metadata(mut self, metadata: BTreeMap<String, String>) -> Self {
        self.additional_metadata = metadata;
        self
    }

    pub fn with_priority(mut self, priority: u8) -> Self {
        self.priority = priority;
        self
    }

    /// True if every entry of `subset` is present with the same value.
    pub fn matches_metadata(&self, subset: &BTreeMap<String, String>) -> bool {
        subset
            .iter()
            .all(|(k, v)| self.additional_metadata.get(k) == Some(v))
    }
}

/// Overall state of a run, derived from its tasks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// Every task is still queued.
    Queued,
    Running,
    Completed,
    /// A task failed and nothing else can progress.
    Failed,
    /// A task was cancelled and nothing else can progress.
    Cancelled,
}

impl RunStatus {
    pub fn derive(tasks: &[Task]) -> Self {
        if tasks.iter().all(|t| t.status == TaskStatus::Completed) && !tasks.is_empty() {
            return RunStatus::Completed;
        }
        if tasks.iter().all(|t| t.status == TaskStatus::Queued) {
            return RunStatus::Queued;
        }

        let completed = completed_ids(tasks);
        let progressing = tasks.iter().any(|t| {
            matches!(t.status, TaskStatus::Running | TaskStatus::Cancelling)
                || (t.status == TaskStatus::Queued && unmet(t, &completed) == 0)
        });
        if progressing {
            return RunStatus::Running;
        }

        if tasks.iter().any(|t| t.status == TaskStatus::Failed) {
            RunStatus::Failed
        } else if tasks.iter().any(|t| t.status == TaskStatus::Cancelled) {
            RunStatus::Cancelled
        } else {
            RunStatus::Running
        }
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunStatus::Queued => write!(f, "queued"),
            RunStatus::Running => write!(f, "running"),
            RunStatus::Completed => write!(f, "completed"),
            RunStatus::Failed => write!(f, "failed"),
            RunStatus::Cancelled => write!(f, "cancelled"),
        }
    }
}

fn completed_ids(tasks: &[Task]) -> HashSet<TaskId> {
    tasks
        .iter()
        .filter(|t| t.status == TaskStatus::Completed)
        .map(|t| t.id)
        .collect()
}

fn unmet(task: &Task, completed: &HashSet<TaskId>) -> usize {
    task.dependencies
        .iter()
        .filter(|dep| !completed.contains(dep))
        .count()
}

/// A consistent read of a run and all of its tasks.
#[derive(Debug, Clone)]
pub struct RunSnapshot {
    pub run: WorkflowRun,
    pub tasks: Vec<Task>,
    pub status: RunStatus,
    completed: HashSet<TaskId>,
}

impl RunSnapshot {
    pub fn new(run: WorkflowRun, tasks: Vec<Task>) -> Self {
        let status = RunStatus::derive(&tasks);
        let completed = completed_ids(&tasks);
        Self {
            run,
            tasks,
            status,
            completed,
        }
    }

    pub fn task(&self, step_name: &str) -> Option<&Task> {
        self.tasks.iter().find(|t| t.step_name == step_name)
    }

    /// Dependencies of `task` that have not completed.
    pub fn unmet_dependencies(&self, task: &Task) -> usize {
        unmet(task, &self.completed)
    }

    /// Queued with every dependency completed: visible to workers.
    pub fn is_eligible(&self, task: &Task) -> bool {
        task.status == TaskStatus::Queued && self.unmet_dependencies(task) == 0
    }

    pub fn eligible(&self) -> Vec<&Task> {
        self.tasks.iter().filter(|t| self.is_eligible(t)).collect()
    }
}
