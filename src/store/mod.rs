//! Persistence abstraction for workflow versions, runs and tasks.
//!
//! Every task status change goes through [`TaskStore::compare_and_swap`],
//! which only writes if the stored row still has the status and revision
//! the caller observed. Version allocation goes through
//! [`VersionStore::publish_version`], a CAS on the per-workflow counter.

use crate::core::{RunId, Task, TaskId, TaskStatus, WorkflowDefinition, WorkflowId, WorkflowRun};
use crate::error::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;

pub mod memory;

pub use memory::InMemoryStore;

/// Result of a compare-and-swap.
#[derive(Debug, Clone, PartialEq)]
pub enum CasOutcome<T> {
    /// The write happened; carries the stored value.
    Applied(T),
    /// The stored value had moved on; carries what is there now.
    Conflict(T),
}

impl<T> CasOutcome<T> {
    pub fn is_applied(&self) -> bool {
        matches!(self, CasOutcome::Applied(_))
    }

    pub fn into_inner(self) -> T {
        match self {
            CasOutcome::Applied(value) | CasOutcome::Conflict(value) => value,
        }
    }
}

/// Read query over the tasks of one workflow's runs.
#[derive(Debug, Clone, PartialEq)]
pub struct TaskQuery {
    pub workflow_id: WorkflowId,
    /// Matching statuses. Never empty.
    pub statuses: Vec<TaskStatus>,
    /// Only runs created at or after this instant.
    pub since: Option<DateTime<Utc>>,
    /// Only runs created before this instant.
    pub until: Option<DateTime<Utc>>,
    /// Only runs whose metadata contains every entry.
    pub metadata: BTreeMap<String, String>,
}

impl TaskQuery {
    pub fn new(workflow_id: WorkflowId, statuses: Vec<TaskStatus>) -> Self {
        Self {
            workflow_id,
            statuses,
            since: None,
            until: None,
            metadata: BTreeMap::new(),
        }
    }

    pub fn matches_run(&self, run: &WorkflowRun) -> bool {
        run.workflow_id == self.workflow_id
            && self.since.map_or(true, |since| run.created_at >= since)
            && self.until.map_or(true, |until| run.created_at < until)
            && run.matches_metadata(&self.metadata)
    }
}

/// Runs and tasks.
#[async_trait]
pub trait TaskStore: Send + Sync + std::fmt::Debug {
    /// Insert a run and its full initial task set as one unit.
    ///
    /// Either every row becomes visible or none does.
    async fn create_run(&self, run: WorkflowRun, tasks: Vec<Task>) -> Result<()>;

    async fn get_run(&self, run_id: RunId) -> Result<Option<WorkflowRun>>;

    async fn get_task(&self, task_id: TaskId) -> Result<Option<Task>>;

    /// All tasks of a run in seed order.
    async fn run_tasks(&self, run_id: RunId) -> Result<Vec<Task>>;

    /// Ids of tasks matching the query, ordered by run creation then seed order.
    async fn find_tasks(&self, query: &TaskQuery) -> Result<Vec<TaskId>>;

    /// Replace `expected` with `next` if the stored row still has
    /// `expected.status` and `expected.revision`.
    ///
    /// # Errors
    /// Returns `NotFound` if the task does not exist.
    async fn compare_and_swap(&self, expected: &Task, next: Task) -> Result<CasOutcome<Task>>;
}

/// Workflow definitions and active version pointers.
#[async_trait]
pub trait VersionStore: Send + Sync + std::fmt::Debug {
    /// Highest allocated version, 0 if the workflow has none.
    async fn latest_version(&self, workflow_id: &WorkflowId) -> Result<u32>;

    async fn active_version(&self, workflow_id: &WorkflowId) -> Result<Option<u32>>;

    async fn get_version(
        &self,
        workflow_id: &WorkflowId,
        version: u32,
    ) -> Result<Option<WorkflowDefinition>>;

    async fn find_by_hash(
        &self,
        workflow_id: &WorkflowId,
        content_hash: &str,
    ) -> Result<Option<WorkflowDefinition>>;

    /// Store `definition` if the latest version is still `expected_latest`.
    ///
    /// On success the definition is inserted and becomes the active version.
    /// On conflict returns the actual latest version.
    async fn publish_version(
        &self,
        expected_latest: u32,
        definition: WorkflowDefinition,
    ) -> Result<CasOutcome<u32>>;
}

/// A store providing both halves.
pub trait Store: TaskStore + VersionStore {}

impl<T: TaskStore + VersionStore> Store for T {}
