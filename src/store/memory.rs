//! In-memory store used by the server binary and the test suites.

use super::{CasOutcome, TaskQuery, TaskStore, VersionStore};
use crate::core::{RunId, Task, TaskId, WorkflowDefinition, WorkflowId, WorkflowRun};
use crate::error::{Error, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use tokio::sync::RwLock;

#[derive(Debug, Default)]
struct State {
    runs: HashMap<RunId, WorkflowRun>,
    /// Run ids in insertion order.
    run_order: Vec<RunId>,
    run_tasks: HashMap<RunId, Vec<TaskId>>,
    tasks: HashMap<TaskId, Task>,
    /// Definitions per workflow, index `version - 1`.
    versions: HashMap<WorkflowId, Vec<WorkflowDefinition>>,
    active: HashMap<WorkflowId, u32>,
}

/// [`TaskStore`] and [`VersionStore`] over a single lock.
///
/// Supports fault injection: [`set_available`](Self::set_available) makes
/// every call fail, [`fail_writes_after`](Self::fail_writes_after) lets a
/// fixed number of writes through and fails the rest.
#[derive(Debug)]
pub struct InMemoryStore {
    state: RwLock<State>,
    available: AtomicBool,
    writes_left: Mutex<Option<usize>>,
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            state: RwLock::new(State::default()),
            available: AtomicBool::new(true),
            writes_left: Mutex::new(None),
        }
    }

    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Allow `n` more writes, then fail every write with `StoreUnavailable`.
    pub fn fail_writes_after(&self, n: usize) {
        if let Ok(mut left) = self.writes_left.lock() {
            *left = Some(n);
        }
    }

    /// Remove any write limit set by [`fail_writes_after`](Self::fail_writes_after).
    pub fn reset_faults(&self) {
        self.set_available(true);
        if let Ok(mut left) = self.writes_left.lock() {
            *left = None;
        }
    }

    pub async fn task_count(&self) -> usize {
        self.state.read().await.tasks.len()
    }

    pub async fn version_count(&self, workflow_id: &WorkflowId) -> usize {
        self.state
            .read()
            .await
            .versions
            .get(workflow_id)
            .map_or(0, Vec::len)
    }

    fn check_available(&self) -> Result<()> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(Error::StoreUnavailable("store is offline".to_string()))
        }
    }

    fn begin_write(&self) -> Result<()> {
        self.check_available()?;
        let mut left = self
            .writes_left
            .lock()
            .map_err(|_| Error::StoreUnavailable("fault state poisoned".to_string()))?;
        match left.as_mut() {
            Some(0) => Err(Error::StoreUnavailable("write rejected".to_string())),
            Some(n) => {
                *n -= 1;
                Ok(())
            }
            None => Ok(()),
        }
    }
}

#[async_trait]
impl TaskStore for InMemoryStore {
    async fn create_run(&self, run: WorkflowRun, tasks: Vec<Task>) -> Result<()> {
        self.begin_write()?;
        let mut state = self.state.write().await;

        if state.runs.contains_key(&run.run_id) {
            return Err(Error::InvalidState(format!("run {} already exists", run.run_id)));
        }
        if let Some(task) = tasks.iter().find(|t| state.tasks.contains_key(&t.id)) {
            return Err(Error::InvalidState(format!("task {} already exists", task.id)));
        }
        if let Some(task) = tasks.iter().find(|t| t.run_id != run.run_id) {
            return Err(Error::InvalidState(format!(
                "task {} belongs to run {}",
                task.id, task.run_id
            )));
        }

        let run_id = run.run_id;
        let ids: Vec<TaskId> = tasks.iter().map(|t| t.id).collect();
        for task in tasks {
            state.tasks.insert(task.id, task);
        }
        state.run_tasks.insert(run_id, ids);
        state.run_order.push(run_id);
        state.runs.insert(run_id, run);
        Ok(())
    }

    async fn get_run(&self, run_id: RunId) -> Result<Option<WorkflowRun>> {
        self.check_available()?;
        Ok(self.state.read().await.runs.get(&run_id).cloned())
    }

    async fn get_task(&self, task_id: TaskId) -> Result<Option<Task>> {
        self.check_available()?;
        Ok(self.state.read().await.tasks.get(&task_id).cloned())
    }

    async fn run_tasks(&self, run_id: RunId) -> Result<Vec<Task>> {
        self.check_available()?;
        let state = self.state.read().await;
        Ok(state
            .run_tasks
            .get(&run_id)
            .map(|ids| ids.iter().filter_map(|id| state.tasks.get(id).cloned()).collect())
            .unwrap_or_default())
    }

    async fn find_tasks(&self, query: &TaskQuery) -> Result<Vec<TaskId>> {
        self.check_available()?;
        let state = self.state.read().await;

        let mut found = Vec::new();
        for run_id in &state.run_order {
            let Some(run) = state.runs.get(run_id) else {
                continue;
            };
            if !query.matches_run(run) {
                continue;
            }
            let Some(ids) = state.run_tasks.get(run_id) else {
                continue;
            };
            found.extend(
                ids.iter()
                    .filter_map(|id| state.tasks.get(id))
                    .filter(|t| query.statuses.contains(&t.status))
                    .map(|t| t.id),
            );
        }
        Ok(found)
    }

    async fn compare_and_swap(&self, expected: &Task, mut next: Task) -> Result<CasOutcome<Task>> {
        self.begin_write()?;
        let mut state = self.state.write().await;

        let stored = state
            .tasks
            .get_mut(&expected.id)
            .ok_or_else(|| Error::not_found("task", expected.id))?;
        if stored.status != expected.status || stored.revision != expected.revision {
            return Ok(CasOutcome::Conflict(stored.clone()));
        }

        next.id = stored.id;
        next.revision = stored.revision + 1;
        *stored = next.clone();
        Ok(CasOutcome::Applied(next))
    }
}

#[async_trait]
impl VersionStore for InMemoryStore {
    async fn latest_version(&self, workflow_id: &WorkflowId) -> Result<u32> {
        self.check_available()?;
        let state = self.state.read().await;
        Ok(state
            .versions
            .get(workflow_id)
            .map_or(0, |versions| versions.len() as u32))
    }

    async fn active_version(&self, workflow_id: &WorkflowId) -> Result<Option<u32>> {
        self.check_available()?;
        Ok(self.state.read().await.active.get(workflow_id).copied())
    }

    async fn get_version(
        &self,
        workflow_id: &WorkflowId,
        version: u32,
    ) -> Result<Option<WorkflowDefinition>> {
        self.check_available()?;
        if version == 0 {
            return Ok(None);
        }
        let state = self.state.read().await;
        Ok(state
            .versions
            .get(workflow_id)
            .and_then(|versions| versions.get(version as usize - 1))
            .cloned())
    }

    async fn find_by_hash(
        &self,
        workflow_id: &WorkflowId,
        content_hash: &str,
    ) -> Result<Option<WorkflowDefinition>> {
        self.check_available()?;
        let state = self.state.read().await;
        Ok(state
            .versions
            .get(workflow_id)
            .and_then(|versions| versions.iter().find(|d| d.content_hash == content_hash))
            .cloned())
    }

    async fn publish_version(
        &self,
        expected_latest: u32,
        definition: WorkflowDefinition,
    ) -> Result<CasOutcome<u32>> {
        self.begin_write()?;
        let mut state = self.state.write().await;

        let workflow_id = definition.workflow_id.clone();
        let versions = state.versions.entry(workflow_id.clone()).or_default();
        let latest = versions.len() as u32;
        if latest != expected_latest || definition.version != latest + 1 {
            return Ok(CasOutcome::Conflict(latest));
        }

        let version = definition.version;
        versions.push(definition);
        state.active.insert(workflow_id, version);
        Ok(CasOutcome::Applied(version))
    }
}
