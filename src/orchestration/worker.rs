//! Execution-side task transitions.
//!
//! The worker runtime itself lives elsewhere; this is the narrow surface it
//! uses to claim eligible tasks and report results. Every call is a CAS on
//! the row the worker observed, so an admin cancellation or replay that
//! lands first wins and the worker is told so.

use crate::core::{RunId, Task, TaskId, TaskStatus};
use crate::error::{Error, Result};
use crate::store::{CasOutcome, Store};
use std::sync::Arc;

/// Result of a worker transition.
#[derive(Debug, Clone, PartialEq)]
pub enum WorkerOutcome {
    Applied(Task),
    /// The task was not in a state the transition applies to.
    Rejected { current: TaskStatus },
}

impl WorkerOutcome {
    pub fn is_applied(&self) -> bool {
        matches!(self, WorkerOutcome::Applied(_))
    }
}

#[derive(Debug, Clone)]
pub struct WorkerGateway {
    store: Arc<dyn Store>,
}

impl WorkerGateway {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// Eligible tasks of a run.
    pub async fn claimable(&self, run_id: RunId) -> Result<Vec<Task>> {
        let tasks = self.store.run_tasks(run_id).await?;
        Ok(tasks
            .iter()
            .filter(|t| is_eligible(t, &tasks))
            .cloned()
            .collect())
    }

    /// Claim an eligible task: `Queued -> Running`.
    pub async fn start(&self, task_id: TaskId) -> Result<WorkerOutcome> {
        let mut observed = self.load(task_id).await?;
        loop {
            if observed.status != TaskStatus::Queued {
                return Ok(WorkerOutcome::Rejected {
                    current: observed.status,
                });
            }
            let run_tasks = self.store.run_tasks(observed.run_id).await?;
            if !is_eligible(&observed, &run_tasks) {
                tracing::debug!(task_id = %task_id, "claim rejected, dependencies incomplete");
                return Ok(WorkerOutcome::Rejected {
                    current: observed.status,
                });
            }

            let mut next = observed.clone();
            next.start()?;
            match self.store.compare_and_swap(&observed, next).await? {
                CasOutcome::Applied(row) => return self.confirm_claim(observed, row).await,
                CasOutcome::Conflict(current) => observed = current,
            }
        }
    }

    /// Re-check a fresh claim against the run. A dependency superseded
    /// between the eligibility read and the claim puts the row back the way
    /// it was observed.
    async fn confirm_claim(&self, queued: Task, claimed: Task) -> Result<WorkerOutcome> {
        let run_tasks = self.store.run_tasks(claimed.run_id).await?;
        if dependencies_completed(&claimed, &run_tasks) {
            tracing::debug!(task_id = %claimed.id, attempt = claimed.attempt, "task claimed");
            return Ok(WorkerOutcome::Applied(claimed));
        }

        tracing::debug!(task_id = %claimed.id, "dependency invalidated during claim, releasing");
        match self.store.compare_and_swap(&claimed, queued).await? {
            CasOutcome::Applied(row) => Ok(WorkerOutcome::Rejected {
                current: row.status,
            }),
            CasOutcome::Conflict(current) => Ok(WorkerOutcome::Rejected {
                current: current.status,
            }),
        }
    }

    /// Report success: `Running -> Completed`.
    pub async fn complete(&self, task_id: TaskId, output: serde_json::Value) -> Result<WorkerOutcome> {
        self.finish(task_id, |task| task.complete(output.clone()))
            .await
    }

    /// Report failure: `Running -> Failed`.
    pub async fn fail(&self, task_id: TaskId, error: &str) -> Result<WorkerOutcome> {
        self.finish(task_id, |task| task.fail(error)).await
    }

    async fn finish<F>(&self, task_id: TaskId, apply: F) -> Result<WorkerOutcome>
    where
        F: Fn(&mut Task) -> Result<()>,
    {
        let mut observed = self.load(task_id).await?;
        loop {
            if observed.status != TaskStatus::Running {
                tracing::debug!(
                    task_id = %task_id,
                    current = %observed.status,
                    "worker report rejected"
                );
                return Ok(WorkerOutcome::Rejected {
                    current: observed.status,
                });
            }

            let mut next = observed.clone();
            apply(&mut next)?;
            match self.store.compare_and_swap(&observed, next).await? {
                CasOutcome::Applied(row) => {
                    tracing::info!(task_id = %task_id, status = %row.status, "task finished");
                    return Ok(WorkerOutcome::Applied(row));
                }
                CasOutcome::Conflict(current) => observed = current,
            }
        }
    }

    async fn load(&self, task_id: TaskId) -> Result<Task> {
        self.store
            .get_task(task_id)
            .await?
            .ok_or_else(|| Error::not_found("task", task_id))
    }
}

fn is_eligible(task: &Task, run_tasks: &[Task]) -> bool {
    task.status == TaskStatus::Queued && dependencies_completed(task, run_tasks)
}

fn dependencies_completed(task: &Task, run_tasks: &[Task]) -> bool {
    task.dependencies.iter().all(|dep| {
        run_tasks
            .iter()
            .any(|t| t.id == *dep && t.status == TaskStatus::Completed)
    })
}
