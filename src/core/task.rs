//! Task data model for workflow runs.
//!
//! A task is the execution unit for one step within one run. Status
//! changes are only made through the transition methods on [`Task`],
//! which enforce the state machine, and the row's `revision` is what the
//! store compares on every write.

use crate::core::run::RunId;
use crate::core::workflow::WorkflowId;
use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

uuid_id!(
    /// Unique identifier for a task. Stable across attempts.
    TaskId
);

/// Task status in its lifecycle.
///
/// ```text
/// Queued -> Running -> Completed | Failed
/// Queued | Running -> Cancelling -> Cancelled
/// Failed | Cancelled --replay--> Queued (attempt + 1)
/// Completed --upstream replay--> Queued (superseded)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Waiting for a worker. Only eligible once every dependency completed.
    Queued,
    /// Claimed by a worker.
    Running,
    /// Cancellation recorded, waiting to be finalized.
    Cancelling,
    /// Cancelled by an admin operation.
    Cancelled,
    /// Finished successfully.
    Completed,
    /// Finished with an error.
    Failed,
}

impl TaskStatus {
    pub const ALL: [TaskStatus; 6] = [
        TaskStatus::Queued,
        TaskStatus::Running,
        TaskStatus::Cancelling,
        TaskStatus::Cancelled,
        TaskStatus::Completed,
        TaskStatus::Failed,
    ];

    /// No worker will move the task any further.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Cancelled
        )
    }

    pub fn is_cancellable(self) -> bool {
        matches!(self, TaskStatus::Queued | TaskStatus::Running)
    }

    pub fn is_replayable(self) -> bool {
        matches!(self, TaskStatus::Failed | TaskStatus::Cancelled)
    }

    /// Check whether `next` is an edge of the state machine.
    pub fn can_transition_to(self, next: TaskStatus) -> bool {
        use TaskStatus::*;
        matches!(
            (self, next),
            (Queued, Running)
                | (Queued, Cancelling)
                | (Running, Completed)
                | (Running, Failed)
                | (Running, Cancelling)
                | (Cancelling, Cancelled)
                | (Failed, Queued)
                | (Cancelled, Queued)
                | (Completed, Queued)
        )
    }
}

impl Default for TaskStatus {
    fn default() -> Self {
        Self::Queued
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskStatus::Queued => write!(f, "queued"),
            TaskStatus::Running => write!(f, "running"),
            TaskStatus::Cancelling => write!(f, "cancelling"),
            TaskStatus::Cancelled => write!(f, "cancelled"),
            TaskStatus::Completed => write!(f, "completed"),
            TaskStatus::Failed => write!(f, "failed"),
        }
    }
}

impl std::str::FromStr for TaskStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        TaskStatus::ALL
            .into_iter()
            .find(|status| status.to_string() == s.to_lowercase())
            .ok_or_else(|| Error::InvalidArgument(format!("unknown task status '{}'", s)))
    }
}

/// What an attempt produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "value")]
pub enum TaskResult {
    Output(serde_json::Value),
    Error(String),
}

/// Why an attempt was archived and the task re-queued.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequeueReason {
    /// The task itself was replayed by an admin.
    Replay,
    /// An upstream task was replayed, so this result is stale.
    Superseded,
}

/// One archived attempt of a task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttemptRecord {
    pub attempt: u32,
    /// Status the attempt ended in.
    pub status: TaskStatus,
    pub result: Option<TaskResult>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub archived_at: DateTime<Utc>,
    pub reason: RequeueReason,
}

/// A single task of a workflow run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub run_id: RunId,
    pub workflow_id: WorkflowId,
    /// Name of the step this task executes.
    pub step_name: String,
    /// Worker action identifier copied from the step.
    pub action: String,
    pub status: TaskStatus,
    /// Current attempt, starting at 1.
    pub attempt: u32,
    /// Tasks of the same run that must complete first.
    pub dependencies: Vec<TaskId>,
    pub result: Option<TaskResult>,
    /// Prior attempts, oldest first. Append-only.
    pub history: Vec<AttemptRecord>,
    /// Re-queued because an upstream replay invalidated its result.
    pub superseded: bool,
    /// Row version, bumped by the store on every successful write.
    pub revision: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl Task {
    /// Create the first attempt of a task in `Queued`.
    pub fn new(
        run_id: RunId,
        workflow_id: WorkflowId,
        step_name: &str,
        action: &str,
        dependencies: Vec<TaskId>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: TaskId::new(),
            run_id,
            workflow_id,
            step_name: step_name.to_string(),
            action: action.to_string(),
            status: TaskStatus::Queued,
            attempt: 1,
            dependencies,
            result: None,
            history: Vec::new(),
            superseded: false,
            revision: 0,
            created_at: now,
            updated_at: now,
            started_at: None,
            finished_at: None,
        }
    }

    fn transition(&mut self, next: TaskStatus) -> Result<()> {
        if !self.status.can_transition_to(next) {
            return Err(Error::InvalidState(format!(
                "task {} cannot move from {} to {}",
                self.id, self.status, next
            )));
        }
        self.status = next;
        self.updated_at = Utc::now();
        Ok(())
    }

    /// Claim the task for execution.
    pub fn start(&mut self) -> Result<()> {
        self.transition(TaskStatus::Running)?;
        self.started_at = Some(self.updated_at);
        Ok(())
    }

    pub fn complete(&mut self, output: serde_json::Value) -> Result<()> {
        self.transition(TaskStatus::Completed)?;
        self.result = Some(TaskResult::Output(output));
        self.finished_at = Some(self.updated_at);
        Ok(())
    }

    pub fn fail(&mut self, error: &str) -> Result<()> {
        self.transition(TaskStatus::Failed)?;
        self.result = Some(TaskResult::Error(error.to_string()));
        self.finished_at = Some(self.updated_at);
        Ok(())
    }

    /// First half of a cancellation: `Queued | Running -> Cancelling`.
    pub fn begin_cancel(&mut self) -> Result<()> {
        self.transition(TaskStatus::Cancelling)
    }

    /// Second half of a cancellation: `Cancelling -> Cancelled`.
    pub fn finish_cancel(&mut self) -> Result<()> {
        self.transition(TaskStatus::Cancelled)?;
        self.finished_at = Some(self.updated_at);
        Ok(())
    }

    /// Archive the current attempt and queue a new one.
    ///
    /// `Replay` applies to `Failed` and `Cancelled` tasks, `Superseded` only
    /// to `Completed` ones. History is appended, never rewritten.
    pub fn requeue(&mut self, reason: RequeueReason) -> Result<()> {
        let allowed = match reason {
            RequeueReason::Replay => self.status.is_replayable(),
            RequeueReason::Superseded => self.status == TaskStatus::Completed,
        };
        if !allowed {
            return Err(Error::InvalidState(format!(
                "task {} in status {} cannot be re-queued ({:?})",
                self.id, self.status, reason
            )));
        }

        let finished_status = self.status;
        self.transition(TaskStatus::Queued)?;
        self.history.push(AttemptRecord {
            attempt: self.attempt,
            status: finished_status,
            result: self.result.take(),
            started_at: self.started_at.take(),
            finished_at: self.finished_at.take(),
            archived_at: self.updated_at,
            reason,
        });
        self.attempt += 1;
        self.superseded = reason == RequeueReason::Superseded;
        Ok(())
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    pub fn output(&self) -> Option<&serde_json::Value> {
        match &self.result {
            Some(TaskResult::Output(value)) => Some(value),
            _ => None,
        }
    }

    pub fn error(&self) -> Option<&str> {
        match &self.result {
            Some(TaskResult::Error(message)) => Some(message),
            _ => None,
        }
    }
}
