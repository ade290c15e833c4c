//! Task replay with downstream invalidation.
//!
//! Replaying a failed or cancelled task archives its current attempt and
//! queues a new one. With [`ReplayScope::Downstream`] every completed
//! transitive dependent is archived and re-queued as superseded, since its
//! result was computed from the replaced output. Running dependents are
//! left alone. Dependents are invalidated before the task itself is
//! re-queued, so a replay interrupted by a store error or the deadline
//! leaves the task replayable and can simply be issued again.
//!
//! At most one replay works on a task at a time. [`ReplayGuards`] hands
//! out per-task permits; a second replay of the same task waits for the
//! first, bounded by its own deadline, and then sees the task already
//! queued.

use crate::core::{DependencyGraph, RequeueReason, Task, TaskId, TaskStatus};
use crate::error::{Error, Result};
use crate::orchestration::context::CallContext;
use crate::orchestration::filter::{FilterResolver, TaskFilter};
use crate::orchestration::pool::{BulkOutcome, WorkerPool};
use crate::store::{CasOutcome, Store};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::OwnedMutexGuard;

/// How far a replay reaches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReplayScope {
    /// Also re-queue completed transitive dependents.
    #[default]
    Downstream,
    TaskOnly,
}

/// Per-task result of a replay.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplayOutcome {
    Replayed {
        /// The new attempt number.
        attempt: u32,
        /// Completed dependents re-queued, in dependency order.
        superseded: Vec<TaskId>,
    },
    /// The task was not failed or cancelled; nothing was written.
    InvalidState { status: TaskStatus },
    NotFound,
}

type GuardMap = HashMap<TaskId, Arc<tokio::sync::Mutex<()>>>;

/// Single-flight guards keyed by task id.
#[derive(Debug, Clone, Default)]
pub struct ReplayGuards {
    locks: Arc<Mutex<GuardMap>>,
}

/// Exclusive right to replay one task. Released on drop.
#[derive(Debug)]
pub struct ReplayPermit {
    task_id: TaskId,
    guard: Option<OwnedMutexGuard<()>>,
    locks: Arc<Mutex<GuardMap>>,
}

impl ReplayGuards {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for the task's permit until `ctx` expires.
    pub async fn acquire(&self, ctx: &CallContext, task_id: TaskId) -> Result<ReplayPermit> {
        let lock = {
            let mut locks = self
                .locks
                .lock()
                .map_err(|_| Error::InvalidState("replay guard table poisoned".to_string()))?;
            Arc::clone(locks.entry(task_id).or_default())
        };

        let acquired = tokio::select! {
            guard = lock.lock_owned() => Some(guard),
            _ = ctx.expired() => None,
        };
        let Some(guard) = acquired else {
            prune(&self.locks, task_id);
            return Err(Error::DeadlineExceeded);
        };
        Ok(ReplayPermit {
            task_id,
            guard: Some(guard),
            locks: Arc::clone(&self.locks),
        })
    }

    /// Tasks with a held or awaited permit.
    pub fn in_flight(&self) -> usize {
        self.locks.lock().map(|locks| locks.len()).unwrap_or(0)
    }
}

impl Drop for ReplayPermit {
    fn drop(&mut self) {
        drop(self.guard.take());
        prune(&self.locks, self.task_id);
    }
}

/// Drop the task's entry once only the table references it.
fn prune(locks: &Mutex<GuardMap>, task_id: TaskId) {
    if let Ok(mut locks) = locks.lock() {
        if locks
            .get(&task_id)
            .is_some_and(|lock| Arc::strong_count(lock) == 1)
        {
            locks.remove(&task_id);
        }
    }
}

#[derive(Debug, Clone)]
pub struct ReplayCoordinator {
    store: Arc<dyn Store>,
    resolver: FilterResolver,
    pool: WorkerPool,
    guards: ReplayGuards,
}

impl ReplayCoordinator {
    pub fn new(
        store: Arc<dyn Store>,
        resolver: FilterResolver,
        pool: WorkerPool,
        guards: ReplayGuards,
    ) -> Self {
        Self {
            store,
            resolver,
            pool,
            guards,
        }
    }

    pub fn guards(&self) -> &ReplayGuards {
        &self.guards
    }

    /// Replay every task the filter resolves to.
    ///
    /// # Errors
    /// Filter resolution errors, or `InvalidState` when every candidate
    /// was in a status that cannot be replayed.
    pub async fn replay(
        &self,
        ctx: &CallContext,
        filter: &TaskFilter,
        scope: ReplayScope,
    ) -> Result<BulkOutcome<ReplayOutcome>> {
        let candidates = self.resolver.resolve(ctx, filter).await?;
        let store = Arc::clone(&self.store);
        let guards = self.guards.clone();
        let item_ctx = ctx.clone();

        let bulk = self
            .pool
            .run(ctx, candidates, move |task_id| {
                let store = Arc::clone(&store);
                let guards = guards.clone();
                let ctx = item_ctx.clone();
                async move { replay_task(store.as_ref(), &guards, &ctx, task_id, scope).await }
            })
            .await;

        let all_invalid = !bulk.outcomes.is_empty()
            && bulk.failures.is_empty()
            && bulk.skipped == 0
            && bulk
                .outcomes
                .iter()
                .all(|o| matches!(o.outcome, ReplayOutcome::InvalidState { .. }));
        if all_invalid {
            return Err(Error::InvalidState(
                "no candidate task is failed or cancelled".to_string(),
            ));
        }

        tracing::info!(
            replayed = bulk
                .outcomes
                .iter()
                .filter(|o| matches!(o.outcome, ReplayOutcome::Replayed { .. }))
                .count(),
            failures = bulk.failures.len(),
            skipped = bulk.skipped,
            "replay tasks finished"
        );
        Ok(bulk)
    }
}

/// Invalidate a task's completed dependents if asked to, then replay it.
pub async fn replay_task(
    store: &dyn Store,
    guards: &ReplayGuards,
    ctx: &CallContext,
    task_id: TaskId,
    scope: ReplayScope,
) -> Result<ReplayOutcome> {
    match store.get_task(task_id).await? {
        None => return Ok(ReplayOutcome::NotFound),
        Some(task) if !task.status.is_replayable() => {
            return Ok(ReplayOutcome::InvalidState {
                status: task.status,
            })
        }
        Some(_) => {}
    }

    let _permit = guards.acquire(ctx, task_id).await?;
    let Some(mut observed) = store.get_task(task_id).await? else {
        return Ok(ReplayOutcome::NotFound);
    };
    if !observed.status.is_replayable() {
        return Ok(ReplayOutcome::InvalidState {
            status: observed.status,
        });
    }
    ctx.check()?;

    // The root is re-queued last. Any error before that leaves it failed or
    // cancelled, and its superseded dependents stay ineligible behind it.
    let superseded = match scope {
        ReplayScope::Downstream => supersede_downstream(store, guards, ctx, &observed).await?,
        ReplayScope::TaskOnly => Vec::new(),
    };

    let replayed = loop {
        let mut next = observed.clone();
        next.requeue(RequeueReason::Replay)?;
        match store.compare_and_swap(&observed, next).await? {
            CasOutcome::Applied(row) => break row,
            CasOutcome::Conflict(current) => {
                tracing::debug!(task_id = %task_id, actual = %current.status, "replay lost CAS, re-reading");
                if !current.status.is_replayable() {
                    return Ok(ReplayOutcome::InvalidState {
                        status: current.status,
                    });
                }
                observed = current;
            }
        }
    };
    tracing::info!(
        task_id = %task_id,
        run_id = %replayed.run_id,
        attempt = replayed.attempt,
        superseded = superseded.len(),
        "task replayed"
    );

    Ok(ReplayOutcome::Replayed {
        attempt: replayed.attempt,
        superseded,
    })
}

/// Re-queue every completed transitive dependent of `root`.
///
/// Runs while `root` is still failed or cancelled. An error or an expired
/// `ctx` stops the pass and is returned as is; dependents already
/// superseded stay queued and are skipped when the replay is retried.
async fn supersede_downstream(
    store: &dyn Store,
    guards: &ReplayGuards,
    ctx: &CallContext,
    root: &Task,
) -> Result<Vec<TaskId>> {
    let tasks = store.run_tasks(root.run_id).await?;
    let graph = DependencyGraph::from_tasks(&tasks);
    let downstream: Vec<TaskId> = graph.downstream(&root.id)?.into_iter().copied().collect();

    let mut superseded = Vec::new();
    for task_id in downstream {
        let _permit = guards.acquire(ctx, task_id).await.map_err(|e| {
            tracing::warn!(root = %root.id, done = superseded.len(), error = %e, "downstream invalidation interrupted");
            e
        })?;
        let Some(mut observed) = store.get_task(task_id).await? else {
            continue;
        };

        while observed.status == TaskStatus::Completed {
            let mut next = observed.clone();
            next.requeue(RequeueReason::Superseded)?;
            match store.compare_and_swap(&observed, next).await? {
                CasOutcome::Applied(_) => {
                    tracing::debug!(task_id = %task_id, root = %root.id, "task superseded");
                    superseded.push(task_id);
                    break;
                }
                CasOutcome::Conflict(current) => observed = current,
            }
        }
    }
    Ok(superseded)
}
