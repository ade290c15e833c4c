//! Bulk task cancellation.
//!
//! Each candidate is driven `Queued | Running -> Cancelling -> Cancelled`
//! with a CAS on the row it last read. When a worker moves the task first,
//! the CAS loses, the task is re-read and the decision is made again, so a
//! task that completed in the meantime is reported as already terminal
//! instead of being overwritten.

use crate::core::{TaskId, TaskStatus};
use crate::error::Result;
use crate::orchestration::context::CallContext;
use crate::orchestration::filter::{FilterResolver, TaskFilter};
use crate::orchestration::pool::{BulkOutcome, WorkerPool};
use crate::store::{CasOutcome, Store};
use std::sync::Arc;

/// Per-task result of a cancellation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelOutcome {
    Cancelled,
    /// The task had already finished; nothing was written.
    AlreadyTerminal { status: TaskStatus },
    NotFound,
}

#[derive(Debug, Clone)]
pub struct CancellationCoordinator {
    store: Arc<dyn Store>,
    resolver: FilterResolver,
    pool: WorkerPool,
}

impl CancellationCoordinator {
    pub fn new(store: Arc<dyn Store>, resolver: FilterResolver, pool: WorkerPool) -> Self {
        Self {
            store,
            resolver,
            pool,
        }
    }

    /// Cancel every task the filter resolves to.
    ///
    /// Fails only if the filter cannot be resolved; per-task errors are
    /// returned as item failures.
    pub async fn cancel(
        &self,
        ctx: &CallContext,
        filter: &TaskFilter,
    ) -> Result<BulkOutcome<CancelOutcome>> {
        let candidates = self.resolver.resolve(ctx, filter).await?;
        let store = Arc::clone(&self.store);
        let item_ctx = ctx.clone();

        let bulk = self
            .pool
            .run(ctx, candidates, move |task_id| {
                let store = Arc::clone(&store);
                let ctx = item_ctx.clone();
                async move { cancel_task(store.as_ref(), &ctx, task_id).await }
            })
            .await;

        tracing::info!(
            cancelled = bulk
                .outcomes
                .iter()
                .filter(|o| o.outcome == CancelOutcome::Cancelled)
                .count(),
            failures = bulk.failures.len(),
            skipped = bulk.skipped,
            "cancel tasks finished"
        );
        Ok(bulk)
    }
}

/// Drive one task to `Cancelled`.
pub async fn cancel_task(store: &dyn Store, ctx: &CallContext, task_id: TaskId) -> Result<CancelOutcome> {
    let Some(mut observed) = store.get_task(task_id).await? else {
        return Ok(CancelOutcome::NotFound);
    };

    loop {
        let mut next = observed.clone();
        match observed.status {
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Cancelled => {
                return Ok(CancelOutcome::AlreadyTerminal {
                    status: observed.status,
                });
            }
            TaskStatus::Queued | TaskStatus::Running => {
                ctx.check()?;
                next.begin_cancel()?;
            }
            // Once cancelling, finish regardless of the deadline.
            TaskStatus::Cancelling => next.finish_cancel()?,
        }

        match store.compare_and_swap(&observed, next).await? {
            CasOutcome::Applied(row) if row.status == TaskStatus::Cancelled => {
                tracing::info!(task_id = %task_id, run_id = %row.run_id, "task cancelled");
                return Ok(CancelOutcome::Cancelled);
            }
            CasOutcome::Applied(row) => observed = row,
            CasOutcome::Conflict(current) => {
                tracing::debug!(
                    task_id = %task_id,
                    expected = %observed.status,
                    actual = %current.status,
                    "cancel lost CAS, re-reading"
                );
                observed = current;
            }
        }
    }
}
