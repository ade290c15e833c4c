//! Worker pool for bulk task operations.
//!
//! The `WorkerPool` fans a candidate set out over a fixed number of tokio
//! workers. Candidates are pushed onto a crossbeam queue up front; each
//! worker pulls until the queue is empty or the call context expires.
//! Items are independent: a failing item is recorded and the rest carry on.

use crate::core::TaskId;
use crate::error::{Error, Result};
use crate::orchestration::context::CallContext;
use std::future::Future;
use std::sync::Arc;

/// Outcome of one processed item.
#[derive(Debug, Clone, PartialEq)]
pub struct ItemOutcome<O> {
    pub task_id: TaskId,
    pub outcome: O,
}

/// An item whose processing failed, e.g. because the store was unavailable.
#[derive(Debug)]
pub struct ItemFailure {
    pub task_id: TaskId,
    pub error: Error,
}

/// Aggregate result of a bulk run.
///
/// `outcomes` and `failures` keep the order items were submitted in.
#[derive(Debug)]
pub struct BulkOutcome<O> {
    pub outcomes: Vec<ItemOutcome<O>>,
    pub failures: Vec<ItemFailure>,
    /// Items never attempted because the call expired.
    pub skipped: usize,
}

impl<O> BulkOutcome<O> {
    /// True if some items were skipped.
    pub fn incomplete(&self) -> bool {
        self.skipped > 0
    }

    pub fn processed(&self) -> usize {
        self.outcomes.len() + self.failures.len()
    }
}

impl<O> Default for BulkOutcome<O> {
    fn default() -> Self {
        Self {
            outcomes: Vec::new(),
            failures: Vec::new(),
            skipped: 0,
        }
    }
}

/// Bounded-concurrency executor for per-task work.
///
/// # Example
///
/// ```ignore
/// let pool = WorkerPool::new(4);
/// let bulk = pool.run(&ctx, ids, |id| async move { Ok(id.short()) }).await;
/// assert_eq!(bulk.skipped, 0);
/// ```
#[derive(Debug, Clone, Copy)]
pub struct WorkerPool {
    max_concurrent: usize,
}

impl WorkerPool {
    /// Create a pool running at most `max_concurrent` items at once.
    /// A value of zero is treated as one.
    pub fn new(max_concurrent: usize) -> Self {
        Self {
            max_concurrent: max_concurrent.max(1),
        }
    }

    pub fn max_concurrent(&self) -> usize {
        self.max_concurrent
    }

    /// Process every item with `work`.
    ///
    /// Workers stop pulling new items once `ctx` expires; those items are
    /// counted as skipped, as are items whose work returned
    /// `DeadlineExceeded`. Any other error becomes an [`ItemFailure`].
    pub async fn run<O, F, Fut>(&self, ctx: &CallContext, items: Vec<TaskId>, work: F) -> BulkOutcome<O>
    where
        O: Send + 'static,
        F: Fn(TaskId) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<O>> + Send + 'static,
    {
        let total = items.len();
        if total == 0 {
            return BulkOutcome::default();
        }

        let (tx, rx) = crossbeam_channel::unbounded();
        for entry in items.into_iter().enumerate() {
            // The receiver is alive, so this cannot fail.
            let _ = tx.send(entry);
        }
        drop(tx);

        let work = Arc::new(work);
        let workers = self.max_concurrent.min(total);
        tracing::debug!(items = total, workers, "bulk run starting");

        let handles: Vec<_> = (0..workers)
            .map(|_| {
                let rx = rx.clone();
                let work = Arc::clone(&work);
                let ctx = ctx.clone();
                tokio::spawn(async move {
                    let mut done = Vec::new();
                    while !ctx.is_expired() {
                        let Ok((index, task_id)) = rx.try_recv() else {
                            break;
                        };
                        let result = work(task_id).await;
                        done.push((index, task_id, result));
                    }
                    done
                })
            })
            .collect();

        let mut finished = Vec::with_capacity(total);
        for joined in futures::future::join_all(handles).await {
            match joined {
                Ok(done) => finished.extend(done),
                Err(e) => tracing::error!(error = %e, "bulk worker aborted"),
            }
        }
        finished.sort_by_key(|(index, _, _)| *index);

        let mut bulk = BulkOutcome::default();
        for (_, task_id, result) in finished {
            match result {
                Ok(outcome) => bulk.outcomes.push(ItemOutcome { task_id, outcome }),
                Err(Error::DeadlineExceeded) => bulk.skipped += 1,
                Err(error) => {
                    tracing::warn!(task_id = %task_id, error = %error, "bulk item failed");
                    bulk.failures.push(ItemFailure { task_id, error });
                }
            }
        }
        let unattempted = total - bulk.processed() - bulk.skipped;
        bulk.skipped += unattempted;

        if bulk.incomplete() {
            tracing::info!(
                processed = bulk.processed(),
                skipped = bulk.skipped,
                "bulk run stopped early"
            );
        }
        bulk
    }
}
