//! Task filters shared by cancellation and replay.

use crate::core::{RunId, TaskId, TaskStatus, WorkflowId};
use crate::error::{Error, Result};
use crate::orchestration::context::CallContext;
use crate::store::{Store, TaskQuery};
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

/// Tasks of one workflow's runs, narrowed by status and run attributes.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkflowSelector {
    pub workflow_id: WorkflowId,
    pub statuses: Vec<TaskStatus>,
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
    pub metadata: BTreeMap<String, String>,
}

impl WorkflowSelector {
    pub fn new(workflow_id: WorkflowId, statuses: &[TaskStatus]) -> Self {
        Self {
            workflow_id,
            statuses: statuses.to_vec(),
            since: None,
            until: None,
            metadata: BTreeMap::new(),
        }
    }

    pub fn created_between(
        mut self,
        since: Option<DateTime<Utc>>,
        until: Option<DateTime<Utc>>,
    ) -> Self {
        self.since = since;
        self.until = until;
        self
    }

    pub fn with_label(mut self, key: &str, value: &str) -> Self {
        self.metadata.insert(key.to_string(), value.to_string());
        self
    }
}

/// Which tasks an admin operation targets.
#[derive(Debug, Clone, PartialEq)]
pub enum TaskFilter {
    /// Explicit task ids. Unknown ids are reported per item.
    Ids(Vec<TaskId>),
    /// Every task of a run.
    Run(RunId),
    Workflow(WorkflowSelector),
}

impl TaskFilter {
    /// Check the filter's shape without touching the store.
    pub fn validate(&self) -> Result<()> {
        match self {
            TaskFilter::Ids(ids) if ids.is_empty() => Err(Error::InvalidArgument(
                "filter must name at least one task id".to_string(),
            )),
            TaskFilter::Workflow(selector) => {
                if selector.statuses.is_empty() {
                    return Err(Error::InvalidArgument(
                        "workflow filter must name at least one status".to_string(),
                    ));
                }
                if let (Some(since), Some(until)) = (selector.since, selector.until) {
                    if since >= until {
                        return Err(Error::InvalidArgument(
                            "filter window is empty: since must be before until".to_string(),
                        ));
                    }
                }
                Ok(())
            }
            _ => Ok(()),
        }
    }
}

/// Resolves filters to candidate task ids with a plain read.
#[derive(Debug, Clone)]
pub struct FilterResolver {
    store: Arc<dyn Store>,
    max_candidates: usize,
}

impl FilterResolver {
    pub fn new(store: Arc<dyn Store>, max_candidates: usize) -> Self {
        Self {
            store,
            max_candidates,
        }
    }

    /// Resolve `filter` to distinct task ids.
    ///
    /// # Errors
    /// `InvalidArgument` for a malformed filter or too many candidates,
    /// `NotFound` for an unknown run or workflow.
    pub async fn resolve(&self, ctx: &CallContext, filter: &TaskFilter) -> Result<Vec<TaskId>> {
        filter.validate()?;
        ctx.check()?;

        let candidates = match filter {
            TaskFilter::Ids(ids) => {
                let mut seen = HashSet::new();
                ids.iter().copied().filter(|id| seen.insert(*id)).collect()
            }
            TaskFilter::Run(run_id) => {
                if self.store.get_run(*run_id).await?.is_none() {
                    return Err(Error::not_found("run", run_id));
                }
                self.store
                    .run_tasks(*run_id)
                    .await?
                    .into_iter()
                    .map(|t| t.id)
                    .collect()
            }
            TaskFilter::Workflow(selector) => {
                if self.store.latest_version(&selector.workflow_id).await? == 0 {
                    return Err(Error::not_found("workflow", &selector.workflow_id));
                }
                let mut seen = HashSet::new();
                let statuses = selector
                    .statuses
                    .iter()
                    .copied()
                    .filter(|s| seen.insert(*s))
                    .collect();
                let query = TaskQuery {
                    workflow_id: selector.workflow_id.clone(),
                    statuses,
                    since: selector.since,
                    until: selector.until,
                    metadata: selector.metadata.clone(),
                };
                self.store.find_tasks(&query).await?
            }
        };

        if candidates.len() > self.max_candidates {
            return Err(Error::InvalidArgument(format!(
                "filter matches {} tasks, limit is {}",
                candidates.len(),
                self.max_candidates
            )));
        }
        tracing::debug!(candidates = candidates.len(), "filter resolved");
        Ok(candidates)
    }
}
