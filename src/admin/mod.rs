//! The admin surface: four operations over the orchestration components.
//!
//! [`AdminApi`] is the polymorphic interface. Every method has a provided
//! body returning `Unimplemented`, so an implementation only overrides what
//! it supports. [`ControlPlane`] implements all four.

use crate::config::Config;
use crate::core::{RunId, RunSnapshot, WorkflowDraft, WorkflowId};
use crate::error::{Error, Result};
use crate::orchestration::{
    BulkOutcome, CallContext, CancelOutcome, CancellationCoordinator, FilterResolver,
    ReplayCoordinator, ReplayGuards, ReplayOutcome, ReplayScope, RunCoordinator, TaskFilter,
    VersionRegistry, WorkerGateway, WorkerPool,
};
use crate::store::Store;
use async_trait::async_trait;
use std::sync::Arc;

pub use crate::orchestration::RunRequest as TriggerWorkflowRunRequest;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PutWorkflowResponse {
    pub workflow_id: WorkflowId,
    pub version: u32,
    pub content_hash: String,
    /// An identical version already existed and was returned as is.
    pub unchanged: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CancelTasksRequest {
    pub filter: TaskFilter,
}

pub type CancelTasksResponse = BulkOutcome<CancelOutcome>;

#[derive(Debug, Clone, PartialEq)]
pub struct ReplayTasksRequest {
    pub filter: TaskFilter,
    pub scope: ReplayScope,
}

pub type ReplayTasksResponse = BulkOutcome<ReplayOutcome>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TriggerWorkflowRunResponse {
    pub run_id: RunId,
    pub workflow_id: WorkflowId,
    pub version: u32,
}

#[async_trait]
pub trait AdminApi: Send + Sync {
    async fn put_workflow(
        &self,
        _ctx: &CallContext,
        _request: WorkflowDraft,
    ) -> Result<PutWorkflowResponse> {
        Err(Error::Unimplemented("PutWorkflow"))
    }

    async fn cancel_tasks(
        &self,
        _ctx: &CallContext,
        _request: CancelTasksRequest,
    ) -> Result<CancelTasksResponse> {
        Err(Error::Unimplemented("CancelTasks"))
    }

    async fn replay_tasks(
        &self,
        _ctx: &CallContext,
        _request: ReplayTasksRequest,
    ) -> Result<ReplayTasksResponse> {
        Err(Error::Unimplemented("ReplayTasks"))
    }

    async fn trigger_workflow_run(
        &self,
        _ctx: &CallContext,
        _request: TriggerWorkflowRunRequest,
    ) -> Result<TriggerWorkflowRunResponse> {
        Err(Error::Unimplemented("TriggerWorkflowRun"))
    }
}

/// An admin API that implements nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct UnimplementedAdminApi;

impl AdminApi for UnimplementedAdminApi {}

/// The control plane, assembled from explicitly constructed components.
#[derive(Debug, Clone)]
pub struct ControlPlane {
    store: Arc<dyn Store>,
    registry: VersionRegistry,
    runs: RunCoordinator,
    cancellation: CancellationCoordinator,
    replay: ReplayCoordinator,
    workers: WorkerGateway,
}

impl ControlPlane {
    pub fn new(store: Arc<dyn Store>, config: &Config) -> Self {
        let registry = VersionRegistry::new(Arc::clone(&store), config.version_cas_retries);
        let resolver = FilterResolver::new(Arc::clone(&store), config.max_candidates);
        let pool = WorkerPool::new(config.bulk_concurrency);

        Self {
            runs: RunCoordinator::new(Arc::clone(&store), registry.clone()),
            cancellation: CancellationCoordinator::new(Arc::clone(&store), resolver.clone(), pool),
            replay: ReplayCoordinator::new(
                Arc::clone(&store),
                resolver,
                pool,
                ReplayGuards::new(),
            ),
            workers: WorkerGateway::new(Arc::clone(&store)),
            registry,
            store,
        }
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    pub fn registry(&self) -> &VersionRegistry {
        &self.registry
    }

    pub fn workers(&self) -> &WorkerGateway {
        &self.workers
    }

    pub async fn snapshot(&self, run_id: RunId) -> Result<RunSnapshot> {
        self.runs.snapshot(run_id).await
    }
}

#[async_trait]
impl AdminApi for ControlPlane {
    async fn put_workflow(
        &self,
        ctx: &CallContext,
        request: WorkflowDraft,
    ) -> Result<PutWorkflowResponse> {
        let outcome = self.registry.put_workflow(ctx, request).await?;
        Ok(PutWorkflowResponse {
            workflow_id: outcome.definition.workflow_id,
            version: outcome.definition.version,
            content_hash: outcome.definition.content_hash,
            unchanged: !outcome.created,
        })
    }

    async fn cancel_tasks(
        &self,
        ctx: &CallContext,
        request: CancelTasksRequest,
    ) -> Result<CancelTasksResponse> {
        self.cancellation.cancel(ctx, &request.filter).await
    }

    async fn replay_tasks(
        &self,
        ctx: &CallContext,
        request: ReplayTasksRequest,
    ) -> Result<ReplayTasksResponse> {
        self.replay.replay(ctx, &request.filter, request.scope).await
    }

    async fn trigger_workflow_run(
        &self,
        ctx: &CallContext,
        request: TriggerWorkflowRunRequest,
    ) -> Result<TriggerWorkflowRunResponse> {
        let run = self.runs.trigger(ctx, request).await?;
        Ok(TriggerWorkflowRunResponse {
            run_id: run.run_id,
            workflow_id: run.workflow_id,
            version: run.version,
        })
    }
}
