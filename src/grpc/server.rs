//! tonic service adapter over an [`AdminApi`].

use super::proto;
use super::v1::admin_service_server::{AdminService, AdminServiceServer};
use crate::admin::{AdminApi, CancelTasksRequest, ReplayTasksRequest, TriggerWorkflowRunRequest};
use crate::config::Config;
use crate::core::WorkflowDraft;
use crate::error::{Error, Result};
use crate::orchestration::CallContext;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio_stream::wrappers::TcpListenerStream;
use tokio_util::sync::CancellationToken;
use tonic::transport::Server;
use tonic::{Request, Response, Status};

const GRPC_TIMEOUT_HEADER: &str = "grpc-timeout";

/// Parse a `grpc-timeout` header value: up to 8 digits and a unit
/// (`H`, `M`, `S`, `m`, `u`, `n`).
pub fn parse_grpc_timeout(value: &str) -> Option<Duration> {
    if !value.is_ascii() || value.len() < 2 || value.len() > 9 {
        return None;
    }
    let (digits, unit) = value.split_at(value.len() - 1);
    if !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let amount: u64 = digits.parse().ok()?;
    let duration = match unit {
        "H" => Duration::from_secs(amount * 60 * 60),
        "M" => Duration::from_secs(amount * 60),
        "S" => Duration::from_secs(amount),
        "m" => Duration::from_millis(amount),
        "u" => Duration::from_micros(amount),
        "n" => Duration::from_nanos(amount),
        _ => return None,
    };
    Some(duration)
}

/// Serves an [`AdminApi`] as `v1.AdminService`.
///
/// Each call gets a [`CallContext`] whose deadline is the client's
/// `grpc-timeout`, capped by the configured default, and whose
/// cancellation follows server shutdown.
#[derive(Debug)]
pub struct AdminGrpcService<A> {
    api: Arc<A>,
    default_deadline: Duration,
    shutdown: CancellationToken,
}

impl<A> Clone for AdminGrpcService<A> {
    fn clone(&self) -> Self {
        Self {
            api: Arc::clone(&self.api),
            default_deadline: self.default_deadline,
            shutdown: self.shutdown.clone(),
        }
    }
}

impl<A: AdminApi + 'static> AdminGrpcService<A> {
    pub fn new(api: Arc<A>, default_deadline: Duration) -> Self {
        Self {
            api,
            default_deadline,
            shutdown: CancellationToken::new(),
        }
    }

    pub fn with_shutdown(mut self, shutdown: CancellationToken) -> Self {
        self.shutdown = shutdown;
        self
    }

    pub fn into_server(self) -> AdminServiceServer<Self> {
        AdminServiceServer::new(self)
    }

    fn context<T>(&self, request: &Request<T>) -> CallContext {
        let requested = request
            .metadata()
            .get(GRPC_TIMEOUT_HEADER)
            .and_then(|value| value.to_str().ok())
            .and_then(parse_grpc_timeout);
        let timeout = requested.map_or(self.default_deadline, |t| t.min(self.default_deadline));
        CallContext::with_timeout(timeout).with_cancel(self.shutdown.child_token())
    }
}

#[tonic::async_trait]
impl<A: AdminApi + 'static> AdminService for AdminGrpcService<A> {
    async fn put_workflow(
        &self,
        request: Request<proto::PutWorkflowRequest>,
    ) -> std::result::Result<Response<proto::PutWorkflowResponse>, Status> {
        let ctx = self.context(&request);
        let draft = WorkflowDraft::try_from(request.into_inner())?;
        tracing::debug!(workflow_id = %draft.workflow_id, steps = draft.steps.len(), "PutWorkflow");
        let response = self.api.put_workflow(&ctx, draft).await?;
        Ok(Response::new(response.into()))
    }

    async fn cancel_tasks(
        &self,
        request: Request<proto::CancelTasksRequest>,
    ) -> std::result::Result<Response<proto::CancelTasksResponse>, Status> {
        let ctx = self.context(&request);
        let request = CancelTasksRequest::try_from(request.into_inner())?;
        tracing::debug!(filter = ?request.filter, "CancelTasks");
        let response = self.api.cancel_tasks(&ctx, request).await?;
        Ok(Response::new(response.into()))
    }

    async fn replay_tasks(
        &self,
        request: Request<proto::ReplayTasksRequest>,
    ) -> std::result::Result<Response<proto::ReplayTasksResponse>, Status> {
        let ctx = self.context(&request);
        let request = ReplayTasksRequest::try_from(request.into_inner())?;
        tracing::debug!(filter = ?request.filter, scope = ?request.scope, "ReplayTasks");
        let response = self.api.replay_tasks(&ctx, request).await?;
        Ok(Response::new(response.into()))
    }

    async fn trigger_workflow_run(
        &self,
        request: Request<proto::TriggerWorkflowRunRequest>,
    ) -> std::result::Result<Response<proto::TriggerWorkflowRunResponse>, Status> {
        let ctx = self.context(&request);
        let request = TriggerWorkflowRunRequest::try_from(request.into_inner())?;
        tracing::debug!(workflow_id = %request.workflow_id, version = %request.version, "TriggerWorkflowRun");
        let response = self.api.trigger_workflow_run(&ctx, request).await?;
        Ok(Response::new(response.into()))
    }
}

/// Serve `api` on the configured address until `shutdown` fires.
pub async fn serve<A: AdminApi + 'static>(
    api: Arc<A>,
    config: &Config,
    shutdown: CancellationToken,
) -> Result<()> {
    let addr: SocketAddr = config
        .listen
        .parse()
        .map_err(|e| Error::InvalidArgument(format!("invalid listen address '{}': {}", config.listen, e)))?;
    let service = AdminGrpcService::new(api, config.default_deadline()).with_shutdown(shutdown.clone());

    tracing::info!(%addr, "admin service listening");
    Server::builder()
        .add_service(service.into_server())
        .serve_with_shutdown(addr, async move { shutdown.cancelled().await })
        .await?;
    tracing::info!("admin service stopped");
    Ok(())
}

/// Serve `api` on an already bound listener until `shutdown` fires.
pub async fn serve_with_incoming<A: AdminApi + 'static>(
    api: Arc<A>,
    default_deadline: Duration,
    incoming: TcpListenerStream,
    shutdown: CancellationToken,
) -> Result<()> {
    let service = AdminGrpcService::new(api, default_deadline).with_shutdown(shutdown.clone());
    Server::builder()
        .add_service(service.into_server())
        .serve_with_incoming_shutdown(incoming, async move { shutdown.cancelled().await })
        .await?;
    Ok(())
}
