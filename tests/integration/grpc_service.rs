//! The admin operations over a real gRPC connection.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::TcpListenerStream;
use tokio_util::sync::CancellationToken;
use tonic::transport::Channel;
use tonic::Code;

use conductor::core::TaskStatus;
use conductor::grpc::proto::{self, task_filter};
use conductor::grpc::{serve_with_incoming, AdminServiceClient};
use conductor::{AdminApi, Config, ControlPlane, InMemoryStore, UnimplementedAdminApi};

use crate::fixtures::{linear_draft, Harness};

/// A server on an ephemeral port, stopped on drop.
struct TestServer {
    addr: SocketAddr,
    shutdown: CancellationToken,
    handle: Option<JoinHandle<conductor::Result<()>>>,
}

impl TestServer {
    async fn start<A: AdminApi + 'static>(api: Arc<A>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("local addr");
        let shutdown = CancellationToken::new();
        let handle = tokio::spawn(serve_with_incoming(
            api,
            Duration::from_secs(5),
            TcpListenerStream::new(listener),
            shutdown.clone(),
        ));
        Self {
            addr,
            shutdown,
            handle: Some(handle),
        }
    }

    async fn client(&self) -> AdminServiceClient<Channel> {
        AdminServiceClient::connect(format!("http://{}", self.addr))
            .await
            .expect("connect")
    }

    async fn stop(mut self) {
        self.shutdown.cancel();
        if let Some(handle) = self.handle.take() {
            handle.await.expect("server task").expect("server result");
        }
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

fn plane() -> Arc<ControlPlane> {
    Arc::new(ControlPlane::new(Arc::new(InMemoryStore::new()), &Config::default()))
}

fn run_filter(run_id: &str) -> Option<proto::TaskFilter> {
    Some(proto::TaskFilter {
        selector: Some(task_filter::Selector::RunId(run_id.to_string())),
    })
}

/// Test: Publish, trigger, cancel and replay over the wire
/// Given a served control plane
/// When a client runs the four operations in sequence
/// Then each response reflects the state transitions
#[tokio::test]
async fn test_admin_flow_over_grpc() {
    let server = TestServer::start(plane()).await;
    let mut client = server.client().await;

    let published = client
        .put_workflow(proto::PutWorkflowRequest::from(&linear_draft("etl")))
        .await
        .unwrap()
        .into_inner();
    assert_eq!(published.workflow_id, "etl");
    assert_eq!(published.version, 1);
    assert!(!published.unchanged);

    let again = client
        .put_workflow(proto::PutWorkflowRequest::from(&linear_draft("etl")))
        .await
        .unwrap()
        .into_inner();
    assert!(again.unchanged);

    let run = client
        .trigger_workflow_run(proto::TriggerWorkflowRunRequest {
            workflow_id: "etl".to_string(),
            version: None,
            input_json: r#"{"day":"2024-01-01"}"#.to_string(),
            additional_metadata: [("tenant".to_string(), "acme".to_string())].into(),
            priority: 2,
        })
        .await
        .unwrap()
        .into_inner();
    assert_eq!(run.version, 1);

    let cancelled = client
        .cancel_tasks(proto::CancelTasksRequest {
            filter: run_filter(&run.run_id),
        })
        .await
        .unwrap()
        .into_inner();
    assert_eq!(cancelled.results.len(), 3);
    assert!(cancelled
        .results
        .iter()
        .all(|r| r.outcome() == proto::CancelOutcome::Cancelled));
    assert!(cancelled.failures.is_empty());
    assert!(!cancelled.incomplete);

    let replayed = client
        .replay_tasks(proto::ReplayTasksRequest {
            filter: Some(proto::TaskFilter {
                selector: Some(task_filter::Selector::Workflow(proto::WorkflowSelector {
                    workflow_id: "etl".to_string(),
                    statuses: vec![proto::TaskStatus::Cancelled as i32],
                    metadata: [("tenant".to_string(), "acme".to_string())].into(),
                    ..Default::default()
                })),
            }),
            task_only: false,
        })
        .await
        .unwrap()
        .into_inner();
    assert_eq!(replayed.results.len(), 3);
    assert!(replayed.results.iter().all(|r| {
        r.outcome() == proto::ReplayOutcome::Replayed && r.attempt == 2
    }));

    server.stop().await;
}

/// Test: Error kinds map to status codes
/// Given a served control plane
/// When requests fail for different reasons
/// Then the client sees the matching gRPC codes
#[tokio::test]
async fn test_error_codes_over_grpc() {
    let harness = Harness::new();
    harness.publish(linear_draft("etl")).await;
    let run_id = harness.trigger("etl").await;
    let server = TestServer::start(Arc::new(harness.plane.clone())).await;
    let mut client = server.client().await;

    let unknown = client
        .trigger_workflow_run(proto::TriggerWorkflowRunRequest {
            workflow_id: "missing".to_string(),
            ..Default::default()
        })
        .await
        .unwrap_err();
    assert_eq!(unknown.code(), Code::NotFound);

    let bad_graph = client
        .put_workflow(proto::PutWorkflowRequest {
            workflow_id: "loop".to_string(),
            description: String::new(),
            steps: vec![
                proto::StepDefinition {
                    name: "a".to_string(),
                    action: "noop".to_string(),
                    depends_on: vec!["b".to_string()],
                    timeout_secs: None,
                },
                proto::StepDefinition {
                    name: "b".to_string(),
                    action: "noop".to_string(),
                    depends_on: vec!["a".to_string()],
                    timeout_secs: None,
                },
            ],
        })
        .await
        .unwrap_err();
    assert_eq!(bad_graph.code(), Code::InvalidArgument);

    let no_filter = client
        .cancel_tasks(proto::CancelTasksRequest { filter: None })
        .await
        .unwrap_err();
    assert_eq!(no_filter.code(), Code::InvalidArgument);

    let bad_id = client
        .cancel_tasks(proto::CancelTasksRequest {
            filter: run_filter("not-a-uuid"),
        })
        .await
        .unwrap_err();
    assert_eq!(bad_id.code(), Code::InvalidArgument);

    let nothing_replayable = client
        .replay_tasks(proto::ReplayTasksRequest {
            filter: run_filter(&run_id.to_string()),
            task_only: false,
        })
        .await
        .unwrap_err();
    assert_eq!(nothing_replayable.code(), Code::FailedPrecondition);

    harness.store.set_available(false);
    let offline = client
        .cancel_tasks(proto::CancelTasksRequest {
            filter: run_filter(&run_id.to_string()),
        })
        .await
        .unwrap_err();
    assert_eq!(offline.code(), Code::Unavailable);
    harness.store.set_available(true);

    assert_eq!(harness.status(run_id, "a").await, TaskStatus::Queued);
    server.stop().await;
}

/// Test: Unimplemented service
/// Given a server backed by an API that implements nothing
/// When each operation is called
/// Then every call fails with Unimplemented
#[tokio::test]
async fn test_unimplemented_over_grpc() {
    let server = TestServer::start(Arc::new(UnimplementedAdminApi)).await;
    let mut client = server.client().await;

    let put = client
        .put_workflow(proto::PutWorkflowRequest::from(&linear_draft("etl")))
        .await
        .unwrap_err();
    assert_eq!(put.code(), Code::Unimplemented);

    let cancel = client
        .cancel_tasks(proto::CancelTasksRequest {
            filter: run_filter(&uuid::Uuid::new_v4().to_string()),
        })
        .await
        .unwrap_err();
    assert_eq!(cancel.code(), Code::Unimplemented);

    let replay = client
        .replay_tasks(proto::ReplayTasksRequest {
            filter: run_filter(&uuid::Uuid::new_v4().to_string()),
            task_only: true,
        })
        .await
        .unwrap_err();
    assert_eq!(replay.code(), Code::Unimplemented);

    let trigger = client
        .trigger_workflow_run(proto::TriggerWorkflowRunRequest {
            workflow_id: "etl".to_string(),
            ..Default::default()
        })
        .await
        .unwrap_err();
    assert_eq!(trigger.code(), Code::Unimplemented);

    server.stop().await;
}
