fn main() -> Result<(), Box<dyn std::error::Error>> {
    // The message types are hand-written prost structs (src/grpc/proto.rs), so the
    // service glue is generated with the manual builder instead of from a .proto file.
    let codec = "tonic::codec::ProstCodec";

    let method = |name: &str, route: &str, input: &str, output: &str| {
        tonic_build::manual::Method::builder()
            .name(name)
            .route_name(route)
            .input_type(format!("crate::grpc::proto::{}", input))
            .output_type(format!("crate::grpc::proto::{}", output))
            .codec_path(codec)
            .build()
    };

    let admin_service = tonic_build::manual::Service::builder()
        .name("AdminService")
        .package("v1")
        .method(method(
            "put_workflow",
            "PutWorkflow",
            "PutWorkflowRequest",
            "PutWorkflowResponse",
        ))
        .method(method(
            "cancel_tasks",
            "CancelTasks",
            "CancelTasksRequest",
            "CancelTasksResponse",
        ))
        .method(method(
            "replay_tasks",
            "ReplayTasks",
            "ReplayTasksRequest",
            "ReplayTasksResponse",
        ))
        .method(method(
            "trigger_workflow_run",
            "TriggerWorkflowRun",
            "TriggerWorkflowRunRequest",
            "TriggerWorkflowRunResponse",
        ))
        .build();

    tonic_build::manual::Builder::new().compile(&[admin_service]);

    println!("cargo:rerun-if-changed=build.rs");

    Ok(())
}
