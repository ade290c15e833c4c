//! gRPC transport for the admin API.
//!
//! Message types live in [`proto`]; the client and server glue in [`v1`] is
//! generated by `build.rs`.

pub mod convert;
pub mod proto;
pub mod server;

/// Generated `v1.AdminService` client and server.
pub mod v1 {
    include!(concat!(env!("OUT_DIR"), "/v1.AdminService.rs"));
}

pub use server::{parse_grpc_timeout, serve, serve_with_incoming, AdminGrpcService};
pub use v1::admin_service_client::AdminServiceClient;
pub use v1::admin_service_server::AdminServiceServer;
