pub mod admin;
pub mod config;
pub mod core;
pub mod error;
pub mod grpc;
pub mod log;
pub mod orchestration;
pub mod store;

pub use admin::{AdminApi, ControlPlane, UnimplementedAdminApi};
pub use config::Config;
pub use error::{Error, Result};
pub use orchestration::CallContext;
pub use store::{InMemoryStore, Store};
