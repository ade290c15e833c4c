//! Orchestration layer for the control plane.
//!
//! This module provides the components behind the admin operations: the
//! version registry, run creation, bulk cancellation and replay, and the
//! worker-facing transitions they race against.

pub mod cancel;
pub mod context;
pub mod filter;
pub mod pool;
pub mod registry;
pub mod replay;
pub mod runs;
pub mod worker;

pub use cancel::{CancelOutcome, CancellationCoordinator};
pub use context::CallContext;
pub use filter::{FilterResolver, TaskFilter, WorkflowSelector};
pub use pool::{BulkOutcome, ItemFailure, ItemOutcome, WorkerPool};
pub use registry::{PublishOutcome, VersionRegistry};
pub use replay::{ReplayCoordinator, ReplayGuards, ReplayOutcome, ReplayScope};
pub use runs::{RunCoordinator, RunRequest};
pub use worker::{WorkerGateway, WorkerOutcome};
