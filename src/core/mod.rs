//! Core domain models for the control plane.
//!
//! Workflow definitions and their step graphs, runs, and the tasks that
//! make up a run, including the task status state machine.

/// Declares a UUID-backed identifier with a short display form.
macro_rules! uuid_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub Uuid);

        impl $name {
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }

            /// Return first 8 characters of the UUID for display.
            pub fn short(&self) -> String {
                self.0.to_string()[..8].to_string()
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl std::str::FromStr for $name {
            type Err = uuid::Error;

            fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
                Ok(Self(Uuid::parse_str(s)?))
            }
        }
    };
}

pub mod dag;
pub mod run;
pub mod task;
pub mod workflow;

pub use dag::{validate_steps, DependencyGraph};
pub use run::{RunId, RunSnapshot, RunStatus, WorkflowRun};
pub use task::{AttemptRecord, RequeueReason, Task, TaskId, TaskResult, TaskStatus};
pub use workflow::{
    content_hash, StepDefinition, VersionSelector, WorkflowDefinition, WorkflowDraft, WorkflowId,
};
