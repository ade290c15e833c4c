//! Wire messages of the `v1.AdminService` gRPC service.
//!
//! Timestamps are Unix milliseconds. Ids are UUID strings.

use std::collections::BTreeMap;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
#[repr(i32)]
pub enum TaskStatus {
    Unspecified = 0,
    Queued = 1,
    Running = 2,
    Cancelling = 3,
    Cancelled = 4,
    Completed = 5,
    Failed = 6,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct StepDefinition {
    #[prost(string, tag = "1")]
    pub name: String,
    #[prost(string, tag = "2")]
    pub action: String,
    #[prost(string, repeated, tag = "3")]
    pub depends_on: Vec<String>,
    #[prost(uint64, optional, tag = "4")]
    pub timeout_secs: Option<u64>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct PutWorkflowRequest {
    #[prost(string, tag = "1")]
    pub workflow_id: String,
    #[prost(string, tag = "2")]
    pub description: String,
    #[prost(message, repeated, tag = "3")]
    pub steps: Vec<StepDefinition>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct PutWorkflowResponse {
    #[prost(string, tag = "1")]
    pub workflow_id: String,
    #[prost(uint32, tag = "2")]
    pub version: u32,
    #[prost(string, tag = "3")]
    pub content_hash: String,
    #[prost(bool, tag = "4")]
    pub unchanged: bool,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct TaskIdList {
    #[prost(string, repeated, tag = "1")]
    pub ids: Vec<String>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct WorkflowSelector {
    #[prost(string, tag = "1")]
    pub workflow_id: String,
    #[prost(enumeration = "TaskStatus", repeated, tag = "2")]
    pub statuses: Vec<i32>,
    #[prost(int64, optional, tag = "3")]
    pub since_unix_ms: Option<i64>,
    #[prost(int64, optional, tag = "4")]
    pub until_unix_ms: Option<i64>,
    #[prost(btree_map = "string, string", tag = "5")]
    pub metadata: BTreeMap<String, String>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct TaskFilter {
    #[prost(oneof = "task_filter::Selector", tags = "1, 2, 3")]
    pub selector: Option<task_filter::Selector>,
}

pub mod task_filter {
    #[derive(Clone, PartialEq, ::prost::Oneof)]
    pub enum Selector {
        #[prost(message, tag = "1")]
        Ids(super::TaskIdList),
        #[prost(string, tag = "2")]
        RunId(String),
        #[prost(message, tag = "3")]
        Workflow(super::WorkflowSelector),
    }
}

/// A task the bulk operation could not process.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ItemFailure {
    #[prost(string, tag = "1")]
    pub task_id: String,
    /// `tonic::Code` the error maps to.
    #[prost(int32, tag = "2")]
    pub code: i32,
    #[prost(string, tag = "3")]
    pub message: String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct CancelTasksRequest {
    #[prost(message, optional, tag = "1")]
    pub filter: Option<TaskFilter>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
#[repr(i32)]
pub enum CancelOutcome {
    Unspecified = 0,
    Cancelled = 1,
    AlreadyTerminal = 2,
    NotFound = 3,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct CancelTaskResult {
    #[prost(string, tag = "1")]
    pub task_id: String,
    #[prost(enumeration = "CancelOutcome", tag = "2")]
    pub outcome: i32,
    /// Terminal status found, for `AlreadyTerminal`.
    #[prost(enumeration = "TaskStatus", tag = "3")]
    pub status: i32,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct CancelTasksResponse {
    #[prost(message, repeated, tag = "1")]
    pub results: Vec<CancelTaskResult>,
    #[prost(message, repeated, tag = "2")]
    pub failures: Vec<ItemFailure>,
    #[prost(uint32, tag = "3")]
    pub skipped: u32,
    #[prost(bool, tag = "4")]
    pub incomplete: bool,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ReplayTasksRequest {
    #[prost(message, optional, tag = "1")]
    pub filter: Option<TaskFilter>,
    /// Skip invalidating completed dependents.
    #[prost(bool, tag = "2")]
    pub task_only: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
#[repr(i32)]
pub enum ReplayOutcome {
    Unspecified = 0,
    Replayed = 1,
    InvalidState = 2,
    NotFound = 3,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ReplayTaskResult {
    #[prost(string, tag = "1")]
    pub task_id: String,
    #[prost(enumeration = "ReplayOutcome", tag = "2")]
    pub outcome: i32,
    #[prost(uint32, tag = "3")]
    pub attempt: u32,
    #[prost(string, repeated, tag = "4")]
    pub superseded: Vec<String>,
    /// Status found, for `InvalidState`.
    #[prost(enumeration = "TaskStatus", tag = "5")]
    pub status: i32,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ReplayTasksResponse {
    #[prost(message, repeated, tag = "1")]
    pub results: Vec<ReplayTaskResult>,
    #[prost(message, repeated, tag = "2")]
    pub failures: Vec<ItemFailure>,
    #[prost(uint32, tag = "3")]
    pub skipped: u32,
    #[prost(bool, tag = "4")]
    pub incomplete: bool,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct TriggerWorkflowRunRequest {
    #[prost(string, tag = "1")]
    pub workflow_id: String,
    /// Absent means the active version.
    #[prost(uint32, optional, tag = "2")]
    pub version: Option<u32>,
    /// JSON object; empty means null.
    #[prost(string, tag = "3")]
    pub input_json: String,
    #[prost(btree_map = "string, string", tag = "4")]
    pub additional_metadata: BTreeMap<String, String>,
    #[prost(uint32, tag = "5")]
    pub priority: u32,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct TriggerWorkflowRunResponse {
    #[prost(string, tag = "1")]
    pub run_id: String,
    #[prost(string, tag = "2")]
    pub workflow_id: String,
    #[prost(uint32, tag = "3")]
    pub version: u32,
}
