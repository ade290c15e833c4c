//! Conversions between wire messages and domain types.

use super::proto;
use crate::admin::{
    CancelTasksRequest, PutWorkflowResponse, ReplayTasksRequest, TriggerWorkflowRunRequest,
    TriggerWorkflowRunResponse,
};
use crate::core::{
    RunId, StepDefinition, TaskId, TaskStatus, VersionSelector, WorkflowDraft, WorkflowId,
};
use crate::error::Error;
use crate::orchestration::{
    BulkOutcome, CancelOutcome, ItemFailure, ReplayOutcome, ReplayScope, TaskFilter,
    WorkflowSelector,
};
use chrono::{DateTime, Utc};
use tonic::{Code, Status};

impl From<Error> for Status {
    fn from(error: Error) -> Self {
        let message = error.to_string();
        match error {
            Error::Validation(_) | Error::InvalidArgument(_) => Status::invalid_argument(message),
            Error::NotFound { .. } => Status::not_found(message),
            Error::InvalidState(_) => Status::failed_precondition(message),
            Error::DeadlineExceeded => Status::deadline_exceeded(message),
            Error::Unimplemented(_) => Status::unimplemented(message),
            Error::Conflict { .. } => Status::aborted(message),
            Error::StoreUnavailable(_) => Status::unavailable(message),
            Error::Rpc(status) => status,
            _ => Status::internal(message),
        }
    }
}

fn invalid(message: String) -> Error {
    Error::InvalidArgument(message)
}

fn parse_task_id(value: &str) -> Result<TaskId, Error> {
    value
        .parse()
        .map_err(|_| invalid(format!("invalid task id '{}'", value)))
}

fn parse_run_id(value: &str) -> Result<RunId, Error> {
    value
        .parse()
        .map_err(|_| invalid(format!("invalid run id '{}'", value)))
}

fn parse_workflow_id(value: &str) -> Result<WorkflowId, Error> {
    WorkflowId::parse(value).map_err(|_| invalid(format!("invalid workflow id '{}'", value)))
}

fn from_unix_ms(value: Option<i64>) -> Result<Option<DateTime<Utc>>, Error> {
    value
        .map(|ms| {
            DateTime::from_timestamp_millis(ms)
                .ok_or_else(|| invalid(format!("timestamp {} out of range", ms)))
        })
        .transpose()
}

// Task status

impl From<TaskStatus> for proto::TaskStatus {
    fn from(status: TaskStatus) -> Self {
        match status {
            TaskStatus::Queued => proto::TaskStatus::Queued,
            TaskStatus::Running => proto::TaskStatus::Running,
            TaskStatus::Cancelling => proto::TaskStatus::Cancelling,
            TaskStatus::Cancelled => proto::TaskStatus::Cancelled,
            TaskStatus::Completed => proto::TaskStatus::Completed,
            TaskStatus::Failed => proto::TaskStatus::Failed,
        }
    }
}

impl TryFrom<proto::TaskStatus> for TaskStatus {
    type Error = Error;

    fn try_from(status: proto::TaskStatus) -> Result<Self, Error> {
        match status {
            proto::TaskStatus::Unspecified => Err(invalid("task status is unspecified".to_string())),
            proto::TaskStatus::Queued => Ok(TaskStatus::Queued),
            proto::TaskStatus::Running => Ok(TaskStatus::Running),
            proto::TaskStatus::Cancelling => Ok(TaskStatus::Cancelling),
            proto::TaskStatus::Cancelled => Ok(TaskStatus::Cancelled),
            proto::TaskStatus::Completed => Ok(TaskStatus::Completed),
            proto::TaskStatus::Failed => Ok(TaskStatus::Failed),
        }
    }
}

fn status_from_wire(value: i32) -> Result<TaskStatus, Error> {
    proto::TaskStatus::try_from(value)
        .map_err(|_| invalid(format!("unknown task status {}", value)))
        .and_then(TaskStatus::try_from)
}

// PutWorkflow

impl TryFrom<proto::PutWorkflowRequest> for WorkflowDraft {
    type Error = Error;

    fn try_from(request: proto::PutWorkflowRequest) -> Result<Self, Error> {
        let workflow_id = WorkflowId::parse(&request.workflow_id)?;
        let steps = request
            .steps
            .into_iter()
            .map(|step| StepDefinition {
                name: step.name,
                action: step.action,
                depends_on: step.depends_on,
                timeout_secs: step.timeout_secs,
            })
            .collect();
        Ok(WorkflowDraft::new(workflow_id, steps).with_description(&request.description))
    }
}

impl From<&WorkflowDraft> for proto::PutWorkflowRequest {
    fn from(draft: &WorkflowDraft) -> Self {
        Self {
            workflow_id: draft.workflow_id.to_string(),
            description: draft.description.clone(),
            steps: draft
                .steps
                .iter()
                .map(|step| proto::StepDefinition {
                    name: step.name.clone(),
                    action: step.action.clone(),
                    depends_on: step.depends_on.clone(),
                    timeout_secs: step.timeout_secs,
                })
                .collect(),
        }
    }
}

impl From<PutWorkflowResponse> for proto::PutWorkflowResponse {
    fn from(response: PutWorkflowResponse) -> Self {
        Self {
            workflow_id: response.workflow_id.to_string(),
            version: response.version,
            content_hash: response.content_hash,
            unchanged: response.unchanged,
        }
    }
}

// Filters

impl TryFrom<proto::TaskFilter> for TaskFilter {
    type Error = Error;

    fn try_from(filter: proto::TaskFilter) -> Result<Self, Error> {
        use proto::task_filter::Selector;

        let selector = filter
            .selector
            .ok_or_else(|| invalid("filter must set ids, run_id or workflow".to_string()))?;
        let filter = match selector {
            Selector::Ids(list) => TaskFilter::Ids(
                list.ids
                    .iter()
                    .map(|id| parse_task_id(id))
                    .collect::<Result<_, _>>()?,
            ),
            Selector::RunId(run_id) => TaskFilter::Run(parse_run_id(&run_id)?),
            Selector::Workflow(selector) => TaskFilter::Workflow(WorkflowSelector {
                workflow_id: parse_workflow_id(&selector.workflow_id)?,
                statuses: selector
                    .statuses
                    .iter()
                    .map(|s| status_from_wire(*s))
                    .collect::<Result<_, _>>()?,
                since: from_unix_ms(selector.since_unix_ms)?,
                until: from_unix_ms(selector.until_unix_ms)?,
                metadata: selector.metadata,
            }),
        };
        filter.validate()?;
        Ok(filter)
    }
}

impl From<&TaskFilter> for proto::TaskFilter {
    fn from(filter: &TaskFilter) -> Self {
        use proto::task_filter::Selector;

        let selector = match filter {
            TaskFilter::Ids(ids) => Selector::Ids(proto::TaskIdList {
                ids: ids.iter().map(ToString::to_string).collect(),
            }),
            TaskFilter::Run(run_id) => Selector::RunId(run_id.to_string()),
            TaskFilter::Workflow(selector) => Selector::Workflow(proto::WorkflowSelector {
                workflow_id: selector.workflow_id.to_string(),
                statuses: selector
                    .statuses
                    .iter()
                    .map(|s| proto::TaskStatus::from(*s) as i32)
                    .collect(),
                since_unix_ms: selector.since.map(|t| t.timestamp_millis()),
                until_unix_ms: selector.until.map(|t| t.timestamp_millis()),
                metadata: selector.metadata.clone(),
            }),
        };
        Self {
            selector: Some(selector),
        }
    }
}

fn required_filter(filter: Option<proto::TaskFilter>) -> Result<TaskFilter, Error> {
    filter
        .ok_or_else(|| invalid("filter is required".to_string()))?
        .try_into()
}

// Bulk responses

impl From<ItemFailure> for proto::ItemFailure {
    fn from(failure: ItemFailure) -> Self {
        let status = Status::from(failure.error);
        Self {
            task_id: failure.task_id.to_string(),
            code: status.code() as i32,
            message: status.message().to_string(),
        }
    }
}

impl proto::ItemFailure {
    pub fn code(&self) -> Code {
        Code::from_i32(self.code)
    }
}

impl TryFrom<proto::CancelTasksRequest> for CancelTasksRequest {
    type Error = Error;

    fn try_from(request: proto::CancelTasksRequest) -> Result<Self, Error> {
        Ok(Self {
            filter: required_filter(request.filter)?,
        })
    }
}

impl From<BulkOutcome<CancelOutcome>> for proto::CancelTasksResponse {
    fn from(bulk: BulkOutcome<CancelOutcome>) -> Self {
        let incomplete = bulk.incomplete();
        let results = bulk
            .outcomes
            .into_iter()
            .map(|item| {
                let (outcome, status) = match item.outcome {
                    CancelOutcome::Cancelled => {
                        (proto::CancelOutcome::Cancelled, proto::TaskStatus::Cancelled)
                    }
                    CancelOutcome::AlreadyTerminal { status } => {
                        (proto::CancelOutcome::AlreadyTerminal, status.into())
                    }
                    CancelOutcome::NotFound => {
                        (proto::CancelOutcome::NotFound, proto::TaskStatus::Unspecified)
                    }
                };
                proto::CancelTaskResult {
                    task_id: item.task_id.to_string(),
                    outcome: outcome as i32,
                    status: status as i32,
                }
            })
            .collect();
        Self {
            results,
            failures: bulk.failures.into_iter().map(Into::into).collect(),
            skipped: bulk.skipped as u32,
            incomplete,
        }
    }
}

impl TryFrom<proto::ReplayTasksRequest> for ReplayTasksRequest {
    type Error = Error;

    fn try_from(request: proto::ReplayTasksRequest) -> Result<Self, Error> {
        Ok(Self {
            filter: required_filter(request.filter)?,
            scope: if request.task_only {
                ReplayScope::TaskOnly
            } else {
                ReplayScope::Downstream
            },
        })
    }
}

impl From<BulkOutcome<ReplayOutcome>> for proto::ReplayTasksResponse {
    fn from(bulk: BulkOutcome<ReplayOutcome>) -> Self {
        let incomplete = bulk.incomplete();
        let results = bulk
            .outcomes
            .into_iter()
            .map(|item| {
                let task_id = item.task_id.to_string();
                match item.outcome {
                    ReplayOutcome::Replayed {
                        attempt,
                        superseded,
                    } => proto::ReplayTaskResult {
                        task_id,
                        outcome: proto::ReplayOutcome::Replayed as i32,
                        attempt,
                        superseded: superseded.iter().map(ToString::to_string).collect(),
                        status: proto::TaskStatus::Queued as i32,
                    },
                    ReplayOutcome::InvalidState { status } => proto::ReplayTaskResult {
                        task_id,
                        outcome: proto::ReplayOutcome::InvalidState as i32,
                        attempt: 0,
                        superseded: Vec::new(),
                        status: proto::TaskStatus::from(status) as i32,
                    },
                    ReplayOutcome::NotFound => proto::ReplayTaskResult {
                        task_id,
                        outcome: proto::ReplayOutcome::NotFound as i32,
                        attempt: 0,
                        superseded: Vec::new(),
                        status: proto::TaskStatus::Unspecified as i32,
                    },
                }
            })
            .collect();
        Self {
            results,
            failures: bulk.failures.into_iter().map(Into::into).collect(),
            skipped: bulk.skipped as u32,
            incomplete,
        }
    }
}

// TriggerWorkflowRun

impl TryFrom<proto::TriggerWorkflowRunRequest> for TriggerWorkflowRunRequest {
    type Error = Error;

    fn try_from(request: proto::TriggerWorkflowRunRequest) -> Result<Self, Error> {
        let workflow_id = WorkflowId::parse(&request.workflow_id)?;
        let version = match request.version {
            None => VersionSelector::Latest,
            Some(0) => return Err(invalid("version must be positive".to_string())),
            Some(version) => VersionSelector::Exact(version),
        };
        let input = if request.input_json.trim().is_empty() {
            serde_json::Value::Null
        } else {
            serde_json::from_str(&request.input_json)
                .map_err(|e| invalid(format!("invalid input JSON: {}", e)))?
        };
        let priority = u8::try_from(request.priority)
            .map_err(|_| invalid(format!("priority {} out of range", request.priority)))?;

        let mut run = TriggerWorkflowRunRequest::new(workflow_id)
            .version(version)
            .input(input)
            .priority(priority);
        run.additional_metadata = request.additional_metadata;
        Ok(run)
    }
}

impl From<TriggerWorkflowRunResponse> for proto::TriggerWorkflowRunResponse {
    fn from(response: TriggerWorkflowRunResponse) -> Self {
        Self {
            run_id: response.run_id.to_string(),
            workflow_id: response.workflow_id.to_string(),
            version: response.version,
        }
    }
}
