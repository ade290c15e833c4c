//! Run creation and inspection.

use crate::core::{
    validate_steps, RunId, RunSnapshot, Task, TaskId, VersionSelector, WorkflowDefinition,
    WorkflowId, WorkflowRun,
};
use crate::core::run::MAX_PRIORITY;
use crate::error::{Error, Result};
use crate::orchestration::context::CallContext;
use crate::orchestration::registry::VersionRegistry;
use crate::store::Store;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

/// Parameters of a new run.
#[derive(Debug, Clone, PartialEq)]
pub struct RunRequest {
    pub workflow_id: WorkflowId,
    pub version: VersionSelector,
    /// JSON object or null.
    pub input: serde_json::Value,
    pub additional_metadata: BTreeMap<String, String>,
    /// 1..=3, 0 means the default.
    pub priority: u8,
}

impl RunRequest {
    pub fn new(workflow_id: WorkflowId) -> Self {
        Self {
            workflow_id,
            version: VersionSelector::Latest,
            input: serde_json::Value::Null,
            additional_metadata: BTreeMap::new(),
            priority: 0,
        }
    }

    pub fn version(mut self, version: VersionSelector) -> Self {
        self.version = version;
        self
    }

    pub fn input(mut self, input: serde_json::Value) -> Self {
        self.input = input;
        self
    }

    pub fn label(mut self, key: &str, value: &str) -> Self {
        self.additional_metadata
            .insert(key.to_string(), value.to_string());
        self
    }

    pub fn priority(mut self, priority: u8) -> Self {
        self.priority = priority;
        self
    }

    fn validate(&self) -> Result<()> {
        if !(self.input.is_object() || self.input.is_null()) {
            return Err(Error::InvalidArgument(
                "run input must be a JSON object".to_string(),
            ));
        }
        if self.priority > MAX_PRIORITY {
            return Err(Error::InvalidArgument(format!(
                "priority must be between 1 and {}, got {}",
                MAX_PRIORITY, self.priority
            )));
        }
        Ok(())
    }
}

/// Creates runs against a resolved workflow version.
#[derive(Debug, Clone)]
pub struct RunCoordinator {
    store: Arc<dyn Store>,
    registry: VersionRegistry,
}

impl RunCoordinator {
    pub fn new(store: Arc<dyn Store>, registry: VersionRegistry) -> Self {
        Self { store, registry }
    }

    /// Resolve the version, seed one task per step and commit the run.
    ///
    /// The run and all of its tasks become visible together.
    pub async fn trigger(&self, ctx: &CallContext, request: RunRequest) -> Result<WorkflowRun> {
        request.validate()?;
        ctx.check()?;

        let definition = self
            .registry
            .resolve(&request.workflow_id, request.version)
            .await?;

        let mut run = WorkflowRun::new(request.workflow_id, definition.version, request.input)
            .with_metadata(request.additional_metadata);
        if request.priority > 0 {
            run = run.with_priority(request.priority);
        }

        let tasks = seed_tasks(&run, &definition)?;
        let task_count = tasks.len();
        ctx.check()?;
        self.store.create_run(run.clone(), tasks).await?;

        tracing::info!(
            run_id = %run.run_id,
            workflow_id = %run.workflow_id,
            version = run.version,
            tasks = task_count,
            "workflow run triggered"
        );
        Ok(run)
    }

    /// Current state of a run with its derived status.
    pub async fn snapshot(&self, run_id: RunId) -> Result<RunSnapshot> {
        let run = self
            .store
            .get_run(run_id)
            .await?
            .ok_or_else(|| Error::not_found("run", run_id))?;
        let tasks = self.store.run_tasks(run_id).await?;
        Ok(RunSnapshot::new(run, tasks))
    }
}

/// Build the initial task set of a run in dependency order.
pub fn seed_tasks(run: &WorkflowRun, definition: &WorkflowDefinition) -> Result<Vec<Task>> {
    let graph = validate_steps(&definition.steps)?;
    let order = graph.topological_order()?;

    let mut ids: HashMap<&str, TaskId> = HashMap::new();
    let mut tasks = Vec::with_capacity(order.len());
    for name in order {
        let step = definition
            .step(name)
            .ok_or_else(|| Error::Validation(format!("step '{}' is not declared", name)))?;
        let dependencies = step
            .depends_on
            .iter()
            .map(|dep| {
                ids.get(dep.as_str())
                    .copied()
                    .ok_or_else(|| Error::Validation(format!("step '{}' is not declared", dep)))
            })
            .collect::<Result<Vec<_>>>()?;

        let task = Task::new(
            run.run_id,
            run.workflow_id.clone(),
            &step.name,
            &step.action,
            dependencies,
        );
        ids.insert(step.name.as_str(), task.id);
        tasks.push(task);
    }
    Ok(tasks)
}
