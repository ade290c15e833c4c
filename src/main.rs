use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use clap::{Args, Parser, Subcommand};
use tokio_util::sync::CancellationToken;

use conductor::core::{RunId, TaskId, TaskStatus, VersionSelector, WorkflowDraft, WorkflowId};
use conductor::grpc::{self, proto, AdminServiceClient};
use conductor::orchestration::{TaskFilter, WorkflowSelector};
use conductor::{Config, ControlPlane, Error, InMemoryStore, Result};

/// Conductor - workflow task orchestration control plane
#[derive(Parser, Debug)]
#[command(name = "conductor")]
#[command(version, about, long_about = None)]
#[command(after_help = "ENVIRONMENT:\n    CONDUCTOR_DEBUG=1     Enable debug logging (alternative to --debug)\n    RUST_LOG              Explicit log filter, overrides both")]
pub struct Cli {
    /// Enable debug logging
    #[arg(short = 'd', long)]
    pub debug: bool,

    /// Config file (default: ~/.conductor/conductor.toml)
    #[arg(short = 'c', long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum Command {
    /// Run the admin gRPC server over an in-memory store
    Serve {
        /// Address to bind, overrides the config file
        #[arg(long)]
        listen: Option<String>,
    },

    /// Publish a workflow definition from a JSON file
    PutWorkflow {
        /// Path to a JSON document with workflow_id, description and steps
        file: PathBuf,
    },

    /// Start a run of a workflow
    Trigger {
        workflow_id: String,

        /// "latest" or a version number
        #[arg(long, default_value = "latest")]
        version: String,

        /// Run input as a JSON object
        #[arg(long)]
        input: Option<String>,

        /// Run label, repeatable
        #[arg(long = "label", value_parser = parse_label)]
        labels: Vec<(String, String)>,

        /// Priority 1-3
        #[arg(long)]
        priority: Option<u8>,
    },

    /// Cancel tasks matching a filter
    Cancel {
        #[command(flatten)]
        filter: FilterArgs,
    },

    /// Replay failed or cancelled tasks matching a filter
    Replay {
        #[command(flatten)]
        filter: FilterArgs,

        /// Do not re-queue completed downstream tasks
        #[arg(long)]
        task_only: bool,
    },
}

/// Exactly one of --task, --run or --workflow.
#[derive(Args, Debug, Clone, PartialEq)]
pub struct FilterArgs {
    /// Task id, repeatable
    #[arg(long = "task", conflicts_with_all = ["run", "workflow"])]
    pub tasks: Vec<String>,

    /// All tasks of a run
    #[arg(long, conflicts_with = "workflow")]
    pub run: Option<String>,

    /// Tasks of a workflow's runs; requires --status
    #[arg(long, requires = "statuses")]
    pub workflow: Option<String>,

    /// Task status to match, repeatable
    #[arg(long = "status")]
    pub statuses: Vec<String>,

    /// Runs created at or after this RFC 3339 instant
    #[arg(long)]
    pub since: Option<String>,

    /// Runs created before this RFC 3339 instant
    #[arg(long)]
    pub until: Option<String>,

    /// Run label to match, repeatable
    #[arg(long = "label", value_parser = parse_label)]
    pub labels: Vec<(String, String)>,
}

impl FilterArgs {
    fn to_filter(&self) -> Result<TaskFilter> {
        if let Some(run) = &self.run {
            return Ok(TaskFilter::Run(run.parse::<RunId>().map_err(|_| {
                Error::InvalidArgument(format!("invalid run id '{}'", run))
            })?));
        }
        if let Some(workflow) = &self.workflow {
            let statuses = self
                .statuses
                .iter()
                .map(|s| s.parse::<TaskStatus>())
                .collect::<Result<Vec<_>>>()?;
            let mut selector = WorkflowSelector::new(WorkflowId::parse(workflow)?, &statuses)
                .created_between(parse_instant(&self.since)?, parse_instant(&self.until)?);
            for (key, value) in &self.labels {
                selector = selector.with_label(key, value);
            }
            return Ok(TaskFilter::Workflow(selector));
        }
        let ids = self
            .tasks
            .iter()
            .map(|id| {
                id.parse::<TaskId>()
                    .map_err(|_| Error::InvalidArgument(format!("invalid task id '{}'", id)))
            })
            .collect::<Result<Vec<_>>>()?;
        let filter = TaskFilter::Ids(ids);
        filter.validate()?;
        Ok(filter)
    }
}

fn parse_label(value: &str) -> std::result::Result<(String, String), String> {
    value
        .split_once('=')
        .filter(|(key, _)| !key.is_empty())
        .map(|(key, value)| (key.to_string(), value.to_string()))
        .ok_or_else(|| format!("expected key=value, got '{}'", value))
}

fn parse_instant(value: &Option<String>) -> Result<Option<DateTime<Utc>>> {
    value
        .as_deref()
        .map(|s| {
            DateTime::parse_from_rfc3339(s)
                .map(|t| t.with_timezone(&Utc))
                .map_err(|e| Error::InvalidArgument(format!("invalid instant '{}': {}", s, e)))
        })
        .transpose()
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging based on debug flag
    conductor::log::init_with_debug(cli.debug);

    let config = match &cli.config {
        Some(path) => Config::load_from(path)?,
        None => Config::load()?,
    };

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(async move {
        match cli.command {
            Command::Serve { listen } => run_serve(config, listen).await,
            Command::PutWorkflow { file } => run_put_workflow(&config, file).await,
            Command::Trigger {
                workflow_id,
                version,
                input,
                labels,
                priority,
            } => run_trigger(&config, workflow_id, version, input, labels, priority).await,
            Command::Cancel { filter } => run_cancel(&config, filter).await,
            Command::Replay { filter, task_only } => run_replay(&config, filter, task_only).await,
        }
    })
}

async fn run_serve(mut config: Config, listen: Option<String>) -> Result<()> {
    if let Some(listen) = listen {
        config.listen = listen;
    }
    config.validate()?;

    let store = Arc::new(InMemoryStore::new());
    let plane = Arc::new(ControlPlane::new(store, &config));

    let shutdown = CancellationToken::new();
    let signal = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("shutdown requested");
        }
        signal.cancel();
    });

    grpc::serve(plane, &config, shutdown).await
}

async fn connect(config: &Config) -> Result<AdminServiceClient<tonic::transport::Channel>> {
    Ok(AdminServiceClient::connect(config.endpoint()).await?)
}

fn request<T>(config: &Config, message: T) -> tonic::Request<T> {
    let mut request = tonic::Request::new(message);
    request.set_timeout(config.default_deadline());
    request
}

async fn run_put_workflow(config: &Config, file: PathBuf) -> Result<()> {
    let draft: WorkflowDraft = serde_json::from_str(&std::fs::read_to_string(&file)?)?;
    let mut client = connect(config).await?;
    let response = client
        .put_workflow(request(config, proto::PutWorkflowRequest::from(&draft)))
        .await?
        .into_inner();

    if response.unchanged {
        println!(
            "{} unchanged at version {}",
            response.workflow_id, response.version
        );
    } else {
        println!(
            "{} published as version {}",
            response.workflow_id, response.version
        );
    }
    println!("  content hash: {}", response.content_hash);
    Ok(())
}

async fn run_trigger(
    config: &Config,
    workflow_id: String,
    version: String,
    input: Option<String>,
    labels: Vec<(String, String)>,
    priority: Option<u8>,
) -> Result<()> {
    let version = match version.parse::<VersionSelector>()? {
        VersionSelector::Latest => None,
        VersionSelector::Exact(version) => Some(version),
    };
    let message = proto::TriggerWorkflowRunRequest {
        workflow_id,
        version,
        input_json: input.unwrap_or_default(),
        additional_metadata: labels.into_iter().collect::<BTreeMap<_, _>>(),
        priority: priority.map(u32::from).unwrap_or(0),
    };

    let mut client = connect(config).await?;
    let response = client
        .trigger_workflow_run(request(config, message))
        .await?
        .into_inner();
    println!(
        "Run {} started for {} version {}",
        response.run_id, response.workflow_id, response.version
    );
    Ok(())
}

fn print_failures(failures: &[proto::ItemFailure], skipped: u32, incomplete: bool) {
    for failure in failures {
        println!("  {}  failed ({:?}): {}", failure.task_id, failure.code(), failure.message);
    }
    if incomplete {
        println!("  incomplete: {} task(s) not attempted before the deadline", skipped);
    }
}

async fn run_cancel(config: &Config, filter: FilterArgs) -> Result<()> {
    let filter = filter.to_filter()?;
    let mut client = connect(config).await?;
    let response = client
        .cancel_tasks(request(
            config,
            proto::CancelTasksRequest {
                filter: Some((&filter).into()),
            },
        ))
        .await?
        .into_inner();

    println!("Cancel: {} result(s)", response.results.len());
    for result in &response.results {
        match result.outcome() {
            proto::CancelOutcome::AlreadyTerminal => {
                println!("  {}  already {:?}", result.task_id, result.status())
            }
            outcome => println!("  {}  {:?}", result.task_id, outcome),
        }
    }
    print_failures(&response.failures, response.skipped, response.incomplete);
    Ok(())
}

async fn run_replay(config: &Config, filter: FilterArgs, task_only: bool) -> Result<()> {
    let filter = filter.to_filter()?;
    let mut client = connect(config).await?;
    let response = client
        .replay_tasks(request(
            config,
            proto::ReplayTasksRequest {
                filter: Some((&filter).into()),
                task_only,
            },
        ))
        .await?
        .into_inner();

    println!("Replay: {} result(s)", response.results.len());
    for result in &response.results {
        match result.outcome() {
            proto::ReplayOutcome::Replayed => {
                println!("  {}  replayed as attempt {}", result.task_id, result.attempt);
                for superseded in &result.superseded {
                    println!("      superseded {}", superseded);
                }
            }
            proto::ReplayOutcome::InvalidState => {
                println!("  {}  not replayable ({:?})", result.task_id, result.status())
            }
            outcome => println!("  {}  {:?}", result.task_id, outcome),
        }
    }
    print_failures(&response.failures, response.skipped, response.incomplete);
    Ok(())
}
