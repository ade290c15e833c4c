//! Workflow definitions and version selection.

use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;

/// Identifiers for workflows and steps: leading alphanumeric, then up to
/// 127 of alphanumerics, `_`, `-`, `.`, `:`.
static IDENTIFIER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9][A-Za-z0-9_.:-]{0,127}$").unwrap());

pub fn is_identifier(value: &str) -> bool {
    IDENTIFIER_RE.is_match(value)
}

/// Name of a workflow, shared by all of its versions.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct WorkflowId(String);

impl WorkflowId {
    pub fn parse(value: &str) -> Result<Self> {
        if !is_identifier(value) {
            return Err(Error::Validation(format!(
                "invalid workflow id '{}'",
                value
            )));
        }
        Ok(Self(value.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for WorkflowId {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        Self::parse(&value)
    }
}

impl From<WorkflowId> for String {
    fn from(id: WorkflowId) -> Self {
        id.0
    }
}

impl std::fmt::Display for WorkflowId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::str::FromStr for WorkflowId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

/// One named step of a workflow.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepDefinition {
    pub name: String,
    /// Action identifier the worker runtime dispatches on.
    pub action: String,
    /// Names of steps that must complete before this one.
    #[serde(default)]
    pub depends_on: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,
}

impl StepDefinition {
    pub fn new(name: &str, action: &str) -> Self {
        Self {
            name: name.to_string(),
            action: action.to_string(),
            depends_on: Vec::new(),
            timeout_secs: None,
        }
    }

    pub fn after(mut self, dependencies: &[&str]) -> Self {
        self.depends_on
            .extend(dependencies.iter().map(|d| d.to_string()));
        self
    }

    pub fn with_timeout(mut self, secs: u64) -> Self {
        self.timeout_secs = Some(secs);
        self
    }
}

/// Content submitted to PutWorkflow, before a version is allocated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowDraft {
    pub workflow_id: WorkflowId,
    #[serde(default)]
    pub description: String,
    pub steps: Vec<StepDefinition>,
}

impl WorkflowDraft {
    pub fn new(workflow_id: WorkflowId, steps: Vec<StepDefinition>) -> Self {
        Self {
            workflow_id,
            description: String::new(),
            steps,
        }
    }

    pub fn with_description(mut self, description: &str) -> Self {
        self.description = description.to_string();
        self
    }
}

/// An immutable, versioned workflow.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowDefinition {
    pub workflow_id: WorkflowId,
    pub version: u32,
    pub description: String,
    pub steps: Vec<StepDefinition>,
    pub content_hash: String,
    pub created_at: DateTime<Utc>,
}

impl WorkflowDefinition {
    pub fn from_draft(draft: WorkflowDraft, version: u32, content_hash: String) -> Self {
        Self {
            workflow_id: draft.workflow_id,
            version,
            description: draft.description,
            steps: draft.steps,
            content_hash,
            created_at: Utc::now(),
        }
    }

    pub fn step(&self, name: &str) -> Option<&StepDefinition> {
        self.steps.iter().find(|s| s.name == name)
    }
}

/// Hash of a workflow's identity and step graph.
///
/// Step order and dependency order do not matter, the description is not
/// included. Fields are length-prefixed so adjacent values cannot collide.
pub fn content_hash(workflow_id: &WorkflowId, steps: &[StepDefinition]) -> String {
    let mut sorted: Vec<&StepDefinition> = steps.iter().collect();
    sorted.sort_by(|a, b| a.name.cmp(&b.name));

    let mut hasher = blake3::Hasher::new();
    write_field(&mut hasher, workflow_id.as_str());
    hasher.update(&(sorted.len() as u64).to_le_bytes());
    for step in sorted {
        write_field(&mut hasher, &step.name);
        write_field(&mut hasher, &step.action);

        let mut deps: Vec<&str> = step.depends_on.iter().map(String::as_str).collect();
        deps.sort_unstable();
        deps.dedup();
        hasher.update(&(deps.len() as u64).to_le_bytes());
        for dep in deps {
            write_field(&mut hasher, dep);
        }

        match step.timeout_secs {
            Some(secs) => {
                hasher.update(&[1]);
                hasher.update(&secs.to_le_bytes());
            }
            None => {
                hasher.update(&[0]);
            }
        }
    }
    hasher.finalize().to_hex().to_string()
}

fn write_field(hasher: &mut blake3::Hasher, value: &str) {
    hasher.update(&(value.len() as u64).to_le_bytes());
    hasher.update(value.as_bytes());
}

/// Which version of a workflow a run should use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VersionSelector {
    /// The workflow's active version at trigger time.
    #[default]
    Latest,
    Exact(u32),
}

impl std::fmt::Display for VersionSelector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            VersionSelector::Latest => write!(f, "latest"),
            VersionSelector::Exact(version) => write!(f, "{}", version),
        }
    }
}

impl std::str::FromStr for VersionSelector {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        if s.eq_ignore_ascii_case("latest") {
            return Ok(VersionSelector::Latest);
        }
        match s.parse::<u32>() {
            Ok(version) if version > 0 => Ok(VersionSelector::Exact(version)),
            _ => Err(Error::InvalidArgument(format!(
                "version must be 'latest' or a positive integer, got '{}'",
                s
            ))),
        }
    }
}
