//! Workflow version registry.
//!
//! Publishing is idempotent on content: a draft whose hash matches an
//! existing version returns that version. New content gets the next
//! version number through a CAS on the per-workflow counter, retried a
//! bounded number of times when another publisher wins the race.

use crate::core::{
    content_hash, validate_steps, VersionSelector, WorkflowDefinition, WorkflowDraft, WorkflowId,
};
use crate::error::{Error, Result};
use crate::orchestration::context::CallContext;
use crate::store::{CasOutcome, Store};
use std::sync::Arc;

/// Result of a publish.
#[derive(Debug, Clone, PartialEq)]
pub struct PublishOutcome {
    pub definition: WorkflowDefinition,
    /// False when an identical version already existed.
    pub created: bool,
}

#[derive(Debug, Clone)]
pub struct VersionRegistry {
    store: Arc<dyn Store>,
    cas_retries: u32,
}

impl VersionRegistry {
    pub fn new(store: Arc<dyn Store>, cas_retries: u32) -> Self {
        Self { store, cas_retries }
    }

    /// Validate and publish a workflow draft.
    ///
    /// # Errors
    /// `Validation` for a malformed step graph, `Conflict` once every CAS
    /// attempt lost to a concurrent publish.
    pub async fn put_workflow(&self, ctx: &CallContext, draft: WorkflowDraft) -> Result<PublishOutcome> {
        validate_steps(&draft.steps)?;
        let workflow_id = draft.workflow_id.clone();
        let hash = content_hash(&workflow_id, &draft.steps);
        let attempts = self.cas_retries + 1;

        for attempt in 1..=attempts {
            ctx.check()?;

            // Checked on every attempt so an identical concurrent publish
            // resolves as a no-op instead of a second version.
            if let Some(existing) = self.store.find_by_hash(&workflow_id, &hash).await? {
                tracing::debug!(
                    workflow_id = %workflow_id,
                    version = existing.version,
                    "workflow content unchanged"
                );
                return Ok(PublishOutcome {
                    definition: existing,
                    created: false,
                });
            }

            let latest = self.store.latest_version(&workflow_id).await?;
            let definition = WorkflowDefinition::from_draft(draft.clone(), latest + 1, hash.clone());
            match self.store.publish_version(latest, definition.clone()).await? {
                CasOutcome::Applied(version) => {
                    tracing::info!(workflow_id = %workflow_id, version, "workflow version published");
                    return Ok(PublishOutcome {
                        definition,
                        created: true,
                    });
                }
                CasOutcome::Conflict(actual) => {
                    tracing::debug!(
                        workflow_id = %workflow_id,
                        expected = latest,
                        actual,
                        attempt,
                        "version CAS lost"
                    );
                }
            }
        }

        tracing::warn!(workflow_id = %workflow_id, attempts, "version CAS retries exhausted");
        Err(Error::Conflict {
            workflow_id: workflow_id.to_string(),
            attempts,
        })
    }

    /// Look up the definition a selector refers to.
    pub async fn resolve(
        &self,
        workflow_id: &WorkflowId,
        selector: VersionSelector,
    ) -> Result<WorkflowDefinition> {
        let version = match selector {
            VersionSelector::Latest => self
                .store
                .active_version(workflow_id)
                .await?
                .ok_or_else(|| Error::not_found("workflow", workflow_id))?,
            VersionSelector::Exact(version) => version,
        };
        self.store
            .get_version(workflow_id, version)
            .await?
            .ok_or_else(|| Error::not_found("workflow version", format!("{}@{}", workflow_id, version)))
    }
}
