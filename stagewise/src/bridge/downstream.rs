//! Downstream pipeline creation for bridges.

use crate::core::{MatrixBindings, PipelineId, Processable, ProcessableId};
use crate::errors::CollaboratorError;
use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// A pipeline created on behalf of a bridge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownstreamPipeline {
    /// Id of the new pipeline.
    pub id: PipelineId,
    /// The bridge that triggered it.
    pub bridge: ProcessableId,
    /// Name of the bridge.
    pub bridge_name: String,
    /// Matrix variables passed down.
    pub variables: MatrixBindings,
}

/// Creates downstream pipelines.
///
/// A bridge is complete once creation returns; the downstream pipeline's own
/// progress never feeds back into the upstream one.
///
/// `bridge.id` is an idempotency key. The engine calls `create` again for the
/// same bridge when completing it failed to commit, and implementations must
/// then return the pipeline they already created.
#[async_trait]
pub trait DownstreamPipelineCreator: Send + Sync {
    /// Creates the downstream pipeline for `bridge`, or returns the one
    /// already created for it.
    async fn create(&self, bridge: &Processable) -> Result<DownstreamPipeline, CollaboratorError>;
}

/// Records created pipelines; can be told to fail for given bridge names.
#[derive(Debug, Default)]
pub struct InMemoryDownstreamCreator {
    created: RwLock<Vec<DownstreamPipeline>>,
    failing: RwLock<HashSet<String>>,
}

impl InMemoryDownstreamCreator {
    /// Creates a creator that always succeeds.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes creation fail for bridges named `name`.
    #[must_use]
    pub fn fail_for(self, name: impl Into<String>) -> Self {
        self.failing.write().insert(name.into());
        self
    }

    /// Pipelines created so far.
    #[must_use]
    pub fn created(&self) -> Vec<DownstreamPipeline> {
        self.created.read().clone()
    }
}

#[async_trait]
impl DownstreamPipelineCreator for InMemoryDownstreamCreator {
    async fn create(&self, bridge: &Processable) -> Result<DownstreamPipeline, CollaboratorError> {
        if self.failing.read().contains(&bridge.name) {
            return Err(CollaboratorError::new(
                "downstream",
                format!("downstream pipeline for '{}' could not be created", bridge.name),
            ));
        }
        let mut created = self.created.write();
        if let Some(existing) = created.iter().find(|p| p.bridge == bridge.id) {
            return Ok(existing.clone());
        }
        let pipeline = DownstreamPipeline {
            id: PipelineId::new(),
            bridge: bridge.id,
            bridge_name: bridge.name.clone(),
            variables: bridge.matrix().to_vec(),
        };
        created.push(pipeline.clone());
        Ok(pipeline)
    }
}
