//! Pipeline persistence port and its in-memory implementation.

use crate::core::{PipelineId, StatusChange};
use crate::errors::EngineError;
use crate::pipeline::Pipeline;
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Result of a generation-checked commit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitOutcome {
    /// The batch was applied; the pipeline is now at `generation`.
    Committed {
        /// Generation after the commit.
        generation: u64,
    },
    /// Another writer committed first; nothing was applied.
    Conflict {
        /// Generation currently stored.
        current: u64,
    },
}

impl CommitOutcome {
    /// Returns true if the batch was applied.
    #[must_use]
    pub const fn is_committed(&self) -> bool {
        matches!(self, Self::Committed { .. })
    }
}

/// Storage for pipelines.
///
/// Writes are batches of [`StatusChange`]s guarded by the generation they
/// were computed from.
#[async_trait]
pub trait PipelineStore: Send + Sync {
    /// Loads a snapshot of a pipeline.
    async fn load_pipeline(&self, id: PipelineId) -> Result<Pipeline, EngineError>;

    /// Applies `changes` atomically if the stored generation still equals
    /// `expected_generation`.
    async fn commit_deltas(
        &self,
        id: PipelineId,
        changes: &[StatusChange],
        expected_generation: u64,
    ) -> Result<CommitOutcome, EngineError>;
}

/// Thread-safe in-memory store.
#[derive(Debug, Default)]
pub struct InMemoryPipelineStore {
    pipelines: RwLock<HashMap<PipelineId, Pipeline>>,
    injected_conflicts: AtomicUsize,
    commits: AtomicUsize,
}

impl InMemoryPipelineStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores a pipeline, replacing any previous version, and returns its id.
    pub fn insert(&self, pipeline: Pipeline) -> PipelineId {
        let id = pipeline.id();
        self.pipelines.write().insert(id, pipeline);
        id
    }

    /// Returns a copy of the stored pipeline.
    #[must_use]
    pub fn snapshot(&self, id: PipelineId) -> Option<Pipeline> {
        self.pipelines.read().get(&id).cloned()
    }

    /// Makes the next `count` commits lose against a simulated concurrent
    /// writer. Each lost commit bumps the stored generation.
    pub fn inject_conflicts(&self, count: usize) {
        self.injected_conflicts.store(count, Ordering::SeqCst);
    }

    /// Number of successful non-empty commits.
    #[must_use]
    pub fn commit_count(&self) -> usize {
        self.commits.load(Ordering::SeqCst)
    }

    fn take_injected_conflict(&self) -> bool {
        self.injected_conflicts
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl PipelineStore for InMemoryPipelineStore {
    async fn load_pipeline(&self, id: PipelineId) -> Result<Pipeline, EngineError> {
        self.snapshot(id).ok_or(EngineError::PipelineNotFound(id))
    }

    async fn commit_deltas(
        &self,
        id: PipelineId,
        changes: &[StatusChange],
        expected_generation: u64,
    ) -> Result<CommitOutcome, EngineError> {
        let mut pipelines = self.pipelines.write();
        let stored = pipelines
            .get_mut(&id)
            .ok_or(EngineError::PipelineNotFound(id))?;

        if self.take_injected_conflict() {
            let current = stored.generation() + 1;
            stored.set_generation(current);
            return Ok(CommitOutcome::Conflict { current });
        }
        if stored.generation() != expected_generation {
            return Ok(CommitOutcome::Conflict {
                current: stored.generation(),
            });
        }
        if changes.is_empty() {
            return Ok(CommitOutcome::Committed {
                generation: stored.generation(),
            });
        }

        let mut next = stored.clone();
        next.apply_all(changes)?;
        let generation = expected_generation + 1;
        next.set_generation(generation);
        *stored = next;
        self.commits.fetch_add(1, Ordering::SeqCst);
        Ok(CommitOutcome::Committed { generation })
    }
}
