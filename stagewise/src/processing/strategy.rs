//! Processing strategies and the generation-checked commit loop they share.

use super::lease::LeaseRegistry;
use super::pass::{default_ceiling, run_pass, PassOptions};
use crate::config::{EngineConfig, StrategyKind};
use crate::core::{PipelineId, StatusChange};
use crate::errors::{EngineError, GraphIntegrityError};
use crate::pipeline::Pipeline;
use crate::ports::{CommitOutcome, PipelineStore};
use crate::utils::Timestamp;
use async_trait::async_trait;
use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Changes committed by one strategy run, with the resulting pipeline.
#[derive(Debug, Clone)]
pub struct PassReport {
    /// Every committed change, in commit order.
    pub changes: Vec<StatusChange>,
    /// The pipeline as of the last commit (or the last read if nothing changed).
    pub pipeline: Pipeline,
    /// Number of commits made.
    pub commits: usize,
}

impl PassReport {
    /// Returns true if anything was committed.
    #[must_use]
    pub fn changed(&self) -> bool {
        !self.changes.is_empty()
    }
}

/// Outcome of [`commit_fresh`].
#[derive(Debug, Clone)]
pub struct Committed {
    /// The committed changes; empty if there was nothing to do.
    pub changes: Vec<StatusChange>,
    /// The snapshot with the changes applied and the new generation set.
    pub pipeline: Pipeline,
}

fn backoff(base_ms: u64, attempt: usize) -> Duration {
    let ceiling = base_ms.saturating_mul(1 << attempt.min(6));
    Duration::from_millis(rand::thread_rng().gen_range(base_ms..=ceiling.max(base_ms)))
}

/// Loads a fresh snapshot, computes changes from it and commits them with
/// the snapshot's generation. Conflicts discard the work and start over.
///
/// # Errors
///
/// Propagates errors of `compute` and of the store, and returns
/// `Transient` once `config.max_commit_attempts` commits lost.
pub async fn commit_fresh<F>(
    store: &dyn PipelineStore,
    pipeline_id: PipelineId,
    config: &EngineConfig,
    mut compute: F,
) -> Result<Committed, EngineError>
where
    F: FnMut(&Pipeline) -> Result<Vec<StatusChange>, EngineError> + Send,
{
    let attempts = config.max_commit_attempts.max(1);
    for attempt in 1..=attempts {
        let mut pipeline = store.load_pipeline(pipeline_id).await?;
        let changes = compute(&pipeline)?;
        if changes.is_empty() {
            return Ok(Committed { changes, pipeline });
        }

        match store
            .commit_deltas(pipeline_id, &changes, pipeline.generation())
            .await?
        {
            CommitOutcome::Committed { generation } => {
                pipeline.apply_all(&changes)?;
                pipeline.set_generation(generation);
                return Ok(Committed { changes, pipeline });
            }
            CommitOutcome::Conflict { current } => {
                warn!(
                    pipeline_id = %pipeline_id,
                    attempt,
                    expected = pipeline.generation(),
                    current,
                    "Commit lost against a concurrent writer"
                );
                if attempt < attempts && config.conflict_backoff_ms > 0 {
                    tokio::time::sleep(backoff(config.conflict_backoff_ms, attempt)).await;
                }
            }
        }
    }

    Err(EngineError::Transient {
        pipeline_id,
        attempts,
    })
}

/// A way of running a processing pass against a store.
#[async_trait]
pub trait ProcessingStrategy: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &'static str;

    /// Runs the pass and commits its changes.
    async fn run(
        &self,
        store: &dyn PipelineStore,
        pipeline_id: PipelineId,
        now: Timestamp,
    ) -> Result<PassReport, EngineError>;
}

/// One snapshot, one pass, one commit.
#[derive(Debug)]
pub struct AtomicStrategy {
    config: EngineConfig,
    leases: Option<Arc<LeaseRegistry>>,
}

impl AtomicStrategy {
    /// Creates the strategy; takes a lease per pipeline when configured.
    #[must_use]
    pub fn new(config: EngineConfig) -> Self {
        let leases = config
            .exclusive_lease
            .then(|| Arc::new(LeaseRegistry::new()));
        Self { config, leases }
    }

    /// Shares an existing lease registry.
    #[must_use]
    pub fn with_leases(mut self, leases: Arc<LeaseRegistry>) -> Self {
        self.leases = Some(leases);
        self
    }
}

#[async_trait]
impl ProcessingStrategy for AtomicStrategy {
    fn name(&self) -> &'static str {
        "atomic"
    }

    async fn run(
        &self,
        store: &dyn PipelineStore,
        pipeline_id: PipelineId,
        now: Timestamp,
    ) -> Result<PassReport, EngineError> {
        let _lease = match &self.leases {
            Some(leases) => Some(leases.acquire(pipeline_id).await),
            None => None,
        };

        let options = PassOptions::new(now).with_max_iterations(self.config.max_iterations);
        let committed = commit_fresh(store, pipeline_id, &self.config, |pipeline| {
            run_pass(pipeline, &options).map(|outcome| outcome.changes)
        })
        .await?;

        let commits = usize::from(!committed.changes.is_empty());
        Ok(PassReport {
            changes: committed.changes,
            pipeline: committed.pipeline,
            commits,
        })
    }
}

/// Stage-by-stage processing: each stage is read and committed on its own,
/// and sweeps repeat until one changes nothing.
#[derive(Debug)]
pub struct LegacyStrategy {
    config: EngineConfig,
}

impl LegacyStrategy {
    /// Creates the strategy.
    #[must_use]
    pub fn new(config: EngineConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl ProcessingStrategy for LegacyStrategy {
    fn name(&self) -> &'static str {
        "legacy"
    }

    async fn run(
        &self,
        store: &dyn PipelineStore,
        pipeline_id: PipelineId,
        now: Timestamp,
    ) -> Result<PassReport, EngineError> {
        let mut pipeline = store.load_pipeline(pipeline_id).await?;
        let stage_count = u32::try_from(pipeline.stage_count()).unwrap_or(u32::MAX);
        let ceiling = self
            .config
            .max_iterations
            .unwrap_or_else(|| default_ceiling(&pipeline));
        let options = PassOptions::new(now).with_max_iterations(self.config.max_iterations);

        let mut changes = Vec::new();
        let mut commits = 0;
        let mut sweeps = 0;
        loop {
            let mut sweep_changed = false;
            for stage in 0..stage_count {
                let stage_options = options.for_stage(stage);
                let committed = commit_fresh(store, pipeline_id, &self.config, |snapshot| {
                    run_pass(snapshot, &stage_options).map(|outcome| outcome.changes)
                })
                .await?;
                pipeline = committed.pipeline;
                if !committed.changes.is_empty() {
                    debug!(
                        pipeline_id = %pipeline_id,
                        stage,
                        changes = committed.changes.len(),
                        "Committed stage"
                    );
                    sweep_changed = true;
                    commits += 1;
                    changes.extend(committed.changes);
                }
            }
            if !sweep_changed {
                break;
            }
            sweeps += 1;
            if sweeps > ceiling {
                return Err(GraphIntegrityError::iteration_ceiling(ceiling).into());
            }
        }

        Ok(PassReport {
            changes,
            pipeline,
            commits,
        })
    }
}

/// Builds the strategy selected by `config`.
#[must_use]
pub fn strategy_for(config: &EngineConfig) -> Arc<dyn ProcessingStrategy> {
    match config.strategy {
        StrategyKind::Atomic => Arc::new(AtomicStrategy::new(config.clone())),
        StrategyKind::Legacy => Arc::new(LegacyStrategy::new(config.clone())),
    }
}
