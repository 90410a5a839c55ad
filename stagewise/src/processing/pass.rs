//! One processing pass: a pure fixpoint computation over a snapshot.

use crate::core::{Status, StatusChange};
use crate::delay::due_time;
use crate::eligibility::{evaluate_in, Action};
use crate::errors::{EngineError, GraphIntegrityError};
use crate::pipeline::{integrity, Pipeline};
use crate::retry::auto_retry_changes;
use crate::utils::Timestamp;

/// Inputs of a pass besides the snapshot.
#[derive(Debug, Clone, Copy)]
pub struct PassOptions {
    /// Time used for due-time computation of delayed processables.
    pub now: Timestamp,
    /// Iteration ceiling; derived from the snapshot when unset.
    pub max_iterations: Option<usize>,
    /// Restricts retries and evaluation to one stage.
    pub stage: Option<u32>,
}

impl PassOptions {
    /// Creates options for a full pass at `now`.
    #[must_use]
    pub fn new(now: Timestamp) -> Self {
        Self {
            now,
            max_iterations: None,
            stage: None,
        }
    }

    /// Sets the iteration ceiling.
    #[must_use]
    pub fn with_max_iterations(mut self, max_iterations: Option<usize>) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    /// Restricts the pass to one stage.
    #[must_use]
    pub fn for_stage(mut self, stage: u32) -> Self {
        self.stage = Some(stage);
        self
    }
}

/// Result of a pass.
#[derive(Debug, Clone)]
pub struct PassOutcome {
    /// Changes to commit, in application order.
    pub changes: Vec<StatusChange>,
    /// The snapshot with every change applied.
    pub pipeline: Pipeline,
    /// Iterations that produced changes.
    pub iterations: usize,
}

impl PassOutcome {
    /// Returns true if the pass found nothing to do.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    /// Number of changes touching processable records.
    #[must_use]
    pub fn transitions(&self) -> usize {
        self.changes
            .iter()
            .filter(|c| c.is_processable_change())
            .count()
    }
}

/// Default iteration ceiling: every record and every pending automatic retry
/// can force at most one extra iteration.
#[must_use]
pub fn default_ceiling(pipeline: &Pipeline) -> usize {
    let retries: usize = pipeline
        .latest()
        .map(|p| p.retries_remaining as usize)
        .sum();
    pipeline.len() + retries + 2
}

fn evaluation_round(
    working: &mut Pipeline,
    options: &PassOptions,
) -> Result<Vec<StatusChange>, EngineError> {
    let mut round = auto_retry_changes(working, options.stage);
    working.apply_all(&round)?;

    let candidates: Vec<_> = working
        .latest_in_stage_order()
        .into_iter()
        .filter(|p| p.status == Status::Created)
        .filter(|p| options.stage.map_or(true, |stage| p.stage_index == stage))
        .map(|p| p.id)
        .collect();

    for id in candidates {
        let Some(processable) = working.get(id) else {
            continue;
        };
        let change = match evaluate_in(working, processable) {
            Action::Hold => continue,
            Action::Skip => StatusChange::transition(id, Status::Created, Status::Skipped),
            Action::Unblock(Status::Scheduled) => StatusChange::schedule(
                id,
                Status::Created,
                due_time(processable, options.now).unwrap_or(options.now),
            ),
            Action::Unblock(next) => StatusChange::transition(id, Status::Created, next),
        };
        working.apply(&change)?;
        round.push(change);
    }

    Ok(round)
}

/// Runs one pass over `pipeline` and returns the changes it implies.
///
/// The pass first checks graph integrity, then alternates automatic retries
/// and evaluation of `created` processables until nothing changes, and
/// finally refreshes the stored stage and pipeline composites.
///
/// # Errors
///
/// Returns `GraphIntegrity` for dangling needs, cycles, or when the
/// iteration ceiling is exceeded. Nothing is returned for commit in that case.
pub fn run_pass(pipeline: &Pipeline, options: &PassOptions) -> Result<PassOutcome, EngineError> {
    integrity::verify(pipeline)?;

    let ceiling = options
        .max_iterations
        .unwrap_or_else(|| default_ceiling(pipeline));
    let mut working = pipeline.clone();
    let mut changes = Vec::new();
    let mut iterations = 0;

    loop {
        let round = evaluation_round(&mut working, options)?;
        if round.is_empty() {
            break;
        }
        iterations += 1;
        if iterations > ceiling {
            return Err(GraphIntegrityError::iteration_ceiling(ceiling).into());
        }
        changes.extend(round);
    }

    if let Some(composite) = working.composite_change() {
        working.apply(&composite)?;
        changes.push(composite);
    }

    Ok(PassOutcome {
        changes,
        pipeline: working,
        iterations,
    })
}
