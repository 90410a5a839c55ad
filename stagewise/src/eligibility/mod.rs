//! Eligibility: decides whether a `created` processable unblocks, skips or
//! keeps waiting, based on the statuses of its predecessors.

use crate::composite::Composite;
use crate::core::{Processable, SchedulingType, Status, When};
use crate::pipeline::Pipeline;

/// Outcome of evaluating one processable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// Move to the given status.
    Unblock(Status),
    /// Predecessors are complete but do not satisfy `when`.
    Skip,
    /// Predecessors are still in progress.
    Hold,
}

/// Status a processable takes when unblocked.
#[must_use]
pub const fn next_status(processable: &Processable) -> Status {
    match processable.when {
        When::Manual => Status::Manual,
        When::Delayed => Status::Scheduled,
        When::OnSuccess | When::OnFailure | When::Always => Status::Pending,
    }
}

/// Composite of the predecessors, in the flavour matching the scheduling type.
#[must_use]
pub fn predecessor_composite(processable: &Processable, predecessors: &[(Status, bool)]) -> Status {
    let composite = Composite::from_pairs(predecessors.iter().copied());
    match processable.scheduling_type {
        SchedulingType::Stage => composite.status(),
        // Empty needs: eligible at pipeline start.
        SchedulingType::Dag if predecessors.is_empty() => Status::Success,
        SchedulingType::Dag => composite.needs_status(),
    }
}

fn accepts(processable: &Processable, composite: Status) -> bool {
    match processable.when {
        When::OnSuccess | When::Manual | When::Delayed => {
            composite == Status::Success
                || (composite == Status::Skipped
                    && processable.scheduling_type == SchedulingType::Stage)
        }
        When::OnFailure => composite == Status::Failed,
        When::Always => composite.is_complete(),
    }
}

/// Evaluates a processable against its predecessors' `(status, allow_failure)`.
#[must_use]
pub fn evaluate(processable: &Processable, predecessors: &[(Status, bool)]) -> Action {
    let composite = predecessor_composite(processable, predecessors);
    if accepts(processable, composite) {
        Action::Unblock(next_status(processable))
    } else if composite.is_complete() {
        Action::Skip
    } else {
        Action::Hold
    }
}

/// Collects the `(status, allow_failure)` pairs of a processable's predecessors.
///
/// Stage-type processables depend on every latest processable of every
/// earlier stage; DAG processables on the latest attempt of each need.
#[must_use]
pub fn predecessor_statuses(pipeline: &Pipeline, processable: &Processable) -> Vec<(Status, bool)> {
    match processable.scheduling_type {
        SchedulingType::Stage => pipeline
            .latest()
            .filter(|p| p.stage_index < processable.stage_index)
            .map(|p| (p.status, p.allow_failure))
            .collect(),
        SchedulingType::Dag => processable
            .needs
            .iter()
            .filter_map(|need| pipeline.latest_of(*need))
            .map(|p| (p.status, p.allow_failure))
            .collect(),
    }
}

/// Evaluates a processable in the context of its pipeline.
#[must_use]
pub fn evaluate_in(pipeline: &Pipeline, processable: &Processable) -> Action {
    evaluate(processable, &predecessor_statuses(pipeline, processable))
}
