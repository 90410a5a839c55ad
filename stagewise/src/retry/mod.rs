//! Retry support: automatic retries, manual retries and the reset of
//! skipped dependents.
//!
//! Every helper here is pure: it reads a pipeline and returns the changes to
//! commit. A new attempt keeps the lineage of the one it replaces, so needs
//! resolve to it without rewiring the graph.

use crate::core::{Processable, ProcessableId, SchedulingType, Status, StatusChange};
use crate::errors::{EngineError, InvalidTransitionError};
use crate::pipeline::Pipeline;
use std::collections::{HashSet, VecDeque};

fn replace(processable: &Processable, retries_remaining: u32) -> [StatusChange; 2] {
    [
        StatusChange::Supersede { id: processable.id },
        StatusChange::create(processable.next_attempt(retries_remaining)),
    ]
}

/// Changes retrying every latest failed processable that has retries left.
///
/// With `stage` set, only processables of that stage are considered.
#[must_use]
pub fn auto_retry_changes(pipeline: &Pipeline, stage: Option<u32>) -> Vec<StatusChange> {
    pipeline
        .latest()
        .filter(|p| stage.map_or(true, |index| p.stage_index == index))
        .filter(|p| p.status == Status::Failed && p.retries_remaining > 0)
        .flat_map(|p| replace(p, p.retries_remaining - 1))
        .collect()
}

/// Changes for a manual retry of `id`.
///
/// The new attempt keeps its remaining automatic retries. Skipped
/// dependents are reset as well.
///
/// # Errors
///
/// Returns `ProcessableNotFound` for unknown ids and `InvalidTransition`
/// unless the record is the latest attempt and `failed` or `canceled`.
pub fn retry_changes(pipeline: &Pipeline, id: ProcessableId) -> Result<Vec<StatusChange>, EngineError> {
    let processable = pipeline.get(id).ok_or(EngineError::ProcessableNotFound(id))?;
    if !processable.is_latest() || !matches!(processable.status, Status::Failed | Status::Canceled) {
        return Err(InvalidTransitionError::new(
            id,
            &processable.name,
            processable.status,
            "retry",
        )
        .into());
    }

    let mut changes = replace(processable, processable.retries_remaining).to_vec();
    changes.extend(reset_skipped_dependents(pipeline, processable.lineage));
    Ok(changes)
}

/// Lineages that depend on `lineage`, directly or transitively.
///
/// Stage-type processables depend on everything in earlier stages; DAG
/// processables on their needs.
#[must_use]
pub fn dependents(pipeline: &Pipeline, lineage: ProcessableId) -> Vec<ProcessableId> {
    let mut found = Vec::new();
    let mut seen = HashSet::from([lineage]);
    let mut queue = VecDeque::from([lineage]);

    while let Some(current) = queue.pop_front() {
        let Some(upstream) = pipeline.latest_of(current) else {
            continue;
        };
        for candidate in pipeline.latest() {
            let depends = match candidate.scheduling_type {
                SchedulingType::Dag => candidate.needs.contains(&current),
                SchedulingType::Stage => candidate.stage_index > upstream.stage_index,
            };
            if depends && seen.insert(candidate.lineage) {
                found.push(candidate.lineage);
                queue.push_back(candidate.lineage);
            }
        }
    }

    found
}

/// Changes replacing every skipped dependent of `lineage` with a fresh
/// `created` attempt, so the next pass evaluates it again.
#[must_use]
pub fn reset_skipped_dependents(pipeline: &Pipeline, lineage: ProcessableId) -> Vec<StatusChange> {
    dependents(pipeline, lineage)
        .into_iter()
        .filter_map(|dependent| pipeline.latest_of(dependent))
        .filter(|p| p.status == Status::Skipped)
        .flat_map(|p| replace(p, p.retries_remaining))
        .collect()
}
