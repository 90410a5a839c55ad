//! In-memory pipeline graph.

use crate::composite::Composite;
use crate::core::{PipelineId, Processable, ProcessableId, Status, StatusChange};
use crate::errors::{EngineError, InvalidTransitionError};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Derived view of one stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageView {
    /// Stage name.
    pub name: String,
    /// Stage ordering.
    pub index: u32,
    /// Composite status of the stage's latest processables.
    pub status: Status,
}

/// A pipeline: ordered stages over an arena of processables.
///
/// Records are never removed. Retries and resets append new attempts and
/// mark the previous ones as superseded.
#[derive(Debug, Clone)]
pub struct Pipeline {
    id: PipelineId,
    name: String,
    stages: Vec<String>,
    processables: Vec<Processable>,
    index: HashMap<ProcessableId, usize>,
    lineages: HashMap<ProcessableId, usize>,
    status: Status,
    stage_statuses: Vec<Status>,
    generation: u64,
}

impl Pipeline {
    /// Creates an empty pipeline with the given ordered stage names.
    #[must_use]
    pub fn new(name: impl Into<String>, stages: Vec<String>) -> Self {
        let stage_statuses = vec![Status::Created; stages.len()];
        Self {
            id: PipelineId::new(),
            name: name.into(),
            stages,
            processables: Vec::new(),
            index: HashMap::new(),
            lineages: HashMap::new(),
            status: Status::Created,
            stage_statuses,
            generation: 0,
        }
    }

    /// Returns the pipeline id.
    #[must_use]
    pub const fn id(&self) -> PipelineId {
        self.id
    }

    /// Returns the pipeline name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the stored pipeline status.
    #[must_use]
    pub const fn status(&self) -> Status {
        self.status
    }

    /// Returns the generation the snapshot was read at.
    #[must_use]
    pub const fn generation(&self) -> u64 {
        self.generation
    }

    /// Sets the generation. Used by stores after a commit.
    pub fn set_generation(&mut self, generation: u64) {
        self.generation = generation;
    }

    /// Returns the ordered stage names.
    #[must_use]
    pub fn stage_names(&self) -> &[String] {
        &self.stages
    }

    /// Returns the number of stages.
    #[must_use]
    pub fn stage_count(&self) -> usize {
        self.stages.len()
    }

    /// Returns the index of a stage by name.
    #[must_use]
    pub fn stage_index_of(&self, name: &str) -> Option<u32> {
        self.stages
            .iter()
            .position(|stage| stage == name)
            .and_then(|i| u32::try_from(i).ok())
    }

    /// Returns the stored stage statuses.
    #[must_use]
    pub fn stage_statuses(&self) -> &[Status] {
        &self.stage_statuses
    }

    /// Returns views of every stage with its stored status.
    #[must_use]
    pub fn stages(&self) -> Vec<StageView> {
        self.stages
            .iter()
            .zip(0u32..)
            .map(|(name, index)| StageView {
                name: name.clone(),
                index,
                status: self
                    .stage_statuses
                    .get(index as usize)
                    .copied()
                    .unwrap_or_default(),
            })
            .collect()
    }

    /// Number of records, superseded attempts included.
    #[must_use]
    pub fn len(&self) -> usize {
        self.processables.len()
    }

    /// Returns true if the pipeline has no processables.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.processables.is_empty()
    }

    /// Every record in insertion order.
    pub fn processables(&self) -> impl Iterator<Item = &Processable> {
        self.processables.iter()
    }

    /// The latest attempt of every lineage, in insertion order.
    pub fn latest(&self) -> impl Iterator<Item = &Processable> {
        self.processables.iter().filter(|p| p.is_latest())
    }

    /// The latest attempts sorted by stage, insertion order within a stage.
    #[must_use]
    pub fn latest_in_stage_order(&self) -> Vec<&Processable> {
        let mut latest: Vec<&Processable> = self.latest().collect();
        latest.sort_by_key(|p| p.stage_index);
        latest
    }

    /// Looks up a record by id.
    #[must_use]
    pub fn get(&self, id: ProcessableId) -> Option<&Processable> {
        self.index.get(&id).map(|&i| &self.processables[i])
    }

    /// Returns the latest attempt of a lineage.
    #[must_use]
    pub fn latest_of(&self, lineage: ProcessableId) -> Option<&Processable> {
        self.lineages
            .get(&lineage)
            .map(|&i| &self.processables[i])
            .filter(|p| p.is_latest())
    }

    /// Returns the latest attempt with the given name.
    #[must_use]
    pub fn latest_by_name(&self, name: &str) -> Option<&Processable> {
        self.latest().find(|p| p.name == name)
    }

    /// Appends a record. Intended for builders and fixtures.
    pub fn push(&mut self, processable: Processable) {
        let position = self.processables.len();
        self.index.insert(processable.id, position);
        if processable.is_latest() {
            self.lineages.insert(processable.lineage, position);
        }
        self.processables.push(processable);
    }

    fn get_mut(&mut self, id: ProcessableId) -> Result<&mut Processable, EngineError> {
        let position = *self
            .index
            .get(&id)
            .ok_or(EngineError::ProcessableNotFound(id))?;
        Ok(&mut self.processables[position])
    }

    /// Applies one change.
    ///
    /// # Errors
    ///
    /// Returns `InvalidTransition` when the change does not match the current
    /// record (stale `from`, backwards move, superseded record, duplicate id)
    /// and `ProcessableNotFound` for unknown ids.
    pub fn apply(&mut self, change: &StatusChange) -> Result<(), EngineError> {
        match change {
            StatusChange::Transition {
                id,
                from,
                to,
                scheduled_at,
            } => {
                let processable = self.get_mut(*id)?;
                if processable.retried
                    || processable.status != *from
                    || !from.can_transition_to(*to)
                {
                    return Err(InvalidTransitionError::new(
                        *id,
                        &processable.name,
                        processable.status,
                        format!("transition to {to}"),
                    )
                    .into());
                }
                processable.status = *to;
                processable.scheduled_at = if *to == Status::Scheduled {
                    *scheduled_at
                } else {
                    None
                };
            }
            StatusChange::Create { processable } => {
                if self.index.contains_key(&processable.id) {
                    return Err(InvalidTransitionError::new(
                        processable.id,
                        &processable.name,
                        processable.status,
                        "create an existing record",
                    )
                    .into());
                }
                self.push(processable.as_ref().clone());
            }
            StatusChange::Supersede { id } => {
                let processable = self.get_mut(*id)?;
                if processable.retried || !processable.status.is_complete() {
                    return Err(InvalidTransitionError::new(
                        *id,
                        &processable.name,
                        processable.status,
                        "supersede",
                    )
                    .into());
                }
                processable.retried = true;
            }
            StatusChange::Composite { status, stages } => {
                self.status = *status;
                self.stage_statuses.clone_from(stages);
            }
        }
        Ok(())
    }

    /// Applies a batch of changes in order.
    ///
    /// # Errors
    ///
    /// Stops at the first change that fails to apply.
    pub fn apply_all(&mut self, changes: &[StatusChange]) -> Result<(), EngineError> {
        changes.iter().try_for_each(|change| self.apply(change))
    }

    /// Composite status of every stage, from the current records.
    #[must_use]
    pub fn compute_stage_statuses(&self) -> Vec<Status> {
        let mut composites = vec![Composite::new(); self.stages.len()];
        for processable in self.latest() {
            if let Some(composite) = composites.get_mut(processable.stage_index as usize) {
                composite.consume(processable.status, processable.allow_failure);
            }
        }
        composites.iter().map(Composite::status).collect()
    }

    /// Composite status of the whole pipeline, from the current records.
    #[must_use]
    pub fn compute_status(&self) -> Status {
        Composite::from_pairs(self.latest().map(|p| (p.status, p.allow_failure))).status()
    }

    /// Returns the change refreshing stored composites, if they are stale.
    #[must_use]
    pub fn composite_change(&self) -> Option<StatusChange> {
        let status = self.compute_status();
        let stages = self.compute_stage_statuses();
        (status != self.status || stages != self.stage_statuses)
            .then_some(StatusChange::Composite { status, stages })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::When;

    fn two_stage() -> (Pipeline, ProcessableId, ProcessableId) {
        let mut pipeline = Pipeline::new("p", vec!["build".to_string(), "test".to_string()]);
        let build = Processable::job("build", "build", 0);
        let test = Processable::job("test", "test", 1);
        let ids = (build.id, test.id);
        pipeline.push(build);
        pipeline.push(test);
        (pipeline, ids.0, ids.1)
    }

    #[test]
    fn test_stage_lookup() {
        let (pipeline, _, _) = two_stage();
        assert_eq!(pipeline.stage_index_of("test"), Some(1));
        assert_eq!(pipeline.stage_index_of("deploy"), None);
        assert_eq!(pipeline.stage_count(), 2);
    }

    #[test]
    fn test_apply_transition() {
        let (mut pipeline, build, _) = two_stage();
        pipeline
            .apply(&StatusChange::transition(build, Status::Created, Status::Pending))
            .unwrap();
        assert_eq!(pipeline.get(build).unwrap().status, Status::Pending);
    }

    #[test]
    fn test_apply_rejects_stale_from() {
        let (mut pipeline, build, _) = two_stage();
        let err = pipeline
            .apply(&StatusChange::transition(build, Status::Pending, Status::Running))
            .unwrap_err();
        assert!(matches!(err, EngineError::InvalidTransition(_)));
    }

    #[test]
    fn test_apply_rejects_backwards_move() {
        let (mut pipeline, build, _) = two_stage();
        pipeline
            .apply(&StatusChange::transition(build, Status::Created, Status::Skipped))
            .unwrap();
        assert!(pipeline
            .apply(&StatusChange::transition(build, Status::Skipped, Status::Pending))
            .is_err());
    }

    #[test]
    fn test_supersede_and_latest_of() {
        let (mut pipeline, build, _) = two_stage();
        pipeline
            .apply_all(&[
                StatusChange::transition(build, Status::Created, Status::Pending),
                StatusChange::transition(build, Status::Pending, Status::Failed),
            ])
            .unwrap();
        let next = pipeline.get(build).unwrap().next_attempt(0);
        let next_id = next.id;
        pipeline
            .apply_all(&[StatusChange::Supersede { id: build }, StatusChange::create(next)])
            .unwrap();

        assert_eq!(pipeline.len(), 3);
        assert_eq!(pipeline.latest().count(), 2);
        assert_eq!(pipeline.latest_of(build).unwrap().id, next_id);
    }

    #[test]
    fn test_supersede_requires_complete() {
        let (mut pipeline, build, _) = two_stage();
        assert!(pipeline.apply(&StatusChange::Supersede { id: build }).is_err());
    }

    #[test]
    fn test_composites() {
        let mut pipeline = Pipeline::new("p", vec!["build".to_string(), "deploy".to_string()]);
        pipeline.push(Processable::job("a", "build", 0).with_status(Status::Success));
        pipeline.push(
            Processable::job("b", "build", 0)
                .with_status(Status::Failed)
                .with_allow_failure(true),
        );
        pipeline.push(
            Processable::job("c", "deploy", 1)
                .with_when(When::Manual)
                .with_status(Status::Manual),
        );

        assert_eq!(
            pipeline.compute_stage_statuses(),
            vec![Status::Success, Status::Manual]
        );
        assert_eq!(pipeline.compute_status(), Status::Manual);

        let change = pipeline.composite_change().unwrap();
        pipeline.apply(&change).unwrap();
        assert!(pipeline.composite_change().is_none());
        assert_eq!(pipeline.stages()[1].status, Status::Manual);
    }
}
