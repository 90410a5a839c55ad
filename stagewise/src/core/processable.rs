//! Processables: the schedulable units of a pipeline.

use super::{SchedulingType, Status, When};
use crate::utils::Timestamp;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use uuid::Uuid;

/// Identity of a single processable record, unique within its pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProcessableId(Uuid);

impl ProcessableId {
    /// Generates a fresh random id.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Returns the underlying UUID.
    #[must_use]
    pub const fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for ProcessableId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<Uuid> for ProcessableId {
    fn from(id: Uuid) -> Self {
        Self(id)
    }
}

impl fmt::Display for ProcessableId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Identity of a pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PipelineId(Uuid);

impl PipelineId {
    /// Generates a fresh random id.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Returns the underlying UUID.
    #[must_use]
    pub const fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for PipelineId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for PipelineId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Matrix variable bindings carried by an expanded bridge, in declaration order.
pub type MatrixBindings = Vec<(String, String)>;

/// Whether a processable runs a script or triggers a downstream pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProcessableKind {
    /// Executed by an external worker.
    #[default]
    Job,
    /// Succeeds once its downstream pipeline has been created.
    Bridge {
        /// Matrix bindings when the bridge was expanded from `parallel.matrix`.
        #[serde(default)]
        matrix: MatrixBindings,
    },
}

/// One schedulable unit: a job or a bridge.
///
/// Every attempt of the same logical unit shares a `lineage`; needs are
/// expressed against lineages so dependents always observe the latest attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Processable {
    /// Record identity.
    pub id: ProcessableId,
    /// Identity shared by every attempt; the id of the first attempt.
    pub lineage: ProcessableId,
    /// Display name. Not unique across attempts.
    pub name: String,
    /// Name of the stage the processable belongs to.
    pub stage: String,
    /// Ordering of the stage within the pipeline.
    pub stage_index: u32,
    /// Current status.
    pub status: Status,
    /// Trigger policy.
    #[serde(default)]
    pub when: When,
    /// Whether a failure is discounted by composite parents.
    #[serde(default)]
    pub allow_failure: bool,
    /// How predecessors are determined.
    #[serde(default)]
    pub scheduling_type: SchedulingType,
    /// Lineages this processable needs (only meaningful for `dag`).
    #[serde(default)]
    pub needs: Vec<ProcessableId>,
    /// Delay before a `delayed` processable is enqueued.
    #[serde(default)]
    pub start_in: Option<Duration>,
    /// Automatic retries left after a failure.
    #[serde(default)]
    pub retries_remaining: u32,
    /// Job or bridge.
    #[serde(default)]
    pub kind: ProcessableKind,
    /// Set once a newer attempt supersedes this record.
    #[serde(default)]
    pub retried: bool,
    /// Due time while `scheduled`.
    #[serde(default)]
    pub scheduled_at: Option<Timestamp>,
}

impl Processable {
    /// Creates a job in `created` status.
    #[must_use]
    pub fn job(name: impl Into<String>, stage: impl Into<String>, stage_index: u32) -> Self {
        let id = ProcessableId::new();
        Self {
            id,
            lineage: id,
            name: name.into(),
            stage: stage.into(),
            stage_index,
            status: Status::Created,
            when: When::OnSuccess,
            allow_failure: false,
            scheduling_type: SchedulingType::Stage,
            needs: Vec::new(),
            start_in: None,
            retries_remaining: 0,
            kind: ProcessableKind::Job,
            retried: false,
            scheduled_at: None,
        }
    }

    /// Creates a bridge in `created` status.
    #[must_use]
    pub fn bridge(
        name: impl Into<String>,
        stage: impl Into<String>,
        stage_index: u32,
        matrix: MatrixBindings,
    ) -> Self {
        Self {
            kind: ProcessableKind::Bridge { matrix },
            ..Self::job(name, stage, stage_index)
        }
    }

    /// Sets the trigger policy.
    #[must_use]
    pub fn with_when(mut self, when: When) -> Self {
        self.when = when;
        self
    }

    /// Sets allow_failure.
    #[must_use]
    pub fn with_allow_failure(mut self, allow_failure: bool) -> Self {
        self.allow_failure = allow_failure;
        self
    }

    /// Switches to DAG scheduling with the given needed lineages.
    #[must_use]
    pub fn with_needs(mut self, needs: impl IntoIterator<Item = ProcessableId>) -> Self {
        self.scheduling_type = SchedulingType::Dag;
        self.needs = needs.into_iter().collect();
        self
    }

    /// Sets the delay of a `delayed` processable.
    #[must_use]
    pub fn with_start_in(mut self, start_in: Duration) -> Self {
        self.start_in = Some(start_in);
        self
    }

    /// Sets the number of automatic retries.
    #[must_use]
    pub fn with_retries(mut self, retries: u32) -> Self {
        self.retries_remaining = retries;
        self
    }

    /// Sets the status directly. Intended for fixtures and stores.
    #[must_use]
    pub fn with_status(mut self, status: Status) -> Self {
        self.status = status;
        self
    }

    /// Returns true for bridges.
    #[must_use]
    pub const fn is_bridge(&self) -> bool {
        matches!(self.kind, ProcessableKind::Bridge { .. })
    }

    /// Returns true if no newer attempt supersedes this record.
    #[must_use]
    pub const fn is_latest(&self) -> bool {
        !self.retried
    }

    /// A manual processable that does not block later stages.
    #[must_use]
    pub const fn is_optional_manual(&self) -> bool {
        matches!(self.when, When::Manual) && self.allow_failure
    }

    /// Matrix bindings of an expanded bridge.
    #[must_use]
    pub fn matrix(&self) -> &[(String, String)] {
        match &self.kind {
            ProcessableKind::Bridge { matrix } => matrix,
            ProcessableKind::Job => &[],
        }
    }

    /// Builds the next attempt of this unit: same lineage, name, stage and
    /// needs, fresh id, back in `created`.
    #[must_use]
    pub fn next_attempt(&self, retries_remaining: u32) -> Self {
        Self {
            id: ProcessableId::new(),
            status: Status::Created,
            retries_remaining,
            retried: false,
            scheduled_at: None,
            ..self.clone()
        }
    }
}
