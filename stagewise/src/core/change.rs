//! Deltas committed to a pipeline store.

use super::{Processable, ProcessableId, Status};
use crate::utils::Timestamp;
use serde::{Deserialize, Serialize};

/// A single mutation of a pipeline graph.
///
/// Every state change flows through a batch of these, committed against the
/// generation the batch was computed from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum StatusChange {
    /// A processable moves forward in the state machine.
    Transition {
        /// The processable.
        id: ProcessableId,
        /// Status the change was computed against.
        from: Status,
        /// New status.
        to: Status,
        /// Due time, set when entering `scheduled`.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        scheduled_at: Option<Timestamp>,
    },
    /// A new attempt is added to the pipeline.
    Create {
        /// The new record.
        processable: Box<Processable>,
    },
    /// A record is superseded by a newer attempt.
    Supersede {
        /// The superseded record.
        id: ProcessableId,
    },
    /// Derived stage and pipeline statuses are refreshed.
    Composite {
        /// Pipeline status.
        status: Status,
        /// Stage statuses, indexed like the pipeline's stage list.
        stages: Vec<Status>,
    },
}

impl StatusChange {
    /// Creates a plain transition.
    #[must_use]
    pub fn transition(id: ProcessableId, from: Status, to: Status) -> Self {
        Self::Transition {
            id,
            from,
            to,
            scheduled_at: None,
        }
    }

    /// Creates a transition into `scheduled` with its due time.
    #[must_use]
    pub fn schedule(id: ProcessableId, from: Status, at: Timestamp) -> Self {
        Self::Transition {
            id,
            from,
            to: Status::Scheduled,
            scheduled_at: Some(at),
        }
    }

    /// Creates an insertion of a new attempt.
    #[must_use]
    pub fn create(processable: Processable) -> Self {
        Self::Create {
            processable: Box::new(processable),
        }
    }

    /// Returns the processable touched by this change, if any.
    #[must_use]
    pub fn processable_id(&self) -> Option<ProcessableId> {
        match self {
            Self::Transition { id, .. } | Self::Supersede { id } => Some(*id),
            Self::Create { processable } => Some(processable.id),
            Self::Composite { .. } => None,
        }
    }

    /// Returns true for changes that touch a processable record.
    #[must_use]
    pub const fn is_processable_change(&self) -> bool {
        !matches!(self, Self::Composite { .. })
    }
}
