//! Processable status, trigger policy and scheduling type enums.

use serde::{Deserialize, Serialize};
use std::fmt;

/// The lifecycle status of a processable (and of derived composites).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    /// Created with the pipeline, not yet evaluated.
    #[default]
    Created,
    /// Ready to be picked up by a worker.
    Pending,
    /// Delayed; waiting for its timer or an early play.
    Scheduled,
    /// Being executed by a worker.
    Running,
    /// Finished successfully.
    Success,
    /// Finished with an error.
    Failed,
    /// Canceled before finishing.
    Canceled,
    /// Will never run.
    Skipped,
    /// Blocked, awaiting a human action.
    Manual,
}

impl Status {
    /// All statuses, in declaration order.
    pub const ALL: [Self; 9] = [
        Self::Created,
        Self::Pending,
        Self::Scheduled,
        Self::Running,
        Self::Success,
        Self::Failed,
        Self::Canceled,
        Self::Skipped,
        Self::Manual,
    ];

    /// Returns the snake_case name of the status.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Pending => "pending",
            Self::Scheduled => "scheduled",
            Self::Running => "running",
            Self::Success => "success",
            Self::Failed => "failed",
            Self::Canceled => "canceled",
            Self::Skipped => "skipped",
            Self::Manual => "manual",
        }
    }

    /// Returns true for terminal statuses (`success`, `failed`, `canceled`, `skipped`).
    #[must_use]
    pub const fn is_complete(self) -> bool {
        matches!(
            self,
            Self::Success | Self::Failed | Self::Canceled | Self::Skipped
        )
    }

    /// Returns true while a worker owns the processable.
    #[must_use]
    pub const fn is_active(self) -> bool {
        matches!(self, Self::Pending | Self::Running)
    }

    /// Returns true for statuses waiting on a human or a timer.
    #[must_use]
    pub const fn is_blocked(self) -> bool {
        matches!(self, Self::Manual | Self::Scheduled)
    }

    /// Returns true if the status may be forced to `canceled` by a pipeline cancel.
    ///
    /// `manual` is quasi-terminal and survives a cancel.
    #[must_use]
    pub const fn is_cancelable(self) -> bool {
        matches!(
            self,
            Self::Created | Self::Pending | Self::Scheduled | Self::Running
        )
    }

    /// Returns whether the state machine allows moving from `self` to `to`.
    ///
    /// Statuses only move forward; re-running work creates a new processable.
    #[must_use]
    pub const fn can_transition_to(self, to: Self) -> bool {
        match self {
            Self::Created => matches!(
                to,
                Self::Pending | Self::Scheduled | Self::Manual | Self::Skipped | Self::Canceled
            ),
            Self::Scheduled => matches!(to, Self::Pending | Self::Manual | Self::Canceled),
            Self::Manual => matches!(to, Self::Pending | Self::Canceled),
            Self::Pending => matches!(
                to,
                Self::Running | Self::Success | Self::Failed | Self::Canceled
            ),
            Self::Running => matches!(to, Self::Success | Self::Failed | Self::Canceled),
            Self::Success | Self::Failed | Self::Canceled | Self::Skipped => false,
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The trigger policy of a processable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum When {
    /// Run when every predecessor succeeded.
    #[default]
    OnSuccess,
    /// Run only when a predecessor failed.
    OnFailure,
    /// Run once every predecessor is terminal, whatever the outcome.
    Always,
    /// Wait for a human to play it.
    Manual,
    /// Run after `start_in` elapses.
    Delayed,
}

impl fmt::Display for When {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::OnSuccess => write!(f, "on_success"),
            Self::OnFailure => write!(f, "on_failure"),
            Self::Always => write!(f, "always"),
            Self::Manual => write!(f, "manual"),
            Self::Delayed => write!(f, "delayed"),
        }
    }
}

/// How the predecessors of a processable are determined.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SchedulingType {
    /// Depends on every processable of every earlier stage.
    #[default]
    Stage,
    /// Depends only on its explicit needs.
    Dag,
}

impl fmt::Display for SchedulingType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Stage => write!(f, "stage"),
            Self::Dag => write!(f, "dag"),
        }
    }
}
