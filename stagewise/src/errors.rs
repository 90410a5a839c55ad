//! Error types for the stagewise engine.
//!
//! Graph integrity violations and rejected commands are distinguishable
//! variants; failures of side-effect collaborators have their own type so
//! they can be logged without aborting a pass.

use crate::core::{PipelineId, ProcessableId, Status};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

/// The main error type for engine operations.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The pipeline definition is invalid.
    #[error("{0}")]
    Validation(#[from] PipelineValidationError),

    /// The needs graph violates the acyclicity precondition.
    #[error("{0}")]
    GraphIntegrity(#[from] GraphIntegrityError),

    /// A command was rejected because of the processable's status.
    #[error("{0}")]
    InvalidTransition(#[from] InvalidTransitionError),

    /// The pipeline does not exist in the store.
    #[error("Pipeline not found: {0}")]
    PipelineNotFound(PipelineId),

    /// The processable does not exist in the pipeline.
    #[error("Processable not found: {0}")]
    ProcessableNotFound(ProcessableId),

    /// Concurrent writers kept winning the generation check.
    #[error("Pipeline {pipeline_id} kept changing concurrently; gave up after {attempts} attempts")]
    Transient {
        /// The contended pipeline.
        pipeline_id: PipelineId,
        /// Number of commit attempts made.
        attempts: usize,
    },

    /// The store failed to load or commit.
    #[error("Store error: {0}")]
    Store(String),

    /// Serialization/deserialization error.
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl EngineError {
    /// Returns true if retrying the same call later may succeed.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Transient { .. })
    }
}

/// Metadata about a contract error for better diagnostics.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ContractErrorInfo {
    /// Error code (e.g., "GRAPH-001-CYCLE").
    pub code: String,
    /// Short summary of the error.
    pub summary: String,
    /// Hint for fixing the error.
    pub fix_hint: Option<String>,
    /// Additional context key-value pairs.
    #[serde(default)]
    pub context: HashMap<String, String>,
}

impl ContractErrorInfo {
    /// Creates a new contract error info.
    #[must_use]
    pub fn new(code: impl Into<String>, summary: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            summary: summary.into(),
            fix_hint: None,
            context: HashMap::new(),
        }
    }

    /// Sets the fix hint.
    #[must_use]
    pub fn with_fix_hint(mut self, hint: impl Into<String>) -> Self {
        self.fix_hint = Some(hint.into());
        self
    }

    /// Adds a single context entry.
    #[must_use]
    pub fn with_context_entry(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }
}

/// Error raised when a pipeline definition is rejected by the builder.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct PipelineValidationError {
    /// The error message.
    pub message: String,
    /// The processables involved in the error.
    pub processables: Vec<String>,
    /// Optional contract error info.
    pub error_info: Option<ContractErrorInfo>,
}

impl PipelineValidationError {
    /// Creates a new pipeline validation error.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            processables: Vec::new(),
            error_info: None,
        }
    }

    /// Sets the processables involved.
    #[must_use]
    pub fn with_processables(mut self, processables: Vec<String>) -> Self {
        self.processables = processables;
        self
    }

    /// Sets the contract error info.
    #[must_use]
    pub fn with_error_info(mut self, info: ContractErrorInfo) -> Self {
        self.error_info = Some(info);
        self
    }

    /// Returns the contract error code, if any.
    #[must_use]
    pub fn code(&self) -> Option<&str> {
        self.error_info.as_ref().map(|info| info.code.as_str())
    }
}

/// What exactly is wrong with a graph.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IntegrityViolation {
    /// The dependency graph (needs plus implicit stage edges) has a cycle.
    Cycle {
        /// Names along the cycle, first name repeated at the end.
        path: Vec<String>,
    },
    /// A processable needs a lineage that has no record in the pipeline.
    DanglingNeed {
        /// The processable declaring the need.
        processable: String,
        /// The missing lineage.
        need: ProcessableId,
    },
    /// The fixpoint loop did not settle within its ceiling.
    IterationCeiling {
        /// The ceiling that was hit.
        iterations: usize,
    },
}

/// Error raised when the graph breaks the engine's preconditions.
///
/// Raised before anything is committed.
#[derive(Debug, Clone, Error)]
#[error("Graph integrity error: {}", describe(.violation))]
pub struct GraphIntegrityError {
    /// The violation.
    pub violation: IntegrityViolation,
    /// Contract error info.
    pub error_info: ContractErrorInfo,
}

fn describe(violation: &IntegrityViolation) -> String {
    match violation {
        IntegrityViolation::Cycle { path } => format!("dependency cycle {}", path.join(" -> ")),
        IntegrityViolation::DanglingNeed { processable, need } => {
            format!("'{processable}' needs unknown processable {need}")
        }
        IntegrityViolation::IterationCeiling { iterations } => {
            format!("no fixpoint after {iterations} iterations")
        }
    }
}

impl GraphIntegrityError {
    /// Creates a cycle error.
    #[must_use]
    pub fn cycle(path: Vec<String>) -> Self {
        let info = ContractErrorInfo::new(
            "GRAPH-001-CYCLE",
            format!("Pipeline contains a dependency cycle: {}", path.join(" -> ")),
        )
        .with_fix_hint("Remove one of the needs in the cycle to break it.");
        Self {
            violation: IntegrityViolation::Cycle { path },
            error_info: info,
        }
    }

    /// Creates a dangling need error.
    #[must_use]
    pub fn dangling_need(processable: impl Into<String>, need: ProcessableId) -> Self {
        let processable = processable.into();
        let info = ContractErrorInfo::new(
            "GRAPH-002-DANGLING_NEED",
            format!("'{processable}' needs a processable that does not exist"),
        )
        .with_context_entry("need", need.to_string());
        Self {
            violation: IntegrityViolation::DanglingNeed { processable, need },
            error_info: info,
        }
    }

    /// Creates an iteration ceiling error.
    #[must_use]
    pub fn iteration_ceiling(iterations: usize) -> Self {
        let info = ContractErrorInfo::new(
            "GRAPH-003-ITERATION_CEILING",
            format!("Processing did not converge within {iterations} iterations"),
        );
        Self {
            violation: IntegrityViolation::IterationCeiling { iterations },
            error_info: info,
        }
    }
}

impl From<GraphIntegrityError> for PipelineValidationError {
    fn from(err: GraphIntegrityError) -> Self {
        let processables = match &err.violation {
            IntegrityViolation::Cycle { path } => path.clone(),
            IntegrityViolation::DanglingNeed { processable, .. } => vec![processable.clone()],
            IntegrityViolation::IterationCeiling { .. } => Vec::new(),
        };
        Self {
            message: err.to_string(),
            processables,
            error_info: Some(err.error_info),
        }
    }
}

/// Error raised when a command does not fit the processable's status.
#[derive(Debug, Clone, Error)]
#[error("Cannot {action} '{name}' while it is {status}")]
pub struct InvalidTransitionError {
    /// The processable.
    pub processable: ProcessableId,
    /// Its name.
    pub name: String,
    /// Its status when the command was rejected.
    pub status: Status,
    /// The rejected action (e.g. "play", "retry", "transition to running").
    pub action: String,
}

impl InvalidTransitionError {
    /// Creates a new invalid transition error.
    #[must_use]
    pub fn new(
        processable: ProcessableId,
        name: impl Into<String>,
        status: Status,
        action: impl Into<String>,
    ) -> Self {
        Self {
            processable,
            name: name.into(),
            status,
            action: action.into(),
        }
    }
}

/// Failure of an isolated collaborator (timer, hook, downstream creator).
#[derive(Debug, Clone, Error)]
#[error("{collaborator} failed: {message}")]
pub struct CollaboratorError {
    /// Which collaborator failed.
    pub collaborator: String,
    /// The failure message.
    pub message: String,
}

impl CollaboratorError {
    /// Creates a new collaborator error.
    #[must_use]
    pub fn new(collaborator: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            collaborator: collaborator.into(),
            message: message.into(),
        }
    }
}

/// Provides default suggestions for common contract error codes.
pub struct ContractSuggestions;

impl ContractSuggestions {
    /// Gets a suggestion for a given error code.
    #[must_use]
    pub fn get(code: &str) -> Option<&'static str> {
        match code {
            "GRAPH-001-CYCLE" => Some(
                "Check the needs of the listed jobs for circular references. \
                 A job may only need jobs from its own or an earlier stage.",
            ),
            "GRAPH-002-DANGLING_NEED" => Some(
                "The stored graph references a job that no longer exists. \
                 Rebuild the pipeline from its definition.",
            ),
            "BUILD-001-UNKNOWN_NEED" => Some(
                "Ensure every need references a job defined in the pipeline. \
                 Check for typos in job names.",
            ),
            "BUILD-002-UNKNOWN_STAGE" => Some(
                "Declare the stage before adding jobs to it.",
            ),
            "BUILD-003-DELAY" => Some(
                "Use `start_in` together with `when: delayed`, and nowhere else.",
            ),
            "BUILD-004-MATRIX" => Some(
                "Only bridges take a matrix, and it must expand into 1 to 200 instances.",
            ),
            "BUILD-005-EMPTY" => Some("Add at least one stage and one job before building."),
            "BUILD-006-NEED_ORDER" => Some(
                "Move the needed job to the same or an earlier stage.",
            ),
            "BUILD-007-SELF_NEED" => Some(
                "Remove the job's own name from its needs.",
            ),
            _ => None,
        }
    }
}
