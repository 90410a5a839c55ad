//! Core domain model types for stagewise.
//!
//! This module contains the fundamental types used throughout the engine:
//! - Status, trigger policy and scheduling type enums
//! - Processables (jobs and bridges) and their identities
//! - Status changes committed to a store

mod change;
mod processable;
mod status;

pub use change::StatusChange;
pub use processable::{MatrixBindings, PipelineId, Processable, ProcessableId, ProcessableKind};
pub use status::{SchedulingType, Status, When};
