//! Testing utilities for pipelines.
//!
//! This module provides:
//! - A scenario harness wiring an engine to in-memory collaborators
//! - Assertions on processable and pipeline statuses

mod assertions;
mod fixtures;

pub use assertions::{assert_pipeline_status, assert_status, assert_statuses, statuses_by_name};
pub use fixtures::ScenarioHarness;
