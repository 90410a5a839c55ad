//! Status assertions.

use crate::core::Status;
use crate::pipeline::Pipeline;
use std::collections::BTreeMap;

/// Latest status of every processable, keyed by name.
#[must_use]
pub fn statuses_by_name(pipeline: &Pipeline) -> BTreeMap<String, Status> {
    pipeline
        .latest()
        .map(|p| (p.name.clone(), p.status))
        .collect()
}

/// Asserts the latest status of the processable named `name`.
pub fn assert_status(pipeline: &Pipeline, name: &str, expected: Status) {
    let actual = pipeline.latest_by_name(name).map(|p| p.status);
    assert_eq!(
        actual,
        Some(expected),
        "Expected '{}' to be {}, got {:?}",
        name,
        expected,
        actual
    );
}

/// Asserts the latest statuses of several processables.
pub fn assert_statuses(pipeline: &Pipeline, expected: &[(&str, Status)]) {
    for (name, status) in expected {
        assert_status(pipeline, name, *status);
    }
}

/// Asserts the stored pipeline status.
pub fn assert_pipeline_status(pipeline: &Pipeline, expected: Status) {
    assert_eq!(
        pipeline.status(),
        expected,
        "Expected pipeline to be {}, got {}. Processables: {:?}",
        expected,
        pipeline.status(),
        statuses_by_name(pipeline)
    );
}
