//! Post-pass hook port.

use crate::errors::CollaboratorError;
use crate::pipeline::Pipeline;
use async_trait::async_trait;

/// Runs after each committed pass (e.g. persistent-ref bookkeeping).
///
/// Failures are logged and reported as events. They never undo the commit.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PipelineHook: Send + Sync {
    /// Called with the pipeline as committed.
    async fn after_pass(&self, pipeline: &Pipeline) -> Result<(), CollaboratorError>;
}

/// A hook that does nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOpHook;

#[async_trait]
impl PipelineHook for NoOpHook {
    async fn after_pass(&self, _pipeline: &Pipeline) -> Result<(), CollaboratorError> {
        Ok(())
    }
}
