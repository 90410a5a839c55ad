//! Scenario harness: an engine wired to in-memory collaborators.

use crate::bridge::InMemoryDownstreamCreator;
use crate::config::EngineConfig;
use crate::core::{PipelineId, ProcessableId, Status};
use crate::errors::{EngineError, PipelineValidationError};
use crate::events::CollectingEventSink;
use crate::pipeline::Pipeline;
use crate::ports::{InMemoryPipelineStore, InMemoryTimer};
use crate::processing::{ProcessingEngine, ProcessingResult};
use std::sync::Arc;

/// One pipeline in an in-memory store, driven by an engine.
///
/// Helpers address processables by name and always act on the latest
/// attempt.
pub struct ScenarioHarness {
    /// The store holding the pipeline.
    pub store: Arc<InMemoryPipelineStore>,
    /// Timer recording delayed callbacks.
    pub timer: Arc<InMemoryTimer>,
    /// Sink collecting every emitted event.
    pub events: Arc<CollectingEventSink>,
    /// Downstream creator used by bridges.
    pub downstream: Arc<InMemoryDownstreamCreator>,
    /// The engine under test.
    pub engine: ProcessingEngine,
    /// Id of the pipeline.
    pub pipeline_id: PipelineId,
}

impl ScenarioHarness {
    /// Creates a harness with the default configuration.
    #[must_use]
    pub fn new(pipeline: Pipeline) -> Self {
        Self::with_config(pipeline, EngineConfig::default())
    }

    /// Creates a harness with the given configuration.
    #[must_use]
    pub fn with_config(pipeline: Pipeline, config: EngineConfig) -> Self {
        Self::with_downstream(pipeline, config, InMemoryDownstreamCreator::new())
    }

    /// Creates a harness with a custom downstream creator.
    #[must_use]
    pub fn with_downstream(
        pipeline: Pipeline,
        config: EngineConfig,
        downstream: InMemoryDownstreamCreator,
    ) -> Self {
        let store = Arc::new(InMemoryPipelineStore::new());
        let timer = Arc::new(InMemoryTimer::new());
        let events = Arc::new(CollectingEventSink::new());
        let downstream = Arc::new(downstream);
        let pipeline_id = store.insert(pipeline);
        let engine = ProcessingEngine::new(store.clone())
            .with_config(config)
            .with_timer(timer.clone())
            .with_event_sink(events.clone())
            .with_downstream_creator(downstream.clone());
        Self {
            store,
            timer,
            events,
            downstream,
            engine,
            pipeline_id,
        }
    }

    /// Current stored pipeline.
    pub fn pipeline(&self) -> Result<Pipeline, EngineError> {
        self.store
            .snapshot(self.pipeline_id)
            .ok_or(EngineError::PipelineNotFound(self.pipeline_id))
    }

    /// Id of the latest attempt named `name`.
    pub fn id_of(&self, name: &str) -> Result<ProcessableId, EngineError> {
        self.pipeline()?
            .latest_by_name(name)
            .map(|p| p.id)
            .ok_or_else(|| {
                PipelineValidationError::new(format!("No processable named '{name}'")).into()
            })
    }

    /// Latest status of `name`.
    pub fn status_of(&self, name: &str) -> Result<Status, EngineError> {
        let id = self.id_of(name)?;
        self.pipeline()?
            .get(id)
            .map(|p| p.status)
            .ok_or(EngineError::ProcessableNotFound(id))
    }

    /// Runs a processing pass.
    pub async fn process(&self) -> Result<ProcessingResult, EngineError> {
        self.engine.process(self.pipeline_id).await
    }

    /// Reports `status` for the latest attempt of `name`.
    pub async fn report(&self, name: &str, status: Status) -> Result<ProcessingResult, EngineError> {
        let id = self.id_of(name)?;
        self.engine.report_status(self.pipeline_id, id, status).await
    }

    /// Reports `running` then `success`.
    pub async fn succeed(&self, name: &str) -> Result<ProcessingResult, EngineError> {
        self.report(name, Status::Running).await?;
        self.report(name, Status::Success).await
    }

    /// Reports `running` then `failed`.
    pub async fn fail(&self, name: &str) -> Result<ProcessingResult, EngineError> {
        self.report(name, Status::Running).await?;
        self.report(name, Status::Failed).await
    }

    /// Plays `name`.
    pub async fn play(&self, name: &str) -> Result<ProcessingResult, EngineError> {
        let id = self.id_of(name)?;
        self.engine.play(self.pipeline_id, id, "tester").await
    }

    /// Retries `name`.
    pub async fn retry(&self, name: &str) -> Result<ProcessingResult, EngineError> {
        let id = self.id_of(name)?;
        self.engine.retry(self.pipeline_id, id, "tester").await
    }

    /// Unschedules `name`.
    pub async fn unschedule(&self, name: &str) -> Result<ProcessingResult, EngineError> {
        let id = self.id_of(name)?;
        self.engine.unschedule(self.pipeline_id, id).await
    }

    /// Fires the timer callback of `name`.
    pub async fn enqueue(&self, name: &str) -> Result<ProcessingResult, EngineError> {
        let id = self.id_of(name)?;
        self.engine.enqueue_scheduled(self.pipeline_id, id).await
    }

    /// Completes the bridge `name` through the downstream creator.
    pub async fn trigger(&self, name: &str) -> Result<ProcessingResult, EngineError> {
        let id = self.id_of(name)?;
        self.engine.trigger_downstream(self.pipeline_id, id).await
    }

    /// Cancels the pipeline.
    pub async fn cancel(&self) -> Result<ProcessingResult, EngineError> {
        self.engine.cancel(self.pipeline_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::PipelineBuilder;

    #[tokio::test]
    async fn test_harness_drives_pipeline() {
        let pipeline = PipelineBuilder::new("ci")
            .stages(["build", "test"])
            .job("compile", "build")
            .job("rspec", "test")
            .build()
            .unwrap();
        let harness = ScenarioHarness::new(pipeline);

        harness.process().await.unwrap();
        assert_eq!(harness.status_of("compile").unwrap(), Status::Pending);

        harness.succeed("compile").await.unwrap();
        assert_eq!(harness.status_of("rspec").unwrap(), Status::Pending);
        assert!(harness.id_of("missing").is_err());
    }
}
