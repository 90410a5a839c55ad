//! The processing engine: public entry points and post-commit side effects.

use super::lease::LeaseRegistry;
use super::strategy::{commit_fresh, strategy_for, Committed, ProcessingStrategy};
use crate::bridge::{DownstreamPipelineCreator, InMemoryDownstreamCreator};
use crate::config::EngineConfig;
use crate::core::{PipelineId, Processable, ProcessableId, Status, StatusChange};
use crate::delay::DelayRegistry;
use crate::errors::{CollaboratorError, EngineError, InvalidTransitionError};
use crate::events::{
    EventSink, NoOpEventSink, DOWNSTREAM_CREATED, DOWNSTREAM_FAILED, PIPELINE_PROCESSED,
    PROCESSABLE_TRANSITIONED, SIDE_EFFECT_FAILED,
};
use crate::observability::{command_span, pass_span};
use crate::pipeline::Pipeline;
use crate::ports::{NoOpTimer, PipelineHook, PipelineStore, Timer};
use crate::retry::{reset_skipped_dependents, retry_changes};
use crate::utils::{iso_timestamp, now};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, warn, Instrument};

/// Summary returned by every entry point.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessingResult {
    /// Whether anything was committed.
    pub changed: bool,
    /// Number of committed changes touching processables.
    pub transitions: usize,
    /// Pipeline status after the call.
    pub status: Status,
    /// Stored generation after the call.
    pub generation: u64,
}

impl ProcessingResult {
    fn merge(self, later: Self) -> Self {
        Self {
            changed: self.changed || later.changed,
            transitions: self.transitions + later.transitions,
            status: later.status,
            generation: later.generation,
        }
    }
}

fn count_transitions(changes: &[StatusChange]) -> usize {
    changes.iter().filter(|c| c.is_processable_change()).count()
}

fn latest_with_id(pipeline: &Pipeline, id: ProcessableId) -> Result<&Processable, EngineError> {
    pipeline.get(id).ok_or(EngineError::ProcessableNotFound(id))
}

fn reject(processable: &Processable, action: impl Into<String>) -> EngineError {
    InvalidTransitionError::new(
        processable.id,
        &processable.name,
        processable.status,
        action,
    )
    .into()
}

/// Drives pipelines forward.
///
/// Every entry point commits through the store's generation check and then
/// runs a processing pass. Timer, hook and event calls happen after the
/// commit; their failures are logged and never undo it.
pub struct ProcessingEngine {
    store: Arc<dyn PipelineStore>,
    timer: Arc<dyn Timer>,
    hooks: Vec<Arc<dyn PipelineHook>>,
    events: Arc<dyn EventSink>,
    downstream: Arc<dyn DownstreamPipelineCreator>,
    delays: DelayRegistry,
    triggers: LeaseRegistry,
    strategy: Arc<dyn ProcessingStrategy>,
    config: EngineConfig,
}

impl std::fmt::Debug for ProcessingEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessingEngine")
            .field("strategy", &self.strategy.name())
            .field("hooks", &self.hooks.len())
            .field("delays", &self.delays)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl ProcessingEngine {
    /// Creates an engine over `store` with default collaborators.
    #[must_use]
    pub fn new(store: Arc<dyn PipelineStore>) -> Self {
        let config = EngineConfig::default();
        Self {
            store,
            timer: Arc::new(NoOpTimer),
            hooks: Vec::new(),
            events: Arc::new(NoOpEventSink),
            downstream: Arc::new(InMemoryDownstreamCreator::new()),
            delays: DelayRegistry::new(),
            triggers: LeaseRegistry::new(),
            strategy: strategy_for(&config),
            config,
        }
    }

    /// Sets the configuration and the strategy it selects.
    ///
    /// Out-of-range values are clamped to the nearest valid ones.
    #[must_use]
    pub fn with_config(mut self, config: EngineConfig) -> Self {
        let config = config.clamped();
        self.strategy = strategy_for(&config);
        self.config = config;
        self
    }

    /// Overrides the strategy.
    #[must_use]
    pub fn with_strategy(mut self, strategy: Arc<dyn ProcessingStrategy>) -> Self {
        self.strategy = strategy;
        self
    }

    /// Sets the timer used for delayed processables.
    #[must_use]
    pub fn with_timer(mut self, timer: Arc<dyn Timer>) -> Self {
        self.timer = timer;
        self
    }

    /// Adds a post-pass hook.
    #[must_use]
    pub fn with_hook(mut self, hook: Arc<dyn PipelineHook>) -> Self {
        self.hooks.push(hook);
        self
    }

    /// Sets the event sink.
    #[must_use]
    pub fn with_event_sink(mut self, events: Arc<dyn EventSink>) -> Self {
        self.events = events;
        self
    }

    /// Sets the downstream pipeline creator used by bridges.
    #[must_use]
    pub fn with_downstream_creator(mut self, downstream: Arc<dyn DownstreamPipelineCreator>) -> Self {
        self.downstream = downstream;
        self
    }

    /// Returns the configuration.
    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Returns the registry of outstanding timer callbacks.
    #[must_use]
    pub fn delays(&self) -> &DelayRegistry {
        &self.delays
    }

    /// Runs one processing pass on a pipeline.
    ///
    /// # Errors
    ///
    /// Returns `GraphIntegrity` (nothing committed) for broken graphs,
    /// `Transient` when concurrent writers keep winning, and store errors.
    pub async fn process(&self, pipeline_id: PipelineId) -> Result<ProcessingResult, EngineError> {
        let span = pass_span(pipeline_id, self.strategy.name());
        async {
            let report = self
                .strategy
                .run(self.store.as_ref(), pipeline_id, now())
                .await
                .map_err(|err| {
                    warn!(pipeline_id = %pipeline_id, error = %err, "Processing pass failed");
                    err
                })?;

            let result = ProcessingResult {
                changed: report.changed(),
                transitions: count_transitions(&report.changes),
                status: report.pipeline.status(),
                generation: report.pipeline.generation(),
            };
            if report.changed() {
                self.after_commit(&report.changes, &report.pipeline).await;
                self.run_hooks(&report.pipeline).await;
                info!(
                    transitions = result.transitions,
                    commits = report.commits,
                    status = %result.status,
                    "Pipeline processed"
                );
                self.events
                    .emit(
                        PIPELINE_PROCESSED,
                        Some(serde_json::json!({
                            "pipeline_id": pipeline_id.to_string(),
                            "transitions": result.transitions,
                            "status": result.status,
                            "generation": result.generation,
                            "processed_at": iso_timestamp(),
                        })),
                    )
                    .await;
            } else {
                debug!("Nothing to process");
            }
            Ok::<_, EngineError>(result)
        }
        .instrument(span)
        .await
    }

    /// Approves a `manual` processable or starts a `scheduled` one early.
    ///
    /// DAG dependents that were skipped because of the manual need are reset.
    ///
    /// # Errors
    ///
    /// Returns `InvalidTransition` unless the latest record is `manual` or
    /// `scheduled`.
    pub async fn play(
        &self,
        pipeline_id: PipelineId,
        id: ProcessableId,
        actor: &str,
    ) -> Result<ProcessingResult, EngineError> {
        info!(pipeline_id = %pipeline_id, processable = %id, actor, "Play requested");
        self.command(pipeline_id, "play", |pipeline| {
            let processable = latest_with_id(pipeline, id)?;
            if !processable.is_latest() || !processable.status.is_blocked() {
                return Err(reject(processable, "play"));
            }
            let mut changes = vec![StatusChange::transition(
                id,
                processable.status,
                Status::Pending,
            )];
            changes.extend(reset_skipped_dependents(pipeline, processable.lineage));
            Ok(changes)
        })
        .await
    }

    /// Turns a `scheduled` processable back into a `manual` one.
    ///
    /// # Errors
    ///
    /// Returns `InvalidTransition` unless the latest record is `scheduled`.
    pub async fn unschedule(
        &self,
        pipeline_id: PipelineId,
        id: ProcessableId,
    ) -> Result<ProcessingResult, EngineError> {
        self.command(pipeline_id, "unschedule", |pipeline| {
            let processable = latest_with_id(pipeline, id)?;
            if !processable.is_latest() || processable.status != Status::Scheduled {
                return Err(reject(processable, "unschedule"));
            }
            Ok(vec![StatusChange::transition(
                id,
                Status::Scheduled,
                Status::Manual,
            )])
        })
        .await
    }

    /// Retries a `failed` or `canceled` processable as a new attempt.
    ///
    /// # Errors
    ///
    /// Returns `InvalidTransition` for any other status or for superseded
    /// records.
    pub async fn retry(
        &self,
        pipeline_id: PipelineId,
        id: ProcessableId,
        actor: &str,
    ) -> Result<ProcessingResult, EngineError> {
        info!(pipeline_id = %pipeline_id, processable = %id, actor, "Retry requested");
        self.command(pipeline_id, "retry", |pipeline| retry_changes(pipeline, id))
            .await
    }

    /// Cancels every `created`, `pending`, `scheduled` or `running`
    /// processable. `manual` ones are left as they are.
    ///
    /// # Errors
    ///
    /// Propagates store and pass errors.
    pub async fn cancel(&self, pipeline_id: PipelineId) -> Result<ProcessingResult, EngineError> {
        self.command(pipeline_id, "cancel", |pipeline| {
            Ok(pipeline
                .latest()
                .filter(|p| p.status.is_cancelable())
                .map(|p| StatusChange::transition(p.id, p.status, Status::Canceled))
                .collect())
        })
        .await
    }

    /// Timer callback: moves a `scheduled` processable to `pending`.
    ///
    /// # Errors
    ///
    /// Returns `InvalidTransition` unless the latest record is `scheduled`.
    pub async fn enqueue_scheduled(
        &self,
        pipeline_id: PipelineId,
        id: ProcessableId,
    ) -> Result<ProcessingResult, EngineError> {
        // The callback fired; there is nothing left to cancel.
        let fired = self.delays.take(id);
        let result = self
            .command(pipeline_id, "enqueue_scheduled", |pipeline| {
                let processable = latest_with_id(pipeline, id)?;
                if !processable.is_latest() || processable.status != Status::Scheduled {
                    return Err(reject(processable, "enqueue"));
                }
                Ok(vec![StatusChange::transition(
                    id,
                    Status::Scheduled,
                    Status::Pending,
                )])
            })
            .await;
        if let (Err(_), Some(token)) = (&result, fired) {
            self.delays.register(id, token);
        }
        result
    }

    /// Worker report of a processable's progress or outcome.
    ///
    /// Accepts `running`, `success`, `failed` and `canceled`, as allowed by
    /// the state machine. Bridges never report `running`.
    ///
    /// # Errors
    ///
    /// Returns `InvalidTransition` for any other status or move.
    pub async fn report_status(
        &self,
        pipeline_id: PipelineId,
        id: ProcessableId,
        status: Status,
    ) -> Result<ProcessingResult, EngineError> {
        self.command(pipeline_id, "report_status", |pipeline| {
            let processable = latest_with_id(pipeline, id)?;
            let reportable = matches!(
                status,
                Status::Running | Status::Success | Status::Failed | Status::Canceled
            );
            if !reportable
                || !processable.is_latest()
                || !processable.status.can_transition_to(status)
                || (processable.is_bridge() && status == Status::Running)
            {
                return Err(reject(processable, format!("report {status} for")));
            }
            Ok(vec![StatusChange::transition(id, processable.status, status)])
        })
        .await
    }

    /// Completes a `pending` bridge by creating its downstream pipeline.
    ///
    /// A creation failure fails the bridge; it is not an error of this call.
    /// Calls for the same pipeline are serialized from the status check to
    /// the commit, so a bridge triggers at most one creation per engine.
    ///
    /// # Errors
    ///
    /// Returns `InvalidTransition` for jobs and for bridges that are not
    /// `pending`.
    pub async fn trigger_downstream(
        &self,
        pipeline_id: PipelineId,
        bridge_id: ProcessableId,
    ) -> Result<ProcessingResult, EngineError> {
        let committed = {
            let _lease = self.triggers.acquire(pipeline_id).await;
            let snapshot = self.store.load_pipeline(pipeline_id).await?;
            let bridge = latest_with_id(&snapshot, bridge_id)?;
            if !bridge.is_bridge() || !bridge.is_latest() || bridge.status != Status::Pending {
                return Err(reject(bridge, "trigger downstream of"));
            }
            let outcome = self.create_downstream(pipeline_id, bridge).await;

            self.commit_command(pipeline_id, "trigger_downstream", |pipeline| {
                let bridge = latest_with_id(pipeline, bridge_id)?;
                if bridge.status != Status::Pending {
                    return Err(reject(bridge, "complete"));
                }
                Ok(vec![StatusChange::transition(
                    bridge_id,
                    Status::Pending,
                    outcome,
                )])
            })
            .await?
        };
        Ok(self.process_after(pipeline_id, committed).await)
    }

    async fn create_downstream(&self, pipeline_id: PipelineId, bridge: &Processable) -> Status {
        match self.downstream.create(bridge).await {
            Ok(downstream) => {
                info!(
                    pipeline_id = %pipeline_id,
                    bridge = %bridge.name,
                    downstream = %downstream.id,
                    "Downstream pipeline created"
                );
                self.events
                    .emit(
                        DOWNSTREAM_CREATED,
                        Some(serde_json::json!({
                            "bridge": bridge.name,
                            "downstream_pipeline_id": downstream.id.to_string(),
                        })),
                    )
                    .await;
                Status::Success
            }
            Err(err) => {
                warn!(
                    pipeline_id = %pipeline_id,
                    bridge = %bridge.name,
                    error = %err,
                    "Downstream pipeline creation failed"
                );
                self.events
                    .emit(
                        DOWNSTREAM_FAILED,
                        Some(serde_json::json!({
                            "bridge": bridge.name,
                            "reason": err.message,
                        })),
                    )
                    .await;
                Status::Failed
            }
        }
    }

    async fn command<F>(
        &self,
        pipeline_id: PipelineId,
        name: &str,
        compute: F,
    ) -> Result<ProcessingResult, EngineError>
    where
        F: FnMut(&Pipeline) -> Result<Vec<StatusChange>, EngineError> + Send,
    {
        let committed = self.commit_command(pipeline_id, name, compute).await?;
        Ok(self.process_after(pipeline_id, committed).await)
    }

    async fn commit_command<F>(
        &self,
        pipeline_id: PipelineId,
        name: &str,
        compute: F,
    ) -> Result<ProcessingResult, EngineError>
    where
        F: FnMut(&Pipeline) -> Result<Vec<StatusChange>, EngineError> + Send,
    {
        let span = command_span(pipeline_id, name);
        let Committed { changes, pipeline } =
            commit_fresh(self.store.as_ref(), pipeline_id, &self.config, compute)
                .instrument(span.clone())
                .await?;
        self.after_commit(&changes, &pipeline)
            .instrument(span)
            .await;

        Ok(ProcessingResult {
            changed: !changes.is_empty(),
            transitions: count_transitions(&changes),
            status: pipeline.status(),
            generation: pipeline.generation(),
        })
    }

    /// Runs the pass that follows a committed command.
    ///
    /// The command stays committed when the pass fails, so the caller gets
    /// the committed result and the next pass picks the pipeline up again.
    async fn process_after(
        &self,
        pipeline_id: PipelineId,
        committed: ProcessingResult,
    ) -> ProcessingResult {
        match self.process(pipeline_id).await {
            Ok(processed) => committed.merge(processed),
            Err(err) => {
                warn!(
                    pipeline_id = %pipeline_id,
                    error = %err,
                    "Command committed; follow-up pass failed"
                );
                committed
            }
        }
    }

    /// Timer bookkeeping and transition events for committed changes.
    async fn after_commit(&self, changes: &[StatusChange], pipeline: &Pipeline) {
        for change in changes {
            let StatusChange::Transition {
                id,
                from,
                to,
                scheduled_at,
            } = change
            else {
                continue;
            };
            let name = pipeline.get(*id).map_or("", |p| p.name.as_str());
            debug!(processable = %name, from = %from, to = %to, "Transition");
            self.events
                .emit(
                    PROCESSABLE_TRANSITIONED,
                    Some(serde_json::json!({
                        "pipeline_id": pipeline.id().to_string(),
                        "processable_id": id.to_string(),
                        "name": name,
                        "from": from,
                        "to": to,
                    })),
                )
                .await;

            if *from == Status::Scheduled {
                self.cancel_timer(pipeline.id(), *id).await;
            }
            if let (Status::Scheduled, Some(at)) = (*to, scheduled_at) {
                match self.timer.schedule_callback(*id, *at).await {
                    Ok(token) => self.delays.register(*id, token),
                    Err(err) => self.side_effect_failed(pipeline.id(), &err).await,
                }
            }
        }
    }

    async fn cancel_timer(&self, pipeline_id: PipelineId, id: ProcessableId) {
        let Some(token) = self.delays.take(id) else {
            return;
        };
        if let Err(err) = self.timer.cancel(token).await {
            self.side_effect_failed(pipeline_id, &err).await;
        }
    }

    async fn run_hooks(&self, pipeline: &Pipeline) {
        let results = join_all(self.hooks.iter().map(|hook| hook.after_pass(pipeline))).await;
        for err in results.into_iter().filter_map(Result::err) {
            self.side_effect_failed(pipeline.id(), &err).await;
        }
    }

    async fn side_effect_failed(&self, pipeline_id: PipelineId, err: &CollaboratorError) {
        warn!(
            pipeline_id = %pipeline_id,
            collaborator = %err.collaborator,
            error = %err.message,
            "Side effect failed after commit"
        );
        self.events
            .emit(
                SIDE_EFFECT_FAILED,
                Some(serde_json::json!({
                    "pipeline_id": pipeline_id.to_string(),
                    "collaborator": err.collaborator,
                    "error": err.message,
                })),
            )
            .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::PipelineBuilder;
    use crate::ports::InMemoryPipelineStore;

    #[test]
    fn test_zero_iteration_ceiling_is_clamped() {
        let store = Arc::new(InMemoryPipelineStore::new());
        let pipeline = PipelineBuilder::new("ci")
            .stages(["build", "test"])
            .job("compile", "build")
            .job("rspec", "test")
            .build()
            .unwrap();
        let pipeline_id = store.insert(pipeline);
        let engine = ProcessingEngine::new(store.clone())
            .with_config(EngineConfig::new().with_max_iterations(0).with_max_commit_attempts(0));

        assert_eq!(engine.config().max_iterations, None);
        assert_eq!(engine.config().max_commit_attempts, 1);

        let result = tokio_test::block_on(engine.process(pipeline_id)).unwrap();
        assert!(result.changed);
        let stored = store.snapshot(pipeline_id).unwrap();
        assert_eq!(stored.latest_by_name("compile").unwrap().status, Status::Pending);
    }
}
