//! End-to-end scenarios driven through the engine.

#[cfg(test)]
mod tests {
    use crate::bridge::{
        DownstreamPipeline, DownstreamPipelineCreator, InMemoryDownstreamCreator, Matrix,
        MatrixEntry,
    };
    use crate::config::{EngineConfig, StrategyKind};
    use crate::core::{PipelineId, Processable, Status, When};
    use crate::errors::{CollaboratorError, EngineError};
    use crate::events::{
        CollectingEventSink, DOWNSTREAM_FAILED, PROCESSABLE_TRANSITIONED, SIDE_EFFECT_FAILED,
    };
    use crate::pipeline::{Pipeline, PipelineBuilder, ProcessableSpec};
    use crate::ports::{InMemoryPipelineStore, MockPipelineHook, MockTimer};
    use crate::processing::ProcessingEngine;
    use crate::testing::{
        assert_pipeline_status, assert_status, assert_statuses, statuses_by_name, ScenarioHarness,
    };
    use async_trait::async_trait;
    use pretty_assertions::assert_eq;
    use std::collections::BTreeMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use tokio_test::{assert_err, assert_ok};
    use std::time::Duration;
    use Status::*;

    fn snapshot(harness: &ScenarioHarness) -> Pipeline {
        harness.pipeline().unwrap()
    }

    #[tokio::test]
    async fn test_optional_manual_deploy_with_cleanup() {
        let pipeline = PipelineBuilder::new("ci")
            .stages(["build", "test", "deploy", "cleanup"])
            .job("compile", "build")
            .job("rspec", "test")
            .add(
                ProcessableSpec::job("production", "deploy")
                    .when(When::Manual)
                    .allow_failure(),
            )
            .add(ProcessableSpec::job("cleanup", "cleanup").when(When::Always))
            .build()
            .unwrap();
        let harness = ScenarioHarness::new(pipeline);

        harness.process().await.unwrap();
        harness.succeed("compile").await.unwrap();
        harness.succeed("rspec").await.unwrap();

        let pipeline = snapshot(&harness);
        assert_statuses(&pipeline, &[("production", Manual), ("cleanup", Pending)]);
        assert_pipeline_status(&pipeline, Running);

        harness.play("production").await.unwrap();
        harness.succeed("production").await.unwrap();
        harness.succeed("cleanup").await.unwrap();
        assert_pipeline_status(&snapshot(&harness), Success);
    }

    #[tokio::test]
    async fn test_blocking_manual_gates_later_stages() {
        let pipeline = PipelineBuilder::new("ci")
            .stages(["build", "approve", "release"])
            .job("compile", "build")
            .add(ProcessableSpec::job("approval", "approve").when(When::Manual))
            .job("publish", "release")
            .build()
            .unwrap();
        let harness = ScenarioHarness::new(pipeline);

        harness.process().await.unwrap();
        harness.succeed("compile").await.unwrap();
        let pipeline = snapshot(&harness);
        assert_statuses(&pipeline, &[("approval", Manual), ("publish", Created)]);
        assert_pipeline_status(&pipeline, Manual);

        harness.play("approval").await.unwrap();
        assert_status(&snapshot(&harness), "publish", Created);

        harness.succeed("approval").await.unwrap();
        assert_status(&snapshot(&harness), "publish", Pending);
    }

    #[tokio::test]
    async fn test_optional_manual_does_not_gate() {
        let pipeline = PipelineBuilder::new("ci")
            .stages(["build", "approve", "release"])
            .job("compile", "build")
            .add(
                ProcessableSpec::job("approval", "approve")
                    .when(When::Manual)
                    .allow_failure(),
            )
            .job("publish", "release")
            .build()
            .unwrap();
        let harness = ScenarioHarness::new(pipeline);

        harness.process().await.unwrap();
        harness.succeed("compile").await.unwrap();
        assert_statuses(
            &snapshot(&harness),
            &[("approval", Manual), ("publish", Pending)],
        );
    }

    #[tokio::test]
    async fn test_dag_job_without_needs_starts_immediately() {
        let pipeline = PipelineBuilder::new("ci")
            .stages(["build", "test"])
            .job("compile", "build")
            .add(ProcessableSpec::job("lint", "test").needs(Vec::<String>::new()))
            .build()
            .unwrap();
        let harness = ScenarioHarness::new(pipeline);

        harness.process().await.unwrap();
        assert_statuses(&snapshot(&harness), &[("compile", Pending), ("lint", Pending)]);
    }

    #[tokio::test]
    async fn test_failed_need_skips_dependent() {
        let pipeline = PipelineBuilder::new("ci")
            .stages(["build", "test"])
            .job("compile", "build")
            .add(ProcessableSpec::job("rspec", "test").needs(["compile"]))
            .build()
            .unwrap();
        let harness = ScenarioHarness::new(pipeline);

        harness.process().await.unwrap();
        harness.fail("compile").await.unwrap();

        let pipeline = snapshot(&harness);
        assert_status(&pipeline, "rspec", Skipped);
        assert_pipeline_status(&pipeline, Failed);
    }

    #[tokio::test]
    async fn test_allow_failure_keeps_stage_successful() {
        let pipeline = PipelineBuilder::new("ci")
            .stages(["test", "deploy"])
            .add(ProcessableSpec::job("flaky", "test").allow_failure())
            .job("rspec", "test")
            .job("release", "deploy")
            .build()
            .unwrap();
        let harness = ScenarioHarness::new(pipeline);

        harness.process().await.unwrap();
        harness.fail("flaky").await.unwrap();
        harness.succeed("rspec").await.unwrap();

        let pipeline = snapshot(&harness);
        assert_status(&pipeline, "release", Pending);
        assert_eq!(pipeline.stages()[0].status, Success);
    }

    #[tokio::test]
    async fn test_auto_retry_exposes_only_latest_attempt() {
        let pipeline = PipelineBuilder::new("ci")
            .stages(["build", "test"])
            .add(ProcessableSpec::job("compile", "build").retries(2))
            .add(ProcessableSpec::job("rspec", "test").needs(["compile"]))
            .build()
            .unwrap();
        let harness = ScenarioHarness::new(pipeline);

        harness.process().await.unwrap();
        harness.fail("compile").await.unwrap();
        assert_statuses(&snapshot(&harness), &[("compile", Pending), ("rspec", Created)]);

        harness.fail("compile").await.unwrap();
        harness.succeed("compile").await.unwrap();

        let pipeline = snapshot(&harness);
        assert_eq!(pipeline.len(), 4);
        let attempts: Vec<&Processable> = pipeline
            .latest()
            .filter(|p| p.name == "compile")
            .collect();
        assert_eq!(attempts.len(), 1);
        assert_eq!(attempts[0].status, Success);
        assert_eq!(attempts[0].retries_remaining, 0);

        let rspec = pipeline.latest_by_name("rspec").unwrap();
        assert_eq!(rspec.status, Pending);
        assert_eq!(pipeline.latest_of(rspec.needs[0]).unwrap().status, Success);
    }

    #[tokio::test]
    async fn test_exhausted_retries_fail_the_pipeline() {
        let pipeline = PipelineBuilder::new("ci")
            .stage("build")
            .add(ProcessableSpec::job("compile", "build").retries(1))
            .build()
            .unwrap();
        let harness = ScenarioHarness::new(pipeline);

        harness.process().await.unwrap();
        harness.fail("compile").await.unwrap();
        harness.fail("compile").await.unwrap();

        let pipeline = snapshot(&harness);
        assert_status(&pipeline, "compile", Failed);
        assert_pipeline_status(&pipeline, Failed);
    }

    #[tokio::test]
    async fn test_delayed_jobs_schedule_unschedule_and_enqueue() {
        let pipeline = PipelineBuilder::new("ci")
            .stage("deploy")
            .add(ProcessableSpec::job("rollout", "deploy").delayed(Duration::from_secs(1800)))
            .add(ProcessableSpec::job("canary", "deploy").delayed(Duration::from_secs(60)))
            .build()
            .unwrap();
        let harness = ScenarioHarness::new(pipeline);

        harness.process().await.unwrap();
        let pipeline = snapshot(&harness);
        assert_statuses(&pipeline, &[("rollout", Scheduled), ("canary", Scheduled)]);
        assert!(pipeline.latest_by_name("rollout").unwrap().scheduled_at.is_some());
        assert_eq!(harness.timer.pending().len(), 2);
        assert_eq!(harness.engine.delays().len(), 2);

        harness.unschedule("rollout").await.unwrap();
        assert_status(&snapshot(&harness), "rollout", Manual);
        assert_eq!(harness.timer.pending().len(), 1);

        harness.play("rollout").await.unwrap();
        assert_status(&snapshot(&harness), "rollout", Pending);

        harness.enqueue("canary").await.unwrap();
        assert_status(&snapshot(&harness), "canary", Pending);
        assert!(harness.engine.delays().is_empty());

        let err = harness.enqueue("canary").await.unwrap_err();
        assert!(matches!(err, EngineError::InvalidTransition(_)));
    }

    #[tokio::test]
    async fn test_play_scheduled_cancels_timer() {
        let pipeline = PipelineBuilder::new("ci")
            .stage("deploy")
            .add(ProcessableSpec::job("rollout", "deploy").delayed(Duration::from_secs(600)))
            .build()
            .unwrap();
        let harness = ScenarioHarness::new(pipeline);

        harness.process().await.unwrap();
        harness.play("rollout").await.unwrap();

        assert_status(&snapshot(&harness), "rollout", Pending);
        assert!(harness.timer.pending().is_empty());
        assert_eq!(harness.timer.callbacks().len(), 1);
    }

    #[tokio::test]
    async fn test_cancel_leaves_manual_and_allows_retry() {
        let pipeline = PipelineBuilder::new("ci")
            .stages(["build", "test"])
            .job("compile", "build")
            .add(
                ProcessableSpec::job("gate", "build")
                    .when(When::Manual)
                    .needs(Vec::<String>::new()),
            )
            .job("rspec", "test")
            .build()
            .unwrap();
        let harness = ScenarioHarness::new(pipeline);

        harness.process().await.unwrap();
        harness.cancel().await.unwrap();

        let pipeline = snapshot(&harness);
        assert_statuses(
            &pipeline,
            &[("compile", Canceled), ("gate", Manual), ("rspec", Canceled)],
        );
        assert_pipeline_status(&pipeline, Canceled);

        harness.retry("compile").await.unwrap();
        let pipeline = snapshot(&harness);
        assert_status(&pipeline, "compile", Pending);
        assert_pipeline_status(&pipeline, Running);
    }

    #[tokio::test]
    async fn test_retry_resets_skipped_dependents() {
        let pipeline = PipelineBuilder::new("ci")
            .stages(["build", "test", "deploy"])
            .job("compile", "build")
            .job("rspec", "test")
            .add(ProcessableSpec::job("release", "deploy").needs(["rspec"]))
            .build()
            .unwrap();
        let harness = ScenarioHarness::new(pipeline);

        harness.process().await.unwrap();
        harness.fail("compile").await.unwrap();
        assert_statuses(&snapshot(&harness), &[("rspec", Skipped), ("release", Skipped)]);

        harness.retry("compile").await.unwrap();
        assert_statuses(
            &snapshot(&harness),
            &[("compile", Pending), ("rspec", Created), ("release", Created)],
        );

        harness.succeed("compile").await.unwrap();
        harness.succeed("rspec").await.unwrap();
        assert_status(&snapshot(&harness), "release", Pending);
    }

    #[tokio::test]
    async fn test_play_resets_dependents_of_manual_need() {
        let pipeline = PipelineBuilder::new("ci")
            .stages(["build", "test"])
            .add(ProcessableSpec::job("gate", "build").when(When::Manual))
            .add(ProcessableSpec::job("rspec", "test").needs(["gate"]))
            .build()
            .unwrap();
        let harness = ScenarioHarness::new(pipeline);

        harness.process().await.unwrap();
        assert_statuses(&snapshot(&harness), &[("gate", Manual), ("rspec", Skipped)]);

        harness.play("gate").await.unwrap();
        assert_statuses(&snapshot(&harness), &[("gate", Pending), ("rspec", Created)]);

        harness.succeed("gate").await.unwrap();
        assert_status(&snapshot(&harness), "rspec", Pending);
    }

    #[tokio::test]
    async fn test_invalid_commands_do_not_mutate() {
        let pipeline = PipelineBuilder::new("ci")
            .stages(["build", "test"])
            .job("compile", "build")
            .job("rspec", "test")
            .build()
            .unwrap();
        let harness = ScenarioHarness::new(pipeline);
        harness.process().await.unwrap();
        let before = snapshot(&harness);

        assert!(matches!(
            harness.play("compile").await,
            Err(EngineError::InvalidTransition(_))
        ));
        assert!(matches!(
            harness.retry("compile").await,
            Err(EngineError::InvalidTransition(_))
        ));
        assert!(matches!(
            harness.unschedule("compile").await,
            Err(EngineError::InvalidTransition(_))
        ));
        assert!(matches!(
            harness.report("rspec", Success).await,
            Err(EngineError::InvalidTransition(_))
        ));
        assert!(matches!(
            harness.report("compile", Skipped).await,
            Err(EngineError::InvalidTransition(_))
        ));

        let after = snapshot(&harness);
        assert_eq!(after.generation(), before.generation());
        assert_eq!(statuses_by_name(&after), statuses_by_name(&before));
    }

    #[tokio::test]
    async fn test_bridge_matrix_and_creation_failure() {
        let matrix = Matrix::new().entry(MatrixEntry::new().var("STACK", ["app", "monitoring"]));
        let pipeline = PipelineBuilder::new("ci")
            .stages(["deploy", "verify"])
            .add(ProcessableSpec::bridge("deploy", "deploy").matrix(matrix))
            .job("smoke", "verify")
            .build()
            .unwrap();
        let downstream = InMemoryDownstreamCreator::new().fail_for("deploy: [monitoring]");
        let harness = ScenarioHarness::with_downstream(pipeline, EngineConfig::default(), downstream);

        harness.process().await.unwrap();
        assert_statuses(
            &snapshot(&harness),
            &[("deploy: [app]", Pending), ("deploy: [monitoring]", Pending)],
        );
        assert!(matches!(
            harness.report("deploy: [app]", Running).await,
            Err(EngineError::InvalidTransition(_))
        ));

        harness.trigger("deploy: [app]").await.unwrap();
        harness.trigger("deploy: [monitoring]").await.unwrap();

        let pipeline = snapshot(&harness);
        assert_statuses(
            &pipeline,
            &[
                ("deploy: [app]", Success),
                ("deploy: [monitoring]", Failed),
                ("smoke", Skipped),
            ],
        );
        assert_pipeline_status(&pipeline, Failed);

        let created = harness.downstream.created();
        assert_eq!(created.len(), 1);
        assert_eq!(
            created[0].variables,
            vec![("STACK".to_string(), "app".to_string())]
        );
        assert_eq!(harness.events.events_of_type(DOWNSTREAM_FAILED).len(), 1);

        assert!(matches!(
            harness.trigger("deploy: [app]").await,
            Err(EngineError::InvalidTransition(_))
        ));
    }

    async fn run_mixed_scenario(strategy: StrategyKind) -> (BTreeMap<String, Status>, Status) {
        let pipeline = PipelineBuilder::new("ci")
            .stages(["build", "test", "deploy"])
            .job("compile", "build")
            .add(ProcessableSpec::job("lint", "build").allow_failure())
            .add(ProcessableSpec::job("rspec", "test").needs(["compile"]))
            .add(ProcessableSpec::job("docs", "test").needs(Vec::<String>::new()))
            .job("release", "deploy")
            .add(ProcessableSpec::job("notify", "deploy").when(When::Always))
            .add(ProcessableSpec::job("rollback", "deploy").when(When::OnFailure))
            .build()
            .unwrap();
        let harness = ScenarioHarness::with_config(
            pipeline,
            EngineConfig::default().with_strategy(strategy),
        );

        harness.process().await.unwrap();
        harness.fail("lint").await.unwrap();
        harness.succeed("compile").await.unwrap();
        harness.succeed("docs").await.unwrap();
        harness.succeed("rspec").await.unwrap();
        harness.succeed("release").await.unwrap();
        harness.succeed("notify").await.unwrap();

        let pipeline = snapshot(&harness);
        (statuses_by_name(&pipeline), pipeline.status())
    }

    #[tokio::test]
    async fn test_legacy_and_atomic_reach_same_state() {
        let atomic = run_mixed_scenario(StrategyKind::Atomic).await;
        let legacy = run_mixed_scenario(StrategyKind::Legacy).await;

        assert_eq!(atomic, legacy);
        assert_eq!(atomic.1, Success);
        assert_eq!(atomic.0["rollback"], Skipped);
        assert_eq!(atomic.0["lint"], Failed);
    }

    #[tokio::test]
    async fn test_second_process_is_a_no_op() {
        let pipeline = PipelineBuilder::new("ci")
            .stages(["build", "test"])
            .job("compile", "build")
            .job("rspec", "test")
            .build()
            .unwrap();
        let harness = ScenarioHarness::new(pipeline);

        let first = harness.process().await.unwrap();
        let second = harness.process().await.unwrap();
        assert!(first.changed);
        assert!(!second.changed);
        assert_eq!(second.transitions, 0);
        assert_eq!(second.generation, first.generation);
    }

    #[tokio::test]
    async fn test_conflicts_are_retried_then_transient() {
        let pipeline = PipelineBuilder::new("ci")
            .stage("build")
            .job("compile", "build")
            .build()
            .unwrap();
        let config = EngineConfig::default()
            .with_conflict_backoff_ms(0)
            .with_max_commit_attempts(3);
        let harness = ScenarioHarness::with_config(pipeline, config);

        harness.store.inject_conflicts(3);
        let err = harness.process().await.unwrap_err();
        assert!(err.is_transient());
        assert_status(&snapshot(&harness), "compile", Created);

        harness.store.inject_conflicts(2);
        let result = harness.process().await.unwrap();
        assert!(result.changed);
        assert_status(&snapshot(&harness), "compile", Pending);
    }

    #[tokio::test]
    async fn test_cycle_fails_closed() {
        let mut pipeline = Pipeline::new("ci", vec!["test".to_string()]);
        let a = Processable::job("a", "test", 0);
        let b = Processable::job("b", "test", 0).with_needs([a.lineage]);
        pipeline.push(a.with_needs([b.lineage]));
        pipeline.push(b);
        let harness = ScenarioHarness::new(pipeline);

        let err = harness.process().await.unwrap_err();
        assert!(matches!(err, EngineError::GraphIntegrity(_)));
        assert_eq!(harness.store.commit_count(), 0);
    }

    #[tokio::test]
    async fn test_hook_failure_does_not_roll_back() {
        let pipeline = PipelineBuilder::new("ci")
            .stage("build")
            .job("compile", "build")
            .build()
            .unwrap();
        let store = Arc::new(InMemoryPipelineStore::new());
        let pipeline_id = store.insert(pipeline);
        let events = Arc::new(CollectingEventSink::new());

        let mut hook = MockPipelineHook::new();
        hook.expect_after_pass()
            .times(1)
            .returning(|_| Err(CollaboratorError::new("persistent_ref", "ref update failed")));

        let engine = ProcessingEngine::new(store.clone())
            .with_hook(Arc::new(hook))
            .with_event_sink(events.clone());

        let result = engine.process(pipeline_id).await.unwrap();
        assert!(result.changed);
        assert_status(&store.snapshot(pipeline_id).unwrap(), "compile", Pending);

        let failures = events.events_of_type(SIDE_EFFECT_FAILED);
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].str_field("collaborator"), Some("persistent_ref"));
    }

    #[tokio::test]
    async fn test_timer_failure_does_not_roll_back() {
        let pipeline = PipelineBuilder::new("ci")
            .stage("deploy")
            .add(ProcessableSpec::job("rollout", "deploy").delayed(Duration::from_secs(60)))
            .build()
            .unwrap();
        let store = Arc::new(InMemoryPipelineStore::new());
        let pipeline_id = store.insert(pipeline);
        let events = Arc::new(CollectingEventSink::new());

        let mut timer = MockTimer::new();
        timer
            .expect_schedule_callback()
            .times(1)
            .returning(|_, _| Err(CollaboratorError::new("timer", "scheduler unavailable")));

        let engine = ProcessingEngine::new(store.clone())
            .with_timer(Arc::new(timer))
            .with_event_sink(events.clone());

        engine.process(pipeline_id).await.unwrap();
        assert_status(&store.snapshot(pipeline_id).unwrap(), "rollout", Scheduled);
        assert!(engine.delays().is_empty());
        assert_eq!(events.events_of_type(SIDE_EFFECT_FAILED).len(), 1);
    }

    #[tokio::test]
    async fn test_transition_events() {
        let pipeline = PipelineBuilder::new("ci")
            .stages(["build", "test"])
            .job("compile", "build")
            .job("rspec", "test")
            .build()
            .unwrap();
        let harness = ScenarioHarness::new(pipeline);

        harness.process().await.unwrap();
        harness.succeed("compile").await.unwrap();

        let transitions = harness.events.events_of_type(PROCESSABLE_TRANSITIONED);
        let moves: Vec<(&str, &str)> = transitions
            .iter()
            .filter_map(|event| Some((event.str_field("name")?, event.str_field("to")?)))
            .collect();
        assert_eq!(
            moves,
            vec![
                ("compile", "pending"),
                ("compile", "running"),
                ("compile", "success"),
                ("rspec", "pending"),
            ]
        );
    }

    /// Counts every call and yields before answering, so racing callers
    /// interleave inside `create`.
    #[derive(Default)]
    struct CountingCreator {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl DownstreamPipelineCreator for CountingCreator {
        async fn create(&self, bridge: &Processable) -> Result<DownstreamPipeline, CollaboratorError> {
            tokio::task::yield_now().await;
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(DownstreamPipeline {
                id: PipelineId::new(),
                bridge: bridge.id,
                bridge_name: bridge.name.clone(),
                variables: Vec::new(),
            })
        }
    }

    fn bridge_pipeline() -> Pipeline {
        PipelineBuilder::new("ci")
            .stages(["deploy", "verify"])
            .add(ProcessableSpec::bridge("trigger", "deploy"))
            .job("smoke", "verify")
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn test_concurrent_triggers_create_one_downstream() {
        let store = Arc::new(InMemoryPipelineStore::new());
        let pipeline_id = store.insert(bridge_pipeline());
        let creator = Arc::new(CountingCreator::default());
        let engine = ProcessingEngine::new(store.clone()).with_downstream_creator(creator.clone());

        engine.process(pipeline_id).await.unwrap();
        let bridge = store
            .snapshot(pipeline_id)
            .unwrap()
            .latest_by_name("trigger")
            .unwrap()
            .id;

        let (first, second) = tokio::join!(
            engine.trigger_downstream(pipeline_id, bridge),
            engine.trigger_downstream(pipeline_id, bridge),
        );

        assert_eq!(creator.calls.load(Ordering::SeqCst), 1);
        assert_eq!(usize::from(first.is_ok()) + usize::from(second.is_ok()), 1);
        let rejected = if first.is_ok() { second } else { first };
        assert!(matches!(rejected, Err(EngineError::InvalidTransition(_))));

        let pipeline = store.snapshot(pipeline_id).unwrap();
        assert_statuses(&pipeline, &[("trigger", Success), ("smoke", Pending)]);
    }

    #[tokio::test]
    async fn test_lost_bridge_commit_reuses_downstream() {
        let config = EngineConfig::default()
            .with_max_commit_attempts(2)
            .with_conflict_backoff_ms(0);
        let harness = ScenarioHarness::with_config(bridge_pipeline(), config);
        harness.process().await.unwrap();

        harness.store.inject_conflicts(2);
        let err = assert_err!(harness.trigger("trigger").await);
        assert!(err.is_transient());
        assert_status(&snapshot(&harness), "trigger", Pending);
        assert_eq!(harness.downstream.created().len(), 1);

        assert_ok!(harness.trigger("trigger").await);
        assert_status(&snapshot(&harness), "trigger", Success);
        assert_eq!(harness.downstream.created().len(), 1);
    }

    fn fan_in_pipeline() -> Pipeline {
        PipelineBuilder::new("ci")
            .stages(["build", "test", "deploy"])
            .job("compile", "build")
            .job("assets", "build")
            .job("docs", "build")
            .job("rspec", "test")
            .add(ProcessableSpec::job("lint", "test").needs(["assets"]))
            .add(ProcessableSpec::job("notify", "deploy").when(When::OnFailure))
            .job("ship", "deploy")
            .build()
            .unwrap()
    }

    const REPORTS: [(&str, Status); 3] = [("compile", Success), ("assets", Success), ("docs", Failed)];

    async fn sequential_outcome() -> Pipeline {
        let harness = ScenarioHarness::new(fan_in_pipeline());
        harness.process().await.unwrap();
        for (name, status) in REPORTS {
            harness.report(name, status).await.unwrap();
        }
        snapshot(&harness)
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_calls_match_sequential_run() {
        let expected = sequential_outcome().await;

        for strategy in [StrategyKind::Atomic, StrategyKind::Legacy] {
            for lease in [true, false] {
                let config = EngineConfig::default()
                    .with_strategy(strategy)
                    .with_exclusive_lease(lease)
                    .with_max_commit_attempts(64)
                    .with_conflict_backoff_ms(1);
                let harness = ScenarioHarness::with_config(fan_in_pipeline(), config);
                harness.process().await.unwrap();

                let engine = Arc::new(harness.engine);
                let pipeline_id = harness.pipeline_id;
                let pipeline = harness.store.snapshot(pipeline_id).unwrap();
                let mut tasks = Vec::new();
                for (name, status) in REPORTS {
                    let id = pipeline.latest_by_name(name).unwrap().id;
                    let engine = Arc::clone(&engine);
                    tasks.push(tokio::spawn(async move {
                        engine.report_status(pipeline_id, id, status).await
                    }));
                }
                for _ in 0..4 {
                    let engine = Arc::clone(&engine);
                    tasks.push(tokio::spawn(async move { engine.process(pipeline_id).await }));
                }
                for task in tasks {
                    assert_ok!(task.await.unwrap());
                }

                let pipeline = harness.store.snapshot(pipeline_id).unwrap();
                assert_eq!(
                    statuses_by_name(&pipeline),
                    statuses_by_name(&expected),
                    "{strategy:?}, lease {lease}"
                );
                assert_eq!(pipeline.status(), expected.status());
                assert_eq!(pipeline.status(), pipeline.compute_status());
                assert_eq!(pipeline.stage_statuses(), pipeline.compute_stage_statuses().as_slice());
            }
        }
    }

    #[tokio::test]
    async fn test_command_stays_committed_when_pass_fails() {
        let mut pipeline = Pipeline::new("ci", vec!["test".to_string()]);
        let a = Processable::job("a", "test", 0);
        let b = Processable::job("b", "test", 0).with_needs([a.lineage]);
        pipeline.push(a.with_needs([b.lineage]));
        pipeline.push(b);
        let harness = ScenarioHarness::new(pipeline);

        let result = harness.cancel().await.unwrap();
        assert!(result.changed);
        assert_eq!(result.transitions, 2);
        assert_eq!(harness.store.commit_count(), 1);
        assert_statuses(&snapshot(&harness), &[("a", Canceled), ("b", Canceled)]);

        assert!(matches!(
            harness.process().await,
            Err(EngineError::GraphIntegrity(_))
        ));
    }
}
