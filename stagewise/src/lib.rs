//! # Stagewise
//!
//! Status propagation and scheduling for staged CI pipelines.
//!
//! A pipeline is a set of processables (jobs and bridges) grouped into
//! ordered stages. Whenever something changes, the engine runs a pass that
//! decides which `created` processables may start, which must wait for a
//! human, which are delayed and which are skipped, and then refreshes the
//! stage and pipeline composite statuses:
//!
//! - **Stage and DAG scheduling**: processables depend on every earlier stage,
//!   or only on their declared needs
//! - **Trigger policies**: `on_success`, `on_failure`, `always`, `manual`
//!   and `delayed`
//! - **Retries**: automatic and manual, each as a new attempt that supersedes
//!   the previous one
//! - **Concurrency**: generation-checked commits, retried on conflict
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use stagewise::prelude::*;
//!
//! let pipeline = PipelineBuilder::new("ci")
//!     .stages(["build", "test"])
//!     .job("compile", "build")
//!     .add(ProcessableSpec::job("rspec", "test").needs(["compile"]))
//!     .build()?;
//!
//! let store = Arc::new(InMemoryPipelineStore::new());
//! let pipeline_id = store.insert(pipeline);
//! let engine = ProcessingEngine::new(store);
//! let result = engine.process(pipeline_id).await?;
//! ```

#![forbid(unsafe_code)]
#![warn(
    clippy::all,
    clippy::pedantic,
    missing_docs,
    rust_2018_idioms
)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc
)]

pub mod bridge;
pub mod composite;
pub mod config;
pub mod core;
pub mod delay;
pub mod eligibility;
pub mod errors;
pub mod events;
pub mod observability;
pub mod pipeline;
pub mod ports;
pub mod processing;
pub mod retry;
pub mod testing;
pub mod utils;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::bridge::{
        DownstreamPipeline, DownstreamPipelineCreator, InMemoryDownstreamCreator, Matrix,
        MatrixEntry,
    };
    pub use crate::composite::{compose_status, Composite};
    pub use crate::config::{EngineConfig, StrategyKind};
    pub use crate::core::{
        PipelineId, Processable, ProcessableId, ProcessableKind, SchedulingType, Status,
        StatusChange, When,
    };
    pub use crate::errors::{
        CollaboratorError, ContractErrorInfo, EngineError, GraphIntegrityError,
        InvalidTransitionError, PipelineValidationError,
    };
    pub use crate::events::{
        CollectingEventSink, EventSink, LoggingEventSink, NoOpEventSink, RecordedEvent,
    };
    pub use crate::pipeline::{Pipeline, PipelineBuilder, ProcessableSpec};
    pub use crate::ports::{
        CommitOutcome, InMemoryPipelineStore, InMemoryTimer, NoOpTimer, PipelineHook,
        PipelineStore, Timer,
    };
    pub use crate::processing::{
        run_pass, PassOptions, ProcessingEngine, ProcessingResult, ProcessingStrategy,
    };
    pub use crate::utils::{now, Timestamp};
    pub use std::sync::Arc;
}
