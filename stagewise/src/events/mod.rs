//! Engine events.
//!
//! Events are emitted after commits. Sinks must not fail the caller.

mod sink;

pub use sink::{CollectingEventSink, EventSink, LoggingEventSink, NoOpEventSink, RecordedEvent};

/// A processable changed status.
pub const PROCESSABLE_TRANSITIONED: &str = "processable.transitioned";
/// A processing pass committed.
pub const PIPELINE_PROCESSED: &str = "pipeline.processed";
/// A timer, hook or similar collaborator failed after a commit.
pub const SIDE_EFFECT_FAILED: &str = "pipeline.side_effect_failed";
/// A bridge could not create its downstream pipeline.
pub const DOWNSTREAM_FAILED: &str = "bridge.downstream_failed";
/// A bridge created its downstream pipeline.
pub const DOWNSTREAM_CREATED: &str = "bridge.downstream_created";
