//! Tracing setup and spans used by the engine.

use crate::core::PipelineId;
use tracing::Span;
use tracing_subscriber::{fmt, EnvFilter};

/// Installs a global `tracing` subscriber.
///
/// `filter` uses `EnvFilter` syntax (e.g. `"stagewise=debug"`); when `None`,
/// `RUST_LOG` is read and `info` is the fallback. With `json` set, events are
/// written as JSON lines.
///
/// Returns false if a global subscriber was already installed.
pub fn init_tracing(filter: Option<&str>, json: bool) -> bool {
    let filter = filter
        .map(EnvFilter::new)
        .or_else(|| EnvFilter::try_from_default_env().ok())
        .unwrap_or_else(|| EnvFilter::new("info"));

    let builder = fmt().with_env_filter(filter).with_target(true);
    if json {
        builder.json().try_init().is_ok()
    } else {
        builder.try_init().is_ok()
    }
}

/// Span covering one processing pass.
#[must_use]
pub fn pass_span(pipeline_id: PipelineId, strategy: &str) -> Span {
    tracing::info_span!("processing_pass", pipeline_id = %pipeline_id, strategy = %strategy)
}

/// Span covering one external command (play, retry, cancel, ...).
#[must_use]
pub fn command_span(pipeline_id: PipelineId, command: &str) -> Span {
    tracing::info_span!("pipeline_command", pipeline_id = %pipeline_id, command = %command)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_tracing_twice() {
        let _ = init_tracing(Some("stagewise=debug"), false);
        // A second global subscriber is refused instead of panicking.
        assert!(!init_tracing(None, true));
    }

    #[test]
    fn test_spans() {
        let id = PipelineId::new();
        let _pass = pass_span(id, "atomic").entered();
        let _command = command_span(id, "play").entered();
    }
}
