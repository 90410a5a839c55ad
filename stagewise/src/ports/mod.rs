//! Ports to external collaborators: storage, timers and post-pass hooks.

mod hooks;
mod store;
mod timer;

pub use hooks::{NoOpHook, PipelineHook};
pub use store::{CommitOutcome, InMemoryPipelineStore, PipelineStore};
pub use timer::{CancelToken, InMemoryTimer, NoOpTimer, ScheduledCallback, Timer};

#[cfg(test)]
pub use hooks::MockPipelineHook;
#[cfg(test)]
pub use timer::MockTimer;
