//! Pipeline graph: the in-memory model, its builder and the integrity check.

mod builder;
pub mod integrity;
mod model;

pub use builder::{PipelineBuilder, ProcessableSpec};
pub use integrity::verify;
pub use model::{Pipeline, StageView};
