//! Bridges: processables that trigger downstream pipelines.
//!
//! Matrix expansion happens at build time; completion goes through a
//! [`DownstreamPipelineCreator`].

mod downstream;
pub mod matrix;

pub use downstream::{DownstreamPipeline, DownstreamPipelineCreator, InMemoryDownstreamCreator};
pub use matrix::{expand, Matrix, MatrixEntry, MatrixInstance, MAX_MATRIX_INSTANCES};
