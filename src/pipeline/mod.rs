//! Persona rewrite pipelines
//!
//! A pipeline is the ordered step chain for one persona. Steps stream their
//! replies to the configured sink and accumulate into the pipeline state.

mod builder;
mod sink;
mod state;
mod step;

pub use builder::{build_pipeline, Pipeline};
pub use sink::SinkTarget;
pub use step::StepContext;
