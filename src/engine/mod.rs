//! Inference engine.
//!
//! - Sampler for token sampling
//! - Qwen3Generator for producing reasoning trajectories locally

pub mod generator;
pub mod sampler;

pub use generator::Qwen3Generator;
pub use sampler::Sampler;
