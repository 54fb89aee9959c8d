//! # candle-nrms
//!
//! NRMS news recommendation on candle: an article encoder and a history
//! encoder whose output vectors are compared by dot product.
//!
//! - [`data`] turns MIND-style news and behaviors tables into padded,
//!   masked training batches
//! - [`model_architectures`] holds the two encoders and the scoring modes
//! - [`training`] runs the fit loop with warmup scheduling, clipping and
//!   checkpoints
//! - [`serving`] ranks request-time candidates against a user's history

pub mod core;
pub mod data;
pub mod model_architectures;
pub mod serving;
pub mod training;

// Test fixtures (only compiled in test builds)
#[cfg(test)]
pub mod test_fixtures;

pub use crate::core::{RunConfig, UnifiedError, UnifiedResult};
pub use data::{BatchAssembler, NrmsBatch, Sample, SampleBuilder, SampleLoader};
pub use model_architectures::{ForwardMode, ModelConfig, NrmsModel, ScoringRequest};
pub use serving::{CandidateArticle, Ranking, RecommenderContext, ServingConfig};
pub use training::{CheckpointManager, Trainer, TrainingConfig, TrainingReport};
