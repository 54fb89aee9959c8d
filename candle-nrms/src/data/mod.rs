//! # Data Pipeline
//!
//! Source tables → fixed-schema [`Sample`]s → padded [`NrmsBatch`] tensors.

pub mod batch;
pub mod sample_builder;

pub use batch::{BatchAssembler, NrmsBatch, PaddedTokens, SampleLoader, MASK_DTYPE};
pub use sample_builder::{
    read_news_records, ImpressionRecord, LoadStats, NewsIndex, NewsRecord, Sample, SampleBuilder,
};
