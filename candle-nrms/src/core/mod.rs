//! # Core Layer
//!
//! Errors, configuration loading and the tokenization adapter shared by
//! every other module.

pub mod config_loader;
pub mod tokenization;
pub mod unified_error;

pub use config_loader::{DataConfig, RunConfig, TokenizerSource, UnifiedConfigLoader};

pub use unified_error::{
    config_errors, from_candle_error, from_tokenizer_error, processing_errors, shape_errors,
    to_model_error, ConfigErrorType, ModelComponent, UnifiedError,
    UnifiedResult,
};

pub use tokenization::{HfTitleTokenizer, TitleTokenizer, TokenSequence, PAD_ID};

#[cfg(test)]
pub mod tokenization_test;
#[cfg(test)]
pub mod unified_error_test;
