//! # Model Architectures
//!
//! The article encoder, the history encoder and the dual-encoder scorer
//! built from them.

pub mod config;
pub mod embedding;
pub mod news_encoder;
pub mod nrms;
pub mod user_encoder;

pub use config::{DevicePreference, ForwardMode, ModelConfig};
pub use news_encoder::ArticleEncoder;
pub use nrms::{HistoryTokens, NrmsModel, ScoringRequest};
pub use user_encoder::HistoryEncoder;
