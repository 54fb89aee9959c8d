//! Encoder Building Blocks
//!
//! Layers shared by the article and history encoders.
//!
//! ## Module Structure
//! - `positional`: deterministic sinusoidal position table
//! - `attention`: multi-head self-attention with key padding bias
//! - `encoder_layer`: post-norm transformer layer and layer stack
//! - `pooling`: masked sum pooling and history slot masks
//! - `dense_layers`: dense layers and the two-layer projection head
//!
//! All padding masks are `U8` with `1 = padding`.

pub mod attention;
pub mod dense_layers;
pub mod encoder_layer;
pub mod pooling;
pub mod positional;

pub use attention::{key_padding_bias, MultiHeadSelfAttention, MASKED_SCORE};
pub use dense_layers::{DenseActivation, DenseLayer, ProjectionHead};
pub use encoder_layer::{EncoderLayerNorm, EncoderStackConfig, TransformerEncoder, TransformerEncoderLayer};
pub use pooling::{derive_slot_mask, ensure_mask_dtype, masked_sum_pool};
pub use positional::SinusoidalPositionalEncoding;

#[cfg(test)]
mod positional_test;
