//! History Encoder
//!
//! `encode(history_vectors [B, N, E], slot_mask [B, N]) -> [B, E]`
//!
//! Self-attention across the history slots with padded slots masked out,
//! residual addition, masked sum-pool across slots, then the projection
//! head. A user with no real history slot pools to the zero vector.

use crate::core::{from_candle_error, shape_errors, UnifiedResult};
use crate::model_architectures::config::{ForwardMode, ModelConfig};
use crate::model_architectures::embedding::{
    ensure_mask_dtype, masked_sum_pool, EncoderStackConfig, ProjectionHead, TransformerEncoder,
};
use crate::validation_error;
use candle_core::Tensor;
use candle_nn::VarBuilder;

#[derive(Debug, Clone)]
pub struct HistoryEncoder {
    transformer: TransformerEncoder,
    head: ProjectionHead,
    dim: usize,
}

impl HistoryEncoder {
    pub fn new(config: &ModelConfig, vb: VarBuilder) -> UnifiedResult<Self> {
        let stack = EncoderStackConfig {
            hidden_size: config.article_dim,
            num_heads: config.history_heads,
            ffn_dim: config.history_ffn_dim,
            num_layers: config.history_layers,
            dropout: config.dropout,
            layer_norm_eps: config.layer_norm_eps,
        };
        Ok(Self {
            transformer: TransformerEncoder::new(&stack, vb.pp("transformer"))?,
            head: ProjectionHead::new(
                vb.pp("postnet"),
                config.article_dim,
                config.history_ffn_dim,
                config.article_dim,
                config.dropout,
            )?,
            dim: config.article_dim,
        })
    }

    pub fn output_dim(&self) -> usize {
        self.dim
    }

    /// Pooled slot representations before the projection head, `[B, E]`
    pub fn pool(&self, history_vectors: &Tensor, slot_mask: &Tensor, mode: ForwardMode) -> UnifiedResult<Tensor> {
        ensure_mask_dtype("history slot mask", slot_mask)?;
        let (batch, slots, dim) = history_vectors
            .dims3()
            .map_err(|_| shape_errors::rank("history vectors", 3, history_vectors.dims()))?;
        if dim != self.dim {
            return Err(validation_error!("history vector dim", self.dim, dim));
        }
        if slot_mask.dims() != [batch, slots] {
            return Err(shape_errors::mismatch("history slot mask", &[batch, slots], slot_mask.dims()));
        }

        let attended = self
            .transformer
            .forward(history_vectors, slot_mask, mode.is_train())?;
        let residual = (history_vectors + attended)
            .map_err(|e| from_candle_error(e, "HistoryEncoder: residual", None))?;
        masked_sum_pool(&residual, slot_mask)
    }

    /// User vectors `[B, E]`
    pub fn forward(&self, history_vectors: &Tensor, slot_mask: &Tensor, mode: ForwardMode) -> UnifiedResult<Tensor> {
        let pooled = self.pool(history_vectors, slot_mask, mode)?;
        self.head.forward(&pooled, mode.is_train())
    }
}
