//! Article Encoder
//!
//! `encode(token_ids [T, L], padding_mask [T, L]) -> [T, article_dim]`
//!
//! ```text
//! token ids ─► word embedding ─► + sinusoidal position ─► x
//! x ─► transformer (key padding) ─► (+x) ─► masked sum-pool ─► projection head
//! ```
//!
//! A fully padded title pools to the zero vector before the projection head.

use crate::core::{from_candle_error, shape_errors, to_model_error, ModelComponent, UnifiedResult};
use crate::model_architectures::config::{ForwardMode, ModelConfig};
use crate::model_architectures::embedding::{
    ensure_mask_dtype, masked_sum_pool, EncoderStackConfig, ProjectionHead,
    SinusoidalPositionalEncoding, TransformerEncoder,
};
use crate::validation_error;
use candle_core::{DType, Tensor};
use candle_nn::{embedding, Embedding, Module, VarBuilder};

#[derive(Debug, Clone)]
pub struct ArticleEncoder {
    word_embedding: Embedding,
    positional: SinusoidalPositionalEncoding,
    transformer: TransformerEncoder,
    head: ProjectionHead,
    word_embed_dim: usize,
    article_dim: usize,
}

impl ArticleEncoder {
    pub fn new(config: &ModelConfig, vb: VarBuilder) -> UnifiedResult<Self> {
        let word_embedding = embedding(config.vocab_size, config.word_embed_dim, vb.pp("word_embedding"))
            .map_err(|e| to_model_error(e, ModelComponent::ArticleEncoder, "init word embedding"))?;
        let positional =
            SinusoidalPositionalEncoding::new(config.max_positions, config.word_embed_dim, vb.device())?;
        let stack = EncoderStackConfig {
            hidden_size: config.word_embed_dim,
            num_heads: config.article_heads,
            ffn_dim: config.article_ffn_dim,
            num_layers: config.article_layers,
            dropout: config.dropout,
            layer_norm_eps: config.layer_norm_eps,
        };
        let transformer = TransformerEncoder::new(&stack, vb.pp("transformer"))?;
        let head = ProjectionHead::new(
            vb.pp("postnet"),
            config.word_embed_dim,
            config.article_ffn_dim,
            config.article_dim,
            config.dropout,
        )?;
        Ok(Self {
            word_embedding,
            positional,
            transformer,
            head,
            word_embed_dim: config.word_embed_dim,
            article_dim: config.article_dim,
        })
    }

    pub fn output_dim(&self) -> usize {
        self.article_dim
    }

    /// Pooled token representations before the projection head, `[T, word_embed_dim]`
    pub fn pool(&self, token_ids: &Tensor, padding_mask: &Tensor, mode: ForwardMode) -> UnifiedResult<Tensor> {
        let (items, _seq_len) = check_token_inputs(token_ids, padding_mask)?;
        if items == 0 {
            return Tensor::zeros((0, self.word_embed_dim), DType::F32, token_ids.device())
                .map_err(|e| from_candle_error(e, "ArticleEncoder: empty pool", None));
        }

        let embedded = self
            .word_embedding
            .forward(token_ids)
            .map_err(|e| from_candle_error(e, "ArticleEncoder: embed tokens", None))?;
        let positioned = self.positional.forward(&embedded)?;
        let attended = self
            .transformer
            .forward(&positioned, padding_mask, mode.is_train())?;
        let residual = (positioned + attended)
            .map_err(|e| from_candle_error(e, "ArticleEncoder: residual", None))?;
        masked_sum_pool(&residual, padding_mask)
    }

    /// Article vectors `[T, article_dim]`
    pub fn forward(&self, token_ids: &Tensor, padding_mask: &Tensor, mode: ForwardMode) -> UnifiedResult<Tensor> {
        let pooled = self.pool(token_ids, padding_mask, mode)?;
        if pooled.dims()[0] == 0 {
            return Tensor::zeros((0, self.article_dim), DType::F32, pooled.device())
                .map_err(|e| from_candle_error(e, "ArticleEncoder: empty output", None));
        }
        self.head.forward(&pooled, mode.is_train())
    }
}

/// Validate an `(ids, mask)` pair of shape `[T, L]`, returning `(T, L)`
pub(crate) fn check_token_inputs(token_ids: &Tensor, padding_mask: &Tensor) -> UnifiedResult<(usize, usize)> {
    ensure_mask_dtype("article padding mask", padding_mask)?;
    if token_ids.dtype() != DType::U32 {
        return Err(validation_error!(
            "article token ids dtype",
            "U32",
            format!("{:?}", token_ids.dtype()),
            format!("{:?}", ModelComponent::ArticleEncoder)
        ));
    }
    let dims = token_ids
        .dims2()
        .map_err(|_| shape_errors::rank("article token ids", 2, token_ids.dims()))?;
    if padding_mask.dims() != token_ids.dims() {
        return Err(shape_errors::mismatch(
            "article padding mask",
            token_ids.dims(),
            padding_mask.dims(),
        ));
    }
    Ok(dims)
}
