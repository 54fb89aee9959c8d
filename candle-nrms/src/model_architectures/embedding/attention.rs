//! Multi-Head Self-Attention with Key Padding
//!
//! Scaled dot-product self-attention over a padded sequence. Padded keys
//! receive a large negative additive bias, so no position can attend to
//! them. Padded queries still produce an output, but that output never
//! feeds into a real position.

use crate::core::{from_candle_error, shape_errors, UnifiedResult};
use crate::model_architectures::embedding::pooling::ensure_mask_dtype;
use crate::validation_error;
use candle_core::{DType, Tensor, D};
use candle_nn::{linear, Dropout, Linear, Module, VarBuilder};

/// Additive bias applied to padded keys
///
/// Finite rather than `-inf`, so a fully padded row softmaxes to a uniform
/// distribution instead of NaN.
pub const MASKED_SCORE: f64 = -1e9;

/// Convert a `[items, seq_len]` padding mask into a `[items, 1, 1, seq_len]` score bias
pub fn key_padding_bias(padding_mask: &Tensor, dtype: DType) -> UnifiedResult<Tensor> {
    ensure_mask_dtype("key padding mask", padding_mask)?;
    let (items, seq_len) = padding_mask
        .dims2()
        .map_err(|_| shape_errors::rank("key padding mask", 2, padding_mask.dims()))?;
    padding_mask
        .to_dtype(dtype)
        .and_then(|m| m.affine(MASKED_SCORE, 0.0))
        .and_then(|m| m.reshape((items, 1, 1, seq_len)))
        .map_err(|e| from_candle_error(e, "build key padding bias", None))
}

#[derive(Debug, Clone)]
pub struct MultiHeadSelfAttention {
    q_proj: Linear,
    k_proj: Linear,
    v_proj: Linear,
    out_proj: Linear,
    attn_dropout: Dropout,
    num_heads: usize,
    head_dim: usize,
    hidden_size: usize,
}

impl MultiHeadSelfAttention {
    pub fn new(
        hidden_size: usize,
        num_heads: usize,
        dropout: f32,
        vb: VarBuilder,
    ) -> UnifiedResult<Self> {
        if num_heads == 0 || hidden_size % num_heads != 0 {
            return Err(validation_error!(
                "attention heads",
                format!("a divisor of {}", hidden_size),
                num_heads
            ));
        }
        let proj = |name: &str| {
            linear(hidden_size, hidden_size, vb.pp(name))
                .map_err(|e| from_candle_error(e, "MultiHeadSelfAttention: init projection", Some(name)))
        };
        Ok(Self {
            q_proj: proj("q_proj")?,
            k_proj: proj("k_proj")?,
            v_proj: proj("v_proj")?,
            out_proj: proj("out_proj")?,
            attn_dropout: Dropout::new(dropout),
            num_heads,
            head_dim: hidden_size / num_heads,
            hidden_size,
        })
    }

    /// Self-attention over `[items, seq_len, hidden]`
    ///
    /// `key_bias` is the `[items, 1, 1, seq_len]` tensor from [`key_padding_bias`].
    pub fn forward(
        &self,
        hidden_states: &Tensor,
        key_bias: Option<&Tensor>,
        train: bool,
    ) -> UnifiedResult<Tensor> {
        let (items, seq_len, hidden) = hidden_states
            .dims3()
            .map_err(|_| shape_errors::rank("attention input", 3, hidden_states.dims()))?;
        if hidden != self.hidden_size {
            return Err(validation_error!("attention input dim", self.hidden_size, hidden));
        }

        let split_heads = |proj: &Linear, name: &str| -> UnifiedResult<Tensor> {
            proj.forward(hidden_states)
                .and_then(|t| t.reshape((items, seq_len, self.num_heads, self.head_dim)))
                .and_then(|t| t.transpose(1, 2))
                .and_then(|t| t.contiguous())
                .map_err(|e| from_candle_error(e, "MultiHeadSelfAttention: project heads", Some(name)))
        };
        let q = split_heads(&self.q_proj, "q")?;
        let k = split_heads(&self.k_proj, "k")?;
        let v = split_heads(&self.v_proj, "v")?;

        // [items, heads, seq_len, seq_len]
        let scale = (self.head_dim as f64).sqrt();
        let k_t = k
            .transpose(2, 3)
            .and_then(|t| t.contiguous())
            .map_err(|e| from_candle_error(e, "MultiHeadSelfAttention: transpose K", None))?;
        let mut scores = q
            .matmul(&k_t)
            .and_then(|s| s / scale)
            .map_err(|e| from_candle_error(e, "MultiHeadSelfAttention: Q @ K^T", None))?;

        if let Some(bias) = key_bias {
            scores = scores
                .broadcast_add(bias)
                .map_err(|e| from_candle_error(e, "MultiHeadSelfAttention: apply key padding", None))?;
        }

        let weights = candle_nn::ops::softmax(&scores, D::Minus1)
            .map_err(|e| from_candle_error(e, "MultiHeadSelfAttention: softmax", None))?;
        let weights = self
            .attn_dropout
            .forward(&weights, train)
            .map_err(|e| from_candle_error(e, "MultiHeadSelfAttention: attention dropout", None))?;

        let context = weights
            .matmul(&v)
            .and_then(|c| c.transpose(1, 2))
            .and_then(|c| c.reshape((items, seq_len, self.hidden_size)))
            .map_err(|e| from_candle_error(e, "MultiHeadSelfAttention: merge heads", None))?;

        self.out_proj
            .forward(&context)
            .map_err(|e| from_candle_error(e, "MultiHeadSelfAttention: output projection", None))
    }
}
