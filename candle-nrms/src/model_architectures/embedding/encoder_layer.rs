//! Transformer Encoder Layers
//!
//! Post-norm encoder layer, matching the classic layout:
//!
//! ```text
//! x ─► self-attention ─► dropout ─► (+x) ─► LayerNorm ─► h
//! h ─► Linear ─► GELU ─► dropout ─► Linear ─► dropout ─► (+h) ─► LayerNorm
//! ```

use crate::core::{from_candle_error, UnifiedResult};
use crate::model_architectures::embedding::attention::{key_padding_bias, MultiHeadSelfAttention};
use candle_core::{Tensor, D};
use candle_nn::{linear, Dropout, Init, Linear, Module, VarBuilder};

/// Shape parameters for one encoder stack
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EncoderStackConfig {
    pub hidden_size: usize,
    pub num_heads: usize,
    pub ffn_dim: usize,
    pub num_layers: usize,
    pub dropout: f32,
    pub layer_norm_eps: f64,
}

/// Layer normalization over the last dimension
///
/// Built from primitive tensor ops; the fused candle kernel has no backward pass.
#[derive(Debug, Clone)]
pub struct EncoderLayerNorm {
    weight: Tensor,
    bias: Tensor,
    eps: f64,
}

impl EncoderLayerNorm {
    pub fn new(size: usize, eps: f64, vb: VarBuilder) -> candle_core::Result<Self> {
        Ok(Self {
            weight: vb.get_with_hints(size, "weight", Init::Const(1.0))?,
            bias: vb.get_with_hints(size, "bias", Init::Const(0.0))?,
            eps,
        })
    }

    pub fn forward(&self, xs: &Tensor) -> candle_core::Result<Tensor> {
        let mean = xs.mean_keepdim(D::Minus1)?;
        let centered = xs.broadcast_sub(&mean)?;
        let variance = centered.sqr()?.mean_keepdim(D::Minus1)?;
        let std = (variance + self.eps)?.sqrt()?;
        centered
            .broadcast_div(&std)?
            .broadcast_mul(&self.weight)?
            .broadcast_add(&self.bias)
    }
}

#[derive(Debug, Clone)]
pub struct TransformerEncoderLayer {
    self_attn: MultiHeadSelfAttention,
    linear1: Linear,
    linear2: Linear,
    norm1: EncoderLayerNorm,
    norm2: EncoderLayerNorm,
    dropout: Dropout,
}

impl TransformerEncoderLayer {
    pub fn new(config: &EncoderStackConfig, vb: VarBuilder) -> UnifiedResult<Self> {
        let self_attn = MultiHeadSelfAttention::new(
            config.hidden_size,
            config.num_heads,
            config.dropout,
            vb.pp("self_attn"),
        )?;
        let linear1 = linear(config.hidden_size, config.ffn_dim, vb.pp("linear1"))
            .map_err(|e| from_candle_error(e, "TransformerEncoderLayer: init linear1", None))?;
        let linear2 = linear(config.ffn_dim, config.hidden_size, vb.pp("linear2"))
            .map_err(|e| from_candle_error(e, "TransformerEncoderLayer: init linear2", None))?;
        let norm1 = EncoderLayerNorm::new(config.hidden_size, config.layer_norm_eps, vb.pp("norm1"))
            .map_err(|e| from_candle_error(e, "TransformerEncoderLayer: init norm1", None))?;
        let norm2 = EncoderLayerNorm::new(config.hidden_size, config.layer_norm_eps, vb.pp("norm2"))
            .map_err(|e| from_candle_error(e, "TransformerEncoderLayer: init norm2", None))?;
        Ok(Self {
            self_attn,
            linear1,
            linear2,
            norm1,
            norm2,
            dropout: Dropout::new(config.dropout),
        })
    }

    pub fn forward(&self, xs: &Tensor, key_bias: Option<&Tensor>, train: bool) -> UnifiedResult<Tensor> {
        let attn = self.self_attn.forward(xs, key_bias, train)?;
        let hidden = self
            .dropout
            .forward(&attn, train)
            .and_then(|a| xs + a)
            .and_then(|h| self.norm1.forward(&h))
            .map_err(|e| from_candle_error(e, "TransformerEncoderLayer: attention block", None))?;

        let ffn = self
            .linear1
            .forward(&hidden)
            .and_then(|h| h.gelu_erf())
            .and_then(|h| self.dropout.forward(&h, train))
            .and_then(|h| self.linear2.forward(&h))
            .and_then(|h| self.dropout.forward(&h, train))
            .map_err(|e| from_candle_error(e, "TransformerEncoderLayer: feed-forward", None))?;

        (hidden + ffn)
            .and_then(|h| self.norm2.forward(&h))
            .map_err(|e| from_candle_error(e, "TransformerEncoderLayer: output norm", None))
    }
}

/// A stack of [`TransformerEncoderLayer`]s sharing one key padding mask
#[derive(Debug, Clone)]
pub struct TransformerEncoder {
    layers: Vec<TransformerEncoderLayer>,
}

impl TransformerEncoder {
    pub fn new(config: &EncoderStackConfig, vb: VarBuilder) -> UnifiedResult<Self> {
        let layers = (0..config.num_layers)
            .map(|i| TransformerEncoderLayer::new(config, vb.pp(format!("layers.{}", i))))
            .collect::<UnifiedResult<Vec<_>>>()?;
        Ok(Self { layers })
    }

    pub fn num_layers(&self) -> usize {
        self.layers.len()
    }

    /// Encode `[items, seq_len, hidden]` under a `[items, seq_len]` padding mask (1 = padding)
    pub fn forward(&self, xs: &Tensor, padding_mask: &Tensor, train: bool) -> UnifiedResult<Tensor> {
        let bias = key_padding_bias(padding_mask, xs.dtype())?;
        let mut hidden = xs.clone();
        for layer in &self.layers {
            hidden = layer.forward(&hidden, Some(&bias), train)?;
        }
        Ok(hidden)
    }
}
