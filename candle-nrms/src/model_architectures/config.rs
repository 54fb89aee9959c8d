//! Model Configuration
//!
//! A single configuration struct for the dual encoder. Every field is named
//! and defaulted, so a partial JSON document deserializes into a complete
//! configuration.

use crate::core::{config_errors, UnifiedError};
use candle_core::Device;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

/// Hyper-parameters for the article encoder, history encoder and scorer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    /// Size of the token vocabulary
    pub vocab_size: usize,
    /// Word embedding dimension (attention width inside the article encoder)
    pub word_embed_dim: usize,
    /// Article vector dimension, also the user vector dimension
    pub article_dim: usize,
    /// Attention heads in the article encoder
    pub article_heads: usize,
    /// Attention heads in the history encoder
    pub history_heads: usize,
    /// Hidden width of the article encoder feed-forward blocks
    pub article_ffn_dim: usize,
    /// Hidden width of the history encoder feed-forward blocks
    pub history_ffn_dim: usize,
    /// Number of self-attention layers in the article encoder
    pub article_layers: usize,
    /// Number of self-attention layers in the history encoder
    pub history_layers: usize,
    /// Dropout probability (train mode only)
    pub dropout: f32,
    /// Maximum sequence length covered by the positional table
    pub max_positions: usize,
    /// LayerNorm epsilon inside the encoder layers
    pub layer_norm_eps: f64,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            vocab_size: 30522,
            word_embed_dim: 128,
            article_dim: 256,
            article_heads: 8,
            history_heads: 8,
            article_ffn_dim: 512,
            history_ffn_dim: 512,
            article_layers: 1,
            history_layers: 1,
            dropout: 0.1,
            max_positions: 100,
            layer_norm_eps: 1e-5,
        }
    }
}

impl ModelConfig {
    /// Validate dimensions before any weights are allocated
    pub fn validate(&self) -> Result<(), UnifiedError> {
        let positive = [
            ("vocab_size", self.vocab_size),
            ("word_embed_dim", self.word_embed_dim),
            ("article_dim", self.article_dim),
            ("article_heads", self.article_heads),
            ("history_heads", self.history_heads),
            ("article_ffn_dim", self.article_ffn_dim),
            ("history_ffn_dim", self.history_ffn_dim),
            ("max_positions", self.max_positions),
        ];
        for (field, value) in positive {
            if value == 0 {
                return Err(config_errors::invalid_value(field, "must be greater than 0"));
            }
        }

        if self.word_embed_dim % self.article_heads != 0 {
            return Err(config_errors::invalid_value(
                "article_heads",
                &format!(
                    "word_embed_dim {} is not divisible by {} heads",
                    self.word_embed_dim, self.article_heads
                ),
            ));
        }

        if self.article_dim % self.history_heads != 0 {
            return Err(config_errors::invalid_value(
                "history_heads",
                &format!(
                    "article_dim {} is not divisible by {} heads",
                    self.article_dim, self.history_heads
                ),
            ));
        }

        if !(0.0..1.0).contains(&self.dropout) {
            return Err(config_errors::invalid_value(
                "dropout",
                &format!("{} is outside [0, 1)", self.dropout),
            ));
        }

        Ok(())
    }
}

/// Device preference for model execution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum DevicePreference {
    /// Force CPU usage
    Cpu,
    /// Require the first CUDA device
    Cuda,
    /// CUDA when available, otherwise CPU
    #[default]
    Auto,
}

impl DevicePreference {
    /// Resolve the preference into a concrete candle device
    pub fn resolve(self) -> Result<Device, UnifiedError> {
        match self {
            DevicePreference::Cpu => Ok(Device::Cpu),
            DevicePreference::Cuda => Device::new_cuda(0)
                .map_err(|e| crate::core::from_candle_error(e, "open CUDA device", None)),
            DevicePreference::Auto => match Device::cuda_if_available(0) {
                Ok(device) => {
                    if device.is_cuda() {
                        info!("Using CUDA device 0");
                    }
                    Ok(device)
                }
                Err(e) => {
                    warn!("CUDA device init failed ({}), falling back to CPU", e);
                    Ok(Device::Cpu)
                }
            },
        }
    }
}

/// Whether stochastic regularization is active for a forward pass
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ForwardMode {
    /// Dropout enabled
    Train,
    /// Dropout disabled; scoring is deterministic for fixed parameters
    #[default]
    Eval,
}

impl ForwardMode {
    pub fn is_train(self) -> bool {
        matches!(self, ForwardMode::Train)
    }
}
