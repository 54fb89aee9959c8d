//! Sinusoidal Positional Encoding
//!
//! Deterministic, non-learned position signal added to word embeddings.
//! Even dimensions carry `sin(pos / 10000^(2i/d))`, odd dimensions the
//! matching cosine. The table is built once up to `max_len` and sliced to
//! the actual sequence length on every call.

use crate::core::{from_candle_error, shape_errors, UnifiedResult};
use crate::validation_error;
use candle_core::{Device, Tensor};

#[derive(Debug, Clone)]
pub struct SinusoidalPositionalEncoding {
    /// `[max_len, dim]`
    table: Tensor,
    max_len: usize,
    dim: usize,
}

impl SinusoidalPositionalEncoding {
    pub fn new(max_len: usize, dim: usize, device: &Device) -> UnifiedResult<Self> {
        let table = Tensor::from_vec(sinusoid_table(max_len, dim), (max_len, dim), device)
            .map_err(|e| from_candle_error(e, "build positional table", None))?;
        Ok(Self {
            table,
            max_len,
            dim,
        })
    }

    pub fn max_len(&self) -> usize {
        self.max_len
    }

    /// The `[max_len, dim]` table
    pub fn table(&self) -> &Tensor {
        &self.table
    }

    /// Add position signal to `xs` of shape `[items, seq_len, dim]`
    pub fn forward(&self, xs: &Tensor) -> UnifiedResult<Tensor> {
        let (_items, seq_len, dim) = xs
            .dims3()
            .map_err(|_| shape_errors::rank("positional input", 3, xs.dims()))?;
        if dim != self.dim {
            return Err(validation_error!("positional input dim", self.dim, dim));
        }
        if seq_len > self.max_len {
            return Err(validation_error!(
                "sequence length",
                format!("<= {}", self.max_len),
                seq_len,
                "positional table is precomputed up to max_positions"
            ));
        }
        let slice = self
            .table
            .narrow(0, 0, seq_len)
            .and_then(|t| t.to_dtype(xs.dtype()))
            .map_err(|e| from_candle_error(e, "slice positional table", None))?;
        xs.broadcast_add(&slice)
            .map_err(|e| from_candle_error(e, "add positional encoding", None))
    }
}

fn sinusoid_table(max_len: usize, dim: usize) -> Vec<f32> {
    let mut table = vec![0f32; max_len * dim];
    let scale = -(10000f64.ln()) / dim as f64;
    for pos in 0..max_len {
        for pair in (0..dim).step_by(2) {
            let angle = pos as f64 * (pair as f64 * scale).exp();
            table[pos * dim + pair] = angle.sin() as f32;
            if pair + 1 < dim {
                table[pos * dim + pair + 1] = angle.cos() as f32;
            }
        }
    }
    table
}
