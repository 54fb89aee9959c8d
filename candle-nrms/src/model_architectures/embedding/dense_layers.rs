//! Dense Layers and the Projection Head
//!
//! Both encoders end in the same two-layer projection network applied to
//! the pooled vector:
//!
//! ```text
//! pooled [items, in]
//!     ↓
//! Dense 1: in → hidden (expansion, GELU)
//!     ↓
//! Dropout (train mode only)
//!     ↓
//! Dense 2: hidden → out (projection, Identity)
//!     ↓
//! vector [items, out]
//! ```
//!
//! Dense layers carry a bias. Weights are created through a `VarBuilder`
//! backed by the model's `VarMap`, so they are trainable and checkpointed.

use crate::core::{from_candle_error, UnifiedError, UnifiedResult};
use candle_core::Tensor;
use candle_nn::{linear, Dropout, Linear, Module, VarBuilder};

/// Activation function for dense layers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DenseActivation {
    /// f(x) = x
    Identity,
    /// Exact (erf-based) GELU
    Gelu,
}

impl DenseActivation {
    /// Apply activation function to tensor
    pub fn apply(&self, input: &Tensor) -> UnifiedResult<Tensor> {
        match self {
            DenseActivation::Identity => Ok(input.clone()),
            DenseActivation::Gelu => input
                .gelu_erf()
                .map_err(|e| from_candle_error(e, "gelu activation", None)),
        }
    }
}

/// Dense linear layer with activation
///
/// - Input: `[..., in_features]`
/// - Linear: weight `[out_features, in_features]`, bias `[out_features]`
/// - Output: `[..., out_features]`
#[derive(Debug, Clone)]
pub struct DenseLayer {
    pub(crate) linear: Linear,
    pub(crate) activation: DenseActivation,
    pub(crate) in_features: usize,
    pub(crate) out_features: usize,
}

impl DenseLayer {
    /// Create (or fetch from `vb`) a dense layer's weights
    pub fn new(
        vb: VarBuilder,
        in_features: usize,
        out_features: usize,
        activation: DenseActivation,
    ) -> UnifiedResult<Self> {
        let linear = linear(in_features, out_features, vb)
            .map_err(|e| from_candle_error(e, "init dense layer", None))?;
        Ok(Self {
            linear,
            activation,
            in_features,
            out_features,
        })
    }

    /// Forward pass through dense layer
    ///
    /// # Errors
    /// - Validation error if `input.dim(-1) != in_features`
    pub fn forward(&self, input: &Tensor) -> UnifiedResult<Tensor> {
        let input_shape = input.dims();
        let input_dim = input_shape.last().copied().unwrap_or(0);
        if input_dim != self.in_features {
            return Err(UnifiedError::Validation {
                field: "input dimension".to_string(),
                expected: self.in_features.to_string(),
                actual: input_dim.to_string(),
                context: Some(format!(
                    "Dense layer expects input dimension {}, got {}",
                    self.in_features, input_dim
                )),
            });
        }

        let output = self
            .linear
            .forward(input)
            .map_err(|e| from_candle_error(e, "dense forward", None))?;

        self.activation.apply(&output)
    }

    pub fn in_features(&self) -> usize {
        self.in_features
    }

    pub fn out_features(&self) -> usize {
        self.out_features
    }
}

/// Two-layer projection applied after pooling
#[derive(Debug, Clone)]
pub struct ProjectionHead {
    pub(crate) expand: DenseLayer,
    pub(crate) dropout: Dropout,
    pub(crate) project: DenseLayer,
}

impl ProjectionHead {
    pub fn new(
        vb: VarBuilder,
        in_features: usize,
        hidden_features: usize,
        out_features: usize,
        dropout: f32,
    ) -> UnifiedResult<Self> {
        Ok(Self {
            expand: DenseLayer::new(vb.pp("expand"), in_features, hidden_features, DenseActivation::Gelu)?,
            dropout: Dropout::new(dropout),
            project: DenseLayer::new(
                vb.pp("project"),
                hidden_features,
                out_features,
                DenseActivation::Identity,
            )?,
        })
    }

    /// `[items, in] → [items, out]`
    pub fn forward(&self, pooled: &Tensor, train: bool) -> UnifiedResult<Tensor> {
        let expanded = self.expand.forward(pooled)?;
        let expanded = self
            .dropout
            .forward(&expanded, train)
            .map_err(|e| from_candle_error(e, "projection dropout", None))?;
        self.project.forward(&expanded)
    }

    pub fn in_features(&self) -> usize {
        self.expand.in_features()
    }

    pub fn out_features(&self) -> usize {
        self.project.out_features()
    }
}
