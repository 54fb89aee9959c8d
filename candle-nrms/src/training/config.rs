//! Training loop configuration

use crate::core::{config_errors, UnifiedError};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Which candidate representation the trainer scores against
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum TrainTarget {
    /// Candidate article titles
    #[default]
    Titles,
    /// Candidate article categories (requires samples built with topics)
    Topics,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainingConfig {
    pub batch_size: usize,
    pub epochs: usize,
    /// Peak learning rate reached at the end of warmup
    pub learning_rate: f64,
    /// Fraction of total steps spent ramping the learning rate up
    pub warmup_fraction: f64,
    /// Ceiling on the global gradient L2 norm
    pub grad_clip_norm: f64,
    /// Save a partial-epoch checkpoint every this many steps (0 disables)
    pub checkpoint_interval: usize,
    /// EWMA smoothing factor for monitored loss and MRR
    pub ewma_alpha: f64,
    /// Emit smoothed metrics every this many steps
    pub log_interval: usize,
    pub weight_decay: f64,
    pub beta1: f64,
    pub beta2: f64,
    pub eps: f64,
    /// Seed for the shuffling RNG
    pub seed: u64,
    pub checkpoint_dir: PathBuf,
    pub target: TrainTarget,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            batch_size: 6,
            epochs: 5,
            learning_rate: 1e-4,
            warmup_fraction: 0.1,
            grad_clip_norm: 1.0,
            checkpoint_interval: 1000,
            ewma_alpha: 0.8,
            log_interval: 100,
            weight_decay: 1e-4,
            beta1: 0.9,
            beta2: 0.999,
            eps: 1e-8,
            seed: 42,
            checkpoint_dir: PathBuf::from("checkpoints"),
            target: TrainTarget::Titles,
        }
    }
}

impl TrainingConfig {
    pub fn validate(&self) -> Result<(), UnifiedError> {
        if self.batch_size == 0 {
            return Err(config_errors::invalid_value("batch_size", "must be greater than 0"));
        }
        if self.epochs == 0 {
            return Err(config_errors::invalid_value("epochs", "must be greater than 0"));
        }
        if !(self.learning_rate.is_finite() && self.learning_rate > 0.0) {
            return Err(config_errors::invalid_value(
                "learning_rate",
                "must be a positive finite number",
            ));
        }
        if !(0.0..=1.0).contains(&self.warmup_fraction) {
            return Err(config_errors::invalid_value("warmup_fraction", "must be within [0, 1]"));
        }
        if !(self.grad_clip_norm.is_finite() && self.grad_clip_norm > 0.0) {
            return Err(config_errors::invalid_value(
                "grad_clip_norm",
                "must be a positive finite number",
            ));
        }
        if !(0.0..1.0).contains(&self.ewma_alpha) {
            return Err(config_errors::invalid_value("ewma_alpha", "must be within [0, 1)"));
        }
        Ok(())
    }
}
