//! Ranking metrics and metric smoothing

use crate::core::{from_candle_error, shape_errors, UnifiedResult};
use crate::validation_error;
use candle_core::{DType, Tensor};

/// 1-based rank of `label` when `scores` are sorted descending
///
/// The sort is stable, so equal scores keep their candidate order.
pub fn rank_of_label(scores: &[f32], label: usize) -> Option<usize> {
    if label >= scores.len() {
        return None;
    }
    let mut order: Vec<usize> = (0..scores.len()).collect();
    order.sort_by(|&a, &b| scores[b].total_cmp(&scores[a]));
    order.iter().position(|&i| i == label).map(|p| p + 1)
}

/// Mean reciprocal rank over rows of scores
pub fn mean_reciprocal_rank(rows: &[Vec<f32>], labels: &[usize]) -> UnifiedResult<f64> {
    if rows.len() != labels.len() {
        return Err(validation_error!("labels length", rows.len(), labels.len()));
    }
    if rows.is_empty() {
        return Ok(0.0);
    }
    let mut total = 0.0;
    for (row, &label) in rows.iter().zip(labels) {
        let rank = rank_of_label(row, label)
            .ok_or_else(|| validation_error!("label", format!("< {}", row.len()), label))?;
        total += 1.0 / rank as f64;
    }
    Ok(total / rows.len() as f64)
}

/// Batch MRR from a `[B, K]` score tensor
pub fn batch_mrr(scores: &Tensor, labels: &[usize]) -> UnifiedResult<f64> {
    scores
        .dims2()
        .map_err(|_| shape_errors::rank("scores", 2, scores.dims()))?;
    let rows = scores
        .to_dtype(DType::F32)
        .and_then(|s| s.to_vec2::<f32>())
        .map_err(|e| from_candle_error(e, "read scores", None))?;
    mean_reciprocal_rank(&rows, labels)
}

/// Exponentially-weighted moving average
///
/// The first observation initializes the average; afterwards
/// `value = alpha · value + (1 − alpha) · x`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Ewma {
    alpha: f64,
    value: Option<f64>,
}

impl Ewma {
    pub fn new(alpha: f64) -> Self {
        Self { alpha, value: None }
    }

    pub fn update(&mut self, x: f64) -> f64 {
        let next = match self.value {
            None => x,
            Some(prev) => self.alpha * prev + (1.0 - self.alpha) * x,
        };
        self.value = Some(next);
        next
    }

    pub fn value(&self) -> Option<f64> {
        self.value
    }
}

/// Weighted running mean, used for per-epoch reporting
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct RunningAverage {
    total: f64,
    weight: f64,
}

impl RunningAverage {
    pub fn add(&mut self, value: f64, weight: usize) {
        self.total += value * weight as f64;
        self.weight += weight as f64;
    }

    pub fn mean(&self) -> Option<f64> {
        (self.weight > 0.0).then(|| self.total / self.weight)
    }

    pub fn count(&self) -> usize {
        self.weight as usize
    }
}
