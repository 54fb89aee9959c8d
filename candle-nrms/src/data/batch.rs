//! Batch Assembler
//!
//! Pads variable-length token sequences into rectangular tensors and
//! derives the padding masks the encoders consume.
//!
//! ## Mask polarity
//! Masks are `U8` tensors where `1` means "this position is padding,
//! exclude it". The same polarity is used by every encoder and checked at
//! each component boundary.
//!
//! ## Shapes
//! - `clicked_ids`, `clicked_mask`: `[B, N, L]`
//! - `candidate_ids`, `candidate_mask`: `[B, K, L]`, `K` = largest slate in the batch
//! - `labels`: `[B]`

use crate::core::tokenization::TokenSequence;
use crate::core::{from_candle_error, processing_errors, UnifiedResult};
use crate::data::sample_builder::Sample;
use crate::model_architectures::embedding::pooling::derive_slot_mask;
use crate::validation_error;
use candle_core::{DType, Device, Tensor};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;

/// Padded token ids and their padding mask for one group of titles
#[derive(Debug, Clone)]
pub struct PaddedTokens {
    /// `[rows * max_len]` row-major ids
    pub ids: Vec<u32>,
    /// `[rows * max_len]` row-major mask, 1 = padding
    pub mask: Vec<u8>,
    pub rows: usize,
    pub max_len: usize,
}

impl PaddedTokens {
    /// Move the host buffers onto `device` as `(ids, mask)` of shape `[rows, max_len]`
    pub fn to_tensors(&self, device: &Device) -> UnifiedResult<(Tensor, Tensor)> {
        let ids = Tensor::from_vec(self.ids.clone(), (self.rows, self.max_len), device)
            .map_err(|e| from_candle_error(e, "padded ids to tensor", None))?;
        let mask = Tensor::from_vec(self.mask.clone(), (self.rows, self.max_len), device)
            .map_err(|e| from_candle_error(e, "padding mask to tensor", None))?;
        Ok((ids, mask))
    }
}

/// One collated batch on a compute device
#[derive(Debug, Clone)]
pub struct NrmsBatch {
    pub clicked_ids: Tensor,
    pub clicked_mask: Tensor,
    pub candidate_ids: Tensor,
    pub candidate_mask: Tensor,
    /// Present only when every sample in the batch carries topics
    pub candidate_topic_ids: Option<Tensor>,
    pub candidate_topic_mask: Option<Tensor>,
    pub labels: Tensor,
    /// Each sample's own slate size `Ki`
    pub candidate_counts: Vec<usize>,
}

impl NrmsBatch {
    pub fn batch_size(&self) -> usize {
        self.candidate_counts.len()
    }

    /// Batch-wide candidate width `K`
    pub fn num_candidates(&self) -> usize {
        self.candidate_counts.iter().copied().max().unwrap_or(0)
    }

    /// History slot mask `[B, N]`, 1 where every position in the slot is padding
    pub fn slot_mask(&self) -> UnifiedResult<Tensor> {
        derive_slot_mask(&self.clicked_mask)
    }

    /// Labels as host integers
    pub fn label_indices(&self) -> UnifiedResult<Vec<usize>> {
        let labels = self
            .labels
            .to_vec1::<u32>()
            .map_err(|e| from_candle_error(e, "read labels", None))?;
        Ok(labels.into_iter().map(|l| l as usize).collect())
    }
}

/// Pads samples into [`NrmsBatch`] tensors
#[derive(Debug, Clone, Copy)]
pub struct BatchAssembler {
    pub max_history: usize,
    pub max_title_len: usize,
    pub pad_id: u32,
}

impl BatchAssembler {
    pub fn new(max_history: usize, max_title_len: usize, pad_id: u32) -> Self {
        Self {
            max_history,
            max_title_len,
            pad_id,
        }
    }

    /// Pad `titles` into `rows` rows of `max_title_len` ids
    ///
    /// Rows past `titles.len()` are fully padded. Titles longer than
    /// `max_title_len` are truncated. The mask is derived from the ids, so a
    /// real token can never be flagged as padding and vice versa.
    pub fn pad_and_mask(&self, titles: &[TokenSequence], rows: usize) -> PaddedTokens {
        let max_len = self.max_title_len;
        let mut ids = vec![self.pad_id; rows * max_len];
        for (row, title) in titles.iter().take(rows).enumerate() {
            let len = title.len().min(max_len);
            ids[row * max_len..row * max_len + len].copy_from_slice(&title[..len]);
        }
        let mask = ids.iter().map(|&id| u8::from(id == self.pad_id)).collect();
        PaddedTokens {
            ids,
            mask,
            rows,
            max_len,
        }
    }

    /// Collate samples into one batch
    ///
    /// Rejects an empty batch, a history that is not exactly `max_history`
    /// slots, and any label outside its own slate.
    pub fn collate(&self, samples: &[&Sample], device: &Device) -> UnifiedResult<NrmsBatch> {
        if samples.is_empty() {
            return Err(processing_errors::empty_input("collate batch"));
        }

        let batch_size = samples.len();
        let k_max = samples.iter().map(|s| s.num_candidates()).max().unwrap_or(0);
        let with_topics = samples.iter().all(|s| s.candidate_topics.is_some());

        let mut clicked_ids = Vec::with_capacity(batch_size * self.max_history * self.max_title_len);
        let mut clicked_mask = Vec::with_capacity(clicked_ids.capacity());
        let mut candidate_ids = Vec::with_capacity(batch_size * k_max * self.max_title_len);
        let mut candidate_mask = Vec::with_capacity(candidate_ids.capacity());
        let mut topic_ids = Vec::new();
        let mut topic_mask = Vec::new();
        let mut labels = Vec::with_capacity(batch_size);
        let mut candidate_counts = Vec::with_capacity(batch_size);

        for (i, sample) in samples.iter().enumerate() {
            if sample.clicked_titles.len() != self.max_history {
                return Err(validation_error!(
                    "clicked_titles length",
                    self.max_history,
                    sample.clicked_titles.len(),
                    format!("sample {} in batch", i)
                ));
            }
            if sample.label >= sample.num_candidates() {
                return Err(validation_error!(
                    "label",
                    format!("< {}", sample.num_candidates()),
                    sample.label,
                    format!("sample {} in batch", i)
                ));
            }

            let clicked = self.pad_and_mask(&sample.clicked_titles, self.max_history);
            clicked_ids.extend(clicked.ids);
            clicked_mask.extend(clicked.mask);

            let candidates = self.pad_and_mask(&sample.candidate_titles, k_max);
            candidate_ids.extend(candidates.ids);
            candidate_mask.extend(candidates.mask);

            if with_topics {
                if let Some(topics) = &sample.candidate_topics {
                    let topics = self.pad_and_mask(topics, k_max);
                    topic_ids.extend(topics.ids);
                    topic_mask.extend(topics.mask);
                }
            }

            labels.push(sample.label as u32);
            candidate_counts.push(sample.num_candidates());
        }

        let history_shape = (batch_size, self.max_history, self.max_title_len);
        let candidate_shape = (batch_size, k_max, self.max_title_len);
        let tensor = |data: Vec<u32>, shape: (usize, usize, usize), what: &str| {
            Tensor::from_vec(data, shape, device).map_err(|e| from_candle_error(e, what, None))
        };
        let mask_tensor = |data: Vec<u8>, shape: (usize, usize, usize), what: &str| {
            Tensor::from_vec(data, shape, device).map_err(|e| from_candle_error(e, what, None))
        };

        let (candidate_topic_ids, candidate_topic_mask) = if with_topics {
            (
                Some(tensor(topic_ids, candidate_shape, "topic ids")?),
                Some(mask_tensor(topic_mask, candidate_shape, "topic mask")?),
            )
        } else {
            (None, None)
        };

        Ok(NrmsBatch {
            clicked_ids: tensor(clicked_ids, history_shape, "clicked ids")?,
            clicked_mask: mask_tensor(clicked_mask, history_shape, "clicked mask")?,
            candidate_ids: tensor(candidate_ids, candidate_shape, "candidate ids")?,
            candidate_mask: mask_tensor(candidate_mask, candidate_shape, "candidate mask")?,
            candidate_topic_ids,
            candidate_topic_mask,
            labels: Tensor::from_vec(labels, batch_size, device)
                .map_err(|e| from_candle_error(e, "labels", None))?,
            candidate_counts,
        })
    }
}

/// Yields shuffled batches of samples, one pass per epoch
#[derive(Debug)]
pub struct SampleLoader<'a> {
    samples: &'a [Sample],
    batch_size: usize,
    shuffle: bool,
    rng: StdRng,
}

impl<'a> SampleLoader<'a> {
    pub fn new(samples: &'a [Sample], batch_size: usize, shuffle: bool, seed: u64) -> Self {
        Self {
            samples,
            batch_size: batch_size.max(1),
            shuffle,
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// Batches per epoch (the last batch may be short)
    pub fn num_batches(&self) -> usize {
        self.samples.len().div_ceil(self.batch_size)
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Sample groups for the next epoch, reshuffled when shuffling is enabled
    pub fn epoch(&mut self) -> Vec<Vec<&'a Sample>> {
        let mut order: Vec<usize> = (0..self.samples.len()).collect();
        if self.shuffle {
            order.shuffle(&mut self.rng);
        }
        order
            .chunks(self.batch_size)
            .map(|chunk| chunk.iter().map(|&i| &self.samples[i]).collect())
            .collect()
    }
}

/// Mask dtype used throughout the crate
pub const MASK_DTYPE: DType = DType::U8;
