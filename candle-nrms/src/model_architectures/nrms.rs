//! NRMS Dual Encoder
//!
//! Owns the article encoder, the history encoder and their parameters, and
//! exposes one scoring interface with three modes:
//!
//! - **Pairwise**: per-user candidate slates `[B, K, L]` → scores `[B, K]`
//! - **Catalog**: one shared pool `[D, L]` → per-user distribution `[B, D]`
//! - **Cached candidates**: pre-encoded candidates `[B, K, E]` → scores `[B, K]`
//!
//! ## Shape contract
//! History tensors are `[B, N, L]`. Ids are `U32`, masks are `U8` with
//! `1 = padding`. Mismatched shapes are rejected before any encoding.
//! An empty candidate set yields a `[B, 0]` score tensor.

use crate::core::{from_candle_error, shape_errors, to_model_error, ModelComponent, UnifiedError, UnifiedResult};
use crate::model_architectures::config::{ForwardMode, ModelConfig};
use crate::model_architectures::embedding::{derive_slot_mask, ensure_mask_dtype};
use crate::model_architectures::news_encoder::{check_token_inputs, ArticleEncoder};
use crate::model_architectures::user_encoder::HistoryEncoder;
use crate::validation_error;
use candle_core::{DType, Device, Tensor, Var, D};
use candle_nn::{VarBuilder, VarMap};
use std::path::Path;
use tracing::{debug, info};

/// Clicked-history tokens for a batch of users, both `[B, N, L]`
#[derive(Debug, Clone, Copy)]
pub struct HistoryTokens<'a> {
    pub ids: &'a Tensor,
    pub mask: &'a Tensor,
}

impl<'a> HistoryTokens<'a> {
    pub fn new(ids: &'a Tensor, mask: &'a Tensor) -> Self {
        Self { ids, mask }
    }
}

/// One scoring call, in one of the three modes
#[derive(Debug, Clone, Copy)]
pub enum ScoringRequest<'a> {
    /// Candidates `[B, K, L]` encoded alongside the history
    Pairwise {
        history: HistoryTokens<'a>,
        candidate_ids: &'a Tensor,
        candidate_mask: &'a Tensor,
    },
    /// A shared pool `[D, L]` scored against every user, softmax-normalized per row
    Catalog {
        history: HistoryTokens<'a>,
        pool_ids: &'a Tensor,
        pool_mask: &'a Tensor,
    },
    /// Candidate vectors `[B, K, E]` from an earlier [`NrmsModel::encode_articles`]
    CachedCandidates {
        history: HistoryTokens<'a>,
        candidate_vectors: &'a Tensor,
    },
}

pub struct NrmsModel {
    config: ModelConfig,
    varmap: VarMap,
    device: Device,
    article_encoder: ArticleEncoder,
    history_encoder: HistoryEncoder,
}

impl std::fmt::Debug for NrmsModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NrmsModel")
            .field("config", &self.config)
            .field("device", &self.device)
            .finish_non_exhaustive()
    }
}

impl NrmsModel {
    /// Build a freshly initialized model
    pub fn new(config: ModelConfig, device: &Device) -> UnifiedResult<Self> {
        config.validate()?;
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, device);
        let article_encoder = ArticleEncoder::new(&config, vb.pp("article_encoder"))?;
        let history_encoder = HistoryEncoder::new(&config, vb.pp("history_encoder"))?;
        debug!(
            "Initialized NRMS model with {} parameter tensors",
            varmap.all_vars().len()
        );
        Ok(Self {
            config,
            varmap,
            device: device.clone(),
            article_encoder,
            history_encoder,
        })
    }

    /// Rebuild a model from `config` and load the weights stored at `checkpoint`
    pub fn load(config: ModelConfig, checkpoint: &Path, device: &Device) -> UnifiedResult<Self> {
        let mut model = Self::new(config, device)?;
        model.load_weights(checkpoint)?;
        info!("Loaded NRMS weights from {}", checkpoint.display());
        Ok(model)
    }

    /// Overwrite every parameter in place from a safetensors file
    pub fn load_weights(&mut self, checkpoint: &Path) -> UnifiedResult<()> {
        self.varmap.load(checkpoint).map_err(|e| UnifiedError::Checkpoint {
            operation: "load weights".to_string(),
            checkpoint: checkpoint.display().to_string(),
            reason: e.to_string(),
        })
    }

    pub fn config(&self) -> &ModelConfig {
        &self.config
    }

    pub fn device(&self) -> &Device {
        &self.device
    }

    pub fn varmap(&self) -> &VarMap {
        &self.varmap
    }

    /// Every trainable parameter
    pub fn all_vars(&self) -> Vec<Var> {
        self.varmap.all_vars()
    }

    pub fn article_encoder(&self) -> &ArticleEncoder {
        &self.article_encoder
    }

    pub fn history_encoder(&self) -> &HistoryEncoder {
        &self.history_encoder
    }

    /// Encode standalone articles `[K, L]` into vectors `[K, E]`
    pub fn encode_articles(&self, token_ids: &Tensor, padding_mask: &Tensor, mode: ForwardMode) -> UnifiedResult<Tensor> {
        self.check_seq_len("article token ids", token_ids)?;
        self.article_encoder.forward(token_ids, padding_mask, mode)
    }

    /// Encode `[B, N, L]` history tokens into user vectors `[B, E]`
    pub fn encode_user(&self, history: HistoryTokens<'_>, mode: ForwardMode) -> UnifiedResult<Tensor> {
        let (batch, slots, seq_len) = check_grouped_tokens("history", history.ids, history.mask)?;
        if slots == 0 {
            return Err(validation_error!("history slots", "> 0", 0));
        }
        self.check_seq_len("history token ids", history.ids)?;

        let article_vectors = self.encode_grouped(history.ids, history.mask, batch, slots, seq_len, mode)?;
        let slot_mask = derive_slot_mask(history.mask)?;
        self.history_encoder.forward(&article_vectors, &slot_mask, mode)
    }

    /// Per-user candidate scoring, `[B, K]`
    pub fn score_pairwise(
        &self,
        history: HistoryTokens<'_>,
        candidate_ids: &Tensor,
        candidate_mask: &Tensor,
        mode: ForwardMode,
    ) -> UnifiedResult<Tensor> {
        let (batch, _slots, _len) = check_grouped_tokens("history", history.ids, history.mask)?;
        let (cand_batch, num_candidates, cand_len) =
            check_grouped_tokens("candidate", candidate_ids, candidate_mask)?;
        check_batch("candidate", batch, cand_batch)?;
        self.check_seq_len("candidate token ids", candidate_ids)?;

        if num_candidates == 0 {
            return self.empty_scores(batch);
        }

        let user = self.encode_user(history, mode)?;
        let candidates =
            self.encode_grouped(candidate_ids, candidate_mask, batch, num_candidates, cand_len, mode)?;
        dot_scores(&candidates, &user)
    }

    /// Scores against one shared pool, normalized into a distribution per user, `[B, D]`
    pub fn score_catalog(
        &self,
        history: HistoryTokens<'_>,
        pool_ids: &Tensor,
        pool_mask: &Tensor,
        mode: ForwardMode,
    ) -> UnifiedResult<Tensor> {
        let (batch, _slots, _len) = check_grouped_tokens("history", history.ids, history.mask)?;
        let (pool_size, _) = check_token_inputs(pool_ids, pool_mask)?;
        if pool_size == 0 {
            return self.empty_scores(batch);
        }

        let user = self.encode_user(history, mode)?;
        let pool = self.encode_articles(pool_ids, pool_mask, mode)?;
        let logits = pool
            .t()
            .and_then(|p| p.contiguous())
            .and_then(|p| user.matmul(&p))
            .map_err(|e| to_model_error(e, ModelComponent::Scorer, "user @ pool^T"))?;
        candle_nn::ops::softmax(&logits, D::Minus1)
            .map_err(|e| to_model_error(e, ModelComponent::Scorer, "catalog softmax"))
    }

    /// Scores against pre-encoded candidates `[B, K, E]`, `[B, K]`
    pub fn score_cached(
        &self,
        history: HistoryTokens<'_>,
        candidate_vectors: &Tensor,
        mode: ForwardMode,
    ) -> UnifiedResult<Tensor> {
        let (batch, _slots, _len) = check_grouped_tokens("history", history.ids, history.mask)?;
        let (cand_batch, num_candidates, dim) = candidate_vectors
            .dims3()
            .map_err(|_| shape_errors::rank("candidate vectors", 3, candidate_vectors.dims()))?;
        check_batch("candidate vectors", batch, cand_batch)?;
        if dim != self.config.article_dim {
            return Err(validation_error!(
                "candidate vector dim",
                self.config.article_dim,
                dim,
                format!("{:?}", ModelComponent::Scorer)
            ));
        }
        if num_candidates == 0 {
            return self.empty_scores(batch);
        }

        let user = self.encode_user(history, mode)?;
        let candidates = candidate_vectors
            .to_dtype(DType::F32)
            .map_err(|e| from_candle_error(e, "Scorer: candidate vectors dtype", None))?;
        dot_scores(&candidates, &user)
    }

    /// Dispatch a [`ScoringRequest`]
    pub fn score(&self, request: ScoringRequest<'_>, mode: ForwardMode) -> UnifiedResult<Tensor> {
        match request {
            ScoringRequest::Pairwise {
                history,
                candidate_ids,
                candidate_mask,
            } => self.score_pairwise(history, candidate_ids, candidate_mask, mode),
            ScoringRequest::Catalog {
                history,
                pool_ids,
                pool_mask,
            } => self.score_catalog(history, pool_ids, pool_mask, mode),
            ScoringRequest::CachedCandidates {
                history,
                candidate_vectors,
            } => self.score_cached(history, candidate_vectors, mode),
        }
    }

    /// Flatten `[B, G, L]` to `[B*G, L]`, encode, and regroup to `[B, G, E]`
    fn encode_grouped(
        &self,
        ids: &Tensor,
        mask: &Tensor,
        batch: usize,
        group: usize,
        seq_len: usize,
        mode: ForwardMode,
    ) -> UnifiedResult<Tensor> {
        let flat_ids = ids
            .reshape((batch * group, seq_len))
            .map_err(|e| from_candle_error(e, "Scorer: flatten ids", None))?;
        let flat_mask = mask
            .reshape((batch * group, seq_len))
            .map_err(|e| from_candle_error(e, "Scorer: flatten mask", None))?;
        self.article_encoder
            .forward(&flat_ids, &flat_mask, mode)?
            .reshape((batch, group, self.config.article_dim))
            .map_err(|e| from_candle_error(e, "Scorer: regroup article vectors", None))
    }

    fn check_seq_len(&self, field: &str, ids: &Tensor) -> UnifiedResult<()> {
        let seq_len = ids.dims().last().copied().unwrap_or(0);
        if seq_len > self.config.max_positions {
            return Err(validation_error!(
                field,
                format!("sequence length <= {}", self.config.max_positions),
                seq_len
            ));
        }
        Ok(())
    }

    fn empty_scores(&self, batch: usize) -> UnifiedResult<Tensor> {
        Tensor::zeros((batch, 0), DType::F32, &self.device)
            .map_err(|e| from_candle_error(e, "Scorer: empty scores", None))
    }
}

/// Validate an `[B, G, L]` ids/mask pair, returning `(B, G, L)`
fn check_grouped_tokens(field: &str, ids: &Tensor, mask: &Tensor) -> UnifiedResult<(usize, usize, usize)> {
    ensure_mask_dtype(&format!("{} mask", field), mask)?;
    if ids.dtype() != DType::U32 {
        return Err(validation_error!(
            format!("{} ids dtype", field),
            "U32",
            format!("{:?}", ids.dtype())
        ));
    }
    let dims = ids
        .dims3()
        .map_err(|_| shape_errors::rank(&format!("{} ids", field), 3, ids.dims()))?;
    if mask.dims() != ids.dims() {
        return Err(shape_errors::mismatch(&format!("{} mask", field), ids.dims(), mask.dims()));
    }
    Ok(dims)
}

fn check_batch(field: &str, expected: usize, actual: usize) -> UnifiedResult<()> {
    if expected != actual {
        return Err(validation_error!(
            format!("{} batch size", field),
            expected,
            actual,
            "must match the history batch size"
        ));
    }
    Ok(())
}

/// `[B, K, E] · [B, E] → [B, K]`
fn dot_scores(candidates: &Tensor, user: &Tensor) -> UnifiedResult<Tensor> {
    user.unsqueeze(2)
        .and_then(|u| candidates.matmul(&u))
        .and_then(|s| s.squeeze(2))
        .map_err(|e| to_model_error(e, ModelComponent::Scorer, "candidate · user"))
}
