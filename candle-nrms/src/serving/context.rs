//! Recommender Context
//!
//! The single object a serving process builds at startup and passes into
//! every request: tokenizer, current model, candidate vector cache and
//! serving limits. There is no module-level state.
//!
//! Requests only read the model. A new checkpoint is swapped in whole,
//! together with its cache generation, under one lock. A request reads
//! both in one guard, so it finishes on the model it started with and can
//! only publish candidate vectors for that model's generation.

use crate::core::{config_errors, from_candle_error, TitleTokenizer, TokenSequence, UnifiedResult};
use crate::data::BatchAssembler;
use crate::model_architectures::config::ForwardMode;
use crate::model_architectures::nrms::{HistoryTokens, NrmsModel};
use crate::serving::candidate_cache::ArticleVectorCache;
use crate::training::checkpoint::{CheckpointId, CheckpointManager};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;

/// Request shaping limits, matching the limits used at training time
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServingConfig {
    pub max_history: usize,
    pub max_title_len: usize,
    pub top_k: usize,
}

impl Default for ServingConfig {
    fn default() -> Self {
        Self {
            max_history: 50,
            max_title_len: 100,
            top_k: 5,
        }
    }
}

/// A candidate article offered for ranking
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CandidateArticle {
    pub id: String,
    pub title: String,
}

impl CandidateArticle {
    pub fn new(id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Ranking {
    /// No real history; the caller falls back to a non-personalized list
    ColdUser,
    Personalized {
        /// One score per candidate, in request order
        scores: Vec<f32>,
        /// Candidate indices of the best `top_k` scores, best first
        top_k: Vec<usize>,
    },
}

/// The serving model and the cache generation its vectors belong to
#[derive(Debug, Clone)]
pub struct ServingModel {
    pub model: Arc<NrmsModel>,
    pub generation: u64,
}

pub struct RecommenderContext {
    tokenizer: Arc<dyn TitleTokenizer>,
    model: RwLock<ServingModel>,
    cache: ArticleVectorCache,
    config: ServingConfig,
}

impl RecommenderContext {
    pub fn new(tokenizer: Arc<dyn TitleTokenizer>, model: NrmsModel, config: ServingConfig) -> UnifiedResult<Self> {
        check_compatible(tokenizer.as_ref(), &model, &config)?;
        let cache = ArticleVectorCache::new();
        let serving = ServingModel {
            model: Arc::new(model),
            generation: cache.generation(),
        };
        Ok(Self {
            tokenizer,
            model: RwLock::new(serving),
            cache,
            config,
        })
    }

    pub fn config(&self) -> &ServingConfig {
        &self.config
    }

    pub fn cache(&self) -> &ArticleVectorCache {
        &self.cache
    }

    /// The model current requests are served with, and its cache generation
    pub fn serving_model(&self) -> ServingModel {
        self.model.read().clone()
    }

    pub fn current_model(&self) -> Arc<NrmsModel> {
        self.serving_model().model
    }

    /// Replace the serving model, returning the new cache generation
    pub fn swap_model(&self, model: NrmsModel) -> UnifiedResult<u64> {
        check_compatible(self.tokenizer.as_ref(), &model, &self.config)?;
        let mut serving = self.model.write();
        let generation = self.cache.invalidate_all();
        *serving = ServingModel {
            model: Arc::new(model),
            generation,
        };
        info!("Serving model swapped, cache generation {}", generation);
        Ok(generation)
    }

    /// Load checkpoint `id` and swap it in
    pub fn swap_checkpoint(&self, checkpoints: &CheckpointManager, id: CheckpointId) -> UnifiedResult<u64> {
        let device = self.current_model().device().clone();
        let model = checkpoints.load(id, &device)?;
        self.swap_model(model)
    }

    fn assembler(&self) -> BatchAssembler {
        BatchAssembler::new(self.config.max_history, self.config.max_title_len, self.tokenizer.pad_id())
    }

    /// History slots, oldest first, front-padded with empty slots
    fn history_slots(&self, history_titles: &[&str]) -> UnifiedResult<Vec<TokenSequence>> {
        let start = history_titles.len().saturating_sub(self.config.max_history);
        let recent = self
            .tokenizer
            .tokenize_batch(&history_titles[start..], self.config.max_title_len)?;
        let mut slots = vec![TokenSequence::new(); self.config.max_history - recent.len()];
        slots.extend(recent);
        Ok(slots)
    }

    /// Rank `candidates` for a user who clicked `history_titles` (oldest first)
    pub fn rank(&self, history_titles: &[&str], candidates: &[CandidateArticle]) -> UnifiedResult<Ranking> {
        let ServingModel { model, generation } = self.serving_model();
        let pad_id = self.tokenizer.pad_id();

        let slots = self.history_slots(history_titles)?;
        if slots.iter().all(|s| s.iter().all(|&id| id == pad_id)) {
            return Ok(Ranking::ColdUser);
        }
        if candidates.is_empty() {
            return Ok(Ranking::Personalized {
                scores: Vec::new(),
                top_k: Vec::new(),
            });
        }

        let assembler = self.assembler();
        let device = model.device();
        let (history_ids, history_mask) = assembler.pad_and_mask(&slots, self.config.max_history).to_tensors(device)?;
        let history_ids = history_ids
            .unsqueeze(0)
            .map_err(|e| from_candle_error(e, "history batch dim", None))?;
        let history_mask = history_mask
            .unsqueeze(0)
            .map_err(|e| from_candle_error(e, "history mask batch dim", None))?;

        let articles: Vec<(&str, &str)> = candidates.iter().map(|c| (c.id.as_str(), c.title.as_str())).collect();
        let vectors = self.cache.get_or_encode(&articles, generation, |titles| {
            let tokens = self.tokenizer.tokenize_batch(titles, self.config.max_title_len)?;
            let (ids, mask) = assembler.pad_and_mask(&tokens, tokens.len()).to_tensors(device)?;
            model.encode_articles(&ids, &mask, ForwardMode::Eval)
        })?;
        let vectors = vectors
            .unsqueeze(0)
            .map_err(|e| from_candle_error(e, "candidate batch dim", None))?;

        let scores = model
            .score_cached(HistoryTokens::new(&history_ids, &history_mask), &vectors, ForwardMode::Eval)?
            .squeeze(0)
            .and_then(|s| s.to_vec1::<f32>())
            .map_err(|e| from_candle_error(e, "read scores", None))?;

        let top_k = top_k_indices(&scores, self.config.top_k);
        Ok(Ranking::Personalized { scores, top_k })
    }
}

/// Indices of the `k` highest scores, best first, ties in input order
pub fn top_k_indices(scores: &[f32], k: usize) -> Vec<usize> {
    let mut order: Vec<usize> = (0..scores.len()).collect();
    order.sort_by(|&a, &b| scores[b].total_cmp(&scores[a]));
    order.truncate(k.min(scores.len()));
    order
}

fn check_compatible(tokenizer: &dyn TitleTokenizer, model: &NrmsModel, config: &ServingConfig) -> UnifiedResult<()> {
    if config.max_history == 0 {
        return Err(config_errors::invalid_value("max_history", "must be greater than 0"));
    }
    if config.max_title_len == 0 || config.max_title_len > model.config().max_positions {
        return Err(config_errors::invalid_value(
            "max_title_len",
            &format!("must be within 1..={}", model.config().max_positions),
        ));
    }
    if tokenizer.vocab_size() > model.config().vocab_size {
        return Err(config_errors::invalid_value(
            "vocab_size",
            &format!(
                "tokenizer vocabulary {} exceeds model vocabulary {}",
                tokenizer.vocab_size(),
                model.config().vocab_size
            ),
        ));
    }
    Ok(())
}
