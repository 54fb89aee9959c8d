//! Tokenization Core Module
//!
//! The recommender consumes tokenization as a pure function
//! `text -> sequence<u32>`. Sequences are truncated but never padded here;
//! padding happens once, at batch assembly time.

use crate::core::unified_error::{from_tokenizer_error, UnifiedError, UnifiedResult};
use hf_hub::{api::sync::Api, Repo, RepoType};
use rayon::prelude::*;
use std::path::Path;
use std::str::FromStr;
use tokenizers::Tokenizer;
use tracing::debug;

/// Reserved token id that marks the absence of a real token
pub const PAD_ID: u32 = 0;

/// Token ids for one article title, unpadded
pub type TokenSequence = Vec<u32>;

/// Maps raw title text to a fixed-vocabulary token sequence
pub trait TitleTokenizer: Send + Sync + std::fmt::Debug {
    /// Tokenize `text`, truncated to at most `max_len` ids
    ///
    /// Never returns an empty sequence: degenerate input yields `[pad_id]`.
    fn tokenize(&self, text: &str, max_len: usize) -> UnifiedResult<TokenSequence>;

    /// Id of the padding token
    fn pad_id(&self) -> u32 {
        PAD_ID
    }

    /// Vocabulary size, used to check the model's embedding table
    fn vocab_size(&self) -> usize;

    /// Tokenize many titles in parallel, preserving order
    fn tokenize_batch(&self, texts: &[&str], max_len: usize) -> UnifiedResult<Vec<TokenSequence>> {
        texts
            .par_iter()
            .map(|text| self.tokenize(text, max_len))
            .collect()
    }
}

/// Hugging Face `tokenizers` backed title tokenizer
#[derive(Debug, Clone)]
pub struct HfTitleTokenizer {
    tokenizer: Tokenizer,
    pad_id: u32,
    add_special_tokens: bool,
}

impl HfTitleTokenizer {
    /// Wrap an existing tokenizer
    ///
    /// The pad id is looked up from the `[PAD]` / `<pad>` vocabulary entries and
    /// falls back to [`PAD_ID`].
    pub fn new(tokenizer: Tokenizer, add_special_tokens: bool) -> Self {
        let pad_id = tokenizer
            .token_to_id("[PAD]")
            .or_else(|| tokenizer.token_to_id("<pad>"))
            .unwrap_or(PAD_ID);
        Self {
            tokenizer,
            pad_id,
            add_special_tokens,
        }
    }

    /// Load from a local `tokenizer.json`
    pub fn from_file(path: &Path) -> UnifiedResult<Self> {
        let tokenizer = Tokenizer::from_file(path)
            .map_err(|e| from_tokenizer_error(e, &format!("load {}", path.display())))?;
        debug!("Loaded tokenizer from {}", path.display());
        Ok(Self::new(tokenizer, true))
    }

    /// Parse a serialized tokenizer definition
    pub fn from_json(json: &str) -> UnifiedResult<Self> {
        let tokenizer =
            Tokenizer::from_str(json).map_err(|e| from_tokenizer_error(e, "parse tokenizer json"))?;
        Ok(Self::new(tokenizer, true))
    }

    /// Fetch `tokenizer.json` from a hub repository (cached locally by hf-hub)
    pub fn from_pretrained(repo_id: &str) -> UnifiedResult<Self> {
        let api = Api::new().map_err(|e| UnifiedError::External {
            library: "hf-hub".to_string(),
            operation: "create api".to_string(),
            error: e.to_string(),
        })?;
        let repo = api.repo(Repo::new(repo_id.to_string(), RepoType::Model));
        let path = repo.get("tokenizer.json").map_err(|e| UnifiedError::External {
            library: "hf-hub".to_string(),
            operation: format!("download tokenizer for {}", repo_id),
            error: e.to_string(),
        })?;
        Self::from_file(&path)
    }

    /// Toggle special-token insertion (`[CLS]`/`[SEP]`)
    pub fn with_special_tokens(mut self, add_special_tokens: bool) -> Self {
        self.add_special_tokens = add_special_tokens;
        self
    }
}

impl TitleTokenizer for HfTitleTokenizer {
    fn tokenize(&self, text: &str, max_len: usize) -> UnifiedResult<TokenSequence> {
        if text.trim().is_empty() || max_len == 0 {
            return Ok(vec![self.pad_id]);
        }

        let encoding = self
            .tokenizer
            .encode(text, self.add_special_tokens)
            .map_err(|e| from_tokenizer_error(e, "encode title"))?;

        let mut ids = encoding.get_ids().to_vec();
        ids.truncate(max_len);
        if ids.is_empty() {
            ids.push(self.pad_id);
        }
        Ok(ids)
    }

    fn pad_id(&self) -> u32 {
        self.pad_id
    }

    fn vocab_size(&self) -> usize {
        self.tokenizer.get_vocab_size(true)
    }
}
