//! Shared Test Fixtures for candle-nrms
//!
//! Reusable fixtures, tiny model configurations and synthetic MIND-style
//! source data for all unit tests, using the rstest framework.

#[cfg(test)]
pub mod fixtures {
    use crate::core::tokenization::{HfTitleTokenizer, TokenSequence};
    use crate::data::sample_builder::Sample;
    use crate::model_architectures::config::ModelConfig;
    use crate::model_architectures::nrms::NrmsModel;
    use crate::training::config::TrainingConfig;
    use candle_core::Device;
    use rstest::*;
    use tempfile::TempDir;

    /// Words known to the fixture tokenizer, ids start after `[PAD]` and `[UNK]`
    pub const VOCAB_WORDS: &[&str] = &[
        "stocks", "rally", "markets", "fall", "election", "results", "team", "wins", "game",
        "storm", "warning", "city", "council", "music", "festival", "phone", "launch", "new",
        "record", "heat", "rates", "rise", "coach", "fired", "finance", "sports", "weather",
        "news", "tech", "lifestyle",
    ];

    /// Article table: id, category, subcategory, title, abstract
    pub const NEWS_TSV: &str = "\
N1\tfinance\tmarkets\tStocks rally as markets rise\tabstract
N2\tsports\tfootball\tTeam wins record game\tabstract
N3\tweather\tstorms\tStorm warning for city\tabstract
N4\tnews\tlocal\tCity council election results\tabstract
N5\tlifestyle\tmusic\tMusic festival heat record\tabstract
N6\ttech\tgadgets\tNew phone launch\tabstract
N7\tfinance\trates\tRates rise markets fall\tabstract
N8\tsports\tcoaching\tCoach fired after game\tabstract
broken-row-with-too-few-columns
";

    /// Behaviors table: impression id, user id, time, history, candidates
    pub const BEHAVIORS_TSV: &str = "\
1\tU1\t11/11/2019 9:05:58 AM\tN1 N2\tN3-0 N4-1 N5-0
2\tU2\t11/12/2019 8:00:00 AM\tN3\tN1-0 N7-0
3\tU3\t11/13/2019 7:10:00 AM\t\tN6-1 N8-0
4\tU4\t11/13/2019 7:12:00 AM\tN1 N2 N3 N4 N9\tN5-0 N6-0 N7-1 N8-0
malformed\trow
5\tU5\t11/14/2019 6:00:00 AM\tN5\tN2-x N3-1
";

    /// Deterministic CPU device for tests
    pub fn test_device() -> Device {
        Device::Cpu
    }

    /// Device fixture
    #[fixture]
    pub fn device() -> Device {
        test_device()
    }

    /// Serialized word-level tokenizer over [`VOCAB_WORDS`]
    pub fn tokenizer_json() -> String {
        let mut vocab = serde_json::Map::new();
        vocab.insert("[PAD]".to_string(), serde_json::json!(0));
        vocab.insert("[UNK]".to_string(), serde_json::json!(1));
        for (i, word) in VOCAB_WORDS.iter().enumerate() {
            vocab.insert(word.to_string(), serde_json::json!(i + 2));
        }
        serde_json::json!({
            "version": "1.0",
            "truncation": null,
            "padding": null,
            "added_tokens": [],
            "normalizer": { "type": "Lowercase" },
            "pre_tokenizer": { "type": "Whitespace" },
            "post_processor": null,
            "decoder": null,
            "model": { "type": "WordLevel", "vocab": vocab, "unk_token": "[UNK]" }
        })
        .to_string()
    }

    /// In-memory word-level tokenizer
    #[fixture]
    pub fn word_tokenizer() -> HfTitleTokenizer {
        HfTitleTokenizer::from_json(&tokenizer_json()).expect("fixture tokenizer must parse")
    }

    /// Vocabulary size of the fixture tokenizer
    pub fn fixture_vocab_size() -> usize {
        VOCAB_WORDS.len() + 2
    }

    /// Small model that runs in milliseconds on CPU
    #[fixture]
    pub fn tiny_model_config() -> ModelConfig {
        ModelConfig {
            vocab_size: fixture_vocab_size(),
            word_embed_dim: 16,
            article_dim: 16,
            article_heads: 2,
            history_heads: 2,
            article_ffn_dim: 32,
            history_ffn_dim: 32,
            article_layers: 1,
            history_layers: 1,
            dropout: 0.1,
            max_positions: 12,
            layer_norm_eps: 1e-5,
        }
    }

    /// Freshly initialized tiny model
    #[fixture]
    pub fn tiny_model(tiny_model_config: ModelConfig) -> NrmsModel {
        NrmsModel::new(tiny_model_config, &test_device()).expect("tiny model must build")
    }

    /// Training configuration sized for unit tests
    pub fn tiny_training_config(checkpoint_dir: &std::path::Path) -> TrainingConfig {
        TrainingConfig {
            batch_size: 2,
            epochs: 2,
            learning_rate: 1e-3,
            warmup_fraction: 0.25,
            grad_clip_norm: 1.0,
            checkpoint_interval: 2,
            ewma_alpha: 0.8,
            log_interval: 1,
            checkpoint_dir: checkpoint_dir.to_path_buf(),
            ..TrainingConfig::default()
        }
    }

    /// Temporary directory fixture for file operations
    #[fixture]
    pub fn temp_dir() -> TempDir {
        tempfile::tempdir().expect("Failed to create temporary directory")
    }

    /// Deterministic token sequence of `len` non-pad ids
    pub fn title(seed: u32, len: usize) -> TokenSequence {
        let vocab = fixture_vocab_size() as u32;
        (0..len as u32).map(|i| 2 + (seed * 7 + i * 3) % (vocab - 2)).collect()
    }

    /// Hand-built sample with `history_len` real clicks front-padded to `max_history`
    pub fn synthetic_sample(
        seed: u32,
        max_history: usize,
        history_len: usize,
        candidates: usize,
        label: usize,
    ) -> Sample {
        let mut clicked = vec![Vec::new(); max_history - history_len];
        clicked.extend((0..history_len as u32).map(|i| title(seed + i, 3 + (i as usize % 3))));
        let candidate_titles = (0..candidates as u32)
            .map(|i| title(seed * 11 + i, 2 + (i as usize % 4)))
            .collect();
        Sample::new(clicked, candidate_titles, None, label, max_history)
            .expect("synthetic sample must be valid")
    }
}
