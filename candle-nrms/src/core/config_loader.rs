//! Unified Configuration Loader
//!
//! Loads the run configuration (model, training, data, device) from a single
//! JSON document. Every section is optional; absent fields keep their
//! defaults.

use crate::core::unified_error::{config_errors, UnifiedError};
use crate::model_architectures::config::{DevicePreference, ModelConfig};
use crate::training::config::TrainingConfig;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::{Path, PathBuf};

/// Where the title tokenizer comes from
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum TokenizerSource {
    /// A local `tokenizer.json`
    File { path: PathBuf },
    /// A model repository on the Hugging Face hub
    Hub { repo_id: String },
}

impl Default for TokenizerSource {
    fn default() -> Self {
        TokenizerSource::Hub {
            repo_id: "bert-base-uncased".to_string(),
        }
    }
}

/// Source data locations and sample shaping parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DataConfig {
    pub train_news: PathBuf,
    pub train_behaviors: PathBuf,
    pub valid_news: Option<PathBuf>,
    pub valid_behaviors: Option<PathBuf>,
    /// History slots per sample (front-padded)
    pub max_history: usize,
    /// Tokens per title (truncated, then padded at batch time)
    pub max_title_len: usize,
    /// Also tokenize article categories as topic sequences
    pub include_topics: bool,
    pub tokenizer: TokenizerSource,
}

impl Default for DataConfig {
    fn default() -> Self {
        Self {
            train_news: PathBuf::from("data/MIND_train/news.tsv"),
            train_behaviors: PathBuf::from("data/MIND_train/behaviors.tsv"),
            valid_news: Some(PathBuf::from("data/MIND_val/news.tsv")),
            valid_behaviors: Some(PathBuf::from("data/MIND_val/behaviors.tsv")),
            max_history: 50,
            max_title_len: 100,
            include_topics: false,
            tokenizer: TokenizerSource::default(),
        }
    }
}

impl DataConfig {
    pub fn validate(&self) -> Result<(), UnifiedError> {
        if self.max_history == 0 {
            return Err(config_errors::invalid_value("max_history", "must be greater than 0"));
        }
        if self.max_title_len == 0 {
            return Err(config_errors::invalid_value("max_title_len", "must be greater than 0"));
        }
        if self.valid_news.is_some() != self.valid_behaviors.is_some() {
            return Err(config_errors::invalid_value(
                "valid_news/valid_behaviors",
                "must be given together",
            ));
        }
        Ok(())
    }
}

/// Complete configuration for a training run
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    pub model: ModelConfig,
    pub training: TrainingConfig,
    pub data: DataConfig,
    pub device: DevicePreference,
}

impl RunConfig {
    /// Validate every section plus cross-section constraints
    pub fn validate(&self) -> Result<(), UnifiedError> {
        self.model.validate()?;
        self.training.validate()?;
        self.data.validate()?;
        if self.data.max_title_len > self.model.max_positions {
            return Err(config_errors::invalid_value(
                "max_title_len",
                &format!(
                    "{} exceeds the positional table size {}",
                    self.data.max_title_len, self.model.max_positions
                ),
            ));
        }
        Ok(())
    }
}

/// Unified configuration loader
pub struct UnifiedConfigLoader;

impl UnifiedConfigLoader {
    /// Load and parse a JSON document from a specific path
    pub fn load_json_config_from_path(config_path: &Path) -> Result<Value, UnifiedError> {
        let display = config_path.to_string_lossy();
        let config_content = std::fs::read_to_string(config_path)
            .map_err(|_e| config_errors::file_not_found(&display))?;

        serde_json::from_str(&config_content)
            .map_err(|e| config_errors::invalid_json(&display, &e.to_string()))
    }

    /// Load, default-fill and validate a run configuration
    pub fn load_run_config(config_path: &Path) -> Result<RunConfig, UnifiedError> {
        let value = Self::load_json_config_from_path(config_path)?;
        let config = Self::run_config_from_value(value, &config_path.to_string_lossy())?;
        config.validate()?;
        Ok(config)
    }

    /// Deserialize a run configuration from an already parsed document
    pub fn run_config_from_value(value: Value, origin: &str) -> Result<RunConfig, UnifiedError> {
        if !value.is_object() {
            return Err(config_errors::invalid_json(origin, "top level must be an object"));
        }
        serde_json::from_value(value).map_err(|e| config_errors::invalid_json(origin, &e.to_string()))
    }

    /// Read the model section of a checkpoint sidecar
    pub fn model_config_from_sidecar(sidecar: &Value) -> Result<ModelConfig, UnifiedError> {
        let model = sidecar
            .get("model")
            .ok_or_else(|| config_errors::missing_field("model", "checkpoint sidecar"))?;
        serde_json::from_value(model.clone())
            .map_err(|e| config_errors::invalid_json("checkpoint sidecar", &e.to_string()))
    }
}
