//! Checkpoint Persistence
//!
//! A checkpoint is a safetensors file holding every model parameter plus a
//! JSON sidecar with the format version, the epoch/step identity and the
//! model configuration needed to rebuild the model.
//!
//! ```text
//! <dir>/checkpoint_epoch3_step1200.safetensors
//! <dir>/checkpoint_epoch3_step1200.json
//! <dir>/checkpoint_epoch3.safetensors
//! <dir>/checkpoint_epoch3.json
//! ```
//!
//! Files are written under a temporary name and renamed into place, so a
//! reader never observes a half-written checkpoint.

use crate::core::{UnifiedConfigLoader, UnifiedError, UnifiedResult};
use crate::model_architectures::config::ModelConfig;
use crate::model_architectures::nrms::NrmsModel;
use candle_core::Device;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Sidecar format version
pub const CHECKPOINT_FORMAT_VERSION: u32 = 1;

const WEIGHTS_EXT: &str = "safetensors";
const SIDECAR_EXT: &str = "json";

/// Checkpoint identity: an epoch, plus a step for partial-epoch checkpoints
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CheckpointId {
    pub epoch: usize,
    pub step: Option<usize>,
}

impl CheckpointId {
    pub fn epoch_end(epoch: usize) -> Self {
        Self { epoch, step: None }
    }

    pub fn at_step(epoch: usize, step: usize) -> Self {
        Self {
            epoch,
            step: Some(step),
        }
    }

    pub fn name(&self) -> String {
        match self.step {
            Some(step) => format!("checkpoint_epoch{}_step{}", self.epoch, step),
            None => format!("checkpoint_epoch{}", self.epoch),
        }
    }

    /// Parse a checkpoint file stem
    pub fn parse(stem: &str) -> Option<Self> {
        let rest = stem.strip_prefix("checkpoint_epoch")?;
        match rest.split_once("_step") {
            Some((epoch, step)) => Some(Self::at_step(epoch.parse().ok()?, step.parse().ok()?)),
            None => Some(Self::epoch_end(rest.parse().ok()?)),
        }
    }
}

impl Ord for CheckpointId {
    /// Training order: step checkpoints of an epoch precede its epoch-end checkpoint
    fn cmp(&self, other: &Self) -> Ordering {
        let key = |id: &Self| (id.epoch, id.step.unwrap_or(usize::MAX));
        key(self).cmp(&key(other))
    }
}

impl PartialOrd for CheckpointId {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl std::fmt::Display for CheckpointId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.name())
    }
}

/// Contents of the JSON sidecar
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckpointMetadata {
    pub format_version: u32,
    pub epoch: usize,
    pub step: Option<usize>,
    /// Batches completed when the checkpoint was taken
    pub global_step: usize,
    pub model: ModelConfig,
}

/// Result of a non-fatal save
#[derive(Debug)]
pub enum SaveOutcome {
    Saved(PathBuf),
    Failed(UnifiedError),
}

impl SaveOutcome {
    pub fn is_saved(&self) -> bool {
        matches!(self, SaveOutcome::Saved(_))
    }

    pub fn path(&self) -> Option<&Path> {
        match self {
            SaveOutcome::Saved(path) => Some(path),
            SaveOutcome::Failed(_) => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct CheckpointManager {
    dir: PathBuf,
    failed_writes: usize,
}

impl CheckpointManager {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            failed_writes: 0,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Failed writes since construction
    pub fn failed_writes(&self) -> usize {
        self.failed_writes
    }

    pub fn weights_path(&self, id: CheckpointId) -> PathBuf {
        self.dir.join(format!("{}.{}", id.name(), WEIGHTS_EXT))
    }

    pub fn sidecar_path(&self, id: CheckpointId) -> PathBuf {
        self.dir.join(format!("{}.{}", id.name(), SIDECAR_EXT))
    }

    /// Save without propagating failures; a failed write is logged and counted
    pub fn save(&mut self, model: &NrmsModel, id: CheckpointId, global_step: usize) -> SaveOutcome {
        match self.try_save(model, id, global_step) {
            Ok(path) => {
                info!("Checkpoint {} saved to {}", id, path.display());
                SaveOutcome::Saved(path)
            }
            Err(err) => {
                self.failed_writes += 1;
                warn!("Checkpoint {} not saved, retrying at the next interval: {}", id, err);
                SaveOutcome::Failed(err)
            }
        }
    }

    /// Write weights and sidecar, both staged under temporary names
    pub fn try_save(&self, model: &NrmsModel, id: CheckpointId, global_step: usize) -> UnifiedResult<PathBuf> {
        std::fs::create_dir_all(&self.dir).map_err(|e| UnifiedError::IO {
            operation: "create checkpoint directory".to_string(),
            path: Some(self.dir.display().to_string()),
            source: e,
        })?;

        let weights = self.weights_path(id);
        let staged_weights = staging_path(&weights);
        model
            .varmap()
            .save(&staged_weights)
            .map_err(|e| checkpoint_error("write weights", id, e))?;

        let metadata = CheckpointMetadata {
            format_version: CHECKPOINT_FORMAT_VERSION,
            epoch: id.epoch,
            step: id.step,
            global_step,
            model: model.config().clone(),
        };
        let sidecar = self.sidecar_path(id);
        let staged_sidecar = staging_path(&sidecar);
        let json = serde_json::to_string_pretty(&metadata)?;
        std::fs::write(&staged_sidecar, json).map_err(|e| checkpoint_error("write sidecar", id, e))?;

        std::fs::rename(&staged_weights, &weights).map_err(|e| checkpoint_error("publish weights", id, e))?;
        std::fs::rename(&staged_sidecar, &sidecar).map_err(|e| checkpoint_error("publish sidecar", id, e))?;
        Ok(weights)
    }

    /// Every complete checkpoint in the directory, oldest first
    pub fn list(&self) -> UnifiedResult<Vec<CheckpointId>> {
        if !self.dir.exists() {
            return Ok(Vec::new());
        }
        let entries = std::fs::read_dir(&self.dir).map_err(|e| UnifiedError::IO {
            operation: "list checkpoints".to_string(),
            path: Some(self.dir.display().to_string()),
            source: e,
        })?;

        let mut ids = Vec::new();
        for entry in entries {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some(WEIGHTS_EXT) {
                continue;
            }
            let Some(id) = path.file_stem().and_then(|s| s.to_str()).and_then(CheckpointId::parse) else {
                continue;
            };
            if self.sidecar_path(id).exists() {
                ids.push(id);
            }
        }
        ids.sort();
        Ok(ids)
    }

    pub fn latest(&self) -> UnifiedResult<Option<CheckpointId>> {
        Ok(self.list()?.pop())
    }

    pub fn read_metadata(&self, id: CheckpointId) -> UnifiedResult<CheckpointMetadata> {
        let path = self.sidecar_path(id);
        let value = UnifiedConfigLoader::load_json_config_from_path(&path)?;
        let version = value
            .get("format_version")
            .and_then(|v| v.as_u64())
            .unwrap_or_default();
        if version != u64::from(CHECKPOINT_FORMAT_VERSION) {
            return Err(UnifiedError::Checkpoint {
                operation: "read sidecar".to_string(),
                checkpoint: id.name(),
                reason: format!(
                    "unsupported format version {} (expected {})",
                    version, CHECKPOINT_FORMAT_VERSION
                ),
            });
        }
        // Validates the model section before the full parse
        UnifiedConfigLoader::model_config_from_sidecar(&value)?;
        Ok(serde_json::from_value(value)?)
    }

    /// Rebuild the model recorded by checkpoint `id`
    pub fn load(&self, id: CheckpointId, device: &Device) -> UnifiedResult<NrmsModel> {
        let metadata = self.read_metadata(id)?;
        NrmsModel::load(metadata.model, &self.weights_path(id), device)
    }

    /// Rebuild the model from the most recent checkpoint, if any
    pub fn load_latest(&self, device: &Device) -> UnifiedResult<Option<(CheckpointId, NrmsModel)>> {
        match self.latest()? {
            Some(id) => Ok(Some((id, self.load(id, device)?))),
            None => Ok(None),
        }
    }
}

fn staging_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

fn checkpoint_error(operation: &str, id: CheckpointId, err: impl std::fmt::Display) -> UnifiedError {
    UnifiedError::Checkpoint {
        operation: operation.to_string(),
        checkpoint: id.name(),
        reason: err.to_string(),
    }
}
