// ============================================================
// Layer 6 — Checkpoints and Model Cards
// ============================================================
// Saves and restores classifier weights with Burn's named
// MessagePack recorder (gzip-compressed, full precision).
//
// Records stay full precision: quantized weights sit exactly on
// an INT8 grid and a half-precision record moves them off it.
//
// What gets written:
//   config.json               model card: architecture + label names
//   model.mpk.gz              final weights
//   checkpoints/
//     model_epoch_1.mpk.gz    weights after epoch 1 (optional)
//     ...
//     latest_epoch.json       number of the newest epoch checkpoint
//
// The card is what makes a directory loadable: without the exact
// architecture the model cannot be rebuilt before the record is
// loaded into it.
//
// Reference: Burn Book §5 (Records and Checkpointing)

use anyhow::{Context, Result};
use burn::{
    prelude::*,
    record::{FullPrecisionSettings, NamedMpkGzFileRecorder, Recorder},
};
use serde::{Deserialize, Serialize};
use std::{
    fs,
    path::{Path, PathBuf},
};

use crate::domain::sample::LabelSet;
use crate::ml::model::{ClassifierConfig, TextClassifier};

pub const CARD_FILE: &str = "config.json";

/// Weights file stem; the recorder appends `.mpk.gz`.
pub const WEIGHTS_STEM: &str = "model";

pub const WEIGHTS_FILE: &str = "model.mpk.gz";

/// Subdirectory of the output directory holding epoch snapshots.
pub const CHECKPOINT_DIR: &str = "checkpoints";

type WeightRecorder = NamedMpkGzFileRecorder<FullPrecisionSettings>;

/// Everything needed to rebuild a classifier before loading its weights.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelCard {
    pub model:  ClassifierConfig,
    pub labels: LabelSet,
}

impl ModelCard {
    pub fn new(model: ClassifierConfig, labels: LabelSet) -> Self {
        Self { model, labels }
    }

    pub fn save(&self, dir: &Path) -> Result<()> {
        let path = dir.join(CARD_FILE);
        fs::write(&path, serde_json::to_string_pretty(self)?)
            .with_context(|| format!("Cannot write model card to '{}'", path.display()))?;
        tracing::debug!("Saved model card to '{}'", path.display());
        Ok(())
    }

    pub fn load(dir: &Path) -> Result<Self> {
        let path = dir.join(CARD_FILE);
        let json = fs::read_to_string(&path)
            .with_context(|| format!("Cannot read model card from '{}'", path.display()))?;
        serde_json::from_str(&json)
            .with_context(|| format!("'{}' is not a valid model card", path.display()))
    }
}

/// Write `model` to `{stem}.mpk.gz`.
pub fn save_weights<B: Backend>(model: &TextClassifier<B>, stem: &Path) -> Result<()> {
    WeightRecorder::new()
        .record(model.clone().into_record(), stem.to_path_buf())
        .with_context(|| format!("Failed to save weights to '{}'", stem.display()))
}

/// Load `{stem}.mpk.gz` into `model`. The architecture must match.
pub fn load_weights<B: Backend>(
    model:  TextClassifier<B>,
    stem:   &Path,
    device: &B::Device,
) -> Result<TextClassifier<B>> {
    let record = WeightRecorder::new()
        .load(stem.to_path_buf(), device)
        .with_context(|| format!("Cannot load weights from '{}'", stem.display()))?;
    Ok(model.load_record(record))
}

/// Per-epoch weight snapshots under `{output_dir}/checkpoints`.
pub struct CheckpointManager {
    dir: PathBuf,
}

impl CheckpointManager {
    /// Create the manager, creating the directory (like `mkdir -p`).
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)
            .with_context(|| format!("Cannot create checkpoint directory '{}'", dir.display()))?;
        Ok(Self { dir })
    }

    pub fn save_model<B: Backend>(&self, model: &TextClassifier<B>, epoch: usize) -> Result<()> {
        save_weights(model, &self.dir.join(format!("model_epoch_{epoch}")))?;

        let latest_path = self.dir.join("latest_epoch.json");
        fs::write(&latest_path, serde_json::to_string(&epoch)?)
            .with_context(|| "Failed to write latest_epoch.json")?;

        tracing::debug!("Saved checkpoint: epoch {}", epoch);
        Ok(())
    }

    /// Load the newest epoch snapshot into `model`, returning the epoch
    /// it was taken after.
    pub fn load_latest<B: Backend>(
        &self,
        model:  TextClassifier<B>,
        device: &B::Device,
    ) -> Result<(TextClassifier<B>, usize)> {
        let epoch = self.latest_epoch()?;
        tracing::info!("Loading checkpoint from epoch {}", epoch);
        let model = load_weights(model, &self.dir.join(format!("model_epoch_{epoch}")), device)?;
        Ok((model, epoch))
    }

    pub fn latest_epoch(&self) -> Result<usize> {
        let path = self.dir.join("latest_epoch.json");
        let s = fs::read_to_string(&path)
            .with_context(|| format!("No checkpoint found in '{}'", self.dir.display()))?;
        Ok(serde_json::from_str::<usize>(&s)?)
    }
}
