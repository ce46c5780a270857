// ============================================================
// Layer 6 — Model Store (save / load model directories)
// ============================================================
// Every command writes its result as a directory:
//
//   config.json        model card (architecture + label names)
//   model.mpk.gz       weights
//   tokenizer.json     word-level tokenizer
//   compression.json   only for compressed models
//
// compression.json records what was done to the model: the
// compression config, the quantization plan (per-layer scales,
// activation scheme, fallback layers), the tuning trials and the
// sparsity reached. The loader looks for it to decide how to
// rebuild the model:
//
//   no manifest, or no plan   → LoadedModel::Float
//   manifest with a plan      → LoadedModel::Quantized
//
// Quantized weights are stored already snapped to their INT8
// grid, so loading only has to reattach the plan.

use anyhow::{Context, Result};
use burn::prelude::*;
use serde::{Deserialize, Serialize};
use std::{
    fs,
    path::{Path, PathBuf},
};
use tokenizers::Tokenizer;

use crate::domain::compression::CompressionConfig;
use crate::domain::error::CompressionError;
use crate::domain::traits::ModelDirectory;
use crate::infra::checkpoint::{load_weights, save_weights, ModelCard, CARD_FILE, WEIGHTS_FILE, WEIGHTS_STEM};
use crate::infra::tokenizer_store::TokenizerStore;
use crate::ml::evaluator::Metrics;
use crate::ml::model::{SequenceClassifier, TextClassifier};
use crate::ml::pruner::SparsityReport;
use crate::ml::quantizer::{QuantizationPlan, QuantizedClassifier};
use crate::ml::tuner::TuningReport;

pub const COMPRESSION_FILE: &str = "compression.json";

const FORMAT_VERSION: u32 = 1;

/// Contents of compression.json.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompressionManifest {
    pub format_version: u32,
    pub config: CompressionConfig,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quantization: Option<QuantizationPlan>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tuning: Option<TuningReport>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sparsity: Option<SparsityReport>,
    /// Evaluation metrics of the compressed model, when available
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metrics: Option<Metrics>,
}

impl CompressionManifest {
    pub fn new(config: CompressionConfig) -> Self {
        Self {
            format_version: FORMAT_VERSION,
            config,
            quantization: None,
            tuning: None,
            sparsity: None,
            metrics: None,
        }
    }

    pub fn with_quantization(mut self, plan: QuantizationPlan) -> Self {
        self.quantization = Some(plan);
        self
    }

    pub fn with_tuning(mut self, report: Option<TuningReport>) -> Self {
        self.tuning = report;
        self
    }

    pub fn with_sparsity(mut self, report: SparsityReport) -> Self {
        self.sparsity = Some(report);
        self
    }

    pub fn with_metrics(mut self, metrics: Option<Metrics>) -> Self {
        self.metrics = metrics;
        self
    }
}

impl ModelDirectory for CompressionManifest {
    fn save_to(&self, dir: &Path) -> Result<()> {
        fs::create_dir_all(dir).with_context(|| format!("Cannot create '{}'", dir.display()))?;
        let path = dir.join(COMPRESSION_FILE);
        fs::write(&path, serde_json::to_string_pretty(self)?)
            .with_context(|| format!("Cannot write '{}'", path.display()))
    }

    fn load_from(dir: &Path) -> Result<Self> {
        let path = dir.join(COMPRESSION_FILE);
        let json = fs::read_to_string(&path)
            .with_context(|| format!("Cannot read '{}'", path.display()))?;
        let manifest: Self = serde_json::from_str(&json)
            .with_context(|| format!("'{}' is not a valid compression manifest", path.display()))?;
        anyhow::ensure!(
            manifest.format_version <= FORMAT_VERSION,
            "'{}' has format version {}, this build reads up to {}",
            path.display(),
            manifest.format_version,
            FORMAT_VERSION
        );
        Ok(manifest)
    }
}

/// A model restored from a directory.
pub enum LoadedModel<B: Backend> {
    Float(TextClassifier<B>),
    Quantized(QuantizedClassifier<B>),
}

impl<B: Backend> LoadedModel<B> {
    pub fn is_quantized(&self) -> bool {
        matches!(self, LoadedModel::Quantized(_))
    }

    /// The underlying network, with INT8-grid weights if quantized.
    pub fn classifier(&self) -> &TextClassifier<B> {
        match self {
            LoadedModel::Float(model) => model,
            LoadedModel::Quantized(q) => q.model(),
        }
    }
}

impl<B: Backend> SequenceClassifier<B> for LoadedModel<B> {
    fn logits(&self, input_ids: Tensor<B, 2, Int>, attention_mask: Tensor<B, 2, Int>) -> Tensor<B, 2> {
        match self {
            LoadedModel::Float(model) => model.logits(input_ids, attention_mask),
            LoadedModel::Quantized(q) => q.logits(input_ids, attention_mask),
        }
    }

    fn num_labels(&self) -> usize {
        self.classifier().num_labels()
    }
}

/// One model directory on disk.
pub struct ModelStore {
    dir: PathBuf,
}

impl ModelStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn is_model_directory(&self) -> bool {
        self.dir.join(CARD_FILE).is_file() && self.dir.join(WEIGHTS_FILE).is_file()
    }

    pub fn is_compressed(&self) -> bool {
        self.dir.join(COMPRESSION_FILE).is_file()
    }

    fn ensure_model_directory(&self) -> Result<()> {
        if !self.is_model_directory() {
            return Err(CompressionError::NotAModelDirectory(self.dir.clone()).into());
        }
        Ok(())
    }

    pub fn card(&self) -> Result<ModelCard> {
        self.ensure_model_directory()?;
        ModelCard::load(&self.dir)
    }

    pub fn manifest(&self) -> Result<Option<CompressionManifest>> {
        if !self.is_compressed() {
            return Ok(None);
        }
        CompressionManifest::load_from(&self.dir).map(Some)
    }

    pub fn tokenizer(&self) -> Result<Tokenizer> {
        TokenizerStore::new(&self.dir).load()
    }

    /// Write the card and weights of an uncompressed model. A stale
    /// compression.json from an earlier run is removed.
    pub fn save_float<B: Backend>(&self, model: &TextClassifier<B>, card: &ModelCard) -> Result<()> {
        self.write_model(model, card)?;
        let stale = self.dir.join(COMPRESSION_FILE);
        if stale.exists() {
            fs::remove_file(&stale).with_context(|| format!("Cannot remove '{}'", stale.display()))?;
        }
        tracing::info!("Saved FP32 model to '{}'", self.dir.display());
        Ok(())
    }

    /// Write a compressed model: card, weights and compression.json.
    pub fn save_compressed<B: Backend>(
        &self,
        model:    &TextClassifier<B>,
        card:     &ModelCard,
        manifest: &CompressionManifest,
    ) -> Result<()> {
        self.write_model(model, card)?;
        manifest.save_to(&self.dir)?;
        tracing::info!("Saved compressed model to '{}'", self.dir.display());
        Ok(())
    }

    fn write_model<B: Backend>(&self, model: &TextClassifier<B>, card: &ModelCard) -> Result<()> {
        fs::create_dir_all(&self.dir)
            .with_context(|| format!("Cannot create '{}'", self.dir.display()))?;
        card.save(&self.dir)?;
        save_weights(model, &self.dir.join(WEIGHTS_STEM))
    }

    /// Rebuild the network and load its stored weights, ignoring any plan.
    pub fn load_classifier<B: Backend>(&self, device: &B::Device) -> Result<TextClassifier<B>> {
        let card = self.card()?;
        let model = card.model.init::<B>(device);
        load_weights(model, &self.dir.join(WEIGHTS_STEM), device)
    }

    /// Load the directory in whichever form it was saved.
    pub fn load<B: Backend>(&self, device: &B::Device) -> Result<LoadedModel<B>> {
        let model = self.load_classifier::<B>(device)?;
        match self.manifest()?.and_then(|m| m.quantization) {
            Some(plan) => {
                tracing::info!(
                    "Loaded {} model: {} INT8 layers, {} FP32 fallback",
                    plan.approach,
                    plan.layers.len(),
                    plan.fallback.len()
                );
                Ok(LoadedModel::Quantized(QuantizedClassifier::from_parts(model, plan)))
            }
            None => Ok(LoadedModel::Float(model)),
        }
    }
}
