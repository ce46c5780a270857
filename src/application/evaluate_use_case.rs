// ============================================================
// Layer 2 — EvaluateUseCase
// ============================================================
// Scores any model directory, FP32 or compressed, on a labelled
// file. The loader decides how the model runs; the metrics come
// from the same callback the trainer and tuner use.

use anyhow::Result;
use std::path::PathBuf;

use crate::data::encoder::TextEncoder;
use crate::infra::model_store::ModelStore;
use crate::ml::{
    self,
    evaluator::{default_metrics, Evaluator, Metrics},
    InferBackend,
};

#[derive(Debug, Clone)]
pub struct EvaluateConfig {
    pub model_dir:  PathBuf,
    pub eval_file:  PathBuf,
    pub batch_size: usize,
}

#[derive(Debug, Clone)]
pub struct EvaluationResult {
    pub quantized: bool,
    pub samples:   usize,
    pub metrics:   Metrics,
}

pub struct EvaluateUseCase {
    config: EvaluateConfig,
}

impl EvaluateUseCase {
    pub fn new(config: EvaluateConfig) -> Self {
        Self { config }
    }

    pub fn execute(&self) -> Result<EvaluationResult> {
        let cfg = &self.config;
        let device = ml::device();

        let store = ModelStore::new(&cfg.model_dir);
        let card = store.card()?;
        let tokenizer = store.tokenizer()?;
        let model = store.load::<InferBackend>(&device)?;

        let encoder = TextEncoder::new(&tokenizer, &card.labels, card.model.max_seq_len);
        let data = encoder.encode_file(&cfg.eval_file)?;

        let metrics = Evaluator::<InferBackend>::new(device, cfg.batch_size, default_metrics)
            .evaluate(&model, &data)?;
        tracing::info!("Evaluated '{}' on {} samples", cfg.model_dir.display(), data.samples().len());

        Ok(EvaluationResult {
            quantized: model.is_quantized(),
            samples:   data.samples().len(),
            metrics,
        })
    }
}
