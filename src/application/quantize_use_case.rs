// ============================================================
// Layer 2 — QuantizeUseCase
// ============================================================
// Post-training quantization of a saved FP32 model directory.
//
//   Step 1: Check the compression config
//   Step 2: Load model, tokenizer and labels   (Layer 6 - infra)
//   Step 3: Encode calibration / eval files    (Layer 4 - data)
//   Step 4: Calibrate, tune, convert           (Layer 5 - ml)
//   Step 5: Save the compressed directory      (Layer 6 - infra)
//
// Without an evaluation file every quantizable layer is converted
// and no tuning happens. With one, the tuner looks for a fallback
// set whose metric stays within the tolerance; if it finds none
// the run fails and the output directory is left untouched.

use anyhow::Result;
use std::path::PathBuf;

use crate::data::{dataset::ClassificationDataset, encoder::TextEncoder};
use crate::domain::compression::CompressionConfig;
use crate::domain::error::invalid;
use crate::infra::{
    model_store::{CompressionManifest, ModelStore},
    tokenizer_store::TokenizerStore,
};
use crate::ml::{
    self,
    evaluator::{default_metrics, metric, Evaluator, Metrics},
    model::SequenceClassifier,
    quantizer::PostTrainingQuantizer,
    InferBackend,
};

#[derive(Debug, Clone)]
pub struct QuantizeConfig {
    pub model_dir:        PathBuf,
    pub output_dir:       PathBuf,
    pub calibration_file: Option<PathBuf>,
    pub eval_file:        Option<PathBuf>,
    pub batch_size:       usize,
    pub compression:      CompressionConfig,
}

#[derive(Debug, Clone)]
pub struct QuantizeSummary {
    pub output_dir:   PathBuf,
    pub approach:     String,
    pub int8_layers:  usize,
    pub fallback:     Vec<String>,
    pub trials:       Option<usize>,
    pub baseline:     Option<f64>,
    pub metrics:      Option<Metrics>,
    pub float_bytes:  usize,
    pub stored_bytes: usize,
}

pub struct QuantizeUseCase {
    config: QuantizeConfig,
}

impl QuantizeUseCase {
    pub fn new(config: QuantizeConfig) -> Self {
        Self { config }
    }

    pub fn execute(&self) -> Result<QuantizeSummary> {
        let cfg = &self.config;

        // ── Step 1: config ────────────────────────────────────────────────────
        cfg.compression.validate()?;
        let quant = cfg
            .compression
            .quantization
            .as_ref()
            .ok_or_else(|| invalid("quantize needs a quantization section"))?;
        if cfg.compression.quantization_aware() {
            return Err(invalid(format!("{} runs during training; use the compress command", quant.approach)).into());
        }
        if cfg.compression.pruning.is_some() || cfg.compression.distillation.is_some() {
            tracing::warn!("Pruning and distillation settings are ignored by quantize");
        }

        // ── Step 2: load ──────────────────────────────────────────────────────
        let device = ml::device();
        let source = ModelStore::new(&cfg.model_dir);
        let card = source.card()?;
        if source.is_compressed() {
            tracing::warn!("'{}' is already compressed; quantizing its stored weights", cfg.model_dir.display());
        }
        let tokenizer = source.tokenizer()?;
        let model = source.load_classifier::<InferBackend>(&device)?;

        // ── Step 3: data ──────────────────────────────────────────────────────
        let encoder = TextEncoder::new(&tokenizer, &card.labels, card.model.max_seq_len);
        let calibration: Option<ClassificationDataset> =
            cfg.calibration_file.as_deref().map(|p| encoder.encode_file(p)).transpose()?;
        let eval: Option<ClassificationDataset> =
            cfg.eval_file.as_deref().map(|p| encoder.encode_file(p)).transpose()?;

        // ── Step 4: quantize ──────────────────────────────────────────────────
        let evaluator = Evaluator::<InferBackend>::new(device, cfg.batch_size, default_metrics);
        let metric_name = cfg.compression.metric.as_str();
        let evaluate = eval.as_ref().map(|data| {
            let evaluator = &evaluator;
            move |candidate: &dyn SequenceClassifier<InferBackend>| -> Result<f64> {
                let metrics = evaluator.evaluate(candidate, data)?;
                Ok(metric(&metrics, metric_name)?)
            }
        });

        let quantizer = PostTrainingQuantizer::new(quant, device, cfg.batch_size);
        let outcome = quantizer.fit(model, calibration.as_ref(), evaluate)?;

        let metrics = eval
            .as_ref()
            .map(|data| evaluator.evaluate(&outcome.model, data))
            .transpose()?;
        let (float_bytes, stored_bytes) = outcome.model.weight_bytes();
        tracing::info!(
            "Linear weights: {} bytes FP32 → {} bytes quantized",
            float_bytes,
            stored_bytes
        );

        // ── Step 5: save ──────────────────────────────────────────────────────
        let plan = outcome.model.plan().clone();
        let summary = QuantizeSummary {
            output_dir:   cfg.output_dir.clone(),
            approach:     plan.approach.to_string(),
            int8_layers:  plan.layers.len(),
            fallback:     plan.fallback.clone(),
            trials:       outcome.tuning.as_ref().map(|t| t.trials.len()),
            baseline:     outcome.tuning.as_ref().map(|t| t.baseline),
            metrics:      metrics.clone(),
            float_bytes,
            stored_bytes,
        };

        let manifest = CompressionManifest::new(cfg.compression.clone())
            .with_quantization(plan)
            .with_tuning(outcome.tuning)
            .with_metrics(metrics);
        let target = ModelStore::new(&cfg.output_dir);
        target.save_compressed(outcome.model.model(), &card, &manifest)?;
        TokenizerStore::new(&cfg.output_dir).save(&tokenizer)?;

        Ok(summary)
    }
}
