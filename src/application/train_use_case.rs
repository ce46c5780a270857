// ============================================================
// Layer 2 — TrainUseCase
// ============================================================
// Trains the FP32 model every compression command starts from.
//
//   Step 1: Load the dataset file(s)     (Layer 4 - data)
//   Step 2: Split off validation data    (Layer 4 - data)
//   Step 3: Label set + tokenizer        (Layer 3 / Layer 6)
//   Step 4: Encode samples               (Layer 4 - data)
//   Step 5: Run the training loop        (Layer 5 - ml),
//           optionally from the last epoch snapshot
//   Step 6: Save the model directory     (Layer 6 - infra)
//
// Reference: Rust Book §13 (Iterators and Closures)
//            Burn Book §5 (Training)

use anyhow::Result;
use burn::module::AutodiffModule;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::data::{
    dataset::ClassificationDataset,
    encoder::TextEncoder,
    loader::DatasetLoader,
    preprocessor::Preprocessor,
    splitter::split_train_val,
};
use crate::domain::error::{invalid, CompressionError};
use crate::domain::sample::{LabelSet, TextSample};
use crate::domain::traits::SampleSource;
use crate::infra::{
    checkpoint::{CheckpointManager, ModelCard, CHECKPOINT_DIR},
    metrics::EpochMetrics,
    model_store::ModelStore,
    tokenizer_store::{vocab_bound, TokenizerStore},
};
use crate::ml::{
    self,
    evaluator::default_metrics,
    model::ClassifierConfig,
    trainer::{Trainer, TrainingArgs},
    TrainBackend,
};

// ─── Training Configuration ──────────────────────────────────────────────────
// Model hyperparameters plus the trainer arguments. The output
// directory is `args.output_dir`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainConfig {
    pub train_file:   PathBuf,
    /// Separate evaluation file; when absent `val_fraction` of the
    /// training file is held out instead
    pub eval_file:    Option<PathBuf>,
    pub val_fraction: f64,
    pub vocab_size:   usize,
    pub max_seq_len:  usize,
    pub d_model:      usize,
    pub num_heads:    usize,
    pub num_layers:   usize,
    pub d_ff:         usize,
    pub dropout:      f64,
    /// Start from the newest epoch snapshot in the output directory
    pub resume:       bool,
    pub args:         TrainingArgs,
}

impl TrainConfig {
    fn validate(&self) -> Result<(), CompressionError> {
        if !(0.0..1.0).contains(&self.val_fraction) {
            return Err(invalid(format!(
                "val_fraction must be in [0, 1), got {}",
                self.val_fraction
            )));
        }
        self.args.validate()
    }
}

/// What a finished training run reports back to the CLI.
#[derive(Debug, Clone)]
pub struct TrainSummary {
    pub output_dir:  PathBuf,
    pub labels:      LabelSet,
    pub train_size:  usize,
    pub eval_size:   usize,
    pub global_step: usize,
    /// Epoch the run resumed after (0 for a fresh run)
    pub start_epoch: usize,
    pub last_epoch:  Option<EpochMetrics>,
}

// ─── TrainUseCase ─────────────────────────────────────────────────────────────
pub struct TrainUseCase {
    config: TrainConfig,
}

impl TrainUseCase {
    pub fn new(config: TrainConfig) -> Self {
        Self { config }
    }

    pub fn execute(&self) -> Result<TrainSummary> {
        let cfg = &self.config;
        cfg.validate()?;

        // ── Step 1 + 2: load and split ────────────────────────────────────────
        let samples = DatasetLoader::new(&cfg.train_file).load_all()?;
        let (train_samples, eval_samples) = match &cfg.eval_file {
            Some(path) => (samples, DatasetLoader::new(path).load_all()?),
            None => split_train_val(samples, 1.0 - cfg.val_fraction, cfg.args.seed),
        };

        // ── Step 3: labels and tokenizer ──────────────────────────────────────
        let labels = LabelSet::from_samples(&train_samples);
        tracing::info!("Found {} labels: {:?}", labels.len(), labels.names());

        let tokenizer = TokenizerStore::new(&cfg.args.output_dir)
            .build(&cleaned_texts(&train_samples), cfg.vocab_size)?;

        let model_config = ClassifierConfig::new(vocab_bound(&tokenizer), labels.len())
            .with_max_seq_len(cfg.max_seq_len)
            .with_d_model(cfg.d_model)
            .with_num_heads(cfg.num_heads)
            .with_num_layers(cfg.num_layers)
            .with_d_ff(cfg.d_ff)
            .with_dropout(cfg.dropout);
        model_config.check()?;

        // ── Step 4: encode ────────────────────────────────────────────────────
        let encoder = TextEncoder::new(&tokenizer, &labels, cfg.max_seq_len);
        let train_dataset = ClassificationDataset::new(encoder.encode_all(&train_samples)?);
        let eval_dataset = ClassificationDataset::new(encoder.encode_all(&eval_samples)?);
        let eval = (!eval_dataset.samples().is_empty()).then_some(&eval_dataset);
        tracing::info!(
            "Split: {} train, {} validation",
            train_dataset.samples().len(),
            eval_dataset.samples().len()
        );

        // ── Step 5: train ─────────────────────────────────────────────────────
        let device = ml::device();
        let model = model_config.init::<TrainBackend>(&device);
        let (model, start_epoch) = if cfg.resume {
            CheckpointManager::new(cfg.args.output_dir.join(CHECKPOINT_DIR))?.load_latest(model, &device)?
        } else {
            (model, 0)
        };
        let trainer = Trainer::new(&cfg.args, &train_dataset, eval, default_metrics, device)
            .resume_from(start_epoch);
        let out = trainer.train(model)?;

        // ── Step 6: save ──────────────────────────────────────────────────────
        let card = ModelCard::new(model_config, labels.clone());
        ModelStore::new(&cfg.args.output_dir).save_float(&out.model.valid(), &card)?;

        Ok(TrainSummary {
            output_dir:  cfg.args.output_dir.clone(),
            labels,
            train_size:  train_dataset.samples().len(),
            eval_size:   eval_dataset.samples().len(),
            global_step: out.global_step,
            start_epoch,
            last_epoch:  out.history.last().cloned(),
        })
    }
}

fn cleaned_texts(samples: &[TextSample]) -> Vec<String> {
    let preprocessor = Preprocessor::new();
    samples.iter().map(|s| preprocessor.clean(&s.text)).collect()
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::tests::{train_tiny_model, write_sentiment_file};
    use crate::infra::metrics::METRICS_FILE;

    #[test]
    fn test_training_writes_a_float_model_directory() {
        let dir = tempfile::tempdir().unwrap();
        let output = train_tiny_model(dir.path());

        let store = ModelStore::new(&output);
        assert!(store.is_model_directory());
        assert!(!store.is_compressed());
        assert!(output.join(METRICS_FILE).exists());
        assert!(TokenizerStore::new(&output).exists());

        let card = store.card().unwrap();
        assert_eq!(card.labels.names(), &["neg".to_string(), "pos".to_string()]);
        assert_eq!(card.model.num_labels, 2);
    }

    fn checkpointed_config(dir: &std::path::Path, epochs: usize, resume: bool) -> TrainConfig {
        TrainConfig {
            train_file:   write_sentiment_file(dir, "train.jsonl"),
            eval_file:    None,
            val_fraction: 0.25,
            vocab_size:   64,
            max_seq_len:  8,
            d_model:      16,
            num_heads:    2,
            num_layers:   1,
            d_ff:         32,
            dropout:      0.0,
            resume,
            args: TrainingArgs {
                epochs,
                batch_size:       6,
                learning_rate:    3e-3,
                logging_steps:    0,
                save_checkpoints: true,
                ..TrainingArgs::new(dir.join("out"))
            },
        }
    }

    #[test]
    fn test_resume_continues_after_the_last_checkpoint() {
        let dir = tempfile::tempdir().unwrap();
        let first = TrainUseCase::new(checkpointed_config(dir.path(), 2, false)).execute().unwrap();
        assert_eq!(first.start_epoch, 0);
        // 18 training samples, batch 6
        assert_eq!(first.global_step, 2 * 3);

        let resumed = TrainUseCase::new(checkpointed_config(dir.path(), 4, true)).execute().unwrap();
        assert_eq!(resumed.start_epoch, 2);
        assert_eq!(resumed.global_step, 4 * 3);
        assert_eq!(resumed.last_epoch.unwrap().epoch, 4);

        let out = dir.path().join("out");
        let csv = std::fs::read_to_string(out.join(METRICS_FILE)).unwrap();
        let epochs: Vec<&str> = csv.lines().skip(1).map(|l| l.split(',').next().unwrap()).collect();
        assert_eq!(epochs, vec!["1", "2", "3", "4"]);
        let manager = CheckpointManager::new(out.join(CHECKPOINT_DIR)).unwrap();
        assert_eq!(manager.latest_epoch().unwrap(), 4);
    }

    #[test]
    fn test_resume_past_the_requested_epochs_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        TrainUseCase::new(checkpointed_config(dir.path(), 2, false)).execute().unwrap();
        assert!(TrainUseCase::new(checkpointed_config(dir.path(), 2, true)).execute().is_err());
    }

    #[test]
    fn test_val_fraction_out_of_range_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let data = write_sentiment_file(dir.path(), "train.jsonl");
        let config = TrainConfig {
            train_file:   data,
            eval_file:    None,
            val_fraction: 1.0,
            vocab_size:   64,
            max_seq_len:  8,
            d_model:      16,
            num_heads:    2,
            num_layers:   1,
            d_ff:         32,
            dropout:      0.0,
            resume:       false,
            args:         TrainingArgs::new(dir.path().join("out")),
        };
        assert!(TrainUseCase::new(config).execute().is_err());
        assert!(!dir.path().join("out").exists());
    }
}
