// ============================================================
// Layer 1 — CLI Commands and Arguments
// ============================================================
// Defines the five subcommands and their flags:
//
//   train      FP32 model from a labelled text file
//   quantize   post-training dynamic / static INT8
//   compress   QAT, pruning and distillation while fine-tuning
//   evaluate   metrics of any model directory
//   inspect    what a model directory contains
//
// quantize and compress build a CompressionConfig from their
// flags, or read it from a JSON file given with --config (the
// flags are then ignored).
//
// Reference: Rust Book §12 (Building a CLI Program)

use anyhow::{bail, Context, Result};
use clap::{Args, Subcommand, ValueEnum};
use std::path::{Path, PathBuf};

use crate::application::{
    compress_use_case::CompressConfig,
    evaluate_use_case::EvaluateConfig,
    quantize_use_case::QuantizeConfig,
    train_use_case::TrainConfig,
};
use crate::domain::compression::CompressionConfig;
use crate::domain::distillation::DistillationConfig;
use crate::domain::pruning::{PruningConfig, PruningPattern};
use crate::domain::quantization::{
    AccuracyCriterion, QuantizationApproach, QuantizationConfig, TuningCriterion, WeightGranularity,
};
use crate::ml::trainer::TrainingArgs;

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Train an FP32 classifier on a labelled text file
    Train(TrainArgs),

    /// Post-training quantization of a saved model
    Quantize(QuantizeArgs),

    /// Fine-tune a saved model with QAT, pruning and/or distillation
    Compress(CompressArgs),

    /// Evaluate a model directory on a labelled file
    Evaluate(EvaluateArgs),

    /// Show how a model directory was compressed
    Inspect(InspectArgs),
}

// ─── Shared flags ─────────────────────────────────────────────────────────────

/// Trainer settings shared by `train` and `compress`.
#[derive(Args, Debug, Clone)]
pub struct TrainingFlags {
    /// Number of full passes through the training data
    #[arg(long, default_value_t = 3)]
    pub epochs: usize,

    /// Samples per optimiser step
    #[arg(long, default_value_t = 16)]
    pub batch_size: usize,

    /// Initial learning rate, decayed linearly to zero
    #[arg(long, default_value_t = 5e-4)]
    pub lr: f64,

    /// Seed for shuffling and the train/validation split
    #[arg(long, default_value_t = 42)]
    pub seed: u64,

    /// Log the running loss every N steps (0 = never)
    #[arg(long, default_value_t = 50)]
    pub logging_steps: usize,

    /// Keep a weight snapshot after every epoch under checkpoints/
    #[arg(long)]
    pub save_checkpoints: bool,
}

impl TrainingFlags {
    fn into_args(self, output_dir: PathBuf) -> TrainingArgs {
        TrainingArgs {
            output_dir,
            epochs:           self.epochs,
            batch_size:       self.batch_size,
            learning_rate:    self.lr,
            seed:             self.seed,
            logging_steps:    self.logging_steps,
            save_checkpoints: self.save_checkpoints,
        }
    }
}

#[derive(ValueEnum, Debug, Clone, Copy)]
pub enum Granularity {
    PerTensor,
    PerChannel,
}

impl From<Granularity> for WeightGranularity {
    fn from(g: Granularity) -> Self {
        match g {
            Granularity::PerTensor  => WeightGranularity::PerTensor,
            Granularity::PerChannel => WeightGranularity::PerChannel,
        }
    }
}

/// Read and validate a CompressionConfig JSON file.
fn read_compression_config(path: &Path) -> Result<CompressionConfig> {
    let json = std::fs::read_to_string(path)
        .with_context(|| format!("Cannot read compression config '{}'", path.display()))?;
    CompressionConfig::from_json(&json)
        .with_context(|| format!("Invalid compression config '{}'", path.display()))
}

// ─── train ────────────────────────────────────────────────────────────────────

#[derive(Args, Debug)]
pub struct TrainArgs {
    /// JSON Lines or CSV file with text and label fields
    #[arg(long)]
    pub train_file: PathBuf,

    /// Separate evaluation file (default: hold out --val-fraction)
    #[arg(long)]
    pub eval_file: Option<PathBuf>,

    /// Directory the trained model is written to
    #[arg(long, default_value = "models/base")]
    pub output_dir: PathBuf,

    /// Share of the training file held out when no eval file is given
    #[arg(long, default_value_t = 0.1)]
    pub val_fraction: f64,

    /// Maximum vocabulary size, special tokens included
    #[arg(long, default_value_t = 8000)]
    pub vocab_size: usize,

    /// Tokens per input sequence: [CLS] text [SEP] + padding
    #[arg(long, default_value_t = 128)]
    pub max_seq_len: usize,

    /// Hidden dimension of the transformer
    #[arg(long, default_value_t = 128)]
    pub d_model: usize,

    /// Attention heads; d_model must be divisible by this
    #[arg(long, default_value_t = 4)]
    pub num_heads: usize,

    /// Stacked encoder blocks
    #[arg(long, default_value_t = 2)]
    pub num_layers: usize,

    /// Inner dimension of the feed-forward network
    #[arg(long, default_value_t = 512)]
    pub d_ff: usize,

    #[arg(long, default_value_t = 0.1)]
    pub dropout: f64,

    /// Initialise from the newest checkpoint in --output-dir
    #[arg(long)]
    pub resume: bool,

    #[command(flatten)]
    pub training: TrainingFlags,
}

/// The application layer never sees clap types.
impl From<TrainArgs> for TrainConfig {
    fn from(a: TrainArgs) -> Self {
        TrainConfig {
            train_file:   a.train_file,
            eval_file:    a.eval_file,
            val_fraction: a.val_fraction,
            vocab_size:   a.vocab_size,
            max_seq_len:  a.max_seq_len,
            d_model:      a.d_model,
            num_heads:    a.num_heads,
            num_layers:   a.num_layers,
            d_ff:         a.d_ff,
            dropout:      a.dropout,
            resume:       a.resume,
            args:         a.training.into_args(a.output_dir),
        }
    }
}

// ─── quantize ─────────────────────────────────────────────────────────────────

#[derive(ValueEnum, Debug, Clone, Copy)]
pub enum PostTrainingApproach {
    /// INT8 weights, activation ranges computed per batch
    Dynamic,
    /// INT8 weights and activations, ranges from calibration data
    Static,
}

#[derive(Args, Debug)]
pub struct QuantizeArgs {
    /// FP32 model directory to quantize
    #[arg(long)]
    pub model_dir: PathBuf,

    /// Where the quantized model is written
    #[arg(long)]
    pub output_dir: PathBuf,

    /// Representative samples for static quantization
    #[arg(long)]
    pub calibration_file: Option<PathBuf>,

    /// Enables accuracy-aware tuning against the FP32 baseline
    #[arg(long)]
    pub eval_file: Option<PathBuf>,

    #[arg(long, default_value_t = 32)]
    pub batch_size: usize,

    /// CompressionConfig JSON; overrides every flag below
    #[arg(long)]
    pub config: Option<PathBuf>,

    #[arg(long, value_enum, default_value_t = PostTrainingApproach::Dynamic)]
    pub approach: PostTrainingApproach,

    #[arg(long, value_enum, default_value_t = Granularity::PerChannel)]
    pub granularity: Granularity,

    /// Tolerable metric loss against the FP32 baseline
    #[arg(long, default_value_t = 0.01)]
    pub tolerance: f64,

    /// Treat --tolerance as an absolute difference instead of a relative one
    #[arg(long)]
    pub absolute: bool,

    /// The tuned metric improves as it decreases (e.g. eval_loss)
    #[arg(long)]
    pub lower_is_better: bool,

    #[arg(long, default_value_t = 100)]
    pub max_trials: usize,

    /// Tuning time limit in seconds (0 = unlimited)
    #[arg(long, default_value_t = 0)]
    pub timeout: u64,

    /// Maximum number of calibration samples
    #[arg(long, default_value_t = 100)]
    pub calibration_samples: usize,

    /// Metric the tolerance applies to
    #[arg(long, default_value = "accuracy")]
    pub metric: String,

    /// Layers kept in FP32 regardless of tuning (repeatable)
    #[arg(long)]
    pub exclude: Vec<String>,
}

impl QuantizeArgs {
    fn compression_config(&self) -> Result<CompressionConfig> {
        if let Some(path) = &self.config {
            let config = read_compression_config(path)?;
            match &config.quantization {
                Some(q) if q.approach.is_post_training() => return Ok(config),
                Some(q) => bail!(
                    "'{}' asks for {}, which runs during training; use the compress command",
                    path.display(),
                    q.approach
                ),
                None => bail!("'{}' has no quantization section", path.display()),
            }
        }

        let approach = match self.approach {
            PostTrainingApproach::Dynamic => QuantizationApproach::Dynamic,
            PostTrainingApproach::Static  => QuantizationApproach::Static,
        };
        let mut criterion = if self.absolute {
            AccuracyCriterion::absolute(self.tolerance)
        } else {
            AccuracyCriterion::relative(self.tolerance)
        };
        if self.lower_is_better {
            criterion = criterion.lower_is_better();
        }
        let tuning = TuningCriterion {
            max_trials:   self.max_trials,
            timeout_secs: self.timeout,
            ..TuningCriterion::default()
        };

        let mut quantization = QuantizationConfig::new(approach)
            .with_weight_granularity(self.granularity.into())
            .with_accuracy_criterion(criterion)
            .with_tuning_criterion(tuning);
        quantization.calibration_sampling_size = self.calibration_samples;
        quantization.excluded_layers = self.exclude.clone();

        let config = CompressionConfig {
            metric: self.metric.clone(),
            ..CompressionConfig::default()
        }
        .with_quantization(quantization);
        config.validate()?;
        Ok(config)
    }
}

impl TryFrom<QuantizeArgs> for QuantizeConfig {
    type Error = anyhow::Error;

    fn try_from(a: QuantizeArgs) -> Result<Self> {
        let compression = a.compression_config()?;
        Ok(QuantizeConfig {
            model_dir:        a.model_dir,
            output_dir:       a.output_dir,
            calibration_file: a.calibration_file,
            eval_file:        a.eval_file,
            batch_size:       a.batch_size,
            compression,
        })
    }
}

// ─── compress ─────────────────────────────────────────────────────────────────

#[derive(Args, Debug)]
pub struct CompressArgs {
    /// Pretrained FP32 model directory to fine-tune
    #[arg(long)]
    pub model_dir: PathBuf,

    #[arg(long)]
    pub train_file: PathBuf,

    #[arg(long)]
    pub eval_file: Option<PathBuf>,

    /// Where the compressed model is written
    #[arg(long)]
    pub output_dir: PathBuf,

    /// CompressionConfig JSON; overrides the compression flags below
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Quantization-aware training
    #[arg(long)]
    pub qat: bool,

    /// Weight granularity for QAT
    #[arg(long, value_enum, default_value_t = Granularity::PerChannel)]
    pub granularity: Granularity,

    /// Layers kept in FP32 during QAT (repeatable)
    #[arg(long)]
    pub exclude: Vec<String>,

    /// Enable magnitude pruning towards this sparsity
    #[arg(long)]
    pub prune_target: Option<f64>,

    #[arg(long, default_value_t = 0)]
    pub prune_start: usize,

    /// Step at which the target sparsity is reached
    #[arg(long, default_value_t = 100)]
    pub prune_end: usize,

    /// Recompute masks every N steps
    #[arg(long, default_value_t = 10)]
    pub prune_frequency: usize,

    /// Use 2:4 semi-structured sparsity instead of unstructured
    #[arg(long)]
    pub two_four: bool,

    /// Layer-name prefixes to prune (repeatable; default all encoder layers)
    #[arg(long)]
    pub prune_layer: Vec<String>,

    /// Teacher model directory; enables distillation
    #[arg(long)]
    pub teacher_dir: Option<String>,

    #[arg(long, default_value_t = 2.0)]
    pub temperature: f64,

    /// Weight of the distillation loss
    #[arg(long, default_value_t = 0.5)]
    pub alpha: f64,

    #[arg(long, default_value = "accuracy")]
    pub metric: String,

    #[command(flatten)]
    pub training: TrainingFlags,
}

impl CompressArgs {
    fn compression_config(&self) -> Result<CompressionConfig> {
        if let Some(path) = &self.config {
            return read_compression_config(path);
        }

        let mut config = CompressionConfig {
            metric: self.metric.clone(),
            ..CompressionConfig::default()
        };
        if self.qat {
            let mut quantization = QuantizationConfig::new(QuantizationApproach::AwareTraining)
                .with_weight_granularity(self.granularity.into());
            quantization.excluded_layers = self.exclude.clone();
            config = config.with_quantization(quantization);
        }
        if let Some(target) = self.prune_target {
            let pattern = if self.two_four { PruningPattern::two_four() } else { PruningPattern::Unstructured };
            config = config.with_pruning(
                PruningConfig::new(target, self.prune_start, self.prune_end)
                    .with_frequency(self.prune_frequency)
                    .with_pattern(pattern)
                    .with_layers(self.prune_layer.clone()),
            );
        }
        if let Some(teacher_dir) = &self.teacher_dir {
            let mut distillation = DistillationConfig::new(teacher_dir.clone());
            distillation.temperature = self.temperature;
            distillation.alpha = self.alpha;
            config = config.with_distillation(distillation);
        }
        config.validate_for_training()?;
        Ok(config)
    }
}

impl TryFrom<CompressArgs> for CompressConfig {
    type Error = anyhow::Error;

    fn try_from(a: CompressArgs) -> Result<Self> {
        let compression = a.compression_config()?;
        Ok(CompressConfig {
            model_dir:  a.model_dir,
            train_file: a.train_file,
            eval_file:  a.eval_file,
            compression,
            args:       a.training.into_args(a.output_dir),
        })
    }
}

// ─── evaluate / inspect ───────────────────────────────────────────────────────

#[derive(Args, Debug)]
pub struct EvaluateArgs {
    /// Any model directory, FP32 or compressed
    #[arg(long)]
    pub model_dir: PathBuf,

    #[arg(long)]
    pub eval_file: PathBuf,

    #[arg(long, default_value_t = 32)]
    pub batch_size: usize,
}

impl From<EvaluateArgs> for EvaluateConfig {
    fn from(a: EvaluateArgs) -> Self {
        EvaluateConfig {
            model_dir:  a.model_dir,
            eval_file:  a.eval_file,
            batch_size: a.batch_size,
        }
    }
}

#[derive(Args, Debug)]
pub struct InspectArgs {
    #[arg(long)]
    pub model_dir: PathBuf,
}
