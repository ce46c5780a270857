// ============================================================
// Layer 2 — CompressUseCase
// ============================================================
// Fine-tunes a saved FP32 model with compression applied while
// training: quantization-aware training, magnitude pruning and
// knowledge distillation, in any combination.
//
//   Step 1: Load the student directory         (Layer 6 - infra)
//   Step 2: Load the teacher, if distilling    (Layer 6 - infra)
//   Step 3: Encode train / eval files          (Layer 4 - data)
//   Step 4: Run the compression trainer        (Layer 5 - ml)
//   Step 5: Evaluate the exported model        (Layer 5 - ml)
//   Step 6: Save the compressed directory      (Layer 6 - infra)
//
// The student keeps its tokenizer and label set, so the train
// and eval files must use the same labels it was trained on.
// A teacher reads the student's token ids and its outputs are
// matched class by class, so it must share both the tokenizer
// vocabulary and the label names in the same order.

use anyhow::{Context, Result};
use std::path::PathBuf;

use crate::data::{dataset::ClassificationDataset, encoder::TextEncoder};
use crate::domain::{compression::CompressionConfig, error::CompressionError};
use crate::infra::{
    metrics::EpochMetrics,
    model_store::{CompressionManifest, LoadedModel, ModelStore},
    tokenizer_store::TokenizerStore,
};
use crate::ml::{
    self,
    compression_trainer::CompressionTrainer,
    evaluator::{default_metrics, Evaluator, Metrics},
    pruner::SparsityReport,
    trainer::TrainingArgs,
    InferBackend, TrainBackend,
};

#[derive(Debug, Clone)]
pub struct CompressConfig {
    /// Pretrained FP32 model to fine-tune
    pub model_dir:   PathBuf,
    pub train_file:  PathBuf,
    pub eval_file:   Option<PathBuf>,
    pub compression: CompressionConfig,
    pub args:        TrainingArgs,
}

#[derive(Debug, Clone)]
pub struct CompressSummary {
    pub output_dir:  PathBuf,
    pub quantized:   bool,
    pub distilled:   bool,
    pub sparsity:    Option<SparsityReport>,
    pub global_step: usize,
    pub last_epoch:  Option<EpochMetrics>,
    pub metrics:     Option<Metrics>,
}

pub struct CompressUseCase {
    config: CompressConfig,
}

impl CompressUseCase {
    pub fn new(config: CompressConfig) -> Self {
        Self { config }
    }

    pub fn execute(&self) -> Result<CompressSummary> {
        let cfg = &self.config;
        cfg.compression.validate_for_training()?;
        let device = ml::device();

        // ── Step 1: student ───────────────────────────────────────────────────
        let student = ModelStore::new(&cfg.model_dir);
        let card = student.card()?;
        let tokenizer = student.tokenizer()?;
        let model = student.load_classifier::<TrainBackend>(&device)?;

        // ── Step 2: teacher ───────────────────────────────────────────────────
        let teacher = match &cfg.compression.distillation {
            Some(distillation) => {
                let store = ModelStore::new(&distillation.teacher_dir);
                let teacher_card = store
                    .card()
                    .with_context(|| format!("Cannot load teacher '{}'", distillation.teacher_dir))?;
                if teacher_card.labels != card.labels {
                    return Err(CompressionError::IncompatibleTeacher(format!(
                        "teacher labels {:?} differ from student labels {:?}",
                        teacher_card.labels.names(),
                        card.labels.names()
                    ))
                    .into());
                }
                if store.tokenizer()?.get_vocab(true) != tokenizer.get_vocab(true) {
                    return Err(CompressionError::IncompatibleTeacher(
                        "teacher and student tokenizers have different vocabularies".into(),
                    )
                    .into());
                }
                tracing::info!("Distilling from teacher '{}'", distillation.teacher_dir);
                Some(store.load_classifier::<InferBackend>(&device)?)
            }
            None => None,
        };

        // ── Step 3: data ──────────────────────────────────────────────────────
        let encoder = TextEncoder::new(&tokenizer, &card.labels, card.model.max_seq_len);
        let train = encoder.encode_file(&cfg.train_file)?;
        let eval: Option<ClassificationDataset> =
            cfg.eval_file.as_deref().map(|p| encoder.encode_file(p)).transpose()?;

        // ── Step 4: train ─────────────────────────────────────────────────────
        let trainer = CompressionTrainer::<TrainBackend>::new(
            &cfg.args,
            &train,
            eval.as_ref(),
            default_metrics,
            &cfg.compression,
            teacher,
            device,
        )?;
        let out = trainer.train(model)?;

        // ── Step 5: evaluate what will be saved ───────────────────────────────
        let exported = match out.quantized() {
            Some(quantized) => LoadedModel::Quantized(quantized),
            None => LoadedModel::Float(out.model.clone()),
        };
        let metrics = eval
            .as_ref()
            .map(|data| {
                Evaluator::<InferBackend>::new(device, cfg.args.batch_size, default_metrics)
                    .evaluate(&exported, data)
            })
            .transpose()?;

        // ── Step 6: save ──────────────────────────────────────────────────────
        let mut manifest = CompressionManifest::new(cfg.compression.clone()).with_metrics(metrics.clone());
        if let Some(plan) = &out.plan {
            manifest = manifest.with_quantization(plan.clone());
        }
        if let Some(sparsity) = &out.sparsity {
            manifest = manifest.with_sparsity(sparsity.clone());
        }
        ModelStore::new(&cfg.args.output_dir).save_compressed(&out.model, &card, &manifest)?;
        TokenizerStore::new(&cfg.args.output_dir).save(&tokenizer)?;

        Ok(CompressSummary {
            output_dir:  cfg.args.output_dir.clone(),
            quantized:   out.plan.is_some(),
            distilled:   cfg.compression.distillation.is_some(),
            sparsity:    out.sparsity,
            global_step: out.global_step,
            last_epoch:  out.history.last().cloned(),
            metrics,
        })
    }
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::tests::{train_tiny_model, write_sentiment_file};
    use crate::domain::sample::tests::labels;
    use crate::infra::checkpoint::ModelCard;
    use crate::domain::distillation::DistillationConfig;
    use crate::domain::pruning::PruningConfig;
    use crate::domain::quantization::{QuantizationApproach, QuantizationConfig};

    fn config(dir: &std::path::Path, compression: CompressionConfig) -> CompressConfig {
        let data = write_sentiment_file(dir, "train.jsonl");
        CompressConfig {
            model_dir:   dir.join("base"),
            train_file:  data.clone(),
            eval_file:   Some(data),
            compression,
            args: TrainingArgs {
                epochs:        2,
                batch_size:    8,
                learning_rate: 1e-3,
                logging_steps: 0,
                ..TrainingArgs::new(dir.join("compressed"))
            },
        }
    }

    #[test]
    fn test_qat_and_pruning_produce_a_compressed_directory() {
        let dir = tempfile::tempdir().unwrap();
        train_tiny_model(dir.path());
        let compression = CompressionConfig::default()
            .with_quantization(QuantizationConfig::new(QuantizationApproach::AwareTraining))
            .with_pruning(PruningConfig::new(0.5, 0, 3).with_frequency(1));

        let summary = CompressUseCase::new(config(dir.path(), compression)).execute().unwrap();
        assert!(summary.quantized);
        assert!(summary.sparsity.is_some());
        assert!(summary.metrics.is_some());

        let store = ModelStore::new(dir.path().join("compressed"));
        let manifest = store.manifest().unwrap().unwrap();
        assert!(manifest.quantization.is_some());
        assert!(manifest.sparsity.is_some());
        assert!(store.load::<InferBackend>(&ml::device()).unwrap().is_quantized());
    }

    #[test]
    fn test_distillation_from_the_pretrained_model() {
        let dir = tempfile::tempdir().unwrap();
        let base = train_tiny_model(dir.path());
        let compression = CompressionConfig::default()
            .with_distillation(DistillationConfig::new(base.display().to_string()));

        let summary = CompressUseCase::new(config(dir.path(), compression)).execute().unwrap();
        assert!(summary.distilled);
        assert!(!summary.quantized);

        let store = ModelStore::new(dir.path().join("compressed"));
        assert!(store.is_compressed());
        assert!(!store.load::<InferBackend>(&ml::device()).unwrap().is_quantized());
    }

    #[test]
    fn test_missing_teacher_directory_fails_before_training() {
        let dir = tempfile::tempdir().unwrap();
        train_tiny_model(dir.path());
        let compression = CompressionConfig::default()
            .with_distillation(DistillationConfig::new(dir.path().join("nope").display().to_string()));

        assert!(CompressUseCase::new(config(dir.path(), compression)).execute().is_err());
        assert!(!dir.path().join("compressed").exists());
    }

    fn copy_of_base(dir: &std::path::Path) -> PathBuf {
        let teacher = dir.join("teacher");
        std::fs::create_dir_all(&teacher).unwrap();
        for entry in std::fs::read_dir(dir.join("base")).unwrap() {
            let path = entry.unwrap().path();
            if path.is_file() {
                std::fs::copy(&path, teacher.join(path.file_name().unwrap())).unwrap();
            }
        }
        teacher
    }

    fn relabelled_teacher(dir: &std::path::Path, names: &[&str]) -> PathBuf {
        let teacher = copy_of_base(dir);
        let card = ModelCard::load(&teacher).unwrap();
        ModelCard::new(card.model, labels(names)).save(&teacher).unwrap();
        teacher
    }

    fn distill_from(dir: &std::path::Path, teacher: &std::path::Path) -> anyhow::Error {
        let compression = CompressionConfig::default()
            .with_distillation(DistillationConfig::new(teacher.display().to_string()));
        CompressUseCase::new(config(dir, compression)).execute().err().unwrap()
    }

    #[test]
    fn test_teacher_with_other_label_names_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        train_tiny_model(dir.path());
        let teacher = relabelled_teacher(dir.path(), &["spam", "ham"]);

        let err = distill_from(dir.path(), &teacher);
        assert!(matches!(
            err.downcast_ref::<CompressionError>(),
            Some(CompressionError::IncompatibleTeacher(_))
        ));
        assert!(!dir.path().join("compressed").exists());
    }

    #[test]
    fn test_teacher_with_swapped_label_order_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        train_tiny_model(dir.path());
        let student = ModelStore::new(dir.path().join("base")).card().unwrap();
        let mut swapped: Vec<&str> = student.labels.names().iter().map(String::as_str).collect();
        swapped.reverse();
        let teacher = relabelled_teacher(dir.path(), &swapped);

        let err = distill_from(dir.path(), &teacher);
        assert!(err.to_string().contains("labels"), "{err}");
        assert!(!dir.path().join("compressed").exists());
    }

    #[test]
    fn test_teacher_with_another_tokenizer_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        train_tiny_model(dir.path());
        let teacher = copy_of_base(dir.path());
        TokenizerStore::new(&teacher)
            .build(&["unrelated words only".to_string()], 16)
            .unwrap();

        let err = distill_from(dir.path(), &teacher);
        assert!(err.to_string().contains("tokenizers"), "{err}");
        assert!(!dir.path().join("compressed").exists());
    }
}
