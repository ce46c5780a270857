// ============================================================
// Layer 5 — Compression Trainer
// ============================================================
// Drop-in replacement for Trainer when compression happens while
// training. Takes the same TrainingArgs, datasets and metric
// callback, plus one CompressionConfig:
//
//   quantization (aware_training)  fake-quantized forward pass,
//                                  exported as a static plan
//   pruning                        magnitude masks on a cubic
//                                  sparsity schedule
//   distillation                   soft targets from a teacher
//
// Any combination may be enabled at once.

use std::collections::BTreeSet;

use anyhow::Result;
use burn::{module::AutodiffModule, tensor::backend::AutodiffBackend};

use crate::data::dataset::ClassificationDataset;
use crate::domain::compression::CompressionConfig;
use crate::domain::error::{invalid, CompressionError};
use crate::domain::quantization::QuantizationApproach;
use crate::infra::metrics::EpochMetrics;
use crate::ml::distiller::Distiller;
use crate::ml::evaluator::MetricsFn;
use crate::ml::hooks::FakeQuantHook;
use crate::ml::model::{ClassifierShape, TextClassifier};
use crate::ml::pruner::{MagnitudePruner, SparsityReport};
use crate::ml::quantizer::{build_plan, QuantizationPlan, QuantizedClassifier};
use crate::ml::trainer::{Trainer, TrainingArgs, TrainingSession};

pub struct CompressionOutput<B: AutodiffBackend> {
    /// Trained network on the inference backend; weights of quantized
    /// layers are already on their INT8 grid.
    pub model:       TextClassifier<B::InnerBackend>,
    pub plan:        Option<QuantizationPlan>,
    pub sparsity:    Option<SparsityReport>,
    pub history:     Vec<EpochMetrics>,
    pub global_step: usize,
}

impl<B: AutodiffBackend> CompressionOutput<B> {
    pub fn quantized(&self) -> Option<QuantizedClassifier<B::InnerBackend>> {
        self.plan
            .as_ref()
            .map(|plan| QuantizedClassifier::from_parts(self.model.clone(), plan.clone()))
    }
}

pub struct CompressionTrainer<'a, B: AutodiffBackend> {
    trainer: Trainer<'a, B>,
    config:  &'a CompressionConfig,
    teacher: Option<TextClassifier<B::InnerBackend>>,
}

impl<'a, B: AutodiffBackend> CompressionTrainer<'a, B> {
    pub fn new(
        args:            &'a TrainingArgs,
        train_dataset:   &'a ClassificationDataset,
        eval_dataset:    Option<&'a ClassificationDataset>,
        compute_metrics: MetricsFn,
        config:          &'a CompressionConfig,
        teacher:         Option<TextClassifier<B::InnerBackend>>,
        device:          B::Device,
    ) -> Result<Self, CompressionError> {
        config.validate_for_training()?;
        if config.distillation.is_some() && teacher.is_none() {
            return Err(invalid("distillation is configured but no teacher model was given"));
        }
        Ok(Self {
            trainer: Trainer::new(args, train_dataset, eval_dataset, compute_metrics, device),
            config,
            teacher,
        })
    }

    fn session(&mut self, student: ClassifierShape) -> Result<TrainingSession<B>, CompressionError> {
        let qat = self
            .config
            .quantization
            .as_ref()
            .filter(|q| q.approach == QuantizationApproach::AwareTraining)
            .map(|q| FakeQuantHook::new(q.weight_granularity, q.excluded_layers.clone()));

        let pruner = self.config.pruning.clone().map(MagnitudePruner::new);
        if let Some(pruning) = &self.config.pruning {
            let total = self.trainer.total_steps();
            if pruning.end_step >= total {
                tracing::warn!(
                    "Pruning ends at step {} but training runs {} steps (0..{}); target sparsity will not be reached",
                    pruning.end_step,
                    total,
                    total.saturating_sub(1),
                );
            }
        }

        let distiller = match (&self.config.distillation, self.teacher.take()) {
            (Some(cfg), Some(teacher)) => Some(Distiller::new(teacher, cfg, student)?),
            _ => None,
        };

        tracing::info!(
            "Compression during training: qat={} pruning={} distillation={}",
            qat.is_some(),
            pruner.is_some(),
            distiller.is_some(),
        );
        Ok(TrainingSession { qat, pruner, distiller })
    }

    pub fn train(mut self, model: TextClassifier<B>) -> Result<CompressionOutput<B>> {
        let mut session = self.session(model.shape())?;
        let out = self.trainer.train_loop(model, &mut session)?;
        let model = out.model.valid();

        let sparsity = session.pruner.as_ref().map(|p| p.report(&model));
        if let Some(report) = &sparsity {
            tracing::info!("Final sparsity of pruned layers: {:.3}", report.overall);
        }

        let (model, plan) = match session.qat {
            Some(hook) => {
                let fallback: BTreeSet<String> = hook.skipped().clone();
                let plan = build_plan(
                    &model,
                    QuantizationApproach::AwareTraining,
                    hook.granularity(),
                    Some(hook.ranges()),
                    &fallback,
                )?;
                let quantized = QuantizedClassifier::convert(model, plan.clone());
                (quantized.model().clone(), Some(plan))
            }
            None => (model, None),
        };

        Ok(CompressionOutput {
            model,
            plan,
            sparsity,
            history: out.history,
            global_step: out.global_step,
        })
    }
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::distillation::DistillationConfig;
    use crate::domain::pruning::PruningConfig;
    use crate::domain::quantization::QuantizationConfig;
    use crate::ml::evaluator::default_metrics;
    use crate::ml::model::tests::tiny_config;
    use crate::ml::model::ClassifierConfig;
    use crate::ml::quant::tensor_values;
    use crate::ml::trainer::tests::{quick_args, toy_dataset, TrainTestBackend};
    use burn::backend::NdArray;

    #[test]
    fn test_empty_config_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let args = quick_args(dir.path());
        let data = toy_dataset(1);
        let config = CompressionConfig::default();
        let result = CompressionTrainer::<TrainTestBackend>::new(
            &args, &data, None, default_metrics, &config, None, Default::default(),
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_distillation_without_teacher_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let args = quick_args(dir.path());
        let data = toy_dataset(1);
        let config = CompressionConfig::default().with_distillation(DistillationConfig::new("t"));
        let result = CompressionTrainer::<TrainTestBackend>::new(
            &args, &data, None, default_metrics, &config, None, Default::default(),
        );
        assert!(matches!(result, Err(CompressionError::InvalidConfig(_))));
    }

    #[test]
    fn test_pruning_reaches_target_sparsity() {
        let dir = tempfile::tempdir().unwrap();
        let device = Default::default();
        let args = TrainingArgs { epochs: 2, ..quick_args(dir.path()) };
        let data = toy_dataset(2);
        let config = CompressionConfig::default()
            .with_pruning(PruningConfig::new(0.5, 0, 1).with_frequency(1));

        let trainer = CompressionTrainer::<TrainTestBackend>::new(
            &args, &data, Some(&data), default_metrics, &config, None, device,
        )
        .unwrap();
        let out = trainer.train(tiny_config().init(&device)).unwrap();

        assert!(out.plan.is_none());
        let sparsity = out.sparsity.unwrap();
        assert!((sparsity.overall - 0.5).abs() < 0.02, "sparsity {}", sparsity.overall);
        assert_eq!(out.history.len(), 2);
    }

    #[test]
    fn test_one_shot_pruning_on_the_first_step() {
        let dir = tempfile::tempdir().unwrap();
        let device = Default::default();
        // one epoch of one batch: a single optimiser step, numbered 0
        let args = TrainingArgs { epochs: 1, ..quick_args(dir.path()) };
        let data = toy_dataset(2);
        let config = CompressionConfig::default().with_pruning(PruningConfig::new(0.5, 0, 0));

        let trainer = CompressionTrainer::<TrainTestBackend>::new(
            &args, &data, None, default_metrics, &config, None, device,
        )
        .unwrap();
        let out = trainer.train(tiny_config().init(&device)).unwrap();

        assert_eq!(out.global_step, 1);
        let sparsity = out.sparsity.unwrap();
        assert!((sparsity.overall - 0.5).abs() < 0.02, "sparsity {}", sparsity.overall);
    }

    #[test]
    fn test_qat_exports_a_static_plan_on_the_int8_grid() {
        let dir = tempfile::tempdir().unwrap();
        let device = Default::default();
        let args = TrainingArgs { epochs: 1, ..quick_args(dir.path()) };
        let data = toy_dataset(2);
        let config = CompressionConfig::default()
            .with_quantization(QuantizationConfig::new(QuantizationApproach::AwareTraining));

        let trainer = CompressionTrainer::<TrainTestBackend>::new(
            &args, &data, Some(&data), default_metrics, &config, None, device,
        )
        .unwrap();
        let out = trainer.train(tiny_config().init(&device)).unwrap();

        let plan = out.plan.clone().unwrap();
        assert_eq!(plan.approach, QuantizationApproach::AwareTraining);
        assert_eq!(plan.layers.len(), out.model.linear_names().len());

        // every weight re-quantizes to itself
        for (name, linear) in out.model.linears() {
            let weight = linear.weight.val();
            let again = plan.layers[&name].weight.fake_quantize(weight.clone());
            assert_eq!(tensor_values(weight), tensor_values(again), "{name}");
        }
        assert!(out.quantized().is_some());
    }

    #[test]
    fn test_distillation_with_mismatched_teacher_fails() {
        let dir = tempfile::tempdir().unwrap();
        let device = Default::default();
        let args = quick_args(dir.path());
        let data = toy_dataset(1);
        let config = CompressionConfig::default().with_distillation(DistillationConfig::new("t"));
        let teacher: TextClassifier<NdArray> =
            ClassifierConfig { num_labels: 2, ..tiny_config() }.init(&device);

        let trainer = CompressionTrainer::<TrainTestBackend>::new(
            &args, &data, None, default_metrics, &config, Some(teacher), device,
        )
        .unwrap();
        let err = trainer.train(tiny_config().init(&device)).err().unwrap();
        assert!(matches!(
            err.downcast_ref::<CompressionError>(),
            Some(CompressionError::IncompatibleTeacher(_))
        ));
    }
}
