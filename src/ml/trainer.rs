// ============================================================
// Layer 5 — Training Loop
// ============================================================
// Supervised fine-tuning of the text classifier with Adam.
//
//   for each epoch:
//     DataLoader (seeded shuffle) → forward → loss → backward → step
//     evaluate on the eval set → metrics.csv row → checkpoint
//
// A resumed run starts after the restored epoch: the learning-rate
// schedule and step counter continue where they stopped and new
// rows are appended to metrics.csv.
//
// The same loop serves plain training and compression-aware
// training. A TrainingSession carries the optional compression
// side effects:
//
//   qat        forward pass runs through a FakeQuantHook
//   pruner     masks re-applied after every optimiser step
//   distiller  loss blends hard labels with teacher soft targets
//
// Burn notes:
//   - Training uses an AutodiffBackend for gradients
//   - model.valid() returns the model on the inner backend,
//     with dropout disabled, for evaluation
//
// Reference: Burn Book §5, Kingma & Ba (2015) Adam

use std::path::PathBuf;

use anyhow::{Context, Result};
use burn::{
    data::dataloader::DataLoaderBuilder,
    module::AutodiffModule,
    nn::loss::CrossEntropyLossConfig,
    optim::{AdamConfig, GradientsParams, Optimizer},
    prelude::*,
    tensor::{backend::AutodiffBackend, ElementConversion},
};
use serde::{Deserialize, Serialize};

use crate::data::{batcher::ClassificationBatcher, dataset::ClassificationDataset};
use crate::domain::error::{invalid, CompressionError};
use crate::infra::checkpoint::{CheckpointManager, CHECKPOINT_DIR};
use crate::infra::metrics::{EpochMetrics, MetricsLogger};
use crate::ml::distiller::Distiller;
use crate::ml::evaluator::{Evaluator, Metrics, MetricsFn};
use crate::ml::hooks::{FakeQuantHook, HookedClassifier};
use crate::ml::model::TextClassifier;
use crate::ml::pruner::MagnitudePruner;

/// Arguments shared by the plain and the compression trainer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingArgs {
    pub output_dir:       PathBuf,
    pub epochs:           usize,
    pub batch_size:       usize,
    pub learning_rate:    f64,
    pub seed:             u64,
    /// Log the running loss every N optimiser steps (0 = never)
    pub logging_steps:    usize,
    /// Keep a weight snapshot after every epoch
    pub save_checkpoints: bool,
}

impl TrainingArgs {
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir:       output_dir.into(),
            epochs:           3,
            batch_size:       16,
            learning_rate:    5e-4,
            seed:             42,
            logging_steps:    50,
            save_checkpoints: false,
        }
    }

    pub fn validate(&self) -> Result<(), CompressionError> {
        if self.epochs == 0 {
            return Err(invalid("epochs must be at least 1"));
        }
        if self.batch_size == 0 {
            return Err(invalid("batch_size must be at least 1"));
        }
        if !(self.learning_rate > 0.0 && self.learning_rate.is_finite()) {
            return Err(invalid(format!("learning_rate must be positive, got {}", self.learning_rate)));
        }
        Ok(())
    }

    /// Optimiser steps in one epoch over `samples` samples.
    pub fn steps_per_epoch(&self, samples: usize) -> usize {
        samples.div_ceil(self.batch_size.max(1))
    }
}

/// Optional compression side effects of one training run.
pub struct TrainingSession<B: AutodiffBackend> {
    pub qat:       Option<FakeQuantHook>,
    pub pruner:    Option<MagnitudePruner>,
    pub distiller: Option<Distiller<B>>,
}

impl<B: AutodiffBackend> TrainingSession<B> {
    pub fn plain() -> Self {
        Self { qat: None, pruner: None, distiller: None }
    }
}

pub struct TrainOutput<B: AutodiffBackend> {
    pub model:       TextClassifier<B>,
    pub history:     Vec<EpochMetrics>,
    pub global_step: usize,
}

pub struct Trainer<'a, B: AutodiffBackend> {
    args:            &'a TrainingArgs,
    train_dataset:   &'a ClassificationDataset,
    eval_dataset:    Option<&'a ClassificationDataset>,
    compute_metrics: MetricsFn,
    device:          B::Device,
    start_epoch:     usize,
}

impl<'a, B: AutodiffBackend> Trainer<'a, B> {
    pub fn new(
        args:            &'a TrainingArgs,
        train_dataset:   &'a ClassificationDataset,
        eval_dataset:    Option<&'a ClassificationDataset>,
        compute_metrics: MetricsFn,
        device:          B::Device,
    ) -> Self {
        Self { args, train_dataset, eval_dataset, compute_metrics, device, start_epoch: 0 }
    }

    /// Continue a run whose first `epoch` epochs are already done.
    pub fn resume_from(mut self, epoch: usize) -> Self {
        self.start_epoch = epoch;
        self
    }

    /// Optimiser steps the whole run takes, resumed epochs included.
    pub fn total_steps(&self) -> usize {
        self.args.steps_per_epoch(self.train_dataset.samples().len()) * self.args.epochs
    }

    pub fn train(&self, model: TextClassifier<B>) -> Result<TrainOutput<B>> {
        self.train_loop(model, &mut TrainingSession::plain())
    }

    pub fn train_loop(
        &self,
        mut model: TextClassifier<B>,
        session:   &mut TrainingSession<B>,
    ) -> Result<TrainOutput<B>> {
        let args = self.args;
        args.validate()?;
        if self.train_dataset.samples().is_empty() {
            return Err(CompressionError::EmptyDataset("training".to_string()).into());
        }
        if self.start_epoch >= args.epochs {
            return Err(invalid(format!(
                "checkpoint is at epoch {} but only {} epochs were requested",
                self.start_epoch, args.epochs
            ))
            .into());
        }

        // ── Adam optimiser ────────────────────────────────────────────────────
        // m = β1*m + (1-β1)*g        (mean)
        // v = β2*v + (1-β2)*g²       (variance)
        // θ = θ - lr * m / (√v + ε)  (update)
        let mut optim = AdamConfig::new()
            .with_epsilon(1e-8)
            .init::<B, TextClassifier<B>>();

        // ── Training data loader (AutodiffBackend) ────────────────────────────
        let train_loader = DataLoaderBuilder::new(ClassificationBatcher::<B>::new(self.device.clone()))
            .batch_size(args.batch_size)
            .shuffle(args.seed)
            .build(self.train_dataset.clone());

        let evaluator = Evaluator::<B::InnerBackend>::new(
            self.device.clone(),
            args.batch_size,
            self.compute_metrics,
        );

        let mut logger = if self.start_epoch > 0 {
            MetricsLogger::append(&args.output_dir)?
        } else {
            MetricsLogger::new(&args.output_dir)?
        };
        let checkpoints = if args.save_checkpoints {
            Some(CheckpointManager::new(args.output_dir.join(CHECKPOINT_DIR))?)
        } else {
            None
        };

        let steps_per_epoch = args.steps_per_epoch(self.train_dataset.samples().len());
        let total_steps     = self.total_steps();
        let mut global_step = steps_per_epoch * self.start_epoch;
        let mut history     = Vec::with_capacity(args.epochs - self.start_epoch);

        if self.start_epoch > 0 {
            tracing::info!("Resuming after epoch {} at step {}", self.start_epoch, global_step);
        }
        tracing::info!(
            "Training {} epochs x {} steps (batch_size={}, lr={})",
            args.epochs,
            steps_per_epoch,
            args.batch_size,
            args.learning_rate,
        );

        // ── Epoch loop ────────────────────────────────────────────────────────
        for epoch in (self.start_epoch + 1)..=args.epochs {
            let mut loss_sum = 0.0f64;
            let mut batches  = 0usize;

            for batch in train_loader.iter() {
                let logits = match session.qat.as_mut() {
                    Some(hook) => model.forward_with(
                        batch.input_ids.clone(),
                        batch.attention_mask.clone(),
                        hook,
                    ),
                    None => model.forward(batch.input_ids.clone(), batch.attention_mask.clone()),
                };

                let loss = match &session.distiller {
                    Some(distiller) => {
                        distiller.loss(logits, batch.input_ids, batch.attention_mask, batch.labels)
                    }
                    None => CrossEntropyLossConfig::new()
                        .init(&logits.device())
                        .forward(logits, batch.labels),
                };

                let loss_val: f64 = loss.clone().into_scalar().elem::<f64>();
                loss_sum += loss_val;
                batches  += 1;

                // Backward pass + Adam update, learning rate decays linearly to 0
                let grads = GradientsParams::from_grads(loss.backward(), &model);
                let lr    = args.learning_rate * (1.0 - global_step as f64 / total_steps as f64);
                model     = optim.step(lr, model, grads);

                if let Some(pruner) = session.pruner.as_mut() {
                    model = pruner.on_step_end(global_step, model);
                }
                global_step += 1;

                if args.logging_steps > 0 && global_step % args.logging_steps == 0 {
                    tracing::info!(
                        "step {global_step}/{total_steps} | loss={:.4} | lr={lr:.2e}",
                        loss_sum / batches as f64,
                    );
                }
            }

            let train_loss = loss_sum / batches.max(1) as f64;

            // ── Evaluation phase ──────────────────────────────────────────────
            let eval = match self.eval_dataset {
                Some(data) => self.evaluate(&evaluator, &model, session, data)?,
                None => Metrics::new(),
            };

            tracing::info!(
                "Epoch {:>3}/{} | train_loss={:.4} | {}",
                epoch,
                args.epochs,
                train_loss,
                eval.iter()
                    .map(|(k, v)| format!("{k}={v:.4}"))
                    .collect::<Vec<_>>()
                    .join(" | "),
            );

            let row = EpochMetrics::new(epoch, train_loss, eval);
            logger.log(&row)?;
            history.push(row);

            if let Some(manager) = &checkpoints {
                manager
                    .save_model(&model, epoch)
                    .with_context(|| format!("Saving checkpoint for epoch {epoch}"))?;
            }
        }

        tracing::info!(
            "Training complete after {global_step} steps, metrics in '{}'",
            logger.csv_path().display()
        );
        Ok(TrainOutput { model, history, global_step })
    }

    fn evaluate(
        &self,
        evaluator: &Evaluator<B::InnerBackend>,
        model:     &TextClassifier<B>,
        session:   &TrainingSession<B>,
        data:      &ClassificationDataset,
    ) -> Result<Metrics> {
        let valid = model.valid();
        match &session.qat {
            Some(hook) => {
                let hooked = HookedClassifier { model: valid, hook: hook.frozen() };
                evaluator.evaluate(&hooked, data)
            }
            None => evaluator.evaluate(&valid, data),
        }
    }
}
