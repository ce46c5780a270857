// ============================================================
// Layer 5 — Evaluation
// ============================================================
// Runs any SequenceClassifier (FP32, quantized, or a model inside
// a QAT hook) over a labelled dataset and hands the collected
// predictions to a metric callback.
//
//   logits ──► EvalPrediction ──► compute_metrics ──► Metrics
//                                        + eval_loss
//
// The callback is a plain function pointer so the same one can be
// given to the trainer, the compression trainer and the tuner.

use std::collections::BTreeMap;

use anyhow::Result;
use burn::{
    data::{dataloader::DataLoaderBuilder, dataset::Dataset},
    nn::loss::CrossEntropyLossConfig,
    prelude::*,
};
use burn::tensor::ElementConversion;

use crate::data::batcher::ClassificationBatcher;
use crate::data::dataset::ClassificationDataset;
use crate::domain::error::CompressionError;
use crate::ml::model::SequenceClassifier;
use crate::ml::quant::tensor_values;

pub type Metrics = BTreeMap<String, f64>;

pub type MetricsFn = fn(&EvalPrediction) -> Metrics;

pub const EVAL_LOSS: &str = "eval_loss";

#[derive(Debug, Clone, Default, PartialEq)]
pub struct EvalPrediction {
    /// One row of class logits per sample
    pub logits: Vec<Vec<f32>>,
    pub labels: Vec<usize>,
}

impl EvalPrediction {
    /// Arg-max class of every row. Ties resolve to the lowest class id.
    pub fn predictions(&self) -> Vec<usize> {
        self.logits
            .iter()
            .map(|row| {
                row.iter()
                    .enumerate()
                    .fold((0, f32::NEG_INFINITY), |best, (i, &v)| if v > best.1 { (i, v) } else { best })
                    .0
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }
}

/// Accuracy and macro-averaged F1 over the classes present in either
/// the labels or the predictions.
pub fn default_metrics(eval: &EvalPrediction) -> Metrics {
    let predictions = eval.predictions();
    let total = eval.len().max(1) as f64;

    let correct = predictions
        .iter()
        .zip(eval.labels.iter())
        .filter(|(p, l)| p == l)
        .count();

    let classes = predictions
        .iter()
        .chain(eval.labels.iter())
        .copied()
        .max()
        .map_or(0, |m| m + 1);

    let mut f1_sum = 0.0;
    let mut seen   = 0usize;
    for class in 0..classes {
        let tp = predictions.iter().zip(&eval.labels).filter(|(p, l)| **p == class && **l == class).count();
        let fp = predictions.iter().zip(&eval.labels).filter(|(p, l)| **p == class && **l != class).count();
        let fn_ = predictions.iter().zip(&eval.labels).filter(|(p, l)| **p != class && **l == class).count();
        if tp + fp + fn_ == 0 {
            continue;
        }
        seen += 1;
        f1_sum += 2.0 * tp as f64 / (2 * tp + fp + fn_) as f64;
    }

    Metrics::from([
        ("accuracy".to_string(), correct as f64 / total),
        ("macro_f1".to_string(), if seen > 0 { f1_sum / seen as f64 } else { 0.0 }),
    ])
}

/// Look up `name`, failing with the list of metrics that do exist.
pub fn metric(metrics: &Metrics, name: &str) -> Result<f64, CompressionError> {
    metrics.get(name).copied().ok_or_else(|| CompressionError::UnknownMetric {
        name: name.to_string(),
        available: metrics.keys().cloned().collect::<Vec<_>>().join(", "),
    })
}

pub struct Evaluator<B: Backend> {
    batcher:    ClassificationBatcher<B>,
    batch_size: usize,
    compute:    MetricsFn,
}

impl<B: Backend> Evaluator<B> {
    pub fn new(device: B::Device, batch_size: usize, compute: MetricsFn) -> Self {
        Self {
            batcher: ClassificationBatcher::new(device),
            batch_size: batch_size.max(1),
            compute,
        }
    }

    /// Logits and labels for the whole dataset plus the mean cross-entropy.
    pub fn predict(
        &self,
        model: &dyn SequenceClassifier<B>,
        data:  &ClassificationDataset,
    ) -> Result<(EvalPrediction, f64)> {
        if data.is_empty() {
            return Err(CompressionError::EmptyDataset("evaluation".to_string()).into());
        }

        let loader = DataLoaderBuilder::new(self.batcher.clone())
            .batch_size(self.batch_size)
            .build(data.clone());

        let num_labels = model.num_labels();
        let mut out      = EvalPrediction::default();
        let mut loss_sum = 0.0f64;
        let mut batches  = 0usize;

        for batch in loader.iter() {
            out.labels.extend(
                batch.labels.clone().into_data().iter::<i64>().map(|label| label as usize),
            );
            let logits = model.logits(batch.input_ids, batch.attention_mask);

            let ce = CrossEntropyLossConfig::new().init(&logits.device());
            let loss: f64 = ce
                .forward(logits.clone(), batch.labels)
                .into_scalar()
                .elem::<f64>();
            loss_sum += loss;
            batches  += 1;

            let values = tensor_values(logits);
            out.logits.extend(values.chunks(num_labels).map(|row| row.to_vec()));
        }

        Ok((out, loss_sum / batches as f64))
    }

    pub fn evaluate(&self, model: &dyn SequenceClassifier<B>, data: &ClassificationDataset) -> Result<Metrics> {
        let (prediction, loss) = self.predict(model, data)?;
        let mut metrics = (self.compute)(&prediction);
        metrics.insert(EVAL_LOSS.to_string(), loss);
        Ok(metrics)
    }
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::dataset::EncodedSample;
    use crate::ml::model::tests::{tiny_config, TestBackend};
    use crate::ml::model::TextClassifier;

    fn prediction(logits: &[[f32; 3]], labels: &[usize]) -> EvalPrediction {
        EvalPrediction {
            logits: logits.iter().map(|r| r.to_vec()).collect(),
            labels: labels.to_vec(),
        }
    }

    #[test]
    fn test_predictions_take_argmax() {
        let p = prediction(&[[0.1, 0.7, 0.2], [2.0, -1.0, 0.0], [0.5, 0.5, 0.1]], &[1, 0, 0]);
        assert_eq!(p.predictions(), vec![1, 0, 0]);
    }

    #[test]
    fn test_accuracy_and_macro_f1() {
        // predictions: 0, 1, 1, 2 ; labels: 0, 1, 2, 2
        let p = prediction(
            &[[1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]],
            &[0, 1, 2, 2],
        );
        let m = default_metrics(&p);
        assert!((m["accuracy"] - 0.75).abs() < 1e-12);
        // per class F1: 1.0, 2/3, 2/3
        assert!((m["macro_f1"] - (1.0 + 2.0 / 3.0 + 2.0 / 3.0) / 3.0).abs() < 1e-12);
    }

    #[test]
    fn test_unknown_metric_lists_available() {
        let m = Metrics::from([("accuracy".to_string(), 0.5)]);
        assert_eq!(metric(&m, "accuracy").unwrap(), 0.5);
        let err = metric(&m, "f1").unwrap_err();
        assert!(err.to_string().contains("accuracy"));
    }

    #[test]
    fn test_evaluator_covers_every_sample() {
        let device = Default::default();
        let model: TextClassifier<TestBackend> = tiny_config().init(&device);
        let samples = (0..5)
            .map(|i| EncodedSample {
                input_ids:      vec![101, 10 + i as u32, 102, 0, 0, 0, 0, 0],
                attention_mask: vec![1, 1, 1, 0, 0, 0, 0, 0],
                label:          i % 3,
            })
            .collect();
        let data = ClassificationDataset::new(samples);
        let evaluator = Evaluator::<TestBackend>::new(device, 2, default_metrics);

        let (prediction, loss) = evaluator.predict(&model, &data).unwrap();
        assert_eq!(prediction.len(), 5);
        assert!(prediction.logits.iter().all(|row| row.len() == 3));
        assert!(loss.is_finite() && loss > 0.0);

        let metrics = evaluator.evaluate(&model, &data).unwrap();
        assert!(metrics.contains_key(EVAL_LOSS));
        assert!((0.0..=1.0).contains(&metrics["accuracy"]));
    }

    #[test]
    fn test_empty_dataset_is_an_error() {
        let device = Default::default();
        let model: TextClassifier<TestBackend> = tiny_config().init(&device);
        let evaluator = Evaluator::<TestBackend>::new(device, 2, default_metrics);
        assert!(evaluator.evaluate(&model, &ClassificationDataset::new(Vec::new())).is_err());
    }
}
