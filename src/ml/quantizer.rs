// ============================================================
// Layer 5 — Post-Training Quantizer
// ============================================================
// Turns a trained FP32 classifier into an INT8 one without any
// further training:
//
//   calibrate  (static only) run representative samples through
//              the model and record each linear layer's input range
//   plan       choose weight scales per layer and an activation
//              scheme per layer; fallback layers stay FP32
//   convert    snap the weights onto their INT8 grid and attach the
//              plan, giving a QuantizedClassifier
//
// With an evaluation closure, `fit` wraps these steps in the
// accuracy-aware tuner; without one it converts every layer.

use std::collections::{BTreeMap, BTreeSet};

use anyhow::Result;
use burn::{
    data::{dataloader::DataLoaderBuilder, dataset::Dataset},
    prelude::*,
};
use serde::{Deserialize, Serialize};

use crate::data::batcher::ClassificationBatcher;
use crate::data::dataset::ClassificationDataset;
use crate::domain::error::CompressionError;
use crate::domain::quantization::{QuantizationApproach, QuantizationConfig, WeightGranularity};
use crate::ml::hooks::{MinMaxObserver, PlanHook, Range};
use crate::ml::model::{SequenceClassifier, TextClassifier};
use crate::ml::quant::{QuantParams, WeightQuant};
use crate::ml::tuner::{tune, TuningReport};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ActivationQuant {
    /// Range taken from each batch at runtime
    Dynamic,
    /// Range fixed by calibration or QAT
    Static { params: QuantParams },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LayerQuant {
    pub weight: WeightQuant,
    pub activation: ActivationQuant,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuantizationPlan {
    pub approach: QuantizationApproach,
    pub layers: BTreeMap<String, LayerQuant>,
    /// Layers kept in FP32
    pub fallback: Vec<String>,
}

impl QuantizationPlan {
    pub fn is_quantized(&self, layer: &str) -> bool {
        self.layers.contains_key(layer)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CalibrationStats {
    pub ranges: BTreeMap<String, Range>,
    pub samples: usize,
}

/// Build a plan for `model`. Layers in `fallback` stay FP32. Static and
/// QAT plans take activation ranges from `ranges`.
pub fn build_plan<B: Backend>(
    model:       &TextClassifier<B>,
    approach:    QuantizationApproach,
    granularity: WeightGranularity,
    ranges:      Option<&BTreeMap<String, Range>>,
    fallback:    &BTreeSet<String>,
) -> Result<QuantizationPlan, CompressionError> {
    let mut layers = BTreeMap::new();
    let mut kept   = Vec::new();

    for (name, linear) in model.linears() {
        if fallback.contains(&name) {
            kept.push(name);
            continue;
        }
        let activation = match approach {
            QuantizationApproach::Dynamic => ActivationQuant::Dynamic,
            QuantizationApproach::Static | QuantizationApproach::AwareTraining => {
                let range = ranges
                    .and_then(|r| r.get(&name))
                    .ok_or(CompressionError::MissingCalibrationData)?;
                ActivationQuant::Static { params: range.params() }
            }
        };
        let weight = WeightQuant::compute(&linear.weight.val(), granularity);
        tracing::debug!("{name}: {} weight scale(s), {:?} activations", weight.params.len(), activation);
        layers.insert(name, LayerQuant { weight, activation });
    }

    Ok(QuantizationPlan { approach, layers, fallback: kept })
}

/// A classifier whose quantized layers hold INT8-grid weights and whose
/// forward pass fake-quantizes their inputs.
#[derive(Debug, Clone)]
pub struct QuantizedClassifier<B: Backend> {
    model: TextClassifier<B>,
    plan:  QuantizationPlan,
}

impl<B: Backend> QuantizedClassifier<B> {
    /// Snap every planned layer's weight onto its INT8 grid.
    pub fn convert(model: TextClassifier<B>, plan: QuantizationPlan) -> Self {
        let model = model.map_linears(|name, mut linear| {
            if let Some(layer) = plan.layers.get(name) {
                linear.weight = linear.weight.map(|w| layer.weight.fake_quantize(w));
            }
            linear
        });
        Self { model, plan }
    }

    /// Reassemble from a model whose weights were already converted.
    pub fn from_parts(model: TextClassifier<B>, plan: QuantizationPlan) -> Self {
        Self { model, plan }
    }

    pub fn model(&self) -> &TextClassifier<B> {
        &self.model
    }

    pub fn plan(&self) -> &QuantizationPlan {
        &self.plan
    }

    /// Linear-layer weight storage as (fp32 bytes, quantized bytes).
    pub fn weight_bytes(&self) -> (usize, usize) {
        let f32_size = std::mem::size_of::<f32>();
        self.model
            .linears()
            .into_iter()
            .fold((0, 0), |(float, quant), (name, linear)| {
                let [d_in, d_out] = linear.weight.val().dims();
                let elements = d_in * d_out;
                let q = match self.plan.layers.get(&name) {
                    Some(layer) => layer.weight.storage_bytes(elements),
                    None => elements * f32_size,
                };
                (float + elements * f32_size, quant + q)
            })
    }
}

impl<B: Backend> SequenceClassifier<B> for QuantizedClassifier<B> {
    fn logits(&self, input_ids: Tensor<B, 2, Int>, attention_mask: Tensor<B, 2, Int>) -> Tensor<B, 2> {
        self.model
            .forward_with(input_ids, attention_mask, &mut PlanHook::new(&self.plan))
    }

    fn num_labels(&self) -> usize {
        self.model.num_labels()
    }
}

pub struct QuantizationOutcome<B: Backend> {
    pub model:       QuantizedClassifier<B>,
    pub calibration: Option<CalibrationStats>,
    pub tuning:      Option<TuningReport>,
}

pub struct PostTrainingQuantizer<'a, B: Backend> {
    config:     &'a QuantizationConfig,
    batcher:    ClassificationBatcher<B>,
    batch_size: usize,
}

impl<'a, B: Backend> PostTrainingQuantizer<'a, B> {
    pub fn new(config: &'a QuantizationConfig, device: B::Device, batch_size: usize) -> Self {
        Self {
            config,
            batcher: ClassificationBatcher::new(device),
            batch_size: batch_size.max(1),
        }
    }

    /// Record the input range of every linear layer over at most
    /// `calibration_sampling_size` samples.
    pub fn calibrate(
        &self,
        model: &TextClassifier<B>,
        data:  &ClassificationDataset,
    ) -> Result<CalibrationStats, CompressionError> {
        let samples = data.head(self.config.calibration_sampling_size);
        let count = samples.len();
        if count == 0 {
            return Err(CompressionError::MissingCalibrationData);
        }

        let loader = DataLoaderBuilder::new(self.batcher.clone())
            .batch_size(self.batch_size)
            .build(samples);

        let mut observer = MinMaxObserver::new();
        for batch in loader.iter() {
            model.forward_with(batch.input_ids, batch.attention_mask, &mut observer);
        }

        tracing::info!("Calibrated {} linear layers on {} samples", model.linears().len(), count);
        Ok(CalibrationStats { ranges: observer.into_ranges(), samples: count })
    }

    pub fn plan(
        &self,
        model:    &TextClassifier<B>,
        stats:    Option<&CalibrationStats>,
        fallback: &BTreeSet<String>,
    ) -> Result<QuantizationPlan, CompressionError> {
        let mut fallback = fallback.clone();
        fallback.extend(self.config.excluded_layers.iter().cloned());
        build_plan(
            model,
            self.config.approach,
            self.config.weight_granularity,
            stats.map(|s| &s.ranges),
            &fallback,
        )
    }

    pub fn convert(&self, model: TextClassifier<B>, plan: QuantizationPlan) -> QuantizedClassifier<B> {
        QuantizedClassifier::convert(model, plan)
    }

    /// Layers the tuner may toggle between INT8 and FP32.
    pub fn tunable_layers(&self, model: &TextClassifier<B>) -> Vec<String> {
        model
            .linear_names()
            .into_iter()
            .filter(|name| !self.config.excluded_layers.contains(name))
            .collect()
    }

    /// Calibrate (static), then either tune against `evaluate` or convert
    /// every layer. `evaluate` scores any classifier, FP32 baseline included.
    pub fn fit<F>(
        &self,
        model:       TextClassifier<B>,
        calibration: Option<&ClassificationDataset>,
        evaluate:    Option<F>,
    ) -> Result<QuantizationOutcome<B>>
    where
        F: FnMut(&dyn SequenceClassifier<B>) -> Result<f64>,
    {
        if !self.config.approach.is_post_training() {
            return Err(CompressionError::InvalidConfig(format!(
                "{} is applied during training, not by the post-training quantizer",
                self.config.approach
            ))
            .into());
        }

        let stats = if self.config.approach.needs_calibration() {
            let data = calibration.ok_or(CompressionError::MissingCalibrationData)?;
            Some(self.calibrate(&model, data)?)
        } else {
            None
        };

        let Some(mut evaluate) = evaluate else {
            tracing::info!("No evaluation function, quantizing every layer ({})", self.config.approach);
            let plan = self.plan(&model, stats.as_ref(), &BTreeSet::new())?;
            return Ok(QuantizationOutcome {
                model:       self.convert(model, plan),
                calibration: stats,
                tuning:      None,
            });
        };

        let baseline = evaluate(&model)?;
        tracing::info!("FP32 baseline: {baseline:.4}");

        let layers = self.tunable_layers(&model);
        let report = tune(
            baseline,
            &layers,
            &self.config.accuracy_criterion,
            &self.config.tuning_criterion,
            |fallback| {
                let plan = self.plan(&model, stats.as_ref(), fallback)?;
                let candidate = self.convert(model.clone(), plan);
                evaluate(&candidate)
            },
        )?;

        let plan = self.plan(&model, stats.as_ref(), &report.accepted_fallback())?;
        Ok(QuantizationOutcome {
            model:       self.convert(model, plan),
            calibration: stats,
            tuning:      Some(report),
        })
    }
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::dataset::EncodedSample;
    use crate::domain::quantization::{AccuracyCriterion, TuningCriterion};
    use crate::ml::model::tests::{tiny_config, tiny_inputs, TestBackend};
    use crate::ml::quant::tensor_values;

    type Eval = fn(&dyn SequenceClassifier<TestBackend>) -> Result<f64>;

    fn encoded(ids: &[u32], label: usize) -> EncodedSample {
        let mut input_ids = ids.to_vec();
        let mut attention_mask = vec![1; ids.len()];
        input_ids.resize(8, 0);
        attention_mask.resize(8, 0);
        EncodedSample { input_ids, attention_mask, label }
    }

    fn calibration_set() -> ClassificationDataset {
        ClassificationDataset::new(vec![
            encoded(&[101, 5, 9, 102], 0),
            encoded(&[101, 7, 8, 12, 102], 1),
            encoded(&[101, 30, 31, 32, 33, 102], 2),
        ])
    }

    fn max_abs_diff(a: Tensor<TestBackend, 2>, b: Tensor<TestBackend, 2>) -> f32 {
        tensor_values(a)
            .iter()
            .zip(tensor_values(b).iter())
            .fold(0.0, |m, (x, y)| m.max((x - y).abs()))
    }

    #[test]
    fn test_static_requires_calibration_data() {
        let device = Default::default();
        let model: TextClassifier<TestBackend> = tiny_config().init(&device);
        let config = QuantizationConfig::new(QuantizationApproach::Static);
        let quantizer = PostTrainingQuantizer::<TestBackend>::new(&config, device, 2);

        let err = quantizer.fit(model.clone(), None, None::<Eval>).err().unwrap();
        assert!(matches!(
            err.downcast_ref::<CompressionError>(),
            Some(CompressionError::MissingCalibrationData)
        ));

        let empty = ClassificationDataset::new(Vec::new());
        assert!(matches!(
            quantizer.calibrate(&model, &empty),
            Err(CompressionError::MissingCalibrationData)
        ));
    }

    #[test]
    fn test_calibration_respects_sampling_size() {
        let device = Default::default();
        let model: TextClassifier<TestBackend> = tiny_config().init(&device);
        let mut config = QuantizationConfig::new(QuantizationApproach::Static);
        config.calibration_sampling_size = 2;
        let quantizer = PostTrainingQuantizer::<TestBackend>::new(&config, device, 8);

        let stats = quantizer.calibrate(&model, &calibration_set()).unwrap();
        assert_eq!(stats.samples, 2);
        assert_eq!(stats.ranges.len(), model.linears().len());
    }

    #[test]
    fn test_dynamic_quantization_stays_close_to_fp32() {
        let device = Default::default();
        let model: TextClassifier<TestBackend> = tiny_config().init(&device);
        let config = QuantizationConfig::new(QuantizationApproach::Dynamic);
        let quantizer = PostTrainingQuantizer::<TestBackend>::new(&config, device, 2);

        let outcome = quantizer.fit(model.clone(), None, None::<Eval>).unwrap();
        assert!(outcome.tuning.is_none());
        assert!(outcome.model.plan().fallback.is_empty());

        let (ids, mask) = tiny_inputs::<TestBackend>(&device);
        let fp32 = model.forward(ids.clone(), mask.clone());
        let int8 = outcome.model.logits(ids, mask);
        assert!(max_abs_diff(fp32, int8) < 0.25);

        let (float, quant) = outcome.model.weight_bytes();
        assert!(quant * 3 < float);
    }

    #[test]
    fn test_excluded_layers_fall_back() {
        let device = Default::default();
        let model: TextClassifier<TestBackend> = tiny_config().init(&device);
        let mut config = QuantizationConfig::new(QuantizationApproach::Static);
        config.excluded_layers = vec!["classifier".to_string()];
        let quantizer = PostTrainingQuantizer::<TestBackend>::new(&config, device, 2);

        let outcome = quantizer
            .fit(model.clone(), Some(&calibration_set()), None::<Eval>)
            .unwrap();
        let plan = outcome.model.plan();
        assert_eq!(plan.fallback, vec!["classifier".to_string()]);
        assert!(!plan.is_quantized("classifier"));
        assert!(matches!(
            plan.layers["encoder.0.attention.query"].activation,
            ActivationQuant::Static { .. }
        ));

        let original: Vec<f32> = tensor_values(model.linears().last().unwrap().1.weight.val());
        let kept: Vec<f32> = tensor_values(outcome.model.model().linears().last().unwrap().1.weight.val());
        assert_eq!(original, kept);
        assert!(!quantizer.tunable_layers(&model).contains(&"classifier".to_string()));
    }

    #[test]
    fn test_fit_tunes_against_evaluation() {
        let device = Default::default();
        let model: TextClassifier<TestBackend> = tiny_config().init(&device);
        let config = QuantizationConfig::new(QuantizationApproach::Dynamic)
            .with_accuracy_criterion(AccuracyCriterion::absolute(0.0))
            .with_tuning_criterion(TuningCriterion { max_trials: 3, ..TuningCriterion::default() });
        let quantizer = PostTrainingQuantizer::<TestBackend>::new(&config, device, 2);

        // Every candidate scores like FP32, so the all-INT8 trial is accepted.
        let reference = model.clone();
        let (ids, mask) = tiny_inputs::<TestBackend>(&device);
        let evaluate = move |candidate: &dyn SequenceClassifier<TestBackend>| -> Result<f64> {
            let _ = candidate.logits(ids.clone(), mask.clone());
            Ok(1.0)
        };
        let outcome = quantizer.fit(reference, None, Some(evaluate)).unwrap();
        let report = outcome.tuning.unwrap();
        assert_eq!(report.baseline, 1.0);
        assert_eq!(report.trials.len(), 1);
        assert_eq!(outcome.model.plan().layers.len(), model.linears().len());
    }
}
