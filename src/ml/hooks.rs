// ============================================================
// Layer 5 — Layer Hooks
// ============================================================
// A LayerHook sees the input activation and the weight of every
// linear layer just before the matmul. Implementations:
//
//   FloatHook       pass-through, plain FP32 inference and training
//   MinMaxObserver  records activation ranges (static calibration)
//   FakeQuantHook   quantization-aware training: fake-quantizes
//                   weights and activations with a straight-through
//                   estimator, tracking activation ranges by EMA
//   PlanHook        quantized inference, applies a QuantizationPlan
//
// Hooks are plain structs, not Burn modules, so they never end up
// in a saved record.

use std::collections::{BTreeMap, BTreeSet};

use burn::prelude::*;
use burn::tensor::ElementConversion;
use serde::{Deserialize, Serialize};

use crate::domain::quantization::WeightGranularity;
use crate::ml::model::{SequenceClassifier, TextClassifier};
use crate::ml::quant::{dynamic_params, fake_quantize_weight, QuantParams};
use crate::ml::quantizer::{ActivationQuant, QuantizationPlan};

/// Interception point around every linear layer.
pub trait LayerHook<B: Backend> {
    fn activation<const D: usize>(&mut self, _layer: &str, x: Tensor<B, D>) -> Tensor<B, D> {
        x
    }

    fn weight(&mut self, _layer: &str, w: Tensor<B, 2>) -> Tensor<B, 2> {
        w
    }
}

pub struct FloatHook;

impl<B: Backend> LayerHook<B> for FloatHook {}

/// Observed [min, max] of one layer's input.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Range {
    pub min: f32,
    pub max: f32,
}

impl Range {
    fn merge(self, other: Range) -> Range {
        Range { min: self.min.min(other.min), max: self.max.max(other.max) }
    }

    pub fn params(&self) -> QuantParams {
        QuantParams::affine(self.min, self.max)
    }
}

fn observe<B: Backend, const D: usize>(x: &Tensor<B, D>) -> Range {
    let min: f32 = x.clone().min().into_scalar().elem();
    let max: f32 = x.clone().max().into_scalar().elem();
    Range { min, max }
}

// ─── Calibration ──────────────────────────────────────────────────────────────

/// Running min/max of every linear layer's input.
#[derive(Debug, Default)]
pub struct MinMaxObserver {
    ranges: BTreeMap<String, Range>,
}

impl MinMaxObserver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn into_ranges(self) -> BTreeMap<String, Range> {
        self.ranges
    }
}

impl<B: Backend> LayerHook<B> for MinMaxObserver {
    fn activation<const D: usize>(&mut self, layer: &str, x: Tensor<B, D>) -> Tensor<B, D> {
        let seen = observe(&x);
        self.ranges
            .entry(layer.to_string())
            .and_modify(|r| *r = r.merge(seen))
            .or_insert(seen);
        x
    }
}

// ─── Quantization-aware training ──────────────────────────────────────────────

const EMA_MOMENTUM: f32 = 0.9;

/// Fake quantization with a straight-through estimator: the forward pass
/// sees quantized values, the backward pass treats quantization as identity.
#[derive(Debug, Clone)]
pub struct FakeQuantHook {
    granularity: WeightGranularity,
    skip:        BTreeSet<String>,
    ranges:      BTreeMap<String, Range>,
    observing:   bool,
}

impl FakeQuantHook {
    pub fn new(granularity: WeightGranularity, skip: impl IntoIterator<Item = String>) -> Self {
        Self {
            granularity,
            skip: skip.into_iter().collect(),
            ranges: BTreeMap::new(),
            observing: true,
        }
    }

    /// Copy that quantizes with the current ranges but stops updating them.
    pub fn frozen(&self) -> Self {
        Self { observing: false, ..self.clone() }
    }

    pub fn ranges(&self) -> &BTreeMap<String, Range> {
        &self.ranges
    }

    pub fn skipped(&self) -> &BTreeSet<String> {
        &self.skip
    }

    pub fn granularity(&self) -> WeightGranularity {
        self.granularity
    }

    fn update(&mut self, layer: &str, seen: Range) -> Range {
        let range = match self.ranges.get(layer) {
            Some(r) => Range {
                min: EMA_MOMENTUM * r.min + (1.0 - EMA_MOMENTUM) * seen.min,
                max: EMA_MOMENTUM * r.max + (1.0 - EMA_MOMENTUM) * seen.max,
            },
            None => seen,
        };
        self.ranges.insert(layer.to_string(), range);
        range
    }
}

fn straight_through<B: Backend, const D: usize>(x: Tensor<B, D>, q: Tensor<B, D>) -> Tensor<B, D> {
    x.clone() + (q - x).detach()
}

impl<B: Backend> LayerHook<B> for FakeQuantHook {
    fn activation<const D: usize>(&mut self, layer: &str, x: Tensor<B, D>) -> Tensor<B, D> {
        if self.skip.contains(layer) {
            return x;
        }
        let range = if self.observing {
            let seen = observe(&x);
            self.update(layer, seen)
        } else {
            match self.ranges.get(layer) {
                Some(r) => *r,
                None => return x,
            }
        };
        let q = range.params().fake_quantize_tensor(x.clone());
        straight_through(x, q)
    }

    fn weight(&mut self, layer: &str, w: Tensor<B, 2>) -> Tensor<B, 2> {
        if self.skip.contains(layer) {
            return w;
        }
        let q = fake_quantize_weight(w.clone(), self.granularity);
        straight_through(w, q)
    }
}

/// A classifier evaluated through a fixed hook.
pub struct HookedClassifier<B: Backend, H> {
    pub model: TextClassifier<B>,
    pub hook:  H,
}

impl<B: Backend, H: LayerHook<B> + Clone> SequenceClassifier<B> for HookedClassifier<B, H> {
    fn logits(&self, input_ids: Tensor<B, 2, Int>, attention_mask: Tensor<B, 2, Int>) -> Tensor<B, 2> {
        let mut hook = self.hook.clone();
        self.model.forward_with(input_ids, attention_mask, &mut hook)
    }

    fn num_labels(&self) -> usize {
        self.model.num_labels()
    }
}

// ─── Quantized inference ──────────────────────────────────────────────────────

/// Applies the activation side of a plan. Weights are already on the
/// INT8 grid after conversion, so they pass through.
#[derive(Debug, Clone, Copy)]
pub struct PlanHook<'a> {
    plan: &'a QuantizationPlan,
}

impl<'a> PlanHook<'a> {
    pub fn new(plan: &'a QuantizationPlan) -> Self {
        Self { plan }
    }
}

impl<B: Backend> LayerHook<B> for PlanHook<'_> {
    fn activation<const D: usize>(&mut self, layer: &str, x: Tensor<B, D>) -> Tensor<B, D> {
        match self.plan.layers.get(layer).map(|l| &l.activation) {
            Some(ActivationQuant::Dynamic) => {
                let params = dynamic_params(&x);
                params.fake_quantize_tensor(x)
            }
            Some(ActivationQuant::Static { params }) => params.fake_quantize_tensor(x),
            None => x,
        }
    }
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use crate::ml::model::tests::{tiny_config, tiny_inputs, TestBackend};
    use crate::ml::quant::tensor_values;
    use burn::backend::{Autodiff, NdArray};

    #[test]
    fn test_observer_sees_every_linear_layer() {
        let device = Default::default();
        let model: TextClassifier<TestBackend> = tiny_config().init(&device);
        let (ids, mask) = tiny_inputs::<TestBackend>(&device);

        let mut observer = MinMaxObserver::new();
        model.forward_with(ids, mask, &mut observer);
        let ranges = observer.into_ranges();

        assert_eq!(ranges.len(), model.linear_names().len());
        for range in ranges.values() {
            assert!(range.min <= range.max);
        }
    }

    #[test]
    fn test_observer_merges_across_batches() {
        let device = Default::default();
        let mut observer = MinMaxObserver::new();
        let a = Tensor::<NdArray, 1>::from_floats([-1.0, 0.5], &device);
        let b = Tensor::<NdArray, 1>::from_floats([0.0, 3.0], &device);
        LayerHook::<NdArray>::activation(&mut observer, "l", a);
        LayerHook::<NdArray>::activation(&mut observer, "l", b);
        assert_eq!(observer.into_ranges()["l"], Range { min: -1.0, max: 3.0 });
    }

    #[test]
    fn test_ema_ranges() {
        let device = Default::default();
        let mut hook = FakeQuantHook::new(WeightGranularity::PerTensor, Vec::new());
        let first = Tensor::<NdArray, 1>::from_floats([0.0, 10.0], &device);
        let second = Tensor::<NdArray, 1>::from_floats([0.0, 0.0], &device);
        LayerHook::<NdArray>::activation(&mut hook, "l", first);
        LayerHook::<NdArray>::activation(&mut hook, "l", second.clone());
        assert!((hook.ranges()["l"].max - 9.0).abs() < 1e-5);

        // a frozen hook no longer moves the range
        let mut frozen = hook.frozen();
        LayerHook::<NdArray>::activation(&mut frozen, "l", second);
        assert!((frozen.ranges()["l"].max - 9.0).abs() < 1e-5);
    }

    #[test]
    fn test_straight_through_gradient_is_identity() {
        type AB = Autodiff<NdArray>;
        let device = Default::default();
        let w = Tensor::<AB, 1>::from_floats([0.31, -0.77, 0.05, 0.5], &device)
            .reshape([2, 2])
            .require_grad();

        let mut hook = FakeQuantHook::new(WeightGranularity::PerChannel, Vec::new());
        let q = LayerHook::<AB>::weight(&mut hook, "l", w.clone());
        let grads = q.sum().backward();
        let grad = w.grad(&grads).map(tensor_values).unwrap_or_default();
        assert_eq!(grad, vec![1.0; 4]);
    }

    #[test]
    fn test_skipped_layers_stay_float() {
        let device = Default::default();
        let mut hook = FakeQuantHook::new(WeightGranularity::PerTensor, vec!["l".to_string()]);
        let w = Tensor::<NdArray, 1>::from_floats([0.123456, -0.98765], &device).reshape([1, 2]);
        let out = LayerHook::<NdArray>::weight(&mut hook, "l", w.clone());
        assert_eq!(tensor_values(out), tensor_values(w));
        assert!(hook.ranges().is_empty());
    }
}
