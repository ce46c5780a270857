// ============================================================
// Layer 5 — Magnitude Pruner
// ============================================================
// Runs alongside the optimiser. After every step:
//
//   1. on an update step, recompute each targeted layer's mask from
//      the current weight magnitudes at the scheduled sparsity
//   2. multiply every targeted weight by its mask, so weights pruned
//      earlier stay at zero even after Adam moved them
//
// Masks are kept host-side as Vec<bool> in row-major
// [d_input, d_output] order, the layout of Burn's Linear weight.
//
// Reference: Zhu & Gupta (2017) "To Prune, or Not to Prune"
//            Mishra et al. (2021) "Accelerating Sparse Deep Neural Networks" (2:4)

use std::collections::BTreeMap;

use burn::prelude::*;
use serde::{Deserialize, Serialize};

use crate::domain::pruning::{PruningConfig, PruningPattern};
use crate::ml::model::TextClassifier;
use crate::ml::quant::tensor_values;

/// Keep-mask that zeroes the `round(sparsity * len)` smallest magnitudes.
/// Ties are broken by position, earlier elements are pruned first.
pub fn unstructured_mask(values: &[f32], sparsity: f64) -> Vec<bool> {
    let prune = ((values.len() as f64) * sparsity.clamp(0.0, 1.0)).round() as usize;
    let mut order: Vec<usize> = (0..values.len()).collect();
    order.sort_by(|&a, &b| values[a].abs().total_cmp(&values[b].abs()).then(a.cmp(&b)));

    let mut mask = vec![true; values.len()];
    for &i in order.iter().take(prune) {
        mask[i] = false;
    }
    mask
}

/// Keep-mask with `n` survivors in every group of `m` consecutive inputs
/// of each output column. A trailing group shorter than `m` keeps
/// at most `n` as well.
pub fn n_in_m_mask(values: &[f32], d_in: usize, d_out: usize, n: usize, m: usize) -> Vec<bool> {
    let mut mask = vec![false; values.len()];
    for col in 0..d_out {
        for start in (0..d_in).step_by(m.max(1)) {
            let mut group: Vec<usize> = (start..(start + m).min(d_in)).map(|row| row * d_out + col).collect();
            group.sort_by(|&a, &b| values[b].abs().total_cmp(&values[a].abs()).then(a.cmp(&b)));
            for &i in group.iter().take(n) {
                mask[i] = true;
            }
        }
    }
    mask
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LayerSparsity {
    pub zeros: usize,
    pub total: usize,
}

impl LayerSparsity {
    pub fn ratio(&self) -> f64 {
        if self.total == 0 { 0.0 } else { self.zeros as f64 / self.total as f64 }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SparsityReport {
    pub layers: BTreeMap<String, LayerSparsity>,
    /// Zero fraction over all reported layers together
    pub overall: f64,
}

/// Fraction of exactly-zero weights in every layer `filter` accepts.
pub fn sparsity_report<B: Backend>(model: &TextClassifier<B>, filter: impl Fn(&str) -> bool) -> SparsityReport {
    let mut layers = BTreeMap::new();
    let (mut zeros, mut total) = (0usize, 0usize);

    for (name, linear) in model.linears() {
        if !filter(&name) {
            continue;
        }
        let values = tensor_values(linear.weight.val());
        let layer = LayerSparsity {
            zeros: values.iter().filter(|v| **v == 0.0).count(),
            total: values.len(),
        };
        zeros += layer.zeros;
        total += layer.total;
        layers.insert(name, layer);
    }

    let overall = if total == 0 { 0.0 } else { zeros as f64 / total as f64 };
    SparsityReport { layers, overall }
}

pub struct MagnitudePruner {
    config: PruningConfig,
    masks:  BTreeMap<String, Vec<bool>>,
}

impl MagnitudePruner {
    pub fn new(config: PruningConfig) -> Self {
        Self { config, masks: BTreeMap::new() }
    }

    /// Call after optimiser step `step`, counting from 0.
    pub fn on_step_end<B: Backend>(&mut self, step: usize, model: TextClassifier<B>) -> TextClassifier<B> {
        if self.config.is_update_step(step) {
            let sparsity = self.config.sparsity_at_step(step);
            self.update_masks(&model, sparsity);
            tracing::debug!("Step {step}: pruning masks updated, target sparsity {sparsity:.3}");
        }
        self.apply(model)
    }

    fn update_masks<B: Backend>(&mut self, model: &TextClassifier<B>, sparsity: f64) {
        for (name, linear) in model.linears() {
            if !self.config.targets(&name) {
                continue;
            }
            let weight = linear.weight.val();
            let [d_in, d_out] = weight.dims();
            let values = tensor_values(weight);
            let mask = match self.config.pattern {
                PruningPattern::Unstructured => unstructured_mask(&values, sparsity),
                PruningPattern::NInM { n, m } => n_in_m_mask(&values, d_in, d_out, n, m),
            };
            self.masks.insert(name, mask);
        }
    }

    /// Zero every masked weight. Layers without a mask are untouched.
    pub fn apply<B: Backend>(&self, model: TextClassifier<B>) -> TextClassifier<B> {
        if self.masks.is_empty() {
            return model;
        }
        model.map_linears(|name, mut linear| {
            if let Some(mask) = self.masks.get(name) {
                linear.weight = linear.weight.map(|w| {
                    let dims = w.dims();
                    let device = w.device();
                    let keep: Vec<f32> = mask.iter().map(|&k| if k { 1.0 } else { 0.0 }).collect();
                    let keep = Tensor::<B, 2>::from_data(TensorData::new(keep, dims), &device);
                    w.mul(keep).detach().require_grad()
                });
            }
            linear
        })
    }

    pub fn report<B: Backend>(&self, model: &TextClassifier<B>) -> SparsityReport {
        sparsity_report(model, |name| self.config.targets(name))
    }
}
