// ============================================================
// Layer 3 — Pruning Configuration and Sparsity Schedule
// ============================================================
// Magnitude pruning is applied while training. The fraction of
// zeroed weights ramps from `initial_sparsity` to
// `target_sparsity` between `start_step` and `end_step` along
// the cubic schedule of Zhu & Gupta (2017):
//
//   s_t = s_f + (s_i - s_f) * (1 - (t - t0) / (t1 - t0))^3
//
// Masks are recomputed every `frequency` optimiser steps inside
// that window and stay frozen afterwards. Steps count from 0, so
// a window of (0, 0) prunes once, right after the first update.
//
// Reference: Zhu & Gupta (2017) "To Prune, or Not to Prune"

use serde::{Deserialize, Serialize};

use crate::domain::error::{invalid, CompressionError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PruningPattern {
    /// Zero individual weights anywhere in the tensor
    Unstructured,
    /// Keep `n` weights out of every `m` consecutive inputs of each output
    NInM { n: usize, m: usize },
}

impl PruningPattern {
    /// 2:4 sparsity, the pattern sparse tensor cores accelerate.
    pub fn two_four() -> Self {
        PruningPattern::NInM { n: 2, m: 4 }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PruningConfig {
    #[serde(default = "default_pattern")]
    pub pattern: PruningPattern,

    #[serde(default)]
    pub initial_sparsity: f64,

    #[serde(default = "default_target")]
    pub target_sparsity: f64,

    #[serde(default)]
    pub start_step: usize,

    pub end_step: usize,

    #[serde(default = "default_frequency")]
    pub frequency: usize,

    /// Layer-name prefixes to prune. Empty means every encoder linear layer.
    #[serde(default)]
    pub layers: Vec<String>,
}

fn default_pattern() -> PruningPattern {
    PruningPattern::Unstructured
}

fn default_target() -> f64 {
    0.5
}

fn default_frequency() -> usize {
    10
}

impl PruningConfig {
    pub fn new(target_sparsity: f64, start_step: usize, end_step: usize) -> Self {
        Self {
            pattern: default_pattern(),
            initial_sparsity: 0.0,
            target_sparsity,
            start_step,
            end_step,
            frequency: default_frequency(),
            layers: Vec::new(),
        }
    }

    pub fn with_pattern(mut self, pattern: PruningPattern) -> Self {
        self.pattern = pattern;
        self
    }

    pub fn with_frequency(mut self, frequency: usize) -> Self {
        self.frequency = frequency;
        self
    }

    pub fn with_layers(mut self, layers: Vec<String>) -> Self {
        self.layers = layers;
        self
    }

    /// Sparsity the targeted layers should have after optimiser step `step`.
    ///
    /// For N:M patterns the sparsity is fixed at 1 - n/m once pruning starts.
    pub fn sparsity_at_step(&self, step: usize) -> f64 {
        if step < self.start_step {
            return 0.0;
        }
        if let PruningPattern::NInM { n, m } = self.pattern {
            return 1.0 - n as f64 / m as f64;
        }
        if step >= self.end_step {
            return self.target_sparsity;
        }
        let span     = (self.end_step - self.start_step) as f64;
        let progress = (step - self.start_step) as f64 / span;
        self.target_sparsity
            + (self.initial_sparsity - self.target_sparsity) * (1.0 - progress).powi(3)
    }

    /// True if masks should be recomputed after optimiser step `step`
    /// (0 = the first update).
    pub fn is_update_step(&self, step: usize) -> bool {
        if step < self.start_step || step > self.end_step {
            return false;
        }
        step == self.end_step || (step - self.start_step) % self.frequency == 0
    }

    /// True if `layer` is targeted. The classifier head is only pruned when
    /// it is named explicitly.
    pub fn targets(&self, layer: &str) -> bool {
        if self.layers.is_empty() {
            return layer.starts_with("encoder.");
        }
        self.layers.iter().any(|prefix| layer.starts_with(prefix.as_str()))
    }

    pub fn validate(&self) -> Result<(), CompressionError> {
        for (name, value) in [
            ("initial_sparsity", self.initial_sparsity),
            ("target_sparsity", self.target_sparsity),
        ] {
            if !(0.0..1.0).contains(&value) {
                return Err(invalid(format!("{name} must be in [0, 1), got {value}")));
            }
        }
        if self.initial_sparsity > self.target_sparsity {
            return Err(invalid("initial_sparsity cannot exceed target_sparsity"));
        }
        if self.end_step < self.start_step {
            return Err(invalid(format!(
                "end_step ({}) is before start_step ({})",
                self.end_step, self.start_step
            )));
        }
        if self.frequency == 0 {
            return Err(invalid("pruning frequency must be at least 1"));
        }
        if let PruningPattern::NInM { n, m } = self.pattern {
            if m == 0 || n == 0 || n > m {
                return Err(invalid(format!("invalid N:M pattern {n}:{m}")));
            }
        }
        Ok(())
    }
}
