// ============================================================
// Layer 3 — Quantization Configuration
// ============================================================
// Describes how a model should be quantized and how the result
// is accepted:
//
//   approach            dynamic | static | aware_training
//   accuracy_criterion  how much metric loss is tolerable
//   tuning_criterion    how many candidate configurations to try
//
// Dynamic and static quantization run after training on the CPU.
// Static additionally needs a calibration dataset so activation
// ranges can be fixed ahead of time.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::domain::error::{invalid, CompressionError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuantizationApproach {
    /// Weights INT8 ahead of time, activations quantized per batch at runtime
    Dynamic,
    /// Weights and activations INT8, activation ranges from calibration
    Static,
    /// Fake-quantized forward pass during training, exported as static
    AwareTraining,
}

impl QuantizationApproach {
    pub fn needs_calibration(&self) -> bool {
        matches!(self, QuantizationApproach::Static)
    }

    pub fn is_post_training(&self) -> bool {
        !matches!(self, QuantizationApproach::AwareTraining)
    }
}

impl fmt::Display for QuantizationApproach {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            QuantizationApproach::Dynamic       => "post_training_dynamic_quant",
            QuantizationApproach::Static        => "post_training_static_quant",
            QuantizationApproach::AwareTraining => "quant_aware_training",
        };
        f.write_str(name)
    }
}

/// Granularity of the weight scale.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WeightGranularity {
    PerTensor,
    PerChannel,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CriterionKind {
    Relative,
    Absolute,
}

/// Tolerable metric loss of a quantized model against the FP32 baseline.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AccuracyCriterion {
    pub kind: CriterionKind,
    pub tolerable_loss: f64,
    #[serde(default = "default_true")]
    pub higher_is_better: bool,
}

fn default_true() -> bool {
    true
}

impl Default for AccuracyCriterion {
    fn default() -> Self {
        Self {
            kind:             CriterionKind::Relative,
            tolerable_loss:   0.01,
            higher_is_better: true,
        }
    }
}

impl AccuracyCriterion {
    pub fn relative(tolerable_loss: f64) -> Self {
        Self { kind: CriterionKind::Relative, tolerable_loss, ..Self::default() }
    }

    pub fn absolute(tolerable_loss: f64) -> Self {
        Self { kind: CriterionKind::Absolute, tolerable_loss, ..Self::default() }
    }

    pub fn lower_is_better(self) -> Self {
        Self { higher_is_better: false, ..self }
    }

    /// Metric loss of `candidate` against `baseline`, in the unit of
    /// the criterion. Positive means the candidate is worse.
    pub fn loss(&self, baseline: f64, candidate: f64) -> f64 {
        let diff = if self.higher_is_better {
            baseline - candidate
        } else {
            candidate - baseline
        };
        match self.kind {
            CriterionKind::Absolute => diff,
            CriterionKind::Relative => diff / baseline.abs().max(f64::EPSILON),
        }
    }

    pub fn meets(&self, baseline: f64, candidate: f64) -> bool {
        self.loss(baseline, candidate) <= self.tolerable_loss
    }

    /// True if `a` is a better metric value than `b`.
    pub fn is_better(&self, a: f64, b: f64) -> bool {
        if self.higher_is_better { a > b } else { a < b }
    }

    pub fn validate(&self) -> Result<(), CompressionError> {
        if !self.tolerable_loss.is_finite() || self.tolerable_loss < 0.0 {
            return Err(invalid(format!(
                "tolerable_loss must be a non-negative number, got {}",
                self.tolerable_loss
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TuningStrategy {
    /// All-INT8 first, then single-layer fallbacks, then cumulative fallbacks
    Basic,
}

/// Budget for the accuracy-aware search.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TuningCriterion {
    pub strategy: TuningStrategy,
    pub max_trials: usize,
    /// Wall-clock limit in seconds, 0 = unlimited
    pub timeout_secs: u64,
}

impl Default for TuningCriterion {
    fn default() -> Self {
        Self {
            strategy:     TuningStrategy::Basic,
            max_trials:   100,
            timeout_secs: 0,
        }
    }
}

impl TuningCriterion {
    pub fn validate(&self) -> Result<(), CompressionError> {
        if self.max_trials == 0 {
            return Err(invalid("max_trials must be at least 1"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuantizationConfig {
    pub approach: QuantizationApproach,

    #[serde(default = "default_granularity")]
    pub weight_granularity: WeightGranularity,

    /// Upper bound on samples run through the model during calibration
    #[serde(default = "default_sampling_size")]
    pub calibration_sampling_size: usize,

    #[serde(default)]
    pub accuracy_criterion: AccuracyCriterion,

    #[serde(default)]
    pub tuning_criterion: TuningCriterion,

    /// Layers that always stay FP32
    #[serde(default)]
    pub excluded_layers: Vec<String>,
}

fn default_granularity() -> WeightGranularity {
    WeightGranularity::PerChannel
}

fn default_sampling_size() -> usize {
    100
}

impl QuantizationConfig {
    pub fn new(approach: QuantizationApproach) -> Self {
        Self {
            approach,
            weight_granularity:        default_granularity(),
            calibration_sampling_size: default_sampling_size(),
            accuracy_criterion:        AccuracyCriterion::default(),
            tuning_criterion:          TuningCriterion::default(),
            excluded_layers:           Vec::new(),
        }
    }

    pub fn with_accuracy_criterion(mut self, criterion: AccuracyCriterion) -> Self {
        self.accuracy_criterion = criterion;
        self
    }

    pub fn with_tuning_criterion(mut self, criterion: TuningCriterion) -> Self {
        self.tuning_criterion = criterion;
        self
    }

    pub fn with_weight_granularity(mut self, granularity: WeightGranularity) -> Self {
        self.weight_granularity = granularity;
        self
    }

    pub fn validate(&self) -> Result<(), CompressionError> {
        self.accuracy_criterion.validate()?;
        self.tuning_criterion.validate()?;
        if self.approach.needs_calibration() && self.calibration_sampling_size == 0 {
            return Err(invalid("calibration_sampling_size must be at least 1"));
        }
        Ok(())
    }
}
