// ============================================================
// Layer 3 — Compression Configuration
// ============================================================
// The single "extra argument" a compression run receives on top
// of the ordinary training arguments. Any combination of the
// three techniques may be enabled:
//
//   {
//     "metric": "accuracy",
//     "quantization": { "approach": "aware_training" },
//     "pruning":      { "target_sparsity": 0.6, "start_step": 0, "end_step": 200 },
//     "distillation": { "teacher_dir": "models/teacher", "temperature": 2.0 }
//   }
//
// Post-training approaches (dynamic/static) are handled by the
// quantize command; the training-time combination by compress.

use serde::{Deserialize, Serialize};

use crate::domain::distillation::DistillationConfig;
use crate::domain::error::{invalid, CompressionError};
use crate::domain::pruning::PruningConfig;
use crate::domain::quantization::QuantizationConfig;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompressionConfig {
    /// Name of the metric the accuracy criterion is evaluated on
    #[serde(default = "default_metric")]
    pub metric: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quantization: Option<QuantizationConfig>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pruning: Option<PruningConfig>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub distillation: Option<DistillationConfig>,
}

fn default_metric() -> String {
    "accuracy".to_string()
}

impl Default for CompressionConfig {
    fn default() -> Self {
        Self {
            metric:       default_metric(),
            quantization: None,
            pruning:      None,
            distillation: None,
        }
    }
}

impl CompressionConfig {
    pub fn with_quantization(mut self, cfg: QuantizationConfig) -> Self {
        self.quantization = Some(cfg);
        self
    }

    pub fn with_pruning(mut self, cfg: PruningConfig) -> Self {
        self.pruning = Some(cfg);
        self
    }

    pub fn with_distillation(mut self, cfg: DistillationConfig) -> Self {
        self.distillation = Some(cfg);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.quantization.is_none() && self.pruning.is_none() && self.distillation.is_none()
    }

    /// True if the quantization part requires the compression trainer.
    pub fn quantization_aware(&self) -> bool {
        self.quantization
            .as_ref()
            .map(|q| !q.approach.is_post_training())
            .unwrap_or(false)
    }

    /// Parse a JSON document and validate it.
    pub fn from_json(json: &str) -> anyhow::Result<Self> {
        let cfg: Self = serde_json::from_str(json)?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<(), CompressionError> {
        if self.metric.trim().is_empty() {
            return Err(invalid("metric name is empty"));
        }
        if let Some(q) = &self.quantization {
            q.validate()?;
        }
        if let Some(p) = &self.pruning {
            p.validate()?;
        }
        if let Some(d) = &self.distillation {
            d.validate()?;
        }
        Ok(())
    }

    /// Validate for use inside the compression trainer: post-training
    /// approaches belong to the quantize command.
    pub fn validate_for_training(&self) -> Result<(), CompressionError> {
        self.validate()?;
        if self.is_empty() {
            return Err(invalid(
                "no compression technique enabled (quantization, pruning or distillation)",
            ));
        }
        if let Some(q) = &self.quantization {
            if q.approach.is_post_training() {
                return Err(invalid(format!(
                    "{} runs after training; use the quantize command",
                    q.approach
                )));
            }
        }
        Ok(())
    }
}
