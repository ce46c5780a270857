// ============================================================
// Layer 3 — Distillation Configuration
// ============================================================
// The student is trained on a blend of the hard labels and the
// teacher's temperature-softened output distribution:
//
//   loss = alpha * T^2 * KL(teacher_T || student_T)
//        + (1 - alpha) * CE(student, labels)
//
// Reference: Hinton et al. (2015) "Distilling the Knowledge in a Neural Network"

use serde::{Deserialize, Serialize};

use crate::domain::error::{invalid, CompressionError};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DistillationConfig {
    /// Directory of a trained model used as the teacher
    pub teacher_dir: String,

    #[serde(default = "default_temperature")]
    pub temperature: f64,

    /// Weight of the distillation term; 1 - alpha goes to the hard-label loss
    #[serde(default = "default_alpha")]
    pub alpha: f64,
}

fn default_temperature() -> f64 {
    2.0
}

fn default_alpha() -> f64 {
    0.5
}

impl DistillationConfig {
    pub fn new(teacher_dir: impl Into<String>) -> Self {
        Self {
            teacher_dir: teacher_dir.into(),
            temperature: default_temperature(),
            alpha:       default_alpha(),
        }
    }

    pub fn validate(&self) -> Result<(), CompressionError> {
        if !(self.temperature > 0.0) {
            return Err(invalid(format!(
                "temperature must be positive, got {}",
                self.temperature
            )));
        }
        if !(0.0..=1.0).contains(&self.alpha) {
            return Err(invalid(format!("alpha must be in [0, 1], got {}", self.alpha)));
        }
        if self.teacher_dir.trim().is_empty() {
            return Err(invalid("teacher_dir is empty"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_and_validation() {
        let cfg = DistillationConfig::new("teacher");
        assert_eq!(cfg.temperature, 2.0);
        assert_eq!(cfg.alpha, 0.5);
        assert!(cfg.validate().is_ok());

        let hot = DistillationConfig { temperature: 0.0, ..cfg.clone() };
        assert!(hot.validate().is_err());
        let heavy = DistillationConfig { alpha: 1.5, ..cfg };
        assert!(heavy.validate().is_err());
    }
}
