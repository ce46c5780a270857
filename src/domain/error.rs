// ============================================================
// Layer 3 — Compression Errors
// ============================================================
// Typed failures of the compression workflow. The application
// and CLI layers carry these inside anyhow::Error, so callers
// can still downcast when they need to react to a specific one
// (e.g. ToleranceNotMet).

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CompressionError {
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("static quantization needs a calibration dataset")]
    MissingCalibrationData,

    #[error(
        "no configuration met the accuracy criterion after {trials} trial(s): \
         baseline={baseline:.4}, best={best:.4}"
    )]
    ToleranceNotMet {
        baseline: f64,
        best: f64,
        trials: usize,
    },

    #[error("metric '{name}' was not produced by the metric callback (available: {available})")]
    UnknownMetric { name: String, available: String },

    #[error("'{0}' is not a model directory (config.json or model weights missing)")]
    NotAModelDirectory(PathBuf),

    #[error("incompatible teacher: {0}")]
    IncompatibleTeacher(String),

    #[error("dataset '{0}' contains no usable samples")]
    EmptyDataset(String),
}

/// Shorthand used by validate() implementations.
pub(crate) fn invalid(msg: impl Into<String>) -> CompressionError {
    CompressionError::InvalidConfig(msg.into())
}
