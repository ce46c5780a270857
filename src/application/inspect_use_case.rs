// ============================================================
// Layer 2 — InspectUseCase
// ============================================================
// Reports what a model directory contains: the architecture,
// the labels, and, for compressed models, the recorded
// compression.json next to what the stored weights actually show
// (zero fraction, INT8 storage size).

use anyhow::Result;
use std::path::PathBuf;

use crate::domain::sample::LabelSet;
use crate::infra::model_store::{CompressionManifest, LoadedModel, ModelStore};
use crate::ml::{
    self,
    model::{ClassifierConfig, CLASSIFIER},
    pruner::sparsity_report,
    InferBackend,
};

#[derive(Debug, Clone)]
pub struct ModelReport {
    pub dir:           PathBuf,
    pub model:         ClassifierConfig,
    pub labels:        LabelSet,
    pub linear_layers: usize,
    pub manifest:      Option<CompressionManifest>,
    /// Fraction of exactly-zero encoder weights
    pub zero_fraction: f64,
    pub float_bytes:   usize,
    pub stored_bytes:  usize,
}

pub struct InspectUseCase {
    model_dir: PathBuf,
}

impl InspectUseCase {
    pub fn new(model_dir: impl Into<PathBuf>) -> Self {
        Self { model_dir: model_dir.into() }
    }

    pub fn execute(&self) -> Result<ModelReport> {
        let store = ModelStore::new(&self.model_dir);
        let card = store.card()?;
        let manifest = store.manifest()?;
        let loaded = store.load::<InferBackend>(&ml::device())?;

        let classifier = loaded.classifier();
        let zero_fraction = sparsity_report(classifier, |name| name != CLASSIFIER).overall;
        let (float_bytes, stored_bytes) = match &loaded {
            LoadedModel::Quantized(q) => q.weight_bytes(),
            LoadedModel::Float(model) => {
                let bytes = model
                    .linears()
                    .iter()
                    .map(|(_, linear)| linear.weight.val().dims().iter().product::<usize>() * std::mem::size_of::<f32>())
                    .sum();
                (bytes, bytes)
            }
        };

        Ok(ModelReport {
            dir: self.model_dir.clone(),
            model: card.model,
            labels: card.labels,
            linear_layers: classifier.linears().len(),
            manifest,
            zero_fraction,
            float_bytes,
            stored_bytes,
        })
    }
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::quantize_use_case::{QuantizeConfig, QuantizeUseCase};
    use crate::application::tests::train_tiny_model;
    use crate::domain::compression::CompressionConfig;
    use crate::domain::quantization::{QuantizationApproach, QuantizationConfig};

    #[test]
    fn test_inspect_float_then_quantized() {
        let dir = tempfile::tempdir().unwrap();
        let base = train_tiny_model(dir.path());

        let report = InspectUseCase::new(&base).execute().unwrap();
        assert!(report.manifest.is_none());
        assert_eq!(report.float_bytes, report.stored_bytes);
        // one encoder block: four attention projections, two FFN layers, plus the head
        assert_eq!(report.linear_layers, 7);

        QuantizeUseCase::new(QuantizeConfig {
            model_dir:        base,
            output_dir:       dir.path().join("q"),
            calibration_file: None,
            eval_file:        None,
            batch_size:       8,
            compression:      CompressionConfig::default()
                .with_quantization(QuantizationConfig::new(QuantizationApproach::Dynamic)),
        })
        .execute()
        .unwrap();

        let report = InspectUseCase::new(dir.path().join("q")).execute().unwrap();
        let plan = report.manifest.unwrap().quantization.unwrap();
        assert_eq!(plan.layers.len(), 7);
        assert!(report.stored_bytes < report.float_bytes);
    }
}
