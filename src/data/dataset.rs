use std::sync::Arc;

use burn::data::dataset::{transform::PartialDataset, Dataset};
use serde::{Deserialize, Serialize};

/// One tokenised and padded classification sample.
/// Sequence format: [CLS] text [SEP] [PAD]...
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EncodedSample {
    pub input_ids:      Vec<u32>,
    pub attention_mask: Vec<u32>,
    pub label:          usize,
}

/// Encoded samples behind an `Arc`, so handing a copy to each
/// data loader does not copy the samples.
#[derive(Debug, Clone)]
pub struct ClassificationDataset {
    samples: Arc<[EncodedSample]>,
}

impl ClassificationDataset {
    pub fn new(samples: Vec<EncodedSample>) -> Self { Self { samples: samples.into() } }

    pub fn samples(&self) -> &[EncodedSample] { &self.samples }

    /// The first `n` samples, used to bound calibration runs.
    pub fn head(&self, n: usize) -> PartialDataset<Self, EncodedSample> {
        PartialDataset::new(self.clone(), 0, n.min(self.samples.len()))
    }
}

impl Dataset<EncodedSample> for ClassificationDataset {
    fn get(&self, index: usize) -> Option<EncodedSample> {
        self.samples.get(index).cloned()
    }

    fn len(&self) -> usize {
        self.samples.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(label: usize) -> EncodedSample {
        EncodedSample { input_ids: vec![101, 5, 102, 0], attention_mask: vec![1, 1, 1, 0], label }
    }

    #[test]
    fn test_head_is_bounded_by_the_dataset() {
        let ds = ClassificationDataset::new(vec![sample(0), sample(1), sample(2)]);
        assert_eq!(ds.len(), 3);
        assert_eq!(ds.head(10).len(), 3);

        let head = ds.head(2);
        assert_eq!(head.len(), 2);
        assert_eq!(head.get(1).unwrap().label, 1);
        assert!(head.get(2).is_none());
    }

    #[test]
    fn test_clones_share_samples() {
        let ds = ClassificationDataset::new(vec![sample(4)]);
        let copy = ds.clone();
        assert!(std::ptr::eq(ds.samples().as_ptr(), copy.samples().as_ptr()));
        assert_eq!(copy.get(0).unwrap().label, 4);
    }
}
