// ============================================================
// Layer 4 — Classification Batcher
// ============================================================
// Stacks a slice of EncodedSamples into tensors:
//
//   input_ids       [batch, seq_len]   Int
//   attention_mask  [batch, seq_len]   Int (1 = token, 0 = padding)
//   labels          [batch]            Int
//
// All samples are pre-padded to the same length by the encoder,
// so batching is a flatten + reshape. The DataLoader hands each
// mini-batch of samples to `batch`; training, evaluation and
// calibration all read their data that way.
//
// Reference: Burn Book §4 (Batcher)

use burn::{data::dataloader::batcher::Batcher, prelude::*};

use crate::data::dataset::EncodedSample;

#[derive(Debug, Clone)]
pub struct ClassificationBatch<B: Backend> {
    pub input_ids:      Tensor<B, 2, Int>,
    pub attention_mask: Tensor<B, 2, Int>,
    pub labels:         Tensor<B, 1, Int>,
}

/// Holds the target device so tensors are created where the model lives.
#[derive(Clone, Debug)]
pub struct ClassificationBatcher<B: Backend> {
    device: B::Device,
}

impl<B: Backend> ClassificationBatcher<B> {
    pub fn new(device: B::Device) -> Self {
        Self { device }
    }
}

impl<B: Backend> Batcher<EncodedSample, ClassificationBatch<B>> for ClassificationBatcher<B> {
    /// The DataLoader never hands over an empty batch.
    fn batch(&self, items: Vec<EncodedSample>) -> ClassificationBatch<B> {
        let batch_size = items.len();
        let seq_len    = items[0].input_ids.len();

        let input_flat: Vec<i32> = items
            .iter()
            .flat_map(|s| s.input_ids.iter().map(|&x| x as i32))
            .collect();
        let mask_flat: Vec<i32> = items
            .iter()
            .flat_map(|s| s.attention_mask.iter().map(|&x| x as i32))
            .collect();
        let labels: Vec<i32> = items.iter().map(|s| s.label as i32).collect();

        let input_ids = Tensor::<B, 1, Int>::from_ints(input_flat.as_slice(), &self.device)
            .reshape([batch_size, seq_len]);
        let attention_mask = Tensor::<B, 1, Int>::from_ints(mask_flat.as_slice(), &self.device)
            .reshape([batch_size, seq_len]);
        let labels = Tensor::<B, 1, Int>::from_ints(labels.as_slice(), &self.device);

        ClassificationBatch { input_ids, attention_mask, labels }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;

    #[test]
    fn test_batch_shapes() {
        let device  = Default::default();
        let batcher = ClassificationBatcher::<NdArray>::new(device);
        let items = vec![
            EncodedSample { input_ids: vec![101, 7, 102, 0], attention_mask: vec![1, 1, 1, 0], label: 1 },
            EncodedSample { input_ids: vec![101, 8, 9, 102], attention_mask: vec![1, 1, 1, 1], label: 0 },
        ];
        let batch = batcher.batch(items);
        assert_eq!(batch.input_ids.dims(), [2, 4]);
        assert_eq!(batch.attention_mask.dims(), [2, 4]);
        assert_eq!(batch.labels.dims(), [2]);
        let mask_sum: i64 = batch.attention_mask.sum().into_scalar().elem::<i64>();
        assert_eq!(mask_sum, 7);
    }
}
