// ============================================================
// Layer 4 — Text Encoder
// ============================================================
// Turns a TextSample into model inputs:
//
//   [CLS] token token ... token [SEP] [PAD] [PAD] ...
//   \_____________ max_seq_len _________________/
//
// Text longer than max_seq_len - 2 tokens is truncated so the
// [SEP] marker always survives. Samples whose label is missing
// from the label set are skipped with a warning; at evaluation
// time that means a label the model was never trained on.

use anyhow::Result;
use std::path::Path;
use tokenizers::Tokenizer;

use crate::data::dataset::{ClassificationDataset, EncodedSample};
use crate::data::loader::DatasetLoader;
use crate::data::preprocessor::Preprocessor;
use crate::domain::error::CompressionError;
use crate::domain::sample::{LabelSet, TextSample};
use crate::domain::traits::SampleSource;

pub const PAD_ID: u32 = 0;
pub const CLS_ID: u32 = 101;
pub const SEP_ID: u32 = 102;

pub struct TextEncoder<'a> {
    tokenizer:    &'a Tokenizer,
    labels:       &'a LabelSet,
    max_seq_len:  usize,
    preprocessor: Preprocessor,
}

impl<'a> TextEncoder<'a> {
    pub fn new(tokenizer: &'a Tokenizer, labels: &'a LabelSet, max_seq_len: usize) -> Self {
        Self {
            tokenizer,
            labels,
            max_seq_len: max_seq_len.max(2),
            preprocessor: Preprocessor::new(),
        }
    }

    /// Encode one sample. Ok(None) means the label is unknown.
    pub fn encode(&self, sample: &TextSample) -> Result<Option<EncodedSample>> {
        let Some(label) = self.labels.id_of(&sample.label) else {
            return Ok(None);
        };

        let text = self.preprocessor.clean(&sample.text);
        let enc  = self
            .tokenizer
            .encode(text.as_str(), false)
            .map_err(|e| anyhow::anyhow!("Tokenisation error: {e}"))?;

        Ok(Some(pack(enc.get_ids(), label, self.max_seq_len)))
    }

    /// Encode every sample, dropping (and counting) unknown labels.
    pub fn encode_all(&self, samples: &[TextSample]) -> Result<Vec<EncodedSample>> {
        let mut encoded = Vec::with_capacity(samples.len());
        let mut skipped = 0usize;

        for sample in samples {
            match self.encode(sample)? {
                Some(e) => encoded.push(e),
                None => skipped += 1,
            }
        }

        if skipped > 0 {
            tracing::warn!("Skipped {} samples with labels unknown to the model", skipped);
        }
        Ok(encoded)
    }

    /// Load a dataset file and encode it. A file whose labels are all
    /// unknown counts as empty.
    pub fn encode_file(&self, path: &Path) -> Result<ClassificationDataset> {
        let samples = DatasetLoader::new(path).load_all()?;
        let encoded = self.encode_all(&samples)?;
        if encoded.is_empty() {
            return Err(CompressionError::EmptyDataset(path.display().to_string()).into());
        }
        Ok(ClassificationDataset::new(encoded))
    }
}

/// Build the padded id/mask pair from raw token ids.
fn pack(token_ids: &[u32], label: usize, max_seq_len: usize) -> EncodedSample {
    let budget = max_seq_len - 2;

    let mut input_ids = Vec::with_capacity(max_seq_len);
    input_ids.push(CLS_ID);
    input_ids.extend(token_ids.iter().take(budget).copied());
    input_ids.push(SEP_ID);

    let mut attention_mask = vec![1u32; input_ids.len()];
    input_ids.resize(max_seq_len, PAD_ID);
    attention_mask.resize(max_seq_len, 0);

    EncodedSample { input_ids, attention_mask, label }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pack_pads_short_input() {
        let s = pack(&[7, 8], 1, 6);
        assert_eq!(s.input_ids, vec![CLS_ID, 7, 8, SEP_ID, PAD_ID, PAD_ID]);
        assert_eq!(s.attention_mask, vec![1, 1, 1, 1, 0, 0]);
        assert_eq!(s.label, 1);
    }

    #[test]
    fn test_pack_truncates_but_keeps_sep() {
        let s = pack(&[5, 6, 7, 8, 9], 0, 4);
        assert_eq!(s.input_ids, vec![CLS_ID, 5, 6, SEP_ID]);
        assert_eq!(s.attention_mask, vec![1, 1, 1, 1]);
    }
}
