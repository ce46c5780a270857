// ============================================================
// Layer 3 — Text Sample Domain Types
// ============================================================
// A labelled example in domain terms, before any tokenisation,
// and the ordered label vocabulary the classifier predicts over.
//
// Example:
//   text:  "the plot was thin but the acting carried it"
//   label: "positive"
//
// Reference: Rust Book §5 (Structs and Methods)

use serde::{Deserialize, Serialize};

/// A raw labelled sample loaded from a dataset file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextSample {
    /// The input text to classify
    pub text: String,

    /// The label name exactly as it appears in the dataset
    pub label: String,
}

impl TextSample {
    pub fn new(text: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            text:  text.into(),
            label: label.into(),
        }
    }
}

/// Ordered set of label names. Label id = position in `names`.
///
/// Built from the training file (sorted, deduplicated) and saved
/// next to the model so evaluation data maps to the same ids.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LabelSet {
    names: Vec<String>,
}

impl LabelSet {
    /// Collect the distinct labels of `samples` in sorted order.
    pub fn from_samples(samples: &[TextSample]) -> Self {
        let mut names: Vec<String> = samples.iter().map(|s| s.label.clone()).collect();
        names.sort();
        names.dedup();
        Self { names }
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    /// Label id for a name, or None if the label was never seen in training.
    pub fn id_of(&self, name: &str) -> Option<usize> {
        self.names.iter().position(|n| n == name)
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }
}
