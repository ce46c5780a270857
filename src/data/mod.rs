// ============================================================
// Layer 4 — Data Pipeline
// ============================================================
// Everything from a dataset file on disk to tensor batches:
//
//   dataset.jsonl / dataset.csv
//       │
//       ▼
//   DatasetLoader     → reads records, yields TextSamples
//       │
//       ▼
//   Preprocessor      → normalises whitespace and control chars
//       │
//       ▼
//   TextEncoder       → [CLS] tokens [SEP] + padding, label id
//       │
//       ▼
//   ClassificationDataset → implements Burn's Dataset trait
//       │
//       ▼
//   ClassificationBatcher → stacks samples into tensors
//
// Reference: Burn Book §4 (Datasets)
//            Rust Book §13 (Iterators and Closures)

/// Reads JSON Lines / CSV classification files
pub mod loader;

/// Cleans and normalises raw text
pub mod preprocessor;

/// Tokenises, truncates and pads samples
pub mod encoder;

/// Implements Burn's Dataset trait for encoded samples
pub mod dataset;

/// Turns slices of samples into tensor batches
pub mod batcher;

/// Shuffles and splits data into train/validation sets
pub mod splitter;
