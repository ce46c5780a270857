// ============================================================
// Layer 6 — Infrastructure Layer
// ============================================================
// Everything that touches the model directory on disk:
//
//   checkpoint.rs      — model card (config.json), weight files
//                        through Burn's full-precision recorder,
//                        and optional per-epoch snapshots
//
//   model_store.rs     — saving and loading whole model
//                        directories; recognises compressed
//                        directories by compression.json
//
//   tokenizer_store.rs — builds, saves and copies the word-level
//                        tokenizer shipped with every model
//
//   metrics.rs         — per-epoch metrics CSV
//
// Reference: Rust Book §7 (Modules)
//            Rust Book §9 (Error Handling with anyhow)
//            Burn Book §5 (Records)

/// Model card, weights and per-epoch checkpoints
pub mod checkpoint;

/// Float / compressed model directories
pub mod model_store;

/// Tokenizer building, saving, and loading
pub mod tokenizer_store;

/// Training metrics CSV logger
pub mod metrics;
