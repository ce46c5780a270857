// ============================================================
// Layer 3 — Domain Layer
// ============================================================
// Plain Rust types that describe WHAT a compression run is:
// the configuration bags, the labelled samples, the error
// taxonomy and the traits other layers implement.
//
// Rules for this layer:
//   - NO Burn framework types allowed here
//   - NO file I/O
//   - Only structs, enums, traits and validation logic
//
// Reference: Rust Book §5 (Structs), §10 (Traits)

// A labelled text example and the label vocabulary
pub mod sample;

// Post-training / quantization-aware training settings
pub mod quantization;

// Magnitude pruning settings and the sparsity schedule
pub mod pruning;

// Knowledge distillation settings
pub mod distillation;

// The top-level configuration bag combining the three above
pub mod compression;

// Typed errors raised by the compression workflow
pub mod error;

// Core abstractions (traits) that other layers implement
pub mod traits;
