// ============================================================
// Layer 5 — ML / Model Layer (Burn)
// ============================================================
// All Burn tensor and module code lives here. The application
// layer only sees the types re-exported by these modules.
//
//   model.rs               — transformer encoder text classifier,
//                            every Linear routed through a LayerHook
//
//   hooks.rs               — LayerHook implementations: FP32,
//                            min/max observer, fake quantization
//                            (QAT) and plan execution
//
//   quant.rs               — INT8 / UINT8 quantization math
//
//   quantizer.rs           — post-training quantizer: calibration,
//                            plan building, conversion, tuning
//
//   tuner.rs               — basic accuracy-gated trial search
//
//   pruner.rs              — magnitude pruning on a sparsity schedule
//
//   distiller.rs           — teacher soft targets and KD loss
//
//   evaluator.rs           — batched prediction and metric callback
//
//   trainer.rs             — Adam training loop, per-epoch eval
//
//   compression_trainer.rs — trainer with QAT / pruning / distillation
//
// Inference and post-training work run on the CPU NdArray
// backend; training wraps it in Autodiff.
//
// Reference: Burn Book §3 (Building Blocks)
//            Burn Book §5 (Training)
//            Jacob et al. (2018) Quantization and Training of
//            Neural Networks for Efficient Integer-Arithmetic-Only
//            Inference

use burn::backend::{ndarray::NdArrayDevice, Autodiff, NdArray};

/// Backend for inference, calibration and evaluation
pub type InferBackend = NdArray;

/// Backend for training (adds automatic differentiation)
pub type TrainBackend = Autodiff<InferBackend>;

/// The CPU device both backends run on.
pub fn device() -> NdArrayDevice {
    NdArrayDevice::Cpu
}

/// Transformer encoder classifier
pub mod model;

/// Per-layer forward hooks
pub mod hooks;

/// Quantization parameters and fake quantization
pub mod quant;

/// Post-training dynamic / static quantization
pub mod quantizer;

/// Trial search over FP32 fallback sets
pub mod tuner;

/// Magnitude pruning
pub mod pruner;

/// Knowledge distillation
pub mod distiller;

/// Evaluation loop and default metrics
pub mod evaluator;

/// Plain training loop
pub mod trainer;

/// Training loop with compression side effects
pub mod compression_trainer;
