// ============================================================
// Layer 2 — Application / Use Cases
// ============================================================
// Each use case runs one command from start to finish, reading
// and writing model directories:
//
//   train     dataset file            → FP32 model directory
//   quantize  FP32 model directory    → dynamic / static INT8
//   compress  FP32 model directory    → QAT / pruned / distilled
//   evaluate  any model directory     → metrics
//   inspect   any model directory     → compression summary
//
// Rules for this layer:
//   - No ML math or model code here
//   - No printing here (that's Layer 1); results are returned
//   - Only workflow coordination
//
// Reference: Clean Architecture pattern
//            Rust Book §7 (Module System)

// FP32 training from a labelled text file
pub mod train_use_case;

// Post-training dynamic / static quantization with tuning
pub mod quantize_use_case;

// Compression during training (QAT, pruning, distillation)
pub mod compress_use_case;

// Metrics of a saved model on a labelled file
pub mod evaluate_use_case;

// Summary of what was done to a model directory
pub mod inspect_use_case;

#[cfg(test)]
pub(crate) mod tests {
    use std::path::{Path, PathBuf};

    use crate::application::train_use_case::{TrainConfig, TrainUseCase};
    use crate::ml::trainer::TrainingArgs;

    /// Two clearly separable classes.
    pub fn write_sentiment_file(dir: &Path, name: &str) -> PathBuf {
        let positive = ["good fun film", "great happy story", "fine good acting", "happy great fun"];
        let negative = ["bad dull film", "awful sad story", "poor bad acting", "dull awful plot"];
        let mut lines = Vec::new();
        for round in 0..3 {
            for (p, n) in positive.iter().zip(negative.iter()) {
                lines.push(format!("{{\"text\": \"{p} {round}\", \"label\": \"pos\"}}"));
                lines.push(format!("{{\"text\": \"{n} {round}\", \"label\": \"neg\"}}"));
            }
        }
        let path = dir.join(name);
        std::fs::write(&path, lines.join("\n")).unwrap();
        path
    }

    /// Train a tiny FP32 model into `dir/base` and return its path.
    pub fn train_tiny_model(dir: &Path) -> PathBuf {
        let data = write_sentiment_file(dir, "train.jsonl");
        let output = dir.join("base");
        let config = TrainConfig {
            train_file:   data,
            eval_file:    None,
            val_fraction: 0.25,
            vocab_size:   64,
            max_seq_len:  8,
            d_model:      16,
            num_heads:    2,
            num_layers:   1,
            d_ff:         32,
            dropout:      0.0,
            resume:       false,
            args: TrainingArgs {
                epochs:        4,
                batch_size:    6,
                learning_rate: 3e-3,
                logging_steps: 0,
                ..TrainingArgs::new(&output)
            },
        };
        TrainUseCase::new(config).execute().unwrap();
        output
    }
}
