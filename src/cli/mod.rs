// ============================================================
// Layer 1 — CLI / Presentation Layer
// ============================================================
// Entry point for all user interaction. clap parses the command
// line; each subcommand is converted into an application config
// and handed to its use case. Results are printed here and
// nowhere else.
//
// Typical workflow:
//   model-compress train    --train-file data/train.jsonl --output-dir models/base
//   model-compress quantize --model-dir models/base --output-dir models/int8 \
//                           --approach static --calibration-file data/dev.jsonl \
//                           --eval-file data/dev.jsonl
//   model-compress inspect  --model-dir models/int8
//
// Reference: Rust Book §7 (Modules), §12 (CLI programs)

pub mod commands;

use anyhow::Result;
use clap::Parser;
use commands::{CompressArgs, Commands, EvaluateArgs, InspectArgs, QuantizeArgs, TrainArgs};

use crate::ml::evaluator::Metrics;

#[derive(Parser, Debug)]
#[command(
    name = "model-compress",
    version,
    about = "Quantize, prune and distill transformer text classifiers."
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

impl Cli {
    /// Dispatch to the matching use case.
    pub fn run(self) -> Result<()> {
        match self.command {
            Commands::Train(args)    => run_train(args),
            Commands::Quantize(args) => run_quantize(args),
            Commands::Compress(args) => run_compress(args),
            Commands::Evaluate(args) => run_evaluate(args),
            Commands::Inspect(args)  => run_inspect(args),
        }
    }
}

fn run_train(args: TrainArgs) -> Result<()> {
    use crate::application::train_use_case::TrainUseCase;

    tracing::info!("Training on '{}'", args.train_file.display());
    let summary = TrainUseCase::new(args.into()).execute()?;

    if summary.start_epoch > 0 {
        println!("Resumed after epoch {}.", summary.start_epoch);
    }
    println!("Training complete: {} steps on {} samples ({} held out).",
        summary.global_step, summary.train_size, summary.eval_size);
    println!("Labels: {}", summary.labels.names().join(", "));
    if let Some(last) = &summary.last_epoch {
        println!("Final train loss: {:.4}", last.train_loss);
        print_metrics(&last.eval);
    }
    println!("Model saved to '{}'", summary.output_dir.display());
    Ok(())
}

fn run_quantize(args: QuantizeArgs) -> Result<()> {
    use crate::application::quantize_use_case::QuantizeUseCase;

    let summary = QuantizeUseCase::new(args.try_into()?).execute()?;

    println!("Approach: {}", summary.approach);
    println!("INT8 layers: {}", summary.int8_layers);
    if !summary.fallback.is_empty() {
        println!("FP32 fallback: {}", summary.fallback.join(", "));
    }
    if let (Some(trials), Some(baseline)) = (summary.trials, summary.baseline) {
        println!("Tuning: accepted after {trials} trial(s), FP32 baseline {baseline:.4}");
    }
    if let Some(metrics) = &summary.metrics {
        print_metrics(metrics);
    }
    println!(
        "Linear weights: {:.1} KiB → {:.1} KiB",
        kib(summary.float_bytes),
        kib(summary.stored_bytes)
    );
    println!("Quantized model saved to '{}'", summary.output_dir.display());
    Ok(())
}

fn run_compress(args: CompressArgs) -> Result<()> {
    use crate::application::compress_use_case::CompressUseCase;

    let summary = CompressUseCase::new(args.try_into()?).execute()?;

    println!("Compression training complete: {} steps.", summary.global_step);
    println!("Quantization-aware: {}", summary.quantized);
    println!("Distilled: {}", summary.distilled);
    if let Some(sparsity) = &summary.sparsity {
        println!("Sparsity: {:.1}%", sparsity.overall * 100.0);
    }
    if let Some(metrics) = &summary.metrics {
        print_metrics(metrics);
    }
    println!("Compressed model saved to '{}'", summary.output_dir.display());
    Ok(())
}

fn run_evaluate(args: EvaluateArgs) -> Result<()> {
    use crate::application::evaluate_use_case::EvaluateUseCase;

    let result = EvaluateUseCase::new(args.into()).execute()?;
    let kind = if result.quantized { "quantized" } else { "FP32" };
    println!("Evaluated {kind} model on {} samples", result.samples);
    print_metrics(&result.metrics);
    Ok(())
}

fn run_inspect(args: InspectArgs) -> Result<()> {
    use crate::application::inspect_use_case::InspectUseCase;

    let report = InspectUseCase::new(args.model_dir).execute()?;
    let m = &report.model;

    println!("Model directory: {}", report.dir.display());
    println!(
        "Architecture: {} layers, d_model {}, {} heads, d_ff {}, max_seq_len {}, vocab {}",
        m.num_layers, m.d_model, m.num_heads, m.d_ff, m.max_seq_len, m.vocab_size
    );
    println!("Labels: {}", report.labels.names().join(", "));
    println!("Linear layers: {}", report.linear_layers);
    println!(
        "Linear weights: {:.1} KiB stored ({:.1} KiB as FP32)",
        kib(report.stored_bytes),
        kib(report.float_bytes)
    );
    println!("Zero weights in encoder: {:.1}%", report.zero_fraction * 100.0);

    let Some(manifest) = &report.manifest else {
        println!("Compression: none");
        return Ok(());
    };
    if let Some(plan) = &manifest.quantization {
        println!("Quantization: {} ({} INT8 layers)", plan.approach, plan.layers.len());
        if !plan.fallback.is_empty() {
            println!("  FP32 fallback: {}", plan.fallback.join(", "));
        }
    }
    if let Some(tuning) = &manifest.tuning {
        let accepted = tuning.accepted_trial();
        println!(
            "Tuning: {} trial(s), baseline {:.4}, accepted trial {} ({:.4})",
            tuning.trials.len(),
            tuning.baseline,
            accepted.index,
            accepted.metric
        );
    }
    if let Some(sparsity) = &manifest.sparsity {
        println!("Pruning: {:.1}% sparsity over {} layers", sparsity.overall * 100.0, sparsity.layers.len());
        for (name, layer) in &sparsity.layers {
            println!("  {name:<28} {:.1}%", layer.ratio() * 100.0);
        }
    }
    if let Some(distillation) = &manifest.config.distillation {
        println!(
            "Distillation: teacher '{}', T={}, alpha={}",
            distillation.teacher_dir, distillation.temperature, distillation.alpha
        );
    }
    if let Some(metrics) = &manifest.metrics {
        print_metrics(metrics);
    }
    Ok(())
}

fn print_metrics(metrics: &Metrics) {
    for (name, value) in metrics {
        println!("  {name:<12} {value:.4}");
    }
}

fn kib(bytes: usize) -> f64 {
    bytes as f64 / 1024.0
}
