// ============================================================
// Layer 1 — CLI / Presentation Layer
// ============================================================
// This is the entry point for all user interaction.
// It uses the `clap` crate to parse command line arguments.
// All business logic is delegated to Layer 2 (application).
//
// Four commands are supported:
//   1. `prepare` — reformat raw JSONL into instruction records
//   2. `train`   — LoRA fine-tuning with per-epoch checkpoints
//   3. `predict` — answer the test set from the latest checkpoint
//   4. `run`     — train, then predict with the in-memory model
//
// Reference: Rust Book §7 (Modules), §12 (CLI programs)

pub mod commands;

use anyhow::Result;
use clap::Parser;
use commands::{Commands, PrepareArgs, PredictArgs, RunArgs, TrainArgs};

use crate::data::reformatter::{prepare, Prepared};

#[derive(Parser, Debug)]
#[command(
    name = "role-lora-tuner",
    version,
    about = "LoRA fine-tuning of a causal LM to label the fine-grained roles of entities in articles."
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

impl Cli {
    /// Match on the subcommand and dispatch to the correct use case.
    pub fn run(self) -> Result<()> {
        match self.command {
            Commands::Prepare(args) => run_prepare(args),
            Commands::Train(args)   => run_train(args),
            Commands::Predict(args) => run_predict(args),
            Commands::Run(args)     => run_all(args),
        }
    }
}

fn run_prepare(args: PrepareArgs) -> Result<()> {
    for (raw, new) in [(&args.raw_train, &args.new_train), (&args.raw_test, &args.new_test)] {
        match prepare(raw, new, args.force)? {
            Prepared::Generated(n) => println!("{raw} → {new}: {n} records"),
            Prepared::Skipped      => println!("{new} exists, skipped (use --force to rewrite)"),
        }
    }
    Ok(())
}

fn run_train(args: TrainArgs) -> Result<()> {
    use crate::application::train_use_case::TrainUseCase;

    tracing::info!("Fine-tuning on '{}'", args.raw_train);
    let output_dir = args.output_dir.clone();
    TrainUseCase::new(args.into()).execute()?;

    println!("Training complete. Checkpoints saved under '{output_dir}'.");
    Ok(())
}

fn run_predict(args: PredictArgs) -> Result<()> {
    use crate::application::predict_use_case::PredictUseCase;

    let use_case = PredictUseCase::new(args.into());
    let n = use_case.run_with(|| use_case.restore_generator())?;

    println!("Answered {n} rows into '{}'.", use_case.config().result_path);
    Ok(())
}

fn run_all(args: RunArgs) -> Result<()> {
    use crate::application::{predict_use_case::PredictUseCase, train_use_case::TrainUseCase};

    let (train_cfg, predict_cfg) = args.into_configs();
    let generation = predict_cfg.generation.clone();
    let use_case   = PredictUseCase::new(predict_cfg);

    // test rows are prepared and loaded before training starts
    let n = use_case.run_with(|| {
        let trained = TrainUseCase::new(train_cfg).execute()?;
        Ok(trained.into_generator(generation))
    })?;

    println!("Answered {n} rows into '{}'.", use_case.config().result_path);
    Ok(())
}
