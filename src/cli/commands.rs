// ============================================================
// Layer 1 — CLI Commands and Arguments
// ============================================================
// Defines the four subcommands: `prepare`, `train`, `predict`
// and `run`, and all their configurable flags.
//
// Every default is the constant of the reference workflow, so
// `run` without flags reproduces it end to end.
//
// Reference: Rust Book §12 (Building a CLI Program)

use clap::{ArgAction, Args, Subcommand};

use crate::application::{
    predict_use_case::PredictConfig,
    train_use_case::TrainConfig,
};
use crate::ml::generator::GenerationConfig;

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Reformat raw train/test JSONL into instruction records
    Prepare(PrepareArgs),

    /// Fine-tune the base model with LoRA adapters
    Train(TrainArgs),

    /// Answer the test set with the latest checkpoint
    Predict(PredictArgs),

    /// Train, then answer the test set with the tuned model
    Run(RunArgs),
}

#[derive(Args, Debug)]
pub struct PrepareArgs {
    #[arg(long, default_value = "train.jsonl")]
    pub raw_train: String,

    #[arg(long, default_value = "new_train.jsonl")]
    pub new_train: String,

    #[arg(long, default_value = "test.jsonl")]
    pub raw_test: String,

    #[arg(long, default_value = "new_test.jsonl")]
    pub new_test: String,

    /// Rewrite targets even if they already exist
    #[arg(long)]
    pub force: bool,
}

/// All arguments for the `train` command.
#[derive(Args, Debug)]
pub struct TrainArgs {
    /// Raw labelled training records
    #[arg(long, default_value = "train.jsonl")]
    pub raw_train: String,

    /// Reformatted training records (generated if absent)
    #[arg(long, default_value = "new_train.jsonl")]
    pub new_train: String,

    /// Directory with tokenizer.json, config.json and model.mpk
    #[arg(long, default_value = "models/phi-3-small")]
    pub base_model_dir: String,

    /// Where checkpoints, configs and metrics are written
    #[arg(long, default_value = "./output/phi3_train-dev20")]
    pub output_dir: String,

    #[arg(long, default_value_t = 1)]
    pub batch_size: usize,

    /// Batches whose gradients are summed before one optimizer step
    #[arg(long, default_value_t = 8)]
    pub gradient_accumulation_steps: usize,

    #[arg(long, default_value_t = 20)]
    pub epochs: usize,

    /// Peak learning rate, decayed linearly to zero
    #[arg(long, default_value_t = 1e-4)]
    pub lr: f64,

    /// Log the running loss every N optimizer steps
    #[arg(long, default_value_t = 10)]
    pub logging_steps: usize,

    #[arg(long, default_value_t = true, action = ArgAction::Set)]
    pub gradient_checkpointing: bool,

    /// Seed for data shuffling
    #[arg(long, default_value_t = 42)]
    pub seed: u64,

    /// Appended after every answer and used for padding
    #[arg(long, default_value = "<|endoftext|>")]
    pub pad_token: String,

    /// Tokens that end generation (repeatable)
    #[arg(long = "eos-token", default_values = ["<|endoftext|>", "<|im_end|>"])]
    pub eos_tokens: Vec<String>,

    /// Regenerate the reformatted records even if present
    #[arg(long)]
    pub force_prepare: bool,
}

/// Convert CLI TrainArgs into the application-layer TrainConfig.
/// This is the boundary between Layer 1 and Layer 2 —
/// the application layer never sees clap types.
impl From<TrainArgs> for TrainConfig {
    fn from(a: TrainArgs) -> Self {
        TrainConfig {
            raw_train_path:              a.raw_train,
            new_train_path:              a.new_train,
            base_model_dir:              a.base_model_dir,
            output_dir:                  a.output_dir,
            batch_size:                  a.batch_size,
            gradient_accumulation_steps: a.gradient_accumulation_steps,
            epochs:                      a.epochs,
            lr:                          a.lr,
            logging_steps:               a.logging_steps,
            gradient_checkpointing:      a.gradient_checkpointing,
            seed:                        a.seed,
            pad_token:                   a.pad_token,
            eos_tokens:                  a.eos_tokens,
            force_prepare:               a.force_prepare,
        }
    }
}

#[derive(Args, Debug)]
pub struct GenerationArgs {
    #[arg(long, default_value_t = 512)]
    pub max_new_tokens: usize,

    /// 0 selects greedy decoding
    #[arg(long, default_value_t = 0.2)]
    pub temperature: f64,

    /// Seed for token sampling
    #[arg(long, default_value_t = 42)]
    pub sample_seed: u64,
}

impl From<GenerationArgs> for GenerationConfig {
    fn from(a: GenerationArgs) -> Self {
        GenerationConfig {
            max_new_tokens: a.max_new_tokens,
            temperature:    a.temperature,
            seed:           a.sample_seed,
        }
    }
}

/// Held-out set and transcript locations
#[derive(Args, Debug)]
pub struct TestSetArgs {
    #[arg(long, default_value = "test.jsonl")]
    pub raw_test: String,

    #[arg(long, default_value = "new_test.jsonl")]
    pub new_test: String,

    /// Answers are appended here, one per line
    #[arg(long, default_value = "result_epoch_auto.txt")]
    pub result_path: String,
}

#[derive(Args, Debug)]
pub struct PredictArgs {
    #[command(flatten)]
    pub test: TestSetArgs,

    /// Output directory of the training run
    #[arg(long, default_value = "./output/phi3_train-dev20")]
    pub output_dir: String,

    #[arg(long)]
    pub force_prepare: bool,

    #[command(flatten)]
    pub generation: GenerationArgs,
}

impl From<PredictArgs> for PredictConfig {
    fn from(a: PredictArgs) -> Self {
        PredictConfig {
            raw_test_path: a.test.raw_test,
            new_test_path: a.test.new_test,
            output_dir:    a.output_dir,
            result_path:   a.test.result_path,
            force_prepare: a.force_prepare,
            generation:    a.generation.into(),
        }
    }
}

#[derive(Args, Debug)]
pub struct RunArgs {
    #[command(flatten)]
    pub train: TrainArgs,

    #[command(flatten)]
    pub test: TestSetArgs,

    #[command(flatten)]
    pub generation: GenerationArgs,
}

impl RunArgs {
    /// Split into the two application configs; prediction reuses the
    /// training output directory and prepare flag.
    pub fn into_configs(self) -> (TrainConfig, PredictConfig) {
        let predict = PredictConfig {
            raw_test_path: self.test.raw_test,
            new_test_path: self.test.new_test,
            output_dir:    self.train.output_dir.clone(),
            result_path:   self.test.result_path,
            force_prepare: self.train.force_prepare,
            generation:    self.generation.into(),
        };
        (self.train.into(), predict)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::Cli;
    use clap::Parser;

    fn parse(args: &[&str]) -> Commands {
        Cli::try_parse_from(args).unwrap().command
    }

    #[test]
    fn test_run_defaults_match_workflow_constants() {
        let Commands::Run(args) = parse(&["role-lora-tuner", "run"]) else {
            panic!("expected run");
        };
        let (train, predict) = args.into_configs();

        let expected = TrainConfig::default();
        assert_eq!(train.raw_train_path, expected.raw_train_path);
        assert_eq!(train.output_dir, expected.output_dir);
        assert_eq!(train.gradient_accumulation_steps, 8);
        assert_eq!(train.epochs, 20);
        assert_eq!(train.lr, 1e-4);
        assert!(train.gradient_checkpointing);
        assert_eq!(train.eos_tokens, expected.eos_tokens);

        assert_eq!(predict.result_path, "result_epoch_auto.txt");
        assert_eq!(predict.output_dir, train.output_dir);
        assert_eq!(predict.generation, GenerationConfig::default());
    }

    #[test]
    fn test_train_flags_override_defaults() {
        let Commands::Train(args) = parse(&[
            "role-lora-tuner", "train",
            "--epochs", "3",
            "--gradient-checkpointing", "false",
            "--eos-token", "<|end|>",
        ]) else {
            panic!("expected train");
        };
        let cfg: TrainConfig = args.into();
        assert_eq!(cfg.epochs, 3);
        assert!(!cfg.gradient_checkpointing);
        assert_eq!(cfg.eos_tokens, vec!["<|end|>".to_string()]);
    }

    #[test]
    fn test_predict_greedy() {
        let Commands::Predict(args) = parse(&["role-lora-tuner", "predict", "--temperature", "0"]) else {
            panic!("expected predict");
        };
        let cfg: PredictConfig = args.into();
        assert_eq!(cfg.generation.temperature, 0.0);
        assert_eq!(cfg.generation.max_new_tokens, 512);
    }
}
