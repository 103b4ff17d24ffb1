// ============================================================
// Layer 2 — Predict Use Case
// ============================================================
// Batch inference over the held-out set:
//
//   1. Reformat test.jsonl → new_test.jsonl (skipped if present)
//   2. For each row, in file order:
//        messages = [system: instruction, user: input]
//        answer   = completer.complete(messages)
//        print answer, append it to result_epoch_auto.txt
//
// Rows run one at a time; the first failure aborts the remainder,
// leaving earlier answers in the transcript.
//
// run_with() loads the rows before building the completer, so a bad
// test file fails before any model is trained or restored.

use anyhow::{Context, Result};
use burn::backend::{wgpu::WgpuDevice, Wgpu};

use crate::data::{
    loader::load_formatted,
    reformatter::{prepare, Prepared},
};
use crate::domain::{
    chat::ChatMessage,
    example::FormattedExample,
    traits::Completer,
};
use crate::infra::{checkpoint::CheckpointManager, transcript::TranscriptWriter};
use crate::ml::generator::{GenerationConfig, Generator};

#[derive(Debug, Clone)]
pub struct PredictConfig {
    pub raw_test_path: String,
    pub new_test_path: String,
    /// Output root of the training run to restore from
    pub output_dir:    String,
    pub result_path:   String,
    pub force_prepare: bool,
    pub generation:    GenerationConfig,
}

impl Default for PredictConfig {
    fn default() -> Self {
        Self {
            raw_test_path: "test.jsonl".to_string(),
            new_test_path: "new_test.jsonl".to_string(),
            output_dir:    "./output/phi3_train-dev20".to_string(),
            result_path:   "result_epoch_auto.txt".to_string(),
            force_prepare: false,
            generation:    GenerationConfig::default(),
        }
    }
}

/// Generate one answer, print it and append it to the transcript.
pub fn predict<C: Completer>(
    messages:   &[ChatMessage],
    completer:  &mut C,
    transcript: &TranscriptWriter,
) -> Result<String> {
    let response = completer.complete(messages)?;
    println!("{response}");
    transcript.append(&response)?;
    Ok(response)
}

pub fn conversation(row: &FormattedExample) -> [ChatMessage; 2] {
    [
        ChatMessage::system(row.instruction.as_str()),
        ChatMessage::user(row.input.as_str()),
    ]
}

pub struct PredictUseCase {
    config: PredictConfig,
}

impl PredictUseCase {
    pub fn new(config: PredictConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &PredictConfig {
        &self.config
    }

    /// Rebuild the adapted model from the newest checkpoint of a past run
    pub fn restore_generator(&self) -> Result<Generator<Wgpu>> {
        let ckpt = CheckpointManager::new(&self.config.output_dir)?;
        Generator::from_checkpoint(&ckpt, self.config.generation.clone(), WgpuDevice::default())
    }

    /// Reformat (if needed) and load the held-out rows
    pub fn load_rows(&self) -> Result<Vec<FormattedExample>> {
        let cfg = &self.config;
        if let Prepared::Generated(n) = prepare(&cfg.raw_test_path, &cfg.new_test_path, cfg.force_prepare)? {
            tracing::info!("Wrote {} test records", n);
        }
        load_formatted(&cfg.new_test_path)
    }

    /// Load the rows, then obtain the completer from `build` and answer them.
    pub fn run_with<C, F>(&self, build: F) -> Result<usize>
    where
        C: Completer,
        F: FnOnce() -> Result<C>,
    {
        let rows = self.load_rows()?;
        let mut completer = build()?;
        self.run_rows(&rows, &mut completer)
    }

    /// Answer every row in order. Returns the number of rows answered.
    pub fn run_rows<C: Completer>(&self, rows: &[FormattedExample], completer: &mut C) -> Result<usize> {
        let transcript = TranscriptWriter::new(&self.config.result_path);
        tracing::info!("Predicting {} rows into '{}'", rows.len(), transcript.path().display());

        for (idx, row) in rows.iter().enumerate() {
            predict(&conversation(row), completer, &transcript)
                .with_context(|| format!("Prediction failed on test row {}", idx + 1))?;
        }
        Ok(rows.len())
    }
}
