// ============================================================
// Layer 2 — TrainUseCase
// ============================================================
// Orchestrates the full fine-tuning pipeline in order:
//
//   Step 1: Reformat train.jsonl → new_train.jsonl   (Layer 4 - data)
//   Step 2: Load formatted records                   (Layer 4 - data)
//   Step 3: Load tokenizer, resolve pad/eos ids      (Layer 6 - infra)
//   Step 4: Encode prompts + masked labels           (Layer 4 - data)
//   Step 5: Build dataset and collator               (Layer 4 - data)
//   Step 6: Save train + adapter config              (Layer 6 - infra)
//   Step 7: Attach LoRA and run the training loop    (Layer 5 - ml)
//
// Reference: Rust Book §13 (Iterators and Closures)
//            Burn Book §5 (Training)

use anyhow::Result;
use burn::backend::Wgpu;
use serde::{Deserialize, Serialize};
use tokenizers::Tokenizer;

use crate::data::{
    batcher::SftCollator,
    dataset::SftDataset,
    encoder::SequenceEncoder,
    loader::load_formatted,
    reformatter::{prepare, Prepared},
};
use crate::domain::example::MAX_LENGTH;
use crate::infra::{
    checkpoint::{load_model_config, CheckpointManager},
    tokenizer_store::{SpecialTokens, TokenizerStore},
};
use crate::ml::{
    generator::{GenerationConfig, Generator},
    lora::LoraConfig,
    model::CausalLm,
    trainer::run_training,
};

// ─── Training Configuration ──────────────────────────────────────────────────
// Every path and hyperparameter of a run.
// Saved as train_config.json next to the checkpoints so `predict`
// can rebuild the adapted model without the original flags.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainConfig {
    pub raw_train_path:              String,
    pub new_train_path:              String,
    /// Holds tokenizer.json, config.json and model.mpk
    pub base_model_dir:              String,
    pub output_dir:                  String,
    pub batch_size:                  usize,
    pub gradient_accumulation_steps: usize,
    pub epochs:                      usize,
    pub lr:                          f64,
    pub logging_steps:               usize,
    pub gradient_checkpointing:      bool,
    pub seed:                        u64,
    pub pad_token:                   String,
    pub eos_tokens:                  Vec<String>,
    pub force_prepare:               bool,
}

impl Default for TrainConfig {
    fn default() -> Self {
        Self {
            raw_train_path:              "train.jsonl".to_string(),
            new_train_path:              "new_train.jsonl".to_string(),
            base_model_dir:              "models/phi-3-small".to_string(),
            output_dir:                  "./output/phi3_train-dev20".to_string(),
            batch_size:                  1,
            gradient_accumulation_steps: 8,
            epochs:                      20,
            lr:                          1e-4,
            logging_steps:               10,
            gradient_checkpointing:      true,
            seed:                        42,
            pad_token:                   "<|endoftext|>".to_string(),
            eos_tokens:                  vec!["<|endoftext|>".to_string(), "<|im_end|>".to_string()],
            force_prepare:               false,
        }
    }
}

/// The tuned model together with what is needed to query it.
pub struct TrainedModel {
    pub model:     CausalLm<Wgpu>,
    pub tokenizer: Tokenizer,
    pub special:   SpecialTokens,
}

impl TrainedModel {
    pub fn into_generator(self, config: GenerationConfig) -> Generator<Wgpu> {
        Generator::new(self.model, self.tokenizer, self.special, Default::default(), config)
    }
}

// ─── TrainUseCase ─────────────────────────────────────────────────────────────
pub struct TrainUseCase {
    config: TrainConfig,
    lora:   LoraConfig,
}

impl TrainUseCase {
    pub fn new(config: TrainConfig) -> Self {
        Self { config, lora: LoraConfig::default() }
    }

    /// Execute the full fine-tuning pipeline end to end
    pub fn execute(&self) -> Result<TrainedModel> {
        let cfg = &self.config;

        // ── Step 1: Reformat raw records ──────────────────────────────────────
        match prepare(&cfg.raw_train_path, &cfg.new_train_path, cfg.force_prepare)? {
            Prepared::Generated(n) => tracing::info!("Wrote {} training records", n),
            Prepared::Skipped      => tracing::info!("Reusing '{}'", cfg.new_train_path),
        }

        // ── Step 2: Load formatted records ────────────────────────────────────
        let records = load_formatted(&cfg.new_train_path)?;
        tracing::info!("Loaded {} formatted records", records.len());

        // ── Step 3: Tokenizer and special ids ─────────────────────────────────
        let tokenizer = TokenizerStore::new(&cfg.base_model_dir).load()?;
        let special   = SpecialTokens::resolve(&tokenizer, &cfg.pad_token, &cfg.eos_tokens)?;

        // ── Step 4: Encode ────────────────────────────────────────────────────
        // Sequences never exceed the model's position table
        let model_cfg  = load_model_config(&cfg.base_model_dir)?;
        let max_length = MAX_LENGTH.min(model_cfg.max_position_embeddings);
        if max_length < MAX_LENGTH {
            tracing::warn!(
                "Model context is {} tokens; truncating sequences to {} instead of {}",
                model_cfg.max_position_embeddings,
                max_length,
                MAX_LENGTH
            );
        }
        let encoder = SequenceEncoder::new(&tokenizer, special.pad_id).with_max_length(max_length);
        let encoded = encoder.encode_all(&records)?;

        // ── Step 5: Dataset + collator ────────────────────────────────────────
        let dataset  = SftDataset::new(encoded);
        let collator = SftCollator::new(special.pad_id);

        // ── Step 6: Save configs for inference ────────────────────────────────
        let ckpt = CheckpointManager::new(&cfg.output_dir)?;
        ckpt.save_config(cfg)?;
        ckpt.save_adapter_config(&self.lora)?;

        // ── Step 7: Train (Layer 5) ───────────────────────────────────────────
        let model = run_training(cfg, &self.lora, dataset, collator, &ckpt)?;

        Ok(TrainedModel { model, tokenizer, special })
    }
}
