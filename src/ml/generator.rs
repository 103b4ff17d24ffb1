// ============================================================
// Layer 5 — Generator
// ============================================================
// Autoregressive decoding with the (adapted) decoder:
//
//   ids = tokenize(ChatML prompt with open assistant turn)
//   repeat up to max_new_tokens:
//     logits = model(last max_position_embeddings ids)[-1]
//     next   = sample(softmax(logits / T))      (argmax when T = 0)
//     stop if next is an end-of-sequence id
//     ids.push(next)
//   return decode(new ids, skip special tokens)
//
// There is no KV cache; every step re-runs the full window.
//
// Reference: Holtzman et al. (2020) for temperature sampling

use anyhow::{Context, Result};
use burn::prelude::*;
use burn::tensor::TensorData;
use rand::{distributions::WeightedIndex, prelude::*, rngs::StdRng};
use tokenizers::Tokenizer;

use crate::domain::chat::{ChatMessage, ChatTemplate};
use crate::domain::traits::Completer;
use crate::infra::{
    checkpoint::{load_base_model, CheckpointManager},
    tokenizer_store::{SpecialTokens, TokenizerStore},
};
use crate::ml::lora::LoraConfig;
use crate::ml::model::CausalLm;

#[derive(Debug, Clone, PartialEq)]
pub struct GenerationConfig {
    pub max_new_tokens: usize,
    /// 0 → greedy decoding
    pub temperature:    f64,
    pub seed:           u64,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self { max_new_tokens: 512, temperature: 0.2, seed: 42 }
    }
}

/// Pick the next token id from one row of logits.
pub fn sample_next(logits: &[f32], temperature: f64, rng: &mut StdRng) -> Result<u32> {
    if logits.is_empty() {
        anyhow::bail!("Cannot sample from empty logits");
    }

    if temperature <= 0.0 {
        let (best, _) = logits
            .iter()
            .enumerate()
            .fold((0, f32::NEG_INFINITY), |acc, (i, &l)| if l > acc.1 { (i, l) } else { acc });
        return Ok(best as u32);
    }

    // numerically stable softmax(logits / T)
    let max = logits.iter().copied().fold(f32::NEG_INFINITY, f32::max) as f64;
    let weights: Vec<f64> = logits
        .iter()
        .map(|&l| ((l as f64 - max) / temperature).exp())
        .collect();

    let dist = WeightedIndex::new(&weights).context("Degenerate next-token distribution")?;
    Ok(dist.sample(rng) as u32)
}

pub struct Generator<B: Backend> {
    model:     CausalLm<B>,
    tokenizer: Tokenizer,
    special:   SpecialTokens,
    device:    B::Device,
    config:    GenerationConfig,
    rng:       StdRng,
}

impl<B: Backend> Generator<B> {
    pub fn new(
        model:     CausalLm<B>,
        tokenizer: Tokenizer,
        special:   SpecialTokens,
        device:    B::Device,
        config:    GenerationConfig,
    ) -> Self {
        let rng = StdRng::seed_from_u64(config.seed);
        Self { model, tokenizer, special, device, config, rng }
    }

    /// Rebuild the adapted model from the newest checkpoint under `ckpt`.
    pub fn from_checkpoint(ckpt: &CheckpointManager, config: GenerationConfig, device: B::Device) -> Result<Self> {
        let train_cfg = ckpt.load_config()?;
        let lora = LoraConfig { inference_mode: true, ..ckpt.load_adapter_config()? };

        let (_, base) = load_base_model::<B>(&train_cfg.base_model_dir, &device)?;
        let model = lora.apply(base, &device)?;
        let model = ckpt.load_latest(model, &device)?;

        let tokenizer = TokenizerStore::new(&train_cfg.base_model_dir).load()?;
        let special   = SpecialTokens::resolve(&tokenizer, &train_cfg.pad_token, &train_cfg.eos_tokens)?;

        tracing::info!("Adapted model restored from '{}'", ckpt.dir().display());
        Ok(Self::new(model, tokenizer, special, device, config))
    }

    /// Continue `prompt_ids`; returns only the new ids, end marker excluded.
    pub fn generate_ids(&mut self, prompt_ids: &[u32]) -> Result<Vec<u32>> {
        let window = self.model.max_position_embeddings;
        let mut ids: Vec<u32> = prompt_ids.to_vec();
        let mut generated     = Vec::new();

        if ids.len() > window {
            tracing::warn!(
                "Prompt has {} tokens; conditioning on the last {}",
                ids.len(),
                window
            );
        }

        for _ in 0..self.config.max_new_tokens {
            let context = &ids[ids.len().saturating_sub(window)..];
            let logits  = self.last_logits(context);
            let next    = sample_next(&logits, self.config.temperature, &mut self.rng)?;

            if self.special.eos_ids.contains(&next) {
                break;
            }
            ids.push(next);
            generated.push(next);
        }

        Ok(generated)
    }

    fn last_logits(&self, context: &[u32]) -> Vec<f32> {
        let seq_len = context.len();
        let values: Vec<i64> = context.iter().map(|&t| t as i64).collect();
        let input_ids = Tensor::<B, 2, Int>::from_data(TensorData::new(values, [1, seq_len]), &self.device);
        let mask      = Tensor::<B, 2, Int>::ones([1, seq_len], &self.device);

        let logits = self.model.forward(input_ids, mask);
        let [_, _, vocab] = logits.dims();
        logits
            .slice([0..1, seq_len - 1..seq_len, 0..vocab])
            .reshape([vocab])
            .into_data()
            .iter::<f32>()
            .collect()
    }
}

impl<B: Backend> Completer for Generator<B> {
    fn complete(&mut self, messages: &[ChatMessage]) -> Result<String> {
        let prompt = ChatTemplate::render(messages, true);
        let enc = self
            .tokenizer
            .encode(prompt.as_str(), false)
            .map_err(|e| anyhow::anyhow!("Tokenisation error: {e}"))?;
        if enc.get_ids().is_empty() {
            anyhow::bail!("Prompt tokenised to nothing");
        }

        let new_ids = self.generate_ids(enc.get_ids())?;
        tracing::debug!("Generated {} tokens", new_ids.len());

        self.tokenizer
            .decode(&new_ids, true)
            .map_err(|e| anyhow::anyhow!("Decoding error: {e}"))
    }
}
