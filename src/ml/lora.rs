// ============================================================
// Layer 5 — Low-Rank Adaptation (LoRA)
// ============================================================
// For a frozen projection W ∈ ℝ^(d_in × d_out) LoRA adds a trainable
// low-rank update:
//
//   y = W x + (α / r) · B(A(dropout(x)))
//
//   A: d_in → r    Kaiming-uniform init
//   B: r → d_out   zero init, so ΔW = B·A = 0 at the start and the
//                  adapted model reproduces the base model exactly
//
// LoraConfig::apply freezes every base parameter of the decoder
// (embeddings, norms, projections, LM head) and attaches one adapter
// to each targeted projection of every block. Only adapter weights
// receive gradients afterwards.
//
// Reference: Hu et al. (2021) LoRA: Low-Rank Adaptation of LLMs

use anyhow::{bail, Result};
use burn::{
    nn::{Dropout, DropoutConfig, Initializer, Linear, LinearConfig},
    prelude::*,
};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::ml::model::{CausalLm, DecoderBlock};

/// Names of the adaptable projections inside one decoder block.
pub const PROJECTION_NAMES: [&str; 7] = [
    "q_proj", "k_proj", "v_proj", "o_proj", "gate_proj", "up_proj", "down_proj",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaskType {
    #[serde(rename = "CAUSAL_LM")]
    CausalLm,
}

/// Adapter specification, persisted as `adapter_config.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoraConfig {
    pub task_type:      TaskType,
    pub target_modules: Vec<String>,
    /// false → adapters are trainable
    pub inference_mode: bool,
    pub r:              usize,
    pub lora_alpha:     f64,
    pub lora_dropout:   f64,
}

impl Default for LoraConfig {
    fn default() -> Self {
        Self {
            task_type:      TaskType::CausalLm,
            target_modules: PROJECTION_NAMES.iter().map(|s| s.to_string()).collect(),
            inference_mode: false,
            r:              8,
            lora_alpha:     32.0,
            lora_dropout:   0.1,
        }
    }
}

impl LoraConfig {
    /// α / r
    pub fn scaling(&self) -> f64 {
        self.lora_alpha / self.r as f64
    }

    pub fn targets(&self, name: &str) -> bool {
        self.target_modules.iter().any(|m| m == name)
    }

    pub fn validate(&self) -> Result<()> {
        if self.r == 0 {
            bail!("LoRA rank must be positive");
        }
        if !(0.0..1.0).contains(&self.lora_dropout) {
            bail!("LoRA dropout must be in [0, 1), got {}", self.lora_dropout);
        }
        if self.target_modules.is_empty() {
            bail!("LoRA needs at least one target module");
        }
        for m in &self.target_modules {
            if !PROJECTION_NAMES.contains(&m.as_str()) {
                bail!("Unknown LoRA target module '{m}' (expected one of {PROJECTION_NAMES:?})");
            }
        }
        Ok(())
    }

    /// Freeze `model` and attach adapters to the targeted projections.
    pub fn apply<B: Backend>(&self, model: CausalLm<B>, device: &B::Device) -> Result<CausalLm<B>> {
        self.validate()?;

        let mut model = model.no_grad();
        model.layers = model
            .layers
            .into_iter()
            .map(|block| self.wrap_block(block, device))
            .collect();

        if self.inference_mode {
            model = model.no_grad();
        }
        Ok(model)
    }

    fn wrap_block<B: Backend>(&self, mut block: DecoderBlock<B>, device: &B::Device) -> DecoderBlock<B> {
        block.attn.q_proj   = self.wrap("q_proj",    block.attn.q_proj,   device);
        block.attn.k_proj   = self.wrap("k_proj",    block.attn.k_proj,   device);
        block.attn.v_proj   = self.wrap("v_proj",    block.attn.v_proj,   device);
        block.attn.o_proj   = self.wrap("o_proj",    block.attn.o_proj,   device);
        block.mlp.gate_proj = self.wrap("gate_proj", block.mlp.gate_proj, device);
        block.mlp.up_proj   = self.wrap("up_proj",   block.mlp.up_proj,   device);
        block.mlp.down_proj = self.wrap("down_proj", block.mlp.down_proj, device);
        block
    }

    fn wrap<B: Backend>(&self, name: &str, proj: Projection<B>, device: &B::Device) -> Projection<B> {
        if self.targets(name) {
            proj.with_adapter(self, device)
        } else {
            proj
        }
    }
}

// ─── Adapter ──────────────────────────────────────────────────────────────────

#[derive(Module, Debug)]
pub struct LoraAdapter<B: Backend> {
    pub lora_a:  Linear<B>,
    pub lora_b:  Linear<B>,
    pub dropout: Dropout,
    pub scaling: f64,
}

impl<B: Backend> LoraAdapter<B> {
    pub fn new(d_in: usize, d_out: usize, cfg: &LoraConfig, device: &B::Device) -> Self {
        let lora_a = LinearConfig::new(d_in, cfg.r)
            .with_bias(false)
            .init(device);
        let lora_b = LinearConfig::new(cfg.r, d_out)
            .with_bias(false)
            .with_initializer(Initializer::Zeros)
            .init(device);
        let dropout = DropoutConfig::new(cfg.lora_dropout).init();
        Self { lora_a, lora_b, dropout, scaling: cfg.scaling() }
    }

    pub fn forward<const D: usize>(&self, x: Tensor<B, D>) -> Tensor<B, D> {
        let x = self.dropout.forward(x);
        self.lora_b.forward(self.lora_a.forward(x)).mul_scalar(self.scaling)
    }
}

// ─── Projection ───────────────────────────────────────────────────────────────
/// A bias-free linear projection that may carry a LoRA adapter.
#[derive(Module, Debug)]
pub struct Projection<B: Backend> {
    pub base:    Linear<B>,
    pub adapter: Option<LoraAdapter<B>>,
}

impl<B: Backend> Projection<B> {
    pub fn new(d_in: usize, d_out: usize, device: &B::Device) -> Self {
        let base = LinearConfig::new(d_in, d_out).with_bias(false).init(device);
        Self { base, adapter: None }
    }

    /// (d_in, d_out)
    pub fn shape(&self) -> (usize, usize) {
        let [d_in, d_out] = self.base.weight.val().dims();
        (d_in, d_out)
    }

    pub fn with_adapter(self, cfg: &LoraConfig, device: &B::Device) -> Self {
        let (d_in, d_out) = self.shape();
        Self { base: self.base, adapter: Some(LoraAdapter::new(d_in, d_out, cfg, device)) }
    }

    pub fn forward<const D: usize>(&self, x: Tensor<B, D>) -> Tensor<B, D> {
        match &self.adapter {
            Some(adapter) => self.base.forward(x.clone()) + adapter.forward(x),
            None          => self.base.forward(x),
        }
    }

    pub fn adapter_params(&self) -> usize {
        self.adapter.as_ref().map(|a| a.num_params()).unwrap_or(0)
    }
}

// ─── Adapter weights ──────────────────────────────────────────────────────────
// The trainable part of an adapted decoder, detached from the frozen base so
// checkpoints carry only what fine-tuning changed.

#[derive(Module, Debug)]
pub struct BlockAdapters<B: Backend> {
    pub q_proj:    Option<LoraAdapter<B>>,
    pub k_proj:    Option<LoraAdapter<B>>,
    pub v_proj:    Option<LoraAdapter<B>>,
    pub o_proj:    Option<LoraAdapter<B>>,
    pub gate_proj: Option<LoraAdapter<B>>,
    pub up_proj:   Option<LoraAdapter<B>>,
    pub down_proj: Option<LoraAdapter<B>>,
}

#[derive(Module, Debug)]
pub struct LoraWeights<B: Backend> {
    pub blocks: Vec<BlockAdapters<B>>,
}

impl<B: Backend> LoraWeights<B> {
    /// Copy the adapters out of `model`, block by block.
    pub fn of(model: &CausalLm<B>) -> Self {
        let blocks = model
            .layers
            .iter()
            .map(|block| BlockAdapters {
                q_proj:    block.attn.q_proj.adapter.clone(),
                k_proj:    block.attn.k_proj.adapter.clone(),
                v_proj:    block.attn.v_proj.adapter.clone(),
                o_proj:    block.attn.o_proj.adapter.clone(),
                gate_proj: block.mlp.gate_proj.adapter.clone(),
                up_proj:   block.mlp.up_proj.adapter.clone(),
                down_proj: block.mlp.down_proj.adapter.clone(),
            })
            .collect();
        Self { blocks }
    }

    pub fn is_empty(&self) -> bool {
        self.num_params() == 0
    }

    /// Put these adapters back onto `model`, leaving its base weights as they are.
    pub fn install(self, mut model: CausalLm<B>) -> Result<CausalLm<B>> {
        if self.blocks.len() != model.layers.len() {
            bail!(
                "Adapter weights cover {} blocks but the model has {}",
                self.blocks.len(),
                model.layers.len()
            );
        }
        for (block, adapters) in model.layers.iter_mut().zip(self.blocks) {
            block.attn.q_proj.adapter   = adapters.q_proj;
            block.attn.k_proj.adapter   = adapters.k_proj;
            block.attn.v_proj.adapter   = adapters.v_proj;
            block.attn.o_proj.adapter   = adapters.o_proj;
            block.mlp.gate_proj.adapter = adapters.gate_proj;
            block.mlp.up_proj.adapter   = adapters.up_proj;
            block.mlp.down_proj.adapter = adapters.down_proj;
        }
        Ok(model)
    }
}

// ─── Parameter report ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParameterReport {
    pub trainable: usize,
    pub total:     usize,
}

impl ParameterReport {
    pub fn of<B: Backend>(model: &CausalLm<B>, cfg: &LoraConfig) -> Self {
        let trainable = if cfg.inference_mode { 0 } else { model.adapter_params() };
        Self { trainable, total: model.num_params() }
    }

    pub fn trainable_percent(&self) -> f64 {
        if self.total == 0 { 0.0 } else { 100.0 * self.trainable as f64 / self.total as f64 }
    }
}

impl fmt::Display for ParameterReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "trainable params: {} || all params: {} || trainable%: {:.4}",
            self.trainable,
            self.total,
            self.trainable_percent()
        )
    }
}
