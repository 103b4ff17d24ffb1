// ============================================================
// Layer 5 — Decoder Language Model
// ============================================================
// Pre-norm decoder-only transformer with a causal LM head.
//
//   x = embed_tokens(ids) + embed_positions(0..seq_len)
//   for each block:
//     x = x + attn(rms_norm(x))      causal + key-padding mask
//     x = x + mlp(rms_norm(x))       down(silu(gate(x)) * up(x))
//   logits = lm_head(rms_norm(x))
//
// Every block projection is a lora::Projection, so adapters attach
// without touching this file.
//
// Reference: Burn Book §3 (Building Blocks)

use burn::{
    nn::{
        attention::generate_autoregressive_mask,
        Embedding, EmbeddingConfig,
        Linear, LinearConfig,
        RmsNorm, RmsNormConfig,
    },
    prelude::*,
    tensor::activation::{log_softmax, silu, softmax},
};

use crate::domain::example::IGNORE_INDEX;
use crate::ml::lora::Projection;

const MASK_VALUE: f32 = -1.0e9;

// NOTE: #[derive(Config)] already generates Clone and Serialize/Deserialize
// internally — do NOT add them again or you get conflicting impls.
#[derive(Config, Debug)]
pub struct CausalLmConfig {
    pub vocab_size:              usize,
    pub hidden_size:             usize,
    pub intermediate_size:       usize,
    pub num_hidden_layers:       usize,
    pub num_attention_heads:     usize,
    pub max_position_embeddings: usize,
    #[config(default = 1e-5)]
    pub rms_norm_eps:            f64,
}

impl CausalLmConfig {
    pub fn head_dim(&self) -> usize {
        self.hidden_size / self.num_attention_heads
    }

    pub fn check(&self) -> anyhow::Result<()> {
        if self.num_attention_heads == 0 || self.hidden_size % self.num_attention_heads != 0 {
            anyhow::bail!(
                "hidden_size ({}) must be divisible by num_attention_heads ({})",
                self.hidden_size,
                self.num_attention_heads
            );
        }
        Ok(())
    }

    pub fn init<B: Backend>(&self, device: &B::Device) -> CausalLm<B> {
        let embed_tokens    = EmbeddingConfig::new(self.vocab_size, self.hidden_size).init(device);
        let embed_positions = EmbeddingConfig::new(self.max_position_embeddings, self.hidden_size).init(device);
        let layers: Vec<DecoderBlock<B>> = (0..self.num_hidden_layers)
            .map(|_| self.build_block(device))
            .collect();
        let norm    = RmsNormConfig::new(self.hidden_size).with_epsilon(self.rms_norm_eps).init(device);
        let lm_head = LinearConfig::new(self.hidden_size, self.vocab_size).with_bias(false).init(device);
        CausalLm {
            embed_tokens, embed_positions, layers, norm, lm_head,
            num_heads: self.num_attention_heads,
            max_position_embeddings: self.max_position_embeddings,
        }
    }

    fn build_block<B: Backend>(&self, device: &B::Device) -> DecoderBlock<B> {
        let (h, i) = (self.hidden_size, self.intermediate_size);
        let attn = Attention {
            q_proj: Projection::new(h, h, device),
            k_proj: Projection::new(h, h, device),
            v_proj: Projection::new(h, h, device),
            o_proj: Projection::new(h, h, device),
            num_heads: self.num_attention_heads,
            head_dim:  self.head_dim(),
        };
        let mlp = Mlp {
            gate_proj: Projection::new(h, i, device),
            up_proj:   Projection::new(h, i, device),
            down_proj: Projection::new(i, h, device),
        };
        let input_norm          = RmsNormConfig::new(h).with_epsilon(self.rms_norm_eps).init(device);
        let post_attention_norm = RmsNormConfig::new(h).with_epsilon(self.rms_norm_eps).init(device);
        DecoderBlock { input_norm, attn, post_attention_norm, mlp }
    }
}

#[derive(Module, Debug)]
pub struct Attention<B: Backend> {
    pub q_proj:    Projection<B>,
    pub k_proj:    Projection<B>,
    pub v_proj:    Projection<B>,
    pub o_proj:    Projection<B>,
    pub num_heads: usize,
    pub head_dim:  usize,
}

impl<B: Backend> Attention<B> {
    /// x: [batch, seq, hidden], mask: [batch, heads, seq, seq] (true = blocked)
    pub fn forward(&self, x: Tensor<B, 3>, mask: Tensor<B, 4, Bool>) -> Tensor<B, 3> {
        let [batch, seq_len, _] = x.dims();
        let split = |t: Tensor<B, 3>| {
            t.reshape([batch, seq_len, self.num_heads, self.head_dim]).swap_dims(1, 2)
        };

        let q = split(self.q_proj.forward(x.clone()));
        let k = split(self.k_proj.forward(x.clone()));
        let v = split(self.v_proj.forward(x));

        let scores = q
            .matmul(k.transpose())
            .div_scalar((self.head_dim as f64).sqrt())
            .mask_fill(mask, MASK_VALUE);
        let weights = softmax(scores, 3);

        let context = weights
            .matmul(v)
            .swap_dims(1, 2)
            .reshape([batch, seq_len, self.num_heads * self.head_dim]);
        self.o_proj.forward(context)
    }
}

#[derive(Module, Debug)]
pub struct Mlp<B: Backend> {
    pub gate_proj: Projection<B>,
    pub up_proj:   Projection<B>,
    pub down_proj: Projection<B>,
}

impl<B: Backend> Mlp<B> {
    pub fn forward(&self, x: Tensor<B, 3>) -> Tensor<B, 3> {
        let gate = silu(self.gate_proj.forward(x.clone()));
        self.down_proj.forward(gate * self.up_proj.forward(x))
    }
}

#[derive(Module, Debug)]
pub struct DecoderBlock<B: Backend> {
    pub input_norm:          RmsNorm<B>,
    pub attn:                Attention<B>,
    pub post_attention_norm: RmsNorm<B>,
    pub mlp:                 Mlp<B>,
}

impl<B: Backend> DecoderBlock<B> {
    pub fn forward(&self, x: Tensor<B, 3>, mask: Tensor<B, 4, Bool>) -> Tensor<B, 3> {
        let h = x.clone() + self.attn.forward(self.input_norm.forward(x), mask);
        h.clone() + self.mlp.forward(self.post_attention_norm.forward(h))
    }

    pub fn projections(&self) -> [&Projection<B>; 7] {
        [
            &self.attn.q_proj, &self.attn.k_proj, &self.attn.v_proj, &self.attn.o_proj,
            &self.mlp.gate_proj, &self.mlp.up_proj, &self.mlp.down_proj,
        ]
    }
}

/// Pre-norm decoder-only language model.
#[derive(Module, Debug)]
pub struct CausalLm<B: Backend> {
    pub embed_tokens:            Embedding<B>,
    pub embed_positions:         Embedding<B>,
    pub layers:                  Vec<DecoderBlock<B>>,
    pub norm:                    RmsNorm<B>,
    pub lm_head:                 Linear<B>,
    pub num_heads:               usize,
    pub max_position_embeddings: usize,
}

impl<B: Backend> CausalLm<B> {
    /// input_ids, attention_mask: [batch, seq] → logits: [batch, seq, vocab]
    pub fn forward(&self, input_ids: Tensor<B, 2, Int>, attention_mask: Tensor<B, 2, Int>) -> Tensor<B, 3> {
        let [batch_size, seq_len] = input_ids.dims();
        let device = input_ids.device();

        let tok_emb = self.embed_tokens.forward(input_ids);
        let positions = Tensor::<B, 1, Int>::arange(0..seq_len as i64, &device)
            .unsqueeze::<2>()
            .expand([batch_size, seq_len]);
        let pos_emb = self.embed_positions.forward(positions);

        let mask = self.attention_mask(attention_mask, &device);

        let mut x = tok_emb + pos_emb;
        for layer in &self.layers {
            x = layer.forward(x, mask.clone());
        }
        self.lm_head.forward(self.norm.forward(x))
    }

    pub fn forward_loss(
        &self,
        input_ids:      Tensor<B, 2, Int>,
        attention_mask: Tensor<B, 2, Int>,
        labels:         Tensor<B, 2, Int>,
    ) -> Tensor<B, 1> {
        let logits = self.forward(input_ids, attention_mask);
        masked_causal_lm_loss(logits, labels)
    }

    /// Parameters held by LoRA adapters across all blocks
    pub fn adapter_params(&self) -> usize {
        self.layers
            .iter()
            .flat_map(|block| block.projections())
            .map(Projection::adapter_params)
            .sum()
    }

    /// Causal mask merged with the key-padding mask: [batch, heads, seq, seq]
    fn attention_mask(&self, attention_mask: Tensor<B, 2, Int>, device: &B::Device) -> Tensor<B, 4, Bool> {
        let [batch_size, seq_len] = attention_mask.dims();
        let causal  = generate_autoregressive_mask::<B>(batch_size, seq_len, device).int();
        let padding = attention_mask
            .equal_elem(0)
            .int()
            .reshape([batch_size, 1, seq_len])
            .expand([batch_size, seq_len, seq_len]);
        (causal + padding)
            .greater_elem(0)
            .reshape([batch_size, 1, seq_len, seq_len])
            .expand([batch_size, self.num_heads, seq_len, seq_len])
    }
}

/// Mean next-token cross-entropy over positions whose label is not
/// [`IGNORE_INDEX`]. Logits at step t are scored against label t+1.
/// With no scored position the loss is zero.
pub fn masked_causal_lm_loss<B: Backend>(logits: Tensor<B, 3>, labels: Tensor<B, 2, Int>) -> Tensor<B, 1> {
    let [batch_size, seq_len, vocab] = logits.dims();
    if seq_len < 2 {
        return logits.sum().mul_scalar(0.0);
    }
    let steps = seq_len - 1;

    let logits  = logits.slice([0..batch_size, 0..steps, 0..vocab]);
    let targets = labels.slice([0..batch_size, 1..seq_len]);

    let mask   = targets.clone().not_equal_elem(IGNORE_INDEX).float();
    let safe   = targets.clamp_min(0).reshape([batch_size, steps, 1]);
    let picked = log_softmax(logits, 2)
        .gather(2, safe)
        .reshape([batch_size, steps]);

    let total = (picked * mask.clone()).sum().neg();
    let count = mask.sum().clamp_min(1.0);
    total / count
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::tensor::TensorData;
    use burn::backend::NdArray;

    type TestBackend = NdArray;

    fn int2(values: Vec<i64>, shape: [usize; 2]) -> Tensor<TestBackend, 2, Int> {
        Tensor::from_data(TensorData::new(values, shape), &Default::default())
    }

    #[test]
    fn test_forward_shape() {
        let device = Default::default();
        let model: CausalLm<TestBackend> = CausalLmConfig::new(32, 16, 32, 2, 4, 64).init(&device);
        let logits = model.forward(
            int2(vec![1, 2, 3, 4, 5, 6, 0, 0], [2, 4]),
            int2(vec![1, 1, 1, 1, 1, 1, 0, 0], [2, 4]),
        );
        assert_eq!(logits.dims(), [2, 4, 32]);
        assert!(logits.into_data().iter::<f32>().all(f32::is_finite));
    }

    #[test]
    fn test_padding_does_not_change_real_positions() {
        let device = Default::default();
        let model: CausalLm<TestBackend> = CausalLmConfig::new(32, 16, 32, 1, 2, 64).init(&device);

        let short: Vec<f32> = model
            .forward(int2(vec![4, 7], [1, 2]), int2(vec![1, 1], [1, 2]))
            .into_data().iter::<f32>().collect();
        let padded: Vec<f32> = model
            .forward(int2(vec![4, 7, 0], [1, 3]), int2(vec![1, 1, 0], [1, 3]))
            .into_data().iter::<f32>().collect();

        for (a, b) in short.iter().zip(&padded[..short.len()]) {
            assert!((a - b).abs() < 1e-4);
        }
    }

    #[test]
    fn test_loss_scores_only_unmasked_targets() {
        let device = Default::default();
        let logits = Tensor::<TestBackend, 3>::zeros([1, 3, 4], &device);
        // logits 0,1 predict labels 1,2 → only label 1 (= 2) is scored
        let loss = masked_causal_lm_loss(logits, int2(vec![-100, 2, -100], [1, 3]));
        let value: f32 = loss.into_scalar().elem();
        assert!((value - 4f32.ln()).abs() < 1e-5);
    }

    #[test]
    fn test_loss_is_zero_without_scored_positions() {
        let device = Default::default();
        let logits = Tensor::<TestBackend, 3>::ones([1, 3, 4], &device);
        let loss = masked_causal_lm_loss(logits, int2(vec![-100, -100, -100], [1, 3]));
        let value: f32 = loss.into_scalar().elem();
        assert_eq!(value, 0.0);
    }

    #[test]
    fn test_config_check() {
        assert!(CausalLmConfig::new(32, 16, 32, 1, 3, 64).check().is_err());
        assert!(CausalLmConfig::new(32, 16, 32, 1, 4, 64).check().is_ok());
    }
}
