// ============================================================
// Layer 5 — ML / Model Layer (Burn)
// ============================================================
// Model, adapter, training and generation code written against
// the Burn framework.
//
// What's in this layer:
//
//   model.rs     — Pre-norm decoder-only language model
//                  • Token + learned positional embeddings
//                  • Causal multi-head self-attention
//                  • SiLU-gated MLP
//                  • RMS normalisation, residual connections
//                  • Masked next-token cross-entropy
//
//   lora.rs      — Low-rank adapters on the seven block projections
//                  (q, k, v, o, gate, up, down) over a frozen base
//
//   trainer.rs   — The fine-tuning loop
//                  Gradient accumulation, AdamW with clipping,
//                  linear learning-rate decay, per-epoch checkpoints
//
//   generator.rs — Autoregressive decoding
//                  Temperature sampling, end-of-sequence stop,
//                  restore from the latest checkpoint
//
// Reference: Burn Book §3 (Building Blocks)
//            Burn Book §5 (Training)
//            Hu et al. (2021) LoRA

/// Decoder-only causal language model
pub mod model;

/// LoRA configuration, adapters and parameter report
pub mod lora;

/// Training loop with gradient accumulation and checkpointing
pub mod trainer;

/// Text generation with the adapted model
pub mod generator;
