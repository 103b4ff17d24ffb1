// ============================================================
// Layer 5 — Training Loop
// ============================================================
// Supervised fine-tuning of the LoRA-adapted decoder with Burn's
// DataLoader, gradient accumulation and AdamW.
//
//   for each epoch:
//     for each batch:
//       loss  = masked causal-LM cross-entropy / accumulation steps
//       grads = backward(loss)            (adapter params only)
//       accumulate(grads)
//       every `gradient_accumulation_steps` batches (and once more for
//       a trailing partial window):
//         θ = AdamW(θ, grads, lr_k),  lr_k = lr · (1 − k / total_steps)
//     save checkpoint-{epoch}, append metrics row
//
// Key Burn 0.20 insight:
//   - Training runs on Autodiff<Wgpu>; with gradient checkpointing the
//     autodiff graph uses BalancedCheckpointing, which recomputes cheap
//     activations during backward instead of keeping them
//   - model.valid() returns the model on the inner Wgpu backend for
//     generation
//
// Reference: Burn Book §5, Loshchilov & Hutter (2019) AdamW

use anyhow::{bail, Result};
use burn::{
    backend::{
        autodiff::checkpoint::strategy::BalancedCheckpointing,
        wgpu::WgpuDevice,
        Autodiff, Wgpu,
    },
    data::{dataloader::DataLoaderBuilder, dataset::Dataset},
    module::AutodiffModule,
    optim::{
        grad_clipping::GradientClippingConfig,
        AdamWConfig, GradientsAccumulator, GradientsParams, Optimizer,
    },
    prelude::*,
    tensor::backend::AutodiffBackend,
};

use crate::application::train_use_case::TrainConfig;
use crate::data::{batcher::SftCollator, dataset::SftDataset};
use crate::infra::{
    checkpoint::{load_base_model, CheckpointManager},
    metrics::{EpochMetrics, MetricsLogger},
};
use crate::ml::lora::{LoraConfig, ParameterReport};
use crate::ml::model::CausalLm;

const MAX_GRAD_NORM: f32 = 1.0;

/// Load the base model, attach adapters and train on the WGPU device.
/// Returns the tuned model on the inference backend.
pub fn run_training(
    cfg:      &TrainConfig,
    lora:     &LoraConfig,
    dataset:  SftDataset,
    collator: SftCollator,
    ckpt:     &CheckpointManager,
) -> Result<CausalLm<Wgpu>> {
    let device = WgpuDevice::default();
    tracing::info!("Using WGPU device: {:?}", device);

    if cfg.gradient_checkpointing {
        tracing::info!("Gradient checkpointing enabled");
        fit::<Autodiff<Wgpu, BalancedCheckpointing>>(cfg, lora, dataset, collator, ckpt, &device)
    } else {
        fit::<Autodiff<Wgpu>>(cfg, lora, dataset, collator, ckpt, &device)
    }
}

fn fit<B: AutodiffBackend<InnerBackend = Wgpu>>(
    cfg:      &TrainConfig,
    lora:     &LoraConfig,
    dataset:  SftDataset,
    collator: SftCollator,
    ckpt:     &CheckpointManager,
    device:   &B::Device,
) -> Result<CausalLm<Wgpu>> {
    let (_, base) = load_base_model::<B>(&cfg.base_model_dir, device)?;
    let model = lora.apply(base, device)?;

    let report = ParameterReport::of(&model, lora);
    println!("{report}");
    tracing::info!("{report}");

    let model = train_loop(cfg, model, dataset, collator, ckpt, device)?;
    Ok(model.valid())
}

/// lr · (1 − step / total), never below zero
pub fn linear_lr(base: f64, step: usize, total_steps: usize) -> f64 {
    if total_steps == 0 {
        return base;
    }
    base * (1.0 - step as f64 / total_steps as f64).max(0.0)
}

/// Optimizer updates per epoch: ⌈⌈samples / batch⌉ / accumulation⌉
pub fn steps_per_epoch(samples: usize, batch_size: usize, accumulation: usize) -> usize {
    samples.div_ceil(batch_size).div_ceil(accumulation)
}

pub fn train_loop<B: AutodiffBackend>(
    cfg:      &TrainConfig,
    mut model: CausalLm<B>,
    dataset:  SftDataset,
    collator: SftCollator,
    ckpt:     &CheckpointManager,
    device:   &B::Device,
) -> Result<CausalLm<B>> {
    if cfg.batch_size == 0 || cfg.gradient_accumulation_steps == 0 {
        bail!("batch_size and gradient_accumulation_steps must be positive");
    }
    if dataset.is_empty() {
        bail!("Training set is empty");
    }

    let accumulation = cfg.gradient_accumulation_steps;
    let total_steps  = steps_per_epoch(dataset.len(), cfg.batch_size, accumulation) * cfg.epochs;
    tracing::info!(
        "Training on {} examples ({} scored tokens), {} optimizer steps over {} epochs",
        dataset.len(),
        dataset.scored_tokens(),
        total_steps,
        cfg.epochs
    );

    // ── AdamW optimiser ───────────────────────────────────────────────────────
    // Only adapter parameters carry gradients; the base model is frozen.
    let mut optim = AdamWConfig::new()
        .with_weight_decay(0.0)
        .with_grad_clipping(Some(GradientClippingConfig::Norm(MAX_GRAD_NORM)))
        .init::<B, CausalLm<B>>();

    let loader = DataLoaderBuilder::new(collator)
        .batch_size(cfg.batch_size)
        .shuffle(cfg.seed)
        .num_workers(1)
        .set_device(device.clone())
        .build(dataset);

    let metrics = MetricsLogger::new(ckpt.dir())?;
    tracing::info!("Epoch metrics → '{}'", metrics.csv_path().display());
    let mut accumulator = GradientsAccumulator::new();
    let mut step        = 0usize;
    let mut lr          = cfg.lr;

    // ── Epoch loop ────────────────────────────────────────────────────────────
    for epoch in 1..=cfg.epochs {
        let mut loss_sum   = 0.0f64;
        let mut batches    = 0usize;
        let mut window     = 0usize;
        let mut logged_sum = 0.0f64;
        let mut logged_n   = 0usize;

        for batch in loader.iter() {
            let loss = model.forward_loss(batch.input_ids, batch.attention_mask, batch.labels);

            let loss_val: f64 = loss.clone().into_scalar().elem::<f64>();
            loss_sum   += loss_val;
            logged_sum += loss_val;
            batches    += 1;
            logged_n   += 1;

            let grads = loss.div_scalar(accumulation as f64).backward();
            let grads = GradientsParams::from_grads(grads, &model);
            accumulator.accumulate(&model, grads);
            window += 1;

            if window == accumulation {
                lr     = linear_lr(cfg.lr, step, total_steps);
                model  = optim.step(lr, model, accumulator.grads());
                step  += 1;
                window = 0;

                if cfg.logging_steps > 0 && step % cfg.logging_steps == 0 {
                    tracing::info!(
                        "step {:>5}/{} | loss={:.4} | lr={:.2e}",
                        step,
                        total_steps,
                        logged_sum / logged_n as f64,
                        lr
                    );
                    logged_sum = 0.0;
                    logged_n   = 0;
                }
            }
        }

        // trailing partial window
        if window > 0 {
            lr     = linear_lr(cfg.lr, step, total_steps);
            model  = optim.step(lr, model, accumulator.grads());
            step  += 1;
        }

        let avg_loss = if batches > 0 { loss_sum / batches as f64 } else { f64::NAN };
        println!(
            "Epoch {:>3}/{} | train_loss={:.4} | steps={} | lr={:.2e}",
            epoch, cfg.epochs, avg_loss, step, lr,
        );

        ckpt.save_model(&model, epoch)?;
        metrics.log(&EpochMetrics::new(epoch, avg_loss, step, lr))?;
        tracing::info!("Checkpoint saved for epoch {}", epoch);
    }

    tracing::info!("Training complete!");
    Ok(model)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::example::{EncodedExample, IGNORE_INDEX};
    use crate::ml::model::CausalLmConfig;
    use burn::backend::NdArray;
    use std::fs;

    type TestBackend = Autodiff<NdArray>;

    fn example(prompt: &[u32], answer: &[u32]) -> EncodedExample {
        let mut input_ids = prompt.to_vec();
        input_ids.extend_from_slice(answer);
        let mut labels = vec![IGNORE_INDEX; prompt.len()];
        labels.extend(answer.iter().map(|&t| t as i64));
        EncodedExample {
            attention_mask: vec![1; input_ids.len()],
            input_ids,
            labels,
        }
    }

    fn weights(t: Tensor<TestBackend, 2>) -> Vec<f32> {
        t.into_data().iter::<f32>().collect()
    }

    #[test]
    fn test_linear_lr_decays_to_zero() {
        assert_eq!(linear_lr(1e-4, 0, 10), 1e-4);
        assert!((linear_lr(1e-4, 5, 10) - 5e-5).abs() < 1e-12);
        assert_eq!(linear_lr(1e-4, 10, 10), 0.0);
        assert_eq!(linear_lr(1e-4, 12, 10), 0.0);
    }

    #[test]
    fn test_steps_per_epoch_counts_partial_window() {
        assert_eq!(steps_per_epoch(16, 1, 8), 2);
        assert_eq!(steps_per_epoch(17, 1, 8), 3);
        assert_eq!(steps_per_epoch(5, 2, 8), 1);
    }

    #[test]
    fn test_training_updates_adapters_only_and_checkpoints_each_epoch() {
        let dir    = tempfile::tempdir().unwrap();
        let device = Default::default();
        let ckpt   = CheckpointManager::new(dir.path()).unwrap();

        let base: CausalLm<TestBackend> = CausalLmConfig::new(16, 8, 16, 1, 2, 32).init(&device);
        let model = LoraConfig::default().apply(base, &device).unwrap();
        let base_before = weights(model.layers[0].attn.q_proj.base.weight.val());

        let dataset = SftDataset::new(vec![
            example(&[1, 4, 5], &[6, 0]),
            example(&[1, 4, 7, 8], &[9, 0]),
            example(&[1, 5], &[10, 11, 0]),
        ]);
        let cfg = TrainConfig {
            epochs: 2,
            gradient_accumulation_steps: 2,
            lr: 1e-2,
            output_dir: dir.path().display().to_string(),
            ..Default::default()
        };

        let trained = train_loop(&cfg, model, dataset, SftCollator::new(0), &ckpt, &device).unwrap();

        let base_after = weights(trained.layers[0].attn.q_proj.base.weight.val());
        assert_eq!(base_before, base_after);

        let adapter = trained.layers[0].attn.q_proj.adapter.as_ref().unwrap();
        assert!(weights(adapter.lora_b.weight.val()).iter().any(|&w| w != 0.0));

        assert!(ckpt.epoch_dir(1).exists());
        assert!(ckpt.epoch_dir(2).exists());
        assert_eq!(ckpt.latest_epoch().unwrap(), 2);

        // 3 samples, accumulation 2 → 2 steps per epoch
        let csv = fs::read_to_string(dir.path().join("metrics.csv")).unwrap();
        let rows: Vec<&str> = csv.lines().collect();
        assert_eq!(rows.len(), 3);
        assert!(rows[1].starts_with("1,"));
        assert!(rows[2].starts_with("2,"));
        assert_eq!(rows[2].split(',').nth(2), Some("4"));
    }

    #[test]
    fn test_empty_dataset_is_rejected() {
        let dir    = tempfile::tempdir().unwrap();
        let device = Default::default();
        let ckpt   = CheckpointManager::new(dir.path()).unwrap();
        let model: CausalLm<TestBackend> = CausalLmConfig::new(16, 8, 16, 1, 2, 32).init(&device);

        let result = train_loop(
            &TrainConfig::default(), model, SftDataset::new(vec![]), SftCollator::new(0), &ckpt, &device,
        );
        assert!(result.is_err());
    }
}
