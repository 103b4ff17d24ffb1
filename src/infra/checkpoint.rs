// ============================================================
// Layer 6 — Checkpoint Manager
// ============================================================
// Saves and restores weights with Burn's NamedMpkFileRecorder at
// full precision, so a restored model matches the trained one bit for bit.
//
// Base model directory (read-only input):
//   {base_model_dir}/
//     config.json        ← CausalLmConfig
//     tokenizer.json     ← HuggingFace tokenizer
//     model.mpk          ← base decoder record (full precision)
//
// Output root (one sub-directory per epoch):
//   output/phi3_train-dev20/
//     checkpoint-1/adapter.mpk ← LoRA weights after epoch 1
//     checkpoint-2/adapter.mpk
//     ...
//     latest_epoch.json        ← number of the newest checkpoint
//     train_config.json        ← TrainConfig of the run
//     adapter_config.json      ← LoraConfig of the run
//     metrics.csv              ← see metrics.rs
//
// A checkpoint holds only the LoraWeights record. Reloading builds the
// base from base_model_dir, attaches adapters with the saved LoraConfig
// and then swaps in the recorded adapter weights; the base is never
// overwritten.
//
// Reference: Burn Book §5 (Records and Checkpointing)

use anyhow::{bail, Context, Result};
use std::{fs, path::{Path, PathBuf}};
use burn::{
    prelude::*,
    record::{FullPrecisionSettings, NamedMpkFileRecorder, Recorder},
};

use crate::application::train_use_case::TrainConfig;
use crate::ml::lora::{LoraConfig, LoraWeights};
use crate::ml::model::{CausalLm, CausalLmConfig};

type WeightRecorder = NamedMpkFileRecorder<FullPrecisionSettings>;

/// Read `{dir}/config.json` without touching the weights.
pub fn load_model_config(dir: impl AsRef<Path>) -> Result<CausalLmConfig> {
    let cfg_path = dir.as_ref().join("config.json");
    let cfg = CausalLmConfig::load(&cfg_path)
        .map_err(|e| anyhow::anyhow!("Cannot read model config '{}': {e:?}", cfg_path.display()))?;
    cfg.check()?;
    Ok(cfg)
}

/// Load the base decoder's architecture and weights from `dir`.
pub fn load_base_model<B: Backend>(
    dir:    impl AsRef<Path>,
    device: &B::Device,
) -> Result<(CausalLmConfig, CausalLm<B>)> {
    let dir = dir.as_ref();
    let cfg = load_model_config(dir)?;

    let weights = dir.join("model");
    let record = WeightRecorder::new()
        .load(weights.clone(), device)
        .with_context(|| format!("Cannot load base weights '{}'", weights.display()))?;

    let model = cfg.init::<B>(device).load_record(record);
    tracing::info!(
        "Base model loaded from '{}' ({} layers, hidden {}, vocab {})",
        dir.display(),
        cfg.num_hidden_layers,
        cfg.hidden_size,
        cfg.vocab_size
    );
    Ok((cfg, model))
}

/// Manages saving and loading of fine-tuning checkpoints.
pub struct CheckpointManager {
    dir: PathBuf,
}

impl CheckpointManager {
    /// Create the manager, creating the output root if needed.
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)
            .with_context(|| format!("Cannot create output directory '{}'", dir.display()))?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn epoch_dir(&self, epoch: usize) -> PathBuf {
        self.dir.join(format!("checkpoint-{epoch}"))
    }

    /// Save the adapter weights of `model` after `epoch` and advance the
    /// latest pointer.
    pub fn save_model<B: Backend>(&self, model: &CausalLm<B>, epoch: usize) -> Result<()> {
        let weights = LoraWeights::of(model);
        if weights.is_empty() {
            bail!("Model carries no LoRA adapters, nothing to checkpoint");
        }

        let epoch_dir = self.epoch_dir(epoch);
        fs::create_dir_all(&epoch_dir)
            .with_context(|| format!("Cannot create '{}'", epoch_dir.display()))?;

        // Recorder appends the file extension
        let path = epoch_dir.join("adapter");
        WeightRecorder::new()
            .record(weights.into_record(), path.clone())
            .with_context(|| {
                format!("Failed to save checkpoint to '{}'", path.display())
            })?;

        let latest_path = self.dir.join("latest_epoch.json");
        fs::write(&latest_path, serde_json::to_string(&epoch)?)
            .with_context(|| "Failed to write latest_epoch.json")?;

        tracing::debug!("Saved checkpoint: epoch {}", epoch);
        Ok(())
    }

    /// Restore adapter weights from the newest checkpoint into `model`,
    /// which must already carry the same adapters.
    pub fn load_latest<B: Backend>(&self, model: CausalLm<B>, device: &B::Device) -> Result<CausalLm<B>> {
        let epoch = self.latest_epoch()?;
        let path  = self.epoch_dir(epoch).join("adapter");

        tracing::info!("Loading checkpoint from epoch {}", epoch);

        let record = WeightRecorder::new()
            .load(path.clone(), device)
            .with_context(|| {
                format!("Cannot load checkpoint '{}'. Have you trained the model first?",
                    path.display())
            })?;

        LoraWeights::of(&model).load_record(record).install(model)
    }

    pub fn save_config(&self, cfg: &TrainConfig) -> Result<()> {
        self.write_json("train_config.json", cfg)
    }

    pub fn load_config(&self) -> Result<TrainConfig> {
        self.read_json("train_config.json")
    }

    pub fn save_adapter_config(&self, cfg: &LoraConfig) -> Result<()> {
        self.write_json("adapter_config.json", cfg)
    }

    pub fn load_adapter_config(&self) -> Result<LoraConfig> {
        self.read_json("adapter_config.json")
    }

    /// Read latest_epoch.json and return the epoch number.
    pub fn latest_epoch(&self) -> Result<usize> {
        let path = self.dir.join("latest_epoch.json");

        let s = fs::read_to_string(&path)
            .with_context(|| format!(
                "Cannot find '{}'. Have you run 'train' first?",
                path.display()
            ))?;

        Ok(serde_json::from_str::<usize>(&s)?)
    }

    fn write_json<T: serde::Serialize>(&self, name: &str, value: &T) -> Result<()> {
        let path = self.dir.join(name);
        let json = serde_json::to_string_pretty(value)?;
        fs::write(&path, json)
            .with_context(|| format!("Cannot write '{}'", path.display()))?;
        tracing::debug!("Saved '{}'", path.display());
        Ok(())
    }

    fn read_json<T: serde::de::DeserializeOwned>(&self, name: &str) -> Result<T> {
        let path = self.dir.join(name);
        let json = fs::read_to_string(&path)
            .with_context(|| format!(
                "Cannot read '{}'. Make sure you have run 'train' before 'predict'.",
                path.display()
            ))?;
        serde_json::from_str(&json)
            .with_context(|| format!("Malformed '{}'", path.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;

    type TestBackend = NdArray;

    fn tiny() -> CausalLmConfig {
        CausalLmConfig::new(16, 8, 16, 1, 2, 32)
    }

    #[test]
    fn test_latest_epoch_missing_before_training() {
        let dir  = tempfile::tempdir().unwrap();
        let ckpt = CheckpointManager::new(dir.path()).unwrap();
        assert!(ckpt.latest_epoch().is_err());
    }

    #[test]
    fn test_adapter_config_is_persisted() {
        let dir  = tempfile::tempdir().unwrap();
        let ckpt = CheckpointManager::new(dir.path()).unwrap();
        ckpt.save_adapter_config(&LoraConfig::default()).unwrap();

        let json = fs::read_to_string(dir.path().join("adapter_config.json")).unwrap();
        assert!(json.contains("\"CAUSAL_LM\""));
        assert_eq!(ckpt.load_adapter_config().unwrap(), LoraConfig::default());
    }

    fn values(t: Tensor<TestBackend, 2>) -> Vec<f32> {
        t.into_data().iter::<f32>().collect()
    }

    #[test]
    fn test_saved_epoch_restores_adapter_weights_exactly() {
        let dir    = tempfile::tempdir().unwrap();
        let device = Default::default();
        let ckpt   = CheckpointManager::new(dir.path()).unwrap();
        let lora   = LoraConfig::default();
        let base: CausalLm<TestBackend> = tiny().init(&device);

        // non-zero lora_b so the comparison covers both adapter matrices
        let mut model = lora.apply(base.clone(), &device).unwrap();
        let adapter = model.layers[0].attn.q_proj.adapter.as_mut().unwrap();
        adapter.lora_b.weight = adapter.lora_b.weight.clone().map(|w| w.add_scalar(0.123_456_79));

        ckpt.save_model(&model, 1).unwrap();
        ckpt.save_model(&model, 2).unwrap();
        assert_eq!(ckpt.latest_epoch().unwrap(), 2);
        assert!(ckpt.epoch_dir(2).join("adapter.mpk").exists());
        assert!(!ckpt.epoch_dir(2).join("model.mpk").exists());

        let fresh = lora.apply(base.clone(), &device).unwrap();
        let restored = ckpt.load_latest(fresh, &device).unwrap();

        for (saved, loaded) in model.layers.iter().zip(&restored.layers) {
            for (p, q) in saved.projections().into_iter().zip(loaded.projections()) {
                let (p, q) = (p.adapter.as_ref().unwrap(), q.adapter.as_ref().unwrap());
                assert_eq!(values(p.lora_a.weight.val()), values(q.lora_a.weight.val()));
                assert_eq!(values(p.lora_b.weight.val()), values(q.lora_b.weight.val()));
            }
        }

        // base weights come from the base model, not the checkpoint
        for (orig, loaded) in base.layers.iter().zip(&restored.layers) {
            for (p, q) in orig.projections().into_iter().zip(loaded.projections()) {
                assert_eq!(values(p.base.weight.val()), values(q.base.weight.val()));
            }
        }
        assert_eq!(values(base.lm_head.weight.val()), values(restored.lm_head.weight.val()));
    }

    #[test]
    fn test_model_without_adapters_is_not_checkpointed() {
        let dir    = tempfile::tempdir().unwrap();
        let device = Default::default();
        let ckpt   = CheckpointManager::new(dir.path()).unwrap();
        let model: CausalLm<TestBackend> = tiny().init(&device);

        assert!(ckpt.save_model(&model, 1).is_err());
        assert!(ckpt.latest_epoch().is_err());
    }

    #[test]
    fn test_load_base_model() {
        let dir    = tempfile::tempdir().unwrap();
        let device = Default::default();
        let cfg    = tiny();
        cfg.save(dir.path().join("config.json")).unwrap();
        let model: CausalLm<TestBackend> = cfg.init(&device);
        let expected = values(model.lm_head.weight.val());
        WeightRecorder::new()
            .record(model.into_record(), dir.path().join("model"))
            .unwrap();

        let (loaded_cfg, loaded) = load_base_model::<TestBackend>(dir.path(), &device).unwrap();
        assert_eq!(values(loaded.lm_head.weight.val()), expected);
        assert_eq!(loaded_cfg.hidden_size, 8);
        assert_eq!(loaded.layers.len(), 1);
        assert_eq!(loaded.adapter_params(), 0);
    }
}
