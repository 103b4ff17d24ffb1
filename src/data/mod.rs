// ============================================================
// Layer 4 — Data Pipeline
// ============================================================
// This layer handles everything from raw JSONL records
// all the way to padded tensor batches.
//
// The pipeline flows in this order:
//
//   train.jsonl / test.jsonl
//       │
//       ▼
//   reformatter       → instruction / input / output records
//       │                (new_train.jsonl, new_test.jsonl)
//       ▼
//   JsonlLoader       → typed records, one per line
//       │
//       ▼
//   SequenceEncoder   → input ids, attention mask, masked labels
//       │
//       ▼
//   SftDataset        → implements Burn's Dataset trait
//       │
//       ▼
//   SftCollator       → right-pads samples into tensor batches
//       │
//       ▼
//   DataLoader        → feeds batches to the training loop
//
// Reference: Burn Book §4 (Datasets and Dataloaders)
//            Rust Book §13 (Iterators and Closures)

/// Reads JSONL files into typed records
pub mod loader;

/// Raw records → instruction-tuning records
pub mod reformatter;

/// Tokenizes prompts and completions, masks prompt labels
pub mod encoder;

/// Implements Burn's Dataset trait for encoded examples
pub mod dataset;

/// Implements Burn's Batcher trait to create padded batches
pub mod batcher;
