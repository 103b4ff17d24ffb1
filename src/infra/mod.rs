// ============================================================
// Layer 6 — Infrastructure Layer
// ============================================================
// Cross-cutting persistence used by the other layers:
//
//   checkpoint.rs      — Base-model loading, per-epoch adapter
//                        checkpoints (full-precision NamedMpkFileRecorder)
//                        and the JSON configs needed to rebuild the
//                        adapted model.
//
//   tokenizer_store.rs — Loads the base model's tokenizer.json and
//                        resolves the pad / end-of-sequence ids.
//
//   metrics.rs         — Per-epoch training metrics appended to CSV.
//
//   transcript.rs      — Append-only transcript of generated answers.
//
// Reference: Rust Book §7 (Modules)
//            Burn Book §5 (Checkpointing)

/// Model checkpoint saving and loading
pub mod checkpoint;

/// Tokenizer loading and special-token lookup
pub mod tokenizer_store;

/// Training metrics CSV logger
pub mod metrics;

/// Generated-answer transcript
pub mod transcript;
