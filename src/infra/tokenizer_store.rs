// ============================================================
// Layer 6 — Tokenizer Store
// ============================================================
// Loads the base model's HuggingFace tokenizer.json and resolves
// the special-token ids the pipeline depends on:
//
//   pad  — appended once after every completion as the end marker,
//          and used to right-pad batches
//   eos  — any of these ends generation early
//
// The ChatML markers (<|im_start|>, <|im_end|>) must already be
// registered as added tokens in tokenizer.json; the prompts carry
// them literally and rely on the tokenizer to map each to one id.

use anyhow::{bail, Result};
use std::path::PathBuf;
use tokenizers::Tokenizer;

use crate::domain::chat::{IM_END, IM_START};

pub struct TokenizerStore {
    dir: PathBuf,
}

impl TokenizerStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Load `{dir}/tokenizer.json`
    pub fn load(&self) -> Result<Tokenizer> {
        let path = self.dir.join("tokenizer.json");
        let tokenizer = Tokenizer::from_file(&path)
            .map_err(|e| anyhow::anyhow!(
                "Cannot load tokenizer from '{}': {}", path.display(), e
            ))?;

        for marker in [IM_START, IM_END] {
            if tokenizer.token_to_id(marker).is_none() {
                tracing::warn!("Tokenizer has no id for chat marker '{marker}'");
            }
        }
        tracing::info!(
            "Tokenizer loaded from '{}' (vocab {})",
            path.display(),
            tokenizer.get_vocab_size(true)
        );
        Ok(tokenizer)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpecialTokens {
    pub pad_id:  u32,
    pub eos_ids: Vec<u32>,
}

impl SpecialTokens {
    /// Look up the pad token (required) and the end-of-sequence tokens
    /// (those absent from the vocabulary are skipped; the pad token is
    /// used when none resolve).
    pub fn resolve(tokenizer: &Tokenizer, pad_token: &str, eos_tokens: &[String]) -> Result<Self> {
        let Some(pad_id) = tokenizer.token_to_id(pad_token) else {
            bail!("Pad token '{pad_token}' is not in the tokenizer vocabulary");
        };

        let mut eos_ids: Vec<u32> = eos_tokens
            .iter()
            .filter_map(|t| {
                let id = tokenizer.token_to_id(t);
                if id.is_none() {
                    tracing::debug!("End-of-sequence token '{t}' not in vocabulary");
                }
                id
            })
            .collect();
        if eos_ids.is_empty() {
            eos_ids.push(pad_id);
        }

        Ok(Self { pad_id, eos_ids })
    }
}

/// Small WordLevel tokenizer with the ChatML markers registered,
/// built from JSON the same way a pretrained tokenizer.json is read.
///
/// Ids: `<|endoftext|>`=0, `<|im_start|>`=1, `<|im_end|>`=2, `[UNK]`=3,
/// then `words` in order from 4.
#[cfg(test)]
pub(crate) fn word_level_tokenizer(words: &[&str]) -> Tokenizer {
    use std::str::FromStr;

    let specials = ["<|endoftext|>", IM_START, IM_END, "[UNK]"];
    let mut vocab = serde_json::Map::new();
    for (id, tok) in specials.iter().chain(words.iter()).enumerate() {
        vocab.entry(tok.to_string()).or_insert(serde_json::json!(id));
    }

    let added: Vec<serde_json::Value> = specials
        .iter()
        .enumerate()
        .map(|(id, tok)| serde_json::json!({
            "id": id, "content": tok, "single_word": false, "lstrip": false,
            "rstrip": false, "normalized": false, "special": true
        }))
        .collect();

    let json = serde_json::json!({
        "version": "1.0",
        "truncation": null,
        "padding": null,
        "added_tokens": added,
        "normalizer": null,
        "pre_tokenizer": { "type": "Whitespace" },
        "post_processor": null,
        "decoder": null,
        "model": { "type": "WordLevel", "vocab": vocab, "unk_token": "[UNK]" }
    });

    Tokenizer::from_str(&json.to_string()).expect("fixture tokenizer")
}
