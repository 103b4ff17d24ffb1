// ============================================================
// Layer 3 — Core Traits (Abstractions)
// ============================================================
// The inference loop talks to the model only through Completer,
// so the loop (prompting, transcript writing, abort-on-error) can
// be exercised without loading any weights.
//
// Implementations:
//   - Generator  → runs the LoRA-adapted decoder (Layer 5)
//   - test fakes → canned completions
//
// Reference: Rust Book §10 (Traits: Defining Shared Behaviour)

use anyhow::Result;

use crate::domain::chat::ChatMessage;

/// Anything that can continue a chat conversation.
pub trait Completer {
    /// Render `messages` with an open assistant turn and return only the
    /// newly generated text, special tokens removed.
    fn complete(&mut self, messages: &[ChatMessage]) -> Result<String>;
}
