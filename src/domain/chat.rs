// ============================================================
// Layer 3 — Chat Messages and Template
// ============================================================
// Conversations are rendered in ChatML:
//
//   <|im_start|>system
//   {instruction}<|im_end|>
//   <|im_start|>user
//   {input}<|im_end|>
//   <|im_start|>assistant
//
// The trailing assistant header is the "generation prompt": it is
// left open so the model's continuation is the answer. Training and
// inference go through the same renderer so the prompt the model is
// tuned on is byte-identical to the one it is queried with.

use serde::{Deserialize, Serialize};

pub const IM_START: &str = "<|im_start|>";
pub const IM_END: &str = "<|im_end|>";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    System,
    User,
    Assistant,
}

impl ChatRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChatRole::System    => "system",
            ChatRole::User      => "user",
            ChatRole::Assistant => "assistant",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role:    ChatRole,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self { role: ChatRole::System, content: content.into() }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self { role: ChatRole::User, content: content.into() }
    }
}

pub struct ChatTemplate;

impl ChatTemplate {
    /// Render `messages` as ChatML. With `add_generation_prompt` the
    /// assistant turn is opened but not closed.
    pub fn render(messages: &[ChatMessage], add_generation_prompt: bool) -> String {
        let mut out = String::new();
        for m in messages {
            out.push_str(IM_START);
            out.push_str(m.role.as_str());
            out.push('\n');
            out.push_str(&m.content);
            out.push_str(IM_END);
            out.push('\n');
        }
        if add_generation_prompt {
            out.push_str(IM_START);
            out.push_str(ChatRole::Assistant.as_str());
            out.push('\n');
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_with_generation_prompt() {
        let text = ChatTemplate::render(
            &[ChatMessage::system("SYS"), ChatMessage::user("article:a,entity:b,")],
            true,
        );
        assert_eq!(
            text,
            "<|im_start|>system\nSYS<|im_end|>\n<|im_start|>user\narticle:a,entity:b,<|im_end|>\n<|im_start|>assistant\n"
        );
    }

    #[test]
    fn test_render_without_generation_prompt() {
        let text = ChatTemplate::render(&[ChatMessage::user("hi")], false);
        assert_eq!(text, "<|im_start|>user\nhi<|im_end|>\n");
    }

    #[test]
    fn test_role_serialises_lowercase() {
        let json = serde_json::to_string(&ChatMessage::system("x")).unwrap();
        assert_eq!(json, r#"{"role":"system","content":"x"}"#);
    }
}
