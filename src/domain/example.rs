// ============================================================
// Layer 3 — Example Domain Types
// ============================================================
// The three shapes a labelled example takes on its way to the
// trainer:
//
//   RawExample        one line of train.jsonl / test.jsonl
//       │
//       ▼
//   FormattedExample  instruction / input / output triple
//       │
//       ▼
//   EncodedExample    token ids + attention mask + masked labels
//
// Reference: Rust Book §5 (Structs)

use serde::{Deserialize, Serialize};

/// Upper bound on the length of an encoded training sequence.
pub const MAX_LENGTH: usize = 2048;

/// Label value excluded from the training loss.
pub const IGNORE_INDEX: i64 = -100;

/// One line of the raw dataset. All three fields are required.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawExample {
    /// Article body
    pub text: String,
    /// Mention of the entity whose roles are asked for
    pub entity: String,
    /// Ground-truth roles, whitespace separated
    pub fine_grained_role: String,
}

/// An instruction-tuning record derived from exactly one RawExample.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FormattedExample {
    pub instruction: String,
    pub input: String,
    pub output: String,
}

impl FormattedExample {
    /// `article:{text},entity:{entity},`
    pub fn input_for(text: &str, entity: &str) -> String {
        format!("article:{text},entity:{entity},")
    }
}

/// Token-level training sample. The three sequences always have the
/// same length, which never exceeds [`MAX_LENGTH`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncodedExample {
    pub input_ids: Vec<u32>,
    pub attention_mask: Vec<u32>,
    /// Completion token ids; prompt positions hold [`IGNORE_INDEX`]
    pub labels: Vec<i64>,
}

impl EncodedExample {
    pub fn len(&self) -> usize {
        self.input_ids.len()
    }

    /// Number of label positions that contribute to the loss
    pub fn scored_positions(&self) -> usize {
        self.labels.iter().filter(|&&l| l != IGNORE_INDEX).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_input_format() {
        assert_eq!(
            FormattedExample::input_for("A city council debated a new policy.", "the council"),
            "article:A city council debated a new policy.,entity:the council,"
        );
    }

    #[test]
    fn test_raw_example_requires_every_field() {
        let missing = r#"{"text":"t","entity":"e"}"#;
        assert!(serde_json::from_str::<RawExample>(missing).is_err());
    }

    #[test]
    fn test_scored_positions() {
        let ex = EncodedExample {
            input_ids:      vec![5, 6, 7, 0],
            attention_mask: vec![1, 1, 1, 1],
            labels:         vec![IGNORE_INDEX, IGNORE_INDEX, 7, 0],
        };
        assert_eq!(ex.len(), 4);
        assert_eq!(ex.scored_positions(), 2);
    }
}
