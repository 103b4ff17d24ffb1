// ============================================================
// Layer 4 — Sequence Encoder
// ============================================================
// Turns one FormattedExample into the token sequences the trainer
// consumes:
//
//   prompt     = ChatML(system: instruction, user: input)
//                + open assistant header
//   completion = output
//
//   input_ids      = prompt ids  + completion ids + [pad]
//   attention_mask = 1 for every position
//   labels         = [-100] * |prompt| + completion ids + [pad]
//
// The trailing pad id is the end-of-answer marker; it is scored,
// prompt positions are not. Both pieces are tokenized without
// automatic special tokens: the template supplies them literally.
//
// Sequences longer than max_length are cut on the right, each of the
// three arrays independently. A prompt that alone exceeds the bound
// leaves no scored position at all; such examples are kept as-is.

use anyhow::Result;
use tokenizers::Tokenizer;

use crate::domain::chat::{ChatMessage, ChatTemplate};
use crate::domain::example::{EncodedExample, FormattedExample, IGNORE_INDEX, MAX_LENGTH};
use crate::domain::roles::instruction;

pub struct SequenceEncoder<'a> {
    tokenizer:    &'a Tokenizer,
    pad_token_id: u32,
    max_length:   usize,
}

impl<'a> SequenceEncoder<'a> {
    pub fn new(tokenizer: &'a Tokenizer, pad_token_id: u32) -> Self {
        Self { tokenizer, pad_token_id, max_length: MAX_LENGTH }
    }

    pub fn with_max_length(mut self, max_length: usize) -> Self {
        self.max_length = max_length;
        self
    }

    /// The chat prompt a training example is conditioned on.
    pub fn prompt_text(example: &FormattedExample) -> String {
        ChatTemplate::render(
            &[ChatMessage::system(instruction()), ChatMessage::user(example.input.as_str())],
            true,
        )
    }

    pub fn encode(&self, example: &FormattedExample) -> Result<EncodedExample> {
        let prompt_ids = self.tokenize(&Self::prompt_text(example))?;
        let response_ids = self.tokenize(&example.output)?;

        let mut input_ids = Vec::with_capacity(prompt_ids.len() + response_ids.len() + 1);
        input_ids.extend_from_slice(&prompt_ids);
        input_ids.extend_from_slice(&response_ids);
        input_ids.push(self.pad_token_id);

        let mut attention_mask = vec![1u32; input_ids.len()];

        let mut labels = vec![IGNORE_INDEX; prompt_ids.len()];
        labels.extend(response_ids.iter().map(|&id| id as i64));
        labels.push(self.pad_token_id as i64);

        if input_ids.len() > self.max_length {
            tracing::debug!(
                "Truncating sequence of {} tokens to {}",
                input_ids.len(),
                self.max_length
            );
            input_ids.truncate(self.max_length);
            attention_mask.truncate(self.max_length);
            labels.truncate(self.max_length);
        }

        Ok(EncodedExample { input_ids, attention_mask, labels })
    }

    /// Encode a whole dataset, stopping at the first tokenizer failure.
    pub fn encode_all(&self, examples: &[FormattedExample]) -> Result<Vec<EncodedExample>> {
        let encoded: Vec<EncodedExample> = examples
            .iter()
            .map(|ex| self.encode(ex))
            .collect::<Result<_>>()?;

        let unscored = encoded.iter().filter(|e| e.scored_positions() == 0).count();
        if unscored > 0 {
            tracing::warn!(
                "{} of {} examples have no scored label after truncation to {} tokens",
                unscored,
                encoded.len(),
                self.max_length
            );
        }
        Ok(encoded)
    }

    fn tokenize(&self, text: &str) -> Result<Vec<u32>> {
        let enc = self
            .tokenizer
            .encode(text, false)
            .map_err(|e| anyhow::anyhow!("Tokenisation error: {e}"))?;
        Ok(enc.get_ids().to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::reformatter::format_example;
    use crate::domain::example::RawExample;
    use crate::infra::tokenizer_store::word_level_tokenizer;

    const PAD: u32 = 0;

    fn tokenizer() -> Tokenizer {
        word_level_tokenizer(&[
            "system", "user", "assistant", "article", "entity", ":", ",", ".",
            "Peacemaker", "Guardian", "Victim", "Spy", "the", "council",
        ])
    }

    fn example(text: &str, output: &str) -> FormattedExample {
        format_example(&RawExample {
            text:              text.to_string(),
            entity:            "the council".to_string(),
            fine_grained_role: output.to_string(),
        })
    }

    fn ids(tok: &Tokenizer, text: &str) -> Vec<u32> {
        tok.encode(text, false).unwrap().get_ids().to_vec()
    }

    #[test]
    fn test_sequences_have_equal_length() {
        let tok = tokenizer();
        let enc = SequenceEncoder::new(&tok, PAD)
            .encode(&example("A city council debated a new policy.", "Peacemaker Guardian"))
            .unwrap();
        assert_eq!(enc.input_ids.len(), enc.attention_mask.len());
        assert_eq!(enc.input_ids.len(), enc.labels.len());
        assert!(enc.attention_mask.iter().all(|&m| m == 1));
    }

    #[test]
    fn test_only_completion_and_end_marker_are_scored() {
        let tok = tokenizer();
        let ex  = example("A city council debated a new policy.", "Peacemaker Guardian");
        let enc = SequenceEncoder::new(&tok, PAD).encode(&ex).unwrap();

        let mut expected_tail: Vec<i64> = ids(&tok, &ex.output).into_iter().map(i64::from).collect();
        expected_tail.push(PAD as i64);

        let split = enc.labels.len() - expected_tail.len();
        assert_eq!(&enc.labels[split..], expected_tail.as_slice());
        assert!(enc.labels[..split].iter().all(|&l| l == IGNORE_INDEX));
        assert_eq!(split, ids(&tok, &SequenceEncoder::prompt_text(&ex)).len());
    }

    #[test]
    fn test_input_ids_are_prompt_then_completion_then_pad() {
        let tok = tokenizer();
        let ex  = example("the council", "Victim");
        let enc = SequenceEncoder::new(&tok, PAD).encode(&ex).unwrap();

        let mut expected = ids(&tok, &SequenceEncoder::prompt_text(&ex));
        expected.extend(ids(&tok, "Victim"));
        expected.push(PAD);
        assert_eq!(enc.input_ids, expected);
        // the prompt opens with <|im_start|> and ends with the open assistant header
        assert_eq!(enc.input_ids[0], 1);
    }

    #[test]
    fn test_long_completion_is_cut_to_the_bound() {
        let tok    = tokenizer();
        let output = vec!["Spy"; 3000].join(" ");
        let enc    = SequenceEncoder::new(&tok, PAD).encode(&example("x", &output)).unwrap();

        assert_eq!(enc.input_ids.len(), MAX_LENGTH);
        assert_eq!(enc.attention_mask.len(), MAX_LENGTH);
        assert_eq!(enc.labels.len(), MAX_LENGTH);
        // end marker was cut off
        assert_ne!(*enc.labels.last().unwrap(), PAD as i64);
    }

    #[test]
    fn test_prompt_longer_than_bound_leaves_nothing_scored() {
        let tok  = tokenizer();
        let text = vec!["council"; 3000].join(" ");
        let enc  = SequenceEncoder::new(&tok, PAD).encode(&example(&text, "Spy")).unwrap();

        assert_eq!(enc.input_ids.len(), MAX_LENGTH);
        assert_eq!(enc.scored_positions(), 0);
    }

    #[test]
    fn test_custom_bound() {
        let tok = tokenizer();
        let enc = SequenceEncoder::new(&tok, PAD)
            .with_max_length(5)
            .encode(&example("the council", "Spy"))
            .unwrap();
        assert_eq!(enc.len(), 5);
    }

    #[test]
    fn test_encode_all_keeps_order() {
        let tok = tokenizer();
        let exs = vec![example("a", "Spy"), example("b", "Victim")];
        let out = SequenceEncoder::new(&tok, PAD).encode_all(&exs).unwrap();
        assert_eq!(out.len(), 2);
        assert_eq!(out[1].labels[out[1].len() - 2], tok.token_to_id("Victim").unwrap() as i64);
    }
}
