// ============================================================
// Layer 4 — Sequence Collator
// ============================================================
// Implements Burn's Batcher trait to turn a Vec<EncodedExample>
// of uneven lengths into rectangular tensors.
//
// Dynamic right-padding to the longest sequence in the batch:
//
//   input_ids       padded with the pad token id
//   attention_mask  padded with 0
//   labels          padded with -100 (ignored by the loss)
//
//   [t1 t2 t3 t4]        [t1 t2 t3 t4]
//   [t1 t2]          →   [t1 t2 PAD PAD]
//
// Reference: Burn Book §4 (Batcher)

use burn::{
    data::dataloader::batcher::Batcher,
    prelude::*,
    tensor::TensorData,
};

use crate::domain::example::{EncodedExample, IGNORE_INDEX};

/// A padded batch ready for the decoder's forward pass.
/// Every tensor has shape [batch_size, seq_len].
#[derive(Debug, Clone)]
pub struct SftBatch<B: Backend> {
    pub input_ids:      Tensor<B, 2, Int>,
    /// 1 = real token, 0 = padding
    pub attention_mask: Tensor<B, 2, Int>,
    /// Target ids; -100 where the position is not scored
    pub labels:         Tensor<B, 2, Int>,
}

#[derive(Clone, Debug)]
pub struct SftCollator {
    pub pad_token_id: u32,
}

impl SftCollator {
    pub fn new(pad_token_id: u32) -> Self {
        Self { pad_token_id }
    }

    /// Pad every sample to the longest one. Returns flattened row-major
    /// buffers plus the common sequence length.
    fn pad(&self, items: &[EncodedExample]) -> (Vec<i64>, Vec<i64>, Vec<i64>, usize) {
        let seq_len = items.iter().map(EncodedExample::len).max().unwrap_or(0);
        let total   = items.len() * seq_len;

        let mut input_ids      = Vec::with_capacity(total);
        let mut attention_mask = Vec::with_capacity(total);
        let mut labels         = Vec::with_capacity(total);

        for item in items {
            let fill = seq_len - item.len();

            input_ids.extend(item.input_ids.iter().map(|&x| x as i64));
            input_ids.extend(std::iter::repeat(self.pad_token_id as i64).take(fill));

            attention_mask.extend(item.attention_mask.iter().map(|&x| x as i64));
            attention_mask.extend(std::iter::repeat(0).take(fill));

            labels.extend_from_slice(&item.labels);
            labels.extend(std::iter::repeat(IGNORE_INDEX).take(fill));
        }

        (input_ids, attention_mask, labels, seq_len)
    }
}

impl<B: Backend> Batcher<B, EncodedExample, SftBatch<B>> for SftCollator {
    fn batch(&self, items: Vec<EncodedExample>, device: &B::Device) -> SftBatch<B> {
        let batch_size = items.len();
        let (input_ids, attention_mask, labels, seq_len) = self.pad(&items);

        let to_tensor = |values: Vec<i64>| {
            Tensor::<B, 2, Int>::from_data(TensorData::new(values, [batch_size, seq_len]), device)
        };

        SftBatch {
            input_ids:      to_tensor(input_ids),
            attention_mask: to_tensor(attention_mask),
            labels:         to_tensor(labels),
        }
    }
}
