// ============================================================
// Layer 4 — SFT Dataset
// ============================================================
// Holds the encoded examples in memory and exposes them through
// Burn's Dataset trait; the DataLoader shuffles and batches them.
//
// Reference: Burn Book §4 (Datasets)

use burn::data::dataset::Dataset;

use crate::domain::example::EncodedExample;

/// Encoded fine-tuning examples, served to Burn's DataLoader.
pub struct SftDataset {
    samples: Vec<EncodedExample>,
}

impl SftDataset {
    pub fn new(samples: Vec<EncodedExample>) -> Self { Self { samples } }

    /// Total number of loss-bearing label positions across the dataset
    pub fn scored_tokens(&self) -> usize {
        self.samples.iter().map(EncodedExample::scored_positions).sum()
    }
}

impl Dataset<EncodedExample> for SftDataset {
    fn get(&self, index: usize) -> Option<EncodedExample> {
        self.samples.get(index).cloned()
    }

    fn len(&self) -> usize {
        self.samples.len()
    }
}
