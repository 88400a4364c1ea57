// ============================================================
// Layer 4 — Masked-LM Batcher
// ============================================================
// Implements burn's Batcher trait to turn a Vec<IcdSample> into
// tensors, applying BERT-style dynamic masking on the way:
//
//   - each non-special position is selected independently with
//     probability mask_ratio
//   - selected positions keep their original id as the label;
//     everything else (and every special position) gets the
//     ignore sentinel -100
//   - of the selected positions: 80% become [MASK], 10% become a
//     uniformly random vocabulary id, 10% stay unchanged
//
// Masking is re-drawn on every batch, so the model sees a fresh
// corruption of each sequence each epoch. The same policy is
// applied to training and evaluation batches.
//
// The policy takes a caller-supplied Rng; the batcher feeds it a
// thread RNG at runtime and tests feed a seeded StdRng.

use burn::{
    data::dataloader::batcher::Batcher,
    prelude::*,
};
use rand::Rng;

use crate::data::dataset::IcdSample;

/// Label value marking positions that do not contribute to the
/// loss or the accuracy metrics.
pub const IGNORE_INDEX: i32 = -100;

// Replacement split for selected positions, per Devlin et al.
const MASK_PROB:    f64 = 0.8;
const RANDOM_PROB:  f64 = 0.1; // remaining 0.1 stays unchanged

/// The dynamic-masking rule, independent of any backend.
#[derive(Debug, Clone)]
pub struct MaskingPolicy {
    /// Fraction of non-special positions selected for the objective
    mask_ratio: f64,

    /// Id the 80% branch writes into the input
    mask_token_id: u32,

    /// Vocabulary size for the random-replacement branch
    vocab_size: u32,
}

impl MaskingPolicy {
    pub fn new(mask_ratio: f64, mask_token_id: u32, vocab_size: u32) -> Self {
        Self { mask_ratio, mask_token_id, vocab_size }
    }

    /// Corrupt one sequence. Returns (masked input ids, labels).
    pub fn mask<R: Rng + ?Sized>(
        &self,
        input_ids:    &[u32],
        special_mask: &[u32],
        rng:          &mut R,
    ) -> (Vec<u32>, Vec<i32>) {
        let mut masked = input_ids.to_vec();
        let mut labels = vec![IGNORE_INDEX; input_ids.len()];

        for (pos, (&id, &special)) in input_ids.iter().zip(special_mask).enumerate() {
            if special != 0 {
                continue;
            }
            if !rng.gen_bool(self.mask_ratio) {
                continue;
            }

            labels[pos] = id as i32;
            let roll: f64 = rng.gen();
            if roll < MASK_PROB {
                masked[pos] = self.mask_token_id;
            } else if roll < MASK_PROB + RANDOM_PROB {
                masked[pos] = rng.gen_range(0..self.vocab_size);
            }
            // else: input stays unchanged, label still set
        }

        (masked, labels)
    }
}

/// A masked batch ready for the model forward pass.
#[derive(Debug, Clone)]
pub struct MlmBatch<B: Backend> {
    /// Corrupted token ids — [batch_size, seq_len]
    pub input_ids: Tensor<B, 2, Int>,

    /// 1 = real token, 0 = padding — [batch_size, seq_len]
    pub attention_mask: Tensor<B, 2, Int>,

    /// Original ids at selected positions, -100 elsewhere —
    /// [batch_size, seq_len]
    pub labels: Tensor<B, 2, Int>,
}

#[derive(Clone, Debug)]
pub struct MlmBatcher<B: Backend> {
    policy: MaskingPolicy,
    device: B::Device,
}

impl<B: Backend> MlmBatcher<B> {
    pub fn new(policy: MaskingPolicy, device: B::Device) -> Self {
        Self { policy, device }
    }
}

impl<B: Backend> Batcher<IcdSample, MlmBatch<B>> for MlmBatcher<B> {
    /// Mask every sample, flatten, and stack into [batch, seq]
    /// tensors. All samples are pre-padded to the same length by
    /// the dataset, so no dynamic padding happens here.
    fn batch(&self, items: Vec<IcdSample>) -> MlmBatch<B> {
        let batch_size = items.len();
        let seq_len    = items[0].input_ids.len();
        let mut rng    = rand::thread_rng();

        let mut input_flat:  Vec<i32> = Vec::with_capacity(batch_size * seq_len);
        let mut mask_flat:   Vec<i32> = Vec::with_capacity(batch_size * seq_len);
        let mut labels_flat: Vec<i32> = Vec::with_capacity(batch_size * seq_len);

        for item in &items {
            let (masked, labels) = self
                .policy
                .mask(&item.input_ids, &item.special_mask, &mut rng);

            input_flat.extend(masked.iter().map(|&x| x as i32));
            mask_flat.extend(item.attention_mask.iter().map(|&x| x as i32));
            labels_flat.extend(labels);
        }

        let input_ids = Tensor::<B, 1, Int>::from_ints(input_flat.as_slice(), &self.device)
            .reshape([batch_size, seq_len]);
        let attention_mask = Tensor::<B, 1, Int>::from_ints(mask_flat.as_slice(), &self.device)
            .reshape([batch_size, seq_len]);
        let labels = Tensor::<B, 1, Int>::from_ints(labels_flat.as_slice(), &self.device)
            .reshape([batch_size, seq_len]);

        MlmBatch { input_ids, attention_mask, labels }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    const MASK_ID: u32 = 4;
    const VOCAB: u32 = 32;

    #[test]
    fn test_ratio_one_selects_every_content_position() {
        let policy = MaskingPolicy::new(1.0, MASK_ID, VOCAB);
        let input   = vec![2, 10, 11, 12, 3, 0];
        let special = vec![1, 0, 0, 0, 1, 1];
        let mut rng = StdRng::seed_from_u64(0);

        let (_, labels) = policy.mask(&input, &special, &mut rng);
        assert_eq!(labels, vec![-100, 10, 11, 12, -100, -100]);
    }

    #[test]
    fn test_ratio_zero_selects_nothing() {
        let policy = MaskingPolicy::new(0.0, MASK_ID, VOCAB);
        let input   = vec![2, 10, 11, 3];
        let special = vec![1, 0, 0, 1];
        let mut rng = StdRng::seed_from_u64(0);

        let (masked, labels) = policy.mask(&input, &special, &mut rng);
        assert_eq!(masked, input);
        assert!(labels.iter().all(|&l| l == IGNORE_INDEX));
    }

    #[test]
    fn test_single_content_token_yields_single_masked_position() {
        // The end-to-end masking contract: one content token and
        // ratio 1.0 give exactly one scored position.
        let policy = MaskingPolicy::new(1.0, MASK_ID, VOCAB);
        let input   = vec![2, 17, 3, 0, 0];
        let special = vec![1, 0, 1, 1, 1];
        let mut rng = StdRng::seed_from_u64(9);

        let (_, labels) = policy.mask(&input, &special, &mut rng);
        let scored: Vec<_> = labels.iter().filter(|&&l| l != IGNORE_INDEX).collect();
        assert_eq!(scored, vec![&17]);
    }

    #[test]
    fn test_same_seed_reproduces_masking() {
        let policy = MaskingPolicy::new(0.5, MASK_ID, VOCAB);
        let input:   Vec<u32> = (10..40).collect();
        let special = vec![0u32; input.len()];

        let mut rng_a = StdRng::seed_from_u64(42);
        let mut rng_b = StdRng::seed_from_u64(42);
        assert_eq!(
            policy.mask(&input, &special, &mut rng_a),
            policy.mask(&input, &special, &mut rng_b)
        );
    }

    #[test]
    fn test_labels_preserve_original_ids_under_corruption() {
        let policy = MaskingPolicy::new(1.0, MASK_ID, VOCAB);
        let input:   Vec<u32> = (10..30).collect();
        let special = vec![0u32; input.len()];
        let mut rng = StdRng::seed_from_u64(7);

        let (masked, labels) = policy.mask(&input, &special, &mut rng);
        for (pos, &label) in labels.iter().enumerate() {
            // Every position selected; the label is always the
            // pre-corruption id, whatever the input became.
            assert_eq!(label, input[pos] as i32);
        }
        // With 20 positions at 80% mask probability, at least one
        // position must have become [MASK] for any seed.
        assert!(masked.iter().any(|&id| id == MASK_ID));
    }

    #[test]
    fn test_batcher_shapes() {
        type B = burn::backend::NdArray;
        let policy  = MaskingPolicy::new(0.15, MASK_ID, VOCAB);
        let batcher = MlmBatcher::<B>::new(policy, Default::default());

        let sample = IcdSample {
            input_ids:      vec![2, 10, 11, 3, 0, 0],
            attention_mask: vec![1, 1, 1, 1, 0, 0],
            special_mask:   vec![1, 0, 0, 1, 1, 1],
        };
        let batch = batcher.batch(vec![sample.clone(), sample]);

        assert_eq!(batch.input_ids.dims(), [2, 6]);
        assert_eq!(batch.attention_mask.dims(), [2, 6]);
        assert_eq!(batch.labels.dims(), [2, 6]);
    }
}
