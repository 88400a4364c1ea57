// ============================================================
// Layer 4 — Frequency Buckets
// ============================================================
// Partitions vocabulary token ids into named rarity bands by
// their occurrence count in a reference corpus (the validation
// split). Bands are half-open intervals [lo, hi): contiguous,
// first lo = 0, last hi = u64::MAX, so every possible count
// falls in exactly one band — a count sitting on a cutoff lands
// in the band whose lo it equals.
//
// Computed once before training and immutable afterwards.
// Special tokens are excluded from the statistics and carry no
// band.

use anyhow::{bail, Result};
use std::collections::HashSet;

use crate::data::dataset::PatientSequenceDataset;

/// One rarity band: counts in [lo, hi).
#[derive(Debug, Clone)]
pub struct FrequencyBand {
    pub name: String,
    pub lo:   u64,
    pub hi:   u64,
}

impl FrequencyBand {
    fn contains(&self, count: u64) -> bool {
        self.lo <= count && count < self.hi
    }
}

/// Immutable token-id → band assignment.
#[derive(Debug, Clone)]
pub struct FrequencyBuckets {
    bands: Vec<FrequencyBand>,

    /// Band index per token id; None for special tokens
    token_band: Vec<Option<usize>>,
}

/// The default rarity bands over validation-corpus counts.
pub fn default_bands() -> Vec<FrequencyBand> {
    let cuts = [
        ("unseen",   0u64,  1u64),
        ("rare",     1,     100),
        ("common",   100,   1000),
        ("frequent", 1000,  u64::MAX),
    ];
    cuts.iter()
        .map(|(name, lo, hi)| FrequencyBand { name: name.to_string(), lo: *lo, hi: *hi })
        .collect()
}

impl FrequencyBuckets {
    /// Assign every token id a band from its count.
    ///
    /// `counts` is indexed by token id and must cover the whole
    /// vocabulary. Bands must tile [0, u64::MAX) with no gap or
    /// overlap.
    pub fn from_counts(
        counts:      &[u64],
        special_ids: &HashSet<u32>,
        bands:       Vec<FrequencyBand>,
    ) -> Result<Self> {
        if bands.is_empty() {
            bail!("at least one frequency band is required");
        }
        if bands[0].lo != 0 || bands[bands.len() - 1].hi != u64::MAX {
            bail!("frequency bands must start at 0 and end unbounded");
        }
        for pair in bands.windows(2) {
            if pair[0].hi != pair[1].lo {
                bail!(
                    "frequency bands '{}' and '{}' do not tile: [{}, {}) then [{}, {})",
                    pair[0].name, pair[1].name, pair[0].lo, pair[0].hi, pair[1].lo, pair[1].hi
                );
            }
        }

        let token_band = counts
            .iter()
            .enumerate()
            .map(|(id, &count)| {
                if special_ids.contains(&(id as u32)) {
                    None
                } else {
                    // Tiling guarantees exactly one band matches.
                    bands.iter().position(|b| b.contains(count))
                }
            })
            .collect();

        Ok(Self { bands, token_band })
    }

    pub fn bands(&self) -> &[FrequencyBand] {
        &self.bands
    }

    /// Band index of a token id, None for special tokens or ids
    /// outside the vocabulary.
    pub fn band_of(&self, token_id: u32) -> Option<usize> {
        self.token_band.get(token_id as usize).copied().flatten()
    }
}

/// Count content-token occurrences over a reference corpus by
/// encoding every patient once (no shuffling should be active on
/// the dataset passed here). Returns counts indexed by token id.
pub fn count_token_frequencies(
    dataset:    &PatientSequenceDataset,
    vocab_size: usize,
) -> Result<Vec<u64>> {
    let mut counts = vec![0u64; vocab_size];
    for &id in dataset.patient_ids() {
        let sample = dataset.encode_patient(id)?;
        for ((&token, &attn), &special) in sample
            .input_ids
            .iter()
            .zip(&sample.attention_mask)
            .zip(&sample.special_mask)
        {
            if attn == 1 && special == 0 {
                if let Some(slot) = counts.get_mut(token as usize) {
                    *slot += 1;
                }
            }
        }
    }
    Ok(counts)
}

/// The content token with the highest reference count, used as
/// the default mixing-coefficient probe.
pub fn most_frequent_token(counts: &[u64], special_ids: &HashSet<u32>) -> Option<u32> {
    counts
        .iter()
        .enumerate()
        .filter(|(id, &count)| count > 0 && !special_ids.contains(&(*id as u32)))
        .max_by_key(|(_, &count)| count)
        .map(|(id, _)| id as u32)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn specials() -> HashSet<u32> {
        [0u32, 1, 2, 3, 4].into_iter().collect()
    }

    #[test]
    fn test_cutoff_count_lands_in_exactly_one_band() {
        // Token 5 has count 100 — exactly on the rare/common cutoff.
        let mut counts = vec![0u64; 8];
        counts[5] = 100;
        counts[6] = 99;
        counts[7] = 1000;
        let buckets = FrequencyBuckets::from_counts(&counts, &specials(), default_bands()).unwrap();

        let names: Vec<&str> = buckets.bands().iter().map(|b| b.name.as_str()).collect();
        assert_eq!(names[buckets.band_of(5).unwrap()], "common");
        assert_eq!(names[buckets.band_of(6).unwrap()], "rare");
        assert_eq!(names[buckets.band_of(7).unwrap()], "frequent");
    }

    #[test]
    fn test_every_count_has_a_band() {
        let counts = vec![0u64, 1, 99, 100, 999, 1000, 123_456_789];
        let buckets =
            FrequencyBuckets::from_counts(&counts, &HashSet::new(), default_bands()).unwrap();
        for id in 0..counts.len() as u32 {
            assert!(buckets.band_of(id).is_some(), "token {id} has no band");
        }
    }

    #[test]
    fn test_special_tokens_carry_no_band() {
        let counts = vec![50u64; 8];
        let buckets = FrequencyBuckets::from_counts(&counts, &specials(), default_bands()).unwrap();
        assert!(buckets.band_of(0).is_none());
        assert!(buckets.band_of(5).is_some());
    }

    #[test]
    fn test_non_tiling_bands_rejected() {
        let bands = vec![
            FrequencyBand { name: "a".into(), lo: 0,  hi: 10 },
            FrequencyBand { name: "b".into(), lo: 20, hi: u64::MAX },
        ];
        assert!(FrequencyBuckets::from_counts(&[0], &HashSet::new(), bands).is_err());
    }

    #[test]
    fn test_out_of_vocab_id_has_no_band() {
        let buckets =
            FrequencyBuckets::from_counts(&[5u64; 4], &HashSet::new(), default_bands()).unwrap();
        assert!(buckets.band_of(99).is_none());
    }

    #[test]
    fn test_most_frequent_skips_specials() {
        let mut counts = vec![0u64; 8];
        counts[0] = 9999; // special
        counts[6] = 10;
        counts[7] = 20;
        assert_eq!(most_frequent_token(&counts, &specials()), Some(7));
    }
}
