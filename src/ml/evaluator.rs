// ============================================================
// Layer 5 — Stratified Accuracy Evaluator
// ============================================================
// Scores masked-token predictions:
//
//   Step 1: flatten batch x sequence, keep positions whose label
//           is not the ignore sentinel
//   Step 2: top-k accuracy for each configured k, ranking the
//           vocabulary by score with stable order — an equal
//           score at a lower vocabulary index ranks first, no
//           other tie handling
//   Step 3: top-1 accuracy within each frequency band of the
//           true label, plus the number of scored positions per
//           band; an empty band reports NaN, never a crash
//   Step 4: in injection mode, the probe token's current mixing
//           coefficient rides along in the metric map
//
// The evaluator holds only immutable state (k set, bucket table)
// and its methods are pure, so batches can be scored in any
// order and merged. Ranking happens on host-side data — one
// device-to-host transfer per batch, then plain Rust.

use anyhow::Result;
use burn::prelude::*;
use std::collections::BTreeMap;

use crate::data::batcher::IGNORE_INDEX;
use crate::data::frequency::FrequencyBuckets;

pub const DEFAULT_TOPK: [usize; 3] = [1, 5, 10];

/// Mergeable tallies from one or more batches.
#[derive(Debug, Clone)]
pub struct EvalCounts {
    pub scored:      usize,
    pub topk_hits:   Vec<usize>,
    pub band_scored: Vec<usize>,
    pub band_hits:   Vec<usize>,
}

impl EvalCounts {
    fn new(topk_len: usize, band_len: usize) -> Self {
        Self {
            scored:      0,
            topk_hits:   vec![0; topk_len],
            band_scored: vec![0; band_len],
            band_hits:   vec![0; band_len],
        }
    }

    pub fn merge(&mut self, other: &EvalCounts) {
        self.scored += other.scored;
        for (a, b) in self.topk_hits.iter_mut().zip(&other.topk_hits) {
            *a += b;
        }
        for (a, b) in self.band_scored.iter_mut().zip(&other.band_scored) {
            *a += b;
        }
        for (a, b) in self.band_hits.iter_mut().zip(&other.band_hits) {
            *a += b;
        }
    }
}

pub struct StratifiedEvaluator {
    topk:    Vec<usize>,
    buckets: FrequencyBuckets,
}

impl StratifiedEvaluator {
    pub fn new(topk: Vec<usize>, buckets: FrequencyBuckets) -> Self {
        Self { topk, buckets }
    }

    pub fn empty_counts(&self) -> EvalCounts {
        EvalCounts::new(self.topk.len(), self.buckets.bands().len())
    }

    /// Tally one batch of (logits, labels).
    ///
    /// logits: [batch, seq_len, vocab], labels: [batch, seq_len]
    /// with IGNORE_INDEX at unscored positions.
    pub fn evaluate_batch<B: Backend>(
        &self,
        logits: Tensor<B, 3>,
        labels: Tensor<B, 2, Int>,
    ) -> Result<EvalCounts> {
        let [batch_size, seq_len, vocab_size] = logits.dims();

        let scores: Vec<f32> = logits
            .into_data()
            .convert::<f32>()
            .to_vec()
            .map_err(|e| anyhow::anyhow!("cannot read logits from device: {e:?}"))?;
        let labels: Vec<i64> = labels
            .reshape([batch_size * seq_len])
            .into_data()
            .convert::<i64>()
            .to_vec()
            .map_err(|e| anyhow::anyhow!("cannot read labels from device: {e:?}"))?;

        let mut counts = self.empty_counts();

        for (pos, &label) in labels.iter().enumerate() {
            if label == IGNORE_INDEX as i64 {
                continue;
            }
            let target = label as usize;
            if label < 0 || target >= vocab_size {
                tracing::warn!("label {} outside vocabulary of {}, skipping", label, vocab_size);
                continue;
            }
            let row = &scores[pos * vocab_size..(pos + 1) * vocab_size];
            let rank = stable_rank(row, target);

            counts.scored += 1;
            for (ki, &k) in self.topk.iter().enumerate() {
                if rank < k {
                    counts.topk_hits[ki] += 1;
                }
            }
            if let Some(band) = self.buckets.band_of(target as u32) {
                counts.band_scored[band] += 1;
                if rank == 0 {
                    counts.band_hits[band] += 1;
                }
            }
        }

        Ok(counts)
    }

    /// Turn tallies into the metric map. `probe` is the mixing
    /// coefficient of the designated probe token, present only in
    /// injection mode.
    pub fn finalize(&self, counts: &EvalCounts, probe: Option<f64>) -> BTreeMap<String, f64> {
        let ratio = |hits: usize, total: usize| {
            if total == 0 {
                f64::NAN
            } else {
                hits as f64 / total as f64
            }
        };

        let mut metrics = BTreeMap::new();
        for (ki, &k) in self.topk.iter().enumerate() {
            metrics.insert(format!("top{k:02}"), ratio(counts.topk_hits[ki], counts.scored));
        }
        for (bi, band) in self.buckets.bands().iter().enumerate() {
            metrics.insert(
                format!("acc_{}", band.name),
                ratio(counts.band_hits[bi], counts.band_scored[bi]),
            );
            metrics.insert(format!("n_{}", band.name), counts.band_scored[bi] as f64);
        }
        if let Some(probe) = probe {
            metrics.insert("mixing_probe".to_string(), probe);
        }
        metrics
    }

    /// Single-batch convenience: tally and finalize in one call.
    pub fn evaluate<B: Backend>(
        &self,
        logits: Tensor<B, 3>,
        labels: Tensor<B, 2, Int>,
    ) -> Result<BTreeMap<String, f64>> {
        let counts = self.evaluate_batch(logits, labels)?;
        Ok(self.finalize(&counts, None))
    }
}

/// Number of classes ranked strictly ahead of `target` under
/// stable descending sort: higher score first, lower index first
/// among equals.
fn stable_rank(row: &[f32], target: usize) -> usize {
    let target_score = row[target];
    row.iter()
        .enumerate()
        .filter(|&(j, &s)| s > target_score || (s == target_score && j < target))
        .count()
}
