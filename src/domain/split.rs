// ============================================================
// Layer 3 — Phase Splits
// ============================================================
// Patient ids are pre-assigned to train/val/test in on-disk id
// lists, one numeric id per line. The three lists must be
// disjoint: a patient appearing in two phases would leak
// training data into evaluation.
//
// The validation list is additionally subsampled (every
// `stride`-th id, capped at `limit`) so the per-epoch evaluation
// pass stays cheap on large cohorts.

use anyhow::{bail, Result};
use std::collections::HashSet;

use crate::domain::patient::PatientId;

/// The three run phases. Order matters only for reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Train,
    Val,
    Test,
}

impl Phase {
    pub const ALL: [Phase; 3] = [Phase::Train, Phase::Val, Phase::Test];

    /// The file-name stem used by the split artifacts
    /// (`train_ids.txt`, `val_ids.txt`, `test_ids.txt`).
    pub fn stem(&self) -> &'static str {
        match self {
            Phase::Train => "train",
            Phase::Val   => "val",
            Phase::Test  => "test",
        }
    }
}

/// Ordered patient-id lists per phase. Immutable for the run.
#[derive(Debug, Clone)]
pub struct SplitIndex {
    pub train: Vec<PatientId>,
    pub val:   Vec<PatientId>,
    pub test:  Vec<PatientId>,
}

impl SplitIndex {
    /// Build a split index, rejecting any id that appears in more
    /// than one phase.
    pub fn new(train: Vec<PatientId>, val: Vec<PatientId>, test: Vec<PatientId>) -> Result<Self> {
        let mut seen: HashSet<PatientId> = HashSet::new();
        for (phase, ids) in [(Phase::Train, &train), (Phase::Val, &val), (Phase::Test, &test)] {
            for id in ids {
                if !seen.insert(*id) {
                    bail!(
                        "patient id {} appears in multiple phases (last seen loading {})",
                        id,
                        phase.stem()
                    );
                }
            }
        }
        Ok(Self { train, val, test })
    }

    pub fn ids(&self, phase: Phase) -> &[PatientId] {
        match phase {
            Phase::Train => &self.train,
            Phase::Val   => &self.val,
            Phase::Test  => &self.test,
        }
    }

    /// Thin out the validation list: keep every `stride`-th id,
    /// then cap at `limit`. A stride of 1 with a large limit is a
    /// no-op.
    pub fn subsample_val(&mut self, stride: usize, limit: usize) {
        let stride = stride.max(1);
        self.val = self
            .val
            .iter()
            .step_by(stride)
            .take(limit)
            .copied()
            .collect();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_disjoint_splits_accepted() {
        let idx = SplitIndex::new(vec![1, 2], vec![3], vec![4]).unwrap();
        assert_eq!(idx.ids(Phase::Train), &[1, 2]);
        assert_eq!(idx.ids(Phase::Val), &[3]);
        assert_eq!(idx.ids(Phase::Test), &[4]);
    }

    #[test]
    fn test_overlapping_splits_rejected() {
        assert!(SplitIndex::new(vec![1, 2], vec![2], vec![3]).is_err());
    }

    #[test]
    fn test_val_subsampling_stride_and_limit() {
        let mut idx = SplitIndex::new(vec![], (0..100).collect(), vec![]).unwrap();
        idx.subsample_val(10, 5);
        assert_eq!(idx.val, vec![0, 10, 20, 30, 40]);
    }

    #[test]
    fn test_val_subsampling_stride_zero_treated_as_one() {
        let mut idx = SplitIndex::new(vec![], vec![5, 6, 7], vec![]).unwrap();
        idx.subsample_val(0, 10);
        assert_eq!(idx.val, vec![5, 6, 7]);
    }
}
