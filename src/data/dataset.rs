// ============================================================
// Layer 4 — Patient Sequence Dataset
// ============================================================
// Implements burn's Dataset trait over an ordered list of
// patient ids. Each access:
//
//   1. looks up the patient's visits in the shared table
//   2. builds the token sequence (fresh in-visit shuffle per
//      access when enabled, so every epoch sees new permutations)
//   3. encodes with the tokenizer: fixed-length padding and
//      tail-drop truncation to max_seq_len
//
// Length is exactly the number of ids, for every epoch. Every id
// is validated against the table at construction — Dataset::get
// returns Option and cannot surface a lookup error per index, so
// a split id missing from the table fails the run up front
// instead of silently shrinking the dataset.
//
// The special mask is computed by id membership (every occurrence
// of a reserved token counts, including separators inside the
// sequence), matching what the masking collator must never touch.
//
// All shared state (table, tokenizer, special ids) is read-only
// behind Arc, so concurrent access from data-loader workers is
// safe.

use anyhow::{bail, Result};
use burn::data::dataset::Dataset;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use tokenizers::Tokenizer;

use crate::data::sequence::SequenceBuilder;
use crate::domain::patient::{DiagnosisTable, PatientId};

/// One tokenized, fixed-length sample.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IcdSample {
    /// Token ids, padded/truncated to max_seq_len
    pub input_ids: Vec<u32>,

    /// 1 = real token, 0 = padding
    pub attention_mask: Vec<u32>,

    /// 1 = reserved token ([PAD]/[UNK]/[CLS]/[SEP]/[MASK]),
    /// 0 = content. The masking collator never selects special
    /// positions.
    pub special_mask: Vec<u32>,
}

#[derive(Debug)]
pub struct PatientSequenceDataset {
    table:       Arc<DiagnosisTable>,
    tokenizer:   Arc<Tokenizer>,
    special_ids: HashSet<u32>,
    ids:         Vec<PatientId>,
    builder:     SequenceBuilder,
}

impl PatientSequenceDataset {
    /// Build a dataset over `ids`. The tokenizer must already be
    /// configured for fixed-length padding and truncation (see
    /// infra::tokenizer_store). Fails if any id is absent from
    /// the diagnosis table.
    pub fn new(
        table:       Arc<DiagnosisTable>,
        tokenizer:   Arc<Tokenizer>,
        special_ids: HashSet<u32>,
        ids:         Vec<PatientId>,
        builder:     SequenceBuilder,
    ) -> Result<Self> {
        for id in &ids {
            if !table.contains(*id) {
                bail!("patient id {} is in the split but not in the diagnosis table", id);
            }
        }
        Ok(Self { table, tokenizer, special_ids, ids, builder })
    }

    pub fn patient_ids(&self) -> &[PatientId] {
        &self.ids
    }

    /// Encode one patient id. Used by Dataset::get and by the
    /// frequency-count pass over the reference corpus.
    pub fn encode_patient(&self, id: PatientId) -> Result<IcdSample> {
        // Ids were validated at construction; a miss here means the
        // table was swapped out from under us, which cannot happen
        // through this type's API.
        let visits = match self.table.visits(id) {
            Some(v) => v,
            None => bail!("patient id {} vanished from the diagnosis table", id),
        };

        let text = self.builder.build_text(visits, &mut rand::thread_rng());
        let encoding = self
            .tokenizer
            .encode(text, true)
            .map_err(|e| anyhow::anyhow!("tokenizer failed on patient {}: {}", id, e))?;

        let special_mask = encoding
            .get_ids()
            .iter()
            .map(|id| u32::from(self.special_ids.contains(id)))
            .collect();

        Ok(IcdSample {
            input_ids:      encoding.get_ids().to_vec(),
            attention_mask: encoding.get_attention_mask().to_vec(),
            special_mask,
        })
    }
}

impl Dataset<IcdSample> for PatientSequenceDataset {
    fn get(&self, index: usize) -> Option<IcdSample> {
        let id = *self.ids.get(index)?;
        match self.encode_patient(id) {
            Ok(sample) => Some(sample),
            Err(e) => {
                tracing::error!("dropping sample at index {}: {:#}", index, e);
                None
            }
        }
    }

    fn len(&self) -> usize {
        self.ids.len()
    }
}
