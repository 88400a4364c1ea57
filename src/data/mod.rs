// ============================================================
// Layer 4 — Data Pipeline
// ============================================================
// From on-disk artifacts to GPU-ready masked batches:
//
//   diagnoses.{res}.json / splits/*.txt
//       │
//       ▼
//   loader            → DiagnosisTable + SplitIndex
//       │
//       ▼
//   SequenceBuilder   → visit history → token sequence
//       │
//       ▼
//   PatientSequenceDataset → fixed-length tokenized samples
//       │
//       ▼
//   MlmBatcher        → dynamic masking + tensor batches
//       │
//       ▼
//   DataLoader        → feeds the training loop
//
// frequency.rs sits beside the pipeline: it derives the rarity
// buckets the evaluator stratifies over, from one pass across
// the validation split.

/// Diagnosis table and split id-file loading
pub mod loader;

/// Visit history → token sequence (shuffling, separators)
pub mod sequence;

/// Burn Dataset over patient ids
pub mod dataset;

/// Masking policy and burn Batcher for MLM batches
pub mod batcher;

/// Rarity bands over reference-corpus token counts
pub mod frequency;

#[cfg(test)]
pub(crate) mod testutil {
    // Shared fixtures: a tiny WordLevel tokenizer in the same
    // HF-JSON shape as the real artifact, and a small diagnosis
    // table covering the edge cases the data tests exercise.

    use std::collections::HashMap;
    use std::str::FromStr;
    use tokenizers::Tokenizer;

    use crate::domain::patient::DiagnosisTable;
    use crate::infra::tokenizer_store::configure_fixed_length;

    pub const CODES: [&str; 8] = ["A01", "B02", "C03", "D04", "E05", "F06", "G07", "H08"];

    /// Special ids of the test vocabulary: [PAD]=0 [UNK]=1 [CLS]=2
    /// [SEP]=3 [MASK]=4, content codes from 5 up.
    pub fn special_ids() -> std::collections::HashSet<u32> {
        [0u32, 1, 2, 3, 4].into_iter().collect()
    }

    pub fn test_tokenizer(max_len: usize) -> Tokenizer {
        let mut vocab = serde_json::json!({
            "[PAD]": 0, "[UNK]": 1, "[CLS]": 2, "[SEP]": 3, "[MASK]": 4,
        });
        for (i, code) in CODES.iter().enumerate() {
            vocab[*code] = serde_json::json!(5 + i);
        }

        let tokenizer_json = serde_json::json!({
            "version": "1.0",
            "truncation": null,
            "padding": null,
            "added_tokens": [
                {"id": 0, "content": "[PAD]",  "single_word": false, "lstrip": false, "rstrip": false, "normalized": false, "special": true},
                {"id": 1, "content": "[UNK]",  "single_word": false, "lstrip": false, "rstrip": false, "normalized": false, "special": true},
                {"id": 2, "content": "[CLS]",  "single_word": false, "lstrip": false, "rstrip": false, "normalized": false, "special": true},
                {"id": 3, "content": "[SEP]",  "single_word": false, "lstrip": false, "rstrip": false, "normalized": false, "special": true},
                {"id": 4, "content": "[MASK]", "single_word": false, "lstrip": false, "rstrip": false, "normalized": false, "special": true}
            ],
            "normalizer": null,
            "pre_tokenizer": { "type": "Whitespace" },
            "post_processor": null,
            "decoder": null,
            "model": {
                "type": "WordLevel",
                "vocab": vocab,
                "unk_token": "[UNK]"
            }
        });

        let tokenizer = Tokenizer::from_str(&tokenizer_json.to_string()).unwrap();
        configure_fixed_length(tokenizer, max_len).unwrap()
    }

    /// Patients 1 and 2: two visits of two codes each. Patient 3:
    /// a single long visit, for truncation tests. Patient 4: one
    /// visit of one code, for single-masked-position tests.
    pub fn test_table() -> DiagnosisTable {
        let mut patients = HashMap::new();
        patients.insert(
            1u64,
            vec![
                vec!["A01".to_string(), "B02".to_string()],
                vec!["C03".to_string(), "D04".to_string()],
            ],
        );
        patients.insert(
            2u64,
            vec![
                vec!["B02".to_string(), "C03".to_string()],
                vec!["D04".to_string(), "A01".to_string()],
            ],
        );
        patients.insert(
            3u64,
            vec![CODES.iter().map(|c| c.to_string()).collect()],
        );
        patients.insert(4u64, vec![vec!["E05".to_string()]]);
        DiagnosisTable {
            resolution: "code".to_string(),
            patients,
        }
    }
}
