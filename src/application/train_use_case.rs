// ============================================================
// Layer 2 — TrainUseCase
// ============================================================
// Orchestrates one training run in order:
//
//   Step 1: Load diagnosis table + splits     (Layer 4 - data)
//   Step 2: Load tokenizer, resolve specials  (Layer 6 - infra)
//   Step 3: Validate mode / load embeddings   (Layer 6 - infra)
//   Step 4: Build datasets                    (Layer 4 - data)
//   Step 5: Frequency buckets + probe token   (Layer 4 - data)
//   Step 6: Save config, set up tracking      (Layer 6 - infra)
//   Step 7: Run the training loop             (Layer 5 - ml)
//
// Every fatal configuration error (injection without an
// embedding file, oversized embedding dim, resolution mismatch,
// unknown split ids, bad mask ratio) surfaces here or in the
// loaders it calls, before the first training step.

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use tokenizers::Tokenizer;

use crate::data::{
    batcher::MaskingPolicy,
    dataset::PatientSequenceDataset,
    frequency::{count_token_frequencies, default_bands, most_frequent_token, FrequencyBuckets},
    loader::{load_diagnosis_table, load_split_index},
    sequence::SequenceBuilder,
};
use crate::domain::patient::DiagnosisTable;
use crate::domain::split::SplitIndex;
use crate::infra::{
    checkpoint::CheckpointManager,
    embedding_store::{load_external_matrix, EmbeddingMatrix},
    metrics::{MetricsTracker, TrackingConfig},
    tokenizer_store::{SpecialTokens, TokenizerStore, SEP_TOKEN},
};
use crate::ml::evaluator::{StratifiedEvaluator, DEFAULT_TOPK};
use crate::ml::trainer::{run_training, TrainJob};

/// How the model looks tokens up: a standard learned table, or
/// the injection blend of external and trainable tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmbeddingMode {
    Base,
    Injection,
}

// ─── Run Configuration ───────────────────────────────────────────────────────
// All knobs of a run. Serialisable so the evaluate command can
// rebuild the exact same model from the checkpoint directory.
// `vocab_size` is filled in from the tokenizer at startup, not
// taken from the command line.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunConfig {
    pub mode:           EmbeddingMode,
    pub resolution:     String,
    pub data_dir:       String,
    pub checkpoint_dir: String,
    pub max_seq_len:    usize,
    pub batch_size:     usize,
    pub eval_batch_size: usize,
    pub epochs:         usize,
    pub lr:             f64,
    pub mask_ratio:     f64,
    pub d_model:        usize,
    pub num_heads:      usize,
    pub num_layers:     usize,
    pub d_ff:           usize,
    pub dropout:        f64,
    pub vocab_size:     usize,
    pub shuffle_in_visit: bool,
    pub embedding_file: Option<String>,
    pub embedding_dim:  Option<usize>,
    pub keep_training_external: bool,
    pub probe_code:     Option<String>,
    pub val_stride:     usize,
    pub val_limit:      usize,
    pub tracking:       bool,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            mode:           EmbeddingMode::Base,
            resolution:     "code".to_string(),
            data_dir:       "saved".to_string(),
            checkpoint_dir: "runs/bert-base".to_string(),
            max_seq_len:    512,
            batch_size:     48,
            eval_batch_size: 16,
            epochs:         100,
            lr:             1e-3,
            mask_ratio:     0.15,
            d_model:        192,
            num_heads:      4,
            num_layers:     4,
            d_ff:           1024,
            dropout:        0.1,
            vocab_size:     0,
            shuffle_in_visit: true,
            embedding_file: None,
            embedding_dim:  None,
            keep_training_external: false,
            probe_code:     None,
            val_stride:     10,
            val_limit:      1024,
            tracking:       true,
        }
    }
}

// ─── Prepared run state ──────────────────────────────────────────────────────
// Everything both use cases need after artifact loading and
// startup validation. Built once; all shared pieces are
// read-only from here on.
pub struct PreparedRun {
    pub table:       Arc<DiagnosisTable>,
    pub tokenizer:   Arc<Tokenizer>,
    pub special:     SpecialTokens,
    pub splits:      SplitIndex,
    pub external:    Option<EmbeddingMatrix>,
    pub policy:      MaskingPolicy,
    pub evaluator:   StratifiedEvaluator,
    pub probe_token: Option<u32>,
    pub vocab_size:  usize,
}

impl PreparedRun {
    /// Load every artifact and validate the configuration.
    pub fn load(cfg: &RunConfig) -> Result<PreparedRun> {
        if !(0.0..=1.0).contains(&cfg.mask_ratio) {
            bail!("mask ratio {} is outside [0, 1]", cfg.mask_ratio);
        }

        let data_dir = Path::new(&cfg.data_dir);

        // ── Step 1: diagnosis table + split ids ──────────────────────────────
        let table = Arc::new(load_diagnosis_table(data_dir, &cfg.resolution)?);
        let mut splits = load_split_index(data_dir)?;
        splits.subsample_val(cfg.val_stride, cfg.val_limit);

        // ── Step 2: tokenizer + reserved tokens ──────────────────────────────
        let tokenizer = TokenizerStore::new(data_dir).load(&cfg.resolution, cfg.max_seq_len)?;
        let special = SpecialTokens::resolve(&tokenizer)?;
        let vocab_size = tokenizer.get_vocab_size(true);

        // ── Step 3: embedding mode validation ────────────────────────────────
        let external = match cfg.mode {
            EmbeddingMode::Base => None,
            EmbeddingMode::Injection => {
                let file = cfg.embedding_file.as_deref().context(
                    "injection mode requires an embedding file (--embedding-file)",
                )?;
                Some(load_external_matrix(
                    Path::new(file),
                    &tokenizer,
                    cfg.d_model,
                    cfg.embedding_dim,
                )?)
            }
        };
        let tokenizer = Arc::new(tokenizer);

        // ── Step 5 prerequisites: reference-corpus statistics ────────────────
        // The validation split is the reference corpus: encode it
        // once, unshuffled, and derive the rarity buckets.
        let reference = PatientSequenceDataset::new(
            table.clone(),
            tokenizer.clone(),
            special.id_set(),
            splits.val.clone(),
            SequenceBuilder::new(SEP_TOKEN, false),
        )?;
        let counts = count_token_frequencies(&reference, vocab_size)?;
        let buckets = FrequencyBuckets::from_counts(&counts, &special.id_set(), default_bands())?;

        let probe_token = resolve_probe_token(cfg, &tokenizer, &counts, &special)?;

        let policy = MaskingPolicy::new(cfg.mask_ratio, special.mask, vocab_size as u32);
        let evaluator = StratifiedEvaluator::new(DEFAULT_TOPK.to_vec(), buckets);

        Ok(PreparedRun {
            table, tokenizer, special, splits, external,
            policy, evaluator, probe_token, vocab_size,
        })
    }

    /// A dataset over one phase's ids.
    pub fn dataset(&self, ids: Vec<u64>, shuffle_in_visit: bool) -> Result<PatientSequenceDataset> {
        PatientSequenceDataset::new(
            self.table.clone(),
            self.tokenizer.clone(),
            self.special.id_set(),
            ids,
            SequenceBuilder::new(SEP_TOKEN, shuffle_in_visit),
        )
    }
}

/// The mixing-coefficient probe: the configured code when given
/// (and present in the vocabulary — a typo is a startup error),
/// otherwise the most frequent content token of the reference
/// corpus. Base mode has no probe.
fn resolve_probe_token(
    cfg:       &RunConfig,
    tokenizer: &Tokenizer,
    counts:    &[u64],
    special:   &SpecialTokens,
) -> Result<Option<u32>> {
    if cfg.mode != EmbeddingMode::Injection {
        return Ok(None);
    }
    match &cfg.probe_code {
        Some(code) => {
            let id = tokenizer
                .token_to_id(code)
                .with_context(|| format!("probe code '{}' is not in the vocabulary", code))?;
            Ok(Some(id))
        }
        None => Ok(most_frequent_token(counts, &special.id_set())),
    }
}

// ─── TrainUseCase ─────────────────────────────────────────────────────────────
pub struct TrainUseCase {
    config: RunConfig,
}

impl TrainUseCase {
    pub fn new(config: RunConfig) -> Self {
        Self { config }
    }

    /// Execute the full training pipeline end to end.
    pub fn execute(&self) -> Result<()> {
        let mut cfg = self.config.clone();

        let prepared = PreparedRun::load(&cfg)?;
        cfg.vocab_size = prepared.vocab_size;

        // ── Step 4: datasets ─────────────────────────────────────────────────
        // In-visit shuffling applies to the train phase only; the
        // evaluation split must encode identically on every pass.
        let train_dataset = prepared.dataset(prepared.splits.train.clone(), cfg.shuffle_in_visit)?;
        let val_dataset   = prepared.dataset(prepared.splits.val.clone(), false)?;
        tracing::info!(
            "Datasets ready: {} train, {} val patients",
            prepared.splits.train.len(),
            prepared.splits.val.len()
        );

        // ── Step 6: persistence + tracking ───────────────────────────────────
        let ckpt_manager = CheckpointManager::new(&cfg.checkpoint_dir);
        ckpt_manager.save_config(&cfg)?;
        let tracker = MetricsTracker::new(TrackingConfig {
            enabled: cfg.tracking,
            dir:     cfg.checkpoint_dir.clone().into(),
        })?;

        // ── Step 7: hand off to the training loop ────────────────────────────
        run_training(&cfg, TrainJob {
            train_dataset,
            val_dataset,
            policy:       prepared.policy,
            evaluator:    prepared.evaluator,
            external:     prepared.external,
            probe_token:  prepared.probe_token,
            tracker,
            ckpt_manager,
        })
    }
}
