// ============================================================
// Layer 1 — CLI Commands and Arguments
// ============================================================
// Defines the two subcommands: `train` and `evaluate`, and every
// configurable flag. Defaults follow the reference training
// setup for this model family.

use clap::{Args, Subcommand, ValueEnum};
use crate::application::train_use_case::{EmbeddingMode, RunConfig};

/// The two top-level subcommands available to the user
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Train the masked diagnosis-code language model
    Train(TrainArgs),

    /// Score a trained checkpoint on the test split
    Evaluate(EvaluateArgs),
}

/// Token-embedding variant, fixed at model construction.
#[derive(ValueEnum, Debug, Clone, Copy)]
pub enum ModeArg {
    /// Standard learned embedding table
    Base,
    /// Blend pretrained code embeddings with a trainable table
    Injection,
}

impl From<ModeArg> for EmbeddingMode {
    fn from(m: ModeArg) -> Self {
        match m {
            ModeArg::Base      => EmbeddingMode::Base,
            ModeArg::Injection => EmbeddingMode::Injection,
        }
    }
}

/// All arguments for the `train` command.
#[derive(Args, Debug)]
pub struct TrainArgs {
    /// Embedding mode: base or injection
    #[arg(long, value_enum, default_value_t = ModeArg::Base)]
    pub mode: ModeArg,

    /// Code resolution: selects which diagnosis table and
    /// tokenizer variant to load (e.g. "code", "category")
    #[arg(long, default_value = "code")]
    pub resolution: String,

    /// Directory holding the diagnosis table, tokenizers and
    /// split files
    #[arg(long, default_value = "saved")]
    pub data_dir: String,

    /// Directory for checkpoints, config and metrics; defaults
    /// to runs/bert-{mode}
    #[arg(long)]
    pub checkpoint_dir: Option<String>,

    /// Maximum tokens per patient sequence
    #[arg(long, default_value_t = 512)]
    pub max_seq_len: usize,

    /// Training batch size
    #[arg(long, default_value_t = 48)]
    pub batch_size: usize,

    /// Evaluation batch size
    #[arg(long, default_value_t = 16)]
    pub eval_batch_size: usize,

    /// Number of full passes through the training split
    #[arg(long, default_value_t = 100)]
    pub epochs: usize,

    /// Learning rate
    #[arg(long, default_value_t = 1e-3)]
    pub lr: f64,

    /// Fraction of content tokens selected for the masking
    /// objective
    #[arg(long, default_value_t = 0.15)]
    pub mask_ratio: f64,

    /// Hidden dimension of the encoder
    #[arg(long, default_value_t = 192)]
    pub hidden_size: usize,

    /// Number of attention heads
    #[arg(long, default_value_t = 4)]
    pub heads: usize,

    /// Number of stacked encoder layers
    #[arg(long, default_value_t = 4)]
    pub layers: usize,

    /// Inner dimension of the feed-forward network
    #[arg(long, default_value_t = 1024)]
    pub d_ff: usize,

    /// Dropout probability
    #[arg(long, default_value_t = 0.1)]
    pub dropout: f64,

    /// Keep visit codes in recorded order even during training
    #[arg(long, default_value_t = false)]
    pub disable_visit_shuffle: bool,

    /// Pretrained code-embedding JSON, required in injection mode
    #[arg(long)]
    pub embedding_file: Option<String>,

    /// Expected dimensionality of the embedding file; checked
    /// against the file at startup
    #[arg(long)]
    pub embedding_dim: Option<usize>,

    /// Let gradients update the external embedding table too
    #[arg(long, default_value_t = false)]
    pub keep_training_external: bool,

    /// Code whose mixing coefficient is reported each pass;
    /// defaults to the most frequent code
    #[arg(long)]
    pub probe_code: Option<String>,

    /// Keep every n-th validation id
    #[arg(long, default_value_t = 10)]
    pub val_stride: usize,

    /// Cap on validation ids after striding
    #[arg(long, default_value_t = 1024)]
    pub val_limit: usize,

    /// Disable the metrics CSV
    #[arg(long, default_value_t = false)]
    pub no_tracking: bool,
}

/// Convert CLI TrainArgs into the application-layer RunConfig.
/// This is the boundary between Layer 1 and Layer 2 —
/// the application layer never sees clap types.
impl From<TrainArgs> for RunConfig {
    fn from(a: TrainArgs) -> Self {
        let mode: EmbeddingMode = a.mode.into();
        let checkpoint_dir = a.checkpoint_dir.unwrap_or_else(|| {
            let tag = match mode {
                EmbeddingMode::Base      => "base",
                EmbeddingMode::Injection => "injection",
            };
            format!("runs/bert-{tag}")
        });
        RunConfig {
            mode,
            resolution:     a.resolution,
            data_dir:       a.data_dir,
            checkpoint_dir,
            max_seq_len:    a.max_seq_len,
            batch_size:     a.batch_size,
            eval_batch_size: a.eval_batch_size,
            epochs:         a.epochs,
            lr:             a.lr,
            mask_ratio:     a.mask_ratio,
            d_model:        a.hidden_size,
            num_heads:      a.heads,
            num_layers:     a.layers,
            d_ff:           a.d_ff,
            dropout:        a.dropout,
            vocab_size:     0, // resolved from the tokenizer at startup
            shuffle_in_visit: !a.disable_visit_shuffle,
            embedding_file: a.embedding_file,
            embedding_dim:  a.embedding_dim,
            keep_training_external: a.keep_training_external,
            probe_code:     a.probe_code,
            val_stride:     a.val_stride,
            val_limit:      a.val_limit,
            tracking:       !a.no_tracking,
        }
    }
}

/// All arguments for the `evaluate` command
#[derive(Args, Debug)]
pub struct EvaluateArgs {
    /// Checkpoint directory written by a previous `train` run
    #[arg(long, default_value = "runs/bert-base")]
    pub checkpoint_dir: String,
}
