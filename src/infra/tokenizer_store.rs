// ============================================================
// Layer 6 — Tokenizer Store
// ============================================================
// Loads the pre-built tokenizer artifact for one code resolution
// and configures it for fixed-length encoding:
//
//   {data_dir}/tokenizers/{resolution}/tokenizer.json
//
// Tokenizer *training* happens upstream of this system; the
// store only loads. Truncation is tail-drop at max_seq_len and
// padding is fixed-length right-padding with [PAD], so every
// encoding comes back exactly max_seq_len long.
//
// The five BERT-convention special tokens must all resolve in
// the loaded vocabulary; a missing one is a startup-time fatal
// error.

use anyhow::{Context, Result};
use std::collections::HashSet;
use std::path::Path;
use tokenizers::{
    PaddingDirection, PaddingParams, PaddingStrategy, Tokenizer, TruncationDirection,
    TruncationParams, TruncationStrategy,
};

pub const PAD_TOKEN:  &str = "[PAD]";
pub const UNK_TOKEN:  &str = "[UNK]";
pub const CLS_TOKEN:  &str = "[CLS]";
pub const SEP_TOKEN:  &str = "[SEP]";
pub const MASK_TOKEN: &str = "[MASK]";

/// Resolved ids of the reserved tokens.
#[derive(Debug, Clone, Copy)]
pub struct SpecialTokens {
    pub pad:  u32,
    pub unk:  u32,
    pub cls:  u32,
    pub sep:  u32,
    pub mask: u32,
}

impl SpecialTokens {
    pub fn resolve(tokenizer: &Tokenizer) -> Result<Self> {
        let id = |token: &str| {
            tokenizer
                .token_to_id(token)
                .with_context(|| format!("tokenizer vocabulary is missing the {token} token"))
        };
        Ok(Self {
            pad:  id(PAD_TOKEN)?,
            unk:  id(UNK_TOKEN)?,
            cls:  id(CLS_TOKEN)?,
            sep:  id(SEP_TOKEN)?,
            mask: id(MASK_TOKEN)?,
        })
    }

    /// The ids excluded from masking and from frequency
    /// statistics.
    pub fn id_set(&self) -> HashSet<u32> {
        [self.pad, self.unk, self.cls, self.sep, self.mask]
            .into_iter()
            .collect()
    }
}

pub struct TokenizerStore {
    data_dir: std::path::PathBuf,
}

impl TokenizerStore {
    pub fn new(data_dir: impl Into<std::path::PathBuf>) -> Self {
        Self { data_dir: data_dir.into() }
    }

    /// Load the tokenizer for `resolution`, configured for
    /// fixed-length encoding at `max_seq_len`.
    pub fn load(&self, resolution: &str, max_seq_len: usize) -> Result<Tokenizer> {
        let path = self
            .data_dir
            .join("tokenizers")
            .join(resolution)
            .join("tokenizer.json");

        let tokenizer = Tokenizer::from_file(&path).map_err(|e| {
            anyhow::anyhow!("Cannot load tokenizer from '{}': {}", path.display(), e)
        })?;

        tracing::info!(
            "Loaded tokenizer '{}' ({} tokens)",
            path.display(),
            tokenizer.get_vocab_size(true)
        );
        configure_fixed_length(tokenizer, max_seq_len)
    }
}

/// Apply tail-drop truncation and fixed right-padding so every
/// encoding is exactly `max_seq_len` ids long.
pub fn configure_fixed_length(mut tokenizer: Tokenizer, max_seq_len: usize) -> Result<Tokenizer> {
    let pad_id = tokenizer
        .token_to_id(PAD_TOKEN)
        .with_context(|| format!("tokenizer vocabulary is missing the {PAD_TOKEN} token"))?;

    tokenizer
        .with_truncation(Some(TruncationParams {
            max_length: max_seq_len,
            strategy:   TruncationStrategy::LongestFirst,
            direction:  TruncationDirection::Right,
            stride:     0,
        }))
        .map_err(|e| anyhow::anyhow!("invalid truncation params: {}", e))?;

    tokenizer.with_padding(Some(PaddingParams {
        strategy:           PaddingStrategy::Fixed(max_seq_len),
        direction:          PaddingDirection::Right,
        pad_to_multiple_of: None,
        pad_id,
        pad_type_id:        0,
        pad_token:          PAD_TOKEN.to_string(),
    }));

    Ok(tokenizer)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::testutil::test_tokenizer;

    #[test]
    fn test_special_tokens_resolve() {
        let tokenizer = test_tokenizer(8);
        let special = SpecialTokens::resolve(&tokenizer).unwrap();
        assert_eq!(special.pad, 0);
        assert_eq!(special.mask, 4);
        assert_eq!(special.id_set().len(), 5);
    }

    #[test]
    fn test_fixed_length_encoding() {
        let tokenizer = test_tokenizer(6);
        let enc = tokenizer.encode("A01 B02", true).unwrap();
        assert_eq!(enc.get_ids().len(), 6);

        let enc = tokenizer
            .encode("A01 B02 C03 D04 E05 F06 G07 H08", true)
            .unwrap();
        // Tail-drop: the head of the sequence survives.
        assert_eq!(enc.get_ids().len(), 6);
        assert_eq!(enc.get_ids()[0], 5);
    }
}
