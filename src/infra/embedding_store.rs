// ============================================================
// Layer 6 — External Embedding Store
// ============================================================
// Loads the pretrained code-embedding table used by injection
// mode: a JSON map from diagnosis-code string to vector.
//
// Pipeline, all at startup:
//   1. load and uppercase the keys (codes are matched
//      case-insensitively against the vocabulary)
//   2. reject ragged vectors, and vectors wider than the model —
//      wider cannot be represented without silent truncation
//   3. normalize each dimension to zero mean / unit variance
//      across the table
//   4. lay the vectors into a [vocab_size, d_model] matrix in
//      vocabulary-id order; tokens without a match get a zero
//      row, narrower vectors are zero-padded on the right

use anyhow::{bail, Context, Result};
use burn::prelude::*;
use std::collections::HashMap;
use std::fs;
use std::path::Path;
use tokenizers::Tokenizer;

/// A vocabulary-aligned embedding matrix, row per token id.
#[derive(Debug, Clone)]
pub struct EmbeddingMatrix {
    data:       Vec<f32>,
    vocab_size: usize,
    d_model:    usize,
}

impl EmbeddingMatrix {
    pub fn vocab_size(&self) -> usize {
        self.vocab_size
    }

    pub fn row(&self, id: usize) -> &[f32] {
        &self.data[id * self.d_model..(id + 1) * self.d_model]
    }

    pub fn to_tensor<B: Backend>(&self, device: &B::Device) -> Tensor<B, 2> {
        Tensor::<B, 1>::from_floats(self.data.as_slice(), device)
            .reshape([self.vocab_size, self.d_model])
    }
}

/// Load, normalize, and vocabulary-align the embedding file.
///
/// `expected_dim`, when configured, must match the vectors in the
/// file exactly; either way the vector width must not exceed
/// `d_model`.
pub fn load_external_matrix(
    path:         &Path,
    tokenizer:    &Tokenizer,
    d_model:      usize,
    expected_dim: Option<usize>,
) -> Result<EmbeddingMatrix> {
    let table = load_table(path)?;
    let dim = table_dim(&table, path)?;

    if let Some(expected) = expected_dim {
        if dim != expected {
            bail!(
                "embedding file '{}' has dimension {} but --embedding-dim {} was configured",
                path.display(), dim, expected
            );
        }
    }
    if dim > d_model {
        bail!(
            "embedding dimension {} exceeds the model hidden size {}; refusing to truncate",
            dim, d_model
        );
    }

    let table = normalize_per_dimension(table, dim);
    Ok(build_matrix(&table, dim, tokenizer, d_model))
}

fn load_table(path: &Path) -> Result<HashMap<String, Vec<f32>>> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("Cannot read embedding file '{}'", path.display()))?;
    let parsed: HashMap<String, Vec<f32>> = serde_json::from_str(&raw)
        .with_context(|| format!("Malformed embedding file '{}'", path.display()))?;

    let mut table = HashMap::with_capacity(parsed.len());
    for (code, vector) in parsed {
        table.insert(code.to_uppercase(), vector);
    }
    Ok(table)
}

fn table_dim(table: &HashMap<String, Vec<f32>>, path: &Path) -> Result<usize> {
    let mut dims = table.values().map(|v| v.len());
    let dim = match dims.next() {
        Some(d) => d,
        None => bail!("embedding file '{}' is empty", path.display()),
    };
    if dims.any(|d| d != dim) {
        bail!("embedding file '{}' has ragged vector lengths", path.display());
    }
    Ok(dim)
}

/// Zero mean / unit variance per dimension across all entries.
/// A constant dimension is centered but left unscaled.
fn normalize_per_dimension(
    mut table: HashMap<String, Vec<f32>>,
    dim:       usize,
) -> HashMap<String, Vec<f32>> {
    let n = table.len() as f32;

    let mut mean = vec![0.0f32; dim];
    for vector in table.values() {
        for (m, v) in mean.iter_mut().zip(vector) {
            *m += v / n;
        }
    }

    let mut var = vec![0.0f32; dim];
    for vector in table.values() {
        for ((s, v), m) in var.iter_mut().zip(vector).zip(&mean) {
            *s += (v - m) * (v - m) / n;
        }
    }

    let std: Vec<f32> = var
        .iter()
        .map(|&v| if v > f32::EPSILON { v.sqrt() } else { 1.0 })
        .collect();

    for vector in table.values_mut() {
        for ((v, m), s) in vector.iter_mut().zip(&mean).zip(&std) {
            *v = (*v - m) / s;
        }
    }
    table
}

fn build_matrix(
    table:     &HashMap<String, Vec<f32>>,
    dim:       usize,
    tokenizer: &Tokenizer,
    d_model:   usize,
) -> EmbeddingMatrix {
    let vocab = tokenizer.get_vocab(true);
    let vocab_size = tokenizer.get_vocab_size(true);

    let mut data = vec![0.0f32; vocab_size * d_model];
    let mut matched = 0usize;
    for (token, id) in &vocab {
        if let Some(vector) = table.get(&token.to_uppercase()) {
            let row = *id as usize * d_model;
            data[row..row + dim].copy_from_slice(vector);
            matched += 1;
        }
    }

    tracing::info!(
        "External embeddings: {} of {} vocabulary tokens matched (dim {} in width {})",
        matched, vocab_size, dim, d_model
    );

    EmbeddingMatrix { data, vocab_size, d_model }
}
