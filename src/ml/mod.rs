// ============================================================
// Layer 5 — ML / Model Layer (burn)
// ============================================================
// All burn-specific modeling code lives here; the other layers
// only touch tensors through the batcher and this layer's public
// functions.
//
//   embedding.rs — the token-embedding capability: standard
//                  learned lookup, or the injection variant
//                  blending a frozen external table with a
//                  trainable one per token
//
//   model.rs     — the masked-LM encoder: embeddings, attention
//                  blocks, MLM head, masked cross-entropy
//
//   trainer.rs   — epoch loop, AdamW updates, baseline and
//                  per-epoch evaluation passes, checkpointing
//
//   evaluator.rs — frequency-stratified top-k accuracy over
//                  masked positions

/// Standard vs. injection token embeddings
pub mod embedding;

/// Masked-LM encoder architecture and loss
pub mod model;

/// Training loop and the shared evaluation pass
pub mod trainer;

/// Stratified accuracy metrics
pub mod evaluator;
