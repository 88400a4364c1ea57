// ============================================================
// Layer 6 — Infrastructure Layer
// ============================================================
// Cross-cutting concerns shared by the other layers:
//
//   checkpoint.rs      — model weights + run config persistence
//                        via burn's CompactRecorder
//
//   metrics.rs         — evaluation metrics CSV, behind an
//                        explicit TrackingConfig
//
//   tokenizer_store.rs — loads the pre-built tokenizer artifact
//                        and resolves the reserved token ids
//
//   embedding_store.rs — loads and normalizes the external
//                        code-embedding table for injection mode

/// Model checkpoint and run-config persistence
pub mod checkpoint;

/// Evaluation metrics tracking
pub mod metrics;

/// Tokenizer artifact loading
pub mod tokenizer_store;

/// External embedding table loading
pub mod embedding_store;
