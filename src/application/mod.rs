// ============================================================
// Layer 2 — Application / Use Cases
// ============================================================
// Orchestrates the other layers for one goal each: training a
// run, or evaluating a saved checkpoint. Rules:
//   - no tensor math here
//   - no printing beyond the final report
//   - loading and validation are delegated to Layers 4 and 6;
//     this layer only sequences them

// The training workflow and the shared run configuration
pub mod train_use_case;

// The checkpoint-evaluation workflow
pub mod evaluate_use_case;
