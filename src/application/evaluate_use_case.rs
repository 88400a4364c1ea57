// ============================================================
// Layer 2 — EvaluateUseCase
// ============================================================
// Scores a trained checkpoint on the held-out test split:
//
//   Step 1: Read run_config.json from the checkpoint dir
//   Step 2: Reload artifacts exactly as training did (same
//           resolution, same buckets from the validation
//           reference corpus)
//   Step 3: Rebuild the model architecture — including the
//           injection table when the run used it — and load the
//           saved weights
//   Step 4: One evaluation pass over the test split, metrics to
//           stdout
//
// Runs on the plain (non-autodiff) backend: no gradients, no
// dropout.

use anyhow::Result;
use burn::data::dataloader::DataLoaderBuilder;

use crate::application::train_use_case::PreparedRun;
use crate::data::batcher::MlmBatcher;
use crate::infra::checkpoint::CheckpointManager;
use crate::ml::trainer::{build_model, run_eval_pass};

type EvalBackend = burn::backend::Wgpu;

pub struct EvaluateUseCase {
    checkpoint_dir: String,
}

impl EvaluateUseCase {
    pub fn new(checkpoint_dir: impl Into<String>) -> Self {
        Self { checkpoint_dir: checkpoint_dir.into() }
    }

    pub fn execute(&self) -> Result<()> {
        // ── Step 1: run configuration ────────────────────────────────────────
        let ckpt_manager = CheckpointManager::new(&self.checkpoint_dir);
        let cfg = ckpt_manager.load_config()?;
        tracing::info!(
            "Evaluating checkpoint '{}' (mode {:?}, resolution '{}')",
            self.checkpoint_dir, cfg.mode, cfg.resolution,
        );

        // ── Step 2: artifacts and test dataset ───────────────────────────────
        let prepared = PreparedRun::load(&cfg)?;
        let test_dataset = prepared.dataset(prepared.splits.test.clone(), false)?;
        tracing::info!("Test split: {} patients", prepared.splits.test.len());

        // ── Step 3: model + weights ──────────────────────────────────────────
        let device = burn::backend::wgpu::WgpuDevice::default();
        let model = build_model::<EvalBackend>(&cfg, prepared.external.as_ref(), &device);
        let model = ckpt_manager.load_model(model, &device)?;

        // ── Step 4: evaluation pass ──────────────────────────────────────────
        let batcher = MlmBatcher::<EvalBackend>::new(prepared.policy.clone(), device);
        let loader = DataLoaderBuilder::new(batcher)
            .batch_size(cfg.eval_batch_size)
            .num_workers(1)
            .build(test_dataset);

        let (test_loss, metrics) =
            run_eval_pass(&model, &loader, &prepared.evaluator, prepared.probe_token)?;

        println!("test_loss: {test_loss:.4}");
        for (name, value) in &metrics {
            println!("{name}: {value:.4}");
        }
        Ok(())
    }
}
