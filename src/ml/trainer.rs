// ============================================================
// Layer 5 — Training Loop
// ============================================================
// Full train + evaluation loop using burn's DataLoader and AdamW.
//
// Key backend split:
//   - Training uses MyBackend (Autodiff<Wgpu>) for gradients
//   - model.valid() returns the model on MyInnerBackend (Wgpu)
//   - Evaluation batchers run on MyInnerBackend, no autodiff
//     overhead, dropout disabled
//
// The loop evaluates once before the first epoch (so the metrics
// log starts from the untrained baseline), then alternates one
// training epoch with one full evaluation pass. Masking is drawn
// fresh by the batcher on every batch of both phases.

use anyhow::Result;
use burn::{
    data::dataloader::{DataLoader, DataLoaderBuilder},
    module::AutodiffModule,
    optim::{AdamWConfig, GradientsParams, Optimizer},
    prelude::*,
};
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::application::train_use_case::{EmbeddingMode, RunConfig};
use crate::data::batcher::{MaskingPolicy, MlmBatch, MlmBatcher};
use crate::data::dataset::PatientSequenceDataset;
use crate::infra::checkpoint::CheckpointManager;
use crate::infra::embedding_store::EmbeddingMatrix;
use crate::infra::metrics::MetricsTracker;
use crate::ml::evaluator::StratifiedEvaluator;
use crate::ml::model::{masked_cross_entropy, IcdBertConfig, IcdBertModel};

type MyBackend      = burn::backend::Autodiff<burn::backend::Wgpu>;
type MyInnerBackend = burn::backend::Wgpu;

/// Everything the loop needs beyond the run configuration.
pub struct TrainJob {
    pub train_dataset: PatientSequenceDataset,
    pub val_dataset:   PatientSequenceDataset,
    pub policy:        MaskingPolicy,
    pub evaluator:     StratifiedEvaluator,
    pub external:      Option<EmbeddingMatrix>,
    pub probe_token:   Option<u32>,
    pub tracker:       MetricsTracker,
    pub ckpt_manager:  CheckpointManager,
}

pub fn run_training(cfg: &RunConfig, job: TrainJob) -> Result<()> {
    let device = burn::backend::wgpu::WgpuDevice::default();
    tracing::info!("Using WGPU device: {:?}", device);
    train_loop(cfg, job, device)
}

/// Build the model for a run: standard lookup or injection,
/// selected once here.
pub fn build_model<B: Backend>(
    cfg:      &RunConfig,
    external: Option<&EmbeddingMatrix>,
    device:   &B::Device,
) -> IcdBertModel<B> {
    let model_cfg = IcdBertConfig::new(
        cfg.vocab_size, cfg.max_seq_len, cfg.d_model,
        cfg.num_heads, cfg.num_layers, cfg.d_ff, cfg.dropout,
    );
    match (cfg.mode, external) {
        (EmbeddingMode::Injection, Some(matrix)) => model_cfg.init_with_injection(
            matrix.to_tensor::<B>(device),
            cfg.keep_training_external,
            device,
        ),
        // Injection without a matrix is rejected at startup.
        _ => model_cfg.init(device),
    }
}

fn train_loop(
    cfg:    &RunConfig,
    job:    TrainJob,
    device: burn::backend::wgpu::WgpuDevice,
) -> Result<()> {
    let TrainJob {
        train_dataset, val_dataset, policy, evaluator,
        external, probe_token, tracker, ckpt_manager,
    } = job;

    // ── Build model ───────────────────────────────────────────────────────────
    let mut model: IcdBertModel<MyBackend> = build_model(cfg, external.as_ref(), &device);
    tracing::info!(
        "Model ready: {} layers, d_model={}, vocab={}, mode={:?}",
        cfg.num_layers, cfg.d_model, cfg.vocab_size, cfg.mode,
    );

    // ── AdamW optimiser ───────────────────────────────────────────────────────
    let optim_cfg = AdamWConfig::new().with_epsilon(1e-8);
    let mut optim = optim_cfg.init();

    // ── Training data loader (AutodiffBackend) ────────────────────────────────
    let train_batcher = MlmBatcher::<MyBackend>::new(policy.clone(), device.clone());
    let train_loader  = DataLoaderBuilder::new(train_batcher)
        .batch_size(cfg.batch_size)
        .shuffle(42)
        .num_workers(1)
        .build(train_dataset);

    // ── Evaluation data loader (InnerBackend) ─────────────────────────────────
    let val_batcher = MlmBatcher::<MyInnerBackend>::new(policy, device.clone());
    let val_loader  = DataLoaderBuilder::new(val_batcher)
        .batch_size(cfg.eval_batch_size)
        .num_workers(1)
        .build(val_dataset);

    // ── Baseline evaluation before any update ─────────────────────────────────
    {
        let model_valid = model.valid();
        let (val_loss, metrics) =
            run_eval_pass(&model_valid, &val_loader, &evaluator, probe_token)?;
        report_pass(0, cfg.epochs, f64::NAN, val_loss, &metrics);
        tracker.log_pass(0, f64::NAN, val_loss, &metrics)?;
    }

    // ── Epoch loop ────────────────────────────────────────────────────────────
    for epoch in 1..=cfg.epochs {
        let mut train_loss_sum = 0.0f64;
        let mut train_batches  = 0usize;

        for batch in train_loader.iter() {
            let (loss, _) = model.forward_loss(
                batch.input_ids,
                batch.attention_mask,
                batch.labels,
            );

            let loss_val: f64 = loss.clone().into_scalar().elem::<f64>();
            train_loss_sum += loss_val;
            train_batches  += 1;

            // Backward pass + AdamW update
            let grads = loss.backward();
            let grads = GradientsParams::from_grads(grads, &model);
            model = optim.step(cfg.lr, model, grads);
        }

        let avg_train_loss = if train_batches > 0 {
            train_loss_sum / train_batches as f64
        } else { f64::NAN };

        // ── Evaluation pass ───────────────────────────────────────────────────
        // model.valid() → IcdBertModel<MyInnerBackend>
        let model_valid = model.valid();
        let (val_loss, metrics) =
            run_eval_pass(&model_valid, &val_loader, &evaluator, probe_token)?;

        report_pass(epoch, cfg.epochs, avg_train_loss, val_loss, &metrics);
        tracker.log_pass(epoch, avg_train_loss, val_loss, &metrics)?;

        ckpt_manager.save_model(&model, epoch)?;
        tracing::debug!("Checkpoint saved for epoch {}", epoch);
    }

    // ── Final snapshot at the fixed path ──────────────────────────────────────
    ckpt_manager.save_final(&model)?;
    tracing::info!("Training complete!");
    Ok(())
}

/// One full pass over an evaluation loader: average masked loss
/// plus the stratified metric map.
pub fn run_eval_pass<B: Backend>(
    model:       &IcdBertModel<B>,
    loader:      &Arc<dyn DataLoader<MlmBatch<B>>>,
    evaluator:   &StratifiedEvaluator,
    probe_token: Option<u32>,
) -> Result<(f64, BTreeMap<String, f64>)> {
    let mut loss_sum = 0.0f64;
    let mut batches  = 0usize;
    let mut counts   = evaluator.empty_counts();

    for batch in loader.iter() {
        let logits = model.forward(batch.input_ids, batch.attention_mask);
        let loss   = masked_cross_entropy(logits.clone(), batch.labels.clone());

        loss_sum += loss.into_scalar().elem::<f64>();
        batches  += 1;
        counts.merge(&evaluator.evaluate_batch(logits, batch.labels)?);
    }

    let avg_loss = if batches > 0 { loss_sum / batches as f64 } else { f64::NAN };
    let probe = probe_token.and_then(|t| model.probe_coefficient(t));
    Ok((avg_loss, evaluator.finalize(&counts, probe)))
}

fn report_pass(
    epoch:      usize,
    epochs:     usize,
    train_loss: f64,
    val_loss:   f64,
    metrics:    &BTreeMap<String, f64>,
) {
    let summary = metrics
        .iter()
        .map(|(k, v)| format!("{k}={v:.4}"))
        .collect::<Vec<_>>()
        .join(" ");
    println!(
        "Epoch {:>3}/{} | train_loss={:.4} | val_loss={:.4} | {}",
        epoch, epochs, train_loss, val_loss, summary,
    );
}
