// ============================================================
// Layer 6 — Checkpoint Manager
// ============================================================
// Saves and restores model weights using burn's CompactRecorder.
//
// Files per run directory:
//   model_epoch_{n}.mpk.gz   weights after epoch n
//   model_final.mpk.gz       snapshot written when training ends
//   latest_epoch.json        number of the last saved epoch
//   run_config.json          the full run configuration
//
// The run config is saved before training starts; the evaluate
// command reads it back to rebuild the exact architecture
// (including the embedding mode) before loading weights into it.

use anyhow::{Context, Result};
use std::{fs, path::PathBuf};
use burn::{
    prelude::*,
    record::{CompactRecorder, Recorder},
    tensor::backend::AutodiffBackend,
};

use crate::application::train_use_case::RunConfig;
use crate::ml::model::IcdBertModel;

pub struct CheckpointManager {
    dir: PathBuf,
}

impl CheckpointManager {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        let dir = dir.into();
        fs::create_dir_all(&dir).ok();
        Self { dir }
    }

    /// Save model weights for a given epoch and update the
    /// latest-epoch pointer.
    pub fn save_model<B: AutodiffBackend>(
        &self,
        model: &IcdBertModel<B>,
        epoch: usize,
    ) -> Result<()> {
        let path = self.dir.join(format!("model_epoch_{epoch}"));

        CompactRecorder::new()
            .record(model.clone().into_record(), path.clone())
            .with_context(|| {
                format!("Failed to save checkpoint to '{}'", path.display())
            })?;

        let latest_path = self.dir.join("latest_epoch.json");
        fs::write(&latest_path, serde_json::to_string(&epoch)?)
            .with_context(|| "Failed to write latest_epoch.json")?;

        tracing::debug!("Saved checkpoint: epoch {}", epoch);
        Ok(())
    }

    /// The fixed-path snapshot written once training finishes.
    pub fn save_final<B: AutodiffBackend>(&self, model: &IcdBertModel<B>) -> Result<()> {
        let path = self.dir.join("model_final");
        CompactRecorder::new()
            .record(model.clone().into_record(), path.clone())
            .with_context(|| {
                format!("Failed to save final snapshot to '{}'", path.display())
            })?;
        tracing::info!("Saved final snapshot to '{}'", path.display());
        Ok(())
    }

    /// Load weights into a freshly built model: the final
    /// snapshot when present, otherwise the latest epoch
    /// checkpoint.
    pub fn load_model<B: Backend>(
        &self,
        model:  IcdBertModel<B>,
        device: &B::Device,
    ) -> Result<IcdBertModel<B>> {
        let final_path = self.dir.join("model_final");
        let path = if final_path.with_extension("mpk.gz").exists() {
            final_path
        } else {
            let epoch = self.latest_epoch()?;
            tracing::info!("No final snapshot; loading checkpoint from epoch {}", epoch);
            self.dir.join(format!("model_epoch_{epoch}"))
        };

        let record = CompactRecorder::new()
            .load(path.clone(), device)
            .with_context(|| {
                format!("Cannot load checkpoint '{}'. Have you trained the model first?",
                    path.display())
            })?;

        Ok(model.load_record(record))
    }

    /// Persist the run configuration so evaluation can rebuild
    /// the same architecture.
    pub fn save_config(&self, cfg: &RunConfig) -> Result<()> {
        let path = self.dir.join("run_config.json");
        let json = serde_json::to_string_pretty(cfg)?;
        fs::write(&path, json)
            .with_context(|| format!("Cannot write config to '{}'", path.display()))?;
        tracing::debug!("Saved run config to '{}'", path.display());
        Ok(())
    }

    pub fn load_config(&self) -> Result<RunConfig> {
        let path = self.dir.join("run_config.json");
        let json = fs::read_to_string(&path)
            .with_context(|| {
                format!(
                    "Cannot read config from '{}'. \
                     Make sure you have run 'train' before 'evaluate'.",
                    path.display()
                )
            })?;
        Ok(serde_json::from_str(&json)?)
    }

    fn latest_epoch(&self) -> Result<usize> {
        let path = self.dir.join("latest_epoch.json");
        let s = fs::read_to_string(&path)
            .with_context(|| {
                "Cannot find 'latest_epoch.json'. \
                 Have you run 'train' first?"
            })?;
        Ok(serde_json::from_str::<usize>(&s)?)
    }
}
