// ============================================================
// Layer 6 — Metrics Tracker
// ============================================================
// Records one CSV row per evaluation pass. The column set is
// dynamic — bucket names depend on the run — so the header is
// derived from the first logged metric map:
//
//   epoch,train_loss,val_loss,<metric keys in sorted order>
//   0,NaN,6.2451,0.0312,...
//   1,3.1245,3.0892,0.1230,...
//
// Tracking is controlled by an explicit TrackingConfig rather
// than ambient process state; when disabled, nothing is written
// and the metrics only reach the tracing log.

use anyhow::{Context, Result};
use std::{
    collections::BTreeMap,
    fs::{self, OpenOptions},
    io::Write,
    path::PathBuf,
};

/// Where (and whether) evaluation metrics are recorded.
#[derive(Debug, Clone)]
pub struct TrackingConfig {
    pub enabled: bool,
    pub dir:     PathBuf,
}

pub struct MetricsTracker {
    config: TrackingConfig,
}

impl MetricsTracker {
    pub fn new(config: TrackingConfig) -> Result<Self> {
        if config.enabled {
            fs::create_dir_all(&config.dir).with_context(|| {
                format!("Cannot create metrics directory '{}'", config.dir.display())
            })?;
        }
        Ok(Self { config })
    }

    /// Record one evaluation pass. Always traces; appends a CSV
    /// row only when tracking is enabled.
    pub fn log_pass(
        &self,
        epoch:      usize,
        train_loss: f64,
        val_loss:   f64,
        metrics:    &BTreeMap<String, f64>,
    ) -> Result<()> {
        tracing::info!(
            "eval pass epoch={} train_loss={:.4} val_loss={:.4} {:?}",
            epoch, train_loss, val_loss, metrics,
        );
        if !self.config.enabled {
            return Ok(());
        }

        let csv_path = self.csv_path();
        if !csv_path.exists() {
            let header: Vec<&str> = metrics.keys().map(String::as_str).collect();
            let mut f = fs::File::create(&csv_path)
                .with_context(|| format!("Cannot create '{}'", csv_path.display()))?;
            writeln!(f, "epoch,train_loss,val_loss,{}", header.join(","))?;
        }

        let mut f = OpenOptions::new()
            .append(true)
            .open(&csv_path)
            .with_context(|| format!("Cannot append to '{}'", csv_path.display()))?;

        let values = metrics
            .values()
            .map(|v| format!("{v:.6}"))
            .collect::<Vec<_>>()
            .join(",");
        writeln!(f, "{},{:.6},{:.6},{}", epoch, train_loss, val_loss, values)?;

        Ok(())
    }

    pub fn csv_path(&self) -> PathBuf {
        self.config.dir.join("metrics.csv")
    }
}
