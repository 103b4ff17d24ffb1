// ============================================================
// Layer 6 — Metrics Logger
// ============================================================
// Records fine-tuning metrics to a CSV file after each epoch.
//
// Metrics recorded per epoch:
//   - epoch:           the epoch number (1, 2, 3, ...)
//   - train_loss:      mean masked cross-entropy over the epoch's batches
//   - optimizer_steps: optimizer updates applied so far (all epochs)
//   - learning_rate:   learning rate used by the epoch's last update
//
// Output file: {output_dir}/metrics.csv
//
// Example CSV output:
//   epoch,train_loss,optimizer_steps,learning_rate
//   1,2.412300,13,0.000095
//   2,1.204500,26,0.000090
//
// Reference: Rust Book §12 (I/O and File Handling)

use anyhow::Result;
use std::{
    fs::{self, OpenOptions},
    io::Write,
    path::{Path, PathBuf},
};
use serde::{Deserialize, Serialize};

/// One row of metrics data for a single training epoch
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EpochMetrics {
    pub epoch:           usize,
    pub train_loss:      f64,
    pub optimizer_steps: usize,
    pub learning_rate:   f64,
}

impl EpochMetrics {
    pub fn new(epoch: usize, train_loss: f64, optimizer_steps: usize, learning_rate: f64) -> Self {
        Self { epoch, train_loss, optimizer_steps, learning_rate }
    }
}

/// Logs epoch metrics to a CSV file for later analysis.
pub struct MetricsLogger {
    csv_path: PathBuf,
}

impl MetricsLogger {
    /// Create a new MetricsLogger.
    /// Writes the CSV header if the file doesn't exist yet.
    pub fn new(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref();
        fs::create_dir_all(dir)?;

        let csv_path = dir.join("metrics.csv");

        if !csv_path.exists() {
            let mut f = fs::File::create(&csv_path)?;
            writeln!(f, "epoch,train_loss,optimizer_steps,learning_rate")?;
            tracing::debug!("Created metrics CSV: '{}'", csv_path.display());
        }

        Ok(Self { csv_path })
    }

    /// Append one epoch's metrics as a new row in the CSV.
    pub fn log(&self, m: &EpochMetrics) -> Result<()> {
        let mut f = OpenOptions::new()
            .append(true)
            .open(&self.csv_path)?;

        writeln!(
            f,
            "{},{:.6},{},{:.6}",
            m.epoch,
            m.train_loss,
            m.optimizer_steps,
            m.learning_rate,
        )?;

        tracing::debug!(
            "Logged epoch {} metrics: train_loss={:.4}, steps={}",
            m.epoch,
            m.train_loss,
            m.optimizer_steps,
        );

        Ok(())
    }

    pub fn csv_path(&self) -> &Path {
        &self.csv_path
    }
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rows_are_appended_under_one_header() {
        let dir = tempfile::tempdir().unwrap();
        let logger = MetricsLogger::new(dir.path()).unwrap();
        logger.log(&EpochMetrics::new(1, 2.5, 4, 1e-4)).unwrap();

        // a second logger on the same directory must not rewrite the header
        let again = MetricsLogger::new(dir.path()).unwrap();
        again.log(&EpochMetrics::new(2, 1.25, 8, 5e-5)).unwrap();

        let body = fs::read_to_string(logger.csv_path()).unwrap();
        let lines: Vec<&str> = body.lines().collect();
        assert_eq!(lines, vec![
            "epoch,train_loss,optimizer_steps,learning_rate",
            "1,2.500000,4,0.000100",
            "2,1.250000,8,0.000050",
        ]);
    }
}
