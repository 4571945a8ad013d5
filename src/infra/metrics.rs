// ============================================================
// Layer 6 - Metrics Logger
// ============================================================
// Records fitting metrics to a CSV file after each epoch.
//
// Metrics recorded per epoch:
//   - epoch:           the epoch number (1, 2, 3, ...)
//   - train_loss:      average MSE + scaled regularizer
//   - val_loss:        average MSE on held-out stimuli
//   - val_correlation: Pearson r between predicted and recorded
//                      responses, per neuron, averaged over all
//                      neurons of all sessions
//
// Output file: <dir>/metrics.csv
//
//   epoch,train_loss,val_loss,val_correlation
//   1,0.912300,0.887100,0.214000
//   2,0.541200,0.530900,0.602000
//
// Reference: Rust Book §12 (I/O and File Handling)

use anyhow::{Context, Result};
use std::{
    fs::{self, OpenOptions},
    io::Write,
    path::{Path, PathBuf},
};
use serde::{Deserialize, Serialize};

/// One row of metrics data for a single epoch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EpochMetrics {
    pub epoch:           usize,
    pub train_loss:      f64,
    pub val_loss:        f64,
    pub val_correlation: f64,
}

impl EpochMetrics {
    pub fn new(epoch: usize, train_loss: f64, val_loss: f64, val_correlation: f64) -> Self {
        Self { epoch, train_loss, val_loss, val_correlation }
    }

    /// Returns true if this epoch improved over the previous best val_loss
    pub fn is_improvement(&self, best_val_loss: f64) -> bool {
        self.val_loss < best_val_loss
    }
}

/// Appends epoch metrics to `<dir>/metrics.csv`.
pub struct MetricsLogger {
    csv_path: PathBuf,
}

impl MetricsLogger {
    /// Writes the CSV header if the file doesn't exist yet.
    pub fn new(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref();
        fs::create_dir_all(dir)
            .with_context(|| format!("Cannot create metrics directory '{}'", dir.display()))?;

        let csv_path = dir.join("metrics.csv");
        if !csv_path.exists() {
            let mut f = fs::File::create(&csv_path)
                .with_context(|| format!("Cannot create '{}'", csv_path.display()))?;
            writeln!(f, "epoch,train_loss,val_loss,val_correlation")?;
            tracing::debug!("Created metrics CSV: '{}'", csv_path.display());
        }

        Ok(Self { csv_path })
    }

    pub fn log(&self, m: &EpochMetrics) -> Result<()> {
        let mut f = OpenOptions::new()
            .append(true)
            .open(&self.csv_path)
            .with_context(|| format!("Cannot open '{}'", self.csv_path.display()))?;

        writeln!(
            f,
            "{},{:.6},{:.6},{:.6}",
            m.epoch, m.train_loss, m.val_loss, m.val_correlation,
        )?;

        tracing::debug!(
            "Logged epoch {} metrics: train_loss={:.4}, val_loss={:.4}",
            m.epoch,
            m.train_loss,
            m.val_loss,
        );
        Ok(())
    }

    pub fn csv_path(&self) -> &Path {
        &self.csv_path
    }
}

// ─── Correlation ──────────────────────────────────────────────────────────────
/// Pearson correlation per neuron, for row-major `[samples, n_neurons]`
/// predictions and targets. A neuron with zero variance on either side
/// scores 0.
pub fn neuron_correlations(predictions: &[f32], targets: &[f32], n_neurons: usize) -> Vec<f64> {
    if n_neurons == 0 || predictions.len() != targets.len() {
        return Vec::new();
    }
    let samples = predictions.len() / n_neurons;
    if samples == 0 {
        return vec![0.0; n_neurons];
    }

    (0..n_neurons)
        .map(|n| {
            let column = |v: &[f32]| -> Vec<f64> { (0..samples).map(|s| v[s * n_neurons + n] as f64).collect() };
            let (p, t) = (column(predictions), column(targets));
            let mean_p = p.iter().sum::<f64>() / samples as f64;
            let mean_t = t.iter().sum::<f64>() / samples as f64;

            let (mut cov, mut var_p, mut var_t) = (0.0, 0.0, 0.0);
            for (a, b) in p.iter().zip(&t) {
                cov   += (a - mean_p) * (b - mean_t);
                var_p += (a - mean_p).powi(2);
                var_t += (b - mean_t).powi(2);
            }
            let denom = (var_p * var_t).sqrt();
            if denom > 1e-12 { cov / denom } else { 0.0 }
        })
        .collect()
}

/// Mean of [`neuron_correlations`]; 0 when there are no neurons.
pub fn mean_correlation(predictions: &[f32], targets: &[f32], n_neurons: usize) -> f64 {
    let per_neuron = neuron_correlations(predictions, targets, n_neurons);
    if per_neuron.is_empty() {
        0.0
    } else {
        per_neuron.iter().sum::<f64>() / per_neuron.len() as f64
    }
}
