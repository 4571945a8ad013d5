// ============================================================
// Layer 6 - Checkpoint Manager
// ============================================================
// Saves and restores a fitted registry.
//
// What gets saved:
//   1. multireadout.json    - the MultiReadoutConfig the registry
//                             was built from
//   2. multireadout.mpk.gz  - every readout parameter, written by
//                             Burn's CompactRecorder
//
// Weights alone cannot rebuild a registry: the config decides
// which keys exist, which readout kind each one holds and which
// keys are clones. Loading therefore rebuilds the registry from
// the config first and then loads the record into it.
//
// Reference: Burn Book §5 (Records and Checkpointing)

use anyhow::{Context, Result};
use std::{
    fs,
    path::{Path, PathBuf},
};
use burn::{
    prelude::*,
    record::{CompactRecorder, Recorder},
};

use crate::domain::config::MultiReadoutConfig;
use crate::ml::multi_readout::MultiReadout;

const CONFIG_FILE:  &str = "multireadout.json";
const WEIGHTS_FILE: &str = "multireadout";

/// Read a registry config from any JSON file.
pub fn read_config(path: impl AsRef<Path>) -> Result<MultiReadoutConfig> {
    let path = path.as_ref();
    let json = fs::read_to_string(path)
        .with_context(|| format!("Cannot read config from '{}'", path.display()))?;
    serde_json::from_str(&json)
        .with_context(|| format!("'{}' is not a valid multi-readout config", path.display()))
}

/// Manages the files of one fitted registry in a directory.
pub struct CheckpointManager {
    dir: PathBuf,
}

impl CheckpointManager {
    /// Creates the directory if it doesn't already exist.
    pub fn new(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)
            .with_context(|| format!("Cannot create checkpoint directory '{}'", dir.display()))?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn save_config(&self, cfg: &MultiReadoutConfig) -> Result<()> {
        let path = self.dir.join(CONFIG_FILE);
        let json = serde_json::to_string_pretty(cfg)?;
        fs::write(&path, json)
            .with_context(|| format!("Cannot write config to '{}'", path.display()))?;
        tracing::debug!("Saved multi-readout config to '{}'", path.display());
        Ok(())
    }

    pub fn load_config(&self) -> Result<MultiReadoutConfig> {
        read_config(self.dir.join(CONFIG_FILE))
            .context("Make sure you have run 'fit' with this checkpoint directory first")
    }

    pub fn save_model<B: Backend>(&self, model: &MultiReadout<B>) -> Result<()> {
        let path = self.dir.join(WEIGHTS_FILE);
        CompactRecorder::new()
            .record(model.clone().into_record(), path.clone())
            .with_context(|| format!("Failed to save weights to '{}'", path.display()))?;
        tracing::debug!("Saved weights to '{}'", path.display());
        Ok(())
    }

    /// Rebuild the registry from the saved config and load its weights.
    pub fn load_model<B: Backend>(&self, device: &B::Device) -> Result<MultiReadout<B>> {
        let cfg = self.load_config()?;
        let model = MultiReadout::<B>::new(&cfg, device)
            .context("Saved config no longer builds a registry")?;

        let path = self.dir.join(WEIGHTS_FILE);
        let record = CompactRecorder::new()
            .load(path.clone(), device)
            .with_context(|| format!("Cannot load weights '{}'", path.display()))?;
        tracing::info!("Loaded {} readouts from '{}'", model.len(), self.dir.display());
        Ok(model.load_record(record))
    }
}
