// ============================================================
// Layer 2 - FitUseCase
// ============================================================
// Orchestrates a fit on synthetic sessions, in order:
//
//   Step 1: Generate sessions             (Layer 4 - data)
//   Step 2: Split train/validation        (Layer 4 - data)
//   Step 3: Build the registry config     (Layer 3 - domain)
//   Step 4: Save config                   (Layer 6 - infra)
//   Step 5: Run the fitting loop          (Layer 5 - ml)
//   Step 6: Save weights                  (Layer 6 - infra)
//
// The registry config comes either from a JSON file or from
// the sessions themselves. Mean activities are always taken
// from the training split, so biases start at each neuron's
// average rate.
//
// Reference: Burn Book §5 (Training)

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};

use crate::data::{
    dataset::SessionDataset,
    splitter::split_train_val,
    synthetic::{generate_sessions, SessionSpec},
};
use crate::domain::{
    config::{MultiReadoutConfig, ReadoutType},
    keyed_map::KeyedMap,
};
use crate::infra::{
    checkpoint::{read_config, CheckpointManager},
    metrics::{EpochMetrics, MetricsLogger},
};
use crate::ml::trainer::{run_fit, SessionSplit};

// ─── Fit Configuration ────────────────────────────────────────────────────────
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FitConfig {
    /// Registry config JSON; built from `sessions` when absent.
    pub readout_config: Option<String>,
    pub checkpoint_dir: String,
    pub sessions:       Vec<SessionSpec>,
    pub base_readout:   ReadoutType,
    pub clone_readout:  bool,
    pub noise:          f32,
    pub seed:           u64,
    pub train_fraction: f64,
    pub batch_size:     usize,
    pub epochs:         usize,
    pub lr:             f64,
}

impl Default for FitConfig {
    fn default() -> Self {
        let session = |key: &str| SessionSpec {
            key:       key.to_string(),
            in_shape:  [4, 12, 12],
            n_neurons: 8,
            n_samples: 200,
        };
        Self {
            readout_config: None,
            checkpoint_dir: "checkpoints".to_string(),
            sessions:       vec![session("session-1"), session("session-2")],
            base_readout:   ReadoutType::FullGaussian2d,
            clone_readout:  false,
            noise:          0.05,
            seed:           42,
            train_fraction: 0.8,
            batch_size:     16,
            epochs:         10,
            lr:             1e-2,
        }
    }
}

/// Build a registry config that matches `sessions`.
pub fn config_for_sessions(sessions: &[SessionSplit], base_readout: ReadoutType, clone_readout: bool) -> MultiReadoutConfig {
    let mut in_shapes = KeyedMap::new();
    let mut n_neurons = KeyedMap::new();
    for s in sessions {
        in_shapes.insert(s.train.key(), s.train.in_shape());
        n_neurons.insert(s.train.key(), s.train.n_neurons());
    }
    MultiReadoutConfig::new(in_shapes, n_neurons)
        .with_base_readout(base_readout)
        .with_clone_readout(clone_readout)
}

/// Every session must have a matching entry in a loaded config.
fn check_sessions_match(config: &MultiReadoutConfig, sessions: &[SessionSplit]) -> Result<()> {
    for s in sessions {
        let key = s.train.key();
        match (config.in_shapes.get(key), config.n_neurons.get(key)) {
            (Some(shape), Some(&n)) if *shape == s.train.in_shape() && n == s.train.n_neurons() => {}
            (Some(_), Some(_)) => bail!("config disagrees with session '{key}' on input shape or neuron count"),
            _ => bail!("config has no readout for session '{key}'"),
        }
    }
    Ok(())
}

// ─── FitUseCase ───────────────────────────────────────────────────────────────
pub struct FitUseCase {
    config: FitConfig,
}

impl FitUseCase {
    pub fn new(config: FitConfig) -> Self {
        Self { config }
    }

    pub fn execute(&self) -> Result<Vec<EpochMetrics>> {
        let cfg = &self.config;
        if cfg.sessions.is_empty() {
            bail!("at least one session is required");
        }

        // ── Step 1: Generate sessions ─────────────────────────────────────────
        tracing::info!("Generating {} synthetic sessions (seed {})", cfg.sessions.len(), cfg.seed);
        let datasets = generate_sessions(&cfg.sessions, cfg.noise, cfg.seed);

        // ── Step 2: Split each session ────────────────────────────────────────
        let splits: Vec<SessionSplit> = datasets
            .into_iter()
            .map(|ds| {
                let (key, shape, n) = (ds.key().to_string(), ds.in_shape(), ds.n_neurons());
                let (train, valid) = split_train_val(ds.into_samples(), cfg.train_fraction, cfg.seed);
                tracing::info!("Session '{}': {} train, {} validation", key, train.len(), valid.len());
                SessionSplit {
                    train: SessionDataset::new(key.clone(), shape, n, train),
                    valid: SessionDataset::new(key, shape, n, valid),
                }
            })
            .collect();

        // ── Step 3: Registry config ───────────────────────────────────────────
        let mut model_cfg = match &cfg.readout_config {
            Some(path) => {
                let loaded = read_config(path)?;
                check_sessions_match(&loaded, &splits)
                    .with_context(|| format!("'{path}' does not fit the generated sessions"))?;
                loaded
            }
            None => config_for_sessions(&splits, cfg.base_readout, cfg.clone_readout),
        };
        let mean_activity: KeyedMap<Vec<f32>> = splits
            .iter()
            .map(|s| (s.train.key().to_string(), s.train.mean_activity()))
            .collect();
        model_cfg.mean_activity = Some(mean_activity);

        // ── Step 4: Save config ───────────────────────────────────────────────
        let ckpt_manager = CheckpointManager::new(&cfg.checkpoint_dir)?;
        ckpt_manager.save_config(&model_cfg)?;
        let logger = MetricsLogger::new(&cfg.checkpoint_dir)?;

        // ── Step 5: Fit ───────────────────────────────────────────────────────
        let (model, history) = run_fit(cfg, &model_cfg, &splits, Some(&logger))?;

        // ── Step 6: Save weights ──────────────────────────────────────────────
        ckpt_manager.save_model(&model)?;
        tracing::info!("Saved fitted registry to '{}'", ckpt_manager.dir().display());
        Ok(history)
    }
}
