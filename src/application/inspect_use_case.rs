// ============================================================
// Layer 2 - InspectUseCase
// ============================================================
// Builds a registry from a config file and reports what it
// contains, without fitting anything:
//
//   Step 1: Load the config                (Layer 6 - infra)
//   Step 2: Resolve per-key options        (Layer 3 - domain)
//   Step 3: Build the registry on CPU      (Layer 5 - ml)
//   Step 4: Probe every key with a zero
//           input and its regularizer      (Layer 5 - ml)
//
// Probing runs every dispatch path once, so a config that
// builds but cannot be called fails here too.
//
// Reference: Rust Book §13 (Iterators and Closures)

use anyhow::{anyhow, Context, Result};
use burn::{backend::NdArray, prelude::*};
use serde::Serialize;

use crate::domain::{
    config::{MultiReadoutConfig, ReadoutType},
    error::ReadoutError,
    options::{Reduction, ResolvedReadoutOptions},
};
use crate::infra::checkpoint::read_config;
use crate::ml::multi_readout::{MultiReadout, ReadoutSlot};

type InspectBackend = NdArray;

#[derive(Debug, Clone)]
pub struct InspectConfig {
    pub config_path:  String,
    pub batch_size:   usize,
    pub reduction:    Reduction,
    pub show_options: bool,
}

/// What one data key resolved to.
#[derive(Debug, Clone, Serialize)]
pub struct KeyReport {
    pub key:          String,
    /// `None` for owned readouts, the source key for clones.
    pub clone_of:     Option<String>,
    pub outdims:      usize,
    pub output_shape: [usize; 2],
    pub regularizer:  f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct InspectReport {
    pub base_readout: ReadoutType,
    pub num_params:   usize,
    pub keys:         Vec<KeyReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub options:      Option<Vec<(String, ResolvedReadoutOptions)>>,
}

/// Per-key options exactly as the registry hands them to each readout.
pub fn resolve_options(config: &MultiReadoutConfig) -> Result<Vec<(String, ResolvedReadoutOptions)>, ReadoutError> {
    let resolver = config.variant.option_resolver();
    let anchor = config.n_neurons.keys().next().unwrap_or_default().to_string();
    config
        .n_neurons
        .keys()
        .enumerate()
        .map(|(index, key)| Ok((key.to_string(), resolver.resolve(index, key, &anchor, &config.options)?)))
        .collect()
}

pub struct InspectUseCase {
    config: InspectConfig,
}

impl InspectUseCase {
    pub fn new(config: InspectConfig) -> Self {
        Self { config }
    }

    pub fn execute(&self) -> Result<InspectReport> {
        let cfg = &self.config;

        // ── Step 1: Load config ───────────────────────────────────────────────
        let model_cfg = read_config(&cfg.config_path)?;
        self.inspect(&model_cfg)
            .with_context(|| format!("Cannot build a registry from '{}'", cfg.config_path))
    }

    pub fn inspect(&self, model_cfg: &MultiReadoutConfig) -> Result<InspectReport> {
        let cfg = &self.config;

        // ── Step 2: Resolve options ───────────────────────────────────────────
        let options = if cfg.show_options { Some(resolve_options(model_cfg)?) } else { None };

        // ── Step 3: Build registry ────────────────────────────────────────────
        let device = Default::default();
        let model = MultiReadout::<InspectBackend>::new(model_cfg, &device)?;
        tracing::info!("Built {} readouts with {} parameters", model.len(), model.num_params());

        // ── Step 4: Probe each key ────────────────────────────────────────────
        let mut keys = Vec::with_capacity(model.len());
        for key in model.keys() {
            let [c, h, w] = *model_cfg.in_shapes.require("in_shapes", key)?;
            let x = Tensor::<InspectBackend, 4>::zeros([cfg.batch_size.max(1), c, h, w], &device);
            let output = model.forward(x, Some(key))?;
            let penalty = model.regularizer(Some(key), cfg.reduction, None)?;
            let penalty = penalty.sum().into_scalar().elem::<f64>();

            let clone_of = match model.slot(key) {
                Some(ReadoutSlot::Cloned(clone)) => Some(clone.source_key().to_string()),
                _ => None,
            };
            keys.push(KeyReport {
                key: key.to_string(),
                clone_of,
                outdims: model.outdims(key).ok_or_else(|| anyhow!("'{key}' vanished from the registry"))?,
                output_shape: output.dims(),
                regularizer: penalty,
            });
        }

        Ok(InspectReport {
            base_readout: model.base_readout(),
            num_params: model.num_params(),
            keys,
            options,
        })
    }
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{config::MultiReadoutVariant, keyed_map::KeyedMap, options::ReadoutOptions};

    fn use_case(show_options: bool) -> InspectUseCase {
        InspectUseCase::new(InspectConfig {
            config_path: String::new(),
            batch_size: 2,
            reduction: Reduction::Sum,
            show_options,
        })
    }

    fn config() -> MultiReadoutConfig {
        let mut in_shapes = KeyedMap::new();
        let mut n_neurons = KeyedMap::new();
        for (key, n) in [("a", 3), ("b", 3)] {
            in_shapes.insert(key, [2, 6, 6]);
            n_neurons.insert(key, n);
        }
        MultiReadoutConfig::new(in_shapes, n_neurons)
    }

    #[test]
    fn test_report_lists_keys_and_clones() {
        let cfg = config()
            .with_variant(MultiReadoutVariant::MultipleFullGaussian2d)
            .with_clone_readout(true);
        let report = use_case(false).inspect(&cfg).unwrap();
        assert_eq!(report.base_readout, ReadoutType::FullGaussian2d);
        assert_eq!(report.keys.len(), 2);
        assert_eq!(report.keys[0].clone_of, None);
        assert_eq!(report.keys[1].clone_of.as_deref(), Some("a"));
        assert_eq!(report.keys[1].output_shape, [2, 3]);
        assert!(report.options.is_none());
    }

    #[test]
    fn test_resolved_options_reference_anchor() {
        let mut match_ids = KeyedMap::new();
        match_ids.insert("a", vec![1, 2, 3]);
        match_ids.insert("b", vec![3, 2, 1]);
        let mut options = ReadoutOptions::default();
        options.sharing.share_features = true;
        options.sharing.shared_match_ids = Some(match_ids);
        let cfg = config()
            .with_variant(MultiReadoutVariant::MultipleFullSxf)
            .with_options(options);

        let report = use_case(true).inspect(&cfg).unwrap();
        let resolved = report.options.unwrap();
        assert_eq!(resolved[0].1.shared_features.as_ref().unwrap().anchor, None);
        assert_eq!(resolved[1].1.shared_features.as_ref().unwrap().anchor.as_ref().unwrap().0, "a");
    }

    #[test]
    fn test_missing_file_is_error() {
        let uc = InspectUseCase::new(InspectConfig {
            config_path: "/nonexistent/multireadout.json".into(),
            batch_size: 1,
            reduction: Reduction::Sum,
            show_options: false,
        });
        assert!(uc.execute().is_err());
    }
}
