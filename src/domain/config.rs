// ============================================================
// Layer 3 - Registry Configuration
// ============================================================
// Everything needed to build a MultiReadout, as plain data.
// It deserialises from JSON so the CLI can read it from disk.
//
// Base readout precedence:
//   A variant such as MultipleFullGaussian2d binds its readout
//   type. That binding is authoritative. The explicit
//   `base_readout` field is only consulted for the two unbound
//   variants (Base, SharedParametersBase). Neither set → error.
//
// Example JSON:
//   {
//     "variant": "multiple_full_gaussian2d",
//     "in_shapes": { "s1": [16, 9, 16], "s2": [16, 9, 16] },
//     "n_neurons": { "s1": 40, "s2": 35 },
//     "clone_readout": false,
//     "gamma_readout": 0.5,
//     "options": { "share_features": true, "shared_match_ids": {...} }
//   }

use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::domain::{
    error::ReadoutError,
    keyed_map::KeyedMap,
    options::ReadoutOptions,
    sharing::{PassThrough, SharedParameterResolver},
    traits::OptionResolver,
};

// ─── ReadoutType ──────────────────────────────────────────────────────────────
/// The readout kinds a registry can instantiate per key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReadoutType {
    PointPooled2d,
    SpatialXFeatureLinear,
    FullSxf,
    FullGaussian2d,
}

impl ReadoutType {
    pub fn all() -> [ReadoutType; 4] {
        [
            ReadoutType::PointPooled2d,
            ReadoutType::SpatialXFeatureLinear,
            ReadoutType::FullSxf,
            ReadoutType::FullGaussian2d,
        ]
    }

    pub fn name(&self) -> &'static str {
        match self {
            ReadoutType::PointPooled2d         => "PointPooled2d",
            ReadoutType::SpatialXFeatureLinear => "SpatialXFeatureLinear",
            ReadoutType::FullSxf               => "FullSXF",
            ReadoutType::FullGaussian2d        => "FullGaussian2d",
        }
    }
}

impl fmt::Display for ReadoutType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for ReadoutType {
    type Err = ReadoutError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ReadoutType::all()
            .into_iter()
            .find(|t| t.name().eq_ignore_ascii_case(s))
            .ok_or_else(|| ReadoutError::invalid(format!("unknown readout type '{s}'")))
    }
}

// ─── MultiReadoutVariant ──────────────────────────────────────────────────────
/// Which registry flavour to build.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MultiReadoutVariant {
    #[default]
    Base,
    SharedParametersBase,
    MultiplePointPooled2d,
    MultipleSpatialXFeatureLinear,
    MultipleFullSxf,
    MultipleFullGaussian2d,
}

impl MultiReadoutVariant {
    /// The readout type this variant is bound to, if any.
    pub fn bound_readout(&self) -> Option<ReadoutType> {
        match self {
            MultiReadoutVariant::Base
            | MultiReadoutVariant::SharedParametersBase          => None,
            MultiReadoutVariant::MultiplePointPooled2d         => Some(ReadoutType::PointPooled2d),
            MultiReadoutVariant::MultipleSpatialXFeatureLinear => Some(ReadoutType::SpatialXFeatureLinear),
            MultiReadoutVariant::MultipleFullSxf               => Some(ReadoutType::FullSxf),
            MultiReadoutVariant::MultipleFullGaussian2d        => Some(ReadoutType::FullGaussian2d),
        }
    }

    pub fn shares_parameters(&self) -> bool {
        matches!(
            self,
            MultiReadoutVariant::SharedParametersBase
                | MultiReadoutVariant::MultipleFullSxf
                | MultiReadoutVariant::MultipleFullGaussian2d
        )
    }

    /// Bound type wins; the explicit one fills in only when nothing is bound.
    pub fn resolve_base_readout(&self, explicit: Option<ReadoutType>) -> Result<ReadoutType, ReadoutError> {
        match (self.bound_readout(), explicit) {
            (Some(bound), Some(other)) if bound != other => {
                tracing::warn!(%bound, ignored = %other, "variant binds its own base readout");
                Ok(bound)
            }
            (Some(bound), _) => Ok(bound),
            (None, Some(explicit)) => Ok(explicit),
            (None, None) => Err(ReadoutError::MissingBaseReadout),
        }
    }

    pub fn option_resolver(&self) -> Box<dyn OptionResolver> {
        if self.shares_parameters() {
            Box::new(SharedParameterResolver)
        } else {
            Box::new(PassThrough)
        }
    }
}

// ─── MultiReadoutConfig ───────────────────────────────────────────────────────
fn default_gamma() -> f64 {
    1.0
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MultiReadoutConfig {
    #[serde(default)]
    pub variant:       MultiReadoutVariant,
    #[serde(default)]
    pub base_readout:  Option<ReadoutType>,
    /// Core output shape per key: [channels, height, width].
    pub in_shapes:     KeyedMap<[usize; 3]>,
    /// Neurons per key. Its key order is the registration order.
    pub n_neurons:     KeyedMap<usize>,
    #[serde(default)]
    pub mean_activity: Option<KeyedMap<Vec<f32>>>,
    #[serde(default)]
    pub clone_readout: bool,
    #[serde(default = "default_gamma")]
    pub gamma_readout: f64,
    #[serde(default)]
    pub options:       ReadoutOptions,
}

impl MultiReadoutConfig {
    pub fn new(in_shapes: KeyedMap<[usize; 3]>, n_neurons: KeyedMap<usize>) -> Self {
        Self {
            variant:       MultiReadoutVariant::default(),
            base_readout:  None,
            in_shapes,
            n_neurons,
            mean_activity: None,
            clone_readout: false,
            gamma_readout: default_gamma(),
            options:       ReadoutOptions::default(),
        }
    }

    pub fn with_variant(mut self, variant: MultiReadoutVariant) -> Self {
        self.variant = variant;
        self
    }

    pub fn with_base_readout(mut self, base_readout: ReadoutType) -> Self {
        self.base_readout = Some(base_readout);
        self
    }

    pub fn with_mean_activity(mut self, mean_activity: KeyedMap<Vec<f32>>) -> Self {
        self.mean_activity = Some(mean_activity);
        self
    }

    pub fn with_clone_readout(mut self, clone_readout: bool) -> Self {
        self.clone_readout = clone_readout;
        self
    }

    pub fn with_gamma_readout(mut self, gamma_readout: f64) -> Self {
        self.gamma_readout = gamma_readout;
        self
    }

    pub fn with_options(mut self, options: ReadoutOptions) -> Self {
        self.options = options;
        self
    }
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bound_variant_wins_over_explicit() {
        let v = MultiReadoutVariant::MultipleFullGaussian2d;
        assert_eq!(
            v.resolve_base_readout(Some(ReadoutType::PointPooled2d)).unwrap(),
            ReadoutType::FullGaussian2d
        );
    }

    #[test]
    fn test_explicit_used_when_unbound() {
        let v = MultiReadoutVariant::Base;
        assert_eq!(
            v.resolve_base_readout(Some(ReadoutType::SpatialXFeatureLinear)).unwrap(),
            ReadoutType::SpatialXFeatureLinear
        );
    }

    #[test]
    fn test_missing_base_readout() {
        let err = MultiReadoutVariant::SharedParametersBase
            .resolve_base_readout(None)
            .unwrap_err();
        assert!(matches!(err, ReadoutError::MissingBaseReadout));
    }

    #[test]
    fn test_readout_type_parse() {
        assert_eq!("FullSXF".parse::<ReadoutType>().unwrap(), ReadoutType::FullSxf);
        assert!("Conv".parse::<ReadoutType>().is_err());
    }

    #[test]
    fn test_config_json_defaults() {
        let json = r#"{
            "variant": "multiple_point_pooled2d",
            "in_shapes": { "s1": [4, 8, 8] },
            "n_neurons": { "s1": 10 }
        }"#;
        let cfg: MultiReadoutConfig = serde_json::from_str(json).unwrap();
        assert_eq!(cfg.variant, MultiReadoutVariant::MultiplePointPooled2d);
        assert_eq!(cfg.gamma_readout, 1.0);
        assert!(!cfg.clone_readout);
        assert_eq!(cfg.options.hyperparameters.pool_kern, 2);
    }
}
