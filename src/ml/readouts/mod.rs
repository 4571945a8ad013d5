// ============================================================
// Layer 5 - Readout Kinds
// ============================================================
// A readout maps the core's feature map for one dataset to
// that dataset's neuron responses:
//
//   [batch, C, H, W]  ──readout──▶  [batch, N]
//
// Every kind implements the Readout trait. The registry keeps
// them in a closed enum, BaseReadout, so a Vec of them is
// still a Burn Module with visitable parameters.
//
// Parameters that one readout borrows from another (shared
// grid, shared features, grid mean predictor) travel in a
// SharedParameters value handed to each call.

use burn::prelude::*;

use crate::domain::{
    config::ReadoutType,
    error::ReadoutError,
    options::{Reduction, ResolvedReadoutOptions},
};

pub mod cloned;
pub mod common;
pub mod factorized;
pub mod gaussian;
pub mod point_pooled;
pub mod shared;

use factorized::{FullSxf, SpatialXFeatureLinear};
use gaussian::FullGaussian2d;
use point_pooled::PointPooled2d;
use shared::MuTransform;

// ─── Shared Parameters ────────────────────────────────────────────────────────
/// What the anchor readout exposes to readouts that reference it.
#[derive(Debug, Clone)]
pub struct SharedParameters<'a, B: Backend> {
    pub grid:      Option<Tensor<B, 2>>,
    pub features:  Option<Tensor<B, 2>>,
    pub transform: Option<&'a MuTransform<B>>,
}

impl<'a, B: Backend> SharedParameters<'a, B> {
    pub fn none() -> Self {
        Self { grid: None, features: None, transform: None }
    }
}

// ─── Construction ─────────────────────────────────────────────────────────────
/// Everything a readout kind needs to build itself for one key.
#[derive(Debug, Clone)]
pub struct ReadoutInit<'a> {
    pub in_shape:      [usize; 3],
    pub outdims:       usize,
    pub mean_activity: Option<&'a [f32]>,
    pub reg_weight:    f64,
    pub options:       ResolvedReadoutOptions,
}

/// Fail when `options` asks for sharing `kind` cannot do.
pub(crate) fn reject_sharing(
    options:        &ResolvedReadoutOptions,
    kind:           ReadoutType,
    allow_features: bool,
) -> Result<(), ReadoutError> {
    let unsupported = if options.shared_grid.is_some() {
        Some("shared grid")
    } else if options.shared_transform.is_some() {
        Some("shared grid mean predictor")
    } else if options.source_grid.is_some() || options.hyperparameters.grid_mean_predictor.is_some() {
        Some("grid mean predictor")
    } else if options.shared_features.is_some() && !allow_features {
        Some("shared features")
    } else {
        None
    };
    match unsupported {
        Some(what) => Err(ReadoutError::invalid(format!("{kind} does not support a {what}"))),
        None => Ok(()),
    }
}

// ─── Readout Trait ────────────────────────────────────────────────────────────
pub trait Readout<B: Backend> {
    /// Number of neurons.
    fn outdims(&self) -> usize;

    /// [batch, C, H, W] → [batch, outdims]
    fn forward(&self, x: Tensor<B, 4>, anchor: &SharedParameters<'_, B>) -> Result<Tensor<B, 2>, ReadoutError>;

    /// Effective per-neuron feature vectors.
    fn feature_weights(&self, anchor: &SharedParameters<'_, B>) -> Result<Tensor<B, 2>, ReadoutError>;

    fn regularizer(
        &self,
        reduction: Reduction,
        average:   Option<bool>,
        anchor:    &SharedParameters<'_, B>,
    ) -> Result<Tensor<B, 1>, ReadoutError>;

    /// Re-draw weights; the bias starts at `mean_activity` when given.
    fn initialize(&mut self, mean_activity: Option<&[f32]>) -> Result<(), ReadoutError>;

    fn bias(&self) -> Option<Tensor<B, 1>>;

    /// Tables this readout owns for others to reference.
    fn shared_parameters(&self) -> SharedParameters<'_, B> {
        SharedParameters::none()
    }

    /// Check that `anchor` provides what this readout references.
    fn check_anchor(&self, _anchor: &SharedParameters<'_, B>) -> Result<(), ReadoutError> {
        Ok(())
    }
}

// ─── BaseReadout ──────────────────────────────────────────────────────────────
#[derive(Module, Debug)]
pub enum BaseReadout<B: Backend> {
    PointPooled2d(PointPooled2d<B>),
    SpatialXFeatureLinear(SpatialXFeatureLinear<B>),
    FullSxf(FullSxf<B>),
    FullGaussian2d(FullGaussian2d<B>),
}

impl<B: Backend> BaseReadout<B> {
    pub fn build(kind: ReadoutType, init: ReadoutInit<'_>, device: &B::Device) -> Result<Self, ReadoutError> {
        Ok(match kind {
            ReadoutType::PointPooled2d         => Self::PointPooled2d(PointPooled2d::new(init, device)?),
            ReadoutType::SpatialXFeatureLinear => Self::SpatialXFeatureLinear(SpatialXFeatureLinear::new(init, device)?),
            ReadoutType::FullSxf               => Self::FullSxf(FullSxf::new(init, device)?),
            ReadoutType::FullGaussian2d        => Self::FullGaussian2d(FullGaussian2d::new(init, device)?),
        })
    }

    pub fn kind(&self) -> ReadoutType {
        match self {
            Self::PointPooled2d(_)         => ReadoutType::PointPooled2d,
            Self::SpatialXFeatureLinear(_) => ReadoutType::SpatialXFeatureLinear,
            Self::FullSxf(_)               => ReadoutType::FullSxf,
            Self::FullGaussian2d(_)        => ReadoutType::FullGaussian2d,
        }
    }

    fn inner(&self) -> &dyn Readout<B> {
        match self {
            Self::PointPooled2d(r)         => r,
            Self::SpatialXFeatureLinear(r) => r,
            Self::FullSxf(r)               => r,
            Self::FullGaussian2d(r)        => r,
        }
    }

    fn inner_mut(&mut self) -> &mut dyn Readout<B> {
        match self {
            Self::PointPooled2d(r)         => r,
            Self::SpatialXFeatureLinear(r) => r,
            Self::FullSxf(r)               => r,
            Self::FullGaussian2d(r)        => r,
        }
    }
}

impl<B: Backend> Readout<B> for BaseReadout<B> {
    fn outdims(&self) -> usize {
        self.inner().outdims()
    }

    fn forward(&self, x: Tensor<B, 4>, anchor: &SharedParameters<'_, B>) -> Result<Tensor<B, 2>, ReadoutError> {
        self.inner().forward(x, anchor)
    }

    fn feature_weights(&self, anchor: &SharedParameters<'_, B>) -> Result<Tensor<B, 2>, ReadoutError> {
        self.inner().feature_weights(anchor)
    }

    fn regularizer(
        &self,
        reduction: Reduction,
        average:   Option<bool>,
        anchor:    &SharedParameters<'_, B>,
    ) -> Result<Tensor<B, 1>, ReadoutError> {
        self.inner().regularizer(reduction, average, anchor)
    }

    fn initialize(&mut self, mean_activity: Option<&[f32]>) -> Result<(), ReadoutError> {
        self.inner_mut().initialize(mean_activity)
    }

    fn bias(&self) -> Option<Tensor<B, 1>> {
        self.inner().bias()
    }

    fn shared_parameters(&self) -> SharedParameters<'_, B> {
        self.inner().shared_parameters()
    }

    fn check_anchor(&self, anchor: &SharedParameters<'_, B>) -> Result<(), ReadoutError> {
        self.inner().check_anchor(anchor)
    }
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;
    use crate::domain::options::SharedDescriptor;

    type TB = NdArray;

    #[test]
    fn test_build_every_kind() {
        let device = Default::default();
        for kind in ReadoutType::all() {
            let init = ReadoutInit {
                in_shape: [2, 8, 8],
                outdims: 3,
                mean_activity: Some(&[0.1, 0.2, 0.3]),
                reg_weight: 1.0,
                options: Default::default(),
            };
            let readout = BaseReadout::<TB>::build(kind, init, &device).unwrap();
            assert_eq!(readout.kind(), kind);
            assert_eq!(readout.outdims(), 3);
            let bias = readout.bias().unwrap().into_data().to_vec::<f32>().unwrap();
            assert_eq!(bias, vec![0.1, 0.2, 0.3]);
            let y = readout.forward(Tensor::ones([2, 2, 8, 8], &device), &SharedParameters::none()).unwrap();
            assert_eq!(y.dims(), [2, 3]);
        }
    }

    #[test]
    fn test_reject_sharing_names_component() {
        let mut options = ResolvedReadoutOptions::default();
        options.shared_grid = Some(SharedDescriptor::owner(vec![1]));
        let err = reject_sharing(&options, ReadoutType::FullSxf, true).unwrap_err();
        assert!(err.to_string().contains("shared grid"));
    }
}
