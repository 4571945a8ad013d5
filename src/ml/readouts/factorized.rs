// ============================================================
// Layer 5 - Factorized Readouts
// ============================================================
// Each neuron's weight over the core output factorises into a
// spatial mask times a feature vector:
//
//   w[n, c, h, w] = spatial[n, h, w] · features[n, c]
//
// SpatialXFeatureLinear - fully owned, penalised by the product
//                         of spatial and feature L1 norms
// FullSxf               - same mapping, but feature vectors may
//                         come from a table shared across
//                         datasets; penalised by feature L1
//
// Reference: Klindt et al. (2017) Neural system identification
//            for large populations separating "what" and "where"

use burn::{
    module::Param,
    nn::Initializer,
    prelude::*,
};

use crate::domain::{config::ReadoutType, error::ReadoutError, options::Reduction};
use crate::ml::readouts::{common, reject_sharing, shared::FeatureWeights, Readout, ReadoutInit, SharedParameters};

// ─── SpatialXFeatureLinear ────────────────────────────────────────────────────
#[derive(Module, Debug)]
pub struct SpatialXFeatureLinear<B: Backend> {
    spatial:     Param<Tensor<B, 2>>,
    features:    Param<Tensor<B, 2>>,
    bias:        Option<Param<Tensor<B, 1>>>,
    in_channels: usize,
    in_height:   usize,
    in_width:    usize,
    outdims:     usize,
    normalize:   bool,
    init_noise:  f64,
    reg_weight:  f64,
}

impl<B: Backend> SpatialXFeatureLinear<B> {
    pub fn new(init: ReadoutInit<'_>, device: &B::Device) -> Result<Self, ReadoutError> {
        reject_sharing(&init.options, ReadoutType::SpatialXFeatureLinear, false)?;
        let [channels, height, width] = init.in_shape;
        let hp = &init.options.hyperparameters;
        let outdims = init.outdims;

        let mut readout = Self {
            spatial: Param::from_tensor(Tensor::zeros([outdims, height * width], device)),
            features: Param::from_tensor(Tensor::zeros([outdims, channels], device)),
            bias: None,
            in_channels: channels,
            in_height: height,
            in_width: width,
            outdims,
            normalize: hp.normalize,
            init_noise: hp.init_noise,
            reg_weight: init.reg_weight,
        };
        if hp.bias {
            readout.bias = Some(common::bias_param(outdims, None, device)?);
        }
        readout.initialize(init.mean_activity)?;
        Ok(readout)
    }

    fn spatial_mask(&self) -> Tensor<B, 2> {
        let spatial = self.spatial.val();
        if self.normalize {
            common::normalize_rows(spatial)
        } else {
            spatial
        }
    }
}

impl<B: Backend> Readout<B> for SpatialXFeatureLinear<B> {
    fn outdims(&self) -> usize {
        self.outdims
    }

    fn forward(&self, x: Tensor<B, 4>, _anchor: &SharedParameters<'_, B>) -> Result<Tensor<B, 2>, ReadoutError> {
        common::check_input(x.dims(), [self.in_channels, self.in_height, self.in_width])?;
        let pooled = common::pool_at(x, self.spatial_mask());
        Ok(common::combine(pooled, self.features.val(), self.bias()))
    }

    fn feature_weights(&self, _anchor: &SharedParameters<'_, B>) -> Result<Tensor<B, 2>, ReadoutError> {
        Ok(self.features.val())
    }

    /// Σ_n |spatial_n|₁ · |features_n|₁, divided by N for the mean.
    fn regularizer(
        &self,
        reduction: Reduction,
        average:   Option<bool>,
        _anchor:   &SharedParameters<'_, B>,
    ) -> Result<Tensor<B, 1>, ReadoutError> {
        let reduction = reduction.resolve(average);
        if reduction == Reduction::Unreduced {
            return Err(ReadoutError::UnsupportedReduction(reduction));
        }
        let spatial_l1 = self.spatial_mask().abs().sum_dim(1);
        let feature_l1 = self.features.val().abs().sum_dim(1);
        let total = (spatial_l1 * feature_l1).sum();
        let total = match reduction {
            Reduction::Mean => total.div_scalar(self.outdims as f64),
            _ => total,
        };
        Ok(total.mul_scalar(self.reg_weight))
    }

    fn initialize(&mut self, mean_activity: Option<&[f32]>) -> Result<(), ReadoutError> {
        let device = self.features.val().device();
        let noise = Initializer::Normal { mean: 0.0, std: self.init_noise };
        self.spatial = noise.init([self.outdims, self.in_height * self.in_width], &device);
        self.features = noise.init([self.outdims, self.in_channels], &device);
        if self.bias.is_some() {
            self.bias = Some(common::bias_param(self.outdims, mean_activity, &device)?);
        }
        Ok(())
    }

    fn bias(&self) -> Option<Tensor<B, 1>> {
        self.bias.as_ref().map(|b| b.val())
    }
}

// ─── FullSxf ──────────────────────────────────────────────────────────────────
#[derive(Module, Debug)]
pub struct FullSxf<B: Backend> {
    spatial:     Param<Tensor<B, 2>>,
    features:    FeatureWeights<B>,
    bias:        Option<Param<Tensor<B, 1>>>,
    in_channels: usize,
    in_height:   usize,
    in_width:    usize,
    outdims:     usize,
    normalize:   bool,
    init_noise:  f64,
    reg_weight:  f64,
}

impl<B: Backend> FullSxf<B> {
    pub fn new(init: ReadoutInit<'_>, device: &B::Device) -> Result<Self, ReadoutError> {
        reject_sharing(&init.options, ReadoutType::FullSxf, true)?;
        let [channels, height, width] = init.in_shape;
        let hp = &init.options.hyperparameters;
        let outdims = init.outdims;

        let features = FeatureWeights::new(init.options.shared_features.as_ref(), outdims, channels, device)?;
        let mut readout = Self {
            spatial: Param::from_tensor(Tensor::zeros([outdims, height * width], device)),
            features,
            bias: None,
            in_channels: channels,
            in_height: height,
            in_width: width,
            outdims,
            normalize: hp.normalize,
            init_noise: hp.init_noise,
            reg_weight: init.reg_weight,
        };
        if hp.bias {
            readout.bias = Some(common::bias_param(outdims, None, device)?);
        }
        readout.initialize(init.mean_activity)?;
        Ok(readout)
    }

    pub fn features(&self) -> &FeatureWeights<B> {
        &self.features
    }

    fn spatial_mask(&self) -> Tensor<B, 2> {
        let spatial = self.spatial.val();
        if self.normalize {
            common::normalize_rows(spatial)
        } else {
            spatial
        }
    }
}

impl<B: Backend> Readout<B> for FullSxf<B> {
    fn outdims(&self) -> usize {
        self.outdims
    }

    fn forward(&self, x: Tensor<B, 4>, anchor: &SharedParameters<'_, B>) -> Result<Tensor<B, 2>, ReadoutError> {
        common::check_input(x.dims(), [self.in_channels, self.in_height, self.in_width])?;
        let features = self.features.resolve(anchor)?;
        let pooled = common::pool_at(x, self.spatial_mask());
        Ok(common::combine(pooled, features, self.bias()))
    }

    fn feature_weights(&self, anchor: &SharedParameters<'_, B>) -> Result<Tensor<B, 2>, ReadoutError> {
        self.features.resolve(anchor)
    }

    fn regularizer(
        &self,
        reduction: Reduction,
        average:   Option<bool>,
        anchor:    &SharedParameters<'_, B>,
    ) -> Result<Tensor<B, 1>, ReadoutError> {
        let features = self.features.resolve(anchor)?;
        Ok(common::reduce(features.abs(), reduction.resolve(average)).mul_scalar(self.reg_weight))
    }

    fn initialize(&mut self, mean_activity: Option<&[f32]>) -> Result<(), ReadoutError> {
        let device = self.spatial.val().device();
        let noise = Initializer::Normal { mean: 0.0, std: self.init_noise };
        self.spatial = noise.init([self.outdims, self.in_height * self.in_width], &device);
        self.features.initialize(&noise, &device);
        if self.bias.is_some() {
            self.bias = Some(common::bias_param(self.outdims, mean_activity, &device)?);
        }
        Ok(())
    }

    fn bias(&self) -> Option<Tensor<B, 1>> {
        self.bias.as_ref().map(|b| b.val())
    }

    fn shared_parameters(&self) -> SharedParameters<'_, B> {
        SharedParameters { features: self.features.table(), ..SharedParameters::none() }
    }

    fn check_anchor(&self, anchor: &SharedParameters<'_, B>) -> Result<(), ReadoutError> {
        self.features.check_anchor(anchor)
    }
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;
    use crate::domain::options::{ResolvedReadoutOptions, SharedDescriptor};

    type TB = NdArray;

    fn init(options: ResolvedReadoutOptions) -> ReadoutInit<'static> {
        ReadoutInit { in_shape: [3, 4, 5], outdims: 6, mean_activity: None, reg_weight: 2.0, options }
    }

    #[test]
    fn test_sxf_output_shape() {
        let device = Default::default();
        let r = SpatialXFeatureLinear::<TB>::new(init(Default::default()), &device).unwrap();
        let y = r.forward(Tensor::ones([2, 3, 4, 5], &device), &SharedParameters::none()).unwrap();
        assert_eq!(y.dims(), [2, 6]);
    }

    #[test]
    fn test_sxf_rejects_wrong_input_shape() {
        let device = Default::default();
        let r = SpatialXFeatureLinear::<TB>::new(init(Default::default()), &device).unwrap();
        assert!(r.forward(Tensor::ones([2, 3, 5, 4], &device), &SharedParameters::none()).is_err());
    }

    #[test]
    fn test_sxf_rejects_unreduced_regularizer() {
        let device = Default::default();
        let r = SpatialXFeatureLinear::<TB>::new(init(Default::default()), &device).unwrap();
        let err = r.regularizer(Reduction::Unreduced, None, &SharedParameters::none()).unwrap_err();
        assert!(matches!(err, ReadoutError::UnsupportedReduction(_)));
        // average overrides the reduction, so this one is fine
        assert!(r.regularizer(Reduction::Unreduced, Some(true), &SharedParameters::none()).is_ok());
    }

    #[test]
    fn test_sxf_rejects_shared_features() {
        let device = Default::default();
        let mut options = ResolvedReadoutOptions::default();
        options.shared_features = Some(SharedDescriptor::owner(vec![0; 6]));
        assert!(SpatialXFeatureLinear::<TB>::new(init(options), &device).is_err());
    }

    #[test]
    fn test_full_sxf_owns_shared_table() {
        let device = Default::default();
        let mut options = ResolvedReadoutOptions::default();
        options.shared_features = Some(SharedDescriptor::owner(vec![1, 1, 2, 2, 3, 3]));
        let r = FullSxf::<TB>::new(init(options), &device).unwrap();
        assert_eq!(r.shared_parameters().features.unwrap().dims(), [3, 3]);

        let reg = r.regularizer(Reduction::Unreduced, None, &SharedParameters::none()).unwrap();
        assert_eq!(reg.dims(), [18]);
    }
}
