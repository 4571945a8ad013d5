// ============================================================
// Layer 5 - FullGaussian2d Readout
// ============================================================
// Each neuron pools the core output under an isotropic
// Gaussian window centred at mu with width sigma:
//
//   window_n(p) ∝ exp(-|p - mu_n|² / 2σ_n²)   (sums to 1)
//
// The centres come from one of three places:
//
//   owned      mu is a parameter per neuron
//   shared     mu is gathered by match id from a grid table
//              that the anchor readout owns
//   predicted  mu = MuTransform(source grid), an MLP over each
//              neuron's recorded cortical coordinates; the MLP
//              itself may belong to the anchor
//
// Feature vectors may also be shared by match id.
//
// Reference: Lurz et al. (2021) Generalization in data-driven
//            models of primary visual cortex

use burn::{
    module::Param,
    nn::Initializer,
    prelude::*,
};

use crate::domain::{error::ReadoutError, options::Reduction};
use crate::ml::readouts::{
    common,
    shared::{FeatureWeights, Positions},
    Readout, ReadoutInit, SharedParameters,
};

#[derive(Module, Debug)]
pub struct FullGaussian2d<B: Backend> {
    positions:     Positions<B>,
    sigma:         Param<Tensor<B, 2>>,
    features:      FeatureWeights<B>,
    bias:          Option<Param<Tensor<B, 1>>>,
    in_channels:   usize,
    in_height:     usize,
    in_width:      usize,
    outdims:       usize,
    init_mu_range: f64,
    init_sigma:    f64,
    reg_weight:    f64,
}

impl<B: Backend> FullGaussian2d<B> {
    pub fn new(init: ReadoutInit<'_>, device: &B::Device) -> Result<Self, ReadoutError> {
        let [channels, height, width] = init.in_shape;
        let options = &init.options;
        let hp = &options.hyperparameters;
        let outdims = init.outdims;

        let positions = match (&hp.grid_mean_predictor, &options.source_grid) {
            (Some(cfg), Some(grid)) => {
                Positions::predicted(grid, cfg, options.shared_transform.as_ref(), outdims, device)?
            }
            (Some(_), None) => {
                return Err(ReadoutError::invalid("a grid mean predictor needs a source grid"));
            }
            (None, _) => match &options.shared_grid {
                Some(descriptor) => Positions::shared(descriptor, outdims, device)?,
                None => Positions::owned(outdims, device),
            },
        };
        let features = FeatureWeights::new(options.shared_features.as_ref(), outdims, channels, device)?;

        let mut readout = Self {
            positions,
            sigma: Param::from_tensor(Tensor::zeros([outdims, 1], device)),
            features,
            bias: None,
            in_channels: channels,
            in_height: height,
            in_width: width,
            outdims,
            init_mu_range: hp.init_mu_range,
            init_sigma: hp.init_sigma,
            reg_weight: init.reg_weight,
        };
        if hp.bias {
            readout.bias = Some(common::bias_param(outdims, None, device)?);
        }
        readout.initialize(init.mean_activity)?;
        Ok(readout)
    }

    /// Receptive-field centres [N, 2], clamped to the feature map.
    pub fn mu(&self, anchor: &SharedParameters<'_, B>) -> Result<Tensor<B, 2>, ReadoutError> {
        let device = self.sigma.val().device();
        Ok(self.positions.resolve(anchor, &device)?.clamp(-1.0, 1.0))
    }

    pub fn positions(&self) -> &Positions<B> {
        &self.positions
    }

    pub fn features(&self) -> &FeatureWeights<B> {
        &self.features
    }
}

impl<B: Backend> Readout<B> for FullGaussian2d<B> {
    fn outdims(&self) -> usize {
        self.outdims
    }

    fn forward(&self, x: Tensor<B, 4>, anchor: &SharedParameters<'_, B>) -> Result<Tensor<B, 2>, ReadoutError> {
        common::check_input(x.dims(), [self.in_channels, self.in_height, self.in_width])?;
        let window = common::gaussian_weights(self.mu(anchor)?, self.sigma.val().abs(), self.in_height, self.in_width);
        let features = self.features.resolve(anchor)?;
        Ok(common::combine(common::pool_at(x, window), features, self.bias()))
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
        let device = self.sigma.val().device();
        self.positions.initialize(self.init_mu_range, &device);
        self.sigma = Initializer::Constant { value: self.init_sigma }.init([self.outdims, 1], &device);
        self.features
            .initialize(&Initializer::Constant { value: 1.0 / self.in_channels as f64 }, &device);
        if self.bias.is_some() {
            self.bias = Some(common::bias_param(self.outdims, mean_activity, &device)?);
        }
        Ok(())
    }

    fn bias(&self) -> Option<Tensor<B, 1>> {
        self.bias.as_ref().map(|b| b.val())
    }

    fn shared_parameters(&self) -> SharedParameters<'_, B> {
        SharedParameters {
            grid:      self.positions.table(),
            features:  self.features.table(),
            transform: self.positions.transform(),
        }
    }

    fn check_anchor(&self, anchor: &SharedParameters<'_, B>) -> Result<(), ReadoutError> {
        self.positions.check_anchor(anchor)?;
        self.features.check_anchor(anchor)
    }
}
