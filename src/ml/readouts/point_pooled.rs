// ============================================================
// Layer 5 - PointPooled2d Readout
// ============================================================
// Each neuron reads the core output at one learned point, on
// the original feature map and on `pool_steps` average-pooled
// copies of it:
//
//   level 0: x                          [B, C, H, W]
//   level 1: avgpool(x)                 [B, C, H/k, W/k]
//   level 2: avgpool(avgpool(x))        ...
//
// The samples are stacked along channels, giving C·(steps+1)
// inputs per neuron, which a per-neuron feature vector weighs.
// Coarser levels let a point see a larger neighbourhood.
//
// Points are clamped to [-1, 1] before use.

use burn::{
    module::Param,
    nn::{pool::AvgPool2dConfig, Initializer},
    prelude::*,
};

use crate::domain::{config::ReadoutType, error::ReadoutError, options::Reduction};
use crate::ml::readouts::{common, reject_sharing, Readout, ReadoutInit, SharedParameters};

#[derive(Module, Debug)]
pub struct PointPooled2d<B: Backend> {
    grid:        Param<Tensor<B, 2>>,
    features:    Param<Tensor<B, 2>>,
    bias:        Option<Param<Tensor<B, 1>>>,
    in_channels: usize,
    in_height:   usize,
    in_width:    usize,
    outdims:     usize,
    pool_steps:  usize,
    pool_kern:   usize,
    init_range:  f64,
    reg_weight:  f64,
}

impl<B: Backend> PointPooled2d<B> {
    pub fn new(init: ReadoutInit<'_>, device: &B::Device) -> Result<Self, ReadoutError> {
        reject_sharing(&init.options, ReadoutType::PointPooled2d, false)?;
        let [channels, height, width] = init.in_shape;
        let hp = &init.options.hyperparameters;
        let outdims = init.outdims;

        if hp.pool_kern == 0 {
            return Err(ReadoutError::invalid("pool_kern must be at least 1"));
        }
        let (mut h, mut w) = (height, width);
        for _ in 0..hp.pool_steps {
            h /= hp.pool_kern;
            w /= hp.pool_kern;
        }
        if h == 0 || w == 0 {
            return Err(ReadoutError::invalid(format!(
                "{} pooling steps of size {} leave nothing of a {height}x{width} input",
                hp.pool_steps, hp.pool_kern
            )));
        }

        let mut readout = Self {
            grid: Param::from_tensor(Tensor::zeros([outdims, 2], device)),
            features: Param::from_tensor(Tensor::zeros([outdims, channels * (hp.pool_steps + 1)], device)),
            bias: None,
            in_channels: channels,
            in_height: height,
            in_width: width,
            outdims,
            pool_steps: hp.pool_steps,
            pool_kern: hp.pool_kern,
            init_range: hp.init_range,
            reg_weight: init.reg_weight,
        };
        if hp.bias {
            readout.bias = Some(common::bias_param(outdims, None, device)?);
        }
        readout.initialize(init.mean_activity)?;
        Ok(readout)
    }

    /// Sampling points clamped to the valid range [N, 2].
    pub fn points(&self) -> Tensor<B, 2> {
        self.grid.val().clamp(-1.0, 1.0)
    }
}

impl<B: Backend> Readout<B> for PointPooled2d<B> {
    fn outdims(&self) -> usize {
        self.outdims
    }

    fn forward(&self, x: Tensor<B, 4>, _anchor: &SharedParameters<'_, B>) -> Result<Tensor<B, 2>, ReadoutError> {
        common::check_input(x.dims(), [self.in_channels, self.in_height, self.in_width])?;
        let points = self.points();
        let pool = AvgPool2dConfig::new([self.pool_kern, self.pool_kern])
            .with_strides([self.pool_kern, self.pool_kern])
            .init();

        let mut level = x;
        let mut samples = Vec::with_capacity(self.pool_steps + 1);
        for step in 0..=self.pool_steps {
            if step > 0 {
                level = pool.forward(level);
            }
            let [_, _, height, width] = level.dims();
            let weights = common::bilinear_weights(points.clone(), height, width);
            samples.push(common::pool_at(level.clone(), weights));
        }

        let pooled = Tensor::cat(samples, 1);
        Ok(common::combine(pooled, self.features.val(), self.bias()))
    }

    fn feature_weights(&self, _anchor: &SharedParameters<'_, B>) -> Result<Tensor<B, 2>, ReadoutError> {
        Ok(self.features.val())
    }

    fn regularizer(
        &self,
        reduction: Reduction,
        average:   Option<bool>,
        _anchor:   &SharedParameters<'_, B>,
    ) -> Result<Tensor<B, 1>, ReadoutError> {
        let l1 = common::reduce(self.features.val().abs(), reduction.resolve(average));
        Ok(l1.mul_scalar(self.reg_weight))
    }

    fn initialize(&mut self, mean_activity: Option<&[f32]>) -> Result<(), ReadoutError> {
        let device = self.grid.val().device();
        let width = self.in_channels * (self.pool_steps + 1);
        self.grid = Initializer::Uniform { min: -self.init_range, max: self.init_range }
            .init([self.outdims, 2], &device);
        self.features = Initializer::Constant { value: 1.0 / self.in_channels as f64 }
            .init([self.outdims, width], &device);
        if self.bias.is_some() {
            self.bias = Some(common::bias_param(self.outdims, mean_activity, &device)?);
        }
        Ok(())
    }

    fn bias(&self) -> Option<Tensor<B, 1>> {
        self.bias.as_ref().map(|b| b.val())
    }
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;
    use crate::domain::options::ResolvedReadoutOptions;

    type TB = NdArray;

    fn init(in_shape: [usize; 3], options: ResolvedReadoutOptions) -> ReadoutInit<'static> {
        ReadoutInit { in_shape, outdims: 4, mean_activity: None, reg_weight: 1.0, options }
    }

    #[test]
    fn test_output_shape_and_feature_width() {
        let device = Default::default();
        let r = PointPooled2d::<TB>::new(init([3, 8, 8], Default::default()), &device).unwrap();
        assert_eq!(r.features.val().dims(), [4, 9]);
        let y = r.forward(Tensor::ones([2, 3, 8, 8], &device), &SharedParameters::none()).unwrap();
        assert_eq!(y.dims(), [2, 4]);
    }

    #[test]
    fn test_constant_input_reads_constant() {
        let device = Default::default();
        let r = PointPooled2d::<TB>::new(init([2, 8, 8], Default::default()), &device).unwrap();
        // features are 1/C over C·3 inputs of value 1, bias 0 → 3
        let y = r.forward(Tensor::ones([1, 2, 8, 8], &device), &SharedParameters::none()).unwrap();
        for v in y.into_data().to_vec::<f32>().unwrap() {
            assert!((v - 3.0).abs() < 1e-4, "{v}");
        }
    }

    #[test]
    fn test_too_many_pool_steps() {
        let device = Default::default();
        let mut options = ResolvedReadoutOptions::default();
        options.hyperparameters.pool_steps = 4;
        assert!(PointPooled2d::<TB>::new(init([2, 8, 8], options), &device).is_err());
    }
}
