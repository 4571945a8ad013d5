// ============================================================
// Layer 5 - Cloned Readout
// ============================================================
// A clone owns no pooling weights. It names the readout it
// copies and rescales that readout's output per neuron:
//
//   y_clone = y_source · alpha + beta
//
// The registry evaluates the source and hands its output in,
// so the source's parameters receive gradients from every
// dataset that clones it.

use burn::{
    module::{Ignored, Param},
    nn::Initializer,
    prelude::*,
};

use crate::domain::{error::ReadoutError, options::Reduction};
use crate::ml::readouts::common;

#[derive(Module, Debug)]
pub struct ClonedReadout<B: Backend> {
    alpha:      Param<Tensor<B, 1>>,
    beta:       Param<Tensor<B, 1>>,
    source:     Ignored<String>,
    outdims:    usize,
    reg_weight: f64,
}

impl<B: Backend> ClonedReadout<B> {
    pub fn new(source: &str, outdims: usize, reg_weight: f64, device: &B::Device) -> Self {
        Self {
            alpha: Initializer::Ones.init([outdims], device),
            beta: Initializer::Zeros.init([outdims], device),
            source: Ignored(source.to_string()),
            outdims,
            reg_weight,
        }
    }

    /// Key of the readout this one copies.
    pub fn source_key(&self) -> &str {
        &self.source.0
    }

    pub fn outdims(&self) -> usize {
        self.outdims
    }

    pub fn alpha(&self) -> Tensor<B, 1> {
        self.alpha.val()
    }

    pub fn beta(&self) -> Tensor<B, 1> {
        self.beta.val()
    }

    /// [batch, N] source output → [batch, N]
    pub fn forward(&self, source_output: Tensor<B, 2>) -> Tensor<B, 2> {
        let dims = source_output.dims();
        let alpha = self.alpha.val().unsqueeze::<2>().expand(dims);
        let beta = self.beta.val().unsqueeze::<2>().expand(dims);
        source_output * alpha + beta
    }

    /// Source feature vectors [N, C] scaled by alpha.
    pub fn feature_weights(&self, source_features: Tensor<B, 2>) -> Tensor<B, 2> {
        let dims = source_features.dims();
        source_features * self.alpha.val().unsqueeze_dim::<2>(1).expand(dims)
    }

    pub fn regularizer(
        &self,
        source_features: Tensor<B, 2>,
        reduction:       Reduction,
        average:         Option<bool>,
    ) -> Tensor<B, 1> {
        let scaled = self.feature_weights(source_features).abs();
        common::reduce(scaled, reduction.resolve(average)).mul_scalar(self.reg_weight)
    }

    /// Back to the identity transform. A mean-activity entry is only
    /// checked for length; the source's bias already carries it.
    pub fn initialize(&mut self, mean_activity: Option<&[f32]>) -> Result<(), ReadoutError> {
        if let Some(mean) = mean_activity {
            if mean.len() != self.outdims {
                return Err(ReadoutError::invalid(format!(
                    "mean activity has {} entries, clone has {} neurons",
                    mean.len(),
                    self.outdims
                )));
            }
        }
        let device = self.alpha.val().device();
        self.alpha = Initializer::Ones.init([self.outdims], &device);
        self.beta = Initializer::Zeros.init([self.outdims], &device);
        Ok(())
    }
}
