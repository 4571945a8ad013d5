// ============================================================
// Layer 4 - Response Batcher
// ============================================================
// Stacks ResponseSamples of one session into tensors:
//
//   Input:  N samples, each with C·H·W inputs and K responses
//   Output: inputs  [N, C, H, W]
//           targets [N, K]
//
// Samples are flattened into one Vec and reshaped, so every
// sample must carry exactly C·H·W inputs and K responses.
//
// The batcher is generic over the backend: training builds
// batches on the autodiff backend, validation on its inner one.
//
// Reference: Burn Book §4 (Batcher)

use anyhow::{bail, Result};
use burn::{prelude::*, tensor::TensorData};

use crate::data::dataset::ResponseSample;

// ─── ResponseBatch ────────────────────────────────────────────────────────────
#[derive(Debug, Clone)]
pub struct ResponseBatch<B: Backend> {
    /// Core outputs - shape: [batch_size, C, H, W]
    pub inputs:  Tensor<B, 4>,
    /// Recorded responses - shape: [batch_size, n_neurons]
    pub targets: Tensor<B, 2>,
}

// ─── ResponseBatcher ──────────────────────────────────────────────────────────
#[derive(Clone, Debug)]
pub struct ResponseBatcher<B: Backend> {
    pub device:    B::Device,
    pub in_shape:  [usize; 3],
    pub n_neurons: usize,
}

impl<B: Backend> ResponseBatcher<B> {
    pub fn new(device: B::Device, in_shape: [usize; 3], n_neurons: usize) -> Self {
        Self { device, in_shape, n_neurons }
    }

    pub fn batch(&self, items: &[ResponseSample]) -> Result<ResponseBatch<B>> {
        let [c, h, w] = self.in_shape;
        let batch_size = items.len();
        if batch_size == 0 {
            bail!("cannot batch zero samples");
        }

        let mut inputs = Vec::with_capacity(batch_size * c * h * w);
        let mut targets = Vec::with_capacity(batch_size * self.n_neurons);
        for (i, sample) in items.iter().enumerate() {
            if sample.inputs.len() != c * h * w || sample.responses.len() != self.n_neurons {
                bail!(
                    "sample {i} has {} inputs and {} responses, expected {} and {}",
                    sample.inputs.len(),
                    sample.responses.len(),
                    c * h * w,
                    self.n_neurons
                );
            }
            inputs.extend_from_slice(&sample.inputs);
            targets.extend_from_slice(&sample.responses);
        }

        Ok(ResponseBatch {
            inputs:  Tensor::from_data(TensorData::new(inputs, [batch_size, c, h, w]), &self.device),
            targets: Tensor::from_data(TensorData::new(targets, [batch_size, self.n_neurons]), &self.device),
        })
    }
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;

    #[test]
    fn test_batch_shapes() {
        let batcher = ResponseBatcher::<NdArray>::new(Default::default(), [2, 1, 3], 4);
        let sample = ResponseSample { inputs: vec![0.5; 6], responses: vec![1.0; 4] };
        let batch = batcher.batch(&[sample.clone(), sample.clone(), sample]).unwrap();
        assert_eq!(batch.inputs.dims(), [3, 2, 1, 3]);
        assert_eq!(batch.targets.dims(), [3, 4]);
    }

    #[test]
    fn test_rejects_mismatched_sample() {
        let batcher = ResponseBatcher::<NdArray>::new(Default::default(), [1, 2, 2], 1);
        let sample = ResponseSample { inputs: vec![0.0; 3], responses: vec![1.0] };
        assert!(batcher.batch(&[sample]).is_err());
        assert!(batcher.batch(&[]).is_err());
    }
}
