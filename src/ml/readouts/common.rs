// ============================================================
// Layer 5 - Readout Building Blocks
// ============================================================
// Tensor helpers every readout kind is assembled from.
//
// All readouts share the same final step:
//
//   core output x        [batch, C, H, W]
//        │  spatial weights per neuron  [N, H·W]
//        ▼
//   pooled               [batch, C, N]
//        │  feature weights per neuron  [N, C]
//        ▼
//   response             [batch, N]  (+ bias)
//
// They differ only in how the spatial weights are produced:
// a learned mask, a bilinear "tent" around a learned point,
// or a normalised Gaussian window.
//
// Positions use normalised coordinates in [-1, 1] with the
// first and last pixel centres at exactly -1 and 1.
//
// Reference: Burn Book §3 (Building Blocks)

use burn::{module::Param, prelude::*, tensor::TensorData};

use crate::domain::{error::ReadoutError, options::Reduction};

const EPS: f64 = 1e-6;

/// Normalised coordinate of pixel `i` along an axis of `n` pixels.
pub(crate) fn axis_coordinate(n: usize, i: usize) -> f32 {
    if n <= 1 {
        0.0
    } else {
        -1.0 + 2.0 * i as f32 / (n - 1) as f32
    }
}

/// Pixel centres as rows of (x, y), in row-major pixel order. Shape [H·W, 2].
pub(crate) fn pixel_coordinates<B: Backend>(height: usize, width: usize, device: &B::Device) -> Tensor<B, 2> {
    let mut coords = Vec::with_capacity(height * width * 2);
    for h in 0..height {
        for w in 0..width {
            coords.push(axis_coordinate(width, w));
            coords.push(axis_coordinate(height, h));
        }
    }
    Tensor::from_data(TensorData::new(coords, [height * width, 2]), device)
}

/// Pixel position minus each neuron's point. Shape [N, H·W, 2].
fn offsets<B: Backend>(points: Tensor<B, 2>, height: usize, width: usize) -> Tensor<B, 3> {
    let [outdims, _] = points.dims();
    let pixels = height * width;
    let coords = pixel_coordinates::<B>(height, width, &points.device())
        .unsqueeze::<3>()
        .expand([outdims, pixels, 2]);
    coords - points.unsqueeze_dim::<3>(1).expand([outdims, pixels, 2])
}

/// Bilinear interpolation weights of each neuron's point. Shape [N, H·W].
///
/// Multiplying a feature map by these weights and summing over pixels
/// is exactly bilinear sampling at the point.
pub(crate) fn bilinear_weights<B: Backend>(points: Tensor<B, 2>, height: usize, width: usize) -> Tensor<B, 2> {
    let [outdims, _] = points.dims();
    let pixels = height * width;
    let device = points.device();

    // Pixel spacing is 2 / (n - 1), so the tent reaches zero one pixel away
    let half_extent = Tensor::<B, 1>::from_data(
        TensorData::new(
            vec![width.saturating_sub(1) as f32 / 2.0, height.saturating_sub(1) as f32 / 2.0],
            [2],
        ),
        &device,
    )
    .reshape([1, 1, 2])
    .expand([outdims, pixels, 2]);

    let tent = (offsets(points, height, width).abs() * half_extent)
        .neg()
        .add_scalar(1.0)
        .clamp_min(0.0);

    let wx = tent.clone().slice([0..outdims, 0..pixels, 0..1]);
    let wy = tent.slice([0..outdims, 0..pixels, 1..2]);
    (wx * wy).reshape([outdims, pixels])
}

/// Normalised isotropic Gaussian windows. `sigma` is [N, 1]. Shape [N, H·W].
pub(crate) fn gaussian_weights<B: Backend>(
    mu:     Tensor<B, 2>,
    sigma:  Tensor<B, 2>,
    height: usize,
    width:  usize,
) -> Tensor<B, 2> {
    let [outdims, _] = mu.dims();
    let pixels = height * width;

    let dist2 = offsets(mu, height, width)
        .powf_scalar(2.0)
        .sum_dim(2)
        .reshape([outdims, pixels]);
    let var = sigma.powf_scalar(2.0).mul_scalar(2.0).add_scalar(EPS).expand([outdims, pixels]);

    let weights = (dist2.neg() / var).exp();
    let total = weights.clone().sum_dim(1).add_scalar(1e-8).expand([outdims, pixels]);
    weights / total
}

/// Weighted spatial sum per neuron. [B, C, H, W] × [N, H·W] → [B, C, N].
pub(crate) fn pool_at<B: Backend>(x: Tensor<B, 4>, spatial: Tensor<B, 2>) -> Tensor<B, 3> {
    let [batch, channels, height, width] = x.dims();
    let [outdims, _] = spatial.dims();
    let pixels = height * width;

    let x = x.reshape([batch, channels, pixels]);
    let spatial = spatial
        .swap_dims(0, 1)
        .unsqueeze::<3>()
        .expand([batch, pixels, outdims]);
    x.matmul(spatial)
}

/// Contract pooled channels with per-neuron features. [B, C, N] × [N, C] → [B, N].
pub(crate) fn combine<B: Backend>(
    pooled:   Tensor<B, 3>,
    features: Tensor<B, 2>,
    bias:     Option<Tensor<B, 1>>,
) -> Tensor<B, 2> {
    let [batch, channels, outdims] = pooled.dims();
    let features = features
        .swap_dims(0, 1)
        .unsqueeze::<3>()
        .expand([batch, channels, outdims]);
    let y = (pooled * features).sum_dim(1).reshape([batch, outdims]);
    match bias {
        Some(bias) => y + bias.unsqueeze::<2>().expand([batch, outdims]),
        None => y,
    }
}

/// L2-normalise each row.
pub(crate) fn normalize_rows<B: Backend>(weights: Tensor<B, 2>) -> Tensor<B, 2> {
    let dims = weights.dims();
    let norm = weights.clone().powf_scalar(2.0).sum_dim(1).sqrt().add_scalar(EPS).expand(dims);
    weights / norm
}

/// Exponential linear unit with alpha = 1.
pub(crate) fn elu<B: Backend>(x: Tensor<B, 2>) -> Tensor<B, 2> {
    x.clone().clamp_min(0.0) + x.clamp_max(0.0).exp().sub_scalar(1.0)
}

/// Collapse a penalty matrix according to `reduction`.
pub(crate) fn reduce<B: Backend>(x: Tensor<B, 2>, reduction: Reduction) -> Tensor<B, 1> {
    match reduction {
        Reduction::Mean      => x.mean(),
        Reduction::Sum       => x.sum(),
        Reduction::Unreduced => x.flatten::<1>(0, 1),
    }
}

/// Bias parameter set to the mean activity, or zeros.
pub(crate) fn bias_param<B: Backend>(
    outdims:       usize,
    mean_activity: Option<&[f32]>,
    device:        &B::Device,
) -> Result<Param<Tensor<B, 1>>, ReadoutError> {
    let values = match mean_activity {
        Some(mean) if mean.len() != outdims => {
            return Err(ReadoutError::invalid(format!(
                "mean activity has {} entries, readout has {outdims} neurons",
                mean.len()
            )))
        }
        Some(mean) => mean.to_vec(),
        None => vec![0.0; outdims],
    };
    Ok(Param::from_tensor(Tensor::from_data(TensorData::new(values, [outdims]), device)))
}

/// Row indices into a shared table, as an Int tensor.
pub(crate) fn row_index<B: Backend>(rows: &[i32], device: &B::Device) -> Tensor<B, 1, Int> {
    Tensor::from_data(TensorData::new(rows.to_vec(), [rows.len()]), device)
}

/// The core output must match the shape the readout was built for.
pub(crate) fn check_input(got: [usize; 4], expected: [usize; 3]) -> Result<(), ReadoutError> {
    let [_, c, h, w] = got;
    if [c, h, w] != expected {
        return Err(ReadoutError::invalid(format!(
            "core output has shape [{c}, {h}, {w}], readout expects {expected:?}"
        )));
    }
    Ok(())
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;

    type TB = NdArray;

    fn values<const D: usize>(t: Tensor<TB, D>) -> Vec<f32> {
        t.into_data().to_vec::<f32>().unwrap()
    }

    #[test]
    fn test_axis_coordinate_endpoints() {
        assert_eq!(axis_coordinate(5, 0), -1.0);
        assert_eq!(axis_coordinate(5, 4), 1.0);
        assert_eq!(axis_coordinate(1, 0), 0.0);
    }

    #[test]
    fn test_bilinear_on_pixel_centre_is_one_hot() {
        let device = Default::default();
        // Point at the centre pixel of a 3x3 map
        let points = Tensor::<TB, 2>::from_data(TensorData::new(vec![0.0f32, 0.0], [1, 2]), &device);
        let w = values(bilinear_weights(points, 3, 3));
        assert_eq!(w.len(), 9);
        for (i, v) in w.iter().enumerate() {
            let expected = if i == 4 { 1.0 } else { 0.0 };
            assert!((v - expected).abs() < 1e-6, "pixel {i}: {v}");
        }
    }

    #[test]
    fn test_bilinear_between_pixels_splits_weight() {
        let device = Default::default();
        // Halfway between the first two pixels of a 1x3 row
        let points = Tensor::<TB, 2>::from_data(TensorData::new(vec![-0.5f32, 0.0], [1, 2]), &device);
        let w = values(bilinear_weights(points, 1, 3));
        assert!((w[0] - 0.5).abs() < 1e-6);
        assert!((w[1] - 0.5).abs() < 1e-6);
        assert!(w[2].abs() < 1e-6);
    }

    #[test]
    fn test_gaussian_weights_sum_to_one() {
        let device = Default::default();
        let mu = Tensor::<TB, 2>::from_data(TensorData::new(vec![0.2f32, -0.1, -0.5, 0.5], [2, 2]), &device);
        let sigma = Tensor::<TB, 2>::from_data(TensorData::new(vec![0.3f32, 1.0], [2, 1]), &device);
        let w = values(gaussian_weights(mu, sigma, 4, 5).sum_dim(1));
        for total in w {
            assert!((total - 1.0).abs() < 1e-4);
        }
    }

    #[test]
    fn test_pool_and_combine() {
        let device = Default::default();
        // batch 1, 2 channels, 1x2 pixels: channel 0 = [1, 2], channel 1 = [3, 4]
        let x = Tensor::<TB, 4>::from_data(TensorData::new(vec![1.0f32, 2.0, 3.0, 4.0], [1, 2, 1, 2]), &device);
        // one neuron looking only at pixel 1
        let spatial = Tensor::<TB, 2>::from_data(TensorData::new(vec![0.0f32, 1.0], [1, 2]), &device);
        let features = Tensor::<TB, 2>::from_data(TensorData::new(vec![1.0f32, 10.0], [1, 2]), &device);
        let bias = Tensor::<TB, 1>::from_data(TensorData::new(vec![0.5f32], [1]), &device);

        let y = values(combine(pool_at(x, spatial), features, Some(bias)));
        // 2 * 1 + 4 * 10 + 0.5
        assert_eq!(y, vec![42.5]);
    }

    #[test]
    fn test_bias_param_rejects_wrong_length() {
        let device = Default::default();
        let res = bias_param::<TB>(3, Some(&[1.0, 2.0]), &device);
        assert!(res.is_err());
        let ok = bias_param::<TB>(2, Some(&[1.0, 2.0]), &device).unwrap();
        assert_eq!(values(ok.val()), vec![1.0, 2.0]);
    }

    #[test]
    fn test_reduce_modes() {
        let device = Default::default();
        let x = Tensor::<TB, 2>::from_data(TensorData::new(vec![1.0f32, 2.0, 3.0, 6.0], [2, 2]), &device);
        assert_eq!(values(reduce(x.clone(), Reduction::Sum)), vec![12.0]);
        assert_eq!(values(reduce(x.clone(), Reduction::Mean)), vec![3.0]);
        assert_eq!(values(reduce(x, Reduction::Unreduced)).len(), 4);
    }

    #[test]
    fn test_elu_negative_branch() {
        let device = Default::default();
        let x = Tensor::<TB, 2>::from_data(TensorData::new(vec![-1.0f32, 2.0], [1, 2]), &device);
        let y = values(elu(x));
        assert!((y[0] - ((-1.0f32).exp() - 1.0)).abs() < 1e-6);
        assert_eq!(y[1], 2.0);
    }
}
