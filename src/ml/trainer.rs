// ============================================================
// Layer 5 - Fitting Loop
// ============================================================
// Fits every readout of a registry to its session's responses
// with Adam. Each epoch visits the sessions in registry order:
//
//   for each session key:
//     for each shuffled mini-batch:
//       loss = MSE(readout(x), r) + regularizer(key) / N_train
//       backward, Adam step
//
// then scores every session on its validation split.
//
// Key Burn 0.20 insight:
//   - Fitting uses B (an AutodiffBackend) for gradients
//   - model.valid() returns the registry on B::InnerBackend
//   - Validation batches must also live on B::InnerBackend
//
// Reference: Burn Book §5, Kingma & Ba (2015) Adam

use anyhow::{anyhow, Context, Result};
use burn::{
    data::dataset::Dataset,
    module::AutodiffModule,
    nn::loss::{MseLoss, Reduction as LossReduction},
    optim::{AdamConfig, GradientsParams, Optimizer},
    prelude::*,
    tensor::backend::AutodiffBackend,
};
use rand::{rngs::StdRng, seq::SliceRandom, SeedableRng};

use crate::application::fit_use_case::FitConfig;
use crate::data::{
    batcher::ResponseBatcher,
    dataset::{ResponseSample, SessionDataset},
};
use crate::domain::{config::MultiReadoutConfig, options::Reduction};
use crate::infra::metrics::{neuron_correlations, EpochMetrics, MetricsLogger};
use crate::ml::multi_readout::MultiReadout;

type FitBackend = burn::backend::Autodiff<burn::backend::Wgpu>;

/// Training and validation samples of one session.
#[derive(Debug, Clone)]
pub struct SessionSplit {
    pub train: SessionDataset,
    pub valid: SessionDataset,
}

/// Fit on the default WGPU device.
pub fn run_fit(
    cfg:       &FitConfig,
    model_cfg: &MultiReadoutConfig,
    sessions:  &[SessionSplit],
    logger:    Option<&MetricsLogger>,
) -> Result<(MultiReadout<FitBackend>, Vec<EpochMetrics>)> {
    let device = burn::backend::wgpu::WgpuDevice::default();
    tracing::info!("Using WGPU device: {:?}", device);
    fit_loop::<FitBackend>(cfg, model_cfg, sessions, logger, &device)
}

pub fn fit_loop<B: AutodiffBackend>(
    cfg:       &FitConfig,
    model_cfg: &MultiReadoutConfig,
    sessions:  &[SessionSplit],
    logger:    Option<&MetricsLogger>,
    device:    &B::Device,
) -> Result<(MultiReadout<B>, Vec<EpochMetrics>)> {
    // ── Build registry ────────────────────────────────────────────────────────
    let mut model = MultiReadout::<B>::new(model_cfg, device).context("Cannot build the multi-readout")?;
    tracing::info!("Registry ready: {} readouts, {} parameters", model.len(), model.num_params());

    for session in sessions {
        if !model.contains_key(session.train.key()) {
            return Err(anyhow!("session '{}' has no readout in the registry", session.train.key()));
        }
    }

    let mut optim   = AdamConfig::new().with_epsilon(1e-8).init();
    let mut rng     = StdRng::seed_from_u64(cfg.seed);
    let batch_size  = cfg.batch_size.max(1);
    let mut history = Vec::with_capacity(cfg.epochs);

    // ── Epoch loop ────────────────────────────────────────────────────────────
    for epoch in 1..=cfg.epochs {
        let mut train_loss_sum = 0.0f64;
        let mut train_batches  = 0usize;

        for session in sessions {
            let train   = &session.train;
            let key     = train.key();
            let batcher = ResponseBatcher::<B>::new(device.clone(), train.in_shape(), train.n_neurons());
            let scale   = train.len().max(1) as f64;

            let mut order: Vec<usize> = (0..train.len()).collect();
            order.shuffle(&mut rng);

            for chunk in order.chunks(batch_size) {
                let items: Vec<ResponseSample> = chunk.iter().filter_map(|&i| train.get(i)).collect();
                let batch = batcher.batch(&items)?;

                let prediction = model.forward(batch.inputs, Some(key))?;
                let mse = MseLoss::new().forward(prediction, batch.targets, LossReduction::Mean);
                let penalty = model.regularizer(Some(key), Reduction::Sum, None)?.div_scalar(scale);
                let loss = mse + penalty;

                train_loss_sum += loss.clone().into_scalar().elem::<f64>();
                train_batches  += 1;

                let grads = GradientsParams::from_grads(loss.backward(), &model);
                model = optim.step(cfg.lr, model, grads);
            }
        }

        let avg_train_loss = if train_batches > 0 {
            train_loss_sum / train_batches as f64
        } else { f64::NAN };

        // ── Validation phase ──────────────────────────────────────────────────
        let (val_loss, val_correlation) = validate(&model.valid(), sessions, batch_size, device)?;
        let metrics = EpochMetrics::new(epoch, avg_train_loss, val_loss, val_correlation);

        println!(
            "Epoch {:>3}/{} | train_loss={:.4} | val_loss={:.4} | val_corr={:.3}",
            epoch, cfg.epochs, avg_train_loss, val_loss, val_correlation,
        );
        if let Some(logger) = logger {
            logger.log(&metrics)?;
        }
        history.push(metrics);
    }

    tracing::info!("Fitting complete!");
    Ok((model, history))
}

/// Mean validation MSE over batches and mean per-neuron correlation.
fn validate<B: Backend>(
    model:      &MultiReadout<B>,
    sessions:   &[SessionSplit],
    batch_size: usize,
    device:     &B::Device,
) -> Result<(f64, f64)> {
    let mut loss_sum     = 0.0f64;
    let mut batches      = 0usize;
    let mut correlations = Vec::new();

    for session in sessions {
        let valid = &session.valid;
        if valid.is_empty() {
            continue;
        }
        let batcher = ResponseBatcher::<B>::new(device.clone(), valid.in_shape(), valid.n_neurons());
        let mut predicted = Vec::new();
        let mut recorded  = Vec::new();

        for items in valid.samples().chunks(batch_size) {
            let batch = batcher.batch(items)?;
            let prediction = model.forward(batch.inputs, Some(valid.key()))?;
            let mse = MseLoss::new().forward(prediction.clone(), batch.targets.clone(), LossReduction::Mean);
            loss_sum += mse.into_scalar().elem::<f64>();
            batches  += 1;

            predicted.extend(prediction.into_data().to_vec::<f32>().map_err(|e| anyhow!("{e:?}"))?);
            recorded.extend(batch.targets.into_data().to_vec::<f32>().map_err(|e| anyhow!("{e:?}"))?);
        }
        correlations.extend(neuron_correlations(&predicted, &recorded, valid.n_neurons()));
    }

    let val_loss = if batches > 0 { loss_sum / batches as f64 } else { f64::NAN };
    let val_corr = if correlations.is_empty() {
        0.0
    } else {
        correlations.iter().sum::<f64>() / correlations.len() as f64
    };
    Ok((val_loss, val_corr))
}
