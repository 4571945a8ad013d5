// ============================================================
// Layer 1 - CLI Commands and Arguments
// ============================================================
// Defines the two subcommands, `inspect` and `fit`, and all
// their configurable flags.
//
// Readout types and reductions parse through their FromStr
// impls, so `--base-readout fullgaussian2d` and
// `--reduction mean` are checked before any use case runs.
//
// Reference: Rust Book §12 (Building a CLI Program)

use clap::{Args, Subcommand};

use crate::application::{fit_use_case::FitConfig, inspect_use_case::InspectConfig};
use crate::data::synthetic::SessionSpec;
use crate::domain::{config::ReadoutType, options::Reduction};

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Build a registry from a JSON config and report on every key
    Inspect(InspectArgs),

    /// Fit a registry on synthetic recording sessions
    Fit(FitArgs),
}

#[derive(Args, Debug)]
pub struct InspectArgs {
    /// Multi-readout config JSON
    #[arg(long)]
    pub config: String,

    /// Batch size of the zero input each key is probed with
    #[arg(long, default_value_t = 1)]
    pub batch_size: usize,

    /// Reduction of the reported regularizer: mean, sum or none
    #[arg(long, default_value = "sum")]
    pub reduction: Reduction,

    /// Also print the options each key's readout was built with
    #[arg(long)]
    pub show_options: bool,
}

impl From<InspectArgs> for InspectConfig {
    fn from(a: InspectArgs) -> Self {
        InspectConfig {
            config_path:  a.config,
            batch_size:   a.batch_size,
            reduction:    a.reduction,
            show_options: a.show_options,
        }
    }
}

#[derive(Args, Debug)]
pub struct FitArgs {
    /// Multi-readout config JSON; built from the sessions when omitted
    #[arg(long)]
    pub config: Option<String>,

    /// Directory for the saved config, weights and metrics.csv
    #[arg(long, default_value = "checkpoints")]
    pub checkpoint_dir: String,

    /// Readout kind when no config is given
    #[arg(long, default_value = "FullGaussian2d")]
    pub base_readout: ReadoutType,

    /// Make every session after the first a clone of it
    #[arg(long)]
    pub clone_readout: bool,

    /// Number of synthetic sessions
    #[arg(long, default_value_t = 2)]
    pub sessions: usize,

    /// Neurons per session
    #[arg(long, default_value_t = 8)]
    pub neurons: usize,

    /// Core output shape: channels height width
    #[arg(long, num_args = 3, value_names = ["C", "H", "W"], default_values_t = [4, 12, 12])]
    pub in_shape: Vec<usize>,

    /// Stimuli per session
    #[arg(long, default_value_t = 200)]
    pub samples: usize,

    /// Half-width of the uniform response noise
    #[arg(long, default_value_t = 0.05)]
    pub noise: f32,

    #[arg(long, default_value_t = 42)]
    pub seed: u64,

    /// Fraction of each session used for fitting
    #[arg(long, default_value_t = 0.8)]
    pub train_fraction: f64,

    #[arg(long, default_value_t = 16)]
    pub batch_size: usize,

    #[arg(long, default_value_t = 10)]
    pub epochs: usize,

    #[arg(long, default_value_t = 1e-2)]
    pub lr: f64,
}

impl From<FitArgs> for FitConfig {
    fn from(a: FitArgs) -> Self {
        let in_shape = match a.in_shape.as_slice() {
            &[c, h, w] => [c, h, w],
            _ => FitConfig::default().sessions[0].in_shape,
        };
        let sessions = (1..=a.sessions)
            .map(|i| SessionSpec {
                key:       format!("session-{i}"),
                in_shape,
                n_neurons: a.neurons,
                n_samples: a.samples,
            })
            .collect();

        FitConfig {
            readout_config: a.config,
            checkpoint_dir: a.checkpoint_dir,
            sessions,
            base_readout:   a.base_readout,
            clone_readout:  a.clone_readout,
            noise:          a.noise,
            seed:           a.seed,
            train_fraction: a.train_fraction,
            batch_size:     a.batch_size,
            epochs:         a.epochs,
            lr:             a.lr,
        }
    }
}
