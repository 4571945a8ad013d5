// ============================================================
// Layer 1 - CLI / Presentation Layer
// ============================================================
// This is the entry point for all user interaction.
// It uses the `clap` crate to parse command line arguments.
// All business logic is delegated to Layer 2 (application).
//
// Two commands are supported:
//   1. `inspect` - builds a registry from a config and prints
//                  a JSON report of every key
//   2. `fit`     - fits a registry on synthetic sessions
//
// Reference: Rust Book §7 (Modules), §12 (CLI programs)

pub mod commands;

use anyhow::{Context, Result};
use clap::Parser;
use commands::{Commands, FitArgs, InspectArgs};

#[derive(Parser, Debug)]
#[command(
    name = "multireadout",
    version,
    about = "Build, inspect and fit per-dataset neural readouts."
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

impl Cli {
    /// Dispatch to the matching use case.
    pub fn run(self) -> Result<()> {
        match self.command {
            Commands::Inspect(args) => run_inspect(args),
            Commands::Fit(args)     => run_fit(args),
        }
    }
}

fn run_inspect(args: InspectArgs) -> Result<()> {
    use crate::application::inspect_use_case::InspectUseCase;

    tracing::info!("Inspecting registry config: {}", args.config);
    let report = InspectUseCase::new(args.into()).execute()?;
    let json = serde_json::to_string_pretty(&report).context("Cannot serialise the report")?;
    println!("{json}");
    Ok(())
}

fn run_fit(args: FitArgs) -> Result<()> {
    use crate::application::fit_use_case::FitUseCase;

    tracing::info!("Fitting {} synthetic sessions", args.sessions);
    let checkpoint_dir = args.checkpoint_dir.clone();
    let history = FitUseCase::new(args.into()).execute()?;

    match history.last() {
        Some(last) => println!(
            "Fitting complete: val_loss={:.4}, val_corr={:.3}. Saved to '{}'.",
            last.val_loss, last.val_correlation, checkpoint_dir
        ),
        None => println!("No epochs run. Config saved to '{checkpoint_dir}'."),
    }
    Ok(())
}
