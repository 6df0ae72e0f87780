use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Fits Kronecker-product-composed Markovian arrival processes to traces.
#[derive(Parser)]
#[command(
    name = "kpcfit",
    version,
    about = "Fit KPC Markovian arrival processes to inter-arrival traces"
)]
pub struct Cli {
    /// Increase verbosity (-v info, -vv debug, -vvv trace).
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Subcommand to run.
    #[command(subcommand)]
    pub command: Command,
}

/// Available subcommands.
#[derive(Subcommand)]
pub enum Command {
    /// Fit a MAP to a trace of inter-arrival times.
    Fit(FitArgs),
}

/// Arguments for the `fit` subcommand.
#[derive(clap::Args)]
pub struct FitArgs {
    /// Whitespace-separated inter-arrival times.
    #[arg(short, long)]
    pub trace: PathBuf,

    /// Path to TOML configuration file; defaults apply when omitted.
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Path for the TOML fit report; printed to stdout when omitted.
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Override RNG seed from config.
    #[arg(short, long)]
    pub seed: Option<u64>,

    /// Override the number of composed components (0 selects it by BIC).
    #[arg(short, long)]
    pub maps: Option<usize>,

    /// Fit bicorrelations after autocorrelations.
    #[arg(long = "with-bc")]
    pub with_bc: bool,
}
