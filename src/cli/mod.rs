//! Command-line parsing for the sky dataset reducer.
//!
//! The goal of this module is to keep **argument parsing** separate from the
//! pipeline; `app` turns the parsed arguments into a `PipelineConfig`.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use crate::domain::{DEFAULT_CUTOUT_WIDTH, DEFAULT_EXCLUSION_RADIUS};

/// Top-level CLI.
#[derive(Debug, Parser)]
#[command(
    name = "skyreduce",
    version,
    about = "Reduce binned gamma-ray datasets to per-dataset TS-estimator map bundles"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Load, assemble models, fit the background, reduce and write bundles.
    Run(RunArgs),
    /// Print the assembled model table (free and frozen parameters).
    Models(ModelsArgs),
    /// Write a synthetic two-dataset input set.
    Simulate(SimulateArgs),
}

/// Catalog locations shared by `run` and `models`.
#[derive(Debug, Args, Clone)]
pub struct CatalogArgs {
    /// Catalog used for the exclusion region (and target lookup by default).
    #[arg(long = "catalog-3fhl", env = "SKYREDUCE_CATALOG_3FHL", value_name = "PATH")]
    pub catalog_3fhl: PathBuf,

    /// Catalog the appended point source is taken from.
    #[arg(long = "catalog-4fgl", env = "SKYREDUCE_CATALOG_4FGL", value_name = "PATH")]
    pub catalog_4fgl: PathBuf,
}

#[derive(Debug, Args, Clone)]
pub struct RunArgs {
    /// Dataset collection (`.yaml` index or inline `.json`).
    #[arg(long, value_name = "PATH")]
    pub datasets: PathBuf,

    /// Model configuration (YAML).
    #[arg(long, value_name = "PATH")]
    pub models: PathBuf,

    #[command(flatten)]
    pub catalogs: CatalogArgs,

    /// Resolve the target through a YAML name table.
    #[arg(long, value_name = "PATH", conflicts_with = "sesame")]
    pub names: Option<PathBuf>,

    /// Resolve the target through the CDS Sesame service.
    #[arg(long)]
    pub sesame: bool,

    /// Output path per dataset, in dataset order.
    #[arg(long = "output", value_name = "PATH", conflicts_with = "output_dir")]
    pub outputs: Vec<PathBuf>,

    /// Directory for `<name>-maps.json` outputs (default: next to the datasets).
    #[arg(long, value_name = "DIR")]
    pub output_dir: Option<PathBuf>,

    /// Radius of the exclusion circle, degrees.
    #[arg(long, default_value_t = DEFAULT_EXCLUSION_RADIUS)]
    pub exclusion_radius: f64,

    /// Side of the square cutout around the target, degrees.
    #[arg(long, default_value_t = DEFAULT_CUTOUT_WIDTH)]
    pub cutout_width: f64,

    /// Also write `ts`, `sqrt_ts` and `flux` maps.
    #[arg(long)]
    pub include_ts: bool,

    /// Target source name.
    #[arg(long, default_value = crate::domain::DEFAULT_TARGET)]
    pub target: String,
}

#[derive(Debug, Args, Clone)]
pub struct ModelsArgs {
    /// Model configuration (YAML).
    #[arg(long, value_name = "PATH")]
    pub models: PathBuf,

    /// Catalog the appended point source is taken from.
    #[arg(long = "catalog-4fgl", env = "SKYREDUCE_CATALOG_4FGL", value_name = "PATH")]
    pub catalog_4fgl: PathBuf,
}

#[derive(Debug, Args, Clone)]
pub struct SimulateArgs {
    /// Directory the input set is written to.
    #[arg(long, value_name = "DIR")]
    pub out_dir: PathBuf,

    /// Random seed for the Poisson counts.
    #[arg(long, default_value_t = 42)]
    pub seed: u64,

    /// Image side in pixels.
    #[arg(long, default_value_t = 64)]
    pub npix: usize,
}
