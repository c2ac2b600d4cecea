//! Top-level application orchestration.
//!
//! `src/main.rs` is intentionally tiny; this module is the "real main" that:
//! - loads `.env` and parses CLI arguments
//! - builds the run configuration and its collaborators
//! - dispatches to the pipeline, the model table or the simulator

use std::path::PathBuf;

use clap::Parser;

use crate::cli::{Cli, Command, ModelsArgs, RunArgs, SimulateArgs};
use crate::data::{
    CatalogResolver, FileCatalog, NameResolver, SesameResolver, SimulationConfig, TableResolver, simulate,
};
use crate::domain::{OutputSpec, PipelineConfig, ResolverChoice, default_assembly_plan};
use crate::error::AppError;
use crate::fit::PoissonFit;
use crate::io::JsonMapWriter;
use crate::models::read_and_prepare_models;

pub mod pipeline;

/// Entry point for the `skyreduce` binary.
pub fn run() -> Result<(), AppError> {
    // Catalog paths may come from `.env`.
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    match cli.command {
        Command::Run(args) => handle_run(args),
        Command::Models(args) => handle_models(args),
        Command::Simulate(args) => handle_simulate(args),
    }
}

fn handle_run(args: RunArgs) -> Result<(), AppError> {
    let config = pipeline_config_from_args(&args);

    let exclusion_catalog = FileCatalog::read(&config.catalog_3fhl)?;
    let source_catalog = FileCatalog::read(&config.catalog_4fgl)?;
    let resolver: Box<dyn NameResolver + '_> = match &config.resolver {
        ResolverChoice::Catalog => Box::new(CatalogResolver::new(&exclusion_catalog)),
        ResolverChoice::Table(path) => Box::new(TableResolver::read(path)?),
        ResolverChoice::Sesame => Box::new(SesameResolver::new()?),
    };
    let fitter = PoissonFit::default();
    let writer = JsonMapWriter::default();

    let ctx = pipeline::PipelineContext {
        exclusion_catalog: &exclusion_catalog,
        source_catalog: &source_catalog,
        resolver: resolver.as_ref(),
        fitter: &fitter,
        writer: &writer,
    };
    let run = pipeline::run_pipeline(&config, &ctx)?;

    println!("{}", crate::report::format_fit_summary(&run.fit));
    println!("{}", crate::report::format_reduction(&run.reduced, &run.written));
    Ok(())
}

fn handle_models(args: ModelsArgs) -> Result<(), AppError> {
    let plan = default_assembly_plan();
    let catalog = FileCatalog::read(&args.catalog_4fgl)?;
    let models = read_and_prepare_models(&args.models, &plan, &catalog)?;
    println!("{}", crate::report::format_models(&models));
    Ok(())
}

fn handle_simulate(args: SimulateArgs) -> Result<(), AppError> {
    let config = SimulationConfig {
        seed: args.seed,
        npix: args.npix,
        ..Default::default()
    };
    let out = simulate(&args.out_dir, &config)?;
    for path in [
        &out.datasets,
        &out.models,
        &out.template,
        &out.catalog_3fhl,
        &out.catalog_4fgl,
        &out.names,
    ] {
        println!("wrote {}", path.display());
    }
    Ok(())
}

pub fn pipeline_config_from_args(args: &RunArgs) -> PipelineConfig {
    let mut config = PipelineConfig::new(
        &args.datasets,
        &args.models,
        &args.catalogs.catalog_3fhl,
        &args.catalogs.catalog_4fgl,
    );
    config.resolver = match (&args.names, args.sesame) {
        (Some(path), _) => ResolverChoice::Table(path.clone()),
        (None, true) => ResolverChoice::Sesame,
        (None, false) => ResolverChoice::Catalog,
    };
    config.outputs = output_spec(&args.outputs, args.output_dir.as_ref());
    config.exclusion_radius = args.exclusion_radius;
    config.cutout_width = args.cutout_width;
    config.include_ts = args.include_ts;
    config.target = args.target.clone();
    config
}

fn output_spec(outputs: &[PathBuf], output_dir: Option<&PathBuf>) -> OutputSpec {
    match (outputs.is_empty(), output_dir) {
        (false, _) => OutputSpec::Paths(outputs.to_vec()),
        (true, Some(dir)) => OutputSpec::Dir(dir.clone()),
        (true, None) => OutputSpec::Default,
    }
}
