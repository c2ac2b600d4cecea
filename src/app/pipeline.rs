//! The reduction pipeline shared by the `run` command and the integration
//! tests:
//!
//! load datasets -> assemble models -> background fit -> TS-map reduction -> write
//!
//! Collaborators (catalogs, target resolver, fitter, map writer) are injected
//! through [`PipelineContext`], so nothing here touches global state.

use std::path::PathBuf;

use crate::data::{NameResolver, SourceCatalog};
use crate::domain::PipelineConfig;
use crate::error::{AppError, ErrorKind};
use crate::estimate::{ReducedDataset, TsMapEstimator, reduce_datasets};
use crate::fit::{FitResult, Fitter, prepare_background_model};
use crate::io::{MapWriter, read_datasets, write_outputs};
use crate::models::{Models, read_and_prepare_models};
use crate::sky::{CircleSkyRegion, SkyCoord};

/// External services one run depends on.
pub struct PipelineContext<'a> {
    /// Provides the exclusion region center.
    pub exclusion_catalog: &'a dyn SourceCatalog,
    /// Provides the appended point source.
    pub source_catalog: &'a dyn SourceCatalog,
    pub resolver: &'a dyn NameResolver,
    pub fitter: &'a dyn Fitter,
    pub writer: &'a dyn MapWriter,
}

/// All computed outputs of a successful run.
#[derive(Debug, Clone)]
pub struct RunOutput {
    /// Model after the background fit.
    pub models: Models,
    pub fit: FitResult,
    pub exclusion: CircleSkyRegion,
    pub target: SkyCoord,
    pub reduced: Vec<ReducedDataset>,
    pub written: Vec<PathBuf>,
}

/// Execute the full pipeline once.
///
/// Stages fail fast, except that every dataset is reduced and every bundle
/// written before per-dataset failures are reported. In that case an
/// estimation failure takes precedence over a write failure.
pub fn run_pipeline(config: &PipelineConfig, ctx: &PipelineContext<'_>) -> Result<RunOutput, AppError> {
    config.validate()?;

    // 1) Load datasets.
    log::info!("Loading datasets from {}", config.datasets_path.display());
    let mut datasets = read_datasets(&config.datasets_path)?;
    let destinations = config.destinations(&datasets.names());
    if destinations.len() != datasets.len() {
        return Err(AppError::config(format!(
            "{} datasets but {} output destinations",
            datasets.len(),
            destinations.len()
        )));
    }

    // 2) Assemble the model.
    log::info!("Reading models from {}", config.models_path.display());
    let mut models = read_and_prepare_models(&config.models_path, &config.assembly_plan(), ctx.source_catalog)?;

    // 3) Resolve positions.
    let center = ctx.exclusion_catalog.lookup(&config.exclusion_source)?.position;
    let exclusion = config.exclusion_region(center);
    let target = ctx.resolver.resolve(&config.target)?;
    log::info!("Target {} at {target}", config.target);

    // 4) Background fit outside the exclusion region.
    let fit = prepare_background_model(&mut datasets, &mut models, &exclusion, ctx.fitter)?;

    // 5) Per-dataset reduction.
    let estimator = TsMapEstimator::default();
    let reduced = reduce_datasets(&mut datasets, &models, &estimator, &config.reduce_options(target));

    // 6) Write every bundle that was produced.
    let written = write_outputs(&reduced, &destinations, ctx.writer);

    if let Some(err) = first_failure(&reduced) {
        if let Err(write_err) = &written {
            log::error!("{write_err}");
        }
        return Err(err);
    }
    let written = written?;
    log::info!("Wrote {} of {} bundles", written.len(), reduced.len());

    Ok(RunOutput {
        models,
        fit,
        exclusion,
        target,
        reduced,
        written,
    })
}

/// Summary estimation error over every dataset that failed.
fn first_failure(reduced: &[ReducedDataset]) -> Option<AppError> {
    let failed: Vec<String> = reduced
        .iter()
        .filter_map(|r| r.maps.as_ref().err().map(|e| e.message().to_string()))
        .collect();
    if failed.is_empty() {
        return None;
    }
    Some(AppError::new(
        ErrorKind::Estimation,
        format!("{} of {} datasets failed: {}", failed.len(), reduced.len(), failed.join("; ")),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::estimate::ReducedDataset;
    use crate::sky::Maps;

    #[test]
    fn no_failure_when_all_reduced() {
        let reduced = vec![ReducedDataset {
            name: "a".to_string(),
            maps: Ok(Maps::new()),
        }];
        assert!(first_failure(&reduced).is_none());
    }

    #[test]
    fn failures_are_collected_into_one_estimation_error() {
        let reduced = vec![
            ReducedDataset {
                name: "a".to_string(),
                maps: Err(AppError::estimation("dataset 'a': degenerate exposure")),
            },
            ReducedDataset {
                name: "b".to_string(),
                maps: Ok(Maps::new()),
            },
        ];
        let err = first_failure(&reduced).unwrap();
        assert_eq!(err.kind(), ErrorKind::Estimation);
        assert!(err.message().starts_with("1 of 2 datasets failed"));
    }
}
