//! Model assembly: configuration file + catalog → fit-ready model set.

use std::path::Path;

use crate::data::catalog::SourceCatalog;
use crate::error::AppError;
use crate::models::config::{build_models, config_dir, read_models_config, resolve_template_paths};
use crate::models::sky_model::Models;

/// Which components the assembler edits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssemblyPlan {
    /// The single component left fittable.
    pub background: String,
    /// Component dropped from the configuration because the catalog source
    /// below already describes it.
    pub remove: String,
    /// Catalog identifier of the source appended (frozen) to the model.
    pub append_source: String,
}

/// Read the model configuration at `path` and prepare it for the background fit.
///
/// After this call exactly one component (`plan.background`) has free
/// parameters.
pub fn read_and_prepare_models(
    path: &Path,
    plan: &AssemblyPlan,
    catalog: &dyn SourceCatalog,
) -> Result<Models, AppError> {
    let mut config = read_models_config(path)?;
    resolve_template_paths(&mut config, &config_dir(path));

    let mut models = build_models(config)?;
    if models.get(&plan.background).is_none() {
        return Err(AppError::config(format!(
            "background component '{}' not found in {}",
            plan.background,
            path.display()
        )));
    }
    models.remove(&plan.remove)?;
    models.freeze();

    if let Some(background) = models.get_mut(&plan.background) {
        background.unfreeze();
    }

    let mut extra = catalog.lookup(&plan.append_source)?.sky_model()?;
    extra.freeze();
    log::info!(
        "appending {} from catalog {} ({} model components)",
        extra.name,
        catalog.name(),
        models.len() + 1
    );
    models.append(extra)?;

    Ok(models)
}
