//! Background-model stage: fit the diffuse component away from the source.

use ndarray::{Array2, Array3};

use crate::data::Datasets;
use crate::error::AppError;
use crate::fit::fitter::{FitResult, Fitter};
use crate::models::Models;
use crate::sky::{CircleSkyRegion, Mask, WcsGeom};

/// Pixels outside `region` on `geom`'s sky grid (true = used in the fit).
pub fn exclusion_fit_mask(geom: &WcsGeom, region: &CircleSkyRegion) -> Array2<bool> {
    let (ny, nx) = geom.image_shape();
    Array2::from_shape_fn((ny, nx), |(iy, ix)| {
        !region.contains(&geom.pixel_to_coord(ix as f64, iy as f64))
    })
}

/// Fit the free parameters of `models` to every dataset, ignoring `region`.
///
/// The fit mask built from the first dataset's sky grid is assigned to all
/// datasets (repeated over each one's energy bins) before a single joint
/// fit. All datasets must share that sky grid.
pub fn prepare_background_model(
    datasets: &mut Datasets,
    models: &mut Models,
    region: &CircleSkyRegion,
    fitter: &dyn Fitter,
) -> Result<FitResult, AppError> {
    let geom = datasets
        .first()
        .map(|d| d.geom().clone())
        .ok_or_else(|| AppError::config("no datasets to fit"))?;
    let outside = exclusion_fit_mask(&geom, region);

    for d in datasets.iter_mut() {
        if !d.geom().same_footprint(&geom) {
            return Err(AppError::config(format!(
                "dataset '{}' does not share the sky geometry of the first dataset",
                d.name
            )));
        }
        let nbin = d.geom().axis.nbin();
        let data = Array3::from_shape_fn((nbin, outside.nrows(), outside.ncols()), |(_, iy, ix)| outside[[iy, ix]]);
        d.mask_fit = Some(Mask {
            geom: d.geom().clone(),
            data,
        });
    }

    let excluded = outside.iter().filter(|v| !**v).count();
    log::info!(
        "Fitting background on {} datasets ({excluded} of {} pixels excluded around {})",
        datasets.len(),
        outside.len(),
        region.center
    );

    let result = fitter.run(datasets, models)?;
    if !result.success {
        return Err(AppError::fit(format!("background fit failed: {}", result.message)));
    }
    for p in &result.parameters {
        log::info!("  {} = {:.6} (start {:.6})", p.label, p.value, p.initial);
    }
    Ok(result)
}
