//! Per-dataset reduction into cut-out TS-estimator map bundles.

use rayon::prelude::*;

use crate::data::{Dataset, Datasets};
use crate::error::AppError;
use crate::estimate::ts_map::TsMapEstimator;
use crate::models::Models;
use crate::sky::{GeomError, Map, Maps, SkyCoord, WcsGeom};

/// Estimator maps that never leave the reducer.
pub const DROPPED_MAPS: [&str; 2] = ["norm", "mask"];

#[derive(Debug, Clone)]
pub struct ReduceOptions {
    /// Center of the output cutouts.
    pub target: SkyCoord,
    /// Cutout side length in degrees.
    pub width: f64,
    /// Also keep `ts`, `sqrt_ts` and `flux`.
    pub include_ts: bool,
}

/// Outcome of reducing one dataset.
#[derive(Debug, Clone)]
pub struct ReducedDataset {
    pub name: String,
    pub maps: Result<Maps, AppError>,
}

/// Reduce every dataset independently, in parallel. The output keeps the
/// input order and each dataset's name.
pub fn reduce_datasets(
    datasets: &mut Datasets,
    models: &Models,
    estimator: &TsMapEstimator,
    options: &ReduceOptions,
) -> Vec<ReducedDataset> {
    datasets
        .as_mut_slice()
        .par_iter_mut()
        .map(|dataset| {
            dataset.mask_fit = None;
            let maps = reduce_dataset(dataset, models, estimator, options);
            if let Err(e) = &maps {
                log::warn!("Dataset '{}' not reduced: {e}", dataset.name);
            }
            ReducedDataset {
                name: dataset.name.clone(),
                maps,
            }
        })
        .collect()
}

/// Collapse `dataset` to an image, run the estimator, rename and crop.
///
/// The fitted `models` reach the estimator through the image background,
/// which holds their energy-summed cube prediction.
pub fn reduce_dataset(
    dataset: &Dataset,
    models: &Models,
    estimator: &TsMapEstimator,
    options: &ReduceOptions,
) -> Result<Maps, AppError> {
    let image = dataset.to_image(&dataset.name, models, &estimator.model.spectral)?;
    let folded = Models::default();
    let maps = if options.include_ts {
        estimator.run(&image, &folded)?
    } else {
        estimator.estimate_fit_input_maps(&image, &folded)?
    };
    let cut_err = |e: GeomError| {
        AppError::estimation(format!("dataset '{}': cutout around {} failed: {e}", dataset.name, options.target))
    };
    let mut maps = finalize_maps(maps);
    // The kernel is not a sky region: keep it whole, centered on the target.
    let psf = maps.remove("psf");
    let mut cut = maps.cutout(&options.target, options.width).map_err(cut_err)?;
    if let Some(psf) = psf {
        cut.insert("psf", recenter(psf, options.target).map_err(cut_err)?);
    }
    log::info!(
        "Reduced {}: {} maps cut to {:.2} deg around {}",
        dataset.name,
        cut.len(),
        options.width,
        options.target
    );
    Ok(cut)
}

fn recenter(map: Map, center: SkyCoord) -> Result<Map, GeomError> {
    let geom = WcsGeom::new(center, map.geom.binsz, map.geom.npix, map.geom.axis.clone())?;
    Map::try_new(geom, map.data)
}

/// `kernel` becomes `psf`; `norm` and `mask` are removed.
pub fn finalize_maps(mut maps: Maps) -> Maps {
    maps.rename("kernel", "psf");
    for key in DROPPED_MAPS {
        maps.remove(key);
    }
    maps
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::dataset::tests::small_dataset;
    use crate::error::ErrorKind;
    use crate::models::{SkyModel, SpatialModel, SpectralModel};

    fn options(target: SkyCoord) -> ReduceOptions {
        ReduceOptions {
            target,
            width: 0.6,
            include_ts: false,
        }
    }

    fn datasets(names: &[&str]) -> Datasets {
        let mut ds = Datasets::new();
        for n in names {
            ds.push(small_dataset(n)).unwrap();
        }
        ds
    }

    #[test]
    fn bundles_follow_input_order_and_names() {
        let mut ds = datasets(&["b", "a", "c"]);
        let target = ds.first().unwrap().geom().center;
        let out = reduce_datasets(&mut ds, &Models::default(), &TsMapEstimator::default(), &options(target));
        let names: Vec<&str> = out.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, vec!["b", "a", "c"]);
    }

    #[test]
    fn bundle_has_psf_and_no_norm_or_mask() {
        let mut ds = datasets(&["obs1"]);
        let target = ds.first().unwrap().geom().center;
        let out = reduce_datasets(&mut ds, &Models::default(), &TsMapEstimator::default(), &options(target));
        let maps = out[0].maps.as_ref().unwrap();
        assert!(maps.contains_key("psf"));
        assert!(!maps.contains_key("kernel"));
        assert!(!maps.contains_key("norm") && !maps.contains_key("mask"));
        assert!(!maps.contains_key("ts"));
        assert_eq!(maps.get("counts").unwrap().geom.npix, (6, 6));
    }

    #[test]
    fn include_ts_adds_significance_maps() {
        let mut ds = datasets(&["obs1"]);
        let target = ds.first().unwrap().geom().center;
        let mut opts = options(target);
        opts.include_ts = true;
        let out = reduce_datasets(&mut ds, &Models::default(), &TsMapEstimator::default(), &opts);
        let maps = out[0].maps.as_ref().unwrap();
        assert!(maps.contains_key("ts") && maps.contains_key("sqrt_ts") && maps.contains_key("flux"));
        assert!(!maps.contains_key("norm"));
    }

    #[test]
    fn fit_masks_are_cleared() {
        let mut ds = datasets(&["obs1"]);
        for d in ds.iter_mut() {
            d.mask_fit = Some(crate::sky::Mask::full(d.geom().clone(), false));
        }
        let target = ds.first().unwrap().geom().center;
        reduce_datasets(&mut ds, &Models::default(), &TsMapEstimator::default(), &options(target));
        assert!(ds.iter().all(|d| d.mask_fit.is_none()));
    }

    #[test]
    fn failure_in_one_dataset_keeps_the_others() {
        let mut ds = datasets(&["good", "bad"]);
        for d in ds.iter_mut().filter(|d| d.name == "bad") {
            d.exposure.data.fill(0.0);
        }
        let target = ds.first().unwrap().geom().center;
        let out = reduce_datasets(&mut ds, &Models::default(), &TsMapEstimator::default(), &options(target));
        assert!(out[0].maps.is_ok());
        assert_eq!(out[1].maps.as_ref().unwrap_err().kind(), ErrorKind::Estimation);
    }

    #[test]
    fn image_inputs_agree_with_the_energy_summed_cube() {
        let d = small_dataset("obs1");
        let point = SkyModel::new(
            "src",
            SpectralModel::power_law(1e-12, 2.6, 0.1),
            SpatialModel::point(d.geom().center),
        );
        let models = Models::new(vec![point]).unwrap();
        let estimator = TsMapEstimator::default();
        let opts = options(d.geom().center);

        let reduced = reduce_dataset(&d, &models, &estimator, &opts).unwrap();
        let cube = estimator
            .estimate_fit_input_maps(&d, &models)
            .unwrap()
            .cutout(&opts.target, opts.width)
            .unwrap();
        for key in ["background", "exposure", "counts"] {
            let (got, want) = (&reduced.get(key).unwrap().data, &cube.get(key).unwrap().data);
            assert_eq!(got.dim(), want.dim(), "{key}");
            for (g, w) in got.iter().zip(want.iter()) {
                assert!((g - w).abs() <= 1e-9 * w.abs().max(1e-12), "{key}: image {g} cube {w}");
            }
        }
        assert!(reduced.get("background").unwrap().sum() > 0.0);
    }

    #[test]
    fn psf_follows_a_target_far_from_the_dataset_center() {
        let mut ds = datasets(&["obs1"]);
        let geom = ds.first().unwrap().geom().clone();
        let target = geom.pixel_to_coord(1.0, 1.0);
        let out = reduce_datasets(&mut ds, &Models::default(), &TsMapEstimator::default(), &options(target));
        let maps = out[0].maps.as_ref().unwrap();
        let psf = maps.get("psf").unwrap();
        assert_eq!(psf.geom.npix, (3, 3));
        assert!(psf.geom.center.separation(&target) < 1e-9);
        assert!((psf.sum() - 1.0).abs() < 1e-12);
        // Trimmed at the image corner.
        assert_eq!(maps.get("counts").unwrap().geom.npix, (4, 4));
    }

    #[test]
    fn target_outside_footprint_is_an_estimation_error() {
        let mut ds = datasets(&["obs1"]);
        let out = reduce_datasets(
            &mut ds,
            &Models::default(),
            &TsMapEstimator::default(),
            &options(SkyCoord::galactic(10.0, 40.0)),
        );
        assert_eq!(out[0].maps.as_ref().unwrap_err().kind(), ErrorKind::Estimation);
    }
}
