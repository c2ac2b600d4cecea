//! Synthetic inputs for the Vela Junior reduction.
//!
//! Produces a complete, self-consistent input set in one directory:
//! - two binned datasets (`obs1`, `obs2`) with Poisson counts
//! - the diffuse template and the model configuration referring to it
//! - 3FHL / 4FGL style catalogs and a names table
//!
//! Counts are drawn from the prediction of a "truth" model: the diffuse
//! component scaled by `diffuse_norm`, the extended Vela Junior source and
//! the 4FGL point source. The model configuration starts the diffuse norm at
//! 1.0, so a background fit has something to recover.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use ndarray::{Array2, Array3, Axis};
use rand::prelude::*;
use rand::rngs::StdRng;
use rand_distr::Poisson;

use crate::data::catalog::{CatalogFile, SourceRecord};
use crate::data::dataset::{Dataset, Datasets, PsfMap};
use crate::error::AppError;
use crate::fit::MapEvaluator;
use crate::io::{write_datasets, write_map};
use crate::models::{Models, ModelsConfig, SkyModel, SpatialModel, SpectralModel};
use crate::sky::{Frame, Map, MapAxis, Mask, SkyCoord, WcsGeom};

pub const DIFFUSE_COMPONENT: &str = "diffuse-iem";
pub const VELA_JUNIOR_3FHL: &str = "3FHL J0851.9-4620e";
pub const VELA_JUNIOR_ALIAS: &str = "RX J0852.0-4622";
pub const EXTRA_SOURCE_4FGL: &str = "4FGL J0854.8-4504";
pub const TARGET_NAME: &str = "Vela Junior";

const TEMPLATE_FILE: &str = "gll_iem_cutout.json";
/// Diffuse intensity scale at the spectral reference, `cm⁻² s⁻¹ TeV⁻¹ sr⁻¹`.
const DIFFUSE_INTENSITY: f64 = 4e-3;
const DIFFUSE_TILT: f64 = 2.5;
const DIFFUSE_REFERENCE: f64 = 0.01;
/// Exposure per energy bin for a unit-scale observation, `cm² s`.
const EXPOSURE_PER_BIN: [f64; 3] = [2.0e11, 3.0e11, 3.5e11];
/// PSF 68% containment shrinks with energy; Gaussian sigma per bin, degrees.
const PSF_SIGMA: [f64; 3] = [0.2, 0.12, 0.08];
const PSF_HALF_WIDTH: usize = 10;

#[derive(Debug, Clone)]
pub struct SimulationConfig {
    pub seed: u64,
    pub npix: usize,
    /// Pixel size in degrees.
    pub binsz: f64,
    /// True diffuse norm used to draw the counts.
    pub diffuse_norm: f64,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            seed: 42,
            npix: 64,
            binsz: 0.05,
            diffuse_norm: 1.3,
        }
    }
}

/// Paths of everything [`simulate`] wrote.
#[derive(Debug, Clone)]
pub struct SimulationOutput {
    pub datasets: PathBuf,
    pub models: PathBuf,
    pub template: PathBuf,
    pub catalog_3fhl: PathBuf,
    pub catalog_4fgl: PathBuf,
    pub names: PathBuf,
}

pub fn vela_junior() -> SkyCoord {
    SkyCoord::icrs(133.0, -46.33)
}

pub fn extra_source_position() -> SkyCoord {
    SkyCoord::icrs(133.72, -45.08)
}

fn vela_junior_model() -> SkyModel {
    SkyModel::new(
        VELA_JUNIOR_3FHL,
        SpectralModel::power_law(2e-9, 2.0, 0.1),
        SpatialModel::gaussian(vela_junior(), 0.3),
    )
}

fn extra_source_model() -> SkyModel {
    SkyModel::new(
        EXTRA_SOURCE_4FGL,
        SpectralModel::log_parabola(5e-10, 0.1, 2.2, 0.05),
        SpatialModel::point(extra_source_position()),
    )
}

/// Write a synthetic input set into `out_dir`.
pub fn simulate(out_dir: &Path, config: &SimulationConfig) -> Result<SimulationOutput, AppError> {
    if config.npix < 2 * PSF_HALF_WIDTH + 1 {
        return Err(AppError::config(format!(
            "npix must be at least {}, got {}",
            2 * PSF_HALF_WIDTH + 1,
            config.npix
        )));
    }
    fs::create_dir_all(out_dir)
        .map_err(|e| AppError::write(format!("Failed to create '{}': {e}", out_dir.display())))?;

    let center = vela_junior().to_frame(Frame::Galactic);
    let axis = MapAxis::log_spaced(0.01, 1.0, EXPOSURE_PER_BIN.len()).map_err(|e| AppError::config(e.to_string()))?;
    let geom = WcsGeom::new(center, config.binsz, (config.npix, config.npix), axis.clone())
        .map_err(|e| AppError::config(e.to_string()))?;

    // 1) Diffuse template, a little larger than the datasets.
    let template = diffuse_template(&geom)?;
    let template_path = out_dir.join(TEMPLATE_FILE);
    write_map(&template_path, &template)?;

    // 2) Truth model and Poisson counts.
    let diffuse = |norm: f64, loaded: bool| {
        let mut spatial = SpatialModel::template(PathBuf::from(TEMPLATE_FILE), template.clone(), false);
        if !loaded {
            spatial.template = None;
        }
        SkyModel::new(
            DIFFUSE_COMPONENT,
            SpectralModel::power_law_norm(norm, DIFFUSE_TILT, DIFFUSE_REFERENCE),
            spatial,
        )
    };
    let truth = Models::new(vec![
        diffuse(config.diffuse_norm, true),
        vela_junior_model(),
        extra_source_model(),
    ])?;

    let psf = psf_kernels(&axis, config.binsz);
    let mut rng = StdRng::seed_from_u64(config.seed);
    let mut datasets = Datasets::new();
    for (name, scale) in [("obs1", 1.0), ("obs2", 0.6)] {
        let mut dataset = empty_dataset(name, &geom, scale, psf.clone());
        let npred = MapEvaluator::new(&dataset)?.npred(&truth)?;
        dataset.counts.data = sample_counts(&npred, &mut rng)?;
        if name == "obs2" {
            dataset.mask_safe = Some(border_safe_mask(&geom));
        }
        log::info!("Simulated {name}: {:.0} counts", dataset.counts.sum());
        datasets.push(dataset)?;
    }
    let datasets_path = out_dir.join("datasets.yaml");
    write_datasets(&datasets, out_dir, &datasets_path)?;

    // 3) Model configuration: diffuse at norm 1 plus the extended source the
    //    pipeline replaces.
    let models_path = out_dir.join("models.yaml");
    let models_config = ModelsConfig {
        components: vec![diffuse(1.0, false), vela_junior_model()],
    };
    write_text(&models_path, &models_config.to_yaml()?)?;

    // 4) Catalogs and names.
    let catalog_3fhl = out_dir.join("catalog-3fhl.yaml");
    let record = |model: SkyModel, position: SkyCoord, aliases: &[&str]| SourceRecord {
        name: model.name.clone(),
        aliases: aliases.iter().map(|a| a.to_string()).collect(),
        position,
        spectral: model.spectral,
        spatial: Some(model.spatial),
    };
    write_yaml(
        &catalog_3fhl,
        &CatalogFile {
            name: "3FHL".to_string(),
            sources: vec![record(vela_junior_model(), vela_junior(), &[VELA_JUNIOR_ALIAS, TARGET_NAME])],
        },
    )?;

    let catalog_4fgl = out_dir.join("catalog-4fgl.yaml");
    write_yaml(
        &catalog_4fgl,
        &CatalogFile {
            name: "4FGL".to_string(),
            sources: vec![
                record(extra_source_model(), extra_source_position(), &[]),
                SourceRecord {
                    name: "4FGL J0835.3-4510".to_string(),
                    aliases: vec!["Vela".to_string()],
                    position: SkyCoord::icrs(128.84, -45.18),
                    spectral: SpectralModel::log_parabola(3e-8, 0.1, 2.3, 0.1),
                    spatial: None,
                },
            ],
        },
    )?;

    let names = out_dir.join("names.yaml");
    let table: BTreeMap<&str, SkyCoord> = [(TARGET_NAME, vela_junior())].into_iter().collect();
    write_yaml(&names, &table)?;

    Ok(SimulationOutput {
        datasets: datasets_path,
        models: models_path,
        template: template_path,
        catalog_3fhl,
        catalog_4fgl,
        names,
    })
}

/// Galactic-plane ridge with a mild longitude gradient.
fn diffuse_template(geom: &WcsGeom) -> Result<Map, AppError> {
    let margin = 2 * PSF_HALF_WIDTH;
    let tgeom = WcsGeom::new(
        geom.center,
        geom.binsz,
        (geom.npix.0 + margin, geom.npix.1 + margin),
        geom.axis.squash(),
    )
    .map_err(|e| AppError::config(e.to_string()))?;
    let (ny, nx) = tgeom.image_shape();
    let image = Array2::from_shape_fn((ny, nx), |(iy, ix)| {
        let c = tgeom.pixel_to_coord(ix as f64, iy as f64);
        let dl = crate::sky::wrap_delta_lon(c.lon - geom.center.lon);
        DIFFUSE_INTENSITY * (0.4 + (-0.5 * (c.lat / 0.8).powi(2)).exp()) * (1.0 + 0.05 * dl)
    });
    Map::from_image(&tgeom, image).map_err(|e| AppError::config(e.to_string()))
}

fn psf_kernels(axis: &MapAxis, binsz: f64) -> PsfMap {
    let n = 2 * PSF_HALF_WIDTH + 1;
    let mut kernels = Array3::<f64>::zeros((axis.nbin(), n, n));
    for (e, mut k) in kernels.axis_iter_mut(Axis(0)).enumerate() {
        let sigma = PSF_SIGMA[e.min(PSF_SIGMA.len() - 1)] / binsz;
        k.indexed_iter_mut().for_each(|((iy, ix), v)| {
            let dy = iy as f64 - PSF_HALF_WIDTH as f64;
            let dx = ix as f64 - PSF_HALF_WIDTH as f64;
            *v = (-0.5 * (dx * dx + dy * dy) / (sigma * sigma)).exp();
        });
        let total = k.sum();
        k.mapv_inplace(|v| v / total);
    }
    PsfMap::from_kernels(binsz, kernels)
}

fn empty_dataset(name: &str, geom: &WcsGeom, scale: f64, psf: PsfMap) -> Dataset {
    let mut exposure = Map::zeros(geom.clone());
    let nx = geom.npix.0 as f64;
    for (e, mut plane) in exposure.data.axis_iter_mut(Axis(0)).enumerate() {
        let level = EXPOSURE_PER_BIN[e.min(EXPOSURE_PER_BIN.len() - 1)] * scale;
        plane.indexed_iter_mut().for_each(|((_, ix), v)| {
            *v = level * (1.0 + 0.1 * (ix as f64 / nx - 0.5));
        });
    }
    Dataset {
        name: name.to_string(),
        counts: Map::zeros(geom.clone()),
        exposure,
        background: None,
        psf,
        mask_safe: None,
        mask_fit: None,
    }
}

/// Lowest energy bin unusable on a two-pixel image border.
fn border_safe_mask(geom: &WcsGeom) -> Mask {
    let (ny, nx) = geom.image_shape();
    let mut mask = Mask::full(geom.clone(), true);
    for ((e, iy, ix), v) in mask.data.indexed_iter_mut() {
        if e == 0 && (iy < 2 || ix < 2 || iy + 2 >= ny || ix + 2 >= nx) {
            *v = false;
        }
    }
    mask
}

fn sample_counts(npred: &Array3<f64>, rng: &mut StdRng) -> Result<Array3<f64>, AppError> {
    let mut counts = Array3::zeros(npred.dim());
    for (out, &mu) in counts.iter_mut().zip(npred.iter()) {
        if mu > 0.0 {
            let dist = Poisson::new(mu).map_err(|e| AppError::config(format!("Poisson mean {mu}: {e}")))?;
            *out = dist.sample(rng);
        }
    }
    Ok(counts)
}

fn write_text(path: &Path, text: &str) -> Result<(), AppError> {
    fs::write(path, text).map_err(|e| AppError::write(format!("Failed to write '{}': {e}", path.display())))
}

fn write_yaml<T: serde::Serialize>(path: &Path, value: &T) -> Result<(), AppError> {
    let text =
        serde_yml::to_string(value).map_err(|e| AppError::write(format!("Failed to encode '{}': {e}", path.display())))?;
    write_text(path, &text)
}
