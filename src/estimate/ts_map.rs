//! Test-statistic maps for a point-like source hypothesis.
//!
//! At every pixel `p` a source with the reference spectrum is added on top of
//! the fitted model, smeared by the PSF kernel:
//!
//! ```text
//! μ(q) = b(q) + a · ex(q) · K(q − p)
//! ```
//!
//! where `b` is the model prediction, `ex` the exposure times the reference
//! spectral integral (expected counts per unit norm) and `K` the normalized
//! kernel. The norm `a ≥ 0` is fitted by Newton iterations on the Cash
//! statistic and `ts = C(0) − C(â)`.

use ndarray::{Array2, Array3, Axis, Zip, s};
use rayon::prelude::*;

use crate::data::Dataset;
use crate::error::AppError;
use crate::fit::likelihood::{NPRED_FLOOR, cash};
use crate::fit::MapEvaluator;
use crate::math::convolve_same;
use crate::models::{Models, SkyModel, SpatialModel, SpectralModel};
use crate::sky::{Map, Maps, SkyCoord, WcsGeom};

pub const REFERENCE_INDEX: f64 = 1.7;
/// `cm⁻² s⁻¹ TeV⁻¹` at 1 TeV.
pub const REFERENCE_AMPLITUDE: f64 = 1e-14;

/// Power law (index 1.7, amplitude `1e-14` at 1 TeV) with a point morphology.
pub fn reference_model() -> SkyModel {
    SkyModel::new(
        "ts-reference",
        SpectralModel::power_law(REFERENCE_AMPLITUDE, REFERENCE_INDEX, 1.0),
        SpatialModel::point(SkyCoord::galactic(0.0, 0.0)),
    )
}

#[derive(Debug, Clone)]
pub struct TsMapEstimator {
    pub model: SkyModel,
    /// Collapse the energy axis (one joint image) before estimating.
    pub sum_over_energy_groups: bool,
    pub max_iter: usize,
    /// Relative norm change that ends the per-pixel Newton iterations.
    pub tolerance: f64,
}

impl Default for TsMapEstimator {
    fn default() -> Self {
        Self {
            model: reference_model(),
            sum_over_energy_groups: true,
            max_iter: 30,
            tolerance: 1e-5,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct PixelFit {
    norm: f64,
    ts: f64,
}

impl TsMapEstimator {
    pub fn new(model: SkyModel, sum_over_energy_groups: bool) -> Self {
        Self {
            model,
            sum_over_energy_groups,
            ..Self::default()
        }
    }

    /// Maps the per-pixel fit works on: `counts`, `background`, `exposure`,
    /// `kernel`, `mask` and the starting `norm`.
    pub fn estimate_fit_input_maps(&self, dataset: &Dataset, models: &Models) -> Result<Maps, AppError> {
        let name = &dataset.name;
        let fail = |msg: String| AppError::estimation(format!("dataset '{name}': {msg}"));
        let geom = dataset.geom();

        let exposure = &dataset.exposure.data;
        if exposure.iter().any(|v| !v.is_finite()) || !exposure.iter().any(|v| *v > 0.0) {
            return Err(fail("degenerate exposure (all zero or non-finite)".to_string()));
        }
        let kernels = dataset.psf.kernels().map_err(fail)?;

        let npred = MapEvaluator::new(dataset)
            .and_then(|mut ev| ev.npred(models))
            .map_err(|e| fail(e.message().to_string()))?;

        // Expected counts per unit norm of the reference source.
        let mut exposure_ref = exposure.clone();
        for (e, mut plane) in exposure_ref.axis_iter_mut(Axis(0)).enumerate() {
            let (lo, hi) = geom.axis.bin_bounds(e);
            let flux = self.model.spectral.integral(lo, hi);
            plane.mapv_inplace(|v| v * flux);
        }

        let mask = dataset.mask();
        let keep = |data: &Array3<f64>| -> Array3<f64> {
            let mut out = data.clone();
            if let Some(mask) = &mask {
                Zip::from(&mut out).and(mask).for_each(|v, m| {
                    if !*m {
                        *v = 0.0;
                    }
                });
            }
            out
        };
        let mut counts = keep(&dataset.counts.data);
        let mut background = keep(&npred);
        let mut exposure_ref = keep(&exposure_ref);
        let mut mask_data = match &mask {
            Some(m) => m.mapv(|v| if v { 1.0 } else { 0.0 }),
            None => Array3::from_elem(geom.data_shape(), 1.0),
        };

        let mut kernel = normalized_kernels(kernels);
        let mut out_geom = geom.clone();
        if self.sum_over_energy_groups {
            let weights: Vec<f64> = exposure_ref.axis_iter(Axis(0)).map(|p| p.sum()).collect();
            kernel = weighted_kernel(&kernel, &weights).insert_axis(Axis(0));
            counts = counts.sum_axis(Axis(0)).insert_axis(Axis(0));
            background = background.sum_axis(Axis(0)).insert_axis(Axis(0));
            exposure_ref = exposure_ref.sum_axis(Axis(0)).insert_axis(Axis(0));
            mask_data = mask_data
                .map_axis(Axis(0), |lane| if lane.iter().any(|v| *v > 0.0) { 1.0 } else { 0.0 })
                .insert_axis(Axis(0));
            out_geom = geom.to_image();
        }

        let norm = initial_norm(&counts, &background, &exposure_ref, &kernel);

        let (_, ky, kx) = kernel.dim();
        let kernel_geom = WcsGeom::new(out_geom.center, dataset.psf.binsz, (kx, ky), out_geom.axis.clone())
            .map_err(|e| fail(e.to_string()))?;

        let map = |data: Array3<f64>| Map::try_new(out_geom.clone(), data).map_err(|e| fail(e.to_string()));
        let mut maps = Maps::new();
        maps.insert("counts", map(counts)?);
        maps.insert("background", map(background)?);
        maps.insert("exposure", map(exposure_ref)?);
        maps.insert("mask", map(mask_data)?);
        maps.insert("norm", map(norm)?);
        maps.insert("kernel", Map::try_new(kernel_geom, kernel).map_err(|e| fail(e.to_string()))?);
        Ok(maps)
    }

    /// Fit inputs plus `ts`, `sqrt_ts` and `flux`; `norm` becomes the fitted norm.
    pub fn run(&self, dataset: &Dataset, models: &Models) -> Result<Maps, AppError> {
        let mut maps = self.estimate_fit_input_maps(dataset, models)?;
        let fail = |msg: String| AppError::estimation(format!("dataset '{}': {msg}", dataset.name));
        let get = |key: &str| -> Result<&Map, AppError> {
            maps.get(key).ok_or_else(|| fail(format!("missing '{key}' input map")))
        };

        let counts = &get("counts")?.data;
        let background = &get("background")?.data;
        let exposure = &get("exposure")?.data;
        let mask = &get("mask")?.data;
        let start = &get("norm")?.data;
        let kernel = &get("kernel")?.data;
        let image_geom = get("counts")?.geom.to_image();

        let (_, ny, nx) = counts.dim();
        let fits: Vec<PixelFit> = (0..ny * nx)
            .into_par_iter()
            .map(|idx| {
                let (iy, ix) = (idx / nx, idx % nx);
                self.fit_pixel(iy, ix, counts, background, exposure, mask, kernel, start)
            })
            .collect();

        let amplitude = self.model.spectral.parameters.value("amplitude");
        let norm = Array2::from_shape_fn((ny, nx), |(iy, ix)| fits[iy * nx + ix].norm);
        let ts = Array2::from_shape_fn((ny, nx), |(iy, ix)| fits[iy * nx + ix].ts);
        // `a >= 0`, so the signed root is the plain root.
        let sqrt_ts = ts.mapv(f64::sqrt);
        let flux = norm.mapv(|a| if a.is_finite() { a * amplitude } else { 0.0 });

        let image = |data: Array2<f64>| Map::from_image(&image_geom, data).map_err(|e| fail(e.to_string()));
        let (norm_map, ts_map, sqrt_map, flux_map) = (image(norm)?, image(ts)?, image(sqrt_ts)?, image(flux)?);
        maps.insert("norm", norm_map);
        maps.insert("ts", ts_map);
        maps.insert("sqrt_ts", sqrt_map);
        maps.insert("flux", flux_map);
        Ok(maps)
    }

    #[allow(clippy::too_many_arguments)]
    fn fit_pixel(
        &self,
        iy: usize,
        ix: usize,
        counts: &Array3<f64>,
        background: &Array3<f64>,
        exposure: &Array3<f64>,
        mask: &Array3<f64>,
        kernel: &Array3<f64>,
        start: &Array3<f64>,
    ) -> PixelFit {
        let excluded = PixelFit { norm: f64::NAN, ts: 0.0 };
        let (ne, ny, nx) = counts.dim();
        let (_, ky, kx) = kernel.dim();
        let (cy, cx) = ((ky / 2) as isize, (kx / 2) as isize);

        if (0..ne).all(|e| mask[[e, iy, ix]] <= 0.0 || exposure[[e, iy, ix]] <= 0.0) {
            return excluded;
        }

        // (n, b, m) over the kernel footprint of this pixel.
        let mut terms = Vec::with_capacity(ne * ky * kx);
        for e in 0..ne {
            for ((jy, jx), &k) in kernel.slice(s![e, .., ..]).indexed_iter() {
                let qy = iy as isize + jy as isize - cy;
                let qx = ix as isize + jx as isize - cx;
                if qy < 0 || qx < 0 || qy >= ny as isize || qx >= nx as isize || k == 0.0 {
                    continue;
                }
                let (qy, qx) = (qy as usize, qx as usize);
                if mask[[e, qy, qx]] <= 0.0 {
                    continue;
                }
                let m = exposure[[e, qy, qx]] * k;
                if m > 0.0 {
                    terms.push((counts[[e, qy, qx]], background[[e, qy, qx]], m));
                }
            }
        }
        if terms.is_empty() {
            return excluded;
        }

        let stat = |a: f64| terms.iter().map(|&(n, b, m)| cash(n, b + a * m)).sum::<f64>();
        let derivs = |a: f64| {
            terms.iter().fold((0.0, 0.0), |(g, h), &(n, b, m)| {
                let mu = (b + a * m).max(NPRED_FLOOR);
                (g + 2.0 * m * (1.0 - n / mu), h + 2.0 * n * m * m / (mu * mu))
            })
        };

        let (g0, h0) = derivs(0.0);
        if g0 >= 0.0 {
            return PixelFit { norm: 0.0, ts: 0.0 };
        }

        // The statistic is convex in `a`: keep a bracket [lo, hi] around the
        // root of its derivative and fall back to bisection when Newton leaves it.
        let (mut lo, mut hi) = (0.0_f64, f64::INFINITY);
        let guess = start[[0, iy, ix]];
        let mut a = if guess.is_finite() && guess > 0.0 {
            guess
        } else if h0 > 0.0 {
            -g0 / h0
        } else {
            1.0
        };
        for _ in 0..self.max_iter {
            let (g, h) = derivs(a);
            if g < 0.0 {
                lo = a;
            } else {
                hi = a;
            }
            let newton = if h > 0.0 { a - g / h } else { f64::NAN };
            let next = if newton.is_finite() && newton > lo && newton < hi {
                newton
            } else if hi.is_finite() {
                0.5 * (lo + hi)
            } else {
                2.0 * a.max(f64::MIN_POSITIVE)
            };
            let done = (next - a).abs() <= self.tolerance * a.abs().max(1e-12);
            a = next;
            if done {
                break;
            }
        }

        let ts = (stat(0.0) - stat(a)).max(0.0);
        PixelFit { norm: a, ts }
    }
}

fn normalized_kernels(kernels: &Array3<f64>) -> Array3<f64> {
    let mut out = kernels.clone();
    for mut k in out.axis_iter_mut(Axis(0)) {
        let total = k.sum();
        if total > 0.0 {
            k.mapv_inplace(|v| v / total);
        }
    }
    out
}

/// Kernel of the energy-summed image, weighted by expected source counts.
fn weighted_kernel(kernels: &Array3<f64>, weights: &[f64]) -> Array2<f64> {
    let (_, ky, kx) = kernels.dim();
    let total: f64 = weights.iter().sum();
    let mut out = Array2::<f64>::zeros((ky, kx));
    for (e, k) in kernels.axis_iter(Axis(0)).enumerate() {
        let w = if total > 0.0 { weights[e] / total } else { 1.0 / weights.len() as f64 };
        out.scaled_add(w, &k);
    }
    let sum = out.sum();
    if sum > 0.0 {
        out.mapv_inplace(|v| v / sum);
    }
    out
}

/// Matched-filter norm: `corr(n − b, K) / corr(ex, K²)`.
fn initial_norm(counts: &Array3<f64>, background: &Array3<f64>, exposure: &Array3<f64>, kernel: &Array3<f64>) -> Array3<f64> {
    let residual = counts - background;
    let mut norm = Array3::zeros(counts.dim());
    for e in 0..counts.dim().0 {
        let k = kernel.index_axis(Axis(0), e);
        let flipped = k.slice(s![..;-1, ..;-1]);
        let k2 = flipped.mapv(|v| v * v);
        let num = convolve_same(&residual.index_axis(Axis(0), e), &flipped);
        let den = convolve_same(&exposure.index_axis(Axis(0), e), &k2.view());
        Zip::from(norm.index_axis_mut(Axis(0), e))
            .and(&num)
            .and(&den)
            .for_each(|out, &n, &d| *out = if d > 0.0 { n / d } else { 0.0 });
    }
    norm
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::dataset::tests::small_dataset;
    use crate::data::PsfMap;
    use crate::error::ErrorKind;
    use crate::sky::{MapAxis, SkyCoord};

    /// Flat background dataset with a bright source injected at pixel (12, 12).
    fn injected() -> Dataset {
        let geom = WcsGeom::new(SkyCoord::galactic(266.25, -1.22), 0.1, (25, 25), MapAxis::new(vec![0.1, 1.0]).unwrap())
            .unwrap();
        let mut kernel = Array3::<f64>::zeros((1, 3, 3));
        kernel[[0, 1, 1]] = 0.6;
        for (y, x) in [(0, 1), (1, 0), (1, 2), (2, 1)] {
            kernel[[0, y, x]] = 0.1;
        }
        let mut counts = Map::zeros(geom.clone());
        counts.data.fill(2.0);
        counts.data[[0, 12, 12]] += 30.0;
        for (dy, dx) in [(-1, 0), (1, 0), (0, -1), (0, 1)] {
            counts.data[[0, (12 + dy) as usize, (12 + dx) as usize]] += 5.0;
        }
        let mut background = Map::zeros(geom.clone());
        background.data.fill(2.0);
        let mut exposure = Map::zeros(geom.clone());
        exposure.data.fill(1e14);
        Dataset {
            name: "obs1".to_string(),
            counts,
            exposure,
            background: Some(background),
            psf: PsfMap::from_kernels(0.1, kernel),
            mask_safe: None,
            mask_fit: None,
        }
    }

    #[test]
    fn fit_inputs_have_expected_keys_and_normalized_kernel() {
        let d = small_dataset("obs1");
        let maps = TsMapEstimator::default()
            .estimate_fit_input_maps(&d, &Models::default())
            .unwrap();
        let keys: Vec<&str> = maps.keys().collect();
        assert_eq!(keys, vec!["background", "counts", "exposure", "kernel", "mask", "norm"]);
        assert!((maps.get("kernel").unwrap().sum() - 1.0).abs() < 1e-12);
        assert_eq!(maps.get("counts").unwrap().data.dim(), (1, 10, 12));
    }

    #[test]
    fn ts_is_non_negative_and_peaks_at_injected_source() {
        let d = injected();
        let maps = TsMapEstimator::default().run(&d, &Models::default()).unwrap();
        let ts = &maps.get("ts").unwrap().data;
        assert!(ts.iter().all(|t| *t >= 0.0));
        let (peak, _) = ts
            .indexed_iter()
            .max_by(|a, b| a.1.total_cmp(b.1))
            .unwrap();
        assert_eq!(peak, (0, 12, 12));
        assert!(ts[[0, 12, 12]] > 25.0);
        assert!(ts[[0, 2, 2]] < 1e-6);

        let sqrt_ts = &maps.get("sqrt_ts").unwrap().data;
        assert!((sqrt_ts[[0, 12, 12]] - ts[[0, 12, 12]].sqrt()).abs() < 1e-12);
        assert!(maps.get("flux").unwrap().data[[0, 12, 12]] > 0.0);
    }

    #[test]
    fn fitted_norm_reproduces_injected_counts() {
        let d = injected();
        let maps = TsMapEstimator::default().run(&d, &Models::default()).unwrap();
        let norm = maps.get("norm").unwrap().data[[0, 12, 12]];
        let per_norm = maps.get("exposure").unwrap().data[[0, 12, 12]];
        // Injected 50 counts in total.
        assert!((norm * per_norm - 50.0).abs() < 5.0, "norm * ex = {}", norm * per_norm);
    }

    #[test]
    fn masked_pixels_get_zero_ts() {
        let mut d = injected();
        let mut safe = crate::sky::Mask::full(d.geom().clone(), true);
        safe.data[[0, 12, 12]] = false;
        d.mask_safe = Some(safe);
        let maps = TsMapEstimator::default().run(&d, &Models::default()).unwrap();
        assert_eq!(maps.get("ts").unwrap().data[[0, 12, 12]], 0.0);
        assert!(maps.get("norm").unwrap().data[[0, 12, 12]].is_nan());
        assert_eq!(maps.get("flux").unwrap().data[[0, 12, 12]], 0.0);
    }

    #[test]
    fn zero_exposure_is_an_estimation_error() {
        let mut d = small_dataset("obs1");
        d.exposure.data.fill(0.0);
        let err = TsMapEstimator::default()
            .estimate_fit_input_maps(&d, &Models::default())
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Estimation);
    }

    #[test]
    fn integer_psf_is_an_estimation_error() {
        let mut d = small_dataset("obs1");
        d.psf.data = crate::data::KernelData::Integer(Array3::from_elem((2, 3, 3), 1));
        let err = TsMapEstimator::default()
            .estimate_fit_input_maps(&d, &Models::default())
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Estimation);
    }
}
