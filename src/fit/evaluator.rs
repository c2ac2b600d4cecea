//! Predicted counts of a model set on one dataset.
//!
//! For each component `c` and energy bin `e`:
//!
//! ```text
//! npred_e += S_c(e) · conv(exposure_e ⊙ spatial_c, psf_e)
//! ```
//!
//! `S_c(e)` is the spectral integral over the bin and `spatial_c` the
//! per-pixel spatial weight. The convolved spatial part only depends on the
//! spatial parameters, so it is cached per component and reused while those
//! stay put (a spectral-only fit never recomputes it).

use ndarray::{Array2, Array3, Axis, Zip};

use crate::data::Dataset;
use crate::error::AppError;
use crate::math::convolve_same;
use crate::models::{Models, Parameters, SkyModel};

struct CachedResponse {
    name: String,
    spatial: Parameters,
    response: Array3<f64>,
}

pub struct MapEvaluator<'a> {
    dataset: &'a Dataset,
    kernels: &'a Array3<f64>,
    cache: Vec<Option<CachedResponse>>,
}

impl<'a> MapEvaluator<'a> {
    pub fn new(dataset: &'a Dataset) -> Result<Self, AppError> {
        let kernels = dataset
            .psf
            .kernels()
            .map_err(|e| AppError::load(format!("dataset '{}': {e}", dataset.name)))?;
        Ok(Self {
            dataset,
            kernels,
            cache: Vec::new(),
        })
    }

    pub fn dataset(&self) -> &'a Dataset {
        self.dataset
    }

    /// Expected counts of `models` plus the dataset's own background.
    pub fn npred(&mut self, models: &Models) -> Result<Array3<f64>, AppError> {
        let dataset = self.dataset;
        let axis = &dataset.geom().axis;
        let mut npred = match &dataset.background {
            Some(b) => b.data.clone(),
            None => Array3::zeros(dataset.geom().data_shape()),
        };

        if self.cache.len() != models.len() {
            self.cache = (0..models.len()).map(|_| None).collect();
        }
        for (ci, component) in models.iter().enumerate() {
            let response = self.response(ci, component)?;
            for (e, mut plane) in npred.axis_iter_mut(Axis(0)).enumerate() {
                let (lo, hi) = axis.bin_bounds(e);
                let flux = component.spectral.integral(lo, hi);
                if flux != 0.0 {
                    plane.scaled_add(flux, &response.index_axis(Axis(0), e));
                }
            }
        }
        Ok(npred)
    }

    fn response(&mut self, idx: usize, component: &SkyModel) -> Result<&Array3<f64>, AppError> {
        let fresh = matches!(
            &self.cache[idx],
            Some(c) if c.name == component.name && c.spatial == component.spatial.parameters
        );
        if !fresh {
            let response = self.compute_response(component)?;
            self.cache[idx] = Some(CachedResponse {
                name: component.name.clone(),
                spatial: component.spatial.parameters.clone(),
                response,
            });
        }
        match &self.cache[idx] {
            Some(c) => Ok(&c.response),
            None => Err(AppError::config(format!("component '{}': no spatial response", component.name))),
        }
    }

    fn compute_response(&self, component: &SkyModel) -> Result<Array3<f64>, AppError> {
        let geom = self.dataset.geom();
        let weights = component.spatial.integrate_geom(geom).ok_or_else(|| {
            AppError::config(format!("component '{}': template map not loaded", component.name))
        })?;

        let mut response = Array3::zeros(geom.data_shape());
        for (e, mut plane) in response.axis_iter_mut(Axis(0)).enumerate() {
            let mut exposed = Array2::<f64>::zeros(geom.image_shape());
            Zip::from(&mut exposed)
                .and(&self.dataset.exposure.plane(e))
                .and(&weights)
                .for_each(|out, &x, &w| *out = x * w);
            let smeared = convolve_same(&exposed.view(), &self.kernels.index_axis(Axis(0), e));
            plane.assign(&smeared);
        }
        Ok(response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::dataset::tests::small_dataset;
    use crate::models::{SpatialModel, SpectralModel};
    use crate::sky::Map;

    fn point_models(amplitude: f64) -> (Dataset, Models) {
        let d = small_dataset("obs1");
        let model = SkyModel::new(
            "src",
            SpectralModel::power_law(amplitude, 2.0, 0.1),
            SpatialModel::point(d.geom().center),
        );
        (d, Models::new(vec![model]).unwrap())
    }

    #[test]
    fn point_source_counts_match_exposure_times_flux() {
        let (d, models) = point_models(1e-12);
        let mut ev = MapEvaluator::new(&d).unwrap();
        let npred = ev.npred(&models).unwrap();

        let spectral = &models.iter().next().unwrap().spectral;
        let expected = 1e11 * spectral.integral(0.01, 0.1) + 3e11 * spectral.integral(0.1, 1.0);
        assert!((npred.sum() - expected).abs() < 1e-9 * expected);
    }

    #[test]
    fn dataset_background_is_added() {
        let (mut d, models) = point_models(0.0);
        let mut bkg = Map::zeros(d.geom().clone());
        bkg.data.fill(0.5);
        d.background = Some(bkg);
        let mut ev = MapEvaluator::new(&d).unwrap();
        let npred = ev.npred(&models).unwrap();
        assert_eq!(npred[[1, 3, 3]], 0.5);
    }

    #[test]
    fn spectral_changes_reuse_cached_response() {
        let (d, mut models) = point_models(1e-12);
        let mut ev = MapEvaluator::new(&d).unwrap();
        let first = ev.npred(&models).unwrap().sum();

        let amp = models.free_parameters()[1];
        models.set_value(amp, 2e-12);
        let second = ev.npred(&models).unwrap().sum();
        assert!((second / first - 2.0).abs() < 1e-12);
    }
}
