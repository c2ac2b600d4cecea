//! Binned observation datasets.

use ndarray::{Array2, Array3, ArrayView2, Axis};
use serde::{Deserialize, Serialize};

use crate::error::AppError;
use crate::fit::MapEvaluator;
use crate::models::{Models, SpectralModel};
use crate::sky::{Map, Mask, WcsGeom};

/// PSF kernel values as decoded from disk.
///
/// Some producers store kernels with an integer dtype; everything downstream
/// needs real values, so the loader coerces with [`PsfMap::coerce_to_float`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "dtype", content = "values", rename_all = "lowercase")]
pub enum KernelData {
    Float(Array3<f64>),
    Integer(Array3<i64>),
}

impl KernelData {
    pub fn dim(&self) -> (usize, usize, usize) {
        match self {
            KernelData::Float(a) => a.dim(),
            KernelData::Integer(a) => a.dim(),
        }
    }

    pub fn is_float(&self) -> bool {
        matches!(self, KernelData::Float(_))
    }
}

/// One PSF kernel per energy bin, `(energy, ky, kx)` with odd kernel sides.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PsfMap {
    /// Kernel pixel size in degrees.
    pub binsz: f64,
    pub data: KernelData,
}

impl PsfMap {
    pub fn from_kernels(binsz: f64, kernels: Array3<f64>) -> Self {
        Self {
            binsz,
            data: KernelData::Float(kernels),
        }
    }

    pub fn coerce_to_float(&mut self) {
        if let KernelData::Integer(values) = &self.data {
            self.data = KernelData::Float(values.mapv(|v| v as f64));
        }
    }

    /// Kernel values; fails if the map still holds integers.
    pub fn kernels(&self) -> Result<&Array3<f64>, String> {
        match &self.data {
            KernelData::Float(a) => Ok(a),
            KernelData::Integer(_) => Err("PSF kernel data is integer-typed".to_string()),
        }
    }

    pub fn kernel(&self, idx: usize) -> Result<ArrayView2<'_, f64>, String> {
        Ok(self.kernels()?.index_axis(Axis(0), idx))
    }

    pub fn validate(&self, nbin: usize) -> Result<(), String> {
        let (ne, ky, kx) = self.data.dim();
        if ne != nbin {
            return Err(format!("PSF has {ne} kernels but the dataset has {nbin} energy bins"));
        }
        if ky % 2 == 0 || kx % 2 == 0 {
            return Err(format!("PSF kernel shape ({ky}, {kx}) must be odd"));
        }
        if !(self.binsz.is_finite() && self.binsz > 0.0) {
            return Err(format!("PSF binsz must be > 0, got {}", self.binsz));
        }
        Ok(())
    }
}

/// One observation binned in sky position and energy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Dataset {
    pub name: String,
    pub counts: Map,
    /// Exposure in `cm² s`.
    pub exposure: Map,
    /// Additive instrumental background in counts, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub background: Option<Map>,
    pub psf: PsfMap,
    /// Pixels usable at all (instrument-level).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mask_safe: Option<Mask>,
    /// Pixels entering the likelihood fit.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mask_fit: Option<Mask>,
}

impl Dataset {
    pub fn geom(&self) -> &WcsGeom {
        &self.counts.geom
    }

    pub fn validate(&self) -> Result<(), String> {
        let geom = self.geom();
        if self.exposure.geom != *geom {
            return Err("exposure geometry differs from counts geometry".to_string());
        }
        if let Some(bkg) = &self.background {
            if bkg.geom != *geom {
                return Err("background geometry differs from counts geometry".to_string());
            }
        }
        for (label, mask) in [("mask_safe", &self.mask_safe), ("mask_fit", &self.mask_fit)] {
            if let Some(m) = mask {
                if m.data.dim() != geom.data_shape() {
                    return Err(format!("{label} shape differs from counts shape"));
                }
            }
        }
        geom.check_shape(self.counts.data.dim()).map_err(|e| e.to_string())?;
        geom.check_shape(self.exposure.data.dim()).map_err(|e| e.to_string())?;
        self.psf.validate(geom.axis.nbin())?;
        // Kernels are applied pixel by pixel, without resampling.
        if (self.psf.binsz - geom.binsz).abs() > 1e-6 * geom.binsz {
            return Err(format!(
                "PSF pixel size {} differs from map pixel size {}",
                self.psf.binsz, geom.binsz
            ));
        }
        Ok(())
    }

    /// Combined safe and fit mask, `None` when every pixel is used.
    pub fn mask(&self) -> Option<Array3<bool>> {
        match (&self.mask_safe, &self.mask_fit) {
            (None, None) => None,
            (Some(m), None) | (None, Some(m)) => Some(m.data.clone()),
            (Some(a), Some(b)) => Some(ndarray::Zip::from(&a.data).and(&b.data).map_collect(|x, y| *x && *y)),
        }
    }

    /// Collapse the energy axis into a single bin, carrying the prediction of
    /// `models` into the image.
    ///
    /// Counts are summed over safe pixels. The image background is the
    /// energy-summed cube prediction of `models` plus any dataset background,
    /// so it matches what was fitted bin by bin. Exposure is weighted per bin
    /// by the share of `spectrum`'s integral falling in that bin: for that
    /// spectrum `exposure · ∫F` over the single bin equals `Σ_e exposure_e · ∫_e F`.
    /// The PSF becomes the mean kernel weighted by the same expected counts.
    pub fn to_image(&self, name: &str, models: &Models, spectrum: &SpectralModel) -> Result<Dataset, AppError> {
        let image_err = |e: String| AppError::estimation(format!("dataset '{}': {e}", self.name));
        let geom = self.geom();
        let safe = self.mask_safe.as_ref().map(|m| &m.data);

        let masked_sum = |data: &Array3<f64>| -> Map {
            let mut data = data.clone();
            if let Some(safe) = safe {
                ndarray::Zip::from(&mut data).and(safe).for_each(|v, keep| {
                    if !*keep {
                        *v = 0.0;
                    }
                });
            }
            Map {
                geom: geom.clone(),
                data,
            }
            .sum_over_energy()
        };

        let npred = MapEvaluator::new(self)
            .and_then(|mut ev| ev.npred(models))
            .map_err(|e| image_err(e.message().to_string()))?;

        let axis = &geom.axis;
        let (emin, emax) = (axis.bin_bounds(0).0, axis.bin_bounds(axis.nbin() - 1).1);
        let total_flux = spectrum.integral(emin, emax);
        if !(total_flux.is_finite() && total_flux > 0.0) {
            return Err(image_err(format!(
                "weighting spectrum integrates to {total_flux} over [{emin}, {emax}] TeV"
            )));
        }
        let mut weighted = self.exposure.data.clone();
        for (e, mut plane) in weighted.axis_iter_mut(Axis(0)).enumerate() {
            let (lo, hi) = axis.bin_bounds(e);
            let share = spectrum.integral(lo, hi) / total_flux;
            plane.mapv_inplace(|v| v * share);
        }

        let counts = masked_sum(&self.counts.data);
        let background = masked_sum(&npred);
        let exposure = masked_sum(&weighted);

        let kernels = self.psf.kernels().map_err(image_err)?;
        let weights: Vec<f64> = weighted.axis_iter(Axis(0)).map(|plane| plane.sum()).collect();
        let total: f64 = weights.iter().sum();
        let (_, ky, kx) = kernels.dim();
        let mut kernel = Array2::<f64>::zeros((ky, kx));
        for (e, plane) in kernels.axis_iter(Axis(0)).enumerate() {
            let w = if total > 0.0 { weights[e] / total } else { 1.0 / weights.len() as f64 };
            kernel.scaled_add(w, &plane);
        }

        Ok(Dataset {
            name: name.to_string(),
            counts,
            exposure,
            background: Some(background),
            psf: PsfMap::from_kernels(self.psf.binsz, kernel.insert_axis(Axis(0))),
            mask_safe: self.mask_safe.as_ref().map(Mask::any_over_energy),
            mask_fit: self.mask_fit.as_ref().map(Mask::any_over_energy),
        })
    }
}

/// Ordered collection of uniquely named datasets.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Datasets {
    items: Vec<Dataset>,
}

impl Datasets {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, dataset: Dataset) -> Result<(), AppError> {
        if self.items.iter().any(|d| d.name == dataset.name) {
            return Err(AppError::load(format!("duplicate dataset name '{}'", dataset.name)));
        }
        self.items.push(dataset);
        Ok(())
    }

    pub fn first(&self) -> Option<&Dataset> {
        self.items.first()
    }

    pub fn get(&self, name: &str) -> Option<&Dataset> {
        self.items.iter().find(|d| d.name == name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Dataset> {
        self.items.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Dataset> {
        self.items.iter_mut()
    }

    pub fn as_slice(&self) -> &[Dataset] {
        &self.items
    }

    pub fn as_mut_slice(&mut self) -> &mut [Dataset] {
        &mut self.items
    }

    pub fn names(&self) -> Vec<String> {
        self.items.iter().map(|d| d.name.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}
