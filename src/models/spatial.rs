//! Spatial models.
//!
//! `integrate_geom` returns, per pixel, the fraction of the source that falls
//! into that pixel (point and gaussian), or the template intensity integrated
//! over the pixel solid angle (template). Multiplying by exposure and the
//! spectral integral gives expected counts before PSF smearing.

use std::path::PathBuf;

use ndarray::Array2;
use serde::{Deserialize, Serialize};

use crate::models::parameter::{Parameter, Parameters};
use crate::sky::{Frame, Map, SkyCoord, WcsGeom};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SpatialKind {
    #[serde(rename = "PointSpatialModel", alias = "point")]
    Point,
    #[serde(rename = "GaussianSpatialModel", alias = "gauss")]
    Gaussian,
    #[serde(rename = "TemplateSpatialModel", alias = "template")]
    Template,
}

impl SpatialKind {
    pub fn type_name(self) -> &'static str {
        match self {
            SpatialKind::Point => "PointSpatialModel",
            SpatialKind::Gaussian => "GaussianSpatialModel",
            SpatialKind::Template => "TemplateSpatialModel",
        }
    }

    fn default_parameters(self) -> Vec<Parameter> {
        match self {
            SpatialKind::Point => vec![
                Parameter::new("lon_0", 0.0, "deg"),
                Parameter::new("lat_0", 0.0, "deg").with_bounds(Some(-90.0), Some(90.0)),
            ],
            SpatialKind::Gaussian => vec![
                Parameter::new("lon_0", 0.0, "deg"),
                Parameter::new("lat_0", 0.0, "deg").with_bounds(Some(-90.0), Some(90.0)),
                Parameter::new("sigma", 1.0, "deg").with_bounds(Some(0.0), None),
            ],
            SpatialKind::Template => Vec::new(),
        }
    }
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpatialModel {
    #[serde(rename = "type")]
    pub kind: SpatialKind,
    #[serde(default)]
    pub frame: Frame,
    /// Template map file (template models only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filename: Option<PathBuf>,
    /// Rescale the template so it integrates to one over the sky.
    #[serde(default = "default_true")]
    pub normalize: bool,
    #[serde(default)]
    pub parameters: Parameters,
    #[serde(skip)]
    pub template: Option<Map>,
}

impl SpatialModel {
    pub fn with_defaults(self) -> Result<Self, String> {
        if self.kind == SpatialKind::Template && self.filename.is_none() {
            return Err("TemplateSpatialModel requires a filename".to_string());
        }
        let parameters =
            Parameters::merged(self.kind.default_parameters(), &self.parameters, self.kind.type_name())?;
        Ok(Self { parameters, ..self })
    }

    pub fn point(position: SkyCoord) -> Self {
        Self {
            kind: SpatialKind::Point,
            frame: position.frame,
            filename: None,
            normalize: true,
            parameters: Parameters::new(vec![
                Parameter::new("lon_0", position.lon, "deg"),
                Parameter::new("lat_0", position.lat, "deg").with_bounds(Some(-90.0), Some(90.0)),
            ]),
            template: None,
        }
    }

    pub fn gaussian(position: SkyCoord, sigma: f64) -> Self {
        Self {
            kind: SpatialKind::Gaussian,
            frame: position.frame,
            filename: None,
            normalize: true,
            parameters: Parameters::new(vec![
                Parameter::new("lon_0", position.lon, "deg"),
                Parameter::new("lat_0", position.lat, "deg").with_bounds(Some(-90.0), Some(90.0)),
                Parameter::new("sigma", sigma, "deg").with_bounds(Some(0.0), None),
            ]),
            template: None,
        }
    }

    pub fn template(filename: PathBuf, map: Map, normalize: bool) -> Self {
        Self {
            kind: SpatialKind::Template,
            frame: map.geom.frame(),
            filename: Some(filename),
            normalize,
            parameters: Parameters::default(),
            template: Some(map),
        }
    }

    pub fn unfreeze(&mut self) {
        let defaults = self.kind.default_parameters();
        for p in self.parameters.iter_mut() {
            p.frozen = defaults.iter().any(|d| d.name == p.name && d.frozen);
        }
    }

    /// Source position, for analytic models.
    pub fn position(&self) -> Option<SkyCoord> {
        match self.kind {
            SpatialKind::Point | SpatialKind::Gaussian => Some(SkyCoord::new(
                self.parameters.value("lon_0"),
                self.parameters.value("lat_0"),
                self.frame,
            )),
            SpatialKind::Template => None,
        }
    }

    /// Per-pixel integrated spatial weight on `geom`'s sky grid.
    ///
    /// Returns `None` for a template model whose map has not been loaded.
    pub fn integrate_geom(&self, geom: &WcsGeom) -> Option<Array2<f64>> {
        let shape = geom.image_shape();
        match self.kind {
            SpatialKind::Point => {
                let mut out = Array2::zeros(shape);
                if let Some((ix, iy)) = self.position().and_then(|p| geom.coord_to_idx(&p)) {
                    out[[iy, ix]] = 1.0;
                }
                Some(out)
            }
            SpatialKind::Gaussian => {
                let center = self.position()?;
                let sigma = self.parameters.value("sigma").to_radians();
                let norm = 1.0 / (2.0 * std::f64::consts::PI * sigma * sigma);
                let omega = geom.solid_angle();
                Some(Array2::from_shape_fn(shape, |(iy, ix)| {
                    let theta = center
                        .separation(&geom.pixel_to_coord(ix as f64, iy as f64))
                        .to_radians();
                    norm * (-0.5 * (theta / sigma).powi(2)).exp() * omega[[iy, ix]]
                }))
            }
            SpatialKind::Template => {
                let template = self.template.as_ref()?;
                let image = template.plane(0);
                let scale = if self.normalize {
                    let total: f64 = image
                        .iter()
                        .zip(template.geom.solid_angle().iter())
                        .map(|(v, o)| v * o)
                        .sum();
                    if total > 0.0 { 1.0 / total } else { 0.0 }
                } else {
                    1.0
                };
                let omega = geom.solid_angle();
                // Nearest-pixel resampling onto the target grid.
                Some(Array2::from_shape_fn(shape, |(iy, ix)| {
                    let coord = geom.pixel_to_coord(ix as f64, iy as f64);
                    match template.geom.coord_to_idx(&coord) {
                        Some((tx, ty)) => image[[ty, tx]] * scale * omega[[iy, ix]],
                        None => 0.0,
                    }
                }))
            }
        }
    }
}
