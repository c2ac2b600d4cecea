//! Binned maps and named map bundles.

use std::collections::BTreeMap;

use ndarray::{Array2, Array3, ArrayView2, Axis, s};
use serde::{Deserialize, Serialize};

use crate::sky::coord::SkyCoord;
use crate::sky::geom::{GeomError, WcsGeom};

/// Real-valued map, data laid out `(energy, y, x)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Map {
    pub geom: WcsGeom,
    pub data: Array3<f64>,
}

impl Map {
    pub fn try_new(geom: WcsGeom, data: Array3<f64>) -> Result<Self, GeomError> {
        geom.check_shape(data.dim())?;
        Ok(Self { geom, data })
    }

    pub fn zeros(geom: WcsGeom) -> Self {
        let data = Array3::zeros(geom.data_shape());
        Self { geom, data }
    }

    /// Single-bin map built from a 2-D image on `geom`'s sky grid.
    pub fn from_image(geom: &WcsGeom, image: Array2<f64>) -> Result<Self, GeomError> {
        let geom = geom.to_image();
        let data = image.insert_axis(Axis(0));
        Self::try_new(geom, data)
    }

    /// Image of energy bin `idx`.
    pub fn plane(&self, idx: usize) -> ArrayView2<'_, f64> {
        self.data.index_axis(Axis(0), idx)
    }

    pub fn sum(&self) -> f64 {
        self.data.sum()
    }

    /// Sum over the energy axis.
    pub fn sum_over_energy(&self) -> Map {
        let image = self.data.sum_axis(Axis(0)).insert_axis(Axis(0));
        Map {
            geom: self.geom.to_image(),
            data: image,
        }
    }

    pub fn cutout(&self, position: &SkyCoord, width: f64) -> Result<Map, GeomError> {
        let cut = self.geom.cutout(position, width)?;
        let data = self
            .data
            .slice(s![.., cut.y.clone(), cut.x.clone()])
            .to_owned();
        Map::try_new(cut.geom, data)
    }
}

/// Boolean map (true = pixel used).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Mask {
    pub geom: WcsGeom,
    pub data: Array3<bool>,
}

impl Mask {
    pub fn try_new(geom: WcsGeom, data: Array3<bool>) -> Result<Self, GeomError> {
        geom.check_shape(data.dim())?;
        Ok(Self { geom, data })
    }

    pub fn full(geom: WcsGeom, value: bool) -> Self {
        let data = Array3::from_elem(geom.data_shape(), value);
        Self { geom, data }
    }

    pub fn count_true(&self) -> usize {
        self.data.iter().filter(|v| **v).count()
    }

    /// Elementwise NOT.
    pub fn invert(&self) -> Mask {
        Mask {
            geom: self.geom.clone(),
            data: self.data.mapv(|v| !v),
        }
    }

    /// Pixel is kept in the image if it is kept in any energy bin.
    pub fn any_over_energy(&self) -> Mask {
        let ny_nx = self.geom.image_shape();
        let image = Array2::from_shape_fn(ny_nx, |(iy, ix)| {
            self.data.slice(s![.., iy, ix]).iter().any(|v| *v)
        });
        Mask {
            geom: self.geom.to_image(),
            data: image.insert_axis(Axis(0)),
        }
    }

    /// As a 0/1 real-valued map.
    pub fn to_map(&self) -> Map {
        Map {
            geom: self.geom.clone(),
            data: self.data.mapv(|v| if v { 1.0 } else { 0.0 }),
        }
    }
}

/// Named bundle of maps, ordered by name.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Maps(BTreeMap<String, Map>);

impl Maps {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, map: Map) -> Option<Map> {
        self.0.insert(name.into(), map)
    }

    pub fn remove(&mut self, name: &str) -> Option<Map> {
        self.0.remove(name)
    }

    pub fn get(&self, name: &str) -> Option<&Map> {
        self.0.get(name)
    }

    pub fn contains_key(&self, name: &str) -> bool {
        self.0.contains_key(name)
    }

    /// Move the map stored under `from` to `to`. Returns false if `from` is absent.
    pub fn rename(&mut self, from: &str, to: &str) -> bool {
        match self.0.remove(from) {
            Some(map) => {
                self.0.insert(to.to_string(), map);
                true
            }
            None => false,
        }
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Map)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Apply `f` to every map, keeping the keys.
    pub fn map_values<F, E>(&self, f: F) -> Result<Maps, E>
    where
        F: Fn(&Map) -> Result<Map, E>,
    {
        self.0
            .iter()
            .map(|(k, v)| f(v).map(|m| (k.clone(), m)))
            .collect::<Result<BTreeMap<_, _>, E>>()
            .map(Maps)
    }

    /// Crop every map to `width` degrees around `position`.
    pub fn cutout(&self, position: &SkyCoord, width: f64) -> Result<Maps, GeomError> {
        self.map_values(|m| m.cutout(position, width))
    }
}

impl FromIterator<(String, Map)> for Maps {
    fn from_iter<I: IntoIterator<Item = (String, Map)>>(iter: I) -> Self {
        Maps(iter.into_iter().collect())
    }
}
