//! Pixel geometry for binned sky maps.
//!
//! A `WcsGeom` is a plate-carrée grid: pixel columns step in longitude and
//! rows step in latitude, both by `binsz` degrees, around a reference pixel
//! at the middle of the image. Longitude increases to the left (towards
//! smaller `x`), matching the usual FITS sky-image orientation.
//!
//! An energy axis (`MapAxis`) turns the 2-D grid into the 3-D geometry of a
//! binned dataset. Array data is always laid out `(energy, y, x)`.

use std::ops::Range;

use ndarray::{Array2, Array3};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::sky::coord::{Frame, SkyCoord, wrap_delta_lon};
use crate::sky::region::CircleSkyRegion;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum GeomError {
    #[error("energy axis needs at least two strictly increasing positive edges, got {0:?}")]
    InvalidAxis(Vec<f64>),
    #[error("invalid geometry: {0}")]
    InvalidGeom(String),
    #[error("data shape {found:?} does not match geometry shape {expected:?}")]
    ShapeMismatch {
        expected: (usize, usize, usize),
        found: (usize, usize, usize),
    },
    #[error("position {0} lies outside the map footprint")]
    OutsideFootprint(SkyCoord),
}

/// Energy binning, edges in TeV.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MapAxis {
    pub edges: Vec<f64>,
}

impl MapAxis {
    pub fn new(edges: Vec<f64>) -> Result<Self, GeomError> {
        let valid = edges.len() >= 2
            && edges.iter().all(|e| e.is_finite() && *e > 0.0)
            && edges.windows(2).all(|w| w[1] > w[0]);
        if !valid {
            return Err(GeomError::InvalidAxis(edges));
        }
        Ok(Self { edges })
    }

    /// Log-spaced axis with `nbin` bins between `emin` and `emax`.
    pub fn log_spaced(emin: f64, emax: f64, nbin: usize) -> Result<Self, GeomError> {
        let nbin = nbin.max(1);
        let (lmin, lmax) = (emin.ln(), emax.ln());
        let step = (lmax - lmin) / nbin as f64;
        let edges = (0..=nbin).map(|i| (lmin + step * i as f64).exp()).collect();
        Self::new(edges)
    }

    pub fn nbin(&self) -> usize {
        self.edges.len() - 1
    }

    pub fn bin_bounds(&self, idx: usize) -> (f64, f64) {
        (self.edges[idx], self.edges[idx + 1])
    }

    /// Geometric bin center.
    pub fn center(&self, idx: usize) -> f64 {
        let (lo, hi) = self.bin_bounds(idx);
        (lo * hi).sqrt()
    }

    /// A single bin covering the whole axis.
    pub fn squash(&self) -> MapAxis {
        MapAxis {
            edges: vec![self.edges[0], self.edges[self.edges.len() - 1]],
        }
    }
}

/// Sky geometry of a map.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WcsGeom {
    /// Sky position of the reference pixel (the image center).
    pub center: SkyCoord,
    /// Pixel size in degrees.
    pub binsz: f64,
    /// Image size as `(nx, ny)`.
    pub npix: (usize, usize),
    pub axis: MapAxis,
}

/// Output of [`WcsGeom::cutout`]: the cropped geometry and the pixel ranges
/// of the parent image it covers.
#[derive(Debug, Clone, PartialEq)]
pub struct CutoutSlices {
    pub geom: WcsGeom,
    pub x: Range<usize>,
    pub y: Range<usize>,
}

impl WcsGeom {
    pub fn new(center: SkyCoord, binsz: f64, npix: (usize, usize), axis: MapAxis) -> Result<Self, GeomError> {
        if !(binsz.is_finite() && binsz > 0.0) {
            return Err(GeomError::InvalidGeom(format!("binsz must be > 0, got {binsz}")));
        }
        if npix.0 == 0 || npix.1 == 0 {
            return Err(GeomError::InvalidGeom(format!("npix must be non-zero, got {npix:?}")));
        }
        if !center.is_finite() {
            return Err(GeomError::InvalidGeom("center must be finite".to_string()));
        }
        Ok(Self {
            center,
            binsz,
            npix,
            axis,
        })
    }

    pub fn frame(&self) -> Frame {
        self.center.frame
    }

    /// `(energy, y, x)` array shape.
    pub fn data_shape(&self) -> (usize, usize, usize) {
        (self.axis.nbin(), self.npix.1, self.npix.0)
    }

    pub fn image_shape(&self) -> (usize, usize) {
        (self.npix.1, self.npix.0)
    }

    pub fn check_shape(&self, shape: (usize, usize, usize)) -> Result<(), GeomError> {
        if shape != self.data_shape() {
            return Err(GeomError::ShapeMismatch {
                expected: self.data_shape(),
                found: shape,
            });
        }
        Ok(())
    }

    fn crpix(&self) -> (f64, f64) {
        (
            (self.npix.0 as f64 - 1.0) / 2.0,
            (self.npix.1 as f64 - 1.0) / 2.0,
        )
    }

    /// Sky position of (possibly fractional) pixel coordinates.
    pub fn pixel_to_coord(&self, x: f64, y: f64) -> SkyCoord {
        let (cx, cy) = self.crpix();
        SkyCoord::new(
            self.center.lon - (x - cx) * self.binsz,
            self.center.lat + (y - cy) * self.binsz,
            self.frame(),
        )
    }

    /// Fractional pixel coordinates `(x, y)` of a sky position.
    pub fn coord_to_pixel(&self, coord: &SkyCoord) -> (f64, f64) {
        let c = coord.to_frame(self.frame());
        let (cx, cy) = self.crpix();
        let dlon = wrap_delta_lon(c.lon - self.center.lon);
        (cx - dlon / self.binsz, cy + (c.lat - self.center.lat) / self.binsz)
    }

    /// Integer pixel containing `coord`, if inside the image.
    pub fn coord_to_idx(&self, coord: &SkyCoord) -> Option<(usize, usize)> {
        let (x, y) = self.coord_to_pixel(coord);
        let (ix, iy) = (x.round(), y.round());
        if ix < 0.0 || iy < 0.0 || ix >= self.npix.0 as f64 || iy >= self.npix.1 as f64 {
            return None;
        }
        Some((ix as usize, iy as usize))
    }

    pub fn contains(&self, coord: &SkyCoord) -> bool {
        self.coord_to_idx(coord).is_some()
    }

    /// Solid angle (sr) of each pixel, shape `(ny, nx)`.
    pub fn solid_angle(&self) -> Array2<f64> {
        let (ny, nx) = self.image_shape();
        let side = self.binsz.to_radians();
        Array2::from_shape_fn((ny, nx), |(iy, ix)| {
            let lat = self.pixel_to_coord(ix as f64, iy as f64).lat;
            side * side * lat.to_radians().cos()
        })
    }

    /// Pixels whose centers fall inside `region` (true = inside), repeated
    /// over the energy axis.
    pub fn region_mask(&self, region: &CircleSkyRegion) -> Array3<bool> {
        let (ne, ny, nx) = self.data_shape();
        let inside = Array2::from_shape_fn((ny, nx), |(iy, ix)| {
            region.contains(&self.pixel_to_coord(ix as f64, iy as f64))
        });
        Array3::from_shape_fn((ne, ny, nx), |(_, iy, ix)| inside[[iy, ix]])
    }

    /// Same sky grid with the energy axis collapsed into one bin.
    pub fn to_image(&self) -> WcsGeom {
        WcsGeom {
            axis: self.axis.squash(),
            ..self.clone()
        }
    }

    /// True when both geometries describe the same sky pixels.
    pub fn same_footprint(&self, other: &WcsGeom) -> bool {
        self.npix == other.npix
            && self.frame() == other.frame()
            && (self.binsz - other.binsz).abs() <= 1e-9 * self.binsz
            && self.center.separation(&other.center) <= 1e-6 * self.binsz.max(1e-3)
    }

    /// Crop to a `width` × `width` degree box around `position`.
    ///
    /// Parts of the box falling outside the image are trimmed. A map that
    /// lies entirely inside the box is returned whole, even when `position`
    /// itself is off the image.
    pub fn cutout(&self, position: &SkyCoord, width: f64) -> Result<CutoutSlices, GeomError> {
        if !(width.is_finite() && width > 0.0) {
            return Err(GeomError::InvalidGeom(format!("cutout width must be > 0, got {width}")));
        }
        let (px, py) = self.coord_to_pixel(position);
        let n = ((width / self.binsz).round() as usize).max(1);

        let half = n as f64 / 2.0;
        let covers = |p: f64, len: usize| p - half <= -0.5 && p + half >= len as f64 - 0.5;
        if covers(px, self.npix.0) && covers(py, self.npix.1) {
            return Ok(CutoutSlices {
                geom: self.clone(),
                x: 0..self.npix.0,
                y: 0..self.npix.1,
            });
        }
        if !self.contains(position) {
            return Err(GeomError::OutsideFootprint(*position));
        }

        let x = trimmed_range(px, n, self.npix.0);
        let y = trimmed_range(py, n, self.npix.1);

        let cx = (x.start + x.end) as f64 / 2.0 - 0.5;
        let cy = (y.start + y.end) as f64 / 2.0 - 0.5;
        let geom = WcsGeom {
            center: self.pixel_to_coord(cx, cy),
            binsz: self.binsz,
            npix: (x.len(), y.len()),
            axis: self.axis.clone(),
        };
        Ok(CutoutSlices { geom, x, y })
    }
}

fn trimmed_range(center: f64, n: usize, len: usize) -> Range<usize> {
    let start = (center - (n as f64 - 1.0) / 2.0).round() as isize;
    let end = start + n as isize;
    let start = start.clamp(0, len as isize) as usize;
    let end = end.clamp(0, len as isize) as usize;
    start..end
}
