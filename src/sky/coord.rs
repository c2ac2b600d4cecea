//! Sky coordinates in the ICRS and Galactic frames.
//!
//! All angles are stored in degrees. Frame conversion uses the standard
//! ICRS → Galactic rotation matrix; for the arc-minute level precision
//! needed to place masks and cutouts this is all we need (no aberration,
//! precession or nutation).

use nalgebra::{Matrix3, Vector3};
use serde::{Deserialize, Serialize};

/// Rows of the ICRS → Galactic rotation (Hipparcos definition).
const ICRS_TO_GALACTIC: [[f64; 3]; 3] = [
    [-0.054_875_560_416_215_4, -0.873_437_090_234_885_0, -0.483_835_015_548_713_2],
    [0.494_109_427_875_583_7, -0.444_829_629_960_011_2, 0.746_982_244_497_218_9],
    [-0.867_666_149_019_004_7, -0.198_076_373_431_201_5, 0.455_983_776_175_066_9],
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Frame {
    #[default]
    Icrs,
    Galactic,
}

impl Frame {
    pub fn as_str(self) -> &'static str {
        match self {
            Frame::Icrs => "icrs",
            Frame::Galactic => "galactic",
        }
    }
}

/// A position on the sky.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SkyCoord {
    /// Longitude (RA or l), degrees in `[0, 360)`.
    pub lon: f64,
    /// Latitude (Dec or b), degrees.
    pub lat: f64,
    #[serde(default)]
    pub frame: Frame,
}

impl SkyCoord {
    pub fn new(lon: f64, lat: f64, frame: Frame) -> Self {
        Self {
            lon: lon.rem_euclid(360.0),
            lat,
            frame,
        }
    }

    pub fn icrs(ra: f64, dec: f64) -> Self {
        Self::new(ra, dec, Frame::Icrs)
    }

    pub fn galactic(l: f64, b: f64) -> Self {
        Self::new(l, b, Frame::Galactic)
    }

    pub fn is_finite(&self) -> bool {
        self.lon.is_finite() && self.lat.is_finite()
    }

    /// Express this position in `frame`.
    pub fn to_frame(&self, frame: Frame) -> SkyCoord {
        if self.frame == frame {
            return *self;
        }
        let rot = galactic_rotation();
        let v = self.unit_vector();
        let w = match (self.frame, frame) {
            (Frame::Icrs, Frame::Galactic) => rot * v,
            (Frame::Galactic, Frame::Icrs) => rot.transpose() * v,
            _ => v,
        };
        from_unit_vector(&w, frame)
    }

    /// Great-circle separation in degrees.
    pub fn separation(&self, other: &SkyCoord) -> f64 {
        let other = other.to_frame(self.frame);
        let (lon1, lat1) = (self.lon.to_radians(), self.lat.to_radians());
        let (lon2, lat2) = (other.lon.to_radians(), other.lat.to_radians());

        // Haversine: stable for the small separations masks care about.
        let dlat = lat2 - lat1;
        let dlon = lon2 - lon1;
        let a = (dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlon / 2.0).sin().powi(2);
        (2.0 * a.sqrt().min(1.0).asin()).to_degrees()
    }

    fn unit_vector(&self) -> Vector3<f64> {
        let (lon, lat) = (self.lon.to_radians(), self.lat.to_radians());
        Vector3::new(lat.cos() * lon.cos(), lat.cos() * lon.sin(), lat.sin())
    }
}

impl std::fmt::Display for SkyCoord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({:.4}, {:.4}) {}", self.lon, self.lat, self.frame.as_str())
    }
}

fn galactic_rotation() -> Matrix3<f64> {
    let r = ICRS_TO_GALACTIC;
    Matrix3::new(
        r[0][0], r[0][1], r[0][2], r[1][0], r[1][1], r[1][2], r[2][0], r[2][1], r[2][2],
    )
}

fn from_unit_vector(v: &Vector3<f64>, frame: Frame) -> SkyCoord {
    let lat = v.z.clamp(-1.0, 1.0).asin().to_degrees();
    let lon = v.y.atan2(v.x).to_degrees();
    SkyCoord::new(lon, lat, frame)
}

/// Wrap a longitude difference into `(-180, 180]`.
pub fn wrap_delta_lon(delta: f64) -> f64 {
    let d = delta.rem_euclid(360.0);
    if d > 180.0 { d - 360.0 } else { d }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn galactic_center_in_icrs() {
        let gc = SkyCoord::galactic(0.0, 0.0).to_frame(Frame::Icrs);
        assert!((gc.lon - 266.404_99).abs() < 1e-3, "ra = {}", gc.lon);
        assert!((gc.lat - (-28.936_17)).abs() < 1e-3, "dec = {}", gc.lat);
    }

    #[test]
    fn frame_round_trip_is_stable() {
        let c = SkyCoord::icrs(133.0, -46.33);
        let back = c.to_frame(Frame::Galactic).to_frame(Frame::Icrs);
        assert!(c.separation(&back) < 1e-9);
    }

    #[test]
    fn separation_across_frames() {
        let a = SkyCoord::icrs(10.0, 20.0);
        let b = SkyCoord::icrs(11.0, 20.0).to_frame(Frame::Galactic);
        let expected = 1.0 * 20.0_f64.to_radians().cos();
        assert!((a.separation(&b) - expected).abs() < 1e-4);
    }

    #[test]
    fn longitude_is_normalized() {
        let c = SkyCoord::icrs(-10.0, 0.0);
        assert!((c.lon - 350.0).abs() < 1e-12);
        assert_eq!(wrap_delta_lon(350.0), -10.0);
        assert_eq!(wrap_delta_lon(-190.0), 170.0);
    }
}
