use serde::{Deserialize, Serialize};

use crate::sky::coord::SkyCoord;

/// Circle on the sky; `radius` in degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CircleSkyRegion {
    pub center: SkyCoord,
    pub radius: f64,
}

impl CircleSkyRegion {
    pub fn new(center: SkyCoord, radius: f64) -> Self {
        Self { center, radius }
    }

    pub fn contains(&self, coord: &SkyCoord) -> bool {
        self.center.separation(coord) <= self.radius
    }
}
