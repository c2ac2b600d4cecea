//! Sky geometry: coordinates, regions, pixel grids and maps.
//!
//! This is the small subset of a WCS map library the pipeline needs:
//! world/pixel conversion on a plate-carrée grid, circular region masks,
//! energy collapsing and positional cutouts.

pub mod coord;
pub mod geom;
pub mod map;
pub mod region;

pub use coord::*;
pub use geom::*;
pub use map::*;
pub use region::*;
