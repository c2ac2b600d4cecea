//! TS-map estimation and the per-dataset reduction built on it.

pub mod reduce;
pub mod ts_map;

pub use reduce::*;
pub use ts_map::*;
