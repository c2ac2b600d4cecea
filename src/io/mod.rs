//! Input/output helpers.
//!
//! - dataset collection read/write (`datasets`)
//! - map and map-bundle JSON codec (`maps`)
//! - writing the per-dataset outputs (`output`)

pub mod datasets;
pub mod maps;
pub mod output;

pub use datasets::*;
pub use maps::*;
pub use output::*;
