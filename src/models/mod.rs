//! Sky model layer: parameters, spectral and spatial models, the combined
//! model collection and its YAML configuration.

pub mod assemble;
pub mod config;
pub mod parameter;
pub mod sky_model;
pub mod spatial;
pub mod spectral;

pub use assemble::*;
pub use config::*;
pub use parameter::*;
pub use sky_model::*;
pub use spatial::*;
pub use spectral::*;
