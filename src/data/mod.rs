//! Data sources: datasets, catalogs, name resolvers and synthetic inputs.

pub mod catalog;
pub mod dataset;
pub mod resolver;
pub mod simulate;

pub use catalog::*;
pub use dataset::*;
pub use resolver::*;
pub use simulate::*;
