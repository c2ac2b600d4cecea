//! Mathematical utilities: linear solves, convolution and integration.

pub mod convolve;
pub mod integrate;
pub mod linalg;

pub use convolve::*;
pub use integrate::*;
pub use linalg::*;
