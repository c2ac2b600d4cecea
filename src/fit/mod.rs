//! Likelihood fitting.
//!
//! Responsibilities:
//!
//! - predict counts of a model set on a dataset (`evaluator`)
//! - Poisson (Cash) statistic (`likelihood`)
//! - joint optimizer over all datasets (`fitter`)
//! - the background stage with its exclusion fit mask (`background`)

pub mod background;
pub mod evaluator;
pub mod fitter;
pub mod likelihood;

pub use background::*;
pub use evaluator::*;
pub use fitter::*;
pub use likelihood::*;
