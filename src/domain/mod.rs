//! Run configuration used throughout the pipeline.
//!
//! This module defines:
//!
//! - the default component and source names of the reduction
//! - `PipelineConfig` with its derived assembly plan, exclusion region and
//!   output destinations

pub mod types;

pub use types::*;
