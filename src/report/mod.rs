//! Reporting utilities: model tables and fit/reduction summaries.

pub mod format;

pub use format::*;
