//! `skyreduce` library crate.
//!
//! The binary (`skyreduce`) is a thin wrapper around this library so that:
//!
//! - the pipeline is testable without spawning processes
//! - collaborators (catalogs, resolvers, fitters, writers) can be swapped in tests

pub mod app;
pub mod cli;
pub mod data;
pub mod domain;
pub mod error;
pub mod estimate;
pub mod fit;
pub mod io;
pub mod math;
pub mod models;
pub mod report;
pub mod sky;
