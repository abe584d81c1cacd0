//! `lineage-fitness` library crate.
//!
//! Infers the relative fitness of competing lineages from barcode read counts
//! sampled over time. The binary (`lfit`) is a thin wrapper around this
//! library so that:
//!
//! - core logic is testable without spawning processes
//! - the model and estimator can be driven from other tools directly

pub mod app;
pub mod cli;
pub mod data;
pub mod domain;
pub mod error;
pub mod fit;
pub mod io;
pub mod math;
pub mod report;
