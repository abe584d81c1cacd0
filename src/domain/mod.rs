//! Domain types used throughout the pipeline.
//!
//! This module defines:
//!
//! - the canonical count table (`CountTable`) and its lineages
//! - closed selectors (`PriorKind`, `FailurePolicy`)
//! - run configurations (`FitConfig`, `SimulateConfig`)

pub mod types;

pub use types::*;
