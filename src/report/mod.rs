//! Reporting utilities: formatted terminal output for runs and saved tables.

pub mod format;

pub use format::*;
