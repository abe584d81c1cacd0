//! Input/output helpers.
//!
//! - CSV ingest + validation (`ingest`)
//! - result exports (CSV) (`export`)
//! - file naming for a run (`layout`)
//! - run summary JSON read/write (`summary`)

pub mod export;
pub mod ingest;
pub mod layout;
pub mod summary;

pub use export::*;
pub use ingest::*;
pub use layout::*;
pub use summary::*;
