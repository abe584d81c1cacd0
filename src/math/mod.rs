//! Mathematical utilities: simplex helpers and the L-BFGS minimizer.

pub mod lbfgs;
pub mod simplex;

pub use lbfgs::*;
pub use simplex::*;
