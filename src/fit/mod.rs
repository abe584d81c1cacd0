//! Fitness inference.
//!
//! Responsibilities:
//!
//! - define the exponential-competition model and its priors (`model`)
//! - find the MAP point with L-BFGS (`estimator`)
//! - simulate and reconstruct frequency trajectories (`trajectory`)
//! - fit replicates in parallel and aggregate their estimates (`aggregate`)

pub mod aggregate;
pub mod estimator;
pub mod model;
pub mod trajectory;

pub use aggregate::*;
pub use estimator::*;
pub use model::*;
pub use trajectory::*;
