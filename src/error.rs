//! Error taxonomy for model construction, estimation, and file I/O.
//!
//! Every variant maps to a process exit code so the binary can report failures
//! the same way regardless of which stage produced them:
//!
//! - `2`: invalid inputs, configuration, or files
//! - `3`: inconsistent data shapes or unnormalizable frequencies
//! - `4`: the point estimator failed

use std::path::{Path, PathBuf};

use thiserror::Error;

/// The last usable optimizer iterate, attached to convergence failures.
#[derive(Debug, Clone, PartialEq)]
pub struct LastIterate {
    /// Fitness values for the non-reference lineages, in table order.
    pub fitness: Vec<f64>,
    pub iterations: usize,
    /// Log posterior at this iterate.
    pub log_posterior: f64,
}

#[derive(Debug, Error)]
pub enum FitError {
    #[error("Data shape error: {0}")]
    DataShape(String),

    #[error("Invalid prior: {0}")]
    InvalidPrior(String),

    #[error("Convergence error: {message}")]
    Convergence {
        message: String,
        last: Option<LastIterate>,
    },

    #[error("Normalization error: {0}")]
    Normalization(String),

    #[error("File format error in '{}': {message}", .path.display())]
    FileFormat { path: PathBuf, message: String },

    #[error("I/O error on '{}': {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{population}/{environment} replicate {replicate}: {source}")]
    Replicate {
        population: String,
        environment: String,
        replicate: usize,
        #[source]
        source: Box<FitError>,
    },

    #[error("Configuration error: {0}")]
    Config(String),
}

impl FitError {
    pub fn file_format(path: &Path, message: impl Into<String>) -> Self {
        Self::FileFormat {
            path: path.to_path_buf(),
            message: message.into(),
        }
    }

    pub fn io(path: &Path, source: std::io::Error) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }

    pub fn convergence(message: impl Into<String>, last: Option<LastIterate>) -> Self {
        Self::Convergence {
            message: message.into(),
            last,
        }
    }

    /// Exit code used by the `lfit` binary.
    pub fn exit_code(&self) -> u8 {
        match self {
            FitError::InvalidPrior(_)
            | FitError::FileFormat { .. }
            | FitError::Io { .. }
            | FitError::Config(_) => 2,
            FitError::DataShape(_) | FitError::Normalization(_) => 3,
            FitError::Convergence { .. } => 4,
            FitError::Replicate { source, .. } => source.exit_code(),
        }
    }
}

/// Result type alias for library operations.
pub type Result<T> = std::result::Result<T, FitError>;
