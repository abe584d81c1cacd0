//! Read/write run summary JSON files.
//!
//! The summary records everything needed to audit a `fit` run without
//! re-reading the CSV outputs:
//! - run labels, prior, reference fitness and estimator settings
//! - optimizer diagnostics per fitted replicate
//! - gaps left by skipped replicates

use std::fs::File;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::{FailurePolicy, FitConfig, PriorKind};
use super::export::StagedFile;
use crate::error::{FitError, Result};
use crate::fit::{BatchFit, EstimatorOptions, Hyperparameters, LineageStats, ReplicateGap};
use crate::math::Termination;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplicateSummary {
    /// 1-based replicate label.
    pub replicate: usize,
    pub log_posterior: f64,
    pub iterations: usize,
    pub termination: Termination,
    pub hyper: Option<Hyperparameters>,
    pub initial_frequencies: Vec<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub tool: String,
    pub generated_at: DateTime<Utc>,
    pub output: String,
    pub population: String,
    pub environment: String,
    pub prior: PriorKind,
    pub s_ref: f64,
    pub failure_policy: FailurePolicy,
    pub estimator: EstimatorOptions,
    pub lineages: Vec<String>,
    pub stats: Vec<LineageStats>,
    pub replicates: Vec<ReplicateSummary>,
    pub gaps: Vec<ReplicateGap>,
}

impl RunSummary {
    pub fn from_batch(config: &FitConfig, batch: &BatchFit) -> Self {
        let replicates = batch
            .fits
            .iter()
            .map(|fit| ReplicateSummary {
                replicate: fit.replicate,
                log_posterior: fit.estimate.log_posterior,
                iterations: fit.estimate.iterations,
                termination: fit.estimate.termination,
                hyper: fit.estimate.hyper,
                initial_frequencies: fit.estimate.initial_frequencies.first().cloned().unwrap_or_default(),
            })
            .collect();
        Self {
            tool: "lfit".to_string(),
            generated_at: Utc::now(),
            output: config.output.clone(),
            population: config.population.clone(),
            environment: config.environment.clone(),
            prior: config.prior,
            s_ref: config.s_ref,
            failure_policy: config.failure_policy,
            estimator: config.estimator.clone(),
            lineages: batch.aggregate.ids.clone(),
            stats: batch.aggregate.stats.clone(),
            replicates,
            gaps: batch.gaps.clone(),
        }
    }
}

pub fn write_summary_json(path: &Path, summary: &RunSummary) -> Result<()> {
    let mut out = StagedFile::create(path)?;
    serde_json::to_writer_pretty(out.writer(), summary)
        .map_err(|e| FitError::file_format(path, format!("failed to write summary JSON: {e}")))?;
    out.commit()
}

pub fn read_summary_json(path: &Path) -> Result<RunSummary> {
    let file = File::open(path).map_err(|e| FitError::io(path, e))?;
    serde_json::from_reader(file).map_err(|e| FitError::file_format(path, format!("invalid summary JSON: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn summary_json_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("summary.json");
        let summary = RunSummary {
            tool: "lfit".into(),
            generated_at: Utc::now(),
            output: "LTEE".into(),
            population: "pop1".into(),
            environment: "gluL".into(),
            prior: PriorKind::GaussianHierarchical,
            s_ref: 0.0,
            failure_policy: FailurePolicy::Skip,
            estimator: EstimatorOptions::default(),
            lineages: vec!["ref".into(), "a".into()],
            stats: vec![LineageStats { mean: 0.0, sd: 0.0 }, LineageStats { mean: 0.1, sd: 0.01 }],
            replicates: vec![ReplicateSummary {
                replicate: 1,
                log_posterior: -12.5,
                iterations: 40,
                termination: Termination::ObjectiveTolerance,
                hyper: Some(Hyperparameters { mu: 0.05, sigma: 0.1 }),
                initial_frequencies: vec![0.5, 0.5],
            }],
            gaps: vec![ReplicateGap {
                replicate: 2,
                message: "line search stalled".into(),
            }],
        };
        write_summary_json(&path, &summary).unwrap();
        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.contains("\"gaussian-hierarchical\""));
        assert!(text.contains("\"objective-tolerance\""));
        assert_eq!(read_summary_json(&path).unwrap(), summary);
    }

    #[test]
    fn invalid_json_is_a_format_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("summary.json");
        std::fs::write(&path, "{not json").unwrap();
        assert!(matches!(read_summary_json(&path), Err(FitError::FileFormat { .. })));
    }
}
