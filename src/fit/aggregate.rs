//! Replicate batches: independent per-replicate fits and their aggregation.
//!
//! Each replicate of an environment is fitted on its own (in parallel). The
//! per-replicate fitness vectors are then summarized per lineage by their mean
//! and population standard deviation. A failing replicate either aborts the
//! batch or is recorded as a gap, depending on [`FailurePolicy`].

use log::{info, warn};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::domain::{CountTable, FailurePolicy};
use crate::error::{FitError, Result};
use crate::fit::estimator::{estimate_map, EstimatorOptions, MapEstimate};
use crate::fit::model::{FitnessModel, FitnessPrior};
use crate::fit::trajectory::{reconstruct, Reconstruction};

/// Per-lineage summary across replicates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LineageStats {
    pub mean: f64,
    /// Population standard deviation (divisor `R`).
    pub sd: f64,
}

/// Mean and population standard deviation of each column of `s_all`.
///
/// Rows are full fitness vectors (reference first). The reference column is
/// reported as `(s_ref, 0)` and a column whose values are all identical has
/// a standard deviation of exactly 0.
pub fn replicate_statistics(s_all: &[Vec<f64>], s_ref: f64) -> Result<Vec<LineageStats>> {
    let Some(first) = s_all.first() else {
        return Err(FitError::DataShape("no replicate fitness vectors to summarize".into()));
    };
    let n = first.len();
    if n == 0 {
        return Err(FitError::DataShape("fitness vectors are empty".into()));
    }
    if let Some((k, row)) = s_all.iter().enumerate().find(|(_, row)| row.len() != n) {
        return Err(FitError::DataShape(format!(
            "replicate row {} has {} entries, expected {n}",
            k + 1,
            row.len()
        )));
    }
    if s_all.iter().flatten().any(|v| !v.is_finite()) {
        return Err(FitError::DataShape("fitness vectors contain non-finite values".into()));
    }

    let r = s_all.len() as f64;
    let stats = (0..n)
        .map(|i| {
            if i == 0 {
                return LineageStats { mean: s_ref, sd: 0.0 };
            }
            let x0 = first[i];
            if s_all.iter().all(|row| row[i] == x0) {
                return LineageStats { mean: x0, sd: 0.0 };
            }
            let mean = s_all.iter().map(|row| row[i]).sum::<f64>() / r;
            let var = s_all.iter().map(|row| (row[i] - mean).powi(2)).sum::<f64>() / r;
            LineageStats { mean, sd: var.sqrt() }
        })
        .collect();
    Ok(stats)
}

/// A replicate excluded from aggregation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplicateGap {
    /// 1-based replicate label.
    pub replicate: usize,
    pub message: String,
}

/// Per-replicate fitness vectors plus their per-lineage summary.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AggregatedFitness {
    pub ids: Vec<String>,
    pub s_ref: f64,
    /// One entry per replicate in label order; `None` marks a gap.
    pub replicates: Vec<Option<Vec<f64>>>,
    pub stats: Vec<LineageStats>,
}

impl AggregatedFitness {
    pub fn n_fitted(&self) -> usize {
        self.replicates.iter().filter(|r| r.is_some()).count()
    }

    /// 1-based labels of replicates without a fit.
    pub fn gap_labels(&self) -> Vec<usize> {
        self.replicates
            .iter()
            .enumerate()
            .filter(|(_, r)| r.is_none())
            .map(|(k, _)| k + 1)
            .collect()
    }
}

/// Summarize full fitness vectors (reference first) over the fitted replicates.
pub fn aggregate(ids: Vec<String>, s_ref: f64, replicates: Vec<Option<Vec<f64>>>) -> Result<AggregatedFitness> {
    for (k, row) in replicates.iter().enumerate() {
        let Some(row) = row else { continue };
        if row.len() != ids.len() {
            return Err(FitError::DataShape(format!(
                "replicate {} has {} fitness values for {} lineages",
                k + 1,
                row.len(),
                ids.len()
            )));
        }
        if row[0] != s_ref {
            return Err(FitError::DataShape(format!(
                "replicate {} reference fitness {} differs from {s_ref}",
                k + 1,
                row[0]
            )));
        }
    }
    let fitted: Vec<Vec<f64>> = replicates.iter().flatten().cloned().collect();
    let stats = replicate_statistics(&fitted, s_ref)?;
    Ok(AggregatedFitness {
        ids,
        s_ref,
        replicates,
        stats,
    })
}

/// Everything a batch of replicate fits shares.
#[derive(Debug, Clone)]
pub struct BatchSpec {
    pub population: String,
    pub environment: String,
    pub s_ref: f64,
    pub prior: FitnessPrior,
    pub estimator: EstimatorOptions,
    pub policy: FailurePolicy,
    /// Time grid for reconstructions; defaults to the sample times.
    pub reconstruction_times: Option<Vec<f64>>,
}

/// One successful replicate fit.
#[derive(Debug, Clone)]
pub struct ReplicateFit {
    /// 1-based replicate label.
    pub replicate: usize,
    pub table: CountTable,
    pub estimate: MapEstimate,
    pub reconstruction: Reconstruction,
}

#[derive(Debug, Clone)]
pub struct BatchFit {
    pub fits: Vec<ReplicateFit>,
    pub gaps: Vec<ReplicateGap>,
    pub aggregate: AggregatedFitness,
}

/// Fit replicate `replicate` (0-based) of `table` on its own.
pub fn fit_replicate(table: &CountTable, spec: &BatchSpec, replicate: usize) -> Result<ReplicateFit> {
    let slice = table.replicate(replicate)?;
    let model = FitnessModel::new(slice.clone(), spec.s_ref, spec.prior.clone())?;
    let estimate = estimate_map(&model, &spec.estimator)?;
    let reconstruction = reconstruct(&model, &estimate, 0, spec.reconstruction_times.as_deref())?;
    Ok(ReplicateFit {
        replicate: replicate + 1,
        table: slice,
        estimate,
        reconstruction,
    })
}

/// Fit every replicate of `table` independently and aggregate the results.
///
/// Under [`FailurePolicy::Abort`] the first failing replicate (in label
/// order) is returned. Under [`FailurePolicy::Skip`] failures become gaps;
/// the batch still fails if no replicate succeeds.
pub fn fit_replicates(table: &CountTable, spec: &BatchSpec) -> Result<BatchFit> {
    let results: Vec<Result<ReplicateFit>> = (0..table.n_replicates())
        .into_par_iter()
        .map(|r| {
            fit_replicate(table, spec, r).map_err(|source| FitError::Replicate {
                population: spec.population.clone(),
                environment: spec.environment.clone(),
                replicate: r + 1,
                source: Box::new(source),
            })
        })
        .collect();

    let mut fits = Vec::with_capacity(results.len());
    let mut gaps = Vec::new();
    let mut first_error = None;
    for (r, result) in results.into_iter().enumerate() {
        match result {
            Ok(fit) => {
                info!(
                    "{}/{} replicate {}: fitted in {} iterations",
                    spec.population,
                    spec.environment,
                    fit.replicate,
                    fit.estimate.iterations
                );
                fits.push(fit);
            }
            Err(err) => match spec.policy {
                FailurePolicy::Abort => return Err(err),
                FailurePolicy::Skip => {
                    warn!("skipping {err}");
                    gaps.push(ReplicateGap {
                        replicate: r + 1,
                        message: err.to_string(),
                    });
                    first_error.get_or_insert(err);
                }
            },
        }
    }

    if fits.is_empty() {
        return Err(match first_error {
            Some(err) => err,
            None => FitError::DataShape("table has no replicates to fit".into()),
        });
    }

    let rows = (1..=table.n_replicates())
        .map(|label| {
            fits.iter()
                .find(|f| f.replicate == label)
                .map(|f| f.estimate.full_fitness())
        })
        .collect();
    let ids = table.ids().map(str::to_string).collect();
    let aggregate = aggregate(ids, spec.s_ref, rows)?;

    Ok(BatchFit {
        fits,
        gaps,
        aggregate,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(policy: FailurePolicy) -> BatchSpec {
        BatchSpec {
            population: "pop1".into(),
            environment: "env".into(),
            s_ref: 0.0,
            prior: FitnessPrior::Flat,
            estimator: EstimatorOptions::default(),
            policy,
            reconstruction_times: None,
        }
    }

    #[test]
    fn single_replicate_has_zero_spread() {
        let stats = replicate_statistics(&[vec![0.0, 0.04, -0.01]], 0.0).unwrap();
        assert_eq!(stats[0], LineageStats { mean: 0.0, sd: 0.0 });
        assert_eq!(stats[1], LineageStats { mean: 0.04, sd: 0.0 });
        assert_eq!(stats[2].sd, 0.0);
    }

    #[test]
    fn identical_rows_give_exactly_zero_spread() {
        let row = vec![0.0, 0.1 + 0.2, 1.0 / 3.0];
        let stats = replicate_statistics(&[row.clone(), row.clone(), row], 0.0).unwrap();
        assert!(stats.iter().all(|s| s.sd == 0.0));
        assert_eq!(stats[2].mean, 1.0 / 3.0);
    }

    #[test]
    fn uses_population_standard_deviation() {
        let rows = vec![vec![0.0, 1.0], vec![0.0, 3.0]];
        let stats = replicate_statistics(&rows, 0.0).unwrap();
        assert_eq!(stats[1].mean, 2.0);
        assert!((stats[1].sd - 1.0).abs() < 1e-15);
    }

    #[test]
    fn statistics_reject_ragged_rows() {
        assert!(replicate_statistics(&[], 0.0).is_err());
        assert!(replicate_statistics(&[vec![0.0, 1.0], vec![0.0]], 0.0).is_err());
    }

    #[test]
    fn aggregate_skips_gaps_and_checks_the_reference() {
        let ids = vec!["ref".to_string(), "a".to_string()];
        let agg = aggregate(
            ids.clone(),
            0.0,
            vec![Some(vec![0.0, 0.1]), None, Some(vec![0.0, 0.3])],
        )
        .unwrap();
        assert_eq!(agg.n_fitted(), 2);
        assert_eq!(agg.gap_labels(), vec![2]);
        assert!((agg.stats[1].mean - 0.2).abs() < 1e-15);

        let err = aggregate(ids, 0.0, vec![Some(vec![0.5, 0.1])]).unwrap_err();
        assert!(matches!(err, FitError::DataShape(_)));
    }

    fn table_with_broken_second_replicate() -> CountTable {
        // Replicate 2 has no reads at the second time point.
        let rows: [[[u64; 2]; 3]; 2] = [
            [[900, 900], [880, 0], [850, 870]],
            [[100, 100], [130, 0], [160, 150]],
        ];
        let counts = rows.iter().flatten().flatten().copied().collect();
        CountTable::new(vec!["ref".into(), "a".into()], vec![0.0, 5.0, 10.0], 2, counts).unwrap()
    }

    #[test]
    fn abort_policy_returns_the_failing_replicate() {
        let err = fit_replicates(&table_with_broken_second_replicate(), &spec(FailurePolicy::Abort)).unwrap_err();
        match &err {
            FitError::Replicate { replicate, source, .. } => {
                assert_eq!(*replicate, 2);
                assert!(matches!(**source, FitError::Normalization(_)));
            }
            other => panic!("unexpected error {other:?}"),
        }
        assert_eq!(err.exit_code(), 3);
    }

    #[test]
    fn skip_policy_records_gaps() {
        let batch = fit_replicates(&table_with_broken_second_replicate(), &spec(FailurePolicy::Skip)).unwrap();
        assert_eq!(batch.fits.len(), 1);
        assert_eq!(batch.fits[0].replicate, 1);
        assert_eq!(batch.gaps.len(), 1);
        assert_eq!(batch.gaps[0].replicate, 2);
        assert_eq!(batch.aggregate.replicates[1], None);
        assert_eq!(batch.aggregate.stats[0], LineageStats { mean: 0.0, sd: 0.0 });
        assert_eq!(batch.aggregate.stats[1].sd, 0.0);
    }

    #[test]
    fn skip_policy_still_fails_when_nothing_fits() {
        let counts = vec![5, 0, 5, 0];
        let table = CountTable::new(vec!["ref".into(), "a".into()], vec![0.0, 1.0], 1, counts).unwrap();
        assert!(fit_replicates(&table, &spec(FailurePolicy::Skip)).is_err());
    }
}
