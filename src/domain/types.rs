//! Shared domain types.
//!
//! These types are intentionally kept lightweight so they can be:
//!
//! - built from canonical CSV tables or synthetic generators
//! - sliced per replicate for independent fits
//! - exported back to CSV after estimation

use std::collections::HashSet;
use std::path::PathBuf;

use clap::ValueEnum;
use serde::{Deserialize, Serialize};

use crate::error::{FitError, Result};
use crate::fit::EstimatorOptions;

/// Label used for the pooled row produced by [`CountTable::condense`].
pub const DEFAULT_OTHER_LABEL: &str = "else";

/// A tagged sub-population tracked across time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lineage {
    pub id: String,
    /// `true` only for the first lineage of a table.
    pub is_reference: bool,
}

/// Which prior family to place on the fitness values.
///
/// This is only the *selector*; the fitted model carries the parameterized
/// prior (`fit::FitnessPrior`), including any externally supplied values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum PriorKind {
    /// `s ~ Normal(mu, sigma)` with uniform hyperpriors shared by all lineages.
    #[value(name = "gaussian-hierarchical", alias = "gauss")]
    GaussianHierarchical,
    /// Improper uniform prior on the reals.
    Flat,
    /// Per-lineage `Normal(mean, sd)` supplied from a previous experiment.
    #[value(name = "fixed-values", alias = "values")]
    FixedValues,
}

impl PriorKind {
    pub fn name(self) -> &'static str {
        match self {
            PriorKind::GaussianHierarchical => "gaussian-hierarchical",
            PriorKind::Flat => "flat",
            PriorKind::FixedValues => "fixed-values",
        }
    }

    /// Resolve a selector name or alias, ignoring case. Unknown names are an
    /// error, never a default.
    pub fn parse(name: &str) -> Result<Self> {
        <PriorKind as ValueEnum>::from_str(name.trim(), true).map_err(|_| {
            FitError::InvalidPrior(format!(
                "unknown prior selector '{}' (expected gaussian-hierarchical, flat, or fixed-values)",
                name.trim()
            ))
        })
    }
}

/// What to do when one replicate of a batch fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum FailurePolicy {
    /// Fail the whole environment; nothing is written.
    #[default]
    Abort,
    /// Record the replicate as a gap and aggregate over the rest.
    Skip,
}

/// Lineage read counts indexed by `(lineage, time, replicate)`.
///
/// Shape is fixed at construction and validated once. The first lineage is
/// the reference lineage.
#[derive(Debug, Clone, PartialEq)]
pub struct CountTable {
    lineages: Vec<Lineage>,
    times: Vec<f64>,
    n_replicates: usize,
    /// Row-major over `(lineage, time, replicate)`.
    counts: Vec<u64>,
}

impl CountTable {
    /// Build a table from a flat `(lineage, time, replicate)` buffer.
    pub fn new(ids: Vec<String>, times: Vec<f64>, n_replicates: usize, counts: Vec<u64>) -> Result<Self> {
        if ids.is_empty() {
            return Err(FitError::DataShape("table has no lineages".into()));
        }
        if n_replicates == 0 {
            return Err(FitError::DataShape("table has no replicates".into()));
        }
        validate_times(&times)?;

        let expected = ids.len() * times.len() * n_replicates;
        if counts.len() != expected {
            return Err(FitError::DataShape(format!(
                "count buffer has {} entries, expected {} lineages x {} times x {} replicates = {expected}",
                counts.len(),
                ids.len(),
                times.len(),
                n_replicates
            )));
        }

        let mut seen = HashSet::with_capacity(ids.len());
        for id in &ids {
            if !seen.insert(id.as_str()) {
                return Err(FitError::DataShape(format!("duplicate lineage id '{id}'")));
            }
        }

        let lineages = ids
            .into_iter()
            .enumerate()
            .map(|(i, id)| Lineage {
                id,
                is_reference: i == 0,
            })
            .collect();

        Ok(Self {
            lineages,
            times,
            n_replicates,
            counts,
        })
    }

    /// Build a table from nested `counts[lineage][time][replicate]` values.
    ///
    /// Missing (NaN) entries become 0. Ragged nesting, negative or
    /// fractional values fail with `DataShape`.
    pub fn from_nested(
        ids: Vec<String>,
        times: Vec<f64>,
        n_replicates: usize,
        counts: &[Vec<Vec<f64>>],
    ) -> Result<Self> {
        if counts.len() != ids.len() {
            return Err(FitError::DataShape(format!(
                "{} lineage ids but {} count rows",
                ids.len(),
                counts.len()
            )));
        }
        let mut flat = Vec::with_capacity(ids.len() * times.len() * n_replicates);
        for (i, row) in counts.iter().enumerate() {
            if row.len() != times.len() {
                return Err(FitError::DataShape(format!(
                    "lineage '{}' has {} time entries, expected {}",
                    ids[i],
                    row.len(),
                    times.len()
                )));
            }
            for (t, cell) in row.iter().enumerate() {
                if cell.len() != n_replicates {
                    return Err(FitError::DataShape(format!(
                        "lineage '{}' time {} has {} replicate entries, expected {n_replicates}",
                        ids[i],
                        times[t],
                        cell.len()
                    )));
                }
                for &value in cell {
                    flat.push(sanitize_count(value).map_err(FitError::DataShape)?);
                }
            }
        }
        Self::new(ids, times, n_replicates, flat)
    }

    /// Stack single-replicate tables into one table, replicate `k` taken from `tables[k]`.
    ///
    /// All tables must share lineage ids (same order) and sample times.
    pub fn stack(tables: &[CountTable]) -> Result<Self> {
        let Some(first) = tables.first() else {
            return Err(FitError::DataShape("no replicate tables to stack".into()));
        };
        for (k, table) in tables.iter().enumerate() {
            if table.n_replicates != 1 {
                return Err(FitError::DataShape(format!(
                    "replicate table {} already has {} replicates",
                    k + 1,
                    table.n_replicates
                )));
            }
            if table.times != first.times {
                return Err(FitError::DataShape(format!(
                    "replicate {} sample times differ from replicate 1",
                    k + 1
                )));
            }
            if table.ids().ne(first.ids()) {
                return Err(FitError::DataShape(format!(
                    "replicate {} lineage ids differ from replicate 1",
                    k + 1
                )));
            }
        }

        let (n, t_len, r_len) = (first.n_lineages(), first.n_times(), tables.len());
        let mut counts = vec![0u64; n * t_len * r_len];
        for i in 0..n {
            for t in 0..t_len {
                for (r, table) in tables.iter().enumerate() {
                    counts[(i * t_len + t) * r_len + r] = table.count(i, t, 0);
                }
            }
        }
        Self::new(first.ids().map(str::to_string).collect(), first.times.clone(), r_len, counts)
    }

    pub fn n_lineages(&self) -> usize {
        self.lineages.len()
    }

    pub fn n_times(&self) -> usize {
        self.times.len()
    }

    pub fn n_replicates(&self) -> usize {
        self.n_replicates
    }

    pub fn lineages(&self) -> &[Lineage] {
        &self.lineages
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> + '_ {
        self.lineages.iter().map(|l| l.id.as_str())
    }

    pub fn reference(&self) -> &Lineage {
        &self.lineages[0]
    }

    pub fn times(&self) -> &[f64] {
        &self.times
    }

    fn index(&self, lineage: usize, time: usize, replicate: usize) -> usize {
        (lineage * self.times.len() + time) * self.n_replicates + replicate
    }

    /// # Panics
    /// Panics if any index is out of range.
    pub fn count(&self, lineage: usize, time: usize, replicate: usize) -> u64 {
        self.counts[self.index(lineage, time, replicate)]
    }

    /// Total reads at `(time, replicate)` across all lineages.
    pub fn total(&self, time: usize, replicate: usize) -> u64 {
        (0..self.n_lineages())
            .map(|i| self.count(i, time, replicate))
            .sum()
    }

    /// Counts across lineages at `(time, replicate)`.
    pub fn column(&self, time: usize, replicate: usize) -> Vec<u64> {
        (0..self.n_lineages())
            .map(|i| self.count(i, time, replicate))
            .collect()
    }

    /// A single-replicate copy of replicate `replicate` (0-based).
    pub fn replicate(&self, replicate: usize) -> Result<CountTable> {
        if replicate >= self.n_replicates {
            return Err(FitError::DataShape(format!(
                "replicate index {replicate} out of range for {} replicates",
                self.n_replicates
            )));
        }
        let counts = (0..self.n_lineages())
            .flat_map(|i| (0..self.n_times()).map(move |t| (i, t)))
            .map(|(i, t)| self.count(i, t, replicate))
            .collect();
        CountTable::new(self.ids().map(str::to_string).collect(), self.times.clone(), 1, counts)
    }

    /// Observed relative frequencies `[lineage][time]` for one replicate.
    pub fn observed_frequencies(&self, replicate: usize) -> Result<Vec<Vec<f64>>> {
        if replicate >= self.n_replicates {
            return Err(FitError::DataShape(format!(
                "replicate index {replicate} out of range for {} replicates",
                self.n_replicates
            )));
        }
        let mut out = vec![vec![0.0; self.n_times()]; self.n_lineages()];
        for t in 0..self.n_times() {
            let column = self.column(t, replicate);
            let total: u64 = column.iter().sum();
            if total == 0 {
                return Err(FitError::Normalization(format!(
                    "zero total reads at time {} (replicate {})",
                    self.times[t],
                    replicate + 1
                )));
            }
            for (row, count) in out.iter_mut().zip(column) {
                row[t] = count as f64 / total as f64;
            }
        }
        Ok(out)
    }

    /// Keep `keep` lineages (in that order) and pool everything else into `other_label`.
    ///
    /// The first kept id becomes the reference lineage. The pooled row is
    /// appended last and only exists when at least one lineage was pooled.
    pub fn condense(&self, keep: &[String], other_label: &str) -> Result<CountTable> {
        if keep.is_empty() {
            return Err(FitError::DataShape("no lineage ids to keep".into()));
        }
        let mut rows = Vec::with_capacity(keep.len());
        let mut used = vec![false; self.n_lineages()];
        for id in keep {
            let pos = self
                .lineages
                .iter()
                .position(|l| &l.id == id)
                .ok_or_else(|| FitError::DataShape(format!("lineage '{id}' not present in table")))?;
            if used[pos] {
                return Err(FitError::DataShape(format!("lineage '{id}' listed twice")));
            }
            used[pos] = true;
            rows.push(pos);
        }

        let pooled: Vec<usize> = (0..self.n_lineages()).filter(|&i| !used[i]).collect();
        let mut ids: Vec<String> = keep.to_vec();
        if !pooled.is_empty() {
            if keep.iter().any(|k| k == other_label) {
                return Err(FitError::DataShape(format!(
                    "pooled label '{other_label}' collides with a kept lineage id"
                )));
            }
            ids.push(other_label.to_string());
        }

        let (t_len, r_len) = (self.n_times(), self.n_replicates);
        let mut counts = Vec::with_capacity(ids.len() * t_len * r_len);
        for &i in &rows {
            for t in 0..t_len {
                for r in 0..r_len {
                    counts.push(self.count(i, t, r));
                }
            }
        }
        if !pooled.is_empty() {
            for t in 0..t_len {
                for r in 0..r_len {
                    counts.push(pooled.iter().map(|&i| self.count(i, t, r)).sum());
                }
            }
        }

        CountTable::new(ids, self.times.clone(), r_len, counts)
    }
}

/// Convert a raw count cell to a read count.
///
/// NaN means "missing" and becomes 0. Integral floats (`12.0`) are accepted.
pub fn sanitize_count(value: f64) -> std::result::Result<u64, String> {
    if value.is_nan() {
        return Ok(0);
    }
    if !value.is_finite() || value < 0.0 {
        return Err(format!("count {value} is not a non-negative finite number"));
    }
    if value.fract() != 0.0 {
        return Err(format!("count {value} is not an integer"));
    }
    if value > u64::MAX as f64 {
        return Err(format!("count {value} is too large"));
    }
    Ok(value as u64)
}

/// Sample times must be finite, non-negative, and strictly increasing.
pub fn validate_times(times: &[f64]) -> Result<()> {
    if times.is_empty() {
        return Err(FitError::DataShape("no sample times".into()));
    }
    if let Some(bad) = times.iter().find(|t| !t.is_finite() || **t < 0.0) {
        return Err(FitError::DataShape(format!(
            "sample time {bad} is not a finite non-negative number"
        )));
    }
    if let Some(w) = times.windows(2).find(|w| w[1] <= w[0]) {
        return Err(FitError::DataShape(format!(
            "sample times must be strictly increasing ({} then {})",
            w[0], w[1]
        )));
    }
    Ok(())
}

/// A full `fit` run's configuration as understood by the pipeline.
///
/// This is derived from CLI flags (plus defaults).
#[derive(Debug, Clone)]
pub struct FitConfig {
    pub input_dir: PathBuf,
    pub output_dir: PathBuf,
    /// Run label; the first component of every file name.
    pub output: String,
    pub population: String,
    pub environment: String,
    pub replicates: usize,

    /// Fixed fitness of the reference lineage.
    pub s_ref: f64,
    pub prior: PriorKind,
    /// Table of `(mean, sd)` rows, required for `PriorKind::FixedValues`.
    pub prior_values: Option<PathBuf>,

    /// Lineage ids to keep when condensing; empty disables condensing.
    pub groups: Vec<String>,
    pub other_label: String,

    /// Write reconstructed trajectories at `day * gens_per_day`.
    pub reconstruct: bool,
    pub max_days: usize,
    pub gens_per_day: f64,

    pub failure_policy: FailurePolicy,
    pub estimator: EstimatorOptions,
}

/// Configuration for synthetic dataset generation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulateConfig {
    /// Lineage ids; defaults to `L0, L1, ...` when empty.
    pub ids: Vec<String>,
    /// Initial frequencies over all lineages (a simplex).
    pub f0: Vec<f64>,
    /// Fitness of every lineage, reference first.
    pub fitness: Vec<f64>,
    pub times: Vec<f64>,
    /// Expected total reads per sample.
    pub depth: f64,
    pub replicates: usize,
    pub seed: u64,
}
