//! The exponential-competition fitness model.
//!
//! For replicate `r`, lineage `i` and sample time `t`:
//!
//! ```text
//! p[i,t,r] = f0[i,r] * exp(s[i] * t) / Σ_j f0[j,r] * exp(s[j] * t)
//! n[·,t,r] ~ Multinomial(Σ_i n[i,t,r], p[·,t,r])
//! f0[·,r]  ~ Dirichlet(1, ..., 1)
//! ```
//!
//! with `s[0] = s_ref` fixed and one of three priors on the remaining
//! fitness values (see [`FitnessPrior`]).
//!
//! The estimator works on an unconstrained vector laid out as
//!
//! ```text
//! [ s_1 .. s_{N-1} | z_{1,0} .. z_{N-1,0} | ... | z_{1,R-1} .. z_{N-1,R-1} | u_mu u_sigma ]
//! ```
//!
//! where `f0[·,r] = softmax(0, z_{1,r}, ..., z_{N-1,r})` and `u_mu`, `u_sigma`
//! (present only for the hierarchical prior) are logit-interval coordinates of
//! the hyperparameters. The objective includes the log-Jacobian of both
//! transforms.

use nalgebra::DVector;
use serde::{Deserialize, Serialize};
use statrs::function::gamma::ln_gamma;

use crate::domain::{CountTable, PriorKind};
use crate::error::{FitError, Result};
use crate::fit::trajectory::simulate;
use crate::math::{
    interval_from_unconstrained, interval_log_jacobian, is_simplex, log_sum_exp, sigmoid,
    softmax, softmax_into, SIMPLEX_TOL,
};

/// Uniform hyperprior bounds on the hierarchical mean.
pub const MU_BOUNDS: (f64, f64) = (-0.5, 0.2);
/// Uniform hyperprior bounds on the hierarchical standard deviation.
pub const SIGMA_BOUNDS: (f64, f64) = (0.01, 1.0);

/// Smoothing pseudo-count used to seed initial-frequency logits.
const SEED_PSEUDOCOUNT: f64 = 0.5;

const LN_SQRT_2PI: f64 = 0.918_938_533_204_672_8;

/// Mean and standard deviation of a per-lineage normal prior.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NormalPrior {
    pub mean: f64,
    pub sd: f64,
}

/// Prior on the non-reference fitness values.
#[derive(Debug, Clone, PartialEq)]
pub enum FitnessPrior {
    /// `s ~ Normal(mu, sigma)`, `mu ~ U(MU_BOUNDS)`, `sigma ~ U(SIGMA_BOUNDS)`.
    GaussianHierarchical,
    /// Improper flat prior; only meaningful for MAP estimation.
    Flat,
    /// `s_i ~ Normal(mean_i, sd_i)`, one entry per non-reference lineage.
    FixedValues(Vec<NormalPrior>),
}

impl FitnessPrior {
    /// Pair a selector with its (optional) external values.
    ///
    /// Values are required for `fixed-values` and rejected for the other two.
    pub fn from_kind(kind: PriorKind, values: Option<Vec<NormalPrior>>) -> Result<Self> {
        match (kind, values) {
            (PriorKind::GaussianHierarchical, None) => Ok(FitnessPrior::GaussianHierarchical),
            (PriorKind::Flat, None) => Ok(FitnessPrior::Flat),
            (PriorKind::FixedValues, Some(values)) => FitnessPrior::fixed_values(values),
            (PriorKind::FixedValues, None) => Err(FitError::InvalidPrior(
                "fixed-values prior requires a table of (mean, sd) rows".into(),
            )),
            (kind, Some(_)) => Err(FitError::InvalidPrior(format!(
                "{} prior does not take per-lineage values",
                kind.name()
            ))),
        }
    }

    pub fn fixed_values(values: Vec<NormalPrior>) -> Result<Self> {
        if values.is_empty() {
            return Err(FitError::InvalidPrior("fixed-values prior table is empty".into()));
        }
        for (i, v) in values.iter().enumerate() {
            if !v.mean.is_finite() || !v.sd.is_finite() || v.sd <= 0.0 {
                return Err(FitError::InvalidPrior(format!(
                    "row {}: mean must be finite and sd finite and > 0 (got mean={}, sd={})",
                    i + 1,
                    v.mean,
                    v.sd
                )));
            }
        }
        Ok(FitnessPrior::FixedValues(values))
    }

    pub fn kind(&self) -> PriorKind {
        match self {
            FitnessPrior::GaussianHierarchical => PriorKind::GaussianHierarchical,
            FitnessPrior::Flat => PriorKind::Flat,
            FitnessPrior::FixedValues(_) => PriorKind::FixedValues,
        }
    }

    fn hyper_len(&self) -> usize {
        match self {
            FitnessPrior::GaussianHierarchical => 2,
            FitnessPrior::Flat | FitnessPrior::FixedValues(_) => 0,
        }
    }
}

/// Hierarchical prior hyperparameters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Hyperparameters {
    pub mu: f64,
    pub sigma: f64,
}

/// Model parameters in their natural (constrained) space.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelParameters {
    /// Non-reference fitness values, in table order.
    pub fitness: Vec<f64>,
    /// One simplex over all lineages per replicate.
    pub initial_frequencies: Vec<Vec<f64>>,
    /// Present only for the hierarchical prior.
    pub hyper: Option<Hyperparameters>,
}

/// A fitness model bound to one count table.
#[derive(Debug, Clone)]
pub struct FitnessModel {
    table: CountTable,
    s_ref: f64,
    prior: FitnessPrior,
    /// `Σ_{t,r} [ln Γ(n_tot + 1) - Σ_i ln Γ(n_i + 1)]`, constant in the parameters.
    log_multinomial_coef: f64,
}

impl FitnessModel {
    /// Build the model, validating shapes and read totals once.
    pub fn new(table: CountTable, s_ref: f64, prior: FitnessPrior) -> Result<Self> {
        let n = table.n_lineages();
        if n < 2 {
            return Err(FitError::DataShape(format!(
                "need a reference and at least one other lineage, got {n} lineage(s)"
            )));
        }
        if !s_ref.is_finite() {
            return Err(FitError::Config(format!("reference fitness {s_ref} is not finite")));
        }
        if let FitnessPrior::FixedValues(values) = &prior {
            if values.len() != n - 1 {
                return Err(FitError::InvalidPrior(format!(
                    "fixed-values prior has {} rows but the table has {} non-reference lineages",
                    values.len(),
                    n - 1
                )));
            }
        }

        let mut log_multinomial_coef = 0.0;
        for r in 0..table.n_replicates() {
            for t in 0..table.n_times() {
                let total = table.total(t, r);
                if total == 0 {
                    return Err(FitError::Normalization(format!(
                        "zero total reads at time {} (replicate {}); counts cannot be normalized",
                        table.times()[t],
                        r + 1
                    )));
                }
                log_multinomial_coef += ln_gamma(total as f64 + 1.0);
                for i in 0..n {
                    log_multinomial_coef -= ln_gamma(table.count(i, t, r) as f64 + 1.0);
                }
            }
        }

        Ok(Self {
            table,
            s_ref,
            prior,
            log_multinomial_coef,
        })
    }

    /// Build from nested `counts[lineage][time][replicate]` with explicit dimensions.
    ///
    /// Lineages are labelled by their index; NaN entries are treated as 0.
    pub fn from_counts(
        counts: &[Vec<Vec<f64>>],
        times: &[f64],
        n_replicates: usize,
        s_ref: f64,
        prior: FitnessPrior,
    ) -> Result<Self> {
        let ids = (0..counts.len()).map(|i| i.to_string()).collect();
        let table = CountTable::from_nested(ids, times.to_vec(), n_replicates, counts)?;
        Self::new(table, s_ref, prior)
    }

    pub fn table(&self) -> &CountTable {
        &self.table
    }

    pub fn s_ref(&self) -> f64 {
        self.s_ref
    }

    pub fn prior(&self) -> &FitnessPrior {
        &self.prior
    }

    pub fn n_lineages(&self) -> usize {
        self.table.n_lineages()
    }

    pub fn n_replicates(&self) -> usize {
        self.table.n_replicates()
    }

    pub fn times(&self) -> &[f64] {
        self.table.times()
    }

    /// Length of the unconstrained parameter vector.
    pub fn dim(&self) -> usize {
        let m = self.n_lineages() - 1;
        m * (1 + self.n_replicates()) + self.prior.hyper_len()
    }

    fn logits_offset(&self, replicate: usize) -> usize {
        let m = self.n_lineages() - 1;
        m + replicate * m
    }

    fn hyper_offset(&self) -> usize {
        let m = self.n_lineages() - 1;
        m * (1 + self.n_replicates())
    }

    /// `[s_ref] ++ fitness`.
    pub fn full_fitness(&self, fitness: &[f64]) -> Vec<f64> {
        std::iter::once(self.s_ref).chain(fitness.iter().copied()).collect()
    }

    /// Map an unconstrained vector to natural parameters.
    ///
    /// # Panics
    /// Panics if `x.len() != self.dim()`.
    pub fn unpack(&self, x: &DVector<f64>) -> ModelParameters {
        let xs = x.as_slice();
        let m = self.n_lineages() - 1;
        let fitness = xs[..m].to_vec();

        let mut logits = vec![0.0; m + 1];
        let initial_frequencies = (0..self.n_replicates())
            .map(|r| {
                let off = self.logits_offset(r);
                logits[1..].copy_from_slice(&xs[off..off + m]);
                softmax(&logits)
            })
            .collect();

        let hyper = match self.prior {
            FitnessPrior::GaussianHierarchical => {
                let off = self.hyper_offset();
                Some(Hyperparameters {
                    mu: interval_from_unconstrained(xs[off], MU_BOUNDS.0, MU_BOUNDS.1),
                    sigma: interval_from_unconstrained(xs[off + 1], SIGMA_BOUNDS.0, SIGMA_BOUNDS.1),
                })
            }
            FitnessPrior::Flat | FitnessPrior::FixedValues(_) => None,
        };

        ModelParameters {
            fitness,
            initial_frequencies,
            hyper,
        }
    }

    /// Deterministic starting point for the estimator.
    ///
    /// Fitness starts at 0 (prior means for `fixed-values`), logits at the
    /// smoothed observed frequencies of the first sample, hyperparameters at
    /// the centre of their intervals.
    pub fn initial_point(&self) -> DVector<f64> {
        let n = self.n_lineages();
        let mut x = DVector::zeros(self.dim());

        if let FitnessPrior::FixedValues(values) = &self.prior {
            for (i, v) in values.iter().enumerate() {
                x[i] = v.mean;
            }
        }

        for r in 0..self.n_replicates() {
            let off = self.logits_offset(r);
            let total = self.table.total(0, r) as f64 + SEED_PSEUDOCOUNT * n as f64;
            let log_freq = |i: usize| ((self.table.count(i, 0, r) as f64 + SEED_PSEUDOCOUNT) / total).ln();
            let log_ref = log_freq(0);
            for i in 1..n {
                x[off + i - 1] = log_freq(i) - log_ref;
            }
        }
        x
    }

    /// Negative log posterior in the unconstrained space, with its gradient.
    ///
    /// This is the estimator's objective. It includes every normalizing
    /// constant, so `-value` is the log posterior density of `x`.
    pub fn neg_log_posterior(&self, x: &DVector<f64>) -> (f64, DVector<f64>) {
        let xs = x.as_slice();
        let n = self.n_lineages();
        let m = n - 1;
        let times = self.table.times();

        let mut grad = DVector::zeros(self.dim());
        // Dirichlet(1, ..., 1) density is Γ(N) on the simplex.
        let mut lp = self.log_multinomial_coef + self.n_replicates() as f64 * ln_gamma(n as f64);

        let s_full = self.full_fitness(&xs[..m]);
        let mut logits = vec![0.0; n];
        let mut f0 = vec![0.0; n];
        let mut eta = vec![0.0; n];

        for r in 0..self.n_replicates() {
            let off = self.logits_offset(r);
            logits[1..].copy_from_slice(&xs[off..off + m]);

            // log|det J| of the softmax map is Σ_i ln f0_i.
            let lse_z = log_sum_exp(&logits);
            softmax_into(&logits, &mut f0);
            lp += logits.iter().map(|z| z - lse_z).sum::<f64>();
            for j in 1..n {
                grad[off + j - 1] += 1.0 - n as f64 * f0[j];
            }

            for (t, &time) in times.iter().enumerate() {
                for i in 0..n {
                    eta[i] = logits[i] + s_full[i] * time;
                }
                let lse = log_sum_exp(&eta);
                let total = self.table.total(t, r) as f64;
                for i in 0..n {
                    let count = self.table.count(i, t, r) as f64;
                    let log_p = eta[i] - lse;
                    if count > 0.0 {
                        lp += count * log_p;
                    }
                    let resid = count - total * log_p.exp();
                    if i > 0 {
                        grad[i - 1] += time * resid;
                        grad[off + i - 1] += resid;
                    }
                }
            }
        }

        match &self.prior {
            FitnessPrior::Flat => {}
            FitnessPrior::FixedValues(values) => {
                for (i, v) in values.iter().enumerate() {
                    let z = (xs[i] - v.mean) / v.sd;
                    lp += -LN_SQRT_2PI - v.sd.ln() - 0.5 * z * z;
                    grad[i] -= z / v.sd;
                }
            }
            FitnessPrior::GaussianHierarchical => {
                let off = self.hyper_offset();
                let (u_mu, u_sigma) = (xs[off], xs[off + 1]);
                let mu = interval_from_unconstrained(u_mu, MU_BOUNDS.0, MU_BOUNDS.1);
                let sigma = interval_from_unconstrained(u_sigma, SIGMA_BOUNDS.0, SIGMA_BOUNDS.1);

                // Uniform hyperprior densities plus the interval-transform Jacobians.
                lp -= (MU_BOUNDS.1 - MU_BOUNDS.0).ln() + (SIGMA_BOUNDS.1 - SIGMA_BOUNDS.0).ln();
                lp += interval_log_jacobian(u_mu, MU_BOUNDS.0, MU_BOUNDS.1);
                lp += interval_log_jacobian(u_sigma, SIGMA_BOUNDS.0, SIGMA_BOUNDS.1);

                let var = sigma * sigma;
                let mut d_mu = 0.0;
                let mut d_sigma = 0.0;
                for i in 0..m {
                    let d = xs[i] - mu;
                    lp += -LN_SQRT_2PI - sigma.ln() - 0.5 * d * d / var;
                    grad[i] -= d / var;
                    d_mu += d / var;
                    d_sigma += -1.0 / sigma + d * d / (var * sigma);
                }

                let q_mu = sigmoid(u_mu);
                let q_sigma = sigmoid(u_sigma);
                grad[off] += d_mu * (MU_BOUNDS.1 - MU_BOUNDS.0) * q_mu * (1.0 - q_mu) + (1.0 - 2.0 * q_mu);
                grad[off + 1] += d_sigma * (SIGMA_BOUNDS.1 - SIGMA_BOUNDS.0) * q_sigma * (1.0 - q_sigma)
                    + (1.0 - 2.0 * q_sigma);
            }
        }

        (-lp, -grad)
    }

    fn check_parameters(&self, params: &ModelParameters) -> Result<()> {
        let n = self.n_lineages();
        if params.fitness.len() != n - 1 {
            return Err(FitError::DataShape(format!(
                "expected {} fitness values, got {}",
                n - 1,
                params.fitness.len()
            )));
        }
        if params.initial_frequencies.len() != self.n_replicates() {
            return Err(FitError::DataShape(format!(
                "expected {} initial-frequency vectors, got {}",
                self.n_replicates(),
                params.initial_frequencies.len()
            )));
        }
        for (r, f0) in params.initial_frequencies.iter().enumerate() {
            if f0.len() != n {
                return Err(FitError::DataShape(format!(
                    "replicate {} initial frequencies have {} entries, expected {n}",
                    r + 1,
                    f0.len()
                )));
            }
        }
        Ok(())
    }

    /// Predicted relative frequencies, indexed `[replicate][lineage][time]`.
    pub fn predicted_frequencies(&self, params: &ModelParameters) -> Result<Vec<Vec<Vec<f64>>>> {
        self.check_parameters(params)?;
        let s_full = self.full_fitness(&params.fitness);
        params
            .initial_frequencies
            .iter()
            .map(|f0| simulate(f0, &s_full, self.times()))
            .collect()
    }

    /// Multinomial log-likelihood of the observed counts.
    pub fn log_likelihood(&self, params: &ModelParameters) -> Result<f64> {
        let predicted = self.predicted_frequencies(params)?;
        let mut ll = self.log_multinomial_coef;
        for (r, traj) in predicted.iter().enumerate() {
            for t in 0..self.table.n_times() {
                for (i, row) in traj.iter().enumerate() {
                    let count = self.table.count(i, t, r) as f64;
                    if count > 0.0 {
                        ll += count * row[t].ln();
                    }
                }
            }
        }
        Ok(ll)
    }

    /// Log prior density in the natural parameter space (no Jacobian terms).
    ///
    /// Returns `-inf` outside the support. The flat prior contributes 0.
    pub fn log_prior(&self, params: &ModelParameters) -> Result<f64> {
        self.check_parameters(params)?;
        let n = self.n_lineages();
        let mut lp = 0.0;
        for f0 in &params.initial_frequencies {
            if !is_simplex(f0, SIMPLEX_TOL) {
                return Ok(f64::NEG_INFINITY);
            }
            lp += ln_gamma(n as f64);
        }

        match &self.prior {
            FitnessPrior::Flat => {}
            FitnessPrior::FixedValues(values) => {
                for (s, v) in params.fitness.iter().zip(values) {
                    let z = (s - v.mean) / v.sd;
                    lp += -LN_SQRT_2PI - v.sd.ln() - 0.5 * z * z;
                }
            }
            FitnessPrior::GaussianHierarchical => {
                let Some(h) = params.hyper else {
                    return Err(FitError::DataShape(
                        "hierarchical prior needs mu and sigma hyperparameters".into(),
                    ));
                };
                let inside = |x: f64, (lo, hi): (f64, f64)| x > lo && x < hi;
                if !inside(h.mu, MU_BOUNDS) || !inside(h.sigma, SIGMA_BOUNDS) {
                    return Ok(f64::NEG_INFINITY);
                }
                lp -= (MU_BOUNDS.1 - MU_BOUNDS.0).ln() + (SIGMA_BOUNDS.1 - SIGMA_BOUNDS.0).ln();
                for s in &params.fitness {
                    let z = (s - h.mu) / h.sigma;
                    lp += -LN_SQRT_2PI - h.sigma.ln() - 0.5 * z * z;
                }
            }
        }
        Ok(lp)
    }

    /// Log posterior density (up to the evidence) in the natural space.
    pub fn log_posterior(&self, params: &ModelParameters) -> Result<f64> {
        Ok(self.log_likelihood(params)? + self.log_prior(params)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn example_table(n_replicates: usize) -> CountTable {
        // 3 lineages x 4 times, replicates offset slightly so they differ.
        let base = [
            [900u64, 850, 790, 700],
            [50, 80, 120, 190],
            [50, 45, 40, 35],
        ];
        let mut counts = Vec::new();
        for row in &base {
            for &c in row {
                for r in 0..n_replicates {
                    counts.push(c + r as u64 * 3);
                }
            }
        }
        CountTable::new(
            vec!["ref".into(), "a".into(), "b".into()],
            vec![0.0, 7.0, 14.0, 21.0],
            n_replicates,
            counts,
        )
        .unwrap()
    }

    fn point(model: &FitnessModel) -> DVector<f64> {
        // Arbitrary interior point with non-trivial entries everywhere.
        DVector::from_iterator(
            model.dim(),
            (0..model.dim()).map(|k| 0.03 * ((k as f64 * 1.7).sin()) - 0.2 * (k % 2) as f64),
        )
    }

    fn all_priors() -> Vec<FitnessPrior> {
        vec![
            FitnessPrior::Flat,
            FitnessPrior::GaussianHierarchical,
            FitnessPrior::FixedValues(vec![
                NormalPrior { mean: 0.05, sd: 0.1 },
                NormalPrior { mean: -0.01, sd: 0.02 },
            ]),
        ]
    }

    #[test]
    fn from_kind_requires_matching_values() {
        assert_eq!(
            FitnessPrior::from_kind(PriorKind::Flat, None).unwrap(),
            FitnessPrior::Flat
        );
        assert_eq!(
            FitnessPrior::from_kind(PriorKind::GaussianHierarchical, None).unwrap(),
            FitnessPrior::GaussianHierarchical
        );
        let values = vec![NormalPrior { mean: 0.0, sd: 0.1 }];
        assert_eq!(
            FitnessPrior::from_kind(PriorKind::FixedValues, Some(values.clone())).unwrap().kind(),
            PriorKind::FixedValues
        );
        assert!(matches!(
            FitnessPrior::from_kind(PriorKind::FixedValues, None),
            Err(FitError::InvalidPrior(_))
        ));
        assert!(matches!(
            FitnessPrior::from_kind(PriorKind::Flat, Some(values)),
            Err(FitError::InvalidPrior(_))
        ));
        assert!(matches!(
            FitnessPrior::fixed_values(vec![NormalPrior { mean: 0.0, sd: 0.0 }]),
            Err(FitError::InvalidPrior(_))
        ));
    }

    #[test]
    fn fixed_values_must_match_lineage_count() {
        let prior = FitnessPrior::FixedValues(vec![NormalPrior { mean: 0.0, sd: 0.1 }]);
        let err = FitnessModel::new(example_table(1), 0.0, prior).unwrap_err();
        assert!(matches!(err, FitError::InvalidPrior(_)));
    }

    #[test]
    fn construction_rejects_bad_shapes() {
        let single = CountTable::new(vec!["ref".into()], vec![0.0], 1, vec![5]).unwrap();
        assert!(matches!(
            FitnessModel::new(single, 0.0, FitnessPrior::Flat),
            Err(FitError::DataShape(_))
        ));

        // Ragged nested input: second lineage is missing a time point.
        let ragged = vec![vec![vec![1.0], vec![2.0]], vec![vec![3.0]]];
        assert!(matches!(
            FitnessModel::from_counts(&ragged, &[0.0, 1.0], 1, 0.0, FitnessPrior::Flat),
            Err(FitError::DataShape(_))
        ));

        // Replicate count disagrees with the innermost axis.
        let nested = vec![vec![vec![1.0, 2.0]], vec![vec![3.0, 4.0]]];
        assert!(matches!(
            FitnessModel::from_counts(&nested, &[0.0], 1, 0.0, FitnessPrior::Flat),
            Err(FitError::DataShape(_))
        ));
    }

    #[test]
    fn construction_rejects_zero_totals() {
        let table = CountTable::new(
            vec!["ref".into(), "a".into()],
            vec![0.0, 1.0],
            1,
            vec![5, 0, 5, 0],
        )
        .unwrap();
        assert!(matches!(
            FitnessModel::new(table, 0.0, FitnessPrior::Flat),
            Err(FitError::Normalization(_))
        ));
    }

    #[test]
    fn nan_counts_become_zero_before_construction() {
        let nested = vec![
            vec![vec![100.0], vec![90.0]],
            vec![vec![f64::NAN], vec![10.0]],
        ];
        let model = FitnessModel::from_counts(&nested, &[0.0, 1.0], 1, 0.0, FitnessPrior::Flat).unwrap();
        assert_eq!(model.table().count(1, 0, 0), 0);
        let (value, grad) = model.neg_log_posterior(&model.initial_point());
        assert!(value.is_finite());
        assert!(grad.iter().all(|g| g.is_finite()));
    }

    #[test]
    fn predicted_frequencies_are_normalized() {
        for prior in all_priors() {
            let model = FitnessModel::new(example_table(2), 0.0, prior).unwrap();
            let params = model.unpack(&point(&model));
            let predicted = model.predicted_frequencies(&params).unwrap();
            assert_eq!(predicted.len(), 2);
            for traj in &predicted {
                for t in 0..model.times().len() {
                    let sum: f64 = traj.iter().map(|row| row[t]).sum();
                    assert!((sum - 1.0).abs() < 1e-9, "sum = {sum}");
                }
            }
        }
    }

    #[test]
    fn unpack_keeps_reference_and_simplices() {
        let model = FitnessModel::new(example_table(2), 0.25, FitnessPrior::GaussianHierarchical).unwrap();
        let params = model.unpack(&point(&model));
        assert_eq!(params.fitness.len(), 2);
        assert_eq!(model.full_fitness(&params.fitness)[0], 0.25);
        for f0 in &params.initial_frequencies {
            assert!(is_simplex(f0, SIMPLEX_TOL));
        }
        let h = params.hyper.unwrap();
        assert!(h.mu > MU_BOUNDS.0 && h.mu < MU_BOUNDS.1);
        assert!(h.sigma > SIGMA_BOUNDS.0 && h.sigma < SIGMA_BOUNDS.1);
    }

    #[test]
    fn gradient_matches_finite_differences() {
        for prior in all_priors() {
            let kind = prior.kind();
            let model = FitnessModel::new(example_table(2), 0.0, prior).unwrap();
            let x = point(&model);
            let (_, grad) = model.neg_log_posterior(&x);
            for k in 0..model.dim() {
                let h = 1e-6;
                let mut xp = x.clone();
                let mut xm = x.clone();
                xp[k] += h;
                xm[k] -= h;
                let fd = (model.neg_log_posterior(&xp).0 - model.neg_log_posterior(&xm).0) / (2.0 * h);
                let tol = 1e-4 * (1.0 + fd.abs());
                assert!(
                    (grad[k] - fd).abs() < tol,
                    "{kind:?} component {k}: analytic {} vs numeric {fd}",
                    grad[k]
                );
            }
        }
    }

    #[test]
    fn objective_matches_natural_space_posterior_for_flat_prior() {
        // Flat prior: the only Jacobian term is Σ_r Σ_i ln f0_i.
        let model = FitnessModel::new(example_table(1), 0.0, FitnessPrior::Flat).unwrap();
        let x = point(&model);
        let params = model.unpack(&x);
        let jacobian: f64 = params.initial_frequencies[0].iter().map(|f| f.ln()).sum();
        let natural = model.log_posterior(&params).unwrap();
        let (objective, _) = model.neg_log_posterior(&x);
        assert!((-objective - (natural + jacobian)).abs() < 1e-8);
    }

    #[test]
    fn every_prior_variant_changes_the_objective() {
        let x_flat = {
            let model = FitnessModel::new(example_table(1), 0.0, FitnessPrior::Flat).unwrap();
            point(&model)
        };
        let flat = FitnessModel::new(example_table(1), 0.0, FitnessPrior::Flat).unwrap();
        let fixed = FitnessModel::new(
            example_table(1),
            0.0,
            FitnessPrior::FixedValues(vec![
                NormalPrior { mean: 0.3, sd: 0.01 },
                NormalPrior { mean: 0.3, sd: 0.01 },
            ]),
        )
        .unwrap();
        let gauss = FitnessModel::new(example_table(1), 0.0, FitnessPrior::GaussianHierarchical).unwrap();
        assert_eq!(gauss.dim(), flat.dim() + 2);

        let mut x_gauss = DVector::zeros(gauss.dim());
        x_gauss.rows_mut(0, flat.dim()).copy_from(&x_flat);

        let v_flat = flat.neg_log_posterior(&x_flat).0;
        let v_fixed = fixed.neg_log_posterior(&x_flat).0;
        let v_gauss = gauss.neg_log_posterior(&x_gauss).0;
        assert!((v_flat - v_fixed).abs() > 1.0);
        assert!((v_flat - v_gauss).abs() > 1e-3);
        assert!((v_fixed - v_gauss).abs() > 1e-3);
    }

    #[test]
    fn log_likelihood_prefers_the_generating_parameters() {
        // Counts proportional to a known trajectory should score better at the truth.
        let s_full = [0.0, 0.05];
        let f0 = [0.8, 0.2];
        let times = [0.0, 10.0, 20.0];
        let traj = simulate(&f0, &s_full, &times).unwrap();
        let counts: Vec<u64> = traj
            .iter()
            .flat_map(|row| row.iter().map(|p| (p * 10_000.0).round() as u64))
            .collect();
        let table = CountTable::new(vec!["ref".into(), "a".into()], times.to_vec(), 1, counts).unwrap();
        let model = FitnessModel::new(table, 0.0, FitnessPrior::Flat).unwrap();

        let truth = ModelParameters {
            fitness: vec![0.05],
            initial_frequencies: vec![f0.to_vec()],
            hyper: None,
        };
        let off = ModelParameters {
            fitness: vec![0.02],
            ..truth.clone()
        };
        assert!(model.log_likelihood(&truth).unwrap() > model.log_likelihood(&off).unwrap());
    }
}
