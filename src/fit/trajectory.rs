//! Frequency trajectories under constant relative fitness.
//!
//! ```text
//! p[i](t) = f0[i] * exp(s[i] * t) / Σ_j f0[j] * exp(s[j] * t)
//! ```
//!
//! Everything is evaluated in log space so long horizons or large fitness
//! differences do not overflow. Also here:
//!
//! - Poisson read sampling for synthetic data
//! - reconstruction of a fitted replicate on an arbitrary time grid

use rand::Rng;
use rand_distr::{Distribution, Poisson};
use serde::Serialize;

use crate::error::{FitError, Result};
use crate::fit::estimator::MapEstimate;
use crate::fit::model::FitnessModel;
use crate::math::{is_simplex, log_sum_exp, SIMPLEX_TOL};

fn check_inputs(f0: &[f64], fitness: &[f64], times: &[f64]) -> Result<()> {
    if f0.is_empty() {
        return Err(FitError::DataShape("trajectory needs at least one lineage".into()));
    }
    if f0.len() != fitness.len() {
        return Err(FitError::DataShape(format!(
            "{} initial frequencies but {} fitness values",
            f0.len(),
            fitness.len()
        )));
    }
    if let Some(s) = fitness.iter().find(|s| !s.is_finite()) {
        return Err(FitError::DataShape(format!("fitness value {s} is not finite")));
    }
    if let Some(t) = times.iter().find(|t| !t.is_finite()) {
        return Err(FitError::DataShape(format!("time {t} is not finite")));
    }
    Ok(())
}

/// Normalized frequencies `[lineage][time]`; every column sums to one.
///
/// `f0` must itself be a simplex.
pub fn simulate(f0: &[f64], fitness: &[f64], times: &[f64]) -> Result<Vec<Vec<f64>>> {
    check_inputs(f0, fitness, times)?;
    if !is_simplex(f0, SIMPLEX_TOL) {
        return Err(FitError::Normalization(format!(
            "initial frequencies must be non-negative and sum to 1 (sum = {})",
            f0.iter().sum::<f64>()
        )));
    }

    let n = f0.len();
    let log_f0: Vec<f64> = f0.iter().map(|f| f.ln()).collect();
    let mut out = vec![vec![0.0; times.len()]; n];
    let mut eta = vec![0.0; n];
    for (t, &time) in times.iter().enumerate() {
        for i in 0..n {
            eta[i] = log_f0[i] + fitness[i] * time;
        }
        let lse = log_sum_exp(&eta);
        for (row, e) in out.iter_mut().zip(&eta) {
            row[t] = (e - lse).exp();
        }
    }
    Ok(out)
}

/// Draw one Poisson read count per lineage with mean `freq * depth`.
///
/// Zero-frequency lineages always get zero reads.
pub fn sample_poisson<R: Rng + ?Sized>(freqs: &[f64], depth: f64, rng: &mut R) -> Result<Vec<u64>> {
    if !depth.is_finite() || depth < 0.0 {
        return Err(FitError::Config(format!("sequencing depth {depth} must be finite and >= 0")));
    }
    freqs
        .iter()
        .map(|&f| {
            if !f.is_finite() || f < 0.0 {
                return Err(FitError::Normalization(format!("frequency {f} is not a valid proportion")));
            }
            let mean = f * depth;
            if mean == 0.0 {
                return Ok(0);
            }
            let dist = Poisson::new(mean)
                .map_err(|e| FitError::Config(format!("Poisson distribution error: {e}")))?;
            Ok(dist.sample(rng) as u64)
        })
        .collect()
}

/// Predicted (and observed) frequencies of one fitted replicate.
#[derive(Debug, Clone, Serialize)]
pub struct Reconstruction {
    pub ids: Vec<String>,
    pub times: Vec<f64>,
    /// `[lineage][time]` on `times`.
    pub predicted: Vec<Vec<f64>>,
    pub observed_times: Vec<f64>,
    /// `[lineage][time]` on `observed_times`.
    pub observed: Vec<Vec<f64>>,
}

impl Reconstruction {
    /// Largest absolute gap between prediction and observation at shared times.
    pub fn max_abs_residual(&self) -> Option<f64> {
        let mut worst: Option<f64> = None;
        for (k, t_obs) in self.observed_times.iter().enumerate() {
            let Some(j) = self.times.iter().position(|t| t == t_obs) else {
                continue;
            };
            for (pred, obs) in self.predicted.iter().zip(&self.observed) {
                let gap = (pred[j] - obs[k]).abs();
                worst = Some(worst.map_or(gap, |w| w.max(gap)));
            }
        }
        worst
    }
}

/// Rebuild replicate `replicate` (0-based) from its MAP estimate.
///
/// `times` defaults to the model's sample times.
pub fn reconstruct(
    model: &FitnessModel,
    estimate: &MapEstimate,
    replicate: usize,
    times: Option<&[f64]>,
) -> Result<Reconstruction> {
    let Some(f0) = estimate.initial_frequencies.get(replicate) else {
        return Err(FitError::DataShape(format!(
            "estimate has no initial frequencies for replicate {}",
            replicate + 1
        )));
    };
    if estimate.fitness.len() + 1 != model.n_lineages() {
        return Err(FitError::DataShape(format!(
            "estimate has {} fitness values for {} lineages",
            estimate.fitness.len(),
            model.n_lineages()
        )));
    }

    let times = times.unwrap_or(model.times()).to_vec();
    let predicted = simulate(f0, &estimate.full_fitness(), &times)?;
    for t in 0..times.len() {
        let sum: f64 = predicted.iter().map(|row| row[t]).sum();
        if (sum - 1.0).abs() > SIMPLEX_TOL {
            return Err(FitError::Normalization(format!(
                "reconstructed frequencies at time {} sum to {sum}",
                times[t]
            )));
        }
    }

    Ok(Reconstruction {
        ids: model.table().ids().map(str::to_string).collect(),
        times,
        predicted,
        observed_times: model.times().to_vec(),
        observed: model.table().observed_frequencies(replicate)?,
    })
}

#[cfg(test)]
mod tests {
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    use super::*;

    #[test]
    fn columns_sum_to_one_even_for_long_horizons() {
        let traj = simulate(&[0.5, 0.3, 0.2], &[0.0, 2.0, -1.0], &[0.0, 10.0, 500.0]).unwrap();
        for t in 0..3 {
            let sum: f64 = traj.iter().map(|row| row[t]).sum();
            assert!((sum - 1.0).abs() < 1e-12);
        }
        assert!(traj[1][2] > 0.999_999);
        assert!((traj[0][0] - 0.5).abs() < 1e-15);
    }

    #[test]
    fn extinct_lineages_stay_extinct() {
        let traj = simulate(&[1.0, 0.0], &[0.0, 5.0], &[0.0, 3.0]).unwrap();
        assert_eq!(traj[1], vec![0.0, 0.0]);
        assert!(traj[0].iter().all(|p| (p - 1.0).abs() < 1e-15));
    }

    #[test]
    fn simulate_validates_inputs() {
        assert!(matches!(
            simulate(&[0.5, 0.5], &[0.0], &[0.0]),
            Err(FitError::DataShape(_))
        ));
        assert!(matches!(
            simulate(&[0.5, 0.6], &[0.0, 0.0], &[0.0]),
            Err(FitError::Normalization(_))
        ));
    }

    #[test]
    fn poisson_sampling_tracks_the_mean() {
        let mut rng = StdRng::seed_from_u64(7);
        let freqs = [0.7, 0.3, 0.0];
        let draws = 400;
        let mut sums = [0.0; 3];
        for _ in 0..draws {
            let counts = sample_poisson(&freqs, 1000.0, &mut rng).unwrap();
            assert_eq!(counts[2], 0);
            for (s, c) in sums.iter_mut().zip(&counts) {
                *s += *c as f64;
            }
        }
        // Standard error of the mean for lambda = 700 over 400 draws is ~1.3.
        assert!((sums[0] / draws as f64 - 700.0).abs() < 8.0);
        assert!((sums[1] / draws as f64 - 300.0).abs() < 6.0);
    }

    #[test]
    fn poisson_sampling_rejects_bad_depth() {
        let mut rng = StdRng::seed_from_u64(1);
        assert!(sample_poisson(&[1.0], f64::NAN, &mut rng).is_err());
        assert!(sample_poisson(&[1.0], -5.0, &mut rng).is_err());
    }

    #[test]
    fn sampled_frequencies_converge_with_depth() {
        let f0 = [0.6, 0.3, 0.1];
        let s = [0.0, 0.04, -0.03];
        let times = [0.0, 10.0, 20.0];
        let truth = simulate(&f0, &s, &times).unwrap();

        let mean_error = |depth: f64| {
            let mut total = 0.0;
            for seed in 0..5 {
                let mut rng = StdRng::seed_from_u64(seed);
                for t in 0..times.len() {
                    let column: Vec<f64> = truth.iter().map(|row| row[t]).collect();
                    let counts = sample_poisson(&column, depth, &mut rng).unwrap();
                    let n: u64 = counts.iter().sum();
                    for (c, p) in counts.iter().zip(&column) {
                        total += (*c as f64 / n as f64 - p).abs();
                    }
                }
            }
            total / (5 * times.len() * f0.len()) as f64
        };

        let coarse = mean_error(1e3);
        let fine = mean_error(1e6);
        assert!(fine < coarse);
        assert!(fine < 2e-3, "fine-depth error {fine}");
    }
}
