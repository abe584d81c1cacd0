//! Maximum-a-posteriori point estimation.
//!
//! The estimator minimizes [`FitnessModel::neg_log_posterior`] from the
//! model's deterministic starting point and accepts the result only when:
//!
//! - the gradient met `grad_tol`, or the run stopped on the objective
//!   tolerance or a stalled line search with a gradient within
//!   `stall_grad_tol` (scaled by `max(1, |f|)`)
//! - every fitted value is finite
//! - every initial frequency is at least `min_frequency`
//!
//! An objective-tolerance or stalled stop above that gradient bound gets one
//! more pass from the same point with the objective test disabled and the
//! remaining iteration budget.
//!
//! Anything else is a `Convergence` error carrying the last iterate.

use log::{debug, info};
use serde::{Deserialize, Serialize};

use crate::error::{FitError, LastIterate, Result};
use crate::fit::model::{FitnessModel, Hyperparameters};
use crate::math::{minimize, normalize, LbfgsOptions, LbfgsReport, Termination};

/// Optimizer settings for one MAP fit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EstimatorOptions {
    pub max_iters: usize,
    pub grad_tol: f64,
    pub f_tol: f64,
    pub history: usize,
    /// Gradient bound, relative to `max(1, |f|)`, for accepting a run that
    /// stopped on the objective tolerance or a stalled line search.
    pub stall_grad_tol: f64,
    /// Smallest acceptable fitted initial frequency.
    pub min_frequency: f64,
}

impl Default for EstimatorOptions {
    fn default() -> Self {
        let lbfgs = LbfgsOptions::default();
        Self {
            max_iters: lbfgs.max_iters,
            grad_tol: lbfgs.grad_tol,
            f_tol: lbfgs.f_tol,
            history: lbfgs.history,
            stall_grad_tol: 1e-2,
            min_frequency: 1e-12,
        }
    }
}

impl EstimatorOptions {
    fn lbfgs(&self) -> LbfgsOptions {
        LbfgsOptions {
            max_iters: self.max_iters,
            grad_tol: self.grad_tol,
            f_tol: self.f_tol,
            history: self.history.max(1),
        }
    }
}

/// The MAP point for one model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MapEstimate {
    pub s_ref: f64,
    /// Non-reference fitness values, in table order.
    pub fitness: Vec<f64>,
    /// `[replicate][lineage]`, each a simplex.
    pub initial_frequencies: Vec<Vec<f64>>,
    pub hyper: Option<Hyperparameters>,
    /// Log posterior at the MAP point (unconstrained parameterization).
    pub log_posterior: f64,
    pub iterations: usize,
    pub termination: Termination,
}

impl MapEstimate {
    /// `[s_ref] ++ fitness`.
    pub fn full_fitness(&self) -> Vec<f64> {
        std::iter::once(self.s_ref)
            .chain(self.fitness.iter().copied())
            .collect()
    }
}

fn stationary(report: &LbfgsReport, opts: &EstimatorOptions) -> bool {
    report.grad_norm <= opts.stall_grad_tol * report.value.abs().max(1.0)
}

/// Find the MAP point of `model`.
pub fn estimate_map(model: &FitnessModel, opts: &EstimatorOptions) -> Result<MapEstimate> {
    if !(opts.grad_tol > 0.0)
        || !(opts.f_tol >= 0.0)
        || !(opts.stall_grad_tol >= 0.0)
        || !(opts.min_frequency >= 0.0)
    {
        return Err(FitError::Config(format!(
            "estimator tolerances need grad_tol > 0 and f_tol, stall_grad_tol, min_frequency >= 0 \
             (grad_tol={}, f_tol={}, stall_grad_tol={}, min_frequency={})",
            opts.grad_tol, opts.f_tol, opts.stall_grad_tol, opts.min_frequency
        )));
    }

    debug!(
        "estimating MAP: {} lineages, {} times, {} replicate(s), prior={}, dim={}",
        model.n_lineages(),
        model.times().len(),
        model.n_replicates(),
        model.prior().kind().name(),
        model.dim()
    );

    let lbfgs = opts.lbfgs();
    let mut report = minimize(|x| model.neg_log_posterior(x), model.initial_point(), &lbfgs);
    let early_stop = matches!(
        report.termination,
        Termination::ObjectiveTolerance | Termination::LineSearchStalled
    );
    let remaining = opts.max_iters.saturating_sub(report.iterations);
    if early_stop && !stationary(&report, opts) && remaining > 0 {
        debug!(
            "{:?} after {} iterations with |grad|={:.3e}; refining",
            report.termination, report.iterations, report.grad_norm
        );
        let refine = LbfgsOptions {
            max_iters: remaining,
            f_tol: 0.0,
            ..lbfgs
        };
        let refined = minimize(|x| model.neg_log_posterior(x), report.x.clone(), &refine);
        report = LbfgsReport {
            iterations: report.iterations + refined.iterations,
            ..refined
        };
    }

    let params = model.unpack(&report.x);
    let log_posterior = -report.value;
    let last = || {
        Some(LastIterate {
            fitness: params.fitness.clone(),
            iterations: report.iterations,
            log_posterior,
        })
    };

    match report.termination {
        Termination::GradientTolerance => {}
        Termination::ObjectiveTolerance | Termination::LineSearchStalled if stationary(&report, opts) => {
            debug!(
                "{:?} at |grad|={:.3e} after {} iterations; accepting",
                report.termination, report.grad_norm, report.iterations
            );
        }
        Termination::ObjectiveTolerance | Termination::LineSearchStalled => {
            return Err(FitError::convergence(
                format!(
                    "{:?} after {} iterations with |grad|={:.3e}",
                    report.termination, report.iterations, report.grad_norm
                ),
                last(),
            ));
        }
        Termination::MaxIterations => {
            return Err(FitError::convergence(
                format!(
                    "iteration budget of {} exhausted with |grad|={:.3e}",
                    opts.max_iters, report.grad_norm
                ),
                last(),
            ));
        }
        Termination::NonFiniteStart => {
            return Err(FitError::convergence(
                "log posterior is not finite at the starting point",
                None,
            ));
        }
    }

    if !log_posterior.is_finite() || params.fitness.iter().any(|s| !s.is_finite()) {
        return Err(FitError::convergence("estimate contains non-finite values", last()));
    }

    let mut initial_frequencies = Vec::with_capacity(params.initial_frequencies.len());
    for (r, f0) in params.initial_frequencies.iter().enumerate() {
        let f0 = normalize(f0)?;
        if let Some((i, f)) = f0
            .iter()
            .enumerate()
            .find(|(_, f)| **f < opts.min_frequency)
        {
            let id = &model.table().lineages()[i].id;
            return Err(FitError::convergence(
                format!(
                    "degenerate initial frequency {f:.3e} for lineage '{id}' in replicate {}",
                    r + 1
                ),
                last(),
            ));
        }
        initial_frequencies.push(f0);
    }

    info!(
        "MAP found in {} iterations ({:?}), log posterior {:.4}",
        report.iterations, report.termination, log_posterior
    );

    Ok(MapEstimate {
        s_ref: model.s_ref(),
        fitness: params.fitness,
        initial_frequencies,
        hyper: params.hyper,
        log_posterior,
        iterations: report.iterations,
        termination: report.termination,
    })
}
