//! Limited-memory BFGS minimizer.
//!
//! We minimize smooth objectives of modest dimension (a few dozen parameters)
//! where an analytic gradient is available:
//!
//! ```text
//! minimize f(x),  x ∈ ℝ^d
//! ```
//!
//! Implementation choices:
//! - two-loop recursion over the last `history` curvature pairs
//! - backtracking line search with the Armijo sufficient-decrease condition
//! - stopping rules follow L-BFGS-B conventions: gradient infinity norm
//!   (`grad_tol`) or relative objective change (`f_tol`)
//! - the iteration budget is hard; exhausting it is reported, never looped past

use std::collections::VecDeque;

use log::trace;
use nalgebra::DVector;
use serde::{Deserialize, Serialize};

/// Armijo sufficient-decrease constant.
const ARMIJO_C1: f64 = 1e-4;

/// Maximum step halvings per line search.
const MAX_BACKTRACKS: usize = 60;

#[derive(Debug, Clone)]
pub struct LbfgsOptions {
    pub max_iters: usize,
    pub grad_tol: f64,
    pub f_tol: f64,
    pub history: usize,
}

impl Default for LbfgsOptions {
    fn default() -> Self {
        Self {
            max_iters: 15_000,
            grad_tol: 1e-5,
            f_tol: 2.220446049250313e-9,
            history: 10,
        }
    }
}

/// Why the minimizer stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Termination {
    GradientTolerance,
    ObjectiveTolerance,
    /// No step along the search direction decreased the objective.
    LineSearchStalled,
    MaxIterations,
    /// The starting point produced a non-finite value or gradient.
    NonFiniteStart,
}

impl Termination {
    pub fn is_converged(self) -> bool {
        matches!(self, Termination::GradientTolerance | Termination::ObjectiveTolerance)
    }
}

#[derive(Debug, Clone)]
pub struct LbfgsReport {
    /// Best (last accepted) iterate.
    pub x: DVector<f64>,
    pub value: f64,
    /// Infinity norm of the gradient at `x`.
    pub grad_norm: f64,
    pub iterations: usize,
    pub termination: Termination,
}

struct CurvaturePair {
    s: DVector<f64>,
    y: DVector<f64>,
    rho: f64,
}

/// Minimize `objective`, which returns `(f(x), ∇f(x))`.
pub fn minimize<F>(objective: F, x0: DVector<f64>, opts: &LbfgsOptions) -> LbfgsReport
where
    F: Fn(&DVector<f64>) -> (f64, DVector<f64>),
{
    let mut x = x0;
    let (mut f, mut g) = objective(&x);
    if !f.is_finite() || g.iter().any(|v| !v.is_finite()) {
        return LbfgsReport {
            grad_norm: g.amax(),
            x,
            value: f,
            iterations: 0,
            termination: Termination::NonFiniteStart,
        };
    }

    let mut history: VecDeque<CurvaturePair> = VecDeque::with_capacity(opts.history);

    for iter in 0..opts.max_iters {
        let grad_norm = g.amax();
        if grad_norm <= opts.grad_tol {
            return LbfgsReport {
                x,
                value: f,
                grad_norm,
                iterations: iter,
                termination: Termination::GradientTolerance,
            };
        }

        let mut direction = two_loop_direction(&g, &history);
        let mut slope = g.dot(&direction);
        if !(slope < 0.0) {
            // Curvature memory produced an ascent direction; restart from steepest descent.
            history.clear();
            direction = -&g;
            slope = g.dot(&direction);
        }

        let mut accepted = line_search(&objective, &x, f, &direction, slope, history.is_empty());
        if accepted.is_none() && !history.is_empty() {
            history.clear();
            direction = -&g;
            slope = g.dot(&direction);
            accepted = line_search(&objective, &x, f, &direction, slope, true);
        }
        let Some((x_new, f_new, g_new)) = accepted else {
            return LbfgsReport {
                x,
                value: f,
                grad_norm,
                iterations: iter,
                termination: Termination::LineSearchStalled,
            };
        };

        let s = &x_new - &x;
        let y = &g_new - &g;
        let sy = s.dot(&y);
        if sy > 1e-10 * s.norm() * y.norm() {
            if history.len() == opts.history {
                history.pop_front();
            }
            history.push_back(CurvaturePair { s, y, rho: 1.0 / sy });
        }

        let rel_change = (f - f_new) / f.abs().max(f_new.abs()).max(1.0);
        trace!("lbfgs iter={iter} f={f_new:.10e} |g|inf={:.3e}", g_new.amax());

        x = x_new;
        f = f_new;
        g = g_new;

        if rel_change <= opts.f_tol {
            return LbfgsReport {
                grad_norm: g.amax(),
                x,
                value: f,
                iterations: iter + 1,
                termination: Termination::ObjectiveTolerance,
            };
        }
    }

    LbfgsReport {
        grad_norm: g.amax(),
        x,
        value: f,
        iterations: opts.max_iters,
        termination: Termination::MaxIterations,
    }
}

fn two_loop_direction(g: &DVector<f64>, history: &VecDeque<CurvaturePair>) -> DVector<f64> {
    let mut q = g.clone();
    let mut alphas = Vec::with_capacity(history.len());
    for pair in history.iter().rev() {
        let a = pair.rho * pair.s.dot(&q);
        q.axpy(-a, &pair.y, 1.0);
        alphas.push(a);
    }

    // Initial Hessian scaling γ = sᵀy / yᵀy from the newest pair.
    if let Some(last) = history.back() {
        let yy = last.y.dot(&last.y);
        if yy > 0.0 {
            q *= 1.0 / (last.rho * yy);
        }
    }

    for (pair, a) in history.iter().zip(alphas.iter().rev()) {
        let b = pair.rho * pair.y.dot(&q);
        q.axpy(a - b, &pair.s, 1.0);
    }
    -q
}

fn line_search<F>(
    objective: &F,
    x: &DVector<f64>,
    f: f64,
    direction: &DVector<f64>,
    slope: f64,
    cold_start: bool,
) -> Option<(DVector<f64>, f64, DVector<f64>)>
where
    F: Fn(&DVector<f64>) -> (f64, DVector<f64>),
{
    // Without curvature information the direction is the raw gradient, whose
    // scale is arbitrary; start with a unit-length step instead.
    let mut step = if cold_start {
        (1.0 / direction.norm()).min(1.0)
    } else {
        1.0
    };

    for _ in 0..MAX_BACKTRACKS {
        let candidate = x + direction * step;
        let (f_new, g_new) = objective(&candidate);
        if f_new.is_finite()
            && g_new.iter().all(|v| v.is_finite())
            && f_new <= f + ARMIJO_C1 * step * slope
        {
            return Some((candidate, f_new, g_new));
        }
        step *= 0.5;
    }
    None
}
