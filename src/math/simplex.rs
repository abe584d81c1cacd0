//! Numerically stable helpers for probability simplices and bounded parameters.
//!
//! The fitness model works in log space throughout:
//!
//! - `log_sum_exp` / `softmax` keep exponential growth from overflowing
//! - `interval_*` map a bounded scalar to the real line (logit transform)
//!   so the optimizer can run unconstrained

use crate::error::{FitError, Result};

/// Tolerance for "sums to one" checks.
pub const SIMPLEX_TOL: f64 = 1e-9;

/// `ln Σ exp(x_i)`, stable for large magnitudes. Returns `-inf` for empty or all `-inf` input.
pub fn log_sum_exp(values: &[f64]) -> f64 {
    let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    if !max.is_finite() {
        return max;
    }
    let sum: f64 = values.iter().map(|v| (v - max).exp()).sum();
    max + sum.ln()
}

/// Softmax of `values` into `out` (same length).
pub fn softmax_into(values: &[f64], out: &mut [f64]) {
    let lse = log_sum_exp(values);
    for (o, v) in out.iter_mut().zip(values) {
        *o = (v - lse).exp();
    }
}

pub fn softmax(values: &[f64]) -> Vec<f64> {
    let mut out = vec![0.0; values.len()];
    softmax_into(values, &mut out);
    out
}

/// Rescale a non-negative vector to sum to one.
pub fn normalize(values: &[f64]) -> Result<Vec<f64>> {
    if values.iter().any(|v| !v.is_finite() || *v < 0.0) {
        return Err(FitError::Normalization(
            "frequency vector has negative or non-finite entries".into(),
        ));
    }
    let total: f64 = values.iter().sum();
    if total <= 0.0 || !total.is_finite() {
        return Err(FitError::Normalization(format!(
            "cannot normalize a vector with total {total}"
        )));
    }
    Ok(values.iter().map(|v| v / total).collect())
}

/// Non-negative entries summing to one within `tol`.
pub fn is_simplex(values: &[f64], tol: f64) -> bool {
    !values.is_empty()
        && values.iter().all(|v| v.is_finite() && *v >= 0.0)
        && (values.iter().sum::<f64>() - 1.0).abs() <= tol
}

pub fn sigmoid(u: f64) -> f64 {
    if u >= 0.0 {
        1.0 / (1.0 + (-u).exp())
    } else {
        let e = u.exp();
        e / (1.0 + e)
    }
}

/// `ln(1 + e^x)` without overflow.
pub fn softplus(x: f64) -> f64 {
    x.max(0.0) + (-x.abs()).exp().ln_1p()
}

/// Map `u ∈ ℝ` onto the open interval `(lo, hi)`.
pub fn interval_from_unconstrained(u: f64, lo: f64, hi: f64) -> f64 {
    lo + (hi - lo) * sigmoid(u)
}

/// `ln |dx/du|` for the interval transform.
pub fn interval_log_jacobian(u: f64, lo: f64, hi: f64) -> f64 {
    // ln σ(u) = -softplus(-u), ln(1 - σ(u)) = -softplus(u)
    (hi - lo).ln() - softplus(-u) - softplus(u)
}
