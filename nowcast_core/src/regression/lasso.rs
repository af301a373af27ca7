// nowcast_core/src/regression/lasso.rs

//! L1-penalized regression by cyclic coordinate descent.
//!
//! ```text
//! lasso:        argmin (1/2t)‖x − Zβ‖² + λ‖β‖₁
//! constrained:  the same, subject to 1ᵀβ = 1
//! ```
//!
//! Both work on the Gram form `½βᵀGβ − cᵀβ + λ‖β‖₁` with `G = ZᵀZ/t` and
//! `c = Zᵀx/t`, so a sweep costs O(d²) however long the window is. The
//! constraint is enforced with an augmented Lagrangian wrapped around the
//! same sweeps.

use nalgebra::{DMatrix, DVector};
use tracing::warn;

use crate::error::{NowcastError, Result};
use crate::regression::ridge::{RidgeFit, SolveOptions};

const MAX_SWEEPS: usize = 100_000;
/// Largest coordinate step, relative to the largest weight, that counts as converged.
const STEP_TOLERANCE: f64 = 1e-12;
const MAX_MULTIPLIER_UPDATES: usize = 500;
const CONSTRAINT_TOLERANCE: f64 = 1e-10;

fn soft_threshold(v: f64, t: f64) -> f64 {
    v.signum() * (v.abs() - t).max(0.0)
}

fn gram_form(z: &DMatrix<f64>, x: &DVector<f64>) -> Result<(DMatrix<f64>, DVector<f64>)> {
    let (t, d) = z.shape();
    if t == 0 || d == 0 || z.iter().chain(x.iter()).any(|v| !v.is_finite()) {
        return Err(NowcastError::SingularSystem(d));
    }
    let scale = 1.0 / t as f64;
    Ok((z.transpose() * z * scale, z.transpose() * x * scale))
}

/// Minimizes `½βᵀGβ − cᵀβ + λ‖β‖₁` in place, warm-started from `beta`.
/// Returns whether the sweeps converged.
fn coordinate_descent(g: &DMatrix<f64>, c: &DVector<f64>, lambda: f64, beta: &mut DVector<f64>) -> bool {
    for _ in 0..MAX_SWEEPS {
        let mut max_step = 0.0f64;
        for j in 0..c.len() {
            let gjj = g[(j, j)];
            let old = beta[j];
            let new = if gjj > 0.0 {
                // Correlation with the residual that leaves coordinate j out.
                let rho = c[j] - g.column(j).dot(beta) + gjj * old;
                soft_threshold(rho, lambda) / gjj
            } else {
                0.0
            };
            beta[j] = new;
            max_step = max_step.max((new - old).abs());
        }
        if max_step <= STEP_TOLERANCE * beta.amax().max(1.0) {
            return true;
        }
    }
    false
}

fn finish(beta: DVector<f64>, lambda: f64, converged: bool) -> Result<RidgeFit> {
    if beta.iter().any(|b| !b.is_finite()) {
        return Err(NowcastError::SingularSystem(beta.len()));
    }
    if !converged {
        warn!("Lasso did not converge (λ = {:e}); weights may be imprecise", lambda);
    }
    Ok(RidgeFit {
        beta,
        lambda,
        ill_conditioned: !converged,
    })
}

/// Unconstrained lasso with the `1/2t` loss scaling.
pub fn lasso(z: &DMatrix<f64>, x: &DVector<f64>, lambda: f64, _opts: &SolveOptions) -> Result<RidgeFit> {
    let (g, c) = gram_form(z, x)?;
    let mut beta = DVector::zeros(c.len());
    let converged = coordinate_descent(&g, &c, lambda, &mut beta);
    finish(beta, lambda, converged)
}

/// Lasso with sum-to-one weights.
///
/// Method of multipliers: each round minimizes
/// `½βᵀ(G + ρ11ᵀ)β − (c − (y − ρ)1)ᵀβ + λ‖β‖₁`, then moves the multiplier
/// `y` by `ρ(1ᵀβ − 1)`.
pub fn constrained_lasso(
    z: &DMatrix<f64>,
    x: &DVector<f64>,
    lambda: f64,
    _opts: &SolveOptions,
) -> Result<RidgeFit> {
    let (g, c) = gram_form(z, x)?;
    let d = c.len();
    let rho = (g.trace() / d as f64).max(1.0);
    let ones = DVector::from_element(d, 1.0);
    let g_rho = &g + &ones * ones.transpose() * rho;

    let mut beta = DVector::from_element(d, 1.0 / d as f64);
    let mut y = 0.0;
    let mut converged = false;
    for _ in 0..MAX_MULTIPLIER_UPDATES {
        let shifted = &c - &ones * (y - rho);
        let inner = coordinate_descent(&g_rho, &shifted, lambda, &mut beta);
        let violation = beta.sum() - 1.0;
        y += rho * violation;
        if inner && violation.abs() < CONSTRAINT_TOLERANCE {
            converged = true;
            break;
        }
    }
    finish(beta, lambda, converged)
}
