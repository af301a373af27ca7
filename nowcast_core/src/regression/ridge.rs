// nowcast_core/src/regression/ridge.rs

//! Ridge and fusion-constrained ridge regression in closed form.
//!
//! ```text
//! ridge:        argmin ‖x − Zβ‖² + λ‖β‖²
//! constrained:  the same, subject to 1ᵀβ = 1
//! ```
//!
//! Both reduce to solving with `A = ZᵀZ + λI`, which is symmetric positive
//! semi-definite. A singular `A` (λ = 0 with collinear or duplicated sensors)
//! is diagonally loaded and solved again, so callers always get a value.
//! Very small λ on near-collinear sensors is numerically fragile; such
//! systems are flagged as ill-conditioned instead of being silently altered.

use nalgebra::{Cholesky, DMatrix, DVector, Dyn};
use tracing::warn;

use crate::config::RegressionConfig;
use crate::error::{NowcastError, Result};

/// How hard to try on singular systems and when to complain.
#[derive(Debug, Clone, Copy)]
pub struct SolveOptions {
    /// First diagonal loading tried when the factorization fails.
    pub singular_ridge: f64,
    /// Reciprocal condition numbers below this are flagged.
    pub condition_warning: f64,
}

impl Default for SolveOptions {
    fn default() -> Self {
        Self {
            singular_ridge: 1e-8,
            condition_warning: 1e-10,
        }
    }
}

impl From<&RegressionConfig> for SolveOptions {
    fn from(cfg: &RegressionConfig) -> Self {
        Self {
            singular_ridge: cfg.singular_ridge,
            condition_warning: cfg.condition_warning,
        }
    }
}

/// Number of times the loading is multiplied by ten before giving up.
const MAX_LOADING_ATTEMPTS: usize = 12;

/// A factorized symmetric positive-definite system.
pub struct SpdSystem {
    cholesky: Cholesky<f64, Dyn>,
    /// λ_min / λ_max of the matrix as given (before any loading).
    pub rcond: f64,
    /// Diagonal loading that had to be added, zero if none.
    pub loading: f64,
}

impl SpdSystem {
    pub fn factor(a: &DMatrix<f64>, opts: &SolveOptions) -> Result<Self> {
        let n = a.nrows();
        if n == 0 || a.iter().any(|v| !v.is_finite()) {
            return Err(NowcastError::SingularSystem(n));
        }

        let eigen = a.symmetric_eigenvalues();
        let max = eigen.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
        let min = eigen.iter().cloned().fold(f64::INFINITY, f64::min);
        let rcond = if max > 0.0 { (min / max).max(0.0) } else { 0.0 };

        // Rounding can let Cholesky "succeed" on an exactly singular matrix,
        // so numerically singular ones go straight to loading.
        if rcond > f64::EPSILON * n as f64 {
            if let Some(cholesky) = Cholesky::new(a.clone()) {
                return Ok(Self {
                    cholesky,
                    rcond,
                    loading: 0.0,
                });
            }
        }

        let scale = a.diagonal().amax().max(1.0);
        let mut loading = opts.singular_ridge * scale;
        for _ in 0..MAX_LOADING_ATTEMPTS {
            let loaded = a + DMatrix::identity(n, n) * loading;
            if let Some(cholesky) = Cholesky::new(loaded) {
                return Ok(Self {
                    cholesky,
                    rcond,
                    loading,
                });
            }
            loading *= 10.0;
        }
        Err(NowcastError::SingularSystem(n))
    }

    pub fn solve(&self, b: &DVector<f64>) -> DVector<f64> {
        self.cholesky.solve(b)
    }

    /// True when the rcond is below the warning threshold or loading was needed.
    pub fn ill_conditioned(&self, opts: &SolveOptions) -> bool {
        self.loading > 0.0 || self.rcond < opts.condition_warning
    }
}

/// Regression weights plus diagnostics about the solve.
#[derive(Debug, Clone)]
pub struct RidgeFit {
    pub beta: DVector<f64>,
    pub lambda: f64,
    pub ill_conditioned: bool,
}

impl RidgeFit {
    pub fn predict(&self, z: &DVector<f64>) -> f64 {
        self.beta.dot(z)
    }
}

fn gram(z: &DMatrix<f64>, lambda: f64) -> DMatrix<f64> {
    let d = z.ncols();
    z.transpose() * z + DMatrix::identity(d, d) * lambda
}

fn factor_reporting(a: &DMatrix<f64>, lambda: f64, opts: &SolveOptions) -> Result<SpdSystem> {
    let system = SpdSystem::factor(a, opts)?;
    if system.ill_conditioned(opts) {
        warn!(
            "Ill-conditioned ridge system (λ = {:e}, rcond = {:e}, loading = {:e}); weights may be imprecise",
            lambda, system.rcond, system.loading
        );
    }
    Ok(system)
}

/// Unconstrained ridge: `β = (ZᵀZ + λI)⁻¹ Zᵀx`.
pub fn ridge(z: &DMatrix<f64>, x: &DVector<f64>, lambda: f64, opts: &SolveOptions) -> Result<RidgeFit> {
    let system = factor_reporting(&gram(z, lambda), lambda, opts)?;
    Ok(RidgeFit {
        beta: system.solve(&(z.transpose() * x)),
        lambda,
        ill_conditioned: system.ill_conditioned(opts),
    })
}

/// Ridge constrained to sum-to-one weights, the single-region form of
/// `Hᵀβ = I`. With `u = A⁻¹Zᵀx` and `v = A⁻¹1`:
/// `β = u + v (1 − 1ᵀu) / (1ᵀv)`.
pub fn constrained_ridge(
    z: &DMatrix<f64>,
    x: &DVector<f64>,
    lambda: f64,
    opts: &SolveOptions,
) -> Result<RidgeFit> {
    let d = z.ncols();
    let system = factor_reporting(&gram(z, lambda), lambda, opts)?;
    let ones = DVector::from_element(d, 1.0);
    let u = system.solve(&(z.transpose() * x));
    let v = system.solve(&ones);

    let denom = ones.dot(&v);
    if !(denom.is_finite() && denom.abs() > f64::MIN_POSITIVE) {
        return Err(NowcastError::SingularSystem(d));
    }
    let nu = (1.0 - ones.dot(&u)) / denom;
    Ok(RidgeFit {
        beta: u + v * nu,
        lambda,
        ill_conditioned: system.ill_conditioned(opts),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;
    use rand_distr::{Distribution, Normal};

    /// `n` weeks of truth and `d` sensors, each truth plus its own noise level.
    fn synthetic(n: usize, noise: &[f64], seed: u64) -> (DMatrix<f64>, DVector<f64>) {
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        let truth_dist = Normal::new(3.0, 1.5).unwrap();
        let x = DVector::from_fn(n, |_, _| truth_dist.sample(&mut rng));
        let mut z = DMatrix::zeros(n, noise.len());
        for (j, sd) in noise.iter().enumerate() {
            let dist = Normal::new(0.0, *sd).unwrap();
            for i in 0..n {
                z[(i, j)] = x[i] + dist.sample(&mut rng);
            }
        }
        (z, x)
    }

    #[test]
    fn test_constrained_weights_sum_to_one() {
        let (z, x) = synthetic(60, &[0.3, 1.0, 2.0], 7);
        for lambda in [0.0, 1.0, 50.0, 400.0] {
            let fit = constrained_ridge(&z, &x, lambda, &SolveOptions::default()).unwrap();
            assert_abs_diff_eq!(fit.beta.sum(), 1.0, epsilon = 1e-9);
        }
    }

    #[test]
    fn test_unregularized_constrained_matches_inverse_covariance_fusion() {
        let (z, x) = synthetic(200, &[0.4, 0.9, 1.7], 11);
        let n = z.nrows() as f64;

        // G = Z − x1ᵀ, R = GᵀG / n, weights R⁻¹1 / (1ᵀR⁻¹1).
        let mut g = z.clone();
        for mut col in g.column_iter_mut() {
            col -= &x;
        }
        let r = g.transpose() * &g / n;
        let ones = DVector::from_element(3, 1.0);
        let r_inv_ones = r.cholesky().unwrap().solve(&ones);
        let kf_beta = &r_inv_ones / ones.dot(&r_inv_ones);

        let fit = constrained_ridge(&z, &x, 0.0, &SolveOptions::default()).unwrap();
        for j in 0..3 {
            assert_abs_diff_eq!(fit.beta[j], kf_beta[j], epsilon = 1e-8);
        }
        // The least noisy sensor gets the most weight.
        assert!(fit.beta[0] > fit.beta[1] && fit.beta[1] > fit.beta[2]);
    }

    #[test]
    fn test_ridge_normal_equations() {
        let (z, x) = synthetic(40, &[0.5, 1.0], 3);
        let lambda = 5.0;
        let fit = ridge(&z, &x, lambda, &SolveOptions::default()).unwrap();
        // Gradient of the objective vanishes at the optimum.
        let grad = z.transpose() * (&z * &fit.beta - &x) + &fit.beta * lambda;
        assert!(grad.amax() < 1e-8);
        assert!(!fit.ill_conditioned);
    }

    #[test]
    fn test_ridge_shrinks_toward_zero() {
        let (z, x) = synthetic(40, &[0.5, 1.0], 5);
        let loose = ridge(&z, &x, 0.1, &SolveOptions::default()).unwrap();
        let tight = ridge(&z, &x, 1e5, &SolveOptions::default()).unwrap();
        assert!(tight.beta.norm() < loose.beta.norm());
    }

    #[test]
    fn test_duplicate_sensors_still_solve() {
        // Two identical columns make ZᵀZ singular at λ = 0.
        let (z1, x) = synthetic(30, &[0.5], 9);
        let z = DMatrix::from_fn(30, 2, |i, _| z1[(i, 0)]);

        let fit = constrained_ridge(&z, &x, 0.0, &SolveOptions::default()).unwrap();
        assert!(fit.beta.iter().all(|b| b.is_finite()));
        assert_abs_diff_eq!(fit.beta.sum(), 1.0, epsilon = 1e-6);
        assert_abs_diff_eq!(fit.beta[0], fit.beta[1], epsilon = 1e-6);
        assert!(fit.ill_conditioned);

        let plain = ridge(&z, &x, 0.0, &SolveOptions::default()).unwrap();
        assert!(plain.beta.iter().all(|b| b.is_finite()));
    }

    #[test]
    fn test_non_finite_input_is_singular() {
        let a = DMatrix::from_element(2, 2, f64::NAN);
        assert!(matches!(
            SpdSystem::factor(&a, &SolveOptions::default()),
            Err(NowcastError::SingularSystem(2))
        ));
    }
}
