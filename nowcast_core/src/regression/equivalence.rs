// nowcast_core/src/regression/equivalence.rs

//! The ridge problem whose solution reproduces the Kalman filter.
//!
//! For a random walk with process noise Q, prior (m₀, P₀) on the first week,
//! and per-week sensor variances v_ti, the filter's final posterior mean is
//! the last coordinate of
//!
//! ```text
//! argmin_x  Σ_t Σ_i w_ti (z_ti − x_t)²  +  λ Σ_t (x_t − x_{t−1})²  +  a (x_1 − m₀)²
//!
//!     w_ti = R / v_ti     λ = R / Q     a = R / P₀
//! ```
//!
//! for any reference noise R > 0. The penalty on week-to-week differences is
//! the ridge term; a larger Q (relative to R) means a weaker penalty.

use nalgebra::{DMatrix, DVector};

use crate::epiweek::Epiweek;
use crate::error::{NowcastError, Result};
use crate::messages::SensorObservation;
use crate::regression::ridge::{SolveOptions, SpdSystem};

/// Regularization strength matching a filter with process noise `q`,
/// measured against observation noise `r`.
pub fn lambda_from_noise(process_noise: f64, observation_noise: f64) -> f64 {
    observation_noise / process_noise
}

/// Weight of the prior-mean anchor for prior variance `p0`.
pub fn anchor_from_prior(prior_variance: f64, observation_noise: f64) -> f64 {
    observation_noise / prior_variance
}

/// The sensors actually used for one week. An empty list is a week with no
/// observation; absent sensors are simply not listed.
#[derive(Debug, Clone, PartialEq)]
pub struct WeekInputs {
    pub epiweek: Epiweek,
    pub observations: Vec<SensorObservation>,
}

/// Everything the filter consumed for a season so far.
#[derive(Debug, Clone, PartialEq)]
pub struct SeasonInputs {
    pub prior_mean: f64,
    pub prior_variance: f64,
    pub process_noise: f64,
    pub weeks: Vec<WeekInputs>,
}

impl SeasonInputs {
    pub fn new(prior_mean: f64, prior_variance: f64, process_noise: f64) -> Self {
        Self {
            prior_mean,
            prior_variance,
            process_noise,
            weeks: Vec::new(),
        }
    }

    fn usable(&self) -> impl Iterator<Item = (usize, &SensorObservation)> {
        self.weeks.iter().enumerate().flat_map(|(t, w)| {
            w.observations
                .iter()
                .filter(|o| o.value.is_finite() && o.variance.is_finite() && o.variance > 0.0)
                .map(move |o| (t, o))
        })
    }

    /// Mean observation variance over the season, or the prior variance for
    /// a season without observations.
    pub fn reference_noise(&self) -> f64 {
        let (sum, n) = self
            .usable()
            .fold((0.0, 0usize), |(s, n), (_, o)| (s + o.variance, n + 1));
        if n == 0 {
            self.prior_variance
        } else {
            sum / n as f64
        }
    }
}

/// The derived parameters of the regression, exposed for inspection.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RidgeCorrespondence {
    pub reference_noise: f64,
    pub lambda: f64,
    pub anchor: f64,
}

impl RidgeCorrespondence {
    pub fn for_season(inputs: &SeasonInputs) -> Self {
        let r = inputs.reference_noise();
        Self {
            reference_noise: r,
            lambda: lambda_from_noise(inputs.process_noise, r),
            anchor: anchor_from_prior(inputs.prior_variance, r),
        }
    }
}

/// Solution of the season-long ridge problem.
#[derive(Debug, Clone)]
pub struct TrajectoryFit {
    /// One fitted value per week.
    pub trajectory: DVector<f64>,
    /// Posterior variance of the last week (R times the last diagonal entry
    /// of the inverse system).
    pub final_variance: f64,
    pub correspondence: RidgeCorrespondence,
    pub ill_conditioned: bool,
}

impl TrajectoryFit {
    pub fn final_value(&self) -> f64 {
        self.trajectory[self.trajectory.len() - 1]
    }
}

/// Builds and solves the tridiagonal normal equations for `inputs`, with
/// the regularization taken from `correspondence`.
pub fn solve_trajectory(
    inputs: &SeasonInputs,
    correspondence: RidgeCorrespondence,
    opts: &SolveOptions,
) -> Result<TrajectoryFit> {
    let t_len = inputs.weeks.len();
    if t_len == 0 {
        return Err(NowcastError::NoObservation);
    }
    let RidgeCorrespondence {
        reference_noise: r,
        lambda,
        anchor,
    } = correspondence;

    let mut a = DMatrix::zeros(t_len, t_len);
    let mut b = DVector::zeros(t_len);

    for (t, obs) in inputs.usable() {
        let w = r / obs.variance;
        a[(t, t)] += w;
        b[t] += w * obs.value;
    }
    for t in 1..t_len {
        a[(t - 1, t - 1)] += lambda;
        a[(t, t)] += lambda;
        a[(t - 1, t)] -= lambda;
        a[(t, t - 1)] -= lambda;
    }
    a[(0, 0)] += anchor;
    b[0] += anchor * inputs.prior_mean;

    let system = SpdSystem::factor(&a, opts)?;
    let trajectory = system.solve(&b);
    let mut last = DVector::zeros(t_len);
    last[t_len - 1] = 1.0;
    let final_variance = r * system.solve(&last)[t_len - 1];

    Ok(TrajectoryFit {
        trajectory,
        final_variance,
        correspondence,
        ill_conditioned: system.ill_conditioned(opts),
    })
}

/// Solves with the correspondence derived from the season's own noise levels.
pub fn kalman_equivalent(inputs: &SeasonInputs, opts: &SolveOptions) -> Result<TrajectoryFit> {
    solve_trajectory(inputs, RidgeCorrespondence::for_season(inputs), opts)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::estimation::filters::kalman::{KalmanFilterEngine, KalmanParams};
    use crate::estimation::fusion::fuse;
    use crate::estimation::kalman::GainParams;
    use approx::assert_abs_diff_eq;

    fn season(q: f64, rows: &[&[(f64, f64)]]) -> SeasonInputs {
        let start = Epiweek::from_code(201545).unwrap();
        let mut inputs = SeasonInputs::new(1.0, 1.0, q);
        for (t, row) in rows.iter().enumerate() {
            inputs.weeks.push(WeekInputs {
                epiweek: start.add_weeks(t as i64).unwrap(),
                observations: row
                    .iter()
                    .enumerate()
                    .map(|(i, (v, var))| SensorObservation::new(format!("s{i}").as_str(), *v, *var))
                    .collect(),
            });
        }
        inputs
    }

    fn run_filter(inputs: &SeasonInputs) -> Vec<(f64, f64)> {
        let mut kf = KalmanFilterEngine::new(KalmanParams {
            process_noise: inputs.process_noise,
            gain: GainParams::default(),
        });
        kf.initialize(inputs.weeks[0].epiweek, inputs.prior_mean, inputs.prior_variance)
            .unwrap();
        inputs
            .weeks
            .iter()
            .map(|w| {
                let post = kf.step(w.epiweek, fuse(&w.observations).as_ref()).unwrap();
                (post.mean, post.variance)
            })
            .collect()
    }

    #[test]
    fn test_correspondence_functions() {
        assert_abs_diff_eq!(lambda_from_noise(0.1, 2.0), 20.0, epsilon = 1e-12);
        assert_abs_diff_eq!(anchor_from_prior(4.0, 2.0), 0.5, epsilon = 1e-12);
    }

    #[test]
    fn test_matches_kalman_final_posterior() {
        let rows: Vec<Vec<(f64, f64)>> = [1.0, 2.0, 3.0, 4.0, 5.0]
            .iter()
            .zip([1.2, 2.1, 2.9, 4.2, 4.8])
            .map(|(a, b)| vec![(*a, 1.0), (b, 4.0)])
            .collect();
        let rows: Vec<&[(f64, f64)]> = rows.iter().map(Vec::as_slice).collect();
        let inputs = season(0.1, &rows);

        let fit = kalman_equivalent(&inputs, &SolveOptions::default()).unwrap();
        assert_abs_diff_eq!(fit.final_value(), 3.3475446107442814, epsilon = 1e-9);
        assert_abs_diff_eq!(fit.final_variance, 0.2465082821948933, epsilon = 1e-9);
    }

    #[test]
    fn test_equivalence_at_every_prefix_with_missing_weeks() {
        let rows: [&[(f64, f64)]; 6] = [
            &[(2.0, 0.5), (2.6, 2.0)],
            &[],
            &[(3.1, 0.5)],
            &[(3.0, 0.7), (4.4, 3.0), (3.3, 1.1)],
            &[],
            &[(2.2, 2.0)],
        ];
        for q in [0.01, 0.5, 10.0] {
            let full = season(q, &rows);
            let filtered = run_filter(&full);
            for t in 1..=rows.len() {
                let prefix = SeasonInputs {
                    weeks: full.weeks[..t].to_vec(),
                    ..full.clone()
                };
                let fit = kalman_equivalent(&prefix, &SolveOptions::default()).unwrap();
                assert_abs_diff_eq!(fit.final_value(), filtered[t - 1].0, epsilon = 1e-6);
                assert_abs_diff_eq!(fit.final_variance, filtered[t - 1].1, epsilon = 1e-6);
            }
        }
    }

    #[test]
    fn test_reference_noise_does_not_change_solution() {
        let rows: [&[(f64, f64)]; 3] = [&[(1.0, 1.0)], &[(2.0, 3.0), (1.5, 0.2)], &[(2.5, 1.0)]];
        let inputs = season(0.2, &rows);
        let base = kalman_equivalent(&inputs, &SolveOptions::default()).unwrap();
        for r in [0.01, 1.0, 50.0] {
            let corr = RidgeCorrespondence {
                reference_noise: r,
                lambda: lambda_from_noise(0.2, r),
                anchor: anchor_from_prior(1.0, r),
            };
            let fit = solve_trajectory(&inputs, corr, &SolveOptions::default()).unwrap();
            assert_abs_diff_eq!(fit.final_value(), base.final_value(), epsilon = 1e-9);
        }
    }

    #[test]
    fn test_single_week_single_sensor() {
        let rows: [&[(f64, f64)]; 1] = [&[(5.0, 1.0)]];
        let fit = kalman_equivalent(&season(0.1, &rows), &SolveOptions::default()).unwrap();
        // Prior (1, 1) and one observation (5, 1) meet halfway.
        assert_abs_diff_eq!(fit.final_value(), 3.0, epsilon = 1e-12);
        assert_abs_diff_eq!(fit.final_variance, 0.5, epsilon = 1e-12);
    }

    #[test]
    fn test_empty_season_is_no_observation() {
        let inputs = SeasonInputs::new(0.0, 1.0, 0.1);
        assert_eq!(
            kalman_equivalent(&inputs, &SolveOptions::default()).unwrap_err(),
            NowcastError::NoObservation
        );
    }
}
