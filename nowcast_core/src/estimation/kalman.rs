// nowcast_core/src/estimation/kalman.rs

use serde::Serialize;

use crate::epiweek::Epiweek;
use crate::messages::FusedObservation;

/// The filter's belief about the indicator in one week.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct StateEstimate {
    pub epiweek: Epiweek,
    pub mean: f64,
    /// Always >= 0.
    pub variance: f64,
}

/// A container for the parameters needed by the update step.
#[derive(Debug, Clone, Copy)]
pub struct GainParams {
    /// Denominators below this are considered degenerate.
    pub epsilon: f64,
    /// Added to a degenerate denominator.
    pub ridge: f64,
}

impl Default for GainParams {
    fn default() -> Self {
        Self {
            epsilon: 1e-12,
            ridge: 1e-9,
        }
    }
}

/// K = P / (P + R), clamped to `[0, 1]`.
pub fn kalman_gain(prior_variance: f64, observation_variance: f64, params: &GainParams) -> f64 {
    let mut denominator = prior_variance + observation_variance;
    if denominator < params.epsilon {
        denominator += params.ridge;
    }
    (prior_variance / denominator).clamp(0.0, 1.0)
}

/// PURE FUNCTION: random-walk prediction into `epiweek`.
/// The mean carries over and the variance grows by `process_noise`.
pub fn kalman_predict(current: &StateEstimate, process_noise: f64, epiweek: Epiweek) -> StateEstimate {
    StateEstimate {
        epiweek,
        mean: current.mean,
        variance: current.variance + process_noise,
    }
}

/// PURE FUNCTION: scalar measurement update.
pub fn kalman_update(
    prior: &StateEstimate,
    observation: &FusedObservation,
    params: &GainParams,
) -> StateEstimate {
    let k = kalman_gain(prior.variance, observation.variance, params);
    StateEstimate {
        epiweek: prior.epiweek,
        mean: prior.mean + k * (observation.mean - prior.mean),
        variance: ((1.0 - k) * prior.variance).max(0.0),
    }
}
