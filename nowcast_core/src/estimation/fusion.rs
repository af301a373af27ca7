// nowcast_core/src/estimation/fusion.rs

//! Inverse-variance sensor fusion.
//!
//! ```text
//! fused_variance = 1 / Σ (1 / var_i)
//! fused_mean     = fused_variance * Σ (reading_i / var_i)
//! ```
//!
//! Fusing jointly and then updating the filter once gives the same posterior
//! as folding each sensor into the filter on its own (see
//! `KalmanFilterEngine::step_sequential`).

use crate::messages::{FusedObservation, SensorObservation};

/// Fuses a week's observations. Returns `None` when nothing usable remains,
/// which the filter treats as a prediction-only week.
///
/// Observations with a non-finite value or a non-positive variance are
/// ignored rather than allowed to poison the sums.
pub fn fuse(observations: &[SensorObservation]) -> Option<FusedObservation> {
    let usable = observations
        .iter()
        .filter(|o| o.value.is_finite() && o.variance.is_finite() && o.variance > 0.0);

    let (mut precision, mut weighted, mut count) = (0.0, 0.0, 0usize);
    let mut single = None;
    for obs in usable {
        precision += 1.0 / obs.variance;
        weighted += obs.value / obs.variance;
        count += 1;
        single = Some(obs);
    }

    match (count, single) {
        (0, _) | (_, None) => None,
        // Pass a lone sensor through untouched so no rounding creeps in.
        (1, Some(obs)) => Some(FusedObservation {
            mean: obs.value,
            variance: obs.variance,
            sensors: 1,
        }),
        (n, Some(_)) => {
            let variance = 1.0 / precision;
            Some(FusedObservation {
                mean: variance * weighted,
                variance,
                sensors: n,
            })
        }
    }
}
