// nowcast_core/src/messages.rs

use serde::Serialize;

use crate::epiweek::Epiweek;
use crate::types::SensorId;

// =========================================================================
// == Observation Data ==
// =========================================================================

/// One sensor's reading for a week, paired with the noise variance it is
/// trusted with.
#[derive(Debug, Clone, PartialEq)]
pub struct SensorObservation {
    pub sensor: SensorId,
    pub value: f64,
    pub variance: f64,
}

impl SensorObservation {
    pub fn new(sensor: impl Into<SensorId>, value: f64, variance: f64) -> Self {
        Self {
            sensor: sensor.into(),
            value,
            variance,
        }
    }
}

/// All of a week's sensors collapsed into a single measurement.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct FusedObservation {
    pub mean: f64,
    pub variance: f64,
    /// How many sensors contributed.
    pub sensors: usize,
}

// =========================================================================
// == Estimator Input ==
// =========================================================================

/// The universal input packet for every `StateEstimator` implementation.
#[derive(Debug, Clone, Copy)]
pub enum FilterInput<'a> {
    /// Start a season at `epiweek` with the given prior.
    Initialize {
        epiweek: Epiweek,
        mean: f64,
        variance: f64,
    },
    /// Advance to `epiweek` and, when present, fuse its observation.
    Week {
        epiweek: Epiweek,
        observation: Option<&'a FusedObservation>,
    },
    /// The season is over; no further input is accepted.
    EndOfSeason,
}
