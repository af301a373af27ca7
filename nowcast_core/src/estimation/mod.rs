// nowcast_core/src/estimation/mod.rs

use crate::error::Result;
use crate::estimation::filters::kalman::FilterPhase;
use crate::estimation::kalman::StateEstimate;
use crate::messages::FilterInput;

/// The contract for any algorithm that performs the "State Estimator" role
/// for one (region, season).
pub trait StateEstimator: Send + Sync {
    /// The single, unified method for processing all types of input.
    /// Returns the estimate emitted for the input, if any.
    fn process(&mut self, input: &FilterInput) -> Result<Option<StateEstimate>>;

    /// The current best estimate, once initialized.
    fn get_state(&self) -> Option<&StateEstimate>;

    fn phase(&self) -> FilterPhase;
}

pub mod filters;
pub mod fusion;
pub mod kalman;
pub mod noise;
