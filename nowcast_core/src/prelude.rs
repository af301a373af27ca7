// nowcast_core/src/prelude.rs

// --- Core Abstractions (The main contracts of the library) ---
pub use crate::estimation::StateEstimator;
pub use crate::messages::{FilterInput, FusedObservation, SensorObservation};
pub use crate::regression::{AlternativeEstimate, AlternativeEstimator, EstimationContext};

// --- Core Data Structures (The "nouns" of the library) ---
pub use crate::data::SensorTable;
pub use crate::epiweek::{Epiweek, Season};
pub use crate::estimation::kalman::StateEstimate;
pub use crate::types::{Region, SensorId};

// --- Configuration & Errors ---
pub use crate::config::{FilterConfig, NoiseConfig, NoiseFallback, NowcastConfig, RegressionConfig};
pub use crate::error::{NowcastError, Result};

// --- Estimation Algorithms ---
pub use crate::estimation::filters::kalman::{FilterPhase, KalmanFilterEngine, KalmanParams};
pub use crate::estimation::fusion::fuse;
pub use crate::estimation::kalman::{kalman_gain, kalman_predict, kalman_update};
pub use crate::estimation::noise::{NoiseEstimator, NoiseProfile};
pub use crate::regression::equivalence::{anchor_from_prior, kalman_equivalent, lambda_from_noise};

// --- Concrete Implementations & Orchestration ---
pub use crate::backtest::{BacktestReport, BacktestRunner, Gap, GapReason, NowcastRecord, SeasonSummary};
pub use crate::regression::{default_estimators, KalmanRidgeEquivalent, SensorRegression};
