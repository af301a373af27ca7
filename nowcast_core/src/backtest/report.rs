// nowcast_core/src/backtest/report.rs

use serde::Serialize;
use std::fmt;

use crate::config::NoiseFallback;
use crate::epiweek::{Epiweek, Season};
use crate::error::NowcastError;
use crate::estimation::kalman::StateEstimate;
use crate::types::{Region, SensorId};

/// Method name of the filter's posterior.
pub const KALMAN: &str = "kalman";
/// Method name of the fused observation fed to the filter.
pub const FUSION: &str = "fusion";

/// One estimate for one (region, week, method).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NowcastRecord {
    pub region: Region,
    pub epiweek: Epiweek,
    pub method: String,
    pub estimate: f64,
    pub variance: Option<f64>,
    pub lambda: Option<f64>,
}

/// Why a week (or one sensor of it) contributed less than it could have.
#[derive(Debug, Clone, PartialEq)]
pub enum GapReason {
    /// Nothing to fuse; the filter only predicted.
    NoObservation,
    /// The sensor's noise could not be fit and `fallback` was applied.
    InsufficientHistory {
        fallback: NoiseFallback,
        cause: NowcastError,
    },
    /// A non-finite reading was left out.
    MalformedReading { value: f64 },
    /// An alternative estimator failed for the week.
    EstimatorFailed { method: String, cause: NowcastError },
}

impl GapReason {
    pub fn kind(&self) -> &'static str {
        match self {
            GapReason::NoObservation => "no_observation",
            GapReason::InsufficientHistory { .. } => "insufficient_history",
            GapReason::MalformedReading { .. } => "malformed_reading",
            GapReason::EstimatorFailed { .. } => "estimator_failed",
        }
    }
}

impl fmt::Display for GapReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GapReason::NoObservation => write!(f, "no sensor observations"),
            GapReason::InsufficientHistory { fallback, cause } => match fallback {
                NoiseFallback::Default { variance } => write!(f, "{cause}; used variance {variance}"),
                NoiseFallback::Exclude => write!(f, "{cause}; sensor excluded"),
            },
            GapReason::MalformedReading { value } => write!(f, "non-finite reading {value}"),
            GapReason::EstimatorFailed { method, cause } => write!(f, "{method}: {cause}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Gap {
    pub region: Region,
    pub epiweek: Epiweek,
    /// Set when the gap concerns a single sensor.
    pub sensor: Option<SensorId>,
    pub reason: GapReason,
}

/// How one (region, season) filter run went.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SeasonSummary {
    pub region: Region,
    pub season: Season,
    pub first_week: Epiweek,
    pub last_week: Epiweek,
    pub weeks: usize,
    /// Weeks with at least one fused sensor.
    pub observed_weeks: usize,
    pub final_state: Option<StateEstimate>,
}

/// Everything a backtest produced, sorted by (region, epiweek, method).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BacktestReport {
    pub records: Vec<NowcastRecord>,
    pub gaps: Vec<Gap>,
    pub seasons: Vec<SeasonSummary>,
}

impl BacktestReport {
    pub(crate) fn merge(&mut self, other: BacktestReport) {
        self.records.extend(other.records);
        self.gaps.extend(other.gaps);
        self.seasons.extend(other.seasons);
    }

    pub(crate) fn sort(&mut self) {
        self.records.sort_by(|a, b| {
            (&a.region, a.epiweek, &a.method).cmp(&(&b.region, b.epiweek, &b.method))
        });
        // Stable: gaps of one week keep the order they were found in.
        self.gaps
            .sort_by(|a, b| (&a.region, a.epiweek).cmp(&(&b.region, b.epiweek)));
        self.seasons
            .sort_by(|a, b| (&a.region, a.first_week).cmp(&(&b.region, b.first_week)));
    }

    /// Records of one method, in output order.
    pub fn method<'a>(&'a self, method: &'a str) -> impl Iterator<Item = &'a NowcastRecord> + 'a {
        self.records.iter().filter(move |r| r.method == method)
    }

    pub fn record(&self, region: &Region, epiweek: Epiweek, method: &str) -> Option<&NowcastRecord> {
        self.records
            .iter()
            .find(|r| &r.region == region && r.epiweek == epiweek && r.method == method)
    }
}
