// nowcast_core/src/error.rs

use thiserror::Error;

use crate::epiweek::Epiweek;
use crate::estimation::filters::kalman::FilterPhase;
use crate::types::{Region, SensorId};

pub type Result<T> = std::result::Result<T, NowcastError>;

/// Every failure the estimation core can report.
///
/// Per-week conditions (`InsufficientHistory`, `NoObservation`) are meant to be
/// absorbed by the caller. Structural ones (`InvalidStateTransition`,
/// `EmptyRange`, ...) abort the run.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum NowcastError {
    #[error("sensor '{sensor}' in {region} has {found} residuals before {before}, need {required}")]
    InsufficientHistory {
        sensor: SensorId,
        region: Region,
        before: Epiweek,
        found: usize,
        required: usize,
    },

    #[error("no sensor observations available")]
    NoObservation,

    #[error("cannot {operation} a filter in the {phase:?} phase")]
    InvalidStateTransition {
        phase: FilterPhase,
        operation: &'static str,
    },

    #[error("filter expected epiweek {expected}, got {got}")]
    NonContiguousWeek { expected: Epiweek, got: Epiweek },

    #[error("range {start}..={end} contains no in-season weeks with data")]
    EmptyRange { start: Epiweek, end: Epiweek },

    #[error("start epiweek {start} is after end epiweek {end}")]
    InvertedRange { start: Epiweek, end: Epiweek },

    #[error("invalid epiweek {0}")]
    InvalidEpiweek(u32),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("linear system of size {0} is singular")]
    SingularSystem(usize),

    #[error("{region} @ {epiweek}: {source}")]
    AtWeek {
        region: Region,
        epiweek: Epiweek,
        #[source]
        source: Box<NowcastError>,
    },
}

impl NowcastError {
    /// Attaches the originating (region, epiweek) to a fatal error.
    pub fn at(self, region: &Region, epiweek: Epiweek) -> Self {
        NowcastError::AtWeek {
            region: region.clone(),
            epiweek,
            source: Box::new(self),
        }
    }
}
