// nowcast_core/src/estimation/noise.rs

//! Observation-noise variances for each sensor, fit from the residuals
//! `reading - truth` over a trailing window that ends strictly before the
//! week the variance will be applied to.

use std::collections::BTreeMap;
use tracing::debug;

use crate::config::{NoiseConfig, NoiseFallback};
use crate::data::SensorTable;
use crate::epiweek::Epiweek;
use crate::error::{NowcastError, Result};
use crate::types::{Region, SensorId};

/// The trailing window of `len` weeks ending just before `reference`,
/// oldest first. Never includes `reference` itself.
pub fn training_window(reference: Epiweek, len: u32) -> Vec<Epiweek> {
    (1..=len as i64)
        .rev()
        .filter_map(|back| reference.add_weeks(-back).ok())
        .collect()
}

/// A sensor that could not be fit and what was done about it.
#[derive(Debug, Clone, PartialEq)]
pub struct SensorFallback {
    pub sensor: SensorId,
    pub applied: NoiseFallback,
    pub reason: NowcastError,
}

/// Per-sensor variances valid for one (region, reference week).
#[derive(Debug, Clone, PartialEq)]
pub struct NoiseProfile {
    pub region: Region,
    pub reference: Epiweek,
    variances: BTreeMap<SensorId, f64>,
    pub fallbacks: Vec<SensorFallback>,
}

impl NoiseProfile {
    /// `None` means the sensor is excluded for this week.
    pub fn variance(&self, sensor: &SensorId) -> Option<f64> {
        self.variances.get(sensor).copied()
    }

    pub fn variances(&self) -> &BTreeMap<SensorId, f64> {
        &self.variances
    }
}

/// Fits noise variances from history. Pure: reads the table, never mutates it.
#[derive(Debug, Clone, Copy)]
pub struct NoiseEstimator<'a> {
    table: &'a SensorTable,
    config: &'a NoiseConfig,
}

impl<'a> NoiseEstimator<'a> {
    pub fn new(table: &'a SensorTable, config: &'a NoiseConfig) -> Self {
        Self { table, config }
    }

    /// Residuals over the training window, using readings as they were known
    /// at `reference`. Weeks missing either side are skipped.
    pub fn residuals(&self, sensor: &SensorId, region: &Region, reference: Epiweek) -> Vec<f64> {
        training_window(reference, self.config.window_weeks)
            .into_iter()
            .filter_map(|week| {
                let reading = self.table.reading_as_of(region, sensor, week, reference)?;
                let truth = self.table.truth(region, week)?;
                let r = reading - truth;
                r.is_finite().then_some(r)
            })
            .collect()
    }

    /// Mean squared residual, floored at `variance_floor`. Pre-fit
    /// variances from the config take precedence.
    pub fn estimate(&self, sensor: &SensorId, region: &Region, reference: Epiweek) -> Result<f64> {
        if let Some(fixed) = self.config.fixed.get(sensor) {
            return Ok(*fixed);
        }

        let residuals = self.residuals(sensor, region, reference);
        if residuals.len() < self.config.min_residuals {
            return Err(NowcastError::InsufficientHistory {
                sensor: sensor.clone(),
                region: region.clone(),
                before: reference,
                found: residuals.len(),
                required: self.config.min_residuals,
            });
        }

        let mse = residuals.iter().map(|r| r * r).sum::<f64>() / residuals.len() as f64;
        Ok(mse.max(self.config.variance_floor))
    }

    /// Fits every sensor, applying the configured fallback to those without
    /// enough history.
    pub fn profile(&self, region: &Region, reference: Epiweek, sensors: &[SensorId]) -> NoiseProfile {
        let mut variances = BTreeMap::new();
        let mut fallbacks = Vec::new();

        for sensor in sensors {
            match self.estimate(sensor, region, reference) {
                Ok(v) => {
                    variances.insert(sensor.clone(), v);
                }
                Err(reason) => {
                    debug!("Noise fallback for '{}' in {} at {}: {}", sensor, region, reference, reason);
                    if let NoiseFallback::Default { variance } = self.config.fallback {
                        variances.insert(sensor.clone(), variance);
                    }
                    fallbacks.push(SensorFallback {
                        sensor: sensor.clone(),
                        applied: self.config.fallback,
                        reason,
                    });
                }
            }
        }

        NoiseProfile {
            region: region.clone(),
            reference,
            variances,
            fallbacks,
        }
    }
}
