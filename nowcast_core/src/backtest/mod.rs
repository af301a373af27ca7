// nowcast_core/src/backtest/mod.rs

//! Replays history week by week, as it was known at the time, and records
//! what every method would have said.

use rayon::prelude::*;
use std::collections::BTreeSet;
use tracing::{debug, info, warn};

use crate::config::NowcastConfig;
use crate::data::SensorTable;
use crate::epiweek::{Epiweek, Season};
use crate::error::{NowcastError, Result};
use crate::estimation::filters::kalman::{KalmanFilterEngine, KalmanParams};
use crate::estimation::fusion::fuse;
use crate::estimation::noise::NoiseEstimator;
use crate::estimation::StateEstimator;
use crate::messages::{FilterInput, FusedObservation, SensorObservation};
use crate::regression::equivalence::{SeasonInputs, WeekInputs};
use crate::regression::training::TrainingSet;
use crate::regression::{default_estimators, AlternativeEstimator, EstimationContext};
use crate::types::Region;

mod report;

pub use report::{BacktestReport, Gap, GapReason, NowcastRecord, SeasonSummary, FUSION, KALMAN};

/// Runs the filter and every alternative estimator over an epiweek range.
///
/// The table and config are only read, so regions run in parallel.
#[derive(Debug, Clone)]
pub struct BacktestRunner<'a> {
    config: &'a NowcastConfig,
    table: &'a SensorTable,
    estimators: Vec<Box<dyn AlternativeEstimator>>,
}

impl<'a> BacktestRunner<'a> {
    /// A runner with the default comparison set.
    pub fn new(config: &'a NowcastConfig, table: &'a SensorTable) -> Self {
        Self::with_estimators(config, table, default_estimators())
    }

    pub fn with_estimators(
        config: &'a NowcastConfig,
        table: &'a SensorTable,
        estimators: Vec<Box<dyn AlternativeEstimator>>,
    ) -> Self {
        Self {
            config,
            table,
            estimators,
        }
    }

    pub fn run(&self, start: Epiweek, end: Epiweek) -> Result<BacktestReport> {
        if start > end {
            return Err(NowcastError::InvertedRange { start, end });
        }
        let weeks: Vec<Epiweek> = Epiweek::range_inclusive(start, end)
            .filter(|w| w.is_in_season())
            .collect();
        let mut seen = BTreeSet::new();
        let regions: Vec<&Region> = self
            .config
            .regions
            .iter()
            .filter(|r| seen.insert(*r))
            .filter(|r| {
                // Off-season readings are never used, so they do not count.
                let has_data = weeks.iter().any(|w| self.table.has_readings_in(r, *w, *w));
                if !has_data {
                    warn!("No in-season sensor readings for {} in {}..={}, skipping region", r, start, end);
                }
                has_data
            })
            .collect();
        if weeks.is_empty() || regions.is_empty() {
            return Err(NowcastError::EmptyRange { start, end });
        }

        info!(
            "Backtest {}..={}: {} in-season weeks, {} regions, {} alternative estimators",
            start,
            end,
            weeks.len(),
            regions.len(),
            self.estimators.len()
        );

        let parts = regions
            .par_iter()
            .map(|region| self.run_region(region, &weeks))
            .collect::<Result<Vec<_>>>()?;

        let mut report = BacktestReport::default();
        for part in parts {
            report.merge(part);
        }
        report.sort();
        info!(
            "Backtest finished: {} records, {} gaps, {} seasons",
            report.records.len(),
            report.gaps.len(),
            report.seasons.len()
        );
        Ok(report)
    }

    fn run_region(&self, region: &Region, weeks: &[Epiweek]) -> Result<BacktestReport> {
        let mut report = BacktestReport::default();
        let mut rest = weeks;
        while let Some(first) = rest.first() {
            // Off-season weeks are already gone, so a season is a contiguous run.
            let season = first.season();
            let len = rest.iter().take_while(|w| w.season() == season).count();
            let (run, tail) = rest.split_at(len);
            if let Some(season) = season {
                self.run_season(region, season, run, &mut report)?;
            }
            rest = tail;
        }
        Ok(report)
    }

    /// One fresh filter over the in-season `weeks` of `season`.
    fn run_season(&self, region: &Region, season: Season, weeks: &[Epiweek], report: &mut BacktestReport) -> Result<()> {
        let cfg = &self.config.filter;
        let mut engine = KalmanFilterEngine::new(KalmanParams::from(cfg));
        let mut inputs: Option<SeasonInputs> = None;
        let mut observed_weeks = 0;

        for &week in weeks {
            let observations = self.observations(region, week, report);
            let fused = fuse(&observations);

            if inputs.is_none() {
                let mean = match fused {
                    Some(f) if cfg.prior_from_first_observation => f.mean,
                    _ => cfg.prior_mean,
                };
                engine
                    .process(&FilterInput::Initialize {
                        epiweek: week,
                        mean,
                        variance: cfg.prior_variance,
                    })
                    .map_err(|e| e.at(region, week))?;
                info!("{} {}: filter started at {}", region, season, week);
                inputs = Some(SeasonInputs::new(mean, cfg.prior_variance, cfg.process_noise));
            }

            let posterior = engine
                .process(&FilterInput::Week {
                    epiweek: week,
                    observation: fused.as_ref(),
                })
                .map_err(|e| e.at(region, week))?;
            if let Some(state) = posterior {
                report.records.push(NowcastRecord {
                    region: region.clone(),
                    epiweek: week,
                    method: KALMAN.to_string(),
                    estimate: state.mean,
                    variance: Some(state.variance),
                    lambda: None,
                });
            }
            match fused {
                Some(FusedObservation { mean, variance, .. }) => {
                    observed_weeks += 1;
                    report.records.push(NowcastRecord {
                        region: region.clone(),
                        epiweek: week,
                        method: FUSION.to_string(),
                        estimate: mean,
                        variance: Some(variance),
                        lambda: None,
                    });
                }
                None => {
                    debug!("{} @ {}: no observation, prediction only", region, week);
                    report.gaps.push(Gap {
                        region: region.clone(),
                        epiweek: week,
                        sensor: None,
                        reason: GapReason::NoObservation,
                    });
                }
            }

            if let Some(season_inputs) = inputs.as_mut() {
                season_inputs.weeks.push(WeekInputs {
                    epiweek: week,
                    observations,
                });
                self.run_alternatives(region, week, season_inputs, report);
            }
        }

        let (Some(&first_week), Some(&last_week)) = (weeks.first(), weeks.last()) else {
            return Ok(());
        };
        let final_state = engine
            .process(&FilterInput::EndOfSeason)
            .map_err(|e| e.at(region, last_week))?;
        if let Some(state) = final_state {
            info!(
                "{} {}: finalized at {} with ({:.4}, {:.4})",
                region, season, last_week, state.mean, state.variance
            );
        }
        report.seasons.push(SeasonSummary {
            region: region.clone(),
            season,
            first_week,
            last_week,
            weeks: weeks.len(),
            observed_weeks,
            final_state,
        });
        Ok(())
    }

    /// This week's usable sensors with their variances, as known at `week`.
    /// Anything left out is recorded as a gap.
    fn observations(&self, region: &Region, week: Epiweek, report: &mut BacktestReport) -> Vec<SensorObservation> {
        let mut readings = Vec::new();
        for sensor in &self.config.sensors {
            let Some(value) = self.table.reading_as_of(region, sensor, week, week) else {
                continue;
            };
            if value.is_finite() {
                readings.push((sensor.clone(), value));
            } else {
                debug!("{} @ {}: malformed reading {} for '{}'", region, week, value, sensor);
                report.gaps.push(Gap {
                    region: region.clone(),
                    epiweek: week,
                    sensor: Some(sensor.clone()),
                    reason: GapReason::MalformedReading { value },
                });
            }
        }

        let sensors: Vec<_> = readings.iter().map(|(s, _)| s.clone()).collect();
        let mut profile = NoiseEstimator::new(self.table, &self.config.noise).profile(region, week, &sensors);
        for fallback in std::mem::take(&mut profile.fallbacks) {
            report.gaps.push(Gap {
                region: region.clone(),
                epiweek: week,
                sensor: Some(fallback.sensor),
                reason: GapReason::InsufficientHistory {
                    fallback: fallback.applied,
                    cause: fallback.reason,
                },
            });
        }

        readings
            .into_iter()
            .filter_map(|(sensor, value)| {
                let variance = profile.variance(&sensor)?;
                Some(SensorObservation {
                    sensor,
                    value,
                    variance,
                })
            })
            .collect()
    }

    fn run_alternatives(&self, region: &Region, week: Epiweek, season: &SeasonInputs, report: &mut BacktestReport) {
        if self.estimators.is_empty() {
            return;
        }
        let training = TrainingSet::build(self.table, region, week, &self.config.sensors, &self.config.regression);
        let ctx = EstimationContext {
            region,
            epiweek: week,
            season,
            training: training.as_ref(),
            config: &self.config.regression,
        };

        for estimator in &self.estimators {
            match estimator.estimate(&ctx) {
                Ok(Some(estimate)) => {
                    if estimate.ill_conditioned {
                        debug!("{} @ {}: '{}' solved an ill-conditioned system", region, week, estimator.key());
                    }
                    report.records.push(NowcastRecord {
                        region: region.clone(),
                        epiweek: week,
                        method: estimator.key().to_string(),
                        estimate: estimate.value,
                        variance: estimate.variance,
                        lambda: estimate.lambda,
                    });
                }
                Ok(None) => {}
                Err(cause) => {
                    warn!("{} @ {}: '{}' failed: {}", region, week, estimator.key(), cause);
                    report.gaps.push(Gap {
                        region: region.clone(),
                        epiweek: week,
                        sensor: None,
                        reason: GapReason::EstimatorFailed {
                            method: estimator.key().to_string(),
                            cause,
                        },
                    });
                }
            }
        }
    }
}
