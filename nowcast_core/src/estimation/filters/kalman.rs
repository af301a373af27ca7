// nowcast_core/src/estimation/filters/kalman.rs

use serde::Serialize;
use tracing::debug;

use crate::config::FilterConfig;
use crate::epiweek::Epiweek;
use crate::error::{NowcastError, Result};
use crate::estimation::kalman::{kalman_predict, kalman_update, GainParams, StateEstimate};
use crate::estimation::StateEstimator;
use crate::messages::{FilterInput, FusedObservation, SensorObservation};

/// Lifecycle of one (region, season) filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum FilterPhase {
    Uninitialized,
    Running,
    Finalized,
}

/// Parameters of the random-walk model.
#[derive(Debug, Clone, Copy)]
pub struct KalmanParams {
    /// Q, added to the variance on every predict.
    pub process_noise: f64,
    pub gain: GainParams,
}

impl From<&FilterConfig> for KalmanParams {
    fn from(cfg: &FilterConfig) -> Self {
        Self {
            process_noise: cfg.process_noise,
            gain: GainParams {
                epsilon: cfg.epsilon,
                ridge: cfg.stability_ridge,
            },
        }
    }
}

/// A scalar Kalman filter over a single season.
///
/// Each in-season week gets exactly one posterior, in order and without gaps.
/// The first week's prior comes from `initialize`; later priors come from
/// predicting the previous posterior forward by one week.
#[derive(Debug, Clone)]
pub struct KalmanFilterEngine {
    params: KalmanParams,
    phase: FilterPhase,
    /// The initial prior until the first week is stepped, then the latest posterior.
    current: Option<StateEstimate>,
    /// Emitted posteriors, one per week.
    trajectory: Vec<StateEstimate>,
}

impl KalmanFilterEngine {
    pub fn new(params: KalmanParams) -> Self {
        Self {
            params,
            phase: FilterPhase::Uninitialized,
            current: None,
            trajectory: Vec::new(),
        }
    }

    pub fn params(&self) -> &KalmanParams {
        &self.params
    }

    /// Emitted posteriors so far, oldest first.
    pub fn trajectory(&self) -> &[StateEstimate] {
        &self.trajectory
    }

    /// `Uninitialized -> Running`. `mean`/`variance` describe the state of
    /// `epiweek` before its own observation is fused.
    pub fn initialize(&mut self, epiweek: Epiweek, mean: f64, variance: f64) -> Result<StateEstimate> {
        if self.phase != FilterPhase::Uninitialized {
            return Err(self.invalid("initialize"));
        }
        if !(mean.is_finite() && variance.is_finite() && variance >= 0.0) {
            return Err(NowcastError::InvalidConfig(format!(
                "prior must be finite with non-negative variance, got ({mean}, {variance})"
            )));
        }
        let prior = StateEstimate {
            epiweek,
            mean,
            variance,
        };
        self.current = Some(prior);
        self.phase = FilterPhase::Running;
        debug!("Filter initialized at {} with prior ({}, {})", epiweek, mean, variance);
        Ok(prior)
    }

    /// Predict into `epiweek`, then fuse `observation` if there is one.
    /// Without an observation the prior becomes the posterior unchanged.
    pub fn step(&mut self, epiweek: Epiweek, observation: Option<&FusedObservation>) -> Result<StateEstimate> {
        let prior = self.predict(epiweek)?;
        let posterior = match observation {
            Some(obs) => self.update(&prior, obs),
            None => prior,
        };
        Ok(self.commit(posterior))
    }

    /// Like `step`, but folds the sensors into the filter one at a time
    /// instead of fusing them first. The result matches `step` on the fused
    /// observation up to rounding.
    pub fn step_sequential(&mut self, epiweek: Epiweek, observations: &[SensorObservation]) -> Result<StateEstimate> {
        let mut state = self.predict(epiweek)?;
        for obs in observations
            .iter()
            .filter(|o| o.value.is_finite() && o.variance.is_finite() && o.variance > 0.0)
        {
            let single = FusedObservation {
                mean: obs.value,
                variance: obs.variance,
                sensors: 1,
            };
            state = self.update(&state, &single);
        }
        Ok(self.commit(state))
    }

    /// `Running -> Finalized`. Returns the last posterior, if any week was stepped.
    pub fn finalize(&mut self) -> Result<Option<StateEstimate>> {
        if self.phase != FilterPhase::Running {
            return Err(self.invalid("finalize"));
        }
        self.phase = FilterPhase::Finalized;
        Ok(self.trajectory.last().copied())
    }

    // --- Private Helper Methods for the Kalman Algorithm ---

    /// The internal "predict" step: the prior for `epiweek`.
    fn predict(&self, epiweek: Epiweek) -> Result<StateEstimate> {
        if self.phase != FilterPhase::Running {
            return Err(self.invalid("step"));
        }
        let current = self.current.ok_or_else(|| self.invalid("step"))?;

        // Nothing emitted yet: `current` is already the prior of the first week.
        let expected = if self.trajectory.is_empty() {
            current.epiweek
        } else {
            current.epiweek.next()?
        };
        if epiweek != expected {
            return Err(NowcastError::NonContiguousWeek {
                expected,
                got: epiweek,
            });
        }

        if self.trajectory.is_empty() {
            Ok(current)
        } else {
            Ok(kalman_predict(&current, self.params.process_noise, epiweek))
        }
    }

    /// The internal "update" step.
    fn update(&self, prior: &StateEstimate, observation: &FusedObservation) -> StateEstimate {
        kalman_update(prior, observation, &self.params.gain)
    }

    fn commit(&mut self, posterior: StateEstimate) -> StateEstimate {
        self.current = Some(posterior);
        self.trajectory.push(posterior);
        posterior
    }

    fn invalid(&self, operation: &'static str) -> NowcastError {
        NowcastError::InvalidStateTransition {
            phase: self.phase,
            operation,
        }
    }
}

// --- The Public Trait Implementation ---
impl StateEstimator for KalmanFilterEngine {
    fn process(&mut self, input: &FilterInput) -> Result<Option<StateEstimate>> {
        match *input {
            FilterInput::Initialize {
                epiweek,
                mean,
                variance,
            } => self.initialize(epiweek, mean, variance).map(|_| None),
            FilterInput::Week {
                epiweek,
                observation,
            } => self.step(epiweek, observation).map(Some),
            FilterInput::EndOfSeason => self.finalize(),
        }
    }

    fn get_state(&self) -> Option<&StateEstimate> {
        self.current.as_ref()
    }

    fn phase(&self) -> FilterPhase {
        self.phase
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::estimation::fusion::fuse;
    use approx::{assert_abs_diff_eq, assert_relative_eq};

    fn params(q: f64) -> KalmanParams {
        KalmanParams {
            process_noise: q,
            gain: GainParams::default(),
        }
    }

    fn weeks(start: u32, n: usize) -> Vec<Epiweek> {
        let start = Epiweek::from_code(start).unwrap();
        (0..n).map(|i| start.add_weeks(i as i64).unwrap()).collect()
    }

    #[test]
    fn test_golden_two_sensor_season() {
        let a = [1.0, 2.0, 3.0, 4.0, 5.0];
        let b = [1.2, 2.1, 2.9, 4.2, 4.8];
        let expected_mean = [
            1.0222222222222221,
            1.426280991735537,
            1.9644699527346388,
            2.6294062983995867,
            3.3475446107442814,
        ];
        let expected_var = [
            0.4444444444444444,
            0.3239669421487603,
            0.27711006076975014,
            0.25629553146331674,
            0.2465082821948933,
        ];

        let ws = weeks(201545, 5);
        let mut kf = KalmanFilterEngine::new(params(0.1));
        kf.initialize(ws[0], 1.0, 1.0).unwrap();
        for (t, ew) in ws.iter().enumerate() {
            let fused = fuse(&[
                SensorObservation::new("a", a[t], 1.0),
                SensorObservation::new("b", b[t], 4.0),
            ]);
            let post = kf.step(*ew, fused.as_ref()).unwrap();
            assert_abs_diff_eq!(post.mean, expected_mean[t], epsilon = 1e-12);
            assert_abs_diff_eq!(post.variance, expected_var[t], epsilon = 1e-12);
            assert_eq!(post.epiweek, *ew);
        }
        assert_eq!(kf.trajectory().len(), 5);
    }

    #[test]
    fn test_missing_week_is_pure_prediction() {
        let ws = weeks(201545, 2);
        let mut kf = KalmanFilterEngine::new(params(0.25));
        kf.initialize(ws[0], 3.0, 1.0).unwrap();
        let obs = FusedObservation {
            mean: 4.0,
            variance: 1.0,
            sensors: 1,
        };
        let first = kf.step(ws[0], Some(&obs)).unwrap();
        let second = kf.step(ws[1], None).unwrap();

        assert_eq!(second.mean, first.mean);
        assert_abs_diff_eq!(second.variance, first.variance + 0.25, epsilon = 1e-15);
        assert!(second.variance > first.variance);
    }

    #[test]
    fn test_sequential_matches_joint_fusion() {
        let ws = weeks(201601, 3);
        let readings = [
            vec![SensorObservation::new("a", 10.0, 4.0), SensorObservation::new("b", 20.0, 4.0)],
            vec![
                SensorObservation::new("a", 11.0, 0.5),
                SensorObservation::new("b", 13.5, 3.0),
                SensorObservation::new("c", 12.2, 1.7),
            ],
            vec![SensorObservation::new("b", 9.0, 2.0)],
        ];

        let mut joint = KalmanFilterEngine::new(params(0.3));
        let mut sequential = KalmanFilterEngine::new(params(0.3));
        joint.initialize(ws[0], 0.0, 1.0).unwrap();
        sequential.initialize(ws[0], 0.0, 1.0).unwrap();

        for (ew, obs) in ws.iter().zip(&readings) {
            let j = joint.step(*ew, fuse(obs).as_ref()).unwrap();
            let s = sequential.step_sequential(*ew, obs).unwrap();
            assert_relative_eq!(j.mean, s.mean, max_relative = 1e-9);
            assert_relative_eq!(j.variance, s.variance, max_relative = 1e-9);
        }
    }

    #[test]
    fn test_finalized_filter_rejects_updates() {
        let ws = weeks(201550, 2);
        let mut kf = KalmanFilterEngine::new(params(0.1));
        kf.initialize(ws[0], 1.0, 1.0).unwrap();
        kf.step(ws[0], None).unwrap();
        let last = kf.finalize().unwrap();
        assert_eq!(last.map(|s| s.epiweek), Some(ws[0]));
        assert_eq!(kf.phase(), FilterPhase::Finalized);

        assert_eq!(
            kf.step(ws[1], None),
            Err(NowcastError::InvalidStateTransition {
                phase: FilterPhase::Finalized,
                operation: "step",
            })
        );
        assert!(kf.finalize().is_err());
        assert!(kf.initialize(ws[1], 0.0, 1.0).is_err());
    }

    #[test]
    fn test_uninitialized_filter_rejects_steps() {
        let mut kf = KalmanFilterEngine::new(params(0.1));
        let ew = Epiweek::from_code(201545).unwrap();
        assert!(matches!(
            kf.step(ew, None),
            Err(NowcastError::InvalidStateTransition {
                phase: FilterPhase::Uninitialized,
                ..
            })
        ));
        assert!(kf.get_state().is_none());
    }

    #[test]
    fn test_weeks_must_be_contiguous() {
        let ws = weeks(201545, 3);
        let mut kf = KalmanFilterEngine::new(params(0.1));
        kf.initialize(ws[0], 1.0, 1.0).unwrap();
        kf.step(ws[0], None).unwrap();
        assert_eq!(
            kf.step(ws[2], None),
            Err(NowcastError::NonContiguousWeek {
                expected: ws[1],
                got: ws[2],
            })
        );
        // Repeating a week is also a gap in the ordering.
        assert!(kf.step(ws[0], None).is_err());
    }

    #[test]
    fn test_process_drives_the_lifecycle() {
        let ew = Epiweek::from_code(201602).unwrap();
        let obs = FusedObservation {
            mean: 2.0,
            variance: 1.0,
            sensors: 2,
        };
        let mut kf = KalmanFilterEngine::new(params(0.1));
        assert_eq!(
            kf.process(&FilterInput::Initialize {
                epiweek: ew,
                mean: 0.0,
                variance: 1.0,
            }),
            Ok(None)
        );
        let post = kf
            .process(&FilterInput::Week {
                epiweek: ew,
                observation: Some(&obs),
            })
            .unwrap()
            .unwrap();
        assert_abs_diff_eq!(post.mean, 1.0, epsilon = 1e-12);
        assert_eq!(kf.process(&FilterInput::EndOfSeason), Ok(Some(post)));
        assert_eq!(kf.phase(), FilterPhase::Finalized);
    }
}
