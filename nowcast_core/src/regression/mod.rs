// nowcast_core/src/regression/mod.rs

//! Regression-based estimators that run alongside the filter.
//!
//! Each one implements [`AlternativeEstimator`] and sees exactly the causal
//! inputs the filter saw for the week. New comparators (a tree ensemble on
//! raw sources, say) plug in through the same trait without touching the
//! filter core.

use dyn_clone::DynClone;
use std::fmt::Debug;

use crate::config::RegressionConfig;
use crate::epiweek::Epiweek;
use crate::error::{NowcastError, Result};
use crate::types::Region;

pub mod equivalence;
pub mod lasso;
pub mod ridge;
pub mod training;

use equivalence::{kalman_equivalent, SeasonInputs};
use lasso::{constrained_lasso, lasso};
use ridge::{constrained_ridge, ridge, SolveOptions};
use training::{select_lambda, Fitter, TrainingSet};

/// What an estimator gets to look at for one (region, week).
#[derive(Debug, Clone, Copy)]
pub struct EstimationContext<'a> {
    pub region: &'a Region,
    pub epiweek: Epiweek,
    /// The season so far, including this week.
    pub season: &'a SeasonInputs,
    /// Historical training data, if any could be assembled.
    pub training: Option<&'a TrainingSet>,
    pub config: &'a RegressionConfig,
}

impl EstimationContext<'_> {
    pub fn solve_options(&self) -> SolveOptions {
        SolveOptions::from(self.config)
    }
}

/// One estimator's output for one week.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AlternativeEstimate {
    pub value: f64,
    pub variance: Option<f64>,
    /// The regularization actually used, if the method has one.
    pub lambda: Option<f64>,
    pub ill_conditioned: bool,
}

/// The contract for every estimator that is compared against the filter.
pub trait AlternativeEstimator: DynClone + Debug + Send + Sync {
    /// Method name used in output records. Must be unique within a run.
    fn key(&self) -> &str;

    /// `Ok(None)` means the method has nothing to say this week (no
    /// training data, no sensors); errors are recorded as gaps by the caller.
    fn estimate(&self, ctx: &EstimationContext) -> Result<Option<AlternativeEstimate>>;
}

dyn_clone::clone_trait_object!(AlternativeEstimator);

// --- Kalman-equivalent ridge ---

/// Solves the season-long ridge problem that reproduces the filter.
#[derive(Debug, Clone, Default)]
pub struct KalmanRidgeEquivalent;

impl AlternativeEstimator for KalmanRidgeEquivalent {
    fn key(&self) -> &str {
        "kf_ridge"
    }

    fn estimate(&self, ctx: &EstimationContext) -> Result<Option<AlternativeEstimate>> {
        if ctx.season.weeks.is_empty() {
            return Ok(None);
        }
        let fit = kalman_equivalent(ctx.season, &ctx.solve_options())?;
        Ok(Some(AlternativeEstimate {
            value: fit.final_value(),
            variance: Some(fit.final_variance),
            lambda: Some(fit.correspondence.lambda),
            ill_conditioned: fit.ill_conditioned,
        }))
    }
}

// --- Sensor regressions over the training window ---

/// How λ is chosen for a sensor regression.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum LambdaChoice {
    Fixed(f64),
    /// One-week-ahead validation over the configured grid.
    CrossValidated,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegressionKind {
    /// L2 penalty, weights free.
    Ridge,
    /// L2 penalty, weights sum to one.
    Constrained,
    /// L1 penalty, weights free.
    Lasso,
    /// L1 penalty, weights sum to one.
    ConstrainedLasso,
}

impl RegressionKind {
    fn fitter(self) -> Fitter {
        match self {
            RegressionKind::Ridge => ridge,
            RegressionKind::Constrained => constrained_ridge,
            RegressionKind::Lasso => lasso,
            RegressionKind::ConstrainedLasso => constrained_lasso,
        }
    }

    /// The λ grid searched when validating this kind.
    fn grid(self, config: &RegressionConfig) -> &[f64] {
        match self {
            RegressionKind::Ridge | RegressionKind::Constrained => &config.ridge_grid,
            RegressionKind::Lasso | RegressionKind::ConstrainedLasso => &config.lasso_grid,
        }
    }
}

/// Regresses truth on this week's sensors using the training window.
#[derive(Debug, Clone)]
pub struct SensorRegression {
    key: String,
    kind: RegressionKind,
    lambda: LambdaChoice,
}

impl SensorRegression {
    pub fn new(key: impl Into<String>, kind: RegressionKind, lambda: LambdaChoice) -> Self {
        Self {
            key: key.into(),
            kind,
            lambda,
        }
    }

    /// Unregularized fusion-constrained regression.
    pub fn sf() -> Self {
        Self::new("sf", RegressionKind::Constrained, LambdaChoice::Fixed(0.0))
    }

    /// Fusion-constrained ridge with λ picked by validation.
    pub fn sf_l2() -> Self {
        Self::new("sf_l2", RegressionKind::Constrained, LambdaChoice::CrossValidated)
    }

    /// Unregularized least squares.
    pub fn reg() -> Self {
        Self::new("reg", RegressionKind::Ridge, LambdaChoice::Fixed(0.0))
    }

    pub fn ridge() -> Self {
        Self::new("ridge", RegressionKind::Ridge, LambdaChoice::CrossValidated)
    }

    /// Fusion-constrained lasso with λ picked by validation.
    pub fn sf_l1() -> Self {
        Self::new("sf_l1", RegressionKind::ConstrainedLasso, LambdaChoice::CrossValidated)
    }

    pub fn lasso() -> Self {
        Self::new("lasso", RegressionKind::Lasso, LambdaChoice::CrossValidated)
    }
}

impl AlternativeEstimator for SensorRegression {
    fn key(&self) -> &str {
        &self.key
    }

    fn estimate(&self, ctx: &EstimationContext) -> Result<Option<AlternativeEstimate>> {
        let Some(training) = ctx.training else {
            return Ok(None);
        };
        let opts = ctx.solve_options();
        let fitter = self.kind.fitter();

        let lambda = match self.lambda {
            LambdaChoice::Fixed(l) => l,
            LambdaChoice::CrossValidated => {
                let grid = self.kind.grid(ctx.config);
                select_lambda(training, grid, ctx.config.cv_weeks, fitter, &opts).lambda
            }
        };

        let fit = fitter(&training.z, &training.x, lambda, &opts)?;
        let value = fit.predict(&training.current);
        if !value.is_finite() {
            return Err(NowcastError::SingularSystem(training.sensors.len()));
        }
        Ok(Some(AlternativeEstimate {
            value,
            variance: None,
            lambda: Some(lambda),
            ill_conditioned: fit.ill_conditioned,
        }))
    }
}

/// The full comparison set: `kf_ridge`, `sf`, `reg`, then the
/// cross-validated `sf_l2`, `sf_l1`, `ridge` and `lasso`.
pub fn default_estimators() -> Vec<Box<dyn AlternativeEstimator>> {
    vec![
        Box::new(KalmanRidgeEquivalent),
        Box::new(SensorRegression::sf()),
        Box::new(SensorRegression::reg()),
        Box::new(SensorRegression::sf_l2()),
        Box::new(SensorRegression::sf_l1()),
        Box::new(SensorRegression::ridge()),
        Box::new(SensorRegression::lasso()),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::SensorObservation;
    use crate::types::SensorId;
    use approx::assert_abs_diff_eq;
    use super::equivalence::WeekInputs;
    use nalgebra::{DMatrix, DVector};
    use std::collections::HashSet;

    fn ew(code: u32) -> Epiweek {
        Epiweek::from_code(code).unwrap()
    }

    fn golden_season() -> SeasonInputs {
        let mut season = SeasonInputs::new(1.0, 1.0, 0.1);
        for (t, (a, b)) in [1.0, 2.0, 3.0, 4.0, 5.0]
            .into_iter()
            .zip([1.2, 2.1, 2.9, 4.2, 4.8])
            .enumerate()
        {
            season.weeks.push(WeekInputs {
                epiweek: ew(201545).add_weeks(t as i64).unwrap(),
                observations: vec![SensorObservation::new("a", a, 1.0), SensorObservation::new("b", b, 4.0)],
            });
        }
        season
    }

    /// Sensor "a" tracks truth exactly, "b" is a scaled copy.
    fn training() -> TrainingSet {
        let n = 20;
        let x = DVector::from_fn(n, |i, _| 2.0 + (i as f64 * 0.5).cos());
        let z = DMatrix::from_fn(n, 2, |i, j| if j == 0 { x[i] } else { 0.5 * x[i] });
        TrainingSet {
            reference: ew(201610),
            sensors: vec![SensorId::from("a"), SensorId::from("b")],
            weeks: (0..n).map(|i| ew(201520).add_weeks(i as i64).unwrap()).collect(),
            z,
            x,
            current: DVector::from_vec(vec![3.0, 1.5]),
        }
    }

    fn ctx<'a>(
        region: &'a Region,
        season: &'a SeasonInputs,
        training: Option<&'a TrainingSet>,
        config: &'a RegressionConfig,
    ) -> EstimationContext<'a> {
        EstimationContext {
            region,
            epiweek: ew(201549),
            season,
            training,
            config,
        }
    }

    #[test]
    fn test_kf_ridge_reproduces_golden_filter() {
        let (region, season, config) = (Region::from("pa"), golden_season(), RegressionConfig::default());
        let est = KalmanRidgeEquivalent
            .estimate(&ctx(&region, &season, None, &config))
            .unwrap()
            .unwrap();
        assert_abs_diff_eq!(est.value, 3.3475446107442814, epsilon = 1e-9);
        assert_abs_diff_eq!(est.variance.unwrap(), 0.2465082821948933, epsilon = 1e-9);
        assert!(!est.ill_conditioned);
    }

    #[test]
    fn test_sensor_regressions_recover_exact_sensor() {
        let (region, season, config) = (Region::from("pa"), golden_season(), RegressionConfig::default());
        let training = training();
        let c = ctx(&region, &season, Some(&training), &config);

        let sf = SensorRegression::sf().estimate(&c).unwrap().unwrap();
        assert_abs_diff_eq!(sf.value, 3.0, epsilon = 1e-4);
        assert_eq!(sf.lambda, Some(0.0));

        let sf_l2 = SensorRegression::sf_l2().estimate(&c).unwrap().unwrap();
        assert!(config.ridge_grid.contains(&sf_l2.lambda.unwrap()));
        assert!(sf_l2.value.is_finite());
        assert!(sf_l2.variance.is_none());
    }

    #[test]
    fn test_l1_regressions_search_the_lasso_grid() {
        let (region, season, config) = (Region::from("pa"), golden_season(), RegressionConfig::default());
        let training = training();
        let c = ctx(&region, &season, Some(&training), &config);

        for estimator in [SensorRegression::sf_l1(), SensorRegression::lasso()] {
            let est = estimator.estimate(&c).unwrap().unwrap();
            let lambda = est.lambda.unwrap();
            assert!(config.lasso_grid.contains(&lambda), "{} picked {}", estimator.key(), lambda);
            // Sensor "a" is exact, so the chosen fit still lands near truth.
            assert_abs_diff_eq!(est.value, 3.0, epsilon = 0.1);
        }
    }

    #[test]
    fn test_sensor_regression_without_training_is_silent() {
        let (region, season, config) = (Region::from("pa"), golden_season(), RegressionConfig::default());
        let c = ctx(&region, &season, None, &config);
        assert_eq!(SensorRegression::ridge().estimate(&c).unwrap(), None);
    }

    #[test]
    fn test_default_estimators_have_unique_keys_and_clone() {
        let estimators = default_estimators();
        let keys: HashSet<&str> = estimators.iter().map(|e| e.key()).collect();
        assert_eq!(keys.len(), 7);
        assert!(keys.contains("sf_l1") && keys.contains("lasso"));
        let cloned = estimators.clone();
        assert_eq!(cloned[3].key(), "sf_l2");
    }
}
