// nowcast_core/src/config.rs

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use crate::error::{NowcastError, Result};
use crate::types::{Region, SensorId};

// =========================================================================
// == Top-Level Configuration ==
// =========================================================================

/// # NowcastConfig
/// Everything a backtest run needs besides the data itself. Loaded once per
/// run (the CLI uses figment over a TOML file) and then only read.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)] // Fail if the TOML has fields not in our struct
pub struct NowcastConfig {
    /// Regions to estimate. Each one runs independently.
    #[serde(default = "default_regions")]
    pub regions: Vec<Region>,

    /// Sensors to fuse, in column order.
    #[serde(default = "default_sensors")]
    pub sensors: Vec<SensorId>,

    #[serde(default)]
    pub filter: FilterConfig,

    #[serde(default)]
    pub noise: NoiseConfig,

    #[serde(default)]
    pub regression: RegressionConfig,
}

impl Default for NowcastConfig {
    fn default() -> Self {
        Self {
            regions: default_regions(),
            sensors: default_sensors(),
            filter: FilterConfig::default(),
            noise: NoiseConfig::default(),
            regression: RegressionConfig::default(),
        }
    }
}

fn default_regions() -> Vec<Region> {
    ["pa", "va", "nc", "sc", "wv", "hhs3", "hhs4", "nat"]
        .into_iter()
        .map(Region::from)
        .collect()
}

fn default_sensors() -> Vec<SensorId> {
    vec![SensorId::from("sar3"), SensorId::from("epic")]
}

// =========================================================================
// == Configuration Sub-Structs ==
// =========================================================================

/// Prior and process-noise parameters of the scalar random-walk filter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct FilterConfig {
    /// Mean of the state at the first in-season week, before its update.
    pub prior_mean: f64,
    pub prior_variance: f64,
    /// Use the first week's fused observation as the prior mean instead of
    /// `prior_mean`. Falls back to `prior_mean` when that week has no data.
    pub prior_from_first_observation: bool,
    /// Q: variance of the weekly random-walk perturbation.
    pub process_noise: f64,
    /// Below this, `prior_variance + fused_variance` is treated as degenerate.
    pub epsilon: f64,
    /// Added to a degenerate gain denominator.
    pub stability_ridge: f64,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            prior_mean: 1.0,
            prior_variance: 1.0,
            prior_from_first_observation: false,
            process_noise: 0.1,
            epsilon: 1e-12,
            stability_ridge: 1e-9,
        }
    }
}

/// What to do with a sensor whose noise variance cannot be estimated.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum NoiseFallback {
    /// Use this variance for the week.
    Default { variance: f64 },
    /// Leave the sensor out of that week's fusion.
    Exclude,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct NoiseConfig {
    /// Length of the trailing training window, in weeks.
    pub window_weeks: u32,
    /// Fewer valid residuals than this is `InsufficientHistory`.
    pub min_residuals: usize,
    pub variance_floor: f64,
    pub fallback: NoiseFallback,
    /// Pre-fit variances. Sensors listed here skip estimation entirely.
    pub fixed: BTreeMap<SensorId, f64>,
}

impl Default for NoiseConfig {
    fn default() -> Self {
        Self {
            window_weeks: 156, // three years
            min_residuals: 3,
            variance_floor: 1e-6,
            fallback: NoiseFallback::Exclude,
            fixed: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct RegressionConfig {
    /// Candidate λ values for the cross-validated L2 methods.
    pub ridge_grid: Vec<f64>,
    /// Candidate λ values for the cross-validated L1 methods.
    pub lasso_grid: Vec<f64>,
    /// Number of trailing one-week-ahead folds used to pick λ.
    pub cv_weeks: usize,
    /// Length of the regression training window, in weeks.
    pub training_weeks: u32,
    /// Earliest week any training window may reach back to (`YYYYWW`).
    pub first_training_epiweek: u32,
    /// Diagonal loading used when a normal-equation solve is singular.
    pub singular_ridge: f64,
    /// Reciprocal condition numbers below this are reported as ill-conditioned.
    pub condition_warning: f64,
}

impl Default for RegressionConfig {
    fn default() -> Self {
        Self {
            ridge_grid: default_ridge_grid(),
            lasso_grid: default_lasso_grid(),
            cv_weeks: 10,
            training_weeks: 156,
            first_training_epiweek: 201045,
            singular_ridge: 1e-8,
            condition_warning: 1e-10,
        }
    }
}

/// 20 log-spaced values in [10, 300] plus 1e-6, 350 and 400, ascending.
pub fn default_ridge_grid() -> Vec<f64> {
    let (lo, hi) = (10f64.ln(), 300f64.ln());
    let n = 20;
    let mut grid: Vec<f64> = (0..n)
        .map(|i| (lo + (hi - lo) * i as f64 / (n - 1) as f64).exp())
        .collect();
    grid.extend([1e-6, 350.0, 400.0]);
    grid.sort_by(f64::total_cmp);
    grid
}

/// 15 values `e^s - 1 + 1e-6` for `s` evenly spaced in [0, ln 2.5], plus
/// 0.001, 0.005, 0.01 and 2, ascending.
pub fn default_lasso_grid() -> Vec<f64> {
    let hi = 2.5f64.ln();
    let n = 15;
    let mut grid: Vec<f64> = (0..n)
        .map(|i| (hi * i as f64 / (n - 1) as f64).exp() - 1.0 + 1e-6)
        .collect();
    grid.extend([0.001, 0.005, 0.01, 2.0]);
    grid.sort_by(f64::total_cmp);
    grid
}

impl NowcastConfig {
    /// Rejects configurations no run could succeed with.
    pub fn validate(&self) -> Result<()> {
        let invalid = |msg: String| Err(NowcastError::InvalidConfig(msg));

        if self.regions.is_empty() {
            return invalid("no regions configured".into());
        }
        if self.sensors.is_empty() {
            return invalid("no sensors configured".into());
        }
        if let Some(region) = first_duplicate(&self.regions) {
            return invalid(format!("region '{region}' is listed more than once"));
        }
        if let Some(sensor) = first_duplicate(&self.sensors) {
            return invalid(format!("sensor '{sensor}' is listed more than once"));
        }

        let f = &self.filter;
        if !(f.prior_variance.is_finite() && f.prior_variance > 0.0) {
            return invalid(format!("prior_variance must be > 0, got {}", f.prior_variance));
        }
        if !(f.process_noise.is_finite() && f.process_noise > 0.0) {
            return invalid(format!("process_noise must be > 0, got {}", f.process_noise));
        }
        if !f.prior_mean.is_finite() {
            return invalid("prior_mean must be finite".into());
        }
        if f.epsilon < 0.0 || f.stability_ridge <= 0.0 {
            return invalid("epsilon must be >= 0 and stability_ridge > 0".into());
        }

        let n = &self.noise;
        if n.window_weeks == 0 || n.min_residuals == 0 {
            return invalid("noise window and min_residuals must be positive".into());
        }
        if !(n.variance_floor > 0.0) {
            return invalid(format!("variance_floor must be > 0, got {}", n.variance_floor));
        }
        if let NoiseFallback::Default { variance } = n.fallback {
            if !(variance.is_finite() && variance > 0.0) {
                return invalid(format!("fallback variance must be > 0, got {variance}"));
            }
        }
        if let Some((sensor, v)) = n.fixed.iter().find(|(_, v)| !(v.is_finite() && **v > 0.0)) {
            return invalid(format!("fixed variance for '{sensor}' must be > 0, got {v}"));
        }

        let r = &self.regression;
        for (name, grid) in [("ridge_grid", &r.ridge_grid), ("lasso_grid", &r.lasso_grid)] {
            if grid.is_empty() {
                return invalid(format!("{name} is empty"));
            }
            if grid.iter().any(|l| !(l.is_finite() && *l >= 0.0)) {
                return invalid(format!("{name} values must be finite and >= 0"));
            }
        }
        if r.cv_weeks == 0 || r.training_weeks == 0 {
            return invalid("cv_weeks and training_weeks must be positive".into());
        }
        if r.singular_ridge <= 0.0 {
            return invalid("singular_ridge must be > 0".into());
        }
        crate::epiweek::Epiweek::from_code(r.first_training_epiweek)?;
        Ok(())
    }
}

fn first_duplicate<T: Ord>(items: &[T]) -> Option<&T> {
    let mut seen = BTreeSet::new();
    items.iter().find(|item| !seen.insert(*item))
}
