// nowcast_core/src/regression/training.rs

use nalgebra::{DMatrix, DVector};

use crate::config::RegressionConfig;
use crate::data::SensorTable;
use crate::epiweek::Epiweek;
use crate::error::Result;
use crate::estimation::noise::training_window;
use crate::regression::ridge::{RidgeFit, SolveOptions};
use crate::types::{Region, SensorId};

/// Historical truth against sensor readings, as known at `reference`.
#[derive(Debug, Clone, PartialEq)]
pub struct TrainingSet {
    pub reference: Epiweek,
    /// Column order of `z` and `current`.
    pub sensors: Vec<SensorId>,
    /// Training weeks, one per row, oldest first.
    pub weeks: Vec<Epiweek>,
    /// Sensor readings, weeks x sensors, mean-imputed where missing.
    pub z: DMatrix<f64>,
    /// Ground truth per training week.
    pub x: DVector<f64>,
    /// This week's readings for the same sensors.
    pub current: DVector<f64>,
}

impl TrainingSet {
    /// Assembles the training data for estimating `reference` in `region`.
    ///
    /// A sensor is kept only if it has a reading this week and at least one
    /// historical reading; weeks without ground truth are dropped. Returns
    /// `None` if nothing is left.
    pub fn build(
        table: &SensorTable,
        region: &Region,
        reference: Epiweek,
        sensors: &[SensorId],
        config: &RegressionConfig,
    ) -> Option<Self> {
        let first = Epiweek::from_code(config.first_training_epiweek).ok();
        let weeks: Vec<Epiweek> = training_window(reference, config.training_weeks)
            .into_iter()
            .filter(|w| first.map_or(true, |f| *w >= f))
            .filter(|w| table.truth(region, *w).is_some_and(f64::is_finite))
            .collect();
        if weeks.is_empty() {
            return None;
        }

        let mut kept = Vec::new();
        let mut columns: Vec<Vec<Option<f64>>> = Vec::new();
        let mut current = Vec::new();
        for sensor in sensors {
            let Some(now) = table
                .reading_as_of(region, sensor, reference, reference)
                .filter(|v| v.is_finite())
            else {
                continue;
            };
            let history: Vec<Option<f64>> = weeks
                .iter()
                .map(|w| {
                    table
                        .reading_as_of(region, sensor, *w, reference)
                        .filter(|v| v.is_finite())
                })
                .collect();
            if history.iter().all(Option::is_none) {
                continue;
            }
            kept.push(sensor.clone());
            columns.push(history);
            current.push(now);
        }
        if kept.is_empty() {
            return None;
        }

        let z = DMatrix::from_fn(weeks.len(), kept.len(), |i, j| columns[j][i].unwrap_or(f64::NAN));
        let x = DVector::from_iterator(
            weeks.len(),
            weeks.iter().map(|w| table.truth(region, *w).unwrap_or(f64::NAN)),
        );
        Some(Self {
            reference,
            sensors: kept,
            weeks,
            z: mean_impute(z),
            x,
            current: DVector::from_vec(current),
        })
    }

    pub fn rows(&self) -> usize {
        self.z.nrows()
    }

    /// The first `n` rows as a separate training problem.
    fn head(&self, n: usize) -> (DMatrix<f64>, DVector<f64>) {
        (self.z.rows(0, n).into_owned(), self.x.rows(0, n).into_owned())
    }
}

/// Replaces each NaN with the mean of the finite values in its column.
pub fn mean_impute(mut z: DMatrix<f64>) -> DMatrix<f64> {
    for mut col in z.column_iter_mut() {
        let (sum, n) = col
            .iter()
            .filter(|v| v.is_finite())
            .fold((0.0, 0usize), |(s, n), v| (s + v, n + 1));
        if n == 0 {
            continue;
        }
        let mean = sum / n as f64;
        for v in col.iter_mut().filter(|v| !v.is_finite()) {
            *v = mean;
        }
    }
    z
}

/// A regression fitter: `(Z, x, λ) -> β`.
pub type Fitter = fn(&DMatrix<f64>, &DVector<f64>, f64, &SolveOptions) -> Result<RidgeFit>;

/// The outcome of the λ search.
#[derive(Debug, Clone, PartialEq)]
pub struct LambdaSelection {
    pub lambda: f64,
    /// Mean absolute one-week-ahead error per grid value (NaN if never scored).
    pub errors: Vec<f64>,
    pub folds: usize,
}

/// Picks λ by one-week-ahead validation on the last `cv_weeks` training
/// rows: for each such row, fit on every earlier row and score the absolute
/// error of predicting it. The smallest mean error wins; ties keep the
/// smaller λ. Without any usable fold, the first grid value is returned.
pub fn select_lambda(
    training: &TrainingSet,
    grid: &[f64],
    cv_weeks: usize,
    fitter: Fitter,
    opts: &SolveOptions,
) -> LambdaSelection {
    let n = training.rows();
    let mut totals = vec![0.0; grid.len()];
    let mut counts = vec![0usize; grid.len()];
    let mut folds = 0;

    for k in 1..=cv_weeks.min(n.saturating_sub(1)) {
        let held_out = n - k;
        let (z, x) = training.head(held_out);
        let row = training.z.row(held_out).transpose();
        folds += 1;
        for (g, lambda) in grid.iter().enumerate() {
            if let Ok(fit) = fitter(&z, &x, *lambda, opts) {
                let err = (fit.predict(&row) - training.x[held_out]).abs();
                if err.is_finite() {
                    totals[g] += err;
                    counts[g] += 1;
                }
            }
        }
    }

    let errors: Vec<f64> = totals
        .iter()
        .zip(&counts)
        .map(|(t, c)| if *c == 0 { f64::NAN } else { t / *c as f64 })
        .collect();

    let mut best: Option<(usize, f64)> = None;
    for (g, e) in errors.iter().enumerate() {
        if e.is_finite() && best.map_or(true, |(_, b)| *e < b) {
            best = Some((g, *e));
        }
    }
    let lambda = best.map_or(grid[0], |(g, _)| grid[g]);

    LambdaSelection {
        lambda,
        errors,
        folds,
    }
}
