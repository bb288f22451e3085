//! # Ridge Regression Trainer
//!
//! Fits one target's model from a dataset and a regularization strength by
//! solving the penalized normal equations in closed form. Features are
//! standardized with population statistics computed from the training rows;
//! those statistics are frozen into the fit and reused unchanged at
//! inference time. The intercept column is excluded from the penalty, so
//! with λ > 0 the system is symmetric positive definite and the solve is
//! guaranteed to succeed numerically. λ = 0 is rejected as input.

use crate::schema::FEATURE_COUNT;
use ndarray::{Array1, Array2, ArrayView1, ArrayView2, Axis};
use ndarray_linalg::Solve;
use thiserror::Error;

/// Minimum dataset size the trainer accepts. A product heuristic, exposed
/// through `EngineConfig` for embedding callers.
pub const DEFAULT_MIN_TRAINING_SAMPLES: usize = 7;

#[derive(Error, Debug)]
pub enum TrainError {
    #[error("insufficient data: {actual} samples available, {required} required")]
    InsufficientData { required: usize, actual: usize },
    #[error("regularization strength must be positive, got {0}")]
    InvalidLambda(f64),
    #[error("the regularized normal-equation solve failed: {0}")]
    SolveFailed(ndarray_linalg::error::LinalgError),
    #[error("the solve produced non-finite coefficients despite regularization")]
    NumericInstability,
    #[error("the lambda candidate grid is empty")]
    EmptyLambdaGrid,
}

/// A fitted ridge model for one target: coefficients in standardized
/// feature space plus the statistics that define that space.
#[derive(Debug, Clone)]
pub struct RidgeFit {
    pub lambda: f64,
    pub intercept: f64,
    /// One coefficient per schema feature, in standardized units.
    pub coefficients: Array1<f64>,
    pub feature_means: Array1<f64>,
    pub feature_std_devs: Array1<f64>,
}

impl RidgeFit {
    /// Evaluates the linear predictor on one raw feature row. Zero-variance
    /// features standardize to 0, exactly as they did during training.
    pub fn predict(&self, features: ArrayView1<f64>) -> f64 {
        let mut acc = self.intercept;
        for j in 0..FEATURE_COUNT {
            let sd = self.feature_std_devs[j];
            if sd > 0.0 {
                acc += self.coefficients[j] * (features[j] - self.feature_means[j]) / sd;
            }
        }
        acc
    }

    /// Σ|βⱼ| over the standardized coefficients. Weakly decreasing in λ.
    pub fn coefficient_l1_norm(&self) -> f64 {
        self.coefficients.iter().map(|c| c.abs()).sum()
    }
}

/// Fits the final model for a dataset, enforcing the minimum-sample gate.
pub fn fit_ridge(
    x: ArrayView2<f64>,
    y: ArrayView1<f64>,
    lambda: f64,
    min_samples: usize,
) -> Result<RidgeFit, TrainError> {
    let n = x.nrows();
    if n < min_samples {
        return Err(TrainError::InsufficientData {
            required: min_samples,
            actual: n,
        });
    }
    fit_fold(x, y, lambda)
}

/// Fits without the minimum-sample gate. Leave-one-out folds go through
/// here: the gate applies to the full dataset, once, before the fold loop.
pub(crate) fn fit_fold(
    x: ArrayView2<f64>,
    y: ArrayView1<f64>,
    lambda: f64,
) -> Result<RidgeFit, TrainError> {
    if !(lambda > 0.0) || !lambda.is_finite() {
        return Err(TrainError::InvalidLambda(lambda));
    }
    let n = x.nrows();
    if n == 0 {
        return Err(TrainError::InsufficientData {
            required: 1,
            actual: 0,
        });
    }

    let (means, std_devs) = population_stats(x);
    let z = standardized_design(x, &means, &std_devs);

    // Normal equations on the intercept-augmented design; the intercept
    // diagonal entry stays unpenalized.
    let mut a = z.t().dot(&z);
    for j in 1..=FEATURE_COUNT {
        a[[j, j]] += lambda;
    }
    let b = z.t().dot(&y);

    let theta = a.solve_into(b).map_err(TrainError::SolveFailed)?;
    if theta.iter().any(|v| !v.is_finite()) {
        return Err(TrainError::NumericInstability);
    }

    Ok(RidgeFit {
        lambda,
        intercept: theta[0],
        coefficients: theta.slice(ndarray::s![1..]).to_owned(),
        feature_means: means,
        feature_std_devs: std_devs,
    })
}

/// Per-feature mean and population (n-denominator) standard deviation.
fn population_stats(x: ArrayView2<f64>) -> (Array1<f64>, Array1<f64>) {
    let n = x.nrows() as f64;
    let means = x.sum_axis(Axis(0)) / n;
    let mut variances = Array1::zeros(FEATURE_COUNT);
    for row in x.rows() {
        for j in 0..FEATURE_COUNT {
            let d = row[j] - means[j];
            variances[j] += d * d;
        }
    }
    let std_devs = variances.mapv(|v: f64| (v / n).sqrt());
    (means, std_devs)
}

/// Standardized design matrix with a leading intercept column. Columns with
/// zero variance become all-zero, which pins their coefficient to exactly 0
/// under the ridge penalty.
fn standardized_design(
    x: ArrayView2<f64>,
    means: &Array1<f64>,
    std_devs: &Array1<f64>,
) -> Array2<f64> {
    let n = x.nrows();
    let mut z = Array2::zeros((n, FEATURE_COUNT + 1));
    for i in 0..n {
        z[[i, 0]] = 1.0;
        for j in 0..FEATURE_COUNT {
            let sd = std_devs[j];
            if sd > 0.0 {
                z[[i, j + 1]] = (x[[i, j]] - means[j]) / sd;
            }
        }
    }
    z
}
