//! # Leave-One-Out Cross-Validation
//!
//! Produces the honest accuracy estimate for a target and selects the
//! regularization strength. Each fold recomputes standardization statistics
//! from its own n-1 rows, so the held-out sample never influences the
//! statistics used to predict it. Folds are independent pure computations
//! and run in parallel; results are aggregated in the original sample
//! order, never by completion order, so every metric is deterministic.
//!
//! λ selection evaluates a fixed candidate grid with the full LOO loop per
//! candidate and keeps the λ minimizing RMSE, ties going to the larger λ.

use crate::schema::{FEATURE_COUNT, FEATURE_NAMES};
use crate::train::{self, TrainError};
use ndarray::{Array1, ArrayView1, ArrayView2, Axis};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

/// Candidate regularization strengths. A product heuristic, exposed through
/// `EngineConfig` for embedding callers. Never contains 0.
pub const DEFAULT_LAMBDA_GRID: [f64; 4] = [0.1, 1.0, 10.0, 100.0];

/// One held-out sample's actual value and its out-of-sample prediction.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PredictionPair {
    pub actual: f64,
    pub predicted: f64,
}

/// Cross-validation diagnostics for one target, persisted alongside the
/// model and exposed verbatim to the presentation layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CvResult {
    /// Pearson correlation between actuals and predictions; 0 when either
    /// sequence has zero variance.
    pub r: f64,
    pub mae: f64,
    pub rmse: f64,
    /// Non-negative share per schema feature, summing to 1.0 (or all zero
    /// when every fold coefficient vanished).
    pub feature_importance: Vec<f64>,
    /// One entry per sample, in dataset (timestamp) order.
    pub pairs: Vec<PredictionPair>,
}

impl CvResult {
    /// Importance shares paired with feature names, schema order.
    pub fn named_importance(&self) -> Vec<(&'static str, f64)> {
        FEATURE_NAMES
            .iter()
            .copied()
            .zip(self.feature_importance.iter().copied())
            .collect()
    }

    /// Importance shares sorted most-influential first.
    pub fn ranked_importance(&self) -> Vec<(&'static str, f64)> {
        let mut ranked = self.named_importance();
        ranked.sort_by(|a, b| b.1.total_cmp(&a.1));
        ranked
    }
}

/// The grid-search winner: selected λ and its LOO diagnostics.
#[derive(Debug, Clone)]
pub struct LambdaSelection {
    pub lambda: f64,
    pub cv: CvResult,
}

/// Runs the LOO loop for one λ. The minimum-sample gate applies to the
/// whole dataset, once, before the fold loop.
pub fn leave_one_out(
    x: ArrayView2<f64>,
    y: ArrayView1<f64>,
    lambda: f64,
    min_samples: usize,
) -> Result<CvResult, TrainError> {
    gate(x.nrows(), min_samples)?;
    loo_all_folds(x, y, lambda)
}

/// Full grid search: one complete LOO loop per candidate, winner by RMSE,
/// ties to the larger λ.
pub fn grid_search(
    x: ArrayView2<f64>,
    y: ArrayView1<f64>,
    grid: &[f64],
    min_samples: usize,
) -> Result<LambdaSelection, TrainError> {
    if grid.is_empty() {
        return Err(TrainError::EmptyLambdaGrid);
    }
    gate(x.nrows(), min_samples)?;

    let mut best: Option<LambdaSelection> = None;
    for &lambda in grid {
        let cv = loo_all_folds(x, y, lambda)?;
        log::debug!(
            "LOO candidate lambda={lambda}: rmse={:.6}, mae={:.6}, r={:.4}",
            cv.rmse,
            cv.mae,
            cv.r
        );
        let better = match &best {
            None => true,
            Some(current) => {
                cv.rmse < current.cv.rmse
                    || (cv.rmse == current.cv.rmse && lambda > current.lambda)
            }
        };
        if better {
            best = Some(LambdaSelection { lambda, cv });
        }
    }

    best.ok_or(TrainError::EmptyLambdaGrid)
}

fn gate(n: usize, min_samples: usize) -> Result<(), TrainError> {
    if n < min_samples {
        return Err(TrainError::InsufficientData {
            required: min_samples,
            actual: n,
        });
    }
    Ok(())
}

struct FoldOutcome {
    actual: f64,
    predicted: f64,
    coefficient_magnitudes: Array1<f64>,
}

fn loo_all_folds(
    x: ArrayView2<f64>,
    y: ArrayView1<f64>,
    lambda: f64,
) -> Result<CvResult, TrainError> {
    let n = x.nrows();

    // Each fold is a pure function of (fold rows, lambda); the parallel
    // collect preserves index order.
    let outcomes: Vec<FoldOutcome> = (0..n)
        .into_par_iter()
        .map(|i| {
            let keep: Vec<usize> = (0..n).filter(|&j| j != i).collect();
            let fold_x = x.select(Axis(0), &keep);
            let fold_y = y.select(Axis(0), &keep);
            let fit = train::fit_fold(fold_x.view(), fold_y.view(), lambda)?;
            Ok(FoldOutcome {
                actual: y[i],
                predicted: fit.predict(x.row(i)),
                coefficient_magnitudes: fit.coefficients.mapv(f64::abs),
            })
        })
        .collect::<Result<Vec<_>, TrainError>>()?;

    let pairs: Vec<PredictionPair> = outcomes
        .iter()
        .map(|o| PredictionPair {
            actual: o.actual,
            predicted: o.predicted,
        })
        .collect();

    let mae = pairs
        .iter()
        .map(|p| (p.actual - p.predicted).abs())
        .sum::<f64>()
        / n as f64;
    let rmse = (pairs
        .iter()
        .map(|p| (p.actual - p.predicted).powi(2))
        .sum::<f64>()
        / n as f64)
        .sqrt();
    let r = pearson(&pairs);

    let mut importance = Array1::<f64>::zeros(FEATURE_COUNT);
    for outcome in &outcomes {
        importance += &outcome.coefficient_magnitudes;
    }
    importance /= n as f64;
    let total: f64 = importance.sum();
    let feature_importance = if total > 0.0 {
        (importance / total).to_vec()
    } else {
        vec![0.0; FEATURE_COUNT]
    };

    Ok(CvResult {
        r,
        mae,
        rmse,
        feature_importance,
        pairs,
    })
}

/// Pearson correlation, defined as 0 when either sequence has zero
/// variance.
fn pearson(pairs: &[PredictionPair]) -> f64 {
    let n = pairs.len() as f64;
    let mean_a = pairs.iter().map(|p| p.actual).sum::<f64>() / n;
    let mean_b = pairs.iter().map(|p| p.predicted).sum::<f64>() / n;

    let mut cov = 0.0;
    let mut var_a = 0.0;
    let mut var_b = 0.0;
    for p in pairs {
        let da = p.actual - mean_a;
        let db = p.predicted - mean_b;
        cov += da * db;
        var_a += da * da;
        var_b += db * db;
    }
    if var_a == 0.0 || var_b == 0.0 {
        return 0.0;
    }
    cov / (var_a.sqrt() * var_b.sqrt())
}
