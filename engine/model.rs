//! # Trained Model Artifact
//!
//! The self-contained, human-readable artifact produced by training one
//! target: standardized ridge coefficients, the standardization statistics
//! frozen at training time, the selected regularization strength, and the
//! cross-validation diagnostics. This is the structure that gets saved to
//! and loaded from a per-target TOML record.
//!
//! Prediction is a pure function of (model, feature vector): standardize
//! with the stored statistics, then evaluate the linear predictor. It never
//! mutates state and never re-derives statistics from current data.

use crate::persist::{self, PersistenceError};
use crate::schema::{FEATURE_COUNT, FeatureVector, Timestamp};
use crate::train::RidgeFit;
use crate::validate::CvResult;
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainedModel {
    pub target_name: String,
    pub intercept: f64,
    /// One weight per schema feature, in standardized units.
    pub coefficients: Vec<f64>,
    /// Standardization statistics of the exact dataset this model was
    /// trained on. Reused unchanged at inference time.
    pub feature_means: Vec<f64>,
    pub feature_std_devs: Vec<f64>,
    pub lambda: f64,
    /// Number of samples in the training dataset.
    pub trained_on: usize,
    pub trained_at: Timestamp,
    pub cv: CvResult,
}

impl TrainedModel {
    pub fn from_fit(
        target_name: &str,
        fit: &RidgeFit,
        trained_on: usize,
        trained_at: Timestamp,
        cv: CvResult,
    ) -> Self {
        Self {
            target_name: target_name.to_string(),
            intercept: fit.intercept,
            coefficients: fit.coefficients.to_vec(),
            feature_means: fit.feature_means.to_vec(),
            feature_std_devs: fit.feature_std_devs.to_vec(),
            lambda: fit.lambda,
            trained_on,
            trained_at,
            cv,
        }
    }

    /// Point estimate for one capture. Zero-variance features standardize
    /// to 0 exactly as they did at training time.
    pub fn predict(&self, features: &FeatureVector) -> f64 {
        let values = features.values();
        let mut acc = self.intercept;
        for j in 0..FEATURE_COUNT {
            let sd = self.feature_std_devs[j];
            if sd > 0.0 {
                acc += self.coefficients[j] * (values[j] - self.feature_means[j]) / sd;
            }
        }
        acc
    }

    /// Saves the model as a pretty TOML record, replacing any previous one
    /// atomically.
    pub fn save(&self, path: &Path) -> Result<(), PersistenceError> {
        persist::write_record(path, self)
    }

    /// Loads and shape-checks a model record.
    pub fn load(path: &Path) -> Result<Self, PersistenceError> {
        let model: Self = persist::read_record(path)?;
        model.validate().map_err(|reason| PersistenceError::MalformedRecord {
            path: path.to_path_buf(),
            reason,
        })?;
        Ok(model)
    }

    fn validate(&self) -> Result<(), String> {
        for (name, values) in [
            ("coefficients", &self.coefficients),
            ("feature_means", &self.feature_means),
            ("feature_std_devs", &self.feature_std_devs),
        ] {
            if values.len() != FEATURE_COUNT {
                return Err(format!(
                    "{name} has {} entries, expected {FEATURE_COUNT}",
                    values.len()
                ));
            }
            if values.iter().any(|v| !v.is_finite()) {
                return Err(format!("{name} contains a non-finite value"));
            }
        }
        if !self.intercept.is_finite() {
            return Err("intercept is not finite".to_string());
        }
        if !(self.lambda > 0.0) {
            return Err(format!("lambda must be positive, got {}", self.lambda));
        }
        if self.cv.feature_importance.len() != FEATURE_COUNT {
            return Err(format!(
                "feature_importance has {} entries, expected {FEATURE_COUNT}",
                self.cv.feature_importance.len()
            ));
        }
        Ok(())
    }
}
