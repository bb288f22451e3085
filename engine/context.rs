//! # Engine Context
//!
//! The explicitly constructed facade the rest of the application talks to.
//! It owns the sample store and model registry for one user's data
//! directory and exposes the full operation surface as value-returning
//! methods. There is no process-wide singleton: callers build an [`Engine`]
//! once and pass it by reference.
//!
//! Failure isolation is per target. A failed training run surfaces its
//! error, leaves the target's previous model untouched, and has no effect
//! on any other target.

use crate::model::TrainedModel;
use crate::registry::{ModelRegistry, RegistryError};
use crate::schema::{SchemaError, FeatureVector, Timestamp};
use crate::store::{Sample, SampleStore, StoreError};
use crate::train::{self, DEFAULT_MIN_TRAINING_SAMPLES, TrainError};
use crate::validate::{self, DEFAULT_LAMBDA_GRID};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Arc, PoisonError};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("invalid feature vector: {0}")]
    InvalidFeatureVector(#[from] SchemaError),
    #[error(transparent)]
    Train(#[from] TrainError),
    #[error(transparent)]
    Registry(#[from] RegistryError),
}

/// Tunable constants of the training mechanism. The defaults are the
/// product heuristics; the mechanism itself (grid search by LOO RMSE,
/// hard minimum gate) is fixed.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub min_training_samples: usize,
    /// Candidate regularization strengths, all strictly positive.
    pub lambda_grid: Vec<f64>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            min_training_samples: DEFAULT_MIN_TRAINING_SAMPLES,
            lambda_grid: DEFAULT_LAMBDA_GRID.to_vec(),
        }
    }
}

/// One row of `list()`: model quality plus staleness metadata. Staleness is
/// advisory only and never blocks prediction.
#[derive(Debug, Clone)]
pub struct TargetSummary {
    pub target_name: String,
    pub r: f64,
    pub trained_on: usize,
    pub trained_at: Timestamp,
    /// Size of the target's dataset right now, for comparison against
    /// `trained_on`.
    pub current_samples: usize,
}

impl TargetSummary {
    pub fn is_stale(&self) -> bool {
        self.current_samples != self.trained_on
    }
}

pub struct Engine {
    config: EngineConfig,
    store: SampleStore,
    registry: ModelRegistry,
}

impl Engine {
    /// An engine with no backing directory, for tests and embedding callers
    /// that persist elsewhere.
    pub fn in_memory() -> Self {
        Self::from_parts(SampleStore::in_memory(), ModelRegistry::in_memory())
    }

    /// Opens (creating if needed) a data directory with `captures/` and
    /// `models/` subdirectories and loads everything in it.
    pub fn open(root: &Path) -> Result<Self, EngineError> {
        let store = SampleStore::open(&root.join("captures"))?;
        let registry = ModelRegistry::open(&root.join("models"))?;
        Ok(Self::from_parts(store, registry))
    }

    fn from_parts(store: SampleStore, registry: ModelRegistry) -> Self {
        Self {
            config: EngineConfig::default(),
            store,
            registry,
        }
    }

    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn store(&self) -> &SampleStore {
        &self.store
    }

    pub fn add_sample(
        &self,
        features: &[f64],
        targets: BTreeMap<String, f64>,
        captured_at: Timestamp,
    ) -> Result<Sample, EngineError> {
        Ok(self.store.add_sample(features, targets, captured_at)?)
    }

    pub fn backfill_target(
        &self,
        captured_at: Timestamp,
        target: &str,
        value: f64,
        force: bool,
    ) -> Result<Sample, EngineError> {
        Ok(self
            .store
            .backfill_target(captured_at, target, value, force)?)
    }

    /// Trains one target end to end: select λ by LOO grid search, fit the
    /// final model on the complete dataset with the frozen statistics of
    /// that dataset, store atomically. On any failure the previous model
    /// (if any) is left untouched.
    pub fn train(&self, target: &str) -> Result<Arc<TrainedModel>, EngineError> {
        let lock = self.registry.train_lock(target);
        let _guard = lock.lock().unwrap_or_else(PoisonError::into_inner);

        let dataset = self.store.dataset_for(target);
        log::info!(
            "Training '{target}' on {} samples (grid of {} lambda candidates).",
            dataset.len(),
            self.config.lambda_grid.len()
        );

        let selection = validate::grid_search(
            dataset.x.view(),
            dataset.y.view(),
            &self.config.lambda_grid,
            self.config.min_training_samples,
        )?;
        let fit = train::fit_ridge(
            dataset.x.view(),
            dataset.y.view(),
            selection.lambda,
            self.config.min_training_samples,
        )?;

        let model = TrainedModel::from_fit(
            target,
            &fit,
            dataset.len(),
            Timestamp::now(),
            selection.cv,
        );
        log::info!(
            "Trained '{target}': lambda={}, r={:.4}, mae={:.4}, rmse={:.4}.",
            model.lambda,
            model.cv.r,
            model.cv.mae,
            model.cv.rmse
        );
        Ok(self.registry.insert(model)?)
    }

    /// Point estimate from the stored model. Read-only; safe to call
    /// concurrently with training thanks to the registry's whole-model swap.
    pub fn predict(&self, target: &str, features: &[f64]) -> Result<f64, EngineError> {
        let features = FeatureVector::from_slice(features)?;
        let model = self.registry.get(target)?;
        Ok(model.predict(&features))
    }

    pub fn get(&self, target: &str) -> Result<Arc<TrainedModel>, EngineError> {
        Ok(self.registry.get(target)?)
    }

    /// Per-target summaries, sorted by target name.
    pub fn list(&self) -> Vec<TargetSummary> {
        let mut summaries: Vec<TargetSummary> = self
            .registry
            .snapshot()
            .into_iter()
            .map(|model| TargetSummary {
                target_name: model.target_name.clone(),
                r: model.cv.r,
                trained_on: model.trained_on,
                trained_at: model.trained_at,
                current_samples: self.store.dataset_for(&model.target_name).len(),
            })
            .collect();
        summaries.sort_by(|a, b| a.target_name.cmp(&b.target_name));
        summaries
    }

    pub fn delete_model(&self, target: &str) -> Result<(), EngineError> {
        Ok(self.registry.delete(target)?)
    }

    pub fn delete_sample(&self, captured_at: Timestamp) -> Result<(), EngineError> {
        Ok(self.store.delete(captured_at)?)
    }

    pub fn purge_all(&self) -> Result<(), EngineError> {
        Ok(self.store.purge_all()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::FEATURE_COUNT;

    fn add_linear_samples(engine: &Engine, target: &str, n: usize) {
        for i in 0..n {
            let mut features = [0.0; FEATURE_COUNT];
            features[0] = (i + 1) as f64;
            let mut targets = BTreeMap::new();
            targets.insert(target.to_string(), 3.0 * features[0] + 2.0);
            engine
                .add_sample(
                    &features,
                    targets,
                    Timestamp::from_unix_seconds(i as i64),
                )
                .unwrap();
        }
    }

    #[test]
    fn failed_training_leaves_other_targets_untouched() {
        let engine = Engine::in_memory();
        add_linear_samples(&engine, "HRV", 10);
        // "Sleep Score" exists on only three samples.
        for i in 0..3 {
            engine
                .backfill_target(
                    Timestamp::from_unix_seconds(i),
                    "Sleep Score",
                    70.0 + i as f64,
                    false,
                )
                .unwrap();
        }

        engine.train("HRV").unwrap();
        let err = engine.train("Sleep Score").unwrap_err();
        assert!(matches!(
            err,
            EngineError::Train(TrainError::InsufficientData { .. })
        ));

        // The failure is isolated: HRV's model still serves predictions.
        assert!(engine.get("HRV").is_ok());
        assert!(matches!(
            engine.get("Sleep Score"),
            Err(EngineError::Registry(RegistryError::ModelNotFound(_)))
        ));
    }

    #[test]
    fn summaries_surface_staleness() {
        let engine = Engine::in_memory();
        add_linear_samples(&engine, "HRV", 8);
        engine.train("HRV").unwrap();

        let summary = &engine.list()[0];
        assert_eq!(summary.trained_on, 8);
        assert!(!summary.is_stale());

        let mut features = [0.0; FEATURE_COUNT];
        features[0] = 9.0;
        let mut targets = BTreeMap::new();
        targets.insert("HRV".to_string(), 29.0);
        engine
            .add_sample(&features, targets, Timestamp::from_unix_seconds(100))
            .unwrap();

        let summary = &engine.list()[0];
        assert_eq!(summary.current_samples, 9);
        assert!(summary.is_stale());
    }

    #[test]
    fn custom_config_controls_the_gate() {
        let engine = Engine::in_memory().with_config(EngineConfig {
            min_training_samples: 5,
            lambda_grid: vec![1.0],
        });
        add_linear_samples(&engine, "HRV", 5);
        let model = engine.train("HRV").unwrap();
        assert_eq!(model.lambda, 1.0);
        assert_eq!(model.trained_on, 5);
    }
}
