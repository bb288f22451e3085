//! # Model Registry
//!
//! Owns the lifetime of trained models, exactly one per target name. A
//! retrain replaces the whole entry or leaves the previous model untouched;
//! readers always observe a complete model, never a partially written one,
//! because entries are swapped as whole `Arc` values and disk records are
//! replaced via atomic rename. Concurrent training of the *same* target is
//! serialized through a per-target lock; different targets are independent.

use crate::model::TrainedModel;
use crate::persist::{self, PersistenceError};
use dashmap::DashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("no trained model exists for target '{0}'")]
    ModelNotFound(String),
    #[error("persistence failure: {0}")]
    Persistence(#[from] PersistenceError),
}

pub struct ModelRegistry {
    models: DashMap<String, Arc<TrainedModel>>,
    train_locks: DashMap<String, Arc<Mutex<()>>>,
    models_dir: Option<PathBuf>,
}

impl ModelRegistry {
    /// A registry with no backing directory.
    pub fn in_memory() -> Self {
        Self {
            models: DashMap::new(),
            train_locks: DashMap::new(),
            models_dir: None,
        }
    }

    /// Opens (creating if needed) a directory-backed registry and loads
    /// every model record in it. The target name inside each record is the
    /// authoritative key.
    pub fn open(models_dir: &Path) -> Result<Self, RegistryError> {
        fs::create_dir_all(models_dir).map_err(PersistenceError::Io)?;
        let models = DashMap::new();
        for entry in fs::read_dir(models_dir).map_err(PersistenceError::Io)? {
            let entry = entry.map_err(PersistenceError::Io)?;
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("toml") {
                continue;
            }
            let model = TrainedModel::load(&path)?;
            models.insert(model.target_name.clone(), Arc::new(model));
        }
        log::info!(
            "Opened model registry with {} targets from {}.",
            models.len(),
            models_dir.display()
        );
        Ok(Self {
            models,
            train_locks: DashMap::new(),
            models_dir: Some(models_dir.to_path_buf()),
        })
    }

    /// Stores a model for its target, replacing any previous one. The disk
    /// record commits before the in-memory swap, so a persistence failure
    /// leaves the previous model in place.
    pub fn insert(&self, model: TrainedModel) -> Result<Arc<TrainedModel>, RegistryError> {
        if let Some(dir) = &self.models_dir {
            model.save(&dir.join(record_name(&model.target_name)))?;
        }
        let stored = Arc::new(model);
        self.models
            .insert(stored.target_name.clone(), Arc::clone(&stored));
        Ok(stored)
    }

    pub fn get(&self, target: &str) -> Result<Arc<TrainedModel>, RegistryError> {
        self.models
            .get(target)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| RegistryError::ModelNotFound(target.to_string()))
    }

    pub fn contains(&self, target: &str) -> bool {
        self.models.contains_key(target)
    }

    pub fn len(&self) -> usize {
        self.models.len()
    }

    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }

    /// All stored models, cheaply cloned out as `Arc`s.
    pub fn snapshot(&self) -> Vec<Arc<TrainedModel>> {
        self.models
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect()
    }

    /// Removes a target's model and its disk record.
    pub fn delete(&self, target: &str) -> Result<(), RegistryError> {
        if !self.models.contains_key(target) {
            return Err(RegistryError::ModelNotFound(target.to_string()));
        }
        if let Some(dir) = &self.models_dir {
            let path = dir.join(record_name(target));
            if path.exists() {
                fs::remove_file(&path).map_err(PersistenceError::Io)?;
            }
        }
        self.models.remove(target);
        Ok(())
    }

    /// The lock serializing `train` calls for one target.
    pub(crate) fn train_lock(&self, target: &str) -> Arc<Mutex<()>> {
        self.train_locks
            .entry(target.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }
}

fn record_name(target: &str) -> String {
    format!("{}.toml", persist::target_slug(target))
}
