//! # Sample Store
//!
//! The exclusive owner of captured samples. Each sample pairs one validated
//! feature vector with the health metric values known for that instant;
//! metric values that arrive later are backfilled in place. Samples are
//! keyed by their capture timestamp at one-second resolution, which makes
//! duplicate detection and on-disk record naming the same decision.
//!
//! The store hands the training pipeline a [`Dataset`]: the
//! timestamp-ordered design matrix and target vector for one metric,
//! restricted to the samples where that metric is present.

use crate::persist::{
    self, FacialMetricsRecord, HealthSnapshotRecord, PersistenceError,
};
use crate::schema::{FEATURE_COUNT, FeatureVector, SchemaError, Timestamp};
use ndarray::{Array1, Array2};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{PoisonError, RwLock};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("invalid feature vector: {0}")]
    InvalidFeatureVector(#[from] SchemaError),
    #[error("target '{name}' has non-finite value {value}")]
    NonFiniteTarget { name: String, value: f64 },
    #[error("a sample already exists at timestamp {0}")]
    DuplicateTimestamp(Timestamp),
    #[error("no sample exists at timestamp {0}")]
    SampleNotFound(Timestamp),
    #[error("target '{name}' is already set for timestamp {at}; pass force to overwrite")]
    TargetAlreadySet { name: String, at: Timestamp },
    #[error("persistence failure: {0}")]
    Persistence(#[from] PersistenceError),
}

/// One capture: a feature vector plus the target values known for it.
/// Immutable once stored, except for backfilling a missing target value.
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    pub features: FeatureVector,
    pub targets: BTreeMap<String, f64>,
    pub captured_at: Timestamp,
}

/// The timestamp-ordered training data for one target metric.
#[derive(Debug, Clone)]
pub struct Dataset {
    pub target: String,
    pub timestamps: Vec<Timestamp>,
    /// Raw (unstandardized) design matrix, one row per sample.
    pub x: Array2<f64>,
    pub y: Array1<f64>,
}

impl Dataset {
    pub fn len(&self) -> usize {
        self.timestamps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.timestamps.is_empty()
    }
}

/// Validated sample storage, optionally mirrored to a captures directory as
/// sibling facial-metrics / health-snapshot records.
pub struct SampleStore {
    samples: RwLock<BTreeMap<Timestamp, Sample>>,
    captures_dir: Option<PathBuf>,
}

impl SampleStore {
    /// A store with no backing directory. Used by tests and embedding
    /// callers that persist elsewhere.
    pub fn in_memory() -> Self {
        Self {
            samples: RwLock::new(BTreeMap::new()),
            captures_dir: None,
        }
    }

    /// Opens (creating if needed) a directory-backed store and loads every
    /// capture record in it. A record that fails validation aborts the open;
    /// nothing is skipped silently.
    pub fn open(captures_dir: &Path) -> Result<Self, StoreError> {
        fs::create_dir_all(captures_dir).map_err(PersistenceError::Io)?;
        let mut samples = BTreeMap::new();

        for entry in fs::read_dir(captures_dir).map_err(PersistenceError::Io)? {
            let entry = entry.map_err(PersistenceError::Io)?;
            let path = entry.path();
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            let Some(stem) = name.strip_suffix(".face.toml") else {
                continue;
            };

            let face: FacialMetricsRecord = persist::read_record(&path)?;
            let declared: i64 = stem.parse().map_err(|_| {
                PersistenceError::MalformedRecord {
                    path: path.clone(),
                    reason: "file name is not a unix-seconds timestamp".to_string(),
                }
            })?;
            if face.captured_at.unix_seconds() != declared {
                return Err(PersistenceError::MalformedRecord {
                    path,
                    reason: format!(
                        "record timestamp {} does not match file name {declared}",
                        face.captured_at
                    ),
                }
                .into());
            }

            let health_path = captures_dir.join(format!("{stem}.health.toml"));
            let health: HealthSnapshotRecord = persist::read_record(&health_path)?;
            validate_targets(&health.metrics)?;

            samples.insert(
                face.captured_at,
                Sample {
                    features: face.features,
                    targets: health.metrics,
                    captured_at: face.captured_at,
                },
            );
        }

        log::info!(
            "Opened sample store with {} captures from {}.",
            samples.len(),
            captures_dir.display()
        );
        Ok(Self {
            samples: RwLock::new(samples),
            captures_dir: Some(captures_dir.to_path_buf()),
        })
    }

    /// Validates and appends one capture. Rejects a second capture at the
    /// same second rather than silently overwriting.
    pub fn add_sample(
        &self,
        features: &[f64],
        targets: BTreeMap<String, f64>,
        captured_at: Timestamp,
    ) -> Result<Sample, StoreError> {
        let features = FeatureVector::from_slice(features)?;
        validate_targets(&targets)?;

        let mut samples = self.samples.write().unwrap_or_else(PoisonError::into_inner);
        if samples.contains_key(&captured_at) {
            return Err(StoreError::DuplicateTimestamp(captured_at));
        }

        let sample = Sample {
            features,
            targets,
            captured_at,
        };
        self.persist_capture(&sample)?;
        samples.insert(captured_at, sample.clone());
        Ok(sample)
    }

    /// Sets a target value that was missing when the sample was captured.
    /// Overwriting an existing value requires `force`.
    pub fn backfill_target(
        &self,
        captured_at: Timestamp,
        target: &str,
        value: f64,
        force: bool,
    ) -> Result<Sample, StoreError> {
        if !value.is_finite() {
            return Err(StoreError::NonFiniteTarget {
                name: target.to_string(),
                value,
            });
        }

        let mut samples = self.samples.write().unwrap_or_else(PoisonError::into_inner);
        let sample = samples
            .get_mut(&captured_at)
            .ok_or(StoreError::SampleNotFound(captured_at))?;
        if sample.targets.contains_key(target) && !force {
            return Err(StoreError::TargetAlreadySet {
                name: target.to_string(),
                at: captured_at,
            });
        }

        let mut updated = sample.clone();
        updated.targets.insert(target.to_string(), value);
        if let Some(dir) = &self.captures_dir {
            persist::write_record(
                &health_path(dir, captured_at),
                &HealthSnapshotRecord {
                    captured_at,
                    metrics: updated.targets.clone(),
                },
            )?;
        }
        *sample = updated.clone();
        Ok(updated)
    }

    /// The timestamp-ordered dataset for one target. Side-effect-free.
    pub fn dataset_for(&self, target: &str) -> Dataset {
        let samples = self.samples.read().unwrap_or_else(PoisonError::into_inner);
        let rows: Vec<(&Timestamp, &Sample, f64)> = samples
            .iter()
            .filter_map(|(ts, s)| s.targets.get(target).map(|&v| (ts, s, v)))
            .collect();

        let n = rows.len();
        let mut x = Array2::zeros((n, FEATURE_COUNT));
        let mut y = Array1::zeros(n);
        let mut timestamps = Vec::with_capacity(n);
        for (i, (ts, sample, value)) in rows.into_iter().enumerate() {
            for (j, &v) in sample.features.values().iter().enumerate() {
                x[[i, j]] = v;
            }
            y[i] = value;
            timestamps.push(*ts);
        }

        Dataset {
            target: target.to_string(),
            timestamps,
            x,
            y,
        }
    }

    pub fn get(&self, captured_at: Timestamp) -> Option<Sample> {
        self.samples
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&captured_at)
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.samples
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn timestamps(&self) -> Vec<Timestamp> {
        self.samples
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .copied()
            .collect()
    }

    /// Removes one capture and its on-disk records. Irreversible.
    pub fn delete(&self, captured_at: Timestamp) -> Result<(), StoreError> {
        let mut samples = self.samples.write().unwrap_or_else(PoisonError::into_inner);
        if !samples.contains_key(&captured_at) {
            return Err(StoreError::SampleNotFound(captured_at));
        }
        if let Some(dir) = &self.captures_dir {
            remove_capture_files(dir, captured_at)?;
        }
        samples.remove(&captured_at);
        Ok(())
    }

    /// Removes every capture. Irreversible. On an I/O failure the captures
    /// already removed are gone from memory too, so memory and disk stay
    /// consistent.
    pub fn purge_all(&self) -> Result<(), StoreError> {
        let mut samples = self.samples.write().unwrap_or_else(PoisonError::into_inner);
        let purged = samples.len();
        if let Some(dir) = &self.captures_dir {
            let timestamps: Vec<Timestamp> = samples.keys().copied().collect();
            for ts in timestamps {
                remove_capture_files(dir, ts)?;
                samples.remove(&ts);
            }
        } else {
            samples.clear();
        }
        log::info!("Purged {purged} captures.");
        Ok(())
    }

    /// Writes the sibling records for one capture, rolling back the facial
    /// record if the health record cannot be committed.
    fn persist_capture(&self, sample: &Sample) -> Result<(), StoreError> {
        let Some(dir) = &self.captures_dir else {
            return Ok(());
        };
        let face = face_path(dir, sample.captured_at);
        persist::write_record(
            &face,
            &FacialMetricsRecord {
                captured_at: sample.captured_at,
                features: sample.features.clone(),
            },
        )?;
        let health = HealthSnapshotRecord {
            captured_at: sample.captured_at,
            metrics: sample.targets.clone(),
        };
        if let Err(e) = persist::write_record(&health_path(dir, sample.captured_at), &health) {
            let _ = fs::remove_file(&face);
            return Err(e.into());
        }
        Ok(())
    }
}

fn validate_targets(targets: &BTreeMap<String, f64>) -> Result<(), StoreError> {
    for (name, &value) in targets {
        if !value.is_finite() {
            return Err(StoreError::NonFiniteTarget {
                name: name.clone(),
                value,
            });
        }
    }
    Ok(())
}

fn face_path(dir: &Path, at: Timestamp) -> PathBuf {
    dir.join(format!("{at}.face.toml"))
}

fn health_path(dir: &Path, at: Timestamp) -> PathBuf {
    dir.join(format!("{at}.health.toml"))
}

fn remove_capture_files(dir: &Path, at: Timestamp) -> Result<(), StoreError> {
    fs::remove_file(face_path(dir, at)).map_err(PersistenceError::Io)?;
    fs::remove_file(health_path(dir, at)).map_err(PersistenceError::Io)?;
    Ok(())
}
