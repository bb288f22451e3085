//! # Typed Persistence Records
//!
//! Every capture is stored as two sibling TOML records sharing a
//! timestamp-derived identifier: a facial-metrics record (the fixed
//! 24-value vector) and a health-snapshot record (the per-metric value
//! map). Trained models are stored as one TOML record per target. All
//! records are strongly typed and validated at this boundary; a record
//! that fails to parse or violates the schema surfaces as a
//! [`PersistenceError`] and commits nothing.
//!
//! Writes go through a temp-file + rename replace so a reader never
//! observes a partially written record.

use crate::schema::{FeatureVector, Timestamp};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PersistenceError {
    #[error("failed to read or write record file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse TOML record: {0}")]
    TomlParse(#[from] toml::de::Error),
    #[error("failed to serialize record to TOML: {0}")]
    TomlSerialize(#[from] toml::ser::Error),
    #[error("malformed record {path}: {reason}")]
    MalformedRecord { path: PathBuf, reason: String },
}

/// The facial half of a capture: the validated measurement vector.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FacialMetricsRecord {
    pub captured_at: Timestamp,
    pub features: FeatureVector,
}

/// The health half of a capture: metric name to value. Metrics that were
/// not yet available at capture time are simply absent and may be
/// backfilled later, which rewrites this record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthSnapshotRecord {
    pub captured_at: Timestamp,
    pub metrics: BTreeMap<String, f64>,
}

/// Serializes `value` as pretty TOML and atomically replaces `path`.
pub fn write_record<T: Serialize>(path: &Path, value: &T) -> Result<(), PersistenceError> {
    let rendered = toml::to_string_pretty(value)?;
    let tmp = temp_sibling(path);
    if let Err(e) = fs::write(&tmp, rendered.as_bytes()) {
        let _ = fs::remove_file(&tmp);
        return Err(e.into());
    }
    if let Err(e) = fs::rename(&tmp, path) {
        let _ = fs::remove_file(&tmp);
        return Err(e.into());
    }
    Ok(())
}

/// Reads and parses one TOML record.
pub fn read_record<T: DeserializeOwned>(path: &Path) -> Result<T, PersistenceError> {
    let raw = fs::read_to_string(path)?;
    Ok(toml::from_str(&raw)?)
}

fn temp_sibling(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

/// Filesystem-safe slug for a target name ("Sleep Score" -> "sleep-score").
/// The authoritative name is the one inside the record; the slug only names
/// the file.
pub fn target_slug(target: &str) -> String {
    let mut slug = String::with_capacity(target.len());
    let mut last_dash = true;
    for c in target.chars() {
        if c.is_ascii_alphanumeric() {
            slug.push(c.to_ascii_lowercase());
            last_dash = false;
        } else if !last_dash {
            slug.push('-');
            last_dash = true;
        }
    }
    while slug.ends_with('-') {
        slug.pop();
    }
    if slug.is_empty() {
        slug.push_str("target");
    }
    slug
}
