//! # Measurement Schema and Validation
//!
//! This module is the single source of truth for the facial measurement
//! schema. Every capture produces exactly [`FEATURE_COUNT`] real-valued
//! measurements in the fixed order of [`FEATURE_NAMES`]; all downstream
//! arrays, coefficients and importance scores are indexed by that order.
//! Feature vectors can only be built through validating constructors, so
//! the rest of the engine never has to re-check lengths or finiteness.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;

/// Number of measurements in every feature vector.
pub const FEATURE_COUNT: usize = 24;

/// Canonical, ordered names of the facial measurements. The order is a wire
/// contract: persisted coefficients and importance scores are indexed by it.
pub const FEATURE_NAMES: [&str; FEATURE_COUNT] = [
    "eye_openness_left",
    "eye_openness_right",
    "brow_height_left",
    "brow_height_right",
    "brow_furrow",
    "lid_droop_left",
    "lid_droop_right",
    "under_eye_darkness_left",
    "under_eye_darkness_right",
    "pupil_diameter_left",
    "pupil_diameter_right",
    "mouth_corner_left",
    "mouth_corner_right",
    "lip_compression",
    "jaw_open",
    "jaw_clench",
    "nostril_flare",
    "cheek_raise_left",
    "cheek_raise_right",
    "skin_tone_evenness",
    "face_symmetry",
    "head_yaw",
    "head_pitch",
    "head_roll",
];

/// Validation failures for caller-supplied measurement data.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SchemaError {
    #[error("feature vector has {actual} values, expected {expected}")]
    WrongLength { expected: usize, actual: usize },
    #[error("feature '{name}' has non-finite value {value}")]
    NonFiniteFeature { name: &'static str, value: f64 },
}

/// An ordered vector of exactly [`FEATURE_COUNT`] finite measurements.
///
/// Serialized transparently as a plain 24-element array, which makes the
/// persisted records human-readable and rejects wrong-length records at the
/// deserialization boundary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FeatureVector([f64; FEATURE_COUNT]);

impl FeatureVector {
    /// Validates finiteness of every measurement. Length is enforced by the
    /// array type itself.
    pub fn new(values: [f64; FEATURE_COUNT]) -> Result<Self, SchemaError> {
        for (j, &v) in values.iter().enumerate() {
            if !v.is_finite() {
                return Err(SchemaError::NonFiniteFeature {
                    name: FEATURE_NAMES[j],
                    value: v,
                });
            }
        }
        Ok(Self(values))
    }

    /// Validates both length and finiteness of a caller-supplied slice.
    pub fn from_slice(values: &[f64]) -> Result<Self, SchemaError> {
        let arr: [f64; FEATURE_COUNT] =
            values
                .try_into()
                .map_err(|_| SchemaError::WrongLength {
                    expected: FEATURE_COUNT,
                    actual: values.len(),
                })?;
        Self::new(arr)
    }

    pub fn values(&self) -> &[f64; FEATURE_COUNT] {
        &self.0
    }
}

/// A capture instant at one-second resolution (integer Unix seconds).
///
/// The second resolution is deliberate: it is both the duplicate-detection
/// granularity of the sample store and the identifier under which a
/// capture's sibling records are persisted.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Timestamp(i64);

impl Timestamp {
    pub fn from_unix_seconds(seconds: i64) -> Self {
        Self(seconds)
    }

    pub fn unix_seconds(&self) -> i64 {
        self.0
    }

    /// Current wall-clock instant, truncated to the schema resolution.
    pub fn now() -> Self {
        let seconds = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs() as i64)
            .unwrap_or(0);
        Self(seconds)
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
