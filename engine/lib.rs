//! # facecast
//!
//! A single-subject prediction engine that learns a mapping from facial
//! measurements to daily health metrics and evaluates that mapping honestly
//! on small datasets. One regularized linear model per named target,
//! selected and scored by leave-one-out cross-validation, persisted as
//! human-readable per-target records.
//!
//! The capture pipeline (camera, landmark extraction) and the health data
//! provider are external collaborators: they deliver the 24-value feature
//! vectors and metric values this engine consumes.

#![deny(dead_code)]
#![deny(unused_imports)]

pub mod context;
pub mod model;
pub mod persist;
pub mod registry;
pub mod schema;
pub mod store;
pub mod train;
pub mod validate;

pub use context::{Engine, EngineConfig, EngineError, TargetSummary};
pub use model::TrainedModel;
pub use schema::{FEATURE_COUNT, FEATURE_NAMES, FeatureVector, Timestamp};
pub use store::{Dataset, Sample, SampleStore};
pub use validate::{CvResult, PredictionPair};
