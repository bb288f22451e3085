//! End-to-end scenarios through the public engine surface: capture storage,
//! training with grid-searched regularization, prediction, persistence
//! round-trips, and per-target failure isolation.

use approx::assert_abs_diff_eq;
use facecast::schema::{FEATURE_COUNT, Timestamp};
use facecast::store::StoreError;
use facecast::train::TrainError;
use facecast::{Engine, EngineError};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, Normal};
use std::collections::BTreeMap;

fn one_target(name: &str, value: f64) -> BTreeMap<String, f64> {
    let mut targets = BTreeMap::new();
    targets.insert(name.to_string(), value);
    targets
}

/// Inserts n samples with feature_0 = 1..=n, all other features zero, and
/// target = 3 * feature_0 + 2 exactly.
fn insert_noiseless(engine: &Engine, target: &str, n: usize) {
    for i in 0..n {
        let mut features = [0.0; FEATURE_COUNT];
        features[0] = (i + 1) as f64;
        engine
            .add_sample(
                &features,
                one_target(target, 3.0 * features[0] + 2.0),
                Timestamp::from_unix_seconds(i as i64),
            )
            .unwrap();
    }
}

/// Inserts n noisy samples driven by a few informative features.
fn insert_noisy(engine: &Engine, target: &str, n: usize, seed: u64) {
    let mut rng = StdRng::seed_from_u64(seed);
    let noise = Normal::new(0.0, 2.0).unwrap();
    for i in 0..n {
        let mut features = [0.0; FEATURE_COUNT];
        for f in features.iter_mut() {
            *f = rng.gen_range(0.0..1.0);
        }
        let value = 55.0 + 12.0 * features[0] - 8.0 * features[5] + 4.0 * features[21]
            + noise.sample(&mut rng);
        engine
            .add_sample(
                &features,
                one_target(target, value),
                Timestamp::from_unix_seconds(i as i64),
            )
            .unwrap();
    }
}

#[test]
fn noiseless_signal_trains_with_small_lambda_and_high_correlation() {
    let engine = Engine::in_memory();
    insert_noiseless(&engine, "HRV", 10);

    let model = engine.train("HRV").unwrap();
    assert_eq!(model.lambda, 0.1, "noiseless data should pick the smallest candidate");
    assert!(model.cv.r > 0.99, "r = {}", model.cv.r);
    assert_eq!(model.trained_on, 10);
    assert_eq!(model.cv.pairs.len(), 10);
}

#[test]
fn predictions_are_finite_for_arbitrary_valid_vectors() {
    let engine = Engine::in_memory();
    insert_noisy(&engine, "Sleep Score", 40, 17);
    engine.train("Sleep Score").unwrap();

    let mut rng = StdRng::seed_from_u64(99);
    for _ in 0..200 {
        let mut features = [0.0; FEATURE_COUNT];
        for f in features.iter_mut() {
            *f = rng.gen_range(-1e6..1e6);
        }
        let estimate = engine.predict("Sleep Score", &features).unwrap();
        assert!(estimate.is_finite());
    }
}

#[test]
fn six_samples_are_insufficient_and_leave_no_model_behind() {
    let engine = Engine::in_memory();
    insert_noiseless(&engine, "HRV", 6);

    let err = engine.train("HRV").unwrap_err();
    assert!(matches!(
        err,
        EngineError::Train(TrainError::InsufficientData {
            required: 7,
            actual: 6
        })
    ));
    assert!(matches!(engine.get("HRV"), Err(EngineError::Registry(_))));
}

#[test]
fn failed_retrain_retains_the_previous_model() {
    let engine = Engine::in_memory();
    insert_noiseless(&engine, "HRV", 10);
    let original = engine.train("HRV").unwrap();
    assert_eq!(original.trained_on, 10);

    // Shrink the dataset below the minimum, then attempt a retrain.
    for i in 4..10 {
        engine
            .delete_sample(Timestamp::from_unix_seconds(i))
            .unwrap();
    }
    let err = engine.train("HRV").unwrap_err();
    assert!(matches!(
        err,
        EngineError::Train(TrainError::InsufficientData { .. })
    ));

    // The model trained on the full dataset still stands.
    let retained = engine.get("HRV").unwrap();
    assert_eq!(retained.trained_on, 10);
    assert_eq!(retained.coefficients, original.coefficients);
}

#[test]
fn training_twice_on_an_unchanged_dataset_is_deterministic() {
    let engine = Engine::in_memory();
    insert_noisy(&engine, "HRV", 25, 4);

    let first = engine.train("HRV").unwrap();
    let second = engine.train("HRV").unwrap();
    assert_eq!(first.lambda, second.lambda);
    assert_eq!(first.coefficients, second.coefficients);
    assert_eq!(first.intercept, second.intercept);
    assert_eq!(first.cv, second.cv);
}

#[test]
fn duplicate_timestamps_are_rejected_through_the_engine() {
    let engine = Engine::in_memory();
    let at = Timestamp::from_unix_seconds(1_722_940_000);
    engine
        .add_sample(&[0.5; FEATURE_COUNT], one_target("HRV", 50.0), at)
        .unwrap();
    let err = engine
        .add_sample(&[0.6; FEATURE_COUNT], one_target("HRV", 51.0), at)
        .unwrap_err();
    assert!(matches!(
        err,
        EngineError::Store(StoreError::DuplicateTimestamp(_))
    ));
    assert_eq!(engine.store().len(), 1);
}

#[test]
fn invalid_vectors_are_rejected_at_both_boundaries() {
    let engine = Engine::in_memory();
    insert_noiseless(&engine, "HRV", 10);
    engine.train("HRV").unwrap();

    // Wrong length at predict.
    assert!(matches!(
        engine.predict("HRV", &[1.0; 23]),
        Err(EngineError::InvalidFeatureVector(_))
    ));
    // Non-finite value at predict.
    let mut bad = [0.0; FEATURE_COUNT];
    bad[11] = f64::NAN;
    assert!(matches!(
        engine.predict("HRV", &bad),
        Err(EngineError::InvalidFeatureVector(_))
    ));
    // Unknown target.
    assert!(matches!(
        engine.predict("VO2 Max", &[0.0; FEATURE_COUNT]),
        Err(EngineError::Registry(_))
    ));
}

#[test]
fn persisted_engine_round_trips_models_and_samples() {
    let dir = tempfile::tempdir().unwrap();
    let probe = {
        let engine = Engine::open(dir.path()).unwrap();
        insert_noisy(&engine, "Resting Heart Rate", 20, 8);
        engine.train("Resting Heart Rate").unwrap();

        let mut features = [0.0; FEATURE_COUNT];
        for (j, f) in features.iter_mut().enumerate() {
            *f = (j as f64) / 24.0;
        }
        (features, engine.predict("Resting Heart Rate", &features).unwrap())
    };

    let reopened = Engine::open(dir.path()).unwrap();
    assert_eq!(reopened.store().len(), 20);
    let estimate = reopened
        .predict("Resting Heart Rate", &probe.0)
        .unwrap();
    assert_abs_diff_eq!(estimate, probe.1, epsilon = 1e-9);

    let summaries = reopened.list();
    assert_eq!(summaries.len(), 1);
    assert_eq!(summaries[0].target_name, "Resting Heart Rate");
    assert_eq!(summaries[0].trained_on, 20);
    assert!(!summaries[0].is_stale());
}

#[test]
fn targets_train_independently_over_shared_samples() {
    let engine = Engine::in_memory();
    // Every capture has an HRV value; only half have a Sleep Score.
    let mut rng = StdRng::seed_from_u64(13);
    for i in 0..16 {
        let mut features = [0.0; FEATURE_COUNT];
        for f in features.iter_mut() {
            *f = rng.gen_range(0.0..1.0);
        }
        let mut targets = one_target("HRV", 40.0 + 20.0 * features[2]);
        if i % 2 == 0 {
            targets.insert("Sleep Score".to_string(), 60.0 + 30.0 * features[9]);
        }
        engine
            .add_sample(&features, targets, Timestamp::from_unix_seconds(i))
            .unwrap();
    }

    let hrv = engine.train("HRV").unwrap();
    let sleep = engine.train("Sleep Score").unwrap();
    assert_eq!(hrv.trained_on, 16);
    assert_eq!(sleep.trained_on, 8);

    let summaries = engine.list();
    assert_eq!(summaries.len(), 2);
}

#[test]
fn cv_diagnostics_expose_importance_and_residual_pairs() {
    let engine = Engine::in_memory();
    insert_noisy(&engine, "HRV", 30, 2);
    let model = engine.train("HRV").unwrap();

    assert_eq!(model.cv.feature_importance.len(), FEATURE_COUNT);
    assert_abs_diff_eq!(
        model.cv.feature_importance.iter().sum::<f64>(),
        1.0,
        epsilon = 1e-9
    );
    assert_eq!(model.cv.pairs.len(), 30);
    // The dominant simulated driver should rank near the top.
    let ranked = model.cv.ranked_importance();
    assert!(ranked[..3].iter().any(|(name, _)| *name == "eye_openness_left"));
}

#[test]
fn deleting_a_model_does_not_touch_samples() {
    let engine = Engine::in_memory();
    insert_noiseless(&engine, "HRV", 10);
    engine.train("HRV").unwrap();

    engine.delete_model("HRV").unwrap();
    assert!(engine.get("HRV").is_err());
    assert_eq!(engine.store().len(), 10);

    // Retraining from the intact samples works.
    assert!(engine.train("HRV").is_ok());
}
