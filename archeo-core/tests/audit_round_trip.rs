//! Audit trail persistence through the full pipeline
//!
//! Every instrument outcome, success or failure, must come back out of the
//! database exactly as the pipeline produced it.

mod helpers;

use archeo_core::db;
use archeo_core::known_sites::KnownSiteCatalog;
use archeo_core::types::{Classification, FailureKind, MeasurementMode};
use helpers::{build_pipeline, giza_bbox, giza_catalog, giza_stubs, Behavior};

#[tokio::test]
async fn test_successes_and_failures_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let pool = db::init_database_pool(&dir.path().join("audit.db"))
        .await
        .unwrap();

    let pipeline = build_pipeline(
        giza_stubs(|i| match i {
            0 => Behavior::high(),
            1 => Behavior::DegradedValue(1.5),
            2 => Behavior::Fail(FailureKind::AuthError),
            3 => Behavior::Fail(FailureKind::RateLimited),
            _ => Behavior::quiet(),
        }),
        KnownSiteCatalog::default(),
    )
    .with_database(pool.clone(), 1000);

    let outcome = pipeline.analyze(giza_bbox(), Some("Giza")).await.unwrap();
    assert!(outcome.persistence_error.is_none());
    let produced = outcome.record;

    let stored = db::get_analysis(&pool, produced.analysis_id)
        .await
        .unwrap()
        .expect("analysis should be stored");

    assert_eq!(stored.analysis_id, produced.analysis_id);
    assert_eq!(stored.region_name.as_deref(), Some("Giza"));
    assert_eq!(stored.bbox, produced.bbox);
    assert_eq!(stored.environment.environment, produced.environment.environment);
    assert_eq!(stored.measurements, produced.measurements);
    assert_eq!(stored.failures, produced.failures);
    assert_eq!(stored.verdict.classification, produced.verdict.classification);
    assert_eq!(
        stored.verdict.instruments_converging,
        produced.verdict.instruments_converging
    );
    assert_eq!(
        stored.verdict.recommended_action,
        produced.verdict.recommended_action
    );

    assert_eq!(stored.measurements.len(), 3);
    assert!(stored
        .measurements
        .iter()
        .any(|m| m.mode == MeasurementMode::Degraded));
    let mut kinds: Vec<_> = stored.failures.iter().map(|f| f.kind).collect();
    kinds.sort_by_key(|k| k.as_str());
    assert_eq!(kinds, vec![FailureKind::AuthError, FailureKind::RateLimited]);
}

#[tokio::test]
async fn test_insufficient_data_is_recorded_with_every_failure() {
    let pool = archeo_common::db::open_memory_pool().await.unwrap();
    db::init_tables(&pool).await.unwrap();

    let pipeline = build_pipeline(
        giza_stubs(|_| Behavior::Fail(FailureKind::NoData)),
        KnownSiteCatalog::default(),
    )
    .with_database(pool.clone(), 1000);

    let outcome = pipeline.analyze(giza_bbox(), None).await.unwrap();
    let stored = db::get_analysis(&pool, outcome.record.analysis_id)
        .await
        .unwrap()
        .unwrap();

    assert_eq!(stored.verdict.classification, Classification::InsufficientData);
    assert!(stored.measurements.is_empty());
    assert_eq!(stored.failures.len(), 5);
}

#[tokio::test]
async fn test_region_history_newest_first() {
    let pool = archeo_common::db::open_memory_pool().await.unwrap();
    db::init_tables(&pool).await.unwrap();

    let pipeline = build_pipeline(giza_stubs(|_| Behavior::quiet()), giza_catalog())
        .with_database(pool.clone(), 1000);

    let first = pipeline.analyze(giza_bbox(), Some("Giza")).await.unwrap();
    let second = pipeline.analyze(giza_bbox(), Some("Giza")).await.unwrap();
    pipeline.analyze(giza_bbox(), Some("Saqqara")).await.unwrap();

    let giza = db::list_by_region(&pool, "Giza").await.unwrap();
    let ids: Vec<_> = giza.iter().map(|r| r.analysis_id).collect();
    assert_eq!(
        ids,
        vec![second.record.analysis_id, first.record.analysis_id]
    );
    assert!(giza.iter().all(|r| {
        r.verdict.classification == Classification::KnownSiteRediscovery
            && r.verdict.known_site.is_some()
    }));

    assert_eq!(db::list_recent(&pool, 10).await.unwrap().len(), 3);
    assert_eq!(db::list_recent(&pool, 1).await.unwrap().len(), 1);
}
