//! Resolution pipeline integration tests
//!
//! Ingestion, idempotent re-resolution, fetch failures, audit trail and
//! per-entity serialization.

mod helpers;

use cinefacts_resolver::db::FactStore;
use cinefacts_resolver::sources::{IncomingFailure, IngestBatch};
use cinefacts_resolver::types::{EntityStatus, FieldValue, RunOutcome};
use cinefacts_resolver::workflow::{PipelineError, ResolutionEvent, ResolutionPipeline};
use helpers::*;
use std::sync::Arc;
use tokio::sync::mpsc;

#[tokio::test]
async fn test_unknown_entity_is_an_error() {
    let (_store, pipeline) = memory_pipeline(builtin_policy());
    let err = pipeline.resolve_entity("movie-missing", day(0)).await.unwrap_err();
    assert!(matches!(err, PipelineError::UnknownEntity(id) if id == "movie-missing"));
}

#[tokio::test]
async fn test_ingest_report_counts_duplicates_and_rejections() {
    let (_store, pipeline) = memory_pipeline(builtin_policy());
    let mut records = complete_movie("movie-jersey", "Jersey", 2019, day(0));
    records.push(claim("movie-jersey", "director", "", FieldValue::Text("Gowtam Tinnanuri".into()), day(0)));
    records.push(claim("movie-jersey", "synopsis", "tmdb", FieldValue::Null, day(0)));

    let report = pipeline.ingest(batch(records.clone()), day(0)).await.unwrap();
    assert_eq!(report.received, 8);
    assert_eq!(report.stored, 6);
    assert_eq!(report.duplicates, 0);
    assert_eq!(report.rejected.len(), 1);
    assert_eq!(report.entities, vec!["movie-jersey".to_string()]);

    let again = pipeline.ingest(batch(records), day(1)).await.unwrap();
    assert_eq!(again.stored, 0);
    assert_eq!(again.duplicates, 6);
}

#[tokio::test]
async fn test_strict_policy_rejects_unknown_sources() {
    let mut policy = builtin_policy();
    policy.strict_sources = true;
    let (_store, pipeline) = memory_pipeline(policy);

    let records = vec![
        claim("movie-ee-nagaraniki-emaindi", "title", "tmdb", FieldValue::Text("Ee Nagaraniki Emaindi".into()), day(0)),
        claim("movie-ee-nagaraniki-emaindi", "title", "fan-blog", FieldValue::Text("ENE".into()), day(0)),
    ];
    let report = pipeline.ingest(batch(records), day(0)).await.unwrap();
    assert_eq!(report.stored, 1);
    assert_eq!(report.rejected.len(), 1);
    assert!(report.rejected[0].reason.contains("fan-blog"));
}

#[tokio::test]
async fn test_rerun_with_unchanged_inputs_is_identical() {
    let (store, pipeline) = memory_pipeline(builtin_policy());
    let mut records = complete_movie("movie-fidaa", "Fidaa", 2017, day(0));
    records.push(claim("movie-fidaa", "runtime_minutes", "tmdb", FieldValue::Integer(140), day(0)));
    records.push(claim("movie-fidaa", "runtime_minutes", "imdb", FieldValue::Integer(142), day(0)));
    pipeline.ingest(batch(records), day(0)).await.unwrap();

    pipeline.resolve_entity("movie-fidaa", day(1)).await.unwrap();
    let first = store.load_resolved_values("movie-fidaa").await.unwrap();
    let first_discrepancies = store.load_discrepancies("movie-fidaa").await.unwrap();

    pipeline.resolve_entity("movie-fidaa", day(2)).await.unwrap();
    let second = store.load_resolved_values("movie-fidaa").await.unwrap();

    assert_eq!(first, second);
    assert_eq!(first_discrepancies, store.load_discrepancies("movie-fidaa").await.unwrap());
    assert_eq!(store.load_audit_trail("movie-fidaa").await.unwrap().len(), 2);
}

#[tokio::test]
async fn test_new_source_record_changes_resolution() {
    let (store, pipeline) = memory_pipeline(builtin_policy());
    pipeline
        .ingest(batch(vec![claim("movie-athadu", "director", "tmdb", FieldValue::Text("Trivikram Srinivas".into()), day(0))]), day(0))
        .await
        .unwrap();
    pipeline.resolve_entity("movie-athadu", day(1)).await.unwrap();
    let before = store.get_resolved_value("movie-athadu", "director").await.unwrap().unwrap();

    pipeline
        .ingest(batch(vec![claim("movie-athadu", "director", "wikidata", FieldValue::Text("Trivikram Srinivas".into()), day(3))]), day(3))
        .await
        .unwrap();
    pipeline.resolve_entity("movie-athadu", day(4)).await.unwrap();
    let after = store.get_resolved_value("movie-athadu", "director").await.unwrap().unwrap();

    assert_ne!(before.inputs_digest, after.inputs_digest);
    assert!(after.confidence_score > before.confidence_score);
    assert_eq!(after.contributing_sources.len(), 2);
}

#[tokio::test]
async fn test_fetch_failure_recorded_once_in_audit_trail() {
    let (store, pipeline) = memory_pipeline(builtin_policy());
    let batch = IngestBatch {
        records: complete_movie("movie-manam", "Manam", 2014, day(0)),
        failures: vec![IncomingFailure {
            entity_id: "movie-manam".to_string(),
            source: "wikidata".to_string(),
            field: None,
            reason: "HTTP 503".to_string(),
            occurred_at: None,
        }],
        ..Default::default()
    };
    let report = pipeline.ingest(batch, day(0)).await.unwrap();
    assert_eq!(report.failures_recorded, 1);

    let first = pipeline.resolve_entity("movie-manam", day(1)).await.unwrap();
    assert!(first.outcomes.contains(&RunOutcome::SourceUnavailable {
        source_id: "wikidata".to_string(),
        field: None,
        reason: "HTTP 503".to_string(),
    }));
    // A failure never blocks or removes data
    assert_eq!(first.status, EntityStatus::Validated);

    let second = pipeline.resolve_entity("movie-manam", day(2)).await.unwrap();
    assert!(!second
        .outcomes
        .iter()
        .any(|o| matches!(o, RunOutcome::SourceUnavailable { .. })));

    let trail = store.load_audit_trail("movie-manam").await.unwrap();
    assert_eq!(trail.len(), 2);
    assert_eq!(trail[0].timestamp, day(1));
    assert_eq!(trail[1].timestamp, day(2));
}

#[tokio::test]
async fn test_missing_required_field_blocks_entity() {
    let (store, pipeline) = memory_pipeline(builtin_policy());
    pipeline
        .ingest(
            batch(agreeing_claims("movie-kshanam", "title", FieldValue::Text("Kshanam".into()), day(0))),
            day(0),
        )
        .await
        .unwrap();

    let run = pipeline.resolve_entity("movie-kshanam", day(1)).await.unwrap();
    assert_eq!(run.status, EntityStatus::Blocked);
    assert!(run.outcomes.contains(&RunOutcome::InsufficientData {
        field: "release_year".to_string()
    }));

    let trust = store.load_trust_score("movie-kshanam").await.unwrap().unwrap();
    assert!(trust.explanation.contains("[FAIL] required-movie-fields"));
    // Blocked entities keep their resolved values
    assert!(store.get_resolved_value("movie-kshanam", "title").await.unwrap().is_some());
}

#[tokio::test]
async fn test_blocked_entity_still_requeues_decayed_fields() {
    let (store, pipeline) = memory_pipeline(builtin_policy());
    let mut records = agreeing_claims("movie-okkadu", "title", FieldValue::Text("Okkadu".into()), day(390));
    records.extend(agreeing_claims(
        "movie-okkadu",
        "worldwide_gross",
        FieldValue::Integer(400_000_000),
        day(0),
    ));
    pipeline.ingest(batch(records), day(390)).await.unwrap();

    let run = pipeline.resolve_entity("movie-okkadu", day(400)).await.unwrap();
    assert_eq!(run.status, EntityStatus::Blocked);
    assert!(run
        .outcomes
        .iter()
        .any(|o| matches!(o, RunOutcome::StaleData { field, .. } if field == "worldwide_gross")));

    let queue = store.review_queue(50).await.unwrap();
    assert!(queue
        .iter()
        .any(|item| item.field == "worldwide_gross" && item.reason.contains("decayed")));

    let refetch = store.refetch_queue().await.unwrap();
    assert_eq!(refetch.len(), 1);
    assert_eq!(refetch[0].fields, vec!["worldwide_gross".to_string()]);
    assert_eq!(
        store.load_status("movie-okkadu").await.unwrap(),
        Some(EntityStatus::Blocked)
    );
}

#[tokio::test]
async fn test_single_resolves_do_not_accumulate_locks() {
    let (_store, pipeline) = memory_pipeline(builtin_policy());
    let mut records = complete_movie("movie-arya", "Arya", 2004, day(0));
    records.extend(complete_movie("movie-bommarillu", "Bommarillu", 2006, day(0)));
    pipeline.ingest(batch(records), day(0)).await.unwrap();

    pipeline.resolve_entity("movie-arya", day(1)).await.unwrap();
    pipeline.resolve_entity("movie-bommarillu", day(1)).await.unwrap();
    let _ = pipeline.resolve_entity("movie-missing", day(1)).await;

    assert_eq!(pipeline.locks().len().await, 0);
}

#[tokio::test]
async fn test_mixed_entity_kinds_fail_the_run() {
    let (_store, pipeline) = memory_pipeline(builtin_policy());
    let mut person = claim("prabhas", "name", "tmdb", FieldValue::Text("Prabhas".into()), day(0));
    person.entity_kind = Some("celebrity".to_string());
    let film = claim("prabhas", "title", "tmdb", FieldValue::Text("Prabhas".into()), day(0));
    pipeline.ingest(batch(vec![person, film]), day(0)).await.unwrap();

    let err = pipeline.resolve_entity("prabhas", day(1)).await.unwrap_err();
    assert!(matches!(err, PipelineError::MalformedRecord { .. }));
}

#[tokio::test]
async fn test_concurrent_runs_for_one_entity_are_serialized() {
    let (store, pipeline) = memory_pipeline(builtin_policy());
    pipeline
        .ingest(batch(complete_movie("movie-mirchi", "Mirchi", 2013, day(0))), day(0))
        .await
        .unwrap();
    let pipeline = Arc::new(pipeline);

    let handles: Vec<_> = (0..4)
        .map(|i| {
            let pipeline = Arc::clone(&pipeline);
            tokio::spawn(async move { pipeline.resolve_entity("movie-mirchi", day(1 + i)).await })
        })
        .collect();
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    let trail = store.load_audit_trail("movie-mirchi").await.unwrap();
    assert_eq!(trail.len(), 4);
    assert!(trail.iter().all(|r| r.status == EntityStatus::Validated));
}

#[tokio::test]
async fn test_events_reported_for_each_run() {
    let (tx, mut rx) = mpsc::channel(16);
    let store: Arc<dyn FactStore> = Arc::new(cinefacts_resolver::db::InMemoryFactStore::new());
    let pipeline = ResolutionPipeline::with_events(store, Arc::new(builtin_policy()), tx);
    pipeline
        .ingest(batch(complete_movie("movie-bommarillu", "Bommarillu", 2006, day(0))), day(0))
        .await
        .unwrap();

    pipeline.resolve_entity("movie-bommarillu", day(1)).await.unwrap();
    let _ = pipeline.resolve_entity("movie-unknown", day(1)).await;

    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    assert_eq!(events.len(), 4);
    assert!(matches!(&events[1], ResolutionEvent::EntityResolved { status: EntityStatus::Validated, resolved_fields: 2, .. }));
    assert!(matches!(&events[3], ResolutionEvent::EntityFailed { entity_id, .. } if entity_id == "movie-unknown"));
}
