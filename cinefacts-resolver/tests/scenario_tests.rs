//! End-to-end resolution scenarios for Telugu movie records
//!
//! Each test ingests fetcher output into an in-memory store, runs the
//! resolution pipeline and inspects what was committed.

mod helpers;

use chrono::Duration;
use cinefacts_resolver::db::FactStore;
use cinefacts_resolver::governance::decay::decayed_confidence;
use cinefacts_resolver::types::{
    ApprovalBasis, ConsensusDecision, DiscrepancySeverity, DiscrepancyStatus, EntityStatus,
    FieldValue, ResolutionMethod, RunOutcome, TrustTier,
};
use helpers::*;

#[tokio::test]
async fn test_rating_blended_across_tmdb_and_regional_site() {
    let (store, pipeline) = memory_pipeline(builtin_policy());
    let mut records = complete_movie("movie-magadheera", "Magadheera", 2009, day(0));
    records.push(claim("movie-magadheera", "rating", "tmdb", FieldValue::Number(7.2), day(0)));
    records.push(claim(
        "movie-magadheera",
        "rating",
        "regional:greatandhra",
        FieldValue::Number(8.5),
        day(0),
    ));
    pipeline.ingest(batch(records), day(0)).await.unwrap();

    pipeline.resolve_entity("movie-magadheera", day(1)).await.unwrap();

    let rating = store
        .get_resolved_value("movie-magadheera", "rating")
        .await
        .unwrap()
        .expect("rating resolved");
    assert_eq!(rating.value, FieldValue::Number(7.59));
    assert_eq!(rating.resolution_method, ResolutionMethod::WeightedBlend);
    // 0.7 * 0.8 + 0.3 * 0.6
    assert!((rating.confidence_score - 0.74).abs() < 1e-9);
    assert_eq!(rating.contributing_sources.len(), 2);

    // Two origins and no authoritative backing: a reviewer has to look
    let queue = store.review_queue(50).await.unwrap();
    assert!(queue.iter().any(|item| item.field == "rating"));
}

#[tokio::test]
async fn test_contradicting_ratings_are_not_auto_approved() {
    let (store, pipeline) = memory_pipeline(builtin_policy());
    let mut records = complete_movie("movie-athadu", "Athadu", 2005, day(0));
    records.push(claim("movie-athadu", "rating", "tmdb", FieldValue::Number(2.0), day(0)));
    records.push(claim("movie-athadu", "rating", "regional:greatandhra", FieldValue::Number(9.0), day(0)));
    records.push(claim("movie-athadu", "rating", "regional:idlebrain", FieldValue::Number(5.0), day(0)));
    pipeline.ingest(batch(records), day(0)).await.unwrap();

    pipeline.resolve_entity("movie-athadu", day(1)).await.unwrap();

    let rating = store
        .get_resolved_value("movie-athadu", "rating")
        .await
        .unwrap()
        .expect("rating resolved");
    assert_eq!(rating.resolution_method, ResolutionMethod::WeightedBlend);
    // regional sites share their 0.3: 0.7 * 2.0 + 0.15 * 9.0 + 0.15 * 5.0
    assert_eq!(rating.value, FieldValue::Number(3.5));

    let discrepancies = store.load_discrepancies("movie-athadu").await.unwrap();
    let rating_discrepancy = discrepancies.iter().find(|d| d.field == "rating").unwrap();
    assert_eq!(rating_discrepancy.severity, DiscrepancySeverity::Critical);
    assert_eq!(rating_discrepancy.status, DiscrepancyStatus::Escalated);

    let queue = store.review_queue(50).await.unwrap();
    assert!(queue.iter().any(|item| item.field == "rating"));
}

#[tokio::test]
async fn test_curated_rating_overrides_blend() {
    let (store, pipeline) = memory_pipeline(builtin_policy());
    let mut records = complete_movie("movie-magadheera", "Magadheera", 2009, day(0));
    records.push(claim("movie-magadheera", "rating", "tmdb", FieldValue::Number(7.2), day(0)));
    records.push(claim("movie-magadheera", "rating", "regional:greatandhra", FieldValue::Number(8.5), day(0)));
    pipeline.ingest(batch(records), day(0)).await.unwrap();
    pipeline.resolve_entity("movie-magadheera", day(1)).await.unwrap();

    pipeline
        .curate(
            cinefacts_resolver::workflow::pipeline::Curation {
                entity_id: "movie-magadheera".to_string(),
                field: "rating".to_string(),
                value: FieldValue::Number(6.0),
                editor: "ravi".to_string(),
                note: None,
            },
            day(2),
        )
        .await
        .unwrap();

    let rating = store
        .get_resolved_value("movie-magadheera", "rating")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(rating.value, FieldValue::Number(6.0));
    assert_eq!(rating.resolution_method, ResolutionMethod::TrustHierarchy);
    assert!(rating
        .contributing_sources
        .iter()
        .any(|s| s.source_id == "editorial:ravi"));

    let trail = store.load_audit_trail("movie-magadheera").await.unwrap();
    let decision = trail
        .last()
        .unwrap()
        .decisions
        .iter()
        .find(|d| d.field == "rating")
        .unwrap();
    assert!(decision.rationale.contains("editorial:ravi"));
}

#[tokio::test]
async fn test_year_majority_records_critical_discrepancy() {
    let policy = builtin_policy();
    let tmdb_baseline = policy.source_info("tmdb", TrustTier::Aggregator).trust;
    let threshold = policy.thresholds.auto_approve_threshold;
    let (store, pipeline) = memory_pipeline(policy);

    let records = vec![
        claim("movie-vedam", "release_year", "tmdb", FieldValue::Integer(2010), day(0)),
        claim("movie-vedam", "release_year", "imdb", FieldValue::Integer(2010), day(0)),
        claim("movie-vedam", "release_year", "omdb", FieldValue::Integer(2011), day(0)),
    ];
    pipeline.ingest(batch(records), day(0)).await.unwrap();

    let run = pipeline.resolve_entity("movie-vedam", day(1)).await.unwrap();

    let year = store
        .get_resolved_value("movie-vedam", "release_year")
        .await
        .unwrap()
        .expect("release_year resolved");
    assert_eq!(year.value, FieldValue::Integer(2010));
    assert_eq!(year.resolution_method, ResolutionMethod::Majority);
    assert!(year.confidence_score > tmdb_baseline, "above single-source baseline");
    assert!(year.confidence_score < threshold);

    let discrepancies = store.load_discrepancies("movie-vedam").await.unwrap();
    assert_eq!(discrepancies.len(), 1);
    assert_eq!(discrepancies[0].field, "release_year");
    assert_eq!(discrepancies[0].severity, DiscrepancySeverity::Critical);
    assert_eq!(discrepancies[0].status, DiscrepancyStatus::Escalated);
    assert_eq!(discrepancies[0].conflicting_values.len(), 2);

    assert!(run.outcomes.contains(&RunOutcome::CriticalDiscrepancy {
        field: "release_year".to_string()
    }));
}

#[tokio::test]
async fn test_box_office_untouched_for_400_days_goes_stale() {
    let policy = builtin_policy();
    let category = policy.category_for("worldwide_gross");
    assert_eq!(category.decay_window_days, 180.0);

    let (store, pipeline) = memory_pipeline(policy);
    let mut records = complete_movie("movie-baahubali", "Baahubali: The Beginning", 2015, day(390));
    records.extend(agreeing_claims(
        "movie-baahubali",
        "worldwide_gross",
        FieldValue::Integer(6_500_000_000),
        day(0),
    ));
    pipeline.ingest(batch(records), day(390)).await.unwrap();

    let run = pipeline.resolve_entity("movie-baahubali", day(400)).await.unwrap();
    assert_eq!(run.status, EntityStatus::ReQueued);

    let gross = store
        .get_resolved_value("movie-baahubali", "worldwide_gross")
        .await
        .unwrap()
        .unwrap();
    let fresh = decayed_confidence(gross.confidence_score, gross.observed_at, gross.observed_at, &category);
    let aged = decayed_confidence(
        gross.confidence_score,
        gross.observed_at,
        gross.observed_at + Duration::days(400),
        &category,
    );
    assert!(aged < fresh);

    let refetch = store.refetch_queue().await.unwrap();
    assert_eq!(refetch.len(), 1);
    assert_eq!(refetch[0].entity_id, "movie-baahubali");
    assert_eq!(refetch[0].fields, vec!["worldwide_gross".to_string()]);

    let trust = store.load_trust_score("movie-baahubali").await.unwrap().unwrap();
    assert_eq!(trust.status, EntityStatus::ReQueued);
    let confidence = trust
        .field_confidences
        .iter()
        .find(|c| c.field == "worldwide_gross")
        .unwrap();
    assert!(confidence.decayed < confidence.stored);

    // Stale data is flagged, never deleted
    assert!(run
        .outcomes
        .iter()
        .any(|o| matches!(o, RunOutcome::StaleData { field, .. } if field == "worldwide_gross")));
    let queue = store.review_queue(50).await.unwrap();
    assert!(queue.iter().any(|item| item.field == "worldwide_gross"));
}

#[tokio::test]
async fn test_refetched_box_office_clears_refetch_request() {
    let (store, pipeline) = memory_pipeline(builtin_policy());
    let mut records = complete_movie("movie-rrr", "RRR", 2022, day(390));
    records.extend(agreeing_claims("movie-rrr", "worldwide_gross", FieldValue::Integer(12_000_000_000), day(0)));
    pipeline.ingest(batch(records), day(390)).await.unwrap();
    pipeline.resolve_entity("movie-rrr", day(400)).await.unwrap();
    assert_eq!(store.refetch_queue().await.unwrap().len(), 1);

    pipeline
        .ingest(
            batch(agreeing_claims("movie-rrr", "worldwide_gross", FieldValue::Integer(12_000_000_000), day(401))),
            day(401),
        )
        .await
        .unwrap();
    let run = pipeline.resolve_entity("movie-rrr", day(402)).await.unwrap();

    assert_eq!(run.status, EntityStatus::Validated);
    assert!(store.refetch_queue().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_automated_opinion_never_auto_approved() {
    let (store, pipeline) = memory_pipeline(builtin_policy());
    let mut records = complete_movie("movie-eega", "Eega", 2012, day(0));
    for source in ["tmdb", "imdb", "omdb", "letterboxd"] {
        records.push(claim(
            "movie-eega",
            "review_verdict",
            source,
            FieldValue::Text("Must watch".to_string()),
            day(0),
        ));
    }
    pipeline.ingest(batch(records), day(0)).await.unwrap();
    pipeline.resolve_entity("movie-eega", day(1)).await.unwrap();

    assert!(store
        .get_resolved_value("movie-eega", "review_verdict")
        .await
        .unwrap()
        .is_none());

    let queue = store.review_queue(50).await.unwrap();
    let item = queue
        .iter()
        .find(|item| item.field == "review_verdict")
        .expect("opinion queued for review");
    assert_eq!(item.candidate, Some(FieldValue::Text("Must watch".to_string())));

    let trail = store.load_audit_trail("movie-eega").await.unwrap();
    let decision = trail[0]
        .decisions
        .iter()
        .find(|d| d.field == "review_verdict")
        .unwrap();
    assert!(matches!(
        decision.decision,
        Some(ConsensusDecision::QueueForReview { .. })
    ));
}

#[tokio::test]
async fn test_editorial_opinion_is_published() {
    let (store, pipeline) = memory_pipeline(builtin_policy());
    pipeline
        .ingest(batch(complete_movie("movie-eega", "Eega", 2012, day(0))), day(0))
        .await
        .unwrap();

    let run = pipeline
        .curate(
            cinefacts_resolver::workflow::pipeline::Curation {
                entity_id: "movie-eega".to_string(),
                field: "review_verdict".to_string(),
                value: FieldValue::Text("An inventive revenge fantasy".to_string()),
                editor: "lakshmi".to_string(),
                note: None,
            },
            day(2),
        )
        .await
        .unwrap();
    assert_eq!(run.status, EntityStatus::Validated);

    let verdict = store
        .get_resolved_value("movie-eega", "review_verdict")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(verdict.resolution_method, ResolutionMethod::Editorial);
    assert_eq!(verdict.contributing_sources[0].source_id, "editorial:lakshmi");

    let trail = store.load_audit_trail("movie-eega").await.unwrap();
    let decision = trail
        .last()
        .unwrap()
        .decisions
        .iter()
        .find(|d| d.field == "review_verdict")
        .unwrap();
    assert_eq!(
        decision.decision,
        Some(ConsensusDecision::AutoApprove {
            basis: ApprovalBasis::HumanAuthored {
                editor: "lakshmi".to_string()
            }
        })
    );
}

#[tokio::test]
async fn test_editorial_contradicting_official_certificate_is_reviewed() {
    let (store, pipeline) = memory_pipeline(builtin_policy());
    let mut records = complete_movie("movie-pushpa", "Pushpa: The Rise", 2021, day(0));
    records.push(claim("movie-pushpa", "certification", "cbfc", FieldValue::Text("UA".to_string()), day(0)));
    pipeline.ingest(batch(records), day(0)).await.unwrap();

    pipeline
        .curate(
            cinefacts_resolver::workflow::pipeline::Curation {
                entity_id: "movie-pushpa".to_string(),
                field: "certification".to_string(),
                value: FieldValue::Text("A".to_string()),
                editor: "ravi".to_string(),
                note: Some("re-certified after extended cut".to_string()),
            },
            day(1),
        )
        .await
        .unwrap();

    let certificate = store
        .get_resolved_value("movie-pushpa", "certification")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(certificate.value, FieldValue::Text("A".to_string()));
    assert_eq!(certificate.resolution_method, ResolutionMethod::TrustHierarchy);
    assert!(certificate.confidence_score < 0.85);

    let queue = store.review_queue(50).await.unwrap();
    assert!(queue.iter().any(|item| item.field == "certification"));
}

#[tokio::test]
async fn test_box_office_verdict_derived_from_approved_inputs() {
    let (store, pipeline) = memory_pipeline(builtin_policy());
    let mut records = complete_movie("movie-arjun-reddy", "Arjun Reddy", 2017, day(0));
    records.extend(agreeing_claims("movie-arjun-reddy", "budget", FieldValue::Integer(50_000_000), day(0)));
    records.extend(agreeing_claims(
        "movie-arjun-reddy",
        "worldwide_gross",
        FieldValue::Integer(510_000_000),
        day(0),
    ));
    // Derived fields submitted by a source are ignored
    records.push(claim(
        "movie-arjun-reddy",
        "box_office_verdict",
        "tmdb",
        FieldValue::Text("flop".to_string()),
        day(0),
    ));
    pipeline.ingest(batch(records), day(0)).await.unwrap();
    pipeline.resolve_entity("movie-arjun-reddy", day(1)).await.unwrap();

    let verdict = store
        .get_resolved_value("movie-arjun-reddy", "box_office_verdict")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(verdict.value, FieldValue::Text("blockbuster".to_string()));
    assert_eq!(verdict.resolution_method, ResolutionMethod::Derived);

    let ratio = store
        .get_resolved_value("movie-arjun-reddy", "box_office_ratio")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(ratio.value, FieldValue::Number(10.2));
}
