//! HTTP API integration tests
//!
//! Requests go through the full router with `tower::ServiceExt::oneshot`.

mod helpers;

use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use chrono::{Duration, Utc};
use cinefacts_resolver::types::FieldValue;
use cinefacts_resolver::AppState;
use helpers::*;
use serde_json::{json, Value};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tower::util::ServiceExt;

/// Test helper: app over an in-memory store
fn create_test_app() -> (Router, AppState) {
    let (_store, pipeline) = memory_pipeline(builtin_policy());
    let state = AppState::new(Arc::new(pipeline), 2);
    (cinefacts_resolver::build_router(state.clone()), state)
}

async fn send(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let builder = Request::builder().method(method).uri(uri);
    let request = match body {
        Some(body) => builder
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let json = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, json)
}

fn recent_movie(entity_id: &str, title: &str, year: i64) -> Value {
    let retrieved_at = Utc::now() - Duration::days(1);
    let records = complete_movie(entity_id, title, year, retrieved_at);
    serde_json::to_value(batch(records)).unwrap()
}

#[tokio::test]
async fn test_health_endpoint() {
    let (app, _state) = create_test_app();
    let (status, body) = send(&app, "GET", "/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["module"], "cinefacts-resolver");
    assert_eq!(body["policy_version"], "2026.10-default");
    assert!(body.get("last_error").is_none());
}

#[tokio::test]
async fn test_ingest_resolve_and_query_fields() {
    let (app, _state) = create_test_app();

    let (status, body) = send(
        &app,
        "POST",
        "/ingest?resolve=true",
        Some(recent_movie("movie-hanu-man", "HanuMan", 2024)),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["report"]["stored"], 6);
    assert_eq!(body["resolution"]["resolved"], 1);

    let (status, body) = send(&app, "GET", "/entities/movie-hanu-man/fields/title", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["resolved"]["value"], "HanuMan");
    assert_eq!(body["resolved"]["resolution_method"], "agreement");
    assert_eq!(body["stored_confidence"], body["decayed_confidence"]);

    let (status, body) = send(&app, "GET", "/entities/movie-hanu-man/fields", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["fields"].as_array().unwrap().len(), 2);

    let (status, body) = send(&app, "GET", "/entities/movie-hanu-man/trust", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "validated");
    assert_eq!(body["overall_level"], "high");
    assert!(body["explanation"].as_str().unwrap().starts_with("status validated"));

    let (status, body) = send(&app, "GET", "/entities/movie-hanu-man/audit", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body.as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn test_missing_resources_are_404() {
    let (app, _state) = create_test_app();

    let (status, body) = send(&app, "GET", "/entities/movie-none/fields/title", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"]["code"], "NOT_FOUND");

    let (status, _) = send(&app, "GET", "/entities/movie-none/trust", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = send(&app, "GET", "/entities/movie-none/audit", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = send(&app, "POST", "/entities/movie-none/resolve", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_failed_resolution_reported_on_health() {
    let (app, _state) = create_test_app();
    send(&app, "POST", "/entities/movie-none/resolve", None).await;

    let (_, body) = send(&app, "GET", "/health", None).await;
    assert!(body["last_error"].as_str().unwrap().contains("movie-none"));
}

#[tokio::test]
async fn test_empty_ingest_is_bad_request() {
    let (app, _state) = create_test_app();
    let (status, body) = send(&app, "POST", "/ingest", Some(json!({}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "BAD_REQUEST");
}

#[tokio::test]
async fn test_provider_payload_ingest() {
    let (app, _state) = create_test_app();
    let payload = json!({
        "payloads": [{
            "provider": "tmdb",
            "entity_id": "movie-sita-ramam",
            "entity_kind": "movie",
            "title": "Sita Ramam",
            "release_date": "2022-08-05",
            "vote_average": 8.1,
            "runtime": 163,
            "budget": 0
        }]
    });
    let (status, body) = send(&app, "POST", "/ingest", Some(payload)).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["report"]["stored"].as_u64().unwrap() >= 4);
    assert_eq!(body["report"]["rejected"].as_array().unwrap().len(), 0);
    assert!(body.get("resolution").is_none());
}

#[tokio::test]
async fn test_curate_publishes_editorial_opinion() {
    let (app, _state) = create_test_app();
    send(&app, "POST", "/ingest", Some(recent_movie("movie-mahanati", "Mahanati", 2018))).await;

    let (status, body) = send(
        &app,
        "POST",
        "/entities/movie-mahanati/fields/review_verdict/curate",
        Some(json!({ "value": "A luminous biopic", "editor": "sowmya" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "validated");

    let (status, body) = send(&app, "GET", "/entities/movie-mahanati/fields/review_verdict", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["resolved"]["resolution_method"], "editorial");
    assert_eq!(body["resolved"]["value"], "A luminous biopic");
}

#[tokio::test]
async fn test_curate_without_editor_is_rejected() {
    let (app, _state) = create_test_app();
    send(&app, "POST", "/ingest", Some(recent_movie("movie-mahanati", "Mahanati", 2018))).await;

    let (status, _) = send(
        &app,
        "POST",
        "/entities/movie-mahanati/fields/title/curate",
        Some(json!({ "value": "Mahanati", "editor": " " })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_review_queue_lists_pending_items() {
    let (app, state) = create_test_app();
    let retrieved_at = Utc::now() - Duration::days(1);
    let records = vec![
        claim("movie-khaleja", "director", "tmdb", FieldValue::Text("Trivikram Srinivas".into()), retrieved_at),
        claim("movie-khaleja", "synopsis", "tmdb", FieldValue::Text("A taxi driver".into()), retrieved_at),
    ];
    state.pipeline.ingest(batch(records), Utc::now()).await.unwrap();
    state.pipeline.resolve_entity("movie-khaleja", Utc::now()).await.unwrap();

    let (status, body) = send(&app, "GET", "/review-queue?limit=1", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body.as_array().unwrap().len(), 1);

    let (_, body) = send(&app, "GET", "/review-queue", None).await;
    let fields: Vec<&str> = body
        .as_array()
        .unwrap()
        .iter()
        .map(|item| item["field"].as_str().unwrap())
        .collect();
    assert_eq!(fields, vec!["director", "synopsis"]);

    let (status, body) = send(&app, "GET", "/refetch-queue", None).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body.as_array().unwrap().is_empty());
}

#[tokio::test]
async fn test_batch_resolution_over_all_entities() {
    let (app, _state) = create_test_app();
    send(&app, "POST", "/ingest", Some(recent_movie("movie-a", "Arya", 2004))).await;
    send(&app, "POST", "/ingest", Some(recent_movie("movie-b", "Bommarillu", 2006))).await;

    let (status, body) = send(&app, "POST", "/resolve/batch", Some(json!({}))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["total"], 2);
    assert_eq!(body["resolved"], 2);
    assert_eq!(body["cancelled"], false);

    let (_, body) = send(
        &app,
        "POST",
        "/resolve/batch",
        Some(json!({ "entity_ids": ["movie-a", "movie-zzz"], "concurrency": 1 })),
    )
    .await;
    assert_eq!(body["resolved"], 1);
    assert_eq!(body["failed"], 1);
}

#[tokio::test]
async fn test_concurrent_batch_is_conflict() {
    let (app, state) = create_test_app();
    state.batch_running.store(true, Ordering::SeqCst);

    let (status, body) = send(&app, "POST", "/resolve/batch", Some(json!({}))).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"]["code"], "CONFLICT");
}
