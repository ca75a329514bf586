//! Integration tests for placelore-dp API endpoints

use axum::{
    body::Body,
    http::{Request, StatusCode},
};
use http_body_util::BodyExt;
use serde_json::json;
use std::sync::Arc;
use tower::util::ServiceExt;

use placelore_common::events::EventBus;
use placelore_dp::cache::TtlCache;
use placelore_dp::clients::maps::{MapsError, MapsPlatform, RawPlaceResult};
use placelore_dp::clients::oracle::{
    ConversationTurn, ExtractionOracle, ExtractionResponse, OracleError,
};
use placelore_dp::dedup::DuplicateDetector;
use placelore_dp::enrichment::EnrichmentQueue;
use placelore_dp::models::{GeoPoint, Scope};
use placelore_dp::normalizer::Normalizer;
use placelore_dp::orchestrator::DiscoveryOrchestrator;
use placelore_dp::sources::{PlacesSearchAdapter, SourceAdapter};
use placelore_dp::store::MemoryPlaceStore;
use placelore_dp::AppState;

/// Maps stub returning one fixed place for every query
struct OneResultMaps;

#[async_trait::async_trait]
impl MapsPlatform for OneResultMaps {
    async fn search_nearby(
        &self,
        query: &str,
        _scope: &Scope,
    ) -> Result<Vec<RawPlaceResult>, MapsError> {
        if query == "restaurant" {
            Ok(vec![RawPlaceResult {
                name: "Joe's Diner".to_string(),
                address: Some("12 Main Street".to_string()),
                lat: Some(6.6018),
                lng: Some(3.3515),
                categories: vec!["restaurant".to_string()],
                extra: json!({ "service_type": "dine_in" }),
            }])
        } else {
            Ok(vec![])
        }
    }

    async fn geocode(&self, address: &str) -> Result<GeoPoint, MapsError> {
        Err(MapsError::NoResult(address.to_string()))
    }

    async fn photo_urls(
        &self,
        _name: &str,
        _coordinates: &GeoPoint,
    ) -> Result<Vec<String>, MapsError> {
        Ok(vec![])
    }
}

/// Oracle stub; structured-only tests never reach it
struct UnusedOracle;

#[async_trait::async_trait]
impl ExtractionOracle for UnusedOracle {
    async fn extract(
        &self,
        _text: &str,
        _context: &[ConversationTurn],
    ) -> Result<ExtractionResponse, OracleError> {
        Err(OracleError::Timeout)
    }
}

fn create_test_app() -> axum::Router {
    let store = Arc::new(MemoryPlaceStore::new());
    let queue = EnrichmentQueue::new(100, 5, 10, 40);
    let event_bus = EventBus::new(100);

    let sources: Vec<Arc<dyn SourceAdapter>> = vec![Arc::new(PlacesSearchAdapter::new(
        Arc::new(OneResultMaps),
        TtlCache::new(60),
        vec!["restaurant".to_string()],
    ))];

    let orchestrator = Arc::new(DiscoveryOrchestrator::new(
        sources,
        Normalizer::new(Arc::new(UnusedOracle)),
        DuplicateDetector::new(),
        store,
        queue.clone(),
        event_bus.clone(),
    ));

    placelore_dp::build_router(AppState::new(orchestrator, queue, event_bus))
}

#[tokio::test]
async fn test_health_endpoint() {
    let app = create_test_app();

    let response = app
        .oneshot(
            Request::builder()
                .uri("/health")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);

    let body = response.into_body().collect().await.unwrap().to_bytes();
    let json: serde_json::Value = serde_json::from_slice(&body).unwrap();

    assert_eq!(json["status"], "ok");
    assert_eq!(json["module"], "placelore-dp");
}

#[tokio::test]
async fn test_discovery_run_saves_and_enqueues() {
    let app = create_test_app();

    let request_body = json!({ "scope": "region:lagos" });
    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/discovery/run")
                .header("content-type", "application/json")
                .body(Body::from(serde_json::to_string(&request_body).unwrap()))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);

    let body = response.into_body().collect().await.unwrap().to_bytes();
    let json: serde_json::Value = serde_json::from_slice(&body).unwrap();

    assert_eq!(json["scope"], "region:lagos");
    assert_eq!(json["saved"].as_array().unwrap().len(), 1);
    assert_eq!(json["saved"][0]["name"], "Joe's Diner");
    assert!(json["duplicates"].as_array().unwrap().is_empty());

    // The saved record is queued for enrichment at high priority
    let response = app
        .oneshot(
            Request::builder()
                .uri("/queue/stats")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    let body = response.into_body().collect().await.unwrap().to_bytes();
    let stats: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(stats["high"], 1);
}

#[tokio::test]
async fn test_rerun_reports_duplicate() {
    let app = create_test_app();
    let request_body = json!({ "scope": "region:lagos" });

    for expected_saved in [1, 0] {
        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/discovery/run")
                    .header("content-type", "application/json")
                    .body(Body::from(serde_json::to_string(&request_body).unwrap()))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = response.into_body().collect().await.unwrap().to_bytes();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["saved"].as_array().unwrap().len(), expected_saved);
    }
}

#[tokio::test]
async fn test_invalid_scope_rejected() {
    let app = create_test_app();

    let request_body = json!({ "scope": "planet:mars" });
    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/discovery/run")
                .header("content-type", "application/json")
                .body(Body::from(serde_json::to_string(&request_body).unwrap()))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let body = response.into_body().collect().await.unwrap().to_bytes();
    let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json["error"]["code"], "BAD_REQUEST");
}

#[tokio::test]
async fn test_mark_dead_unknown_record_is_404() {
    let app = create_test_app();

    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri(format!("/queue/dead/{}", uuid::Uuid::new_v4()))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}
