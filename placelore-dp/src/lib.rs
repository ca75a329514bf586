//! placelore-dp - Discovery & Enrichment Pipeline
//!
//! Turns heterogeneous discovery sources (structured place search, web text
//! harvesting) into canonical pending records: adapters fan out per scope,
//! candidates are normalized (free text via the AI extraction oracle),
//! deduplicated against the persisted set, saved for moderation, and queued
//! for asynchronous enrichment.

pub mod api;
pub mod cache;
pub mod clients;
pub mod dedup;
pub mod enrichment;
pub mod error;
pub mod models;
pub mod normalizer;
pub mod orchestrator;
pub mod sources;
pub mod store;

pub use crate::error::{ApiError, ApiResult};

use axum::Router;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio::sync::RwLock;
use tower_http::cors::CorsLayer;

use crate::enrichment::EnrichmentQueue;
use crate::orchestrator::DiscoveryOrchestrator;
use placelore_common::events::EventBus;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<DiscoveryOrchestrator>,
    pub queue: EnrichmentQueue,
    /// Event bus for SSE broadcasting
    pub event_bus: EventBus,
    /// Service startup timestamp for uptime tracking
    pub startup_time: DateTime<Utc>,
    /// Last error for diagnostic purposes
    pub last_error: Arc<RwLock<Option<String>>>,
}

impl AppState {
    pub fn new(
        orchestrator: Arc<DiscoveryOrchestrator>,
        queue: EnrichmentQueue,
        event_bus: EventBus,
    ) -> Self {
        Self {
            orchestrator,
            queue,
            event_bus,
            startup_time: Utc::now(),
            last_error: Arc::new(RwLock::new(None)),
        }
    }
}

/// Build application router
pub fn build_router(state: AppState) -> Router {
    use axum::routing::get;

    Router::new()
        .merge(api::discovery_routes())
        .merge(api::queue_routes())
        .route("/events", get(api::event_stream))
        .merge(api::health_routes())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
