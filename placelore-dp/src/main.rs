//! placelore-dp - Discovery & Enrichment Pipeline service
//!
//! **Module Identity:**
//! - Name: placelore-dp (Discovery Pipeline)
//! - Default port: 5810
//!
//! Discovers place candidates from configured sources, normalizes and
//! deduplicates them, persists survivors for moderation, and enriches them
//! asynchronously. Integrates with the rest of Placelore via HTTP REST + SSE.

use anyhow::Result;
use std::path::Path;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

use placelore_common::config::PipelineConfig;
use placelore_common::events::EventBus;
use placelore_dp::cache::TtlCache;
use placelore_dp::clients::maps::HttpMapsClient;
use placelore_dp::clients::oracle::HttpOracleClient;
use placelore_dp::dedup::DuplicateDetector;
use placelore_dp::enrichment::{EnrichmentQueue, PlaceEnricher};
use placelore_dp::normalizer::Normalizer;
use placelore_dp::orchestrator::DiscoveryOrchestrator;
use placelore_dp::sources::{
    HttpPageFetcher, PlacesSearchAdapter, SourceAdapter, WebHarvestAdapter,
};
use placelore_dp::store::{init_database_pool, SqlitePlaceStore};
use placelore_dp::AppState;

/// Category queries issued by the places-search adapter each run
const DEFAULT_SEARCH_QUERIES: &[&str] = &["restaurant", "cafe", "bar", "street food"];

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!("Starting placelore-dp (Discovery Pipeline) service");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let config_path =
        std::env::var("PLACELORE_CONFIG").unwrap_or_else(|_| "placelore.toml".to_string());
    let config = PipelineConfig::load(Path::new(&config_path))?;

    let db_pool = init_database_pool(&config.database_path).await?;
    info!("Database connection established: {}", config.database_path);
    let store = Arc::new(SqlitePlaceStore::new(db_pool));

    let event_bus = EventBus::new(100);

    // External clients
    let oracle = Arc::new(HttpOracleClient::new(
        config.oracle_base_url.clone(),
        config.oracle_api_key.clone(),
        config.external_timeout_secs,
    )?);
    let maps = Arc::new(HttpMapsClient::new(
        config.maps_base_url.clone(),
        config.maps_api_key.clone(),
        config.external_timeout_secs,
    )?);
    let fetcher = Arc::new(HttpPageFetcher::new(config.external_timeout_secs)?);

    // Shared TTL cache for source responses
    let search_cache = TtlCache::new(config.cache_ttl_secs);
    let harvest_cache = TtlCache::new(config.cache_ttl_secs);
    if config.cache_sweep_secs > 0 {
        let _ = search_cache.spawn_sweeper(config.cache_sweep_secs);
        let _ = harvest_cache.spawn_sweeper(config.cache_sweep_secs);
    }

    let sources: Vec<Arc<dyn SourceAdapter>> = vec![
        Arc::new(PlacesSearchAdapter::new(
            maps.clone(),
            search_cache,
            DEFAULT_SEARCH_QUERIES.iter().map(|q| q.to_string()).collect(),
        )),
        Arc::new(WebHarvestAdapter::new(fetcher, harvest_cache, vec![])),
    ];
    info!("Discovery sources registered: {}", sources.len());

    // Enrichment queue and worker pool
    let queue = EnrichmentQueue::from_config(&config);
    let enricher = Arc::new(PlaceEnricher::new(store.clone(), maps));
    queue.start_workers(config.enrichment_workers, enricher, event_bus.clone());
    info!("Enrichment workers started: {}", config.enrichment_workers);

    let orchestrator = Arc::new(DiscoveryOrchestrator::new(
        sources,
        Normalizer::new(oracle),
        DuplicateDetector::new(),
        store,
        queue.clone(),
        event_bus.clone(),
    ));

    let state = AppState::new(orchestrator, queue, event_bus);
    let app = placelore_dp::build_router(state);

    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("Listening on http://{}", addr);
    info!("Health check: http://{}/health", addr);

    axum::serve(listener, app).await?;

    Ok(())
}
