//! Maps/places platform client
//!
//! Rate-limited HTTP client for the geographic search and geocoding
//! collaborator. The platform throttles aggressively, so every call goes
//! through a minimum-interval limiter and 429 responses are surfaced as a
//! retryable error for the caller's backoff machinery.

use crate::models::{GeoPoint, Scope};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::Mutex;

const RATE_LIMIT_MS: u64 = 200; // 5 requests per second

/// Maps platform client errors
#[derive(Debug, Error)]
pub enum MapsError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Request timed out")]
    Timeout,

    #[error("Rate limit exceeded")]
    RateLimited,

    #[error("No result for: {0}")]
    NoResult(String),

    #[error("API error {0}: {1}")]
    Api(u16, String),

    #[error("Parse error: {0}")]
    Parse(String),
}

impl MapsError {
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            MapsError::Timeout | MapsError::Network(_) | MapsError::RateLimited
        )
    }
}

/// Raw search result as returned by the platform
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawPlaceResult {
    pub name: String,
    pub address: Option<String>,
    pub lat: Option<f64>,
    pub lng: Option<f64>,
    #[serde(default)]
    pub categories: Vec<String>,
    /// Platform-specific extra payload, carried through for the moderator view
    #[serde(default)]
    pub extra: serde_json::Value,
}

/// Narrow interface the pipeline consumes
#[async_trait::async_trait]
pub trait MapsPlatform: Send + Sync {
    /// Search the platform for places matching a query within a scope
    async fn search_nearby(
        &self,
        query: &str,
        scope: &Scope,
    ) -> Result<Vec<RawPlaceResult>, MapsError>;

    /// Resolve a free-text address to coordinates
    async fn geocode(&self, address: &str) -> Result<GeoPoint, MapsError>;

    /// Fetch photo URLs for a named place near given coordinates
    async fn photo_urls(
        &self,
        name: &str,
        coordinates: &GeoPoint,
    ) -> Result<Vec<String>, MapsError>;
}

/// Minimum-interval rate limiter
struct RateLimiter {
    last_request: Mutex<Option<Instant>>,
    min_interval: Duration,
}

impl RateLimiter {
    fn new(min_interval_ms: u64) -> Self {
        Self {
            last_request: Mutex::new(None),
            min_interval: Duration::from_millis(min_interval_ms),
        }
    }

    /// Wait if necessary to comply with the rate limit
    async fn wait(&self) {
        let mut last = self.last_request.lock().await;

        if let Some(last_time) = *last {
            let elapsed = last_time.elapsed();
            if elapsed < self.min_interval {
                let wait_time = self.min_interval - elapsed;
                tracing::debug!("Rate limiting: waiting {:?}", wait_time);
                tokio::time::sleep(wait_time).await;
            }
        }

        *last = Some(Instant::now());
    }
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    results: Vec<RawPlaceResult>,
}

#[derive(Debug, Deserialize)]
struct GeocodeResponse {
    lat: f64,
    lng: f64,
}

#[derive(Debug, Deserialize)]
struct PhotosResponse {
    urls: Vec<String>,
}

/// HTTP maps platform client
pub struct HttpMapsClient {
    http_client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    rate_limiter: Arc<RateLimiter>,
}

impl HttpMapsClient {
    pub fn new(
        base_url: impl Into<String>,
        api_key: Option<String>,
        timeout_secs: u64,
    ) -> Result<Self, MapsError> {
        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| MapsError::Network(e.to_string()))?;

        Ok(Self {
            http_client,
            base_url: base_url.into(),
            api_key,
            rate_limiter: Arc::new(RateLimiter::new(RATE_LIMIT_MS)),
        })
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        params: &[(&str, &str)],
    ) -> Result<T, MapsError> {
        self.rate_limiter.wait().await;

        let url = format!("{}{}", self.base_url, path);
        let mut request = self.http_client.get(&url).query(params);
        if let Some(key) = &self.api_key {
            request = request.query(&[("key", key.as_str())]);
        }

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                MapsError::Timeout
            } else {
                MapsError::Network(e.to_string())
            }
        })?;

        let status = response.status();
        if status == 429 {
            return Err(MapsError::RateLimited);
        }
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(MapsError::Api(status.as_u16(), error_text));
        }

        response
            .json()
            .await
            .map_err(|e| MapsError::Parse(e.to_string()))
    }
}

#[async_trait::async_trait]
impl MapsPlatform for HttpMapsClient {
    async fn search_nearby(
        &self,
        query: &str,
        scope: &Scope,
    ) -> Result<Vec<RawPlaceResult>, MapsError> {
        let scope_str = scope.to_string();
        tracing::debug!(query = %query, scope = %scope_str, "Maps search");

        let response: SearchResponse = self
            .get_json("/v1/search", &[("q", query), ("scope", &scope_str)])
            .await?;

        tracing::debug!(
            query = %query,
            results = response.results.len(),
            "Maps search complete"
        );
        Ok(response.results)
    }

    async fn geocode(&self, address: &str) -> Result<GeoPoint, MapsError> {
        tracing::debug!(address = %address, "Geocoding address");

        let response: GeocodeResponse = self
            .get_json("/v1/geocode", &[("address", address)])
            .await
            .map_err(|e| match e {
                MapsError::Api(404, _) => MapsError::NoResult(address.to_string()),
                other => other,
            })?;

        Ok(GeoPoint {
            lat: response.lat,
            lng: response.lng,
        })
    }

    async fn photo_urls(
        &self,
        name: &str,
        coordinates: &GeoPoint,
    ) -> Result<Vec<String>, MapsError> {
        let lat = format!("{:.6}", coordinates.lat);
        let lng = format!("{:.6}", coordinates.lng);

        let response: PhotosResponse = self
            .get_json("/v1/photos", &[("name", name), ("lat", &lat), ("lng", &lng)])
            .await?;

        Ok(response.urls)
    }
}
