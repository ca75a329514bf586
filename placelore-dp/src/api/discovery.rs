//! Discovery run endpoint

use axum::{extract::State, routing::post, Json, Router};
use serde::Deserialize;

use crate::error::{ApiError, ApiResult};
use crate::models::Scope;
use crate::orchestrator::DiscoverySummary;
use crate::AppState;

/// Request body for POST /discovery/run
#[derive(Debug, Deserialize)]
pub struct RunDiscoveryRequest {
    /// Scope string, e.g. "global", "country:ng", "region:lagos"
    pub scope: String,
    /// Restrict the run to these adapters; omit to run all
    #[serde(default)]
    pub sources: Option<Vec<String>>,
}

/// POST /discovery/run
///
/// Runs discovery synchronously and returns the run summary. Adapter and
/// per-candidate failures are reported inside the summary rather than as an
/// HTTP error.
pub async fn run_discovery(
    State(state): State<AppState>,
    Json(request): Json<RunDiscoveryRequest>,
) -> ApiResult<Json<DiscoverySummary>> {
    let scope: Scope = request.scope.parse().map_err(ApiError::BadRequest)?;

    let summary = state
        .orchestrator
        .run_discovery(&scope, request.sources.as_deref())
        .await
        .map_err(|e| {
            let api_error: ApiError = e.into();
            record_last_error(&state, &api_error);
            api_error
        })?;

    Ok(Json(summary))
}

fn record_last_error(state: &AppState, error: &ApiError) {
    let last_error = state.last_error.clone();
    let message = error.to_string();
    tokio::spawn(async move {
        *last_error.write().await = Some(message);
    });
}

/// Build discovery routes
pub fn discovery_routes() -> Router<AppState> {
    Router::new().route("/discovery/run", post(run_discovery))
}
