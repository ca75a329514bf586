//! Enrichment queue endpoints

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use uuid::Uuid;

use crate::enrichment::QueueStats;
use crate::error::ApiResult;
use crate::models::QueueItem;
use crate::AppState;

/// GET /queue/stats
pub async fn queue_stats(State(state): State<AppState>) -> Json<QueueStats> {
    Json(state.queue.stats().await)
}

/// GET /queue/dead
pub async fn dead_items(State(state): State<AppState>) -> Json<Vec<QueueItem>> {
    Json(state.queue.dead_items().await)
}

/// POST /queue/dead/:record_id
///
/// Operator cancellation: moves the record's enrichment work to the dead
/// list without waiting for its attempt budget to run out.
pub async fn mark_dead(
    State(state): State<AppState>,
    Path(record_id): Path<Uuid>,
) -> ApiResult<StatusCode> {
    state.queue.mark_dead(record_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Build queue routes
pub fn queue_routes() -> Router<AppState> {
    Router::new()
        .route("/queue/stats", get(queue_stats))
        .route("/queue/dead", get(dead_items))
        .route("/queue/dead/:record_id", post(mark_dead))
}
