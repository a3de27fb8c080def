use axum::{extract::State, http::StatusCode, Json};
use serde::Serialize;
use std::sync::Arc;

use crate::metrics::Event;
use crate::AppState;

use super::ApiError;

#[derive(Debug, Serialize)]
pub struct Accepted {
    pub accepted: bool,
}

// ─── POST /api/events ────────────────────────────────────────────

/// Enqueue one event for aggregation. Never waits on the queue: a full
/// queue answers 503 and the event is gone.
pub async fn ingest_event(
    State(state): State<Arc<AppState>>,
    Json(event): Json<Event>,
) -> Result<(StatusCode, Json<Accepted>), ApiError> {
    if event.target.is_empty() || event.key.is_empty() {
        return Err(ApiError::BadRequest("target and key must be non-empty".into()));
    }

    state.aggregator.try_ingest(event)?;
    Ok((StatusCode::ACCEPTED, Json(Accepted { accepted: true })))
}
