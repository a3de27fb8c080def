use axum::{
    extract::State,
    response::sse::{Event, KeepAlive, Sse},
    Json,
};
use futures_util::StreamExt;
use serde::Serialize;
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;
use tokio_stream::wrappers::IntervalStream;

use super::aggregator::AggregatorStatus;
use crate::AppState;

/// Everything the status endpoints report.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusSnapshot {
    #[serde(flatten)]
    pub aggregator: AggregatorStatus,
    pub consumers: usize,
    pub uptime_secs: f64,
}

impl StatusSnapshot {
    pub fn capture(state: &AppState) -> Self {
        Self {
            aggregator: state.aggregator.status(),
            consumers: state.hub.consumer_count(),
            uptime_secs: state.started_at.elapsed().as_secs_f64(),
        }
    }
}

// ─── GET /api/status ─────────────────────────────────────────────
/// Returns a single JSON snapshot.

pub async fn get_status(State(state): State<Arc<AppState>>) -> Json<StatusSnapshot> {
    Json(StatusSnapshot::capture(&state))
}

// ─── GET /api/status/stream ──────────────────────────────────────
/// Server-Sent Events endpoint.
/// Pushes a full `StatusSnapshot` as JSON every 500 ms until shutdown.

pub async fn status_stream(
    State(state): State<Arc<AppState>>,
) -> Sse<impl tokio_stream::Stream<Item = Result<Event, Infallible>>> {
    let interval = tokio::time::interval(Duration::from_millis(500));
    let mut shutdown = state.shutdown.subscribe();

    let stream = IntervalStream::new(interval)
        .map(move |_| {
            let snapshot = StatusSnapshot::capture(&state);
            let json = serde_json::to_string(&snapshot).unwrap_or_default();
            Ok(Event::default().data(json))
        })
        .take_until(async move {
            let _ = shutdown.recv().await;
        });

    Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("keep-alive"),
    )
}
