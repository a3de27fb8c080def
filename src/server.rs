use axum::{
    middleware as axum_mw,
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;
use tower_http::services::ServeDir;

use crate::error::AppResult;
use crate::handlers;
use crate::metrics::stream;
use crate::middleware::timing;
use crate::shutdown::ShutdownSender;
use crate::AppState;

/// How long open connections get to finish once shutdown is signalled.
pub const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

/// Builds the full Axum `Router` with all routes, middleware, and static serving.
pub fn create_router(state: Arc<AppState>, static_dir: &str) -> Router {
    Router::new()
        // ── Ingestion ───────────────────────────────────────────
        .route("/api/events", post(handlers::events::ingest_event))
        // ── Consumers ───────────────────────────────────────────
        .route("/ws", get(handlers::ws::ws_handler))
        // ── Status ──────────────────────────────────────────────
        .route("/api/status", get(stream::get_status))
        .route("/api/status/stream", get(stream::status_stream))
        // ── Provide shared state to all routes above ────────────
        .with_state(state)
        // ── Serve the dashboard assets ──────────────────────────
        .fallback_service(ServeDir::new(static_dir))
        // ── Global middleware (applied bottom-up) ───────────────
        .layer(axum_mw::from_fn(timing::timing_middleware))
        .layer(CorsLayer::permissive())
}

/// Serves `app` until shutdown fires, then drains connections for at most
/// [`SHUTDOWN_GRACE`] before giving up on them.
pub async fn serve(listener: TcpListener, app: Router, shutdown: &ShutdownSender) -> AppResult<()> {
    let mut signal = shutdown.subscribe();
    let mut drain = shutdown.subscribe();

    let mut server = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = signal.recv().await;
            })
            .await
    });

    tokio::select! {
        result = &mut server => return Ok(result??),
        _ = drain.recv() => {}
    }

    match tokio::time::timeout(SHUTDOWN_GRACE, &mut server).await {
        Ok(result) => Ok(result??),
        Err(_) => {
            tracing::warn!(
                grace_secs = SHUTDOWN_GRACE.as_secs(),
                "connections still open after shutdown, closing them"
            );
            server.abort();
            Ok(())
        }
    }
}
