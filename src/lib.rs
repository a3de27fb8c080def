use std::sync::Arc;
use std::time::Instant;

pub mod config;
pub mod error;
pub mod generator;
pub mod handlers;
pub mod hub;
pub mod logger;
pub mod metrics;
pub mod middleware;
pub mod pipeline;
pub mod server;
pub mod shutdown;

/// Shared application state available to every handler via `State<Arc<AppState>>`.
pub struct AppState {
    /// Owns every target and series; producers enqueue into it.
    pub aggregator: Arc<metrics::Aggregator>,

    /// Connected consumers and their subscriptions.
    pub hub: Arc<hub::Hub>,

    /// Long-lived responses (status streams, sockets) end when this fires.
    pub shutdown: shutdown::ShutdownSender,

    pub started_at: Instant,
}

impl AppState {
    pub fn new(
        aggregator: Arc<metrics::Aggregator>,
        hub: Arc<hub::Hub>,
        shutdown: shutdown::ShutdownSender,
    ) -> Self {
        Self {
            aggregator,
            hub,
            shutdown,
            started_at: Instant::now(),
        }
    }
}
