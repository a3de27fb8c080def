#![allow(dead_code)]

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio::time::timeout;

use latency_dash::error::AppResult;
use latency_dash::hub::Hub;
use latency_dash::metrics::{Aggregator, AggregatorConfig, EventQueue};
use latency_dash::shutdown::{self, ShutdownSender};
use latency_dash::{pipeline, server, AppState};

pub const TEST_TIMEOUT: Duration = Duration::from_secs(3);
pub const MS: i64 = 1_000_000;

/// A server bound to an ephemeral port, wired the way the binary wires it.
pub struct TestServer {
    pub addr: SocketAddr,
    pub aggregator: Arc<Aggregator>,
    pub hub: Arc<Hub>,
    pub shutdown: ShutdownSender,
    pub server: JoinHandle<AppResult<()>>,
    /// Held here, undrained, when the pipeline is not running.
    pub events: Option<EventQueue>,
}

impl TestServer {
    pub async fn start() -> Self {
        Self::start_with(AggregatorConfig::default(), true).await
    }

    /// Without the pipeline nothing drains the inbound queue.
    pub async fn start_with(config: AggregatorConfig, run_pipeline: bool) -> Self {
        let (aggregator, events) = Aggregator::new(config);
        let aggregator = Arc::new(aggregator);
        let hub = Arc::new(Hub::new(aggregator.clone(), 64));
        let shutdown = shutdown::channel();

        let events = if run_pipeline {
            tokio::spawn(pipeline::run(
                aggregator.clone(),
                hub.clone(),
                events,
                shutdown.subscribe(),
            ));
            None
        } else {
            Some(events)
        };

        let state = AppState::new(aggregator.clone(), hub.clone(), shutdown.clone());
        let app = server::create_router(Arc::new(state), "static");
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = {
            let shutdown = shutdown.clone();
            tokio::spawn(async move { server::serve(listener, app, &shutdown).await })
        };

        Self {
            addr,
            aggregator,
            hub,
            shutdown,
            server,
            events,
        }
    }

    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }
}

/// Polls `condition` every 10 ms until it holds or the test timeout passes.
pub async fn eventually<F>(mut condition: F)
where
    F: FnMut() -> bool,
{
    let waited = timeout(TEST_TIMEOUT, async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await;
    assert!(waited.is_ok(), "condition not reached in {TEST_TIMEOUT:?}");
}

pub async fn within<F: Future>(future: F) -> F::Output {
    timeout(TEST_TIMEOUT, future).await.expect("timed out")
}
