use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::time::MissedTickBehavior;

use crate::hub::Hub;
use crate::metrics::aggregator::EventQueue;
use crate::metrics::Aggregator;
use crate::shutdown::ShutdownReceiver;

// ─── Aggregation loop ────────────────────────────────────────────

/// The single writer: drains the inbound queue one event at a time and
/// hands every resulting update to the hub. Returns when the queue closes
/// or shutdown is signalled.
pub async fn run(
    aggregator: Arc<Aggregator>,
    hub: Arc<Hub>,
    mut events: EventQueue,
    mut shutdown: ShutdownReceiver,
) {
    tracing::info!("aggregation pipeline started");
    loop {
        tokio::select! {
            biased;
            _ = shutdown.recv() => break,
            event = events.recv() => {
                let Some(event) = event else { break };
                for update in aggregator.process_event(&event) {
                    hub.deliver(&update);
                }
            }
        }
    }
    tracing::info!("aggregation pipeline stopped");
}

// ─── Sweeper ─────────────────────────────────────────────────────

/// Periodically purges targets that stayed unwatched past the grace period.
pub async fn run_sweeper(
    aggregator: Arc<Aggregator>,
    every: Duration,
    mut shutdown: ShutdownReceiver,
) {
    let mut ticker = tokio::time::interval(every.max(Duration::from_millis(1)));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The first tick completes immediately; nothing can be stale yet.
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = shutdown.recv() => break,
            _ = ticker.tick() => {
                let purged = aggregator.sweep(Instant::now());
                if purged > 0 {
                    tracing::debug!(purged, "sweep finished");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hub::Outbound;
    use crate::metrics::{AggregatorConfig, Event};
    use crate::shutdown;

    #[tokio::test]
    async fn pipeline_delivers_ingested_events() {
        let (aggregator, events) = Aggregator::new(AggregatorConfig::default());
        let aggregator = Arc::new(aggregator);
        let hub = Arc::new(Hub::new(aggregator.clone(), 16));
        let shutdown_tx = shutdown::channel();

        let (id, mut rx) = hub.connect();
        hub.subscribe(id, "prod", false).unwrap();
        assert!(matches!(rx.recv().await, Some(Outbound::Batch(_))));

        let task = tokio::spawn(run(
            aggregator.clone(),
            hub.clone(),
            events,
            shutdown_tx.subscribe(),
        ));
        aggregator.try_ingest(Event::new("prod", "k", 0)).unwrap();
        aggregator.try_ingest(Event::new("prod", "k", 250_000_000)).unwrap();

        let mut counts = Vec::new();
        for _ in 0..2 {
            let Some(Outbound::Frame(frame)) = rx.recv().await else {
                panic!("expected a single frame");
            };
            let value: serde_json::Value = serde_json::from_str(&frame).unwrap();
            counts.push(value["count"].as_u64().unwrap());
        }
        assert_eq!(counts, vec![1, 2]);

        shutdown_tx.send(()).unwrap();
        task.await.unwrap();
        assert_eq!(
            aggregator.try_ingest(Event::new("prod", "k", 1)),
            Err(crate::error::IngestError::Closed)
        );
    }

    #[tokio::test]
    async fn sweeper_purges_on_interval() {
        let (aggregator, _events) = Aggregator::new(AggregatorConfig {
            grace_period: Duration::ZERO,
            ..AggregatorConfig::default()
        });
        let aggregator = Arc::new(aggregator);
        aggregator.process_event(&Event::new("prod", "k", 0));

        let shutdown_tx = shutdown::channel();
        let task = tokio::spawn(run_sweeper(
            aggregator.clone(),
            Duration::from_millis(20),
            shutdown_tx.subscribe(),
        ));

        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(aggregator.status().targets, 0);

        shutdown_tx.send(()).unwrap();
        task.await.unwrap();
    }
}
