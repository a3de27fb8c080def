use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use hdrhistogram::Histogram;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::{self, error::TrySendError};

use super::monitor::TargetMonitor;
use super::percentiles::PercentileSet;
use super::series::{IntervalStats, SeriesId, SeriesStats};
use super::window::DEFAULT_WINDOW_CAPACITY;
use super::{unix_nanos_now, Event, Metadata};
use crate::error::IngestError;
use crate::hub::ConsumerId;

// ─── Configuration ───────────────────────────────────────────────

pub const DEFAULT_QUEUE_CAPACITY: usize = 1000;
pub const DEFAULT_GRACE_PERIOD: Duration = Duration::from_secs(300);

/// HdrHistogram range for pipeline lag: 1 μs → 60 s, 3 significant figures
const LAG_HIST_LOW: u64 = 1;
const LAG_HIST_HIGH: u64 = 60_000_000;
const LAG_HIST_SIGFIG: u8 = 3;

#[derive(Debug, Clone)]
pub struct AggregatorConfig {
    /// Timestamps kept per series
    pub window_capacity: usize,
    /// Inbound events buffered ahead of the aggregation loop
    pub queue_capacity: usize,
    /// How long an unwatched target keeps accumulating before it is purged
    pub grace_period: Duration,
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        Self {
            window_capacity: DEFAULT_WINDOW_CAPACITY,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            grace_period: DEFAULT_GRACE_PERIOD,
        }
    }
}

// ─── Public types ────────────────────────────────────────────────

/// Snapshot of one series, emitted every time that series changes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsUpdate {
    pub target: String,
    pub key: String,
    /// Empty for combined series
    pub metadata: Metadata,
    #[serde(flatten)]
    pub stats: IntervalStats,
    pub emitted_at_nanos: i64,
    /// Which subscription preference this series was computed under
    pub split_by_metadata: bool,
}

impl MetricsUpdate {
    fn from_series(series: &SeriesStats, stats: IntervalStats, emitted_at_nanos: i64) -> Self {
        Self {
            target: series.target().to_owned(),
            key: series.key().to_owned(),
            metadata: series.metadata().clone(),
            stats,
            emitted_at_nanos,
            split_by_metadata: series.is_split(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregatorStatus {
    pub targets: usize,
    pub series: usize,
    pub subscriptions: usize,
    pub processed_events: u64,
    pub dropped_events: u64,
    /// Emission time minus event send time, in μs
    pub pipeline_lag: PercentileSet,
}

/// Receiving end of the inbound event queue, drained by the pipeline.
pub type EventQueue = mpsc::Receiver<Event>;

/// Owns every target monitor and, through them, every series.
///
/// Producers call [`Aggregator::try_ingest`]; a single pipeline task drains
/// the queue through [`Aggregator::process_event`]. Subscription changes
/// arrive from the hub via [`Aggregator::update_subscription`].
pub struct Aggregator {
    config: AggregatorConfig,
    targets: RwLock<HashMap<String, Arc<TargetMonitor>>>,
    queue: mpsc::Sender<Event>,
    processed: AtomicU64,
    dropped: AtomicU64,
    pipeline_lag: Mutex<Option<Histogram<u64>>>,
}

// ─── Aggregator impl ─────────────────────────────────────────────

impl Aggregator {
    pub fn new(config: AggregatorConfig) -> (Self, EventQueue) {
        let (queue, events) = mpsc::channel(config.queue_capacity.max(1));

        let histogram =
            Histogram::<u64>::new_with_bounds(LAG_HIST_LOW, LAG_HIST_HIGH, LAG_HIST_SIGFIG);
        let pipeline_lag = match histogram {
            Ok(hist) => Some(hist),
            Err(err) => {
                tracing::warn!("Failed to initialize pipeline lag histogram: {}", err);
                None
            }
        };

        let aggregator = Self {
            config,
            targets: RwLock::new(HashMap::new()),
            queue,
            processed: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
            pipeline_lag: Mutex::new(pipeline_lag),
        };
        (aggregator, events)
    }

    /// Enqueue an event without waiting. A full queue drops the event.
    pub fn try_ingest(&self, event: Event) -> Result<(), IngestError> {
        match self.queue.try_send(event) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(event)) => {
                let dropped = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                tracing::debug!(
                    target_id = %event.target,
                    key = %event.key,
                    dropped,
                    "event queue full, dropping event"
                );
                Err(IngestError::QueueFull)
            }
            Err(TrySendError::Closed(_)) => Err(IngestError::Closed),
        }
    }

    /// Fold one event into every series its target currently tracks and
    /// return one update per touched series.
    pub fn process_event(&self, event: &Event) -> Vec<MetricsUpdate> {
        let emitted_at = unix_nanos_now();
        let monitor = self.monitor_or_create(&event.target);

        let updates = monitor
            .active_modes()
            .iter()
            .map(|split| {
                let id = SeriesId::for_mode(&event.target, &event.key, &event.metadata, split);
                let series = monitor.series_or_insert_with(id, || {
                    SeriesStats::new(
                        event.target.clone(),
                        event.key.clone(),
                        event.metadata.clone(),
                        split,
                        self.config.window_capacity,
                    )
                });
                let stats = series.update(event.server_timestamp_nanos, event.payload_size);
                MetricsUpdate::from_series(&series, stats, emitted_at)
            })
            .collect();

        self.processed.fetch_add(1, Ordering::Relaxed);
        self.record_lag(emitted_at.saturating_sub(event.server_timestamp_nanos));
        updates
    }

    /// Add or remove a consumer on a target. Resubscribing never resets
    /// the target's series.
    pub fn update_subscription(
        &self,
        target: &str,
        consumer: ConsumerId,
        subscribed: bool,
        split_by_metadata: bool,
    ) {
        let now = Instant::now();

        // The map read lock is held across the mutation so a concurrent
        // sweep cannot drop the monitor in between.
        {
            let targets = self.targets.read();
            if let Some(monitor) = targets.get(target) {
                monitor.set_subscription(consumer, subscribed, split_by_metadata, now);
                return;
            }
        }

        if !subscribed {
            return;
        }

        let mut targets = self.targets.write();
        targets
            .entry(target.to_owned())
            .or_insert_with(|| Arc::new(TargetMonitor::new(now)))
            .set_subscription(consumer, subscribed, split_by_metadata, now);
    }

    /// Purge every target that has been unwatched for longer than the
    /// grace period. Returns how many targets were removed.
    pub fn sweep(&self, now: Instant) -> usize {
        let grace = self.config.grace_period;
        let mut targets = self.targets.write();
        let before = targets.len();

        targets.retain(|name, monitor| {
            let expired = monitor.is_expired(now, grace);
            if expired {
                tracing::info!(
                    target_id = %name,
                    series = monitor.series_count(),
                    "purging quiescent target"
                );
            }
            !expired
        });

        before - targets.len()
    }

    /// Current state of every series on `target` under one preference.
    pub fn snapshot(&self, target: &str, split_by_metadata: bool) -> Vec<MetricsUpdate> {
        let Some(monitor) = self.monitor(target) else {
            return Vec::new();
        };
        let emitted_at = unix_nanos_now();
        monitor
            .series_matching(split_by_metadata)
            .iter()
            .map(|series| MetricsUpdate::from_series(series, series.snapshot(), emitted_at))
            .collect()
    }

    pub fn monitor(&self, target: &str) -> Option<Arc<TargetMonitor>> {
        self.targets.read().get(target).cloned()
    }

    pub fn status(&self) -> AggregatorStatus {
        let (targets, series, subscriptions) = {
            let targets = self.targets.read();
            let series = targets.values().map(|m| m.series_count()).sum();
            let subscriptions = targets.values().map(|m| m.subscriber_count()).sum();
            (targets.len(), series, subscriptions)
        };

        let pipeline_lag = self
            .pipeline_lag
            .lock()
            .as_ref()
            .map(PercentileSet::from_histogram)
            .unwrap_or_else(PercentileSet::empty);

        AggregatorStatus {
            targets,
            series,
            subscriptions,
            processed_events: self.processed.load(Ordering::Relaxed),
            dropped_events: self.dropped.load(Ordering::Relaxed),
            pipeline_lag,
        }
    }

    fn monitor_or_create(&self, target: &str) -> Arc<TargetMonitor> {
        if let Some(monitor) = self.targets.read().get(target) {
            return monitor.clone();
        }
        self.targets
            .write()
            .entry(target.to_owned())
            .or_insert_with(|| Arc::new(TargetMonitor::new(Instant::now())))
            .clone()
    }

    fn record_lag(&self, lag_nanos: i64) {
        let lag_us = (lag_nanos / 1_000).clamp(LAG_HIST_LOW as i64, LAG_HIST_HIGH as i64) as u64;
        let mut slot = self.pipeline_lag.lock();
        if let Some(hist) = slot.as_mut() {
            if let Err(err) = hist.record(lag_us) {
                tracing::warn!("Disabling pipeline lag histogram after error: {}", err);
                *slot = None;
            }
        }
    }
}
