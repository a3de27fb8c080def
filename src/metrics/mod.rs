pub mod aggregator;
pub mod monitor;
pub mod percentiles;
pub mod series;
pub mod stream;
pub mod window;

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

pub use aggregator::{Aggregator, AggregatorConfig, AggregatorStatus, EventQueue, MetricsUpdate};
pub use series::{IntervalStats, SeriesId, SeriesStats};
pub use window::SampleWindow;

/// Event metadata. Ordered by key so iteration is deterministic.
pub type Metadata = BTreeMap<String, String>;

/// A single timestamped observation pushed in by a producer.
/// Producers build these and enqueue them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    /// Namespace grouping many keys, e.g. "prod-us-east"
    pub target: String,
    pub key: String,
    /// Producer-side send time, nanoseconds since the Unix epoch
    pub server_timestamp_nanos: i64,
    #[serde(default)]
    pub payload_size: u32,
    #[serde(default)]
    pub metadata: Metadata,
}

impl Event {
    pub fn new(
        target: impl Into<String>,
        key: impl Into<String>,
        server_timestamp_nanos: i64,
    ) -> Self {
        Self {
            target: target.into(),
            key: key.into(),
            server_timestamp_nanos,
            payload_size: 0,
            metadata: Metadata::new(),
        }
    }

    pub fn with_payload_size(mut self, payload_size: u32) -> Self {
        self.payload_size = payload_size;
        self
    }

    pub fn with_metadata<K, V>(mut self, key: K, value: V) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

/// Wall-clock "now" in Unix nanoseconds.
pub fn unix_nanos_now() -> i64 {
    chrono::Utc::now().timestamp_nanos_opt().unwrap_or_default()
}
