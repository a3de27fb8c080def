use std::fmt::{self, Write as _};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use super::percentiles::{nearest_rank, P90};
use super::window::SampleWindow;
use super::Metadata;

const NANOS_PER_MILLI: f64 = 1_000_000.0;

// ─── Series identity ─────────────────────────────────────────────

/// Canonical identity of one tracked series.
///
/// Every component is length-prefixed, so no choice of target, key or
/// metadata text can make two different series render to the same string.
/// Split identities walk the metadata in key order, which makes them
/// independent of the order the producer inserted the pairs in.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SeriesId(String);

impl SeriesId {
    /// Identity with metadata aggregated away.
    pub fn combined(target: &str, key: &str) -> Self {
        let mut canonical = String::with_capacity(target.len() + key.len() + 8);
        canonical.push('c');
        push_component(&mut canonical, target);
        push_component(&mut canonical, key);
        Self(canonical)
    }

    /// Identity distinguished by every metadata pair.
    pub fn split(target: &str, key: &str, metadata: &Metadata) -> Self {
        let mut canonical = String::with_capacity(target.len() + key.len() + 32);
        canonical.push('s');
        push_component(&mut canonical, target);
        push_component(&mut canonical, key);
        for (name, value) in metadata {
            push_component(&mut canonical, name);
            push_component(&mut canonical, value);
        }
        Self(canonical)
    }

    pub fn for_mode(
        target: &str,
        key: &str,
        metadata: &Metadata,
        split_by_metadata: bool,
    ) -> Self {
        if split_by_metadata {
            Self::split(target, key, metadata)
        } else {
            Self::combined(target, key)
        }
    }
}

fn push_component(buf: &mut String, part: &str) {
    // Writing into a String cannot fail.
    let _ = write!(buf, "|{}:{}", part.len(), part);
}

// ─── Statistics ──────────────────────────────────────────────────

/// Interval-latency statistics for one series, all in milliseconds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IntervalStats {
    pub min: f64,
    pub max: f64,
    pub avg: f64,
    pub p90: f64,
    /// Events seen, including the first one that carries no interval.
    pub count: u64,
    pub last_payload_size: u32,
}

/// One series: its sample window plus the statistics derived from it.
///
/// The window and every numeric field sit behind a single lock, so a
/// snapshot can never mix the min of one update with the max of another.
pub struct SeriesStats {
    target: String,
    key: String,
    /// Empty for combined series.
    metadata: Metadata,
    split_by_metadata: bool,
    state: Mutex<SeriesState>,
}

struct SeriesState {
    window: SampleWindow,
    stats: IntervalStats,
}

impl SeriesStats {
    pub fn new(
        target: impl Into<String>,
        key: impl Into<String>,
        metadata: Metadata,
        split_by_metadata: bool,
        window_capacity: usize,
    ) -> Self {
        Self {
            target: target.into(),
            key: key.into(),
            metadata: if split_by_metadata { metadata } else { Metadata::new() },
            split_by_metadata,
            state: Mutex::new(SeriesState {
                window: SampleWindow::new(window_capacity),
                stats: IntervalStats::default(),
            }),
        }
    }

    /// Fold one event timestamp into the series and return the new stats.
    pub fn update(&self, timestamp_nanos: i64, payload_size: u32) -> IntervalStats {
        let mut guard = self.state.lock();
        let SeriesState { window, stats } = &mut *guard;

        let Some(previous) = window.record(timestamp_nanos) else {
            // First sighting: presence only, no interval yet.
            *stats = IntervalStats {
                count: 1,
                last_payload_size: payload_size,
                ..IntervalStats::default()
            };
            return *stats;
        };

        // Out-of-order or equal timestamps count as a zero interval.
        let interval_ns = timestamp_nanos.saturating_sub(previous).max(0);
        let interval = interval_ns as f64 / NANOS_PER_MILLI;

        let seen = stats.count as f64;
        stats.min = stats.min.min(interval);
        stats.max = stats.max.max(interval);
        // Incremental mean; the clamp absorbs float drift at the edges.
        stats.avg = ((stats.avg * seen + interval) / (seen + 1.0)).clamp(stats.min, stats.max);
        stats.count += 1;
        stats.last_payload_size = payload_size;
        stats.p90 = window_p90(window);

        *stats
    }

    pub fn snapshot(&self) -> IntervalStats {
        self.state.lock().stats
    }

    /// Number of timestamps currently held in the window.
    #[cfg(test)]
    pub fn retained(&self) -> usize {
        self.state.lock().window.len()
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    pub fn is_split(&self) -> bool {
        self.split_by_metadata
    }
}

impl fmt::Debug for SeriesStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SeriesStats")
            .field("target", &self.target)
            .field("key", &self.key)
            .field("metadata", &self.metadata)
            .field("split_by_metadata", &self.split_by_metadata)
            .field("stats", &self.snapshot())
            .finish()
    }
}

/// Recomputes p90 from the whole window: O(n log n), n bounded by capacity.
fn window_p90(window: &SampleWindow) -> f64 {
    let mut intervals = window.intervals();
    intervals.sort_unstable();
    nearest_rank(&intervals, P90)
        .map(|ns| ns as f64 / NANOS_PER_MILLI)
        .unwrap_or(0.0)
}
