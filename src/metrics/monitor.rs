use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::RwLock;

use super::series::{SeriesId, SeriesStats};
use crate::hub::ConsumerId;

/// Which flavours of series an event should update on a target.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Modes {
    pub combined: bool,
    pub split: bool,
}

impl Modes {
    /// Yields `false` for combined and `true` for split, in that order.
    pub fn iter(self) -> impl Iterator<Item = bool> {
        [(self.combined, false), (self.split, true)]
            .into_iter()
            .filter_map(|(wanted, split)| wanted.then_some(split))
    }
}

/// Per-target bookkeeping: who is watching, since when nobody is, and the
/// series accumulated under this target.
pub struct TargetMonitor {
    subscribers: RwLock<Subscribers>,
    series: RwLock<HashMap<SeriesId, Arc<SeriesStats>>>,
}

/// `quiescent_since` is `Some` exactly when `preferences` is empty.
#[derive(Debug)]
struct Subscribers {
    /// consumer → split-by-metadata preference
    preferences: HashMap<ConsumerId, bool>,
    quiescent_since: Option<Instant>,
}

impl TargetMonitor {
    /// A fresh monitor has nobody subscribed yet, so it starts quiescent.
    pub fn new(now: Instant) -> Self {
        Self {
            subscribers: RwLock::new(Subscribers {
                preferences: HashMap::new(),
                quiescent_since: Some(now),
            }),
            series: RwLock::new(HashMap::new()),
        }
    }

    /// Add, replace or remove one consumer's subscription.
    /// Existing series are never touched here.
    pub fn set_subscription(
        &self,
        consumer: ConsumerId,
        subscribed: bool,
        split_by_metadata: bool,
        now: Instant,
    ) {
        let mut subs = self.subscribers.write();
        if subscribed {
            subs.preferences.insert(consumer, split_by_metadata);
            subs.quiescent_since = None;
        } else if subs.preferences.remove(&consumer).is_some() && subs.preferences.is_empty() {
            subs.quiescent_since = Some(now);
        }
    }

    /// Modes wanted by current subscribers. With nobody subscribed the
    /// target keeps accumulating whatever it already tracks, or combined
    /// series if it tracks nothing yet.
    pub fn active_modes(&self) -> Modes {
        let subs = self.subscribers.read();
        if !subs.preferences.is_empty() {
            return subs.preferences.values().fold(Modes::default(), |mut modes, &split| {
                if split {
                    modes.split = true;
                } else {
                    modes.combined = true;
                }
                modes
            });
        }
        drop(subs);

        let series = self.series.read();
        let mut modes = Modes::default();
        for stats in series.values() {
            if stats.is_split() {
                modes.split = true;
            } else {
                modes.combined = true;
            }
        }
        if modes == Modes::default() {
            modes.combined = true;
        }
        modes
    }

    /// True once the target has had no subscriber for longer than `grace`.
    pub fn is_expired(&self, now: Instant, grace: Duration) -> bool {
        let subs = self.subscribers.read();
        subs.preferences.is_empty()
            && subs
                .quiescent_since
                .is_some_and(|since| now.saturating_duration_since(since) > grace)
    }

    pub fn quiescent_since(&self) -> Option<Instant> {
        self.subscribers.read().quiescent_since
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.read().preferences.len()
    }

    /// Look up a series, creating it with `make` on first use.
    pub fn series_or_insert_with<F>(&self, id: SeriesId, make: F) -> Arc<SeriesStats>
    where
        F: FnOnce() -> SeriesStats,
    {
        if let Some(existing) = self.series.read().get(&id) {
            return existing.clone();
        }
        self.series
            .write()
            .entry(id)
            .or_insert_with(|| Arc::new(make()))
            .clone()
    }

    /// Every series tracked under the given preference, in identity order.
    pub fn series_matching(&self, split_by_metadata: bool) -> Vec<Arc<SeriesStats>> {
        let series = self.series.read();
        let mut matching: Vec<(&SeriesId, &Arc<SeriesStats>)> = series
            .iter()
            .filter(|(_, stats)| stats.is_split() == split_by_metadata)
            .collect();
        matching.sort_by(|a, b| a.0.cmp(b.0));
        matching.into_iter().map(|(_, stats)| stats.clone()).collect()
    }

    pub fn series_count(&self) -> usize {
        self.series.read().len()
    }
}
