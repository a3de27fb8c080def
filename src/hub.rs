use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::{self, error::TrySendError};
use uuid::Uuid;

use crate::error::HubError;
use crate::metrics::{Aggregator, MetricsUpdate};

pub const DEFAULT_CONSUMER_BUFFER: usize = 100;

// ─── Wire types ──────────────────────────────────────────────────

/// Identity of one connected consumer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConsumerId(Uuid);

impl ConsumerId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ConsumerId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConsumerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubscriptionAction {
    Subscribe,
    Unsubscribe,
}

/// What a consumer sends to change what it hears about.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionRequest {
    pub target: String,
    pub action: SubscriptionAction,
    #[serde(default)]
    pub split_by_metadata: bool,
}

/// Envelope for everything pushed to a consumer.
#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum OutboundMessage<'a> {
    #[serde(rename_all = "camelCase")]
    SubscriptionAck {
        target: &'a str,
        split_by_metadata: bool,
        subscribed: bool,
        success: bool,
        message: String,
    },
    MetricsUpdate(&'a MetricsUpdate),
}

/// One slot in a consumer's outbound buffer. A subscribe answer (ack plus
/// snapshot) travels as a single batch so it costs one slot and arrives
/// contiguously.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    Frame(String),
    Batch(Vec<String>),
}

impl Outbound {
    pub fn into_frames(self) -> Vec<String> {
        match self {
            Self::Frame(frame) => vec![frame],
            Self::Batch(frames) => frames,
        }
    }
}

// ─── Hub ─────────────────────────────────────────────────────────

struct Consumer {
    outbound: mpsc::Sender<Outbound>,
    /// target → split-by-metadata preference
    subscriptions: HashMap<String, bool>,
}

impl Consumer {
    fn wants(&self, update: &MetricsUpdate) -> bool {
        self.subscriptions.get(&update.target) == Some(&update.split_by_metadata)
    }
}

/// Routes metrics updates to the consumers whose subscriptions match.
///
/// Each consumer gets a bounded outbound buffer; delivery never waits on
/// it. A consumer whose buffer is full or gone is disconnected on the spot
/// so one slow reader cannot hold up the rest.
pub struct Hub {
    aggregator: Arc<Aggregator>,
    consumers: RwLock<HashMap<ConsumerId, Consumer>>,
    buffer: usize,
}

impl Hub {
    pub fn new(aggregator: Arc<Aggregator>, buffer: usize) -> Self {
        Self {
            aggregator,
            consumers: RwLock::new(HashMap::new()),
            buffer: buffer.max(1),
        }
    }

    /// Register a consumer. The receiver is its outbound stream; it closes
    /// when the hub drops the consumer.
    pub fn connect(&self) -> (ConsumerId, mpsc::Receiver<Outbound>) {
        let id = ConsumerId::new();
        let (outbound, rx) = mpsc::channel(self.buffer);
        let total = {
            let mut consumers = self.consumers.write();
            consumers.insert(
                id,
                Consumer {
                    outbound,
                    subscriptions: HashMap::new(),
                },
            );
            consumers.len()
        };
        tracing::info!(consumer = %id, total, "consumer connected");
        (id, rx)
    }

    /// Remove a consumer and every subscription it held. The targets and
    /// their series stay until the sweeper decides otherwise.
    pub fn disconnect(&self, id: ConsumerId) -> bool {
        let Some(consumer) = self.consumers.write().remove(&id) else {
            return false;
        };
        for (target, split) in &consumer.subscriptions {
            self.aggregator.update_subscription(target, id, false, *split);
        }
        tracing::info!(
            consumer = %id,
            subscriptions = consumer.subscriptions.len(),
            "consumer disconnected"
        );
        true
    }

    pub fn handle_request(
        &self,
        id: ConsumerId,
        request: &SubscriptionRequest,
    ) -> Result<(), HubError> {
        match request.action {
            SubscriptionAction::Subscribe => self
                .subscribe(id, &request.target, request.split_by_metadata)
                .map(|_| ()),
            SubscriptionAction::Unsubscribe => self.unsubscribe(id, &request.target),
        }
    }

    /// Subscribe (or change preference) and immediately queue an ack plus
    /// the current state of every matching series. Returns the snapshot size.
    pub fn subscribe(
        &self,
        id: ConsumerId,
        target: &str,
        split_by_metadata: bool,
    ) -> Result<usize, HubError> {
        // The write lock is held until the snapshot is queued so no live
        // update can overtake it.
        let mut consumers = self.consumers.write();
        let consumer = consumers.get_mut(&id).ok_or(HubError::UnknownConsumer(id))?;

        consumer.subscriptions.insert(target.to_owned(), split_by_metadata);
        self.aggregator.update_subscription(target, id, true, split_by_metadata);

        let snapshot = self.aggregator.snapshot(target, split_by_metadata);
        let ack = OutboundMessage::SubscriptionAck {
            target,
            split_by_metadata,
            subscribed: true,
            success: true,
            message: format!("Subscribed to {target}"),
        };
        let updates = snapshot
            .iter()
            .map(|u| encode(&OutboundMessage::MetricsUpdate(u)));
        let frames: Vec<String> = std::iter::once(encode(&ack))
            .chain(updates)
            .flatten()
            .collect();

        tracing::info!(
            consumer = %id,
            target_id = %target,
            split_by_metadata,
            snapshot = snapshot.len(),
            "subscription added"
        );

        if let Err(err) = consumer.outbound.try_send(Outbound::Batch(frames)) {
            drop(consumers);
            self.drop_consumer(id, &err);
            return Err(HubError::Disconnected(id));
        }
        Ok(snapshot.len())
    }

    pub fn unsubscribe(&self, id: ConsumerId, target: &str) -> Result<(), HubError> {
        let mut consumers = self.consumers.write();
        let consumer = consumers.get_mut(&id).ok_or(HubError::UnknownConsumer(id))?;

        let ack = match consumer.subscriptions.remove(target) {
            Some(split_by_metadata) => {
                self.aggregator.update_subscription(target, id, false, split_by_metadata);
                tracing::info!(consumer = %id, target_id = %target, "subscription removed");
                OutboundMessage::SubscriptionAck {
                    target,
                    split_by_metadata,
                    subscribed: false,
                    success: true,
                    message: format!("Unsubscribed from {target}"),
                }
            }
            None => OutboundMessage::SubscriptionAck {
                target,
                split_by_metadata: false,
                subscribed: false,
                success: false,
                message: format!("Not subscribed to {target}"),
            },
        };
        let Some(frame) = encode(&ack) else {
            return Ok(());
        };
        if let Err(err) = consumer.outbound.try_send(Outbound::Frame(frame)) {
            drop(consumers);
            self.drop_consumer(id, &err);
            return Err(HubError::Disconnected(id));
        }
        Ok(())
    }

    /// Push one update to every consumer subscribed to its target under the
    /// same preference. Returns how many consumers it was queued for.
    pub fn deliver(&self, update: &MetricsUpdate) -> usize {
        let mut delivered = 0;
        let mut failed = Vec::new();
        {
            let consumers = self.consumers.read();
            let mut matching = consumers.iter().filter(|(_, c)| c.wants(update)).peekable();
            if matching.peek().is_none() {
                return 0;
            }
            let Some(frame) = encode(&OutboundMessage::MetricsUpdate(update)) else {
                return 0;
            };

            for (id, consumer) in matching {
                match consumer.outbound.try_send(Outbound::Frame(frame.clone())) {
                    Ok(()) => delivered += 1,
                    Err(err) => failed.push((*id, err)),
                }
            }
        }

        for (id, err) in failed {
            self.drop_consumer(id, &err);
        }
        delivered
    }

    pub fn consumer_count(&self) -> usize {
        self.consumers.read().len()
    }

    /// A consumer's current subscriptions, sorted by target.
    pub fn subscriptions(&self, id: ConsumerId) -> Option<Vec<(String, bool)>> {
        let consumers = self.consumers.read();
        let consumer = consumers.get(&id)?;
        let mut subs: Vec<(String, bool)> = consumer
            .subscriptions
            .iter()
            .map(|(target, split)| (target.clone(), *split))
            .collect();
        subs.sort();
        Some(subs)
    }

    fn drop_consumer<T>(&self, id: ConsumerId, err: &TrySendError<T>) {
        let reason = match err {
            TrySendError::Full(_) => "outbound buffer full",
            TrySendError::Closed(_) => "outbound channel closed",
        };
        tracing::warn!(consumer = %id, reason, "dropping consumer");
        self.disconnect(id);
    }
}

fn encode(message: &OutboundMessage<'_>) -> Option<String> {
    match serde_json::to_string(message) {
        Ok(json) => Some(json),
        Err(err) => {
            tracing::warn!("Failed to encode outbound message: {}", err);
            None
        }
    }
}
