//! # Event Publisher
//!
//! The broadcast side of the bus and the counters shared with every
//! subscription.

use crate::events::{EventFilter, NodeEvent};
use crate::subscriber::Subscription;
use crate::DEFAULT_CHANNEL_CAPACITY;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::broadcast;
use tracing::{debug, warn};

/// Anything that can put an event on the bus.
///
/// The orchestration core only ever sees this trait; the runtime hands it
/// the in-memory bus.
#[async_trait]
pub trait EventPublisher: Send + Sync {
    /// Publish an event. Returns how many live subscriptions accept it.
    ///
    /// `0` means nobody is listening for this kind of event, which callers
    /// waiting on an answer treat as a failure.
    async fn publish(&self, event: NodeEvent) -> usize;
}

/// Delivery counters for one bus.
#[derive(Debug, Default)]
pub struct BusStats {
    published: AtomicU64,
    undelivered: AtomicU64,
    lagged: AtomicU64,
}

impl BusStats {
    /// Events handed to `publish`.
    pub fn published(&self) -> u64 {
        self.published.load(Ordering::Relaxed)
    }

    /// Events no live subscription accepted.
    pub fn undelivered(&self) -> u64 {
        self.undelivered.load(Ordering::Relaxed)
    }

    /// Events skipped by subscriptions that fell behind the channel.
    pub fn lagged(&self) -> u64 {
        self.lagged.load(Ordering::Relaxed)
    }

    pub(crate) fn record_lag(&self, count: u64) {
        self.lagged.fetch_add(count, Ordering::Relaxed);
    }
}

/// Filters of the live subscriptions, keyed by subscription id.
///
/// Lets `publish` count who will actually receive an event. Entries are
/// removed when their [`Subscription`] is dropped.
#[derive(Debug, Default)]
pub(crate) struct SubscriberRegistry {
    filters: Mutex<HashMap<u64, EventFilter>>,
}

impl SubscriberRegistry {
    fn register(&self, id: u64, filter: EventFilter) {
        self.filters
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id, filter);
    }

    pub(crate) fn unregister(&self, id: u64) {
        self.filters
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&id);
    }

    fn matching(&self, event: &NodeEvent) -> usize {
        self.filters
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .filter(|filter| filter.matches(event))
            .count()
    }
}

/// In-process bus over `tokio::sync::broadcast`.
///
/// Every subscription sees every event; filtering happens on the receiving
/// side, and the bus keeps a copy of each filter to count real recipients.
/// A subscription that falls more than `capacity` events behind loses the
/// oldest ones, which shows up in [`BusStats::lagged`].
pub struct InMemoryEventBus {
    sender: broadcast::Sender<NodeEvent>,
    registry: Arc<SubscriberRegistry>,
    next_subscription_id: AtomicU64,
    stats: Arc<BusStats>,
    capacity: usize,
}

impl InMemoryEventBus {
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CHANNEL_CAPACITY)
    }

    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            sender,
            registry: Arc::new(SubscriberRegistry::default()),
            next_subscription_id: AtomicU64::new(0),
            stats: Arc::new(BusStats::default()),
            capacity: capacity.max(1),
        }
    }

    /// Subscribe to events matching a filter.
    ///
    /// Only events published after this call are seen.
    #[must_use]
    pub fn subscribe(&self, filter: EventFilter) -> Subscription {
        let id = self.next_subscription_id.fetch_add(1, Ordering::Relaxed);
        debug!(id, topics = ?filter.topics, nodes = ?filter.node_ids, "Bus subscription opened");
        self.registry.register(id, filter.clone());
        Subscription::new(
            id,
            self.sender.subscribe(),
            filter,
            Arc::clone(&self.registry),
            Arc::clone(&self.stats),
        )
    }

    /// Live subscriptions, regardless of filter.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }

    #[must_use]
    pub fn stats(&self) -> &BusStats {
        &self.stats
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl Default for InMemoryEventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EventPublisher for InMemoryEventBus {
    async fn publish(&self, event: NodeEvent) -> usize {
        let topic = event.topic();
        let kind = event.kind();
        self.stats.published.fetch_add(1, Ordering::Relaxed);

        let receivers = self.registry.matching(&event);
        if receivers == 0 {
            self.stats.undelivered.fetch_add(1, Ordering::Relaxed);
            warn!(?topic, kind, "Event dropped, no subscriber for its topic");
            return 0;
        }

        // Subscriptions dropped since the count are fine to miss
        let _ = self.sender.send(event);
        debug!(?topic, kind, receivers, "Event published");
        receivers
    }
}
