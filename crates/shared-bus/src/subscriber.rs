//! # Event Subscriber
//!
//! Receiving side of the bus. A subscription owns one broadcast receiver
//! and applies its [`EventFilter`] locally.

use crate::events::{EventFilter, NodeEvent};
use crate::publisher::{BusStats, SubscriberRegistry};
use std::sync::Arc;
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::warn;

/// A live subscription. Dropping it unsubscribes.
pub struct Subscription {
    id: u64,
    receiver: broadcast::Receiver<NodeEvent>,
    filter: EventFilter,
    registry: Arc<SubscriberRegistry>,
    stats: Arc<BusStats>,
    lagged: u64,
}

impl Subscription {
    pub(crate) fn new(
        id: u64,
        receiver: broadcast::Receiver<NodeEvent>,
        filter: EventFilter,
        registry: Arc<SubscriberRegistry>,
        stats: Arc<BusStats>,
    ) -> Self {
        Self {
            id,
            receiver,
            filter,
            registry,
            stats,
            lagged: 0,
        }
    }

    /// Wait for the next matching event. `None` once the bus is gone.
    ///
    /// Falling behind does not end the subscription: the skipped events are
    /// counted on the bus and receiving carries on with the oldest event
    /// still buffered.
    pub async fn recv(&mut self) -> Option<NodeEvent> {
        loop {
            match self.receiver.recv().await {
                Ok(event) if self.filter.matches(&event) => return Some(event),
                Ok(_) => {}
                Err(RecvError::Lagged(skipped)) => {
                    self.stats.record_lag(skipped);
                    self.lagged += skipped;
                    warn!(
                        skipped,
                        topics = ?self.filter.topics,
                        "Subscriber fell behind, events lost"
                    );
                }
                Err(RecvError::Closed) => return None,
            }
        }
    }

    #[must_use]
    pub fn filter(&self) -> &EventFilter {
        &self.filter
    }

    /// Events this subscription lost to lag since the last call.
    ///
    /// Skipped events are not filtered, so the count may include events
    /// this subscription would have ignored anyway.
    pub fn take_lagged(&mut self) -> u64 {
        std::mem::take(&mut self.lagged)
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.registry.unregister(self.id);
    }
}
