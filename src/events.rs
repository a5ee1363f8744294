//! Mutation event bus
//!
//! Every shard publishes a [`MutationEvent`] after committing a state change.
//! The watch engine is the single consumer. The channel is bounded: a shard
//! never waits longer than the configured publish timeout, after which the
//! event is dropped and counted. Commands never depend on the bus.

use crate::store::Object;
use bytes::Bytes;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::{SendTimeoutError, TrySendError};
use tracing::{debug, warn};

/// Kind of state change a shard committed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MutationOp {
    /// Value written or modified in place
    Set,
    /// Key deleted by a command
    Del,
    /// Deadline attached to a key
    Expire,
    /// Deadline removed from a key
    Persist,
    /// Removed to get back under the key ceiling
    Evict,
    /// Removed because its deadline passed
    Expired,
}

impl MutationOp {
    pub fn as_str(&self) -> &'static str {
        match self {
            MutationOp::Set => "set",
            MutationOp::Del => "del",
            MutationOp::Expire => "expire",
            MutationOp::Persist => "persist",
            MutationOp::Evict => "evict",
            MutationOp::Expired => "expired",
        }
    }
}

/// Post-commit notification of one state change
#[derive(Debug, Clone)]
pub struct MutationEvent {
    pub key: Bytes,
    pub shard_id: usize,
    pub op: MutationOp,
    /// The object as committed, None when the key is gone
    pub object: Option<Object>,
}

/// Create a bus, returning the shared publisher and the single receiver
pub fn channel(capacity: usize, publish_timeout: Duration) -> (EventPublisher, mpsc::Receiver<MutationEvent>) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    let publisher = EventPublisher {
        tx,
        publish_timeout,
        dropped: Arc::new(AtomicU64::new(0)),
    };
    (publisher, rx)
}

/// Producer side of the bus, cloned into every shard
#[derive(Clone)]
pub struct EventPublisher {
    tx: mpsc::Sender<MutationEvent>,
    publish_timeout: Duration,
    dropped: Arc<AtomicU64>,
}

impl EventPublisher {
    /// Publish an event, waiting at most the publish timeout when the bus is full
    pub async fn publish(&self, event: MutationEvent) {
        let event = match self.tx.try_send(event) {
            Ok(()) => return,
            Err(TrySendError::Closed(_)) => {
                debug!("Event bus closed, discarding event");
                return;
            }
            Err(TrySendError::Full(event)) => event,
        };

        if self.publish_timeout.is_zero() {
            self.record_drop(&event);
            return;
        }

        match self.tx.send_timeout(event, self.publish_timeout).await {
            Ok(()) => {}
            Err(SendTimeoutError::Timeout(event)) => self.record_drop(&event),
            Err(SendTimeoutError::Closed(_)) => debug!("Event bus closed, discarding event"),
        }
    }

    /// Number of events dropped because the bus stayed full
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    fn record_drop(&self, event: &MutationEvent) {
        let total = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
        warn!(
            "Event bus full, dropped {} event from shard {} (total dropped: {})",
            event.op.as_str(),
            event.shard_id,
            total
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(key: &'static str) -> MutationEvent {
        MutationEvent {
            key: Bytes::from(key),
            shard_id: 0,
            op: MutationOp::Set,
            object: None,
        }
    }

    #[tokio::test]
    async fn test_events_arrive_in_publish_order() {
        let (publisher, mut rx) = channel(8, Duration::ZERO);
        publisher.publish(event("a")).await;
        publisher.publish(event("b")).await;

        assert_eq!(rx.recv().await.unwrap().key, Bytes::from("a"));
        assert_eq!(rx.recv().await.unwrap().key, Bytes::from("b"));
        assert_eq!(publisher.dropped(), 0);
    }

    #[tokio::test]
    async fn test_full_bus_drops_without_blocking() {
        let (publisher, mut rx) = channel(1, Duration::ZERO);
        publisher.publish(event("a")).await;
        publisher.publish(event("b")).await;

        assert_eq!(publisher.dropped(), 1);
        assert_eq!(rx.recv().await.unwrap().key, Bytes::from("a"));
    }

    #[tokio::test]
    async fn test_full_bus_waits_for_timeout_then_drops() {
        let (publisher, _rx) = channel(1, Duration::from_millis(10));
        publisher.publish(event("a")).await;
        publisher.publish(event("b")).await;
        assert_eq!(publisher.dropped(), 1);
    }

    #[tokio::test]
    async fn test_closed_bus_is_not_a_drop() {
        let (publisher, rx) = channel(1, Duration::ZERO);
        drop(rx);
        publisher.publish(event("a")).await;
        assert_eq!(publisher.dropped(), 0);
    }
}
