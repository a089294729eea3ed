//! In-memory implementation of BusClient for testing
//!
//! Mirrors real pub/sub semantics: publishes fan out to whoever is
//! subscribed right now, nothing is stored, and a subscriber that falls
//! behind loses messages instead of blocking the publisher.

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::warn;

use super::client::{BusClient, BusError, BusMessage, BusSubscription};

/// In-memory fan-out bus
///
/// # Example
///
/// ```
/// use conductor_bus::InMemoryBus;
///
/// let bus = InMemoryBus::new();
/// ```
pub struct InMemoryBus {
    subscribers: Mutex<HashMap<String, Vec<mpsc::Sender<BusMessage>>>>,
}

impl InMemoryBus {
    /// Create a new empty bus
    pub fn new() -> Self {
        Self {
            subscribers: Mutex::new(HashMap::new()),
        }
    }

    /// Number of live subscribers on a channel
    pub fn subscriber_count(&self, channel: &str) -> usize {
        self.subscribers
            .lock()
            .get(channel)
            .map(|senders| senders.iter().filter(|tx| !tx.is_closed()).count())
            .unwrap_or(0)
    }
}

impl Default for InMemoryBus {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BusClient for InMemoryBus {
    async fn publish(&self, channel: &str, payload: Vec<u8>) -> Result<(), BusError> {
        let mut subscribers = self.subscribers.lock();
        let Some(senders) = subscribers.get_mut(channel) else {
            // Nobody listening: the message is simply lost, like real pub/sub
            return Ok(());
        };

        senders.retain(|tx| !tx.is_closed());
        for tx in senders.iter() {
            let message = BusMessage {
                channel: channel.to_string(),
                payload: payload.clone(),
            };
            if tx.try_send(message).is_err() {
                warn!(channel, "in-memory subscriber full, dropping message");
            }
        }
        Ok(())
    }

    async fn subscribe(&self, channel: &str) -> Result<BusSubscription, BusError> {
        let (tx, rx) = mpsc::channel(BusSubscription::BUFFER);
        self.subscribers
            .lock()
            .entry(channel.to_string())
            .or_default()
            .push(tx);
        Ok(BusSubscription::new(rx))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_publish_reaches_all_subscribers() {
        let bus = InMemoryBus::new();
        let mut first = bus.subscribe("events").await.unwrap();
        let mut second = bus.subscribe("events").await.unwrap();

        bus.publish("events", b"hello".to_vec()).await.unwrap();

        assert_eq!(first.recv().await.unwrap().payload, b"hello");
        assert_eq!(second.recv().await.unwrap().payload, b"hello");
    }

    #[tokio::test]
    async fn test_publish_without_subscriber_is_lost() {
        let bus = InMemoryBus::new();
        bus.publish("nowhere", b"gone".to_vec()).await.unwrap();

        // Subscribing afterwards sees nothing
        let mut sub = bus.subscribe("nowhere").await.unwrap();
        bus.publish("nowhere", b"seen".to_vec()).await.unwrap();
        assert_eq!(sub.recv().await.unwrap().payload, b"seen");
    }

    #[tokio::test]
    async fn test_channels_are_isolated() {
        let bus = InMemoryBus::new();
        let mut a = bus.subscribe("a").await.unwrap();
        let mut b = bus.subscribe("b").await.unwrap();

        bus.publish("a", b"for-a".to_vec()).await.unwrap();
        bus.publish("b", b"for-b".to_vec()).await.unwrap();

        assert_eq!(a.recv().await.unwrap().payload, b"for-a");
        assert_eq!(b.recv().await.unwrap().payload, b"for-b");
    }

    #[tokio::test]
    async fn test_dropped_subscriber_is_pruned() {
        let bus = InMemoryBus::new();
        let sub = bus.subscribe("events").await.unwrap();
        assert_eq!(bus.subscriber_count("events"), 1);

        drop(sub);
        bus.publish("events", b"x".to_vec()).await.unwrap();
        assert_eq!(bus.subscriber_count("events"), 0);
    }
}
