//! Subscriber registry for event fan-out.
//!
//! Maps connection identity to a delivery channel. Broadcast iterates
//! defensively: a subscriber whose channel is gone is pruned without
//! affecting delivery to the others.

use std::collections::HashMap;

use tokio::sync::{mpsc, Mutex};
use uuid::Uuid;

/// Registry of open subscriber connections.
#[derive(Debug, Default)]
pub struct SubscriberRegistry {
    inner: Mutex<HashMap<Uuid, mpsc::UnboundedSender<String>>>,
}

impl SubscriberRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a subscriber's delivery channel.
    pub async fn add(&self, id: Uuid, sender: mpsc::UnboundedSender<String>) {
        self.inner.lock().await.insert(id, sender);
        tracing::debug!(subscriber = %id, "subscriber added");
    }

    /// Remove a subscriber.
    pub async fn remove(&self, id: Uuid) {
        if self.inner.lock().await.remove(&id).is_some() {
            tracing::debug!(subscriber = %id, "subscriber removed");
        }
    }

    /// Number of registered subscribers.
    pub async fn len(&self) -> usize {
        self.inner.lock().await.len()
    }

    /// Returns true if no subscribers are registered.
    pub async fn is_empty(&self) -> bool {
        self.inner.lock().await.is_empty()
    }

    /// Send a serialized payload to every registered subscriber.
    ///
    /// Returns the number of subscribers the payload was delivered to.
    /// Subscribers whose channel is closed are pruned.
    pub async fn broadcast(&self, payload: &str) -> usize {
        let mut map = self.inner.lock().await;
        let mut dead = Vec::new();
        let mut delivered = 0;

        for (id, sender) in map.iter() {
            if sender.send(payload.to_string()).is_ok() {
                delivered += 1;
            } else {
                dead.push(*id);
            }
        }

        for id in dead {
            map.remove(&id);
            tracing::debug!(subscriber = %id, "pruned dead subscriber");
        }

        delivered
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn broadcast_reaches_every_subscriber_once() {
        let registry = SubscriberRegistry::new();
        let (tx_a, mut rx_a) = mpsc::unbounded_channel();
        let (tx_b, mut rx_b) = mpsc::unbounded_channel();
        registry.add(Uuid::new_v4(), tx_a).await;
        registry.add(Uuid::new_v4(), tx_b).await;

        let delivered = registry.broadcast("payload").await;
        assert_eq!(delivered, 2);
        assert_eq!(rx_a.recv().await.unwrap(), "payload");
        assert_eq!(rx_b.recv().await.unwrap(), "payload");
        assert!(rx_a.try_recv().is_err());
        assert!(rx_b.try_recv().is_err());
    }

    #[tokio::test]
    async fn dead_subscriber_does_not_block_others() {
        let registry = SubscriberRegistry::new();
        let (tx_dead, rx_dead) = mpsc::unbounded_channel();
        let (tx_live, mut rx_live) = mpsc::unbounded_channel();
        registry.add(Uuid::new_v4(), tx_dead).await;
        registry.add(Uuid::new_v4(), tx_live).await;
        drop(rx_dead);

        let delivered = registry.broadcast("still here").await;
        assert_eq!(delivered, 1);
        assert_eq!(rx_live.recv().await.unwrap(), "still here");

        // The dead connection was pruned.
        assert_eq!(registry.len().await, 1);
    }

    #[tokio::test]
    async fn remove_is_idempotent() {
        let registry = SubscriberRegistry::new();
        let id = Uuid::new_v4();
        let (tx, _rx) = mpsc::unbounded_channel();
        registry.add(id, tx).await;
        registry.remove(id).await;
        registry.remove(id).await;
        assert!(registry.is_empty().await);
    }
}
