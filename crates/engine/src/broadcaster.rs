//! Per-restaurant fan-out of committed domain events.
//!
//! Delivery is best-effort: publishing never waits for subscribers, and a
//! subscriber that falls more than the channel capacity behind observes
//! [`broadcast::error::RecvError::Lagged`] and must resynchronize from the
//! repository. Nothing is persisted or replayed.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use common::{RestaurantId, SessionId};
use domain::DomainEvent;
use tokio::sync::broadcast;

/// Fan-out hub with one broadcast channel per restaurant.
#[derive(Debug, Clone)]
pub struct EventBroadcaster {
    channels: Arc<RwLock<HashMap<RestaurantId, broadcast::Sender<DomainEvent>>>>,
    capacity: usize,
}

impl EventBroadcaster {
    /// Creates a broadcaster whose channels buffer `capacity` events.
    pub fn new(capacity: usize) -> Self {
        Self {
            channels: Arc::new(RwLock::new(HashMap::new())),
            capacity: capacity.max(1),
        }
    }

    fn sender(&self, restaurant_id: RestaurantId) -> broadcast::Sender<DomainEvent> {
        if let Some(tx) = self
            .channels
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&restaurant_id)
        {
            return tx.clone();
        }
        let mut channels = self
            .channels
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        channels
            .entry(restaurant_id)
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .clone()
    }

    /// Publishes an event to every subscriber of its restaurant.
    ///
    /// Returns the number of receivers the event was queued for.
    pub fn publish(&self, event: DomainEvent) -> usize {
        let kind = event.kind();
        let restaurant_id = event.restaurant_id();
        let sender = self
            .channels
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&restaurant_id)
            .cloned();

        let delivered = sender.and_then(|tx| tx.send(event).ok());
        match delivered {
            Some(receivers) => {
                metrics::counter!("events_published_total", "kind" => kind).increment(1);
                tracing::trace!(%restaurant_id, kind, receivers, "event published");
                receivers
            }
            None => {
                metrics::counter!("events_undelivered_total", "kind" => kind).increment(1);
                tracing::trace!(%restaurant_id, kind, "no subscribers for event");
                0
            }
        }
    }

    /// Subscribes to every event of a restaurant.
    pub fn subscribe(&self, restaurant_id: RestaurantId) -> broadcast::Receiver<DomainEvent> {
        self.sender(restaurant_id).subscribe()
    }

    /// Subscribes to one session's events.
    pub fn subscribe_session(
        &self,
        restaurant_id: RestaurantId,
        session_id: SessionId,
    ) -> SessionSubscriber {
        SessionSubscriber {
            inner: self.subscribe(restaurant_id),
            session_id,
        }
    }

    /// Returns the number of live receivers for a restaurant.
    pub fn subscriber_count(&self, restaurant_id: RestaurantId) -> usize {
        self.channels
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&restaurant_id)
            .map(|tx| tx.receiver_count())
            .unwrap_or(0)
    }
}

impl Default for EventBroadcaster {
    fn default() -> Self {
        Self::new(1024)
    }
}

/// A receiver filtered to one session.
#[derive(Debug)]
pub struct SessionSubscriber {
    inner: broadcast::Receiver<DomainEvent>,
    session_id: SessionId,
}

impl SessionSubscriber {
    pub fn session_id(&self) -> SessionId {
        self.session_id
    }

    /// Waits for the next event of this session.
    ///
    /// Errors mirror [`broadcast::Receiver::recv`]: `Lagged` means events were
    /// missed and the caller should resynchronize.
    pub async fn recv(&mut self) -> Result<DomainEvent, broadcast::error::RecvError> {
        loop {
            let event = self.inner.recv().await?;
            if event.session_id() == self.session_id {
                return Ok(event);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use common::TableId;
    use domain::{SessionStatus, SessionStatusPayload};

    fn status_event(restaurant_id: RestaurantId, session_id: SessionId) -> DomainEvent {
        DomainEvent::SessionStatusChanged(SessionStatusPayload {
            restaurant_id,
            session_id,
            table_id: TableId::new(),
            from: None,
            to: SessionStatus::Waiting,
            changed_at: Utc::now(),
        })
    }

    #[tokio::test]
    async fn publish_reaches_restaurant_subscribers() {
        let broadcaster = EventBroadcaster::new(16);
        let restaurant_id = RestaurantId::new();
        let mut rx = broadcaster.subscribe(restaurant_id);
        let mut other = broadcaster.subscribe(RestaurantId::new());

        let event = status_event(restaurant_id, SessionId::new());
        assert_eq!(broadcaster.publish(event.clone()), 1);

        assert_eq!(rx.recv().await.unwrap(), event);
        assert!(other.try_recv().is_err());
    }

    #[tokio::test]
    async fn publish_without_subscribers_is_dropped() {
        let broadcaster = EventBroadcaster::new(16);
        let event = status_event(RestaurantId::new(), SessionId::new());
        assert_eq!(broadcaster.publish(event), 0);
    }

    #[tokio::test]
    async fn session_subscriber_filters_other_sessions() {
        let broadcaster = EventBroadcaster::new(16);
        let restaurant_id = RestaurantId::new();
        let session_id = SessionId::new();
        let mut sub = broadcaster.subscribe_session(restaurant_id, session_id);

        broadcaster.publish(status_event(restaurant_id, SessionId::new()));
        let mine = status_event(restaurant_id, session_id);
        broadcaster.publish(mine.clone());

        assert_eq!(sub.recv().await.unwrap(), mine);
    }

    #[tokio::test]
    async fn slow_subscriber_lags() {
        let broadcaster = EventBroadcaster::new(2);
        let restaurant_id = RestaurantId::new();
        let mut rx = broadcaster.subscribe(restaurant_id);

        for _ in 0..5 {
            broadcaster.publish(status_event(restaurant_id, SessionId::new()));
        }

        assert!(matches!(
            rx.recv().await,
            Err(broadcast::error::RecvError::Lagged(_))
        ));
        assert_eq!(broadcaster.subscriber_count(restaurant_id), 1);
    }
}
