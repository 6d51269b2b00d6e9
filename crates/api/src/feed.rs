//! In-process event feed over the engine's broadcaster.

use async_trait::async_trait;
use common::RestaurantId;
use engine::EventBroadcaster;
use futures_util::stream;
use projections::{EventFeed, EventStream, ProjectionError, Scope};
use tokio::sync::broadcast::error::RecvError;

/// Feeds one restaurant's events to a view subscription.
#[derive(Debug, Clone)]
pub struct BroadcastFeed {
    broadcaster: EventBroadcaster,
    restaurant_id: RestaurantId,
}

impl BroadcastFeed {
    pub fn new(broadcaster: EventBroadcaster, restaurant_id: RestaurantId) -> Self {
        Self {
            broadcaster,
            restaurant_id,
        }
    }
}

#[async_trait]
impl EventFeed for BroadcastFeed {
    async fn connect(&self, scope: Scope) -> projections::Result<EventStream> {
        if let Scope::Restaurant(id) = scope
            && id != self.restaurant_id
        {
            return Err(ProjectionError::Feed(format!(
                "feed serves restaurant {}, not {id}",
                self.restaurant_id
            )));
        }

        let rx = self.broadcaster.subscribe(self.restaurant_id);
        let events = stream::unfold(rx, |mut rx| async move {
            match rx.recv().await {
                Ok(event) => Some((Ok(event), rx)),
                Err(RecvError::Lagged(missed)) => {
                    Some((Err(ProjectionError::Lagged { missed }), rx))
                }
                Err(RecvError::Closed) => None,
            }
        });
        Ok(Box::pin(events))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use common::{SessionId, TableId};
    use domain::{DomainEvent, SessionStatus, SessionStatusPayload};
    use futures_util::StreamExt;

    fn event(restaurant_id: RestaurantId) -> DomainEvent {
        DomainEvent::SessionStatusChanged(SessionStatusPayload {
            restaurant_id,
            session_id: SessionId::new(),
            table_id: TableId::new(),
            from: None,
            to: SessionStatus::Waiting,
            changed_at: Utc::now(),
        })
    }

    #[tokio::test]
    async fn forwards_events_and_reports_lag() {
        let broadcaster = EventBroadcaster::new(2);
        let restaurant_id = RestaurantId::new();
        let feed = BroadcastFeed::new(broadcaster.clone(), restaurant_id);
        let mut events = feed.connect(Scope::Restaurant(restaurant_id)).await.unwrap();

        for _ in 0..3 {
            broadcaster.publish(event(restaurant_id));
        }
        assert!(matches!(
            events.next().await,
            Some(Err(ProjectionError::Lagged { missed: 1 }))
        ));
        assert!(matches!(events.next().await, Some(Ok(_))));
    }

    #[tokio::test]
    async fn rejects_foreign_restaurant() {
        let feed = BroadcastFeed::new(EventBroadcaster::default(), RestaurantId::new());
        let result = feed.connect(Scope::Restaurant(RestaurantId::new())).await;
        assert!(matches!(result, Err(ProjectionError::Feed(_))));
    }
}
