//! Server-side dashboard caches, one per restaurant.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use common::RestaurantId;
use domain::Order;
use engine::{Engine, EngineError};
use projections::{
    CacheTag, ProjectionError, Scope, SnapshotSource, SubscriptionOptions, TagKind, View,
    ViewCache, ViewSubscription,
};
use session_store::{Repository, SessionQuery};

use crate::error::ApiError;
use crate::feed::BroadcastFeed;

/// Reads views straight from the engine.
pub struct EngineSnapshots<R> {
    engine: Engine<R>,
}

impl<R> EngineSnapshots<R> {
    pub fn new(engine: Engine<R>) -> Self {
        Self { engine }
    }
}

#[async_trait]
impl<R: Repository + 'static> SnapshotSource for EngineSnapshots<R> {
    async fn fetch(&self, tag: &CacheTag) -> projections::Result<View> {
        let source_error = |e: EngineError| ProjectionError::Source {
            tag: tag.to_string(),
            message: e.to_string(),
        };
        let view = match (tag.kind, tag.scope) {
            (TagKind::ActiveOrders, Scope::Restaurant(id)) => {
                View::Orders(self.engine.orders().active_orders(id).await.map_err(source_error)?)
            }
            (TagKind::Orders, Scope::Session(id)) => View::Orders(
                self.engine
                    .orders()
                    .orders_for_session(id)
                    .await
                    .map_err(source_error)?,
            ),
            (TagKind::Bills, Scope::Session(id)) => View::Bills(
                self.engine
                    .settlement()
                    .bills_for_session(id)
                    .await
                    .map_err(source_error)?,
            ),
            (TagKind::Sessions, Scope::Restaurant(id)) => View::Sessions(
                self.engine
                    .lifecycle()
                    .list_sessions(SessionQuery::open_in(id))
                    .await
                    .map_err(source_error)?,
            ),
            (TagKind::Sessions, Scope::Session(id)) => View::Sessions(vec![
                self.engine
                    .lifecycle()
                    .get_session(id)
                    .await
                    .map_err(source_error)?,
            ]),
            _ => {
                return Err(ProjectionError::Source {
                    tag: tag.to_string(),
                    message: "view not served".to_string(),
                });
            }
        };
        Ok(view)
    }
}

struct Dashboard {
    cache: ViewCache,
    _subscription: ViewSubscription,
}

/// Lazily started dashboard caches keyed by restaurant.
pub struct Dashboards<R> {
    engine: Engine<R>,
    source: Arc<EngineSnapshots<R>>,
    dashboards: Mutex<HashMap<RestaurantId, Dashboard>>,
}

impl<R: Repository + 'static> Dashboards<R> {
    pub fn new(engine: Engine<R>) -> Self {
        Self {
            source: Arc::new(EngineSnapshots::new(engine.clone())),
            engine,
            dashboards: Mutex::new(HashMap::new()),
        }
    }

    /// Returns the restaurant's cache, subscribing it on first use.
    fn cache(&self, restaurant_id: RestaurantId) -> ViewCache {
        let mut dashboards = self.dashboards.lock().unwrap_or_else(PoisonError::into_inner);
        dashboards
            .entry(restaurant_id)
            .or_insert_with(|| {
                let cache = ViewCache::new();
                let feed = Arc::new(BroadcastFeed::new(
                    self.engine.broadcaster().clone(),
                    restaurant_id,
                ));
                let subscription = ViewSubscription::connect(
                    cache.clone(),
                    feed,
                    Arc::clone(&self.source),
                    Scope::Restaurant(restaurant_id),
                    SubscriptionOptions::default(),
                );
                tracing::debug!(%restaurant_id, "dashboard cache started");
                Dashboard {
                    cache,
                    _subscription: subscription,
                }
            })
            .cache
            .clone()
    }

    /// Orders in the kitchen pipeline across the restaurant's open sessions.
    pub async fn active_orders(&self, restaurant_id: RestaurantId) -> Result<Vec<Order>, ApiError> {
        let cache = self.cache(restaurant_id);
        let view = cache
            .read(CacheTag::active_orders(restaurant_id), self.source.as_ref())
            .await?;
        Ok(view.orders().map(<[Order]>::to_vec).unwrap_or_default())
    }

    pub fn len(&self) -> usize {
        self.dashboards
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
