//! Integration tests: scripted event feed → ViewSubscription → ViewCache.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use common::{CustomerId, MenuItemId, Money, RestaurantId, SessionId};
use domain::{DomainEvent, LineItem, Order, OrderStatus};
use futures_util::stream;
use projections::{
    CacheTag, EventFeed, EventStream, ProjectionError, Result, Scope, SnapshotSource,
    SubscriptionOptions, SubscriptionState, View, ViewCache, ViewSubscription,
};
use tokio::sync::mpsc;

type Item = Result<DomainEvent>;

/// Feed whose connections are driven by the test.
#[derive(Default)]
struct ScriptedFeed {
    connections: Mutex<Vec<mpsc::UnboundedSender<Item>>>,
    connects: AtomicUsize,
}

impl ScriptedFeed {
    fn push(&self, item: Item) {
        for tx in self.connections.lock().unwrap().iter() {
            let _ = tx.send(item.clone());
        }
    }

    fn close_all(&self) {
        self.connections.lock().unwrap().clear();
    }

    fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl EventFeed for ScriptedFeed {
    async fn connect(&self, _scope: Scope) -> Result<EventStream> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.connections.lock().unwrap().push(tx);
        self.connects.fetch_add(1, Ordering::SeqCst);
        let stream = stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|item| (item, rx))
        });
        Ok(Box::pin(stream))
    }
}

/// Snapshot source backed by a map, counting fetches per tag.
#[derive(Default)]
struct FakeSource {
    views: Mutex<HashMap<CacheTag, View>>,
    fetches: Mutex<HashMap<CacheTag, usize>>,
}

impl FakeSource {
    fn set(&self, tag: CacheTag, view: View) {
        self.views.lock().unwrap().insert(tag, view);
    }

    fn fetches(&self, tag: &CacheTag) -> usize {
        self.fetches.lock().unwrap().get(tag).copied().unwrap_or(0)
    }
}

#[async_trait]
impl SnapshotSource for FakeSource {
    async fn fetch(&self, tag: &CacheTag) -> Result<View> {
        *self.fetches.lock().unwrap().entry(*tag).or_default() += 1;
        self.views
            .lock()
            .unwrap()
            .get(tag)
            .cloned()
            .ok_or_else(|| ProjectionError::Source {
                tag: tag.to_string(),
                message: "no such view".to_string(),
            })
    }
}

fn order(session_id: SessionId) -> Order {
    Order::place(
        session_id,
        CustomerId::new(),
        vec![LineItem::new(
            MenuItemId::new(),
            "Risotto",
            1,
            Money::from_cents(1800),
        )],
        Utc::now(),
    )
    .unwrap()
}

fn options() -> SubscriptionOptions {
    SubscriptionOptions {
        reconnect_delay: Duration::from_millis(10),
        max_reconnect_delay: Duration::from_millis(50),
    }
}

async fn eventually<F, Fut>(mut check: F)
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    tokio::time::timeout(Duration::from_secs(2), async {
        while !check().await {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

struct Setup {
    cache: ViewCache,
    feed: Arc<ScriptedFeed>,
    source: Arc<FakeSource>,
    restaurant_id: RestaurantId,
    session_id: SessionId,
    first: Order,
}

async fn setup() -> Setup {
    let cache = ViewCache::new();
    let feed = Arc::new(ScriptedFeed::default());
    let source = Arc::new(FakeSource::default());
    let restaurant_id = RestaurantId::new();
    let session_id = SessionId::new();
    let first = order(session_id);

    source.set(
        CacheTag::session_orders(session_id),
        View::Orders(vec![first.clone()]),
    );
    source.set(
        CacheTag::active_orders(restaurant_id),
        View::Orders(vec![first.clone()]),
    );
    cache
        .read(CacheTag::session_orders(session_id), source.as_ref())
        .await
        .unwrap();
    cache
        .read(CacheTag::active_orders(restaurant_id), source.as_ref())
        .await
        .unwrap();

    Setup {
        cache,
        feed,
        source,
        restaurant_id,
        session_id,
        first,
    }
}

impl Setup {
    fn subscribe(&self, scope: Scope) -> ViewSubscription {
        ViewSubscription::connect(
            self.cache.clone(),
            Arc::clone(&self.feed),
            Arc::clone(&self.source),
            scope,
            options(),
        )
    }
}

#[tokio::test]
async fn connect_resyncs_then_goes_live() {
    let s = setup().await;
    let tag = CacheTag::session_orders(s.session_id);
    assert_eq!(s.source.fetches(&tag), 1);

    let mut sub = s.subscribe(Scope::Restaurant(s.restaurant_id));
    sub.wait_for(SubscriptionState::Live).await.unwrap();

    assert_eq!(sub.resyncs(), 1);
    assert_eq!(s.source.fetches(&tag), 2);
    assert_eq!(s.feed.connects(), 1);
    sub.dispose().await;
}

#[tokio::test]
async fn created_order_forces_refetch() {
    let s = setup().await;
    let tag = CacheTag::session_orders(s.session_id);
    let mut sub = s.subscribe(Scope::Restaurant(s.restaurant_id));
    sub.wait_for(SubscriptionState::Live).await.unwrap();

    let second = order(s.session_id);
    s.source
        .set(tag, View::Orders(vec![s.first.clone(), second.clone()]));
    s.feed
        .push(Ok(DomainEvent::order_created(s.restaurant_id, second)));

    eventually(|| s.cache.is_stale(&tag)).await;
    let view = s.cache.read(tag, s.source.as_ref()).await.unwrap();
    assert_eq!(view.len(), 2);
    assert_eq!(s.source.fetches(&tag), 3);
    sub.dispose().await;
}

#[tokio::test]
async fn status_patch_updates_in_place() {
    let s = setup().await;
    let tag = CacheTag::session_orders(s.session_id);
    let mut sub = s.subscribe(Scope::Restaurant(s.restaurant_id));
    sub.wait_for(SubscriptionState::Live).await.unwrap();

    let mut served = s.first.clone();
    served.status = OrderStatus::Served;
    s.feed
        .push(Ok(DomainEvent::order_patch(s.restaurant_id, &served)));

    let cache = &s.cache;
    eventually(|| async move {
        cache
            .cached(&tag)
            .await
            .and_then(|v| v.orders().map(|o| o[0].status))
            == Some(OrderStatus::Served)
    })
    .await;
    assert!(!s.cache.is_stale(&tag).await);
    assert_eq!(s.source.fetches(&tag), 2);
    sub.dispose().await;
}

#[tokio::test]
async fn lag_resyncs_without_reconnecting() {
    let s = setup().await;
    let mut sub = s.subscribe(Scope::Restaurant(s.restaurant_id));
    sub.wait_for(SubscriptionState::Live).await.unwrap();

    s.feed.push(Err(ProjectionError::Lagged { missed: 12 }));
    let watched = &sub;
    eventually(|| async move { watched.resyncs() == 2 }).await;
    sub.wait_for(SubscriptionState::Live).await.unwrap();

    assert_eq!(sub.reconnects(), 0);
    assert_eq!(s.feed.connects(), 1);
    sub.dispose().await;
}

#[tokio::test]
async fn closed_feed_reconnects_and_resyncs() {
    let s = setup().await;
    let mut sub = s.subscribe(Scope::Restaurant(s.restaurant_id));
    sub.wait_for(SubscriptionState::Live).await.unwrap();

    s.feed.close_all();
    let (feed, watched) = (&s.feed, &sub);
    eventually(|| async move { feed.connects() == 2 && watched.resyncs() == 2 }).await;
    sub.wait_for(SubscriptionState::Live).await.unwrap();
    assert_eq!(sub.reconnects(), 1);
    sub.dispose().await;
}

#[tokio::test]
async fn session_scope_ignores_other_sessions() {
    let s = setup().await;
    let session_tag = CacheTag::session_orders(s.session_id);
    let active_tag = CacheTag::active_orders(s.restaurant_id);
    let mut sub = s.subscribe(Scope::Session(s.session_id));
    sub.wait_for(SubscriptionState::Live).await.unwrap();

    // Only the session's own tags are resynchronized.
    assert_eq!(s.source.fetches(&session_tag), 2);
    assert_eq!(s.source.fetches(&active_tag), 1);

    let elsewhere = order(SessionId::new());
    s.feed
        .push(Ok(DomainEvent::order_created(s.restaurant_id, elsewhere)));
    s.feed
        .push(Ok(DomainEvent::order_deleted(s.restaurant_id, &s.first)));

    eventually(|| s.cache.is_stale(&session_tag)).await;
    assert!(!s.cache.is_stale(&active_tag).await);
    sub.dispose().await;
}

#[tokio::test]
async fn disposed_subscription_stops_applying() {
    let s = setup().await;
    let tag = CacheTag::session_orders(s.session_id);
    let mut sub = s.subscribe(Scope::Restaurant(s.restaurant_id));
    sub.wait_for(SubscriptionState::Live).await.unwrap();
    sub.dispose().await;

    s.feed
        .push(Ok(DomainEvent::order_created(s.restaurant_id, order(s.session_id))));
    tokio::time::sleep(Duration::from_millis(30)).await;
    assert!(!s.cache.is_stale(&tag).await);
}
