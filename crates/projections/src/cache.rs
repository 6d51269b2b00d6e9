//! Tag-keyed read model cache.
//!
//! Status ticks (`order-patch`) are folded into cached order lists in place.
//! Every other change marks the owning tags stale so the next read refetches.
//! A fetch that overlaps such a change is stored stale, so the change is
//! never hidden behind a view taken before it.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use domain::{Bill, DomainEvent, Order, OrderPatchPayload, TableSession};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::Result;
use crate::tags::{CacheTag, Scope, TagKind};

/// A cached read model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "data", rename_all = "snake_case")]
pub enum View {
    Orders(Vec<Order>),
    Bills(Vec<Bill>),
    Sessions(Vec<TableSession>),
}

impl View {
    pub fn len(&self) -> usize {
        match self {
            View::Orders(v) => v.len(),
            View::Bills(v) => v.len(),
            View::Sessions(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn orders(&self) -> Option<&[Order]> {
        match self {
            View::Orders(orders) => Some(orders),
            _ => None,
        }
    }

    pub fn bills(&self) -> Option<&[Bill]> {
        match self {
            View::Bills(bills) => Some(bills),
            _ => None,
        }
    }

    pub fn sessions(&self) -> Option<&[TableSession]> {
        match self {
            View::Sessions(sessions) => Some(sessions),
            _ => None,
        }
    }
}

/// Authoritative reads used to fill and resynchronize the cache.
#[async_trait]
pub trait SnapshotSource: Send + Sync {
    async fn fetch(&self, tag: &CacheTag) -> Result<View>;
}

/// What `ViewCache::apply` did with an event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Applied {
    /// Cached orders updated in place.
    Patched { orders: usize },
    /// Tags marked stale.
    Invalidated(Vec<CacheTag>),
    /// No cached view is affected by this kind of event.
    Ignored,
}

#[derive(Debug, Clone)]
struct Entry {
    view: View,
    stale: bool,
}

/// Fetches currently running for one tag.
#[derive(Debug, Default)]
struct InFlight {
    readers: usize,
    /// Bumped by every event touching the tag while fetches run.
    generation: u64,
}

type InFlightMap = Arc<Mutex<HashMap<CacheTag, InFlight>>>;

/// Registration of one running fetch; unregisters on drop.
struct FetchTicket {
    in_flight: InFlightMap,
    tag: CacheTag,
    generation: u64,
}

impl FetchTicket {
    /// Whether no event touched the tag since the fetch began.
    fn is_current(&self) -> bool {
        self.in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&self.tag)
            .is_some_and(|f| f.generation == self.generation)
    }
}

impl Drop for FetchTicket {
    fn drop(&mut self) {
        let mut in_flight = self.in_flight.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(fetch) = in_flight.get_mut(&self.tag) {
            fetch.readers -= 1;
            if fetch.readers == 0 {
                in_flight.remove(&self.tag);
            }
        }
    }
}

/// Shared, tag-keyed cache of read models.
#[derive(Debug, Clone, Default)]
pub struct ViewCache {
    entries: Arc<RwLock<HashMap<CacheTag, Entry>>>,
    in_flight: InFlightMap,
}

impl ViewCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Folds an event into the cache.
    pub async fn apply(&self, event: &DomainEvent) -> Applied {
        let kinds: &[TagKind] = match event {
            DomainEvent::OrderPatch(patch) => return self.patch_order(patch).await,
            DomainEvent::OrderCreated(_)
            | DomainEvent::OrderUpdated(_)
            | DomainEvent::OrderDeleted(_) => &[TagKind::Orders, TagKind::ActiveOrders],
            DomainEvent::BillGenerated(_)
            | DomainEvent::BillPaid(_)
            | DomainEvent::BillCancelled(_) => &[TagKind::Bills, TagKind::Sessions],
            DomainEvent::SessionStatusChanged(change) if change.to.is_terminal() => {
                &[TagKind::Sessions, TagKind::ActiveOrders]
            }
            DomainEvent::SessionStatusChanged(_) => &[TagKind::Sessions],
            DomainEvent::WaiterRequested(_) => return Applied::Ignored,
        };

        let tags: Vec<CacheTag> = Scope::of(event)
            .into_iter()
            .flat_map(|scope| kinds.iter().map(move |kind| CacheTag::new(*kind, scope)))
            .collect();
        Applied::Invalidated(self.invalidate_tags(&tags).await)
    }

    async fn patch_order(&self, patch: &OrderPatchPayload) -> Applied {
        let scopes = [
            Scope::Restaurant(patch.restaurant_id),
            Scope::Session(patch.session_id),
        ];
        let mut patched = 0;
        let mut entries = self.entries.write().await;
        self.bump(|tag| tag.kind.holds_orders() && scopes.contains(&tag.scope));

        for (tag, entry) in entries.iter_mut() {
            if !tag.kind.holds_orders() || !scopes.contains(&tag.scope) {
                continue;
            }
            let View::Orders(orders) = &mut entry.view else {
                continue;
            };
            let Some(index) = orders.iter().position(|o| o.id == patch.order_id) else {
                continue;
            };
            if tag.kind == TagKind::ActiveOrders && patch.status.is_terminal() {
                orders.remove(index);
            } else {
                let order = &mut orders[index];
                order.status = patch.status;
                order.updated_at = patch.updated_at;
            }
            patched += 1;
        }

        if patched > 0 {
            metrics::counter!("view_cache_patches_total").increment(patched as u64);
        }
        tracing::trace!(order_id = %patch.order_id, patched, "order patch applied");
        Applied::Patched { orders: patched }
    }

    /// Marks the given tags stale, returning those that were fresh.
    pub async fn invalidate_tags(&self, tags: &[CacheTag]) -> Vec<CacheTag> {
        let mut entries = self.entries.write().await;
        self.bump(|tag| tags.contains(tag));
        let mut invalidated = Vec::new();
        for tag in tags {
            if let Some(entry) = entries.get_mut(tag)
                && !entry.stale
            {
                entry.stale = true;
                invalidated.push(*tag);
            }
        }
        if !invalidated.is_empty() {
            metrics::counter!("view_cache_invalidations_total")
                .increment(invalidated.len() as u64);
        }
        invalidated
    }

    /// Marks running fetches of matching tags as outdated.
    ///
    /// Callers hold the entries write lock so the bump and the check in
    /// `store_fetched` cannot interleave.
    fn bump(&self, matches: impl Fn(&CacheTag) -> bool) {
        let mut in_flight = self.in_flight.lock().unwrap_or_else(PoisonError::into_inner);
        for (tag, fetch) in in_flight.iter_mut() {
            if matches(tag) {
                fetch.generation += 1;
            }
        }
    }

    fn begin_fetch(&self, tag: CacheTag) -> FetchTicket {
        let mut in_flight = self.in_flight.lock().unwrap_or_else(PoisonError::into_inner);
        let fetch = in_flight.entry(tag).or_default();
        fetch.readers += 1;
        FetchTicket {
            in_flight: Arc::clone(&self.in_flight),
            tag,
            generation: fetch.generation,
        }
    }

    /// Stores a fetched view, stale when an event touched the tag meanwhile.
    /// Returns whether the view was stored fresh.
    async fn store_fetched(&self, ticket: FetchTicket, view: View) -> bool {
        let mut entries = self.entries.write().await;
        let fresh = ticket.is_current();
        entries.insert(
            ticket.tag,
            Entry {
                view,
                stale: !fresh,
            },
        );
        if !fresh {
            tracing::debug!(tag = %ticket.tag, "view changed during fetch, kept stale");
        }
        fresh
    }

    pub async fn invalidate(&self, tag: CacheTag) -> bool {
        !self.invalidate_tags(&[tag]).await.is_empty()
    }

    /// Returns the view for `tag`, refetching it when missing or stale.
    pub async fn read<S>(&self, tag: CacheTag, source: &S) -> Result<View>
    where
        S: SnapshotSource + ?Sized,
    {
        if let Some(view) = self.cached(&tag).await {
            return Ok(view);
        }
        let ticket = self.begin_fetch(tag);
        let view = source.fetch(&tag).await?;
        metrics::counter!("view_cache_refetches_total", "kind" => tag.kind.as_str()).increment(1);
        self.store_fetched(ticket, view.clone()).await;
        Ok(view)
    }

    /// Returns the fresh cached view, if any.
    pub async fn cached(&self, tag: &CacheTag) -> Option<View> {
        self.entries
            .read()
            .await
            .get(tag)
            .filter(|e| !e.stale)
            .map(|e| e.view.clone())
    }

    pub async fn is_stale(&self, tag: &CacheTag) -> bool {
        self.entries
            .read()
            .await
            .get(tag)
            .is_none_or(|e| e.stale)
    }

    pub async fn store(&self, tag: CacheTag, view: View) {
        self.entries
            .write()
            .await
            .insert(tag, Entry { view, stale: false });
    }

    /// Every tag the cache has seen.
    pub async fn tags(&self) -> Vec<CacheTag> {
        self.entries.read().await.keys().copied().collect()
    }

    /// Refetches every known tag inside `scope`. Returns the number refreshed.
    #[tracing::instrument(skip(self, source))]
    pub async fn resync<S>(&self, scope: Scope, source: &S) -> Result<usize>
    where
        S: SnapshotSource + ?Sized,
    {
        let tags: Vec<CacheTag> = self
            .tags()
            .await
            .into_iter()
            .filter(|t| t.within(&scope))
            .collect();
        for tag in &tags {
            let ticket = self.begin_fetch(*tag);
            let view = source.fetch(tag).await?;
            self.store_fetched(ticket, view).await;
        }
        tracing::debug!(tags = tags.len(), "view cache resynchronized");
        Ok(tags.len())
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }

    pub async fn clear(&self) {
        self.entries.write().await.clear();
    }

    #[cfg(test)]
    fn fetches_in_flight(&self) -> usize {
        self.in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}
