//! Client-side view cache for dashboards and table devices.
//!
//! - [`ViewCache`] keeps read models keyed by [`CacheTag`]
//! - status-only events patch cached records in place, all other events
//!   invalidate the owning tags so the next read refetches
//! - [`ViewSubscription`] drives the cache from an [`EventFeed`] and
//!   resynchronizes from a [`SnapshotSource`] on every (re)connect

pub mod cache;
pub mod error;
pub mod synchronizer;
pub mod tags;

pub use cache::{Applied, SnapshotSource, View, ViewCache};
pub use error::{ProjectionError, Result};
pub use synchronizer::{
    EventFeed, EventStream, SubscriptionOptions, SubscriptionState, ViewSubscription,
};
pub use tags::{CacheTag, Scope, TagKind};
