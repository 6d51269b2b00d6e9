//! Cache tags naming the views a client keeps.

use std::fmt;

use common::{RestaurantId, SessionId};
use domain::DomainEvent;
use serde::{Deserialize, Serialize};

/// The kind of read model a tag holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TagKind {
    Orders,
    ActiveOrders,
    Bills,
    Sessions,
}

impl TagKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TagKind::Orders => "orders",
            TagKind::ActiveOrders => "active-orders",
            TagKind::Bills => "bills",
            TagKind::Sessions => "sessions",
        }
    }

    /// Whether cached values of this kind are order lists.
    pub fn holds_orders(&self) -> bool {
        matches!(self, TagKind::Orders | TagKind::ActiveOrders)
    }
}

/// What a tag or subscription is narrowed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", content = "id", rename_all = "snake_case")]
pub enum Scope {
    Restaurant(RestaurantId),
    Session(SessionId),
}

impl Scope {
    /// Whether an event concerns this scope.
    pub fn matches(&self, event: &DomainEvent) -> bool {
        match self {
            Scope::Restaurant(id) => event.restaurant_id() == *id,
            Scope::Session(id) => event.session_id() == *id,
        }
    }

    /// The two scopes an event touches: its restaurant and its session.
    pub fn of(event: &DomainEvent) -> [Scope; 2] {
        [
            Scope::Restaurant(event.restaurant_id()),
            Scope::Session(event.session_id()),
        ]
    }
}

/// A cache key: one view kind within one scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CacheTag {
    pub kind: TagKind,
    pub scope: Scope,
}

impl CacheTag {
    pub fn new(kind: TagKind, scope: Scope) -> Self {
        Self { kind, scope }
    }

    pub fn session_orders(session_id: SessionId) -> Self {
        Self::new(TagKind::Orders, Scope::Session(session_id))
    }

    pub fn active_orders(restaurant_id: RestaurantId) -> Self {
        Self::new(TagKind::ActiveOrders, Scope::Restaurant(restaurant_id))
    }

    pub fn session_bills(session_id: SessionId) -> Self {
        Self::new(TagKind::Bills, Scope::Session(session_id))
    }

    pub fn restaurant_sessions(restaurant_id: RestaurantId) -> Self {
        Self::new(TagKind::Sessions, Scope::Restaurant(restaurant_id))
    }

    /// Whether this tag lies inside a subscription scope.
    ///
    /// A session's tags belong to every subscription; the restaurant check
    /// is left to the feed, which is already restaurant-scoped.
    pub fn within(&self, scope: &Scope) -> bool {
        match (scope, &self.scope) {
            (Scope::Restaurant(_), _) => true,
            (Scope::Session(a), Scope::Session(b)) => a == b,
            (Scope::Session(_), Scope::Restaurant(_)) => false,
        }
    }
}

impl fmt::Display for CacheTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.scope {
            Scope::Restaurant(id) => write!(f, "{}:restaurant:{id}", self.kind.as_str()),
            Scope::Session(id) => write!(f, "{}:session:{id}", self.kind.as_str()),
        }
    }
}
