//! Domain events fanned out to dashboards and table devices.
//!
//! On the wire every event is an envelope `{"type": "<kind>", "payload": {...}}`
//! whose payload always names the restaurant, so subscribers can filter
//! without knowing the variant.

use chrono::{DateTime, Utc};
use common::{BillId, CustomerId, OrderId, RestaurantId, SessionId, TableId};
use serde::{Deserialize, Serialize};

use crate::bill::Bill;
use crate::order::{Order, OrderStatus};
use crate::session::SessionStatus;

/// Events emitted after a session-scoped write commits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "kebab-case")]
pub enum DomainEvent {
    /// A new order was placed.
    OrderCreated(OrderPayload),

    /// Status-only delta for an existing order.
    OrderPatch(OrderPatchPayload),

    /// Full replacement of an order.
    OrderUpdated(OrderPayload),

    /// A pending order was removed.
    OrderDeleted(OrderRefPayload),

    /// A bill was created by settlement.
    BillGenerated(BillPayload),

    /// A bill was paid.
    BillPaid(BillPayload),

    /// A pending bill was cancelled.
    BillCancelled(BillPayload),

    /// The session moved through its lifecycle.
    SessionStatusChanged(SessionStatusPayload),

    /// A diner or staff member called for service.
    WaiterRequested(WaiterRequestedPayload),
}

impl DomainEvent {
    /// Returns the wire name of the event kind.
    pub fn kind(&self) -> &'static str {
        match self {
            DomainEvent::OrderCreated(_) => "order-created",
            DomainEvent::OrderPatch(_) => "order-patch",
            DomainEvent::OrderUpdated(_) => "order-updated",
            DomainEvent::OrderDeleted(_) => "order-deleted",
            DomainEvent::BillGenerated(_) => "bill-generated",
            DomainEvent::BillPaid(_) => "bill-paid",
            DomainEvent::BillCancelled(_) => "bill-cancelled",
            DomainEvent::SessionStatusChanged(_) => "session-status-changed",
            DomainEvent::WaiterRequested(_) => "waiter-requested",
        }
    }

    pub fn restaurant_id(&self) -> RestaurantId {
        match self {
            DomainEvent::OrderCreated(p) | DomainEvent::OrderUpdated(p) => p.restaurant_id,
            DomainEvent::OrderPatch(p) => p.restaurant_id,
            DomainEvent::OrderDeleted(p) => p.restaurant_id,
            DomainEvent::BillGenerated(p)
            | DomainEvent::BillPaid(p)
            | DomainEvent::BillCancelled(p) => p.restaurant_id,
            DomainEvent::SessionStatusChanged(p) => p.restaurant_id,
            DomainEvent::WaiterRequested(p) => p.restaurant_id,
        }
    }

    pub fn session_id(&self) -> SessionId {
        match self {
            DomainEvent::OrderCreated(p) | DomainEvent::OrderUpdated(p) => p.session_id,
            DomainEvent::OrderPatch(p) => p.session_id,
            DomainEvent::OrderDeleted(p) => p.session_id,
            DomainEvent::BillGenerated(p)
            | DomainEvent::BillPaid(p)
            | DomainEvent::BillCancelled(p) => p.session_id,
            DomainEvent::SessionStatusChanged(p) => p.session_id,
            DomainEvent::WaiterRequested(p) => p.session_id,
        }
    }

    pub fn order_created(restaurant_id: RestaurantId, order: Order) -> Self {
        DomainEvent::OrderCreated(OrderPayload::new(restaurant_id, order))
    }

    pub fn order_updated(restaurant_id: RestaurantId, order: Order) -> Self {
        DomainEvent::OrderUpdated(OrderPayload::new(restaurant_id, order))
    }

    pub fn order_patch(restaurant_id: RestaurantId, order: &Order) -> Self {
        DomainEvent::OrderPatch(OrderPatchPayload {
            restaurant_id,
            session_id: order.session_id,
            order_id: order.id,
            status: order.status,
            updated_at: order.updated_at,
        })
    }

    pub fn order_deleted(restaurant_id: RestaurantId, order: &Order) -> Self {
        DomainEvent::OrderDeleted(OrderRefPayload {
            restaurant_id,
            session_id: order.session_id,
            order_id: order.id,
        })
    }

    pub fn bill_generated(restaurant_id: RestaurantId, bill: Bill) -> Self {
        DomainEvent::BillGenerated(BillPayload::new(restaurant_id, bill))
    }

    pub fn bill_paid(restaurant_id: RestaurantId, bill: Bill) -> Self {
        DomainEvent::BillPaid(BillPayload::new(restaurant_id, bill))
    }

    pub fn bill_cancelled(restaurant_id: RestaurantId, bill: Bill) -> Self {
        DomainEvent::BillCancelled(BillPayload::new(restaurant_id, bill))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderPayload {
    pub restaurant_id: RestaurantId,
    pub session_id: SessionId,
    pub order_id: OrderId,
    pub order: Order,
}

impl OrderPayload {
    fn new(restaurant_id: RestaurantId, order: Order) -> Self {
        Self {
            restaurant_id,
            session_id: order.session_id,
            order_id: order.id,
            order,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderPatchPayload {
    pub restaurant_id: RestaurantId,
    pub session_id: SessionId,
    pub order_id: OrderId,
    pub status: OrderStatus,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderRefPayload {
    pub restaurant_id: RestaurantId,
    pub session_id: SessionId,
    pub order_id: OrderId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BillPayload {
    pub restaurant_id: RestaurantId,
    pub session_id: SessionId,
    pub bill_id: BillId,
    pub bill: Bill,
}

impl BillPayload {
    fn new(restaurant_id: RestaurantId, bill: Bill) -> Self {
        Self {
            restaurant_id,
            session_id: bill.session_id,
            bill_id: bill.id,
            bill,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionStatusPayload {
    pub restaurant_id: RestaurantId,
    pub session_id: SessionId,
    pub table_id: TableId,
    /// `None` when the session was just opened.
    pub from: Option<SessionStatus>,
    pub to: SessionStatus,
    pub changed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WaiterRequestedPayload {
    pub restaurant_id: RestaurantId,
    pub session_id: SessionId,
    pub table_id: TableId,
    pub table_number: u32,
    pub customer_id: Option<CustomerId>,
    pub requested_at: DateTime<Utc>,
}
