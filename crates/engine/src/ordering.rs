//! Order intake and kitchen status updates.

use std::sync::Arc;

use chrono::Utc;
use common::{CustomerId, MenuItemId, OrderId, RestaurantId, SessionId};
use domain::{
    Bill, BillFamily, BillItem, DomainEvent, LineItem, Order, OrderStatus, SessionStatus,
};
use serde::{Deserialize, Serialize};
use session_store::{Repository, SessionQuery};

use crate::context::{EngineContext, ensure_open, transition_session};
use crate::error::{EngineError, Result};

/// One requested line; name and price come from the menu.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderLineRequest {
    pub menu_item_id: MenuItemId,
    pub quantity: u32,
    #[serde(default)]
    pub customization: Option<String>,
}

impl OrderLineRequest {
    pub fn new(menu_item_id: MenuItemId, quantity: u32) -> Self {
        Self {
            menu_item_id,
            quantity,
            customization: None,
        }
    }
}

/// Whether an active bill already accounts for this order.
fn is_billed(order: &Order, bills: &[Bill], bill_items: &[BillItem]) -> bool {
    bills
        .iter()
        .filter(|b| b.is_active())
        .any(|b| match b.bill_type.family() {
            BillFamily::Whole => true,
            BillFamily::PerCustomer => b.covers(order.customer_id),
            BillFamily::PerItem => bill_items
                .iter()
                .any(|i| i.bill_id == b.id && i.order_id == order.id),
        })
}

/// Places orders and moves them through the kitchen.
pub struct OrderDesk<R> {
    ctx: Arc<EngineContext<R>>,
}

impl<R> Clone for OrderDesk<R> {
    fn clone(&self) -> Self {
        Self {
            ctx: Arc::clone(&self.ctx),
        }
    }
}

impl<R: Repository> OrderDesk<R> {
    pub(crate) fn new(ctx: Arc<EngineContext<R>>) -> Self {
        Self { ctx }
    }

    async fn resolve_lines(
        &self,
        restaurant_id: RestaurantId,
        lines: Vec<OrderLineRequest>,
    ) -> Result<Vec<LineItem>> {
        let mut items = Vec::with_capacity(lines.len());
        for line in lines {
            let Some(menu_item) = self
                .ctx
                .collaborators
                .menu
                .menu_item(restaurant_id, line.menu_item_id)
                .await?
            else {
                return Err(EngineError::Validation(format!(
                    "unknown menu item {}",
                    line.menu_item_id
                )));
            };
            let mut item = LineItem::new(menu_item.id, menu_item.name, line.quantity, menu_item.price);
            item.customization = line.customization.filter(|c| !c.trim().is_empty());
            items.push(item);
        }
        Ok(items)
    }

    async fn load_order(&self, order_id: OrderId) -> Result<Order> {
        self.ctx
            .repo
            .get_order(order_id)
            .await?
            .ok_or_else(|| EngineError::not_found("order", order_id))
    }

    async fn restaurant_of(&self, session_id: SessionId) -> Result<RestaurantId> {
        self.ctx
            .repo
            .get_session(session_id)
            .await?
            .map(|s| s.restaurant_id)
            .ok_or_else(|| EngineError::not_found("session", session_id))
    }

    /// Places a pending order for a seated diner.
    #[tracing::instrument(skip(self, lines), fields(%session_id, %customer_id))]
    pub async fn place_order(
        &self,
        session_id: SessionId,
        customer_id: CustomerId,
        lines: Vec<OrderLineRequest>,
    ) -> Result<Order> {
        let restaurant_id = self.restaurant_of(session_id).await?;
        let items = self.resolve_lines(restaurant_id, lines).await?;

        let mut locked = self.ctx.lock(session_id, "place_order").await?;
        ensure_open(locked.tx.session())?;
        let customers = locked.tx.customers().await?;
        if !customers.iter().any(|c| c.id == customer_id) {
            return Err(EngineError::not_found("customer", customer_id));
        }

        let order = Order::place(session_id, customer_id, items, Utc::now())?;
        locked.tx.insert_order(order.clone()).await?;
        self.ctx
            .commit(
                locked,
                vec![DomainEvent::order_created(restaurant_id, order.clone())],
            )
            .await?;

        metrics::counter!("orders_placed_total").increment(1);
        tracing::info!(order_id = %order.id, total = %order.total(), "order placed");
        Ok(order)
    }

    /// Advances an order's status.
    ///
    /// The first order confirmed in a waiting session activates it.
    #[tracing::instrument(skip(self), fields(%order_id, %status))]
    pub async fn update_order_status(&self, order_id: OrderId, status: OrderStatus) -> Result<Order> {
        let session_id = self.load_order(order_id).await?.session_id;
        let mut locked = self.ctx.lock(session_id, "update_order_status").await?;
        let session = locked.tx.session().clone();
        ensure_open(&session)?;

        let mut order = locked
            .tx
            .orders()
            .await?
            .into_iter()
            .find(|o| o.id == order_id)
            .ok_or_else(|| EngineError::not_found("order", order_id))?;
        if order.status == status {
            return Ok(order);
        }

        if status == OrderStatus::Cancelled {
            let bills = locked.tx.bills().await?;
            let bill_items = locked.tx.bill_items().await?;
            if is_billed(&order, &bills, &bill_items) {
                return Err(EngineError::Conflict(format!(
                    "order {order_id} is already on a bill"
                )));
            }
        }

        let now = Utc::now();
        order.advance(status, now)?;
        locked.tx.update_order(order.clone()).await?;

        let mut events = vec![DomainEvent::order_patch(session.restaurant_id, &order)];
        if status.is_confirmed() && session.status == SessionStatus::Waiting {
            events.push(transition_session(&mut locked.tx, SessionStatus::Active, false, now).await?);
        }

        self.ctx.commit(locked, events).await?;
        tracing::debug!("order status updated");
        Ok(order)
    }

    /// Replaces the lines of a pending order.
    #[tracing::instrument(skip(self, lines), fields(%order_id))]
    pub async fn replace_items(&self, order_id: OrderId, lines: Vec<OrderLineRequest>) -> Result<Order> {
        let session_id = self.load_order(order_id).await?.session_id;
        let restaurant_id = self.restaurant_of(session_id).await?;
        let items = self.resolve_lines(restaurant_id, lines).await?;

        let mut locked = self.ctx.lock(session_id, "replace_items").await?;
        ensure_open(locked.tx.session())?;
        let mut order = locked
            .tx
            .orders()
            .await?
            .into_iter()
            .find(|o| o.id == order_id)
            .ok_or_else(|| EngineError::not_found("order", order_id))?;

        let bills = locked.tx.bills().await?;
        let bill_items = locked.tx.bill_items().await?;
        if is_billed(&order, &bills, &bill_items) {
            return Err(EngineError::Conflict(format!(
                "order {order_id} is already on a bill"
            )));
        }

        order.replace_items(items, Utc::now())?;
        locked.tx.update_order(order.clone()).await?;
        self.ctx
            .commit(
                locked,
                vec![DomainEvent::order_updated(restaurant_id, order.clone())],
            )
            .await?;
        Ok(order)
    }

    /// Removes a pending order from a session that has no bills yet.
    #[tracing::instrument(skip(self), fields(%order_id))]
    pub async fn delete_order(&self, order_id: OrderId) -> Result<()> {
        let session_id = self.load_order(order_id).await?.session_id;
        let mut locked = self.ctx.lock(session_id, "delete_order").await?;
        let session = locked.tx.session().clone();
        ensure_open(&session)?;

        let order = locked
            .tx
            .orders()
            .await?
            .into_iter()
            .find(|o| o.id == order_id)
            .ok_or_else(|| EngineError::not_found("order", order_id))?;
        if order.status != OrderStatus::Pending {
            return Err(EngineError::Conflict(format!(
                "only pending orders can be deleted; order is {}",
                order.status
            )));
        }

        let bills = locked.tx.bills().await?;
        if bills.iter().any(|b| b.is_active()) {
            return Err(EngineError::Conflict(
                "orders cannot be deleted once the session is billed".to_string(),
            ));
        }

        locked.tx.delete_order(order_id).await?;
        self.ctx
            .commit(
                locked,
                vec![DomainEvent::order_deleted(session.restaurant_id, &order)],
            )
            .await
    }

    pub async fn order(&self, order_id: OrderId) -> Result<Order> {
        self.load_order(order_id).await
    }

    pub async fn orders_for_session(&self, session_id: SessionId) -> Result<Vec<Order>> {
        self.restaurant_of(session_id).await?;
        Ok(self.ctx.repo.orders_for_session(session_id).await?)
    }

    /// Orders still moving through the kitchen across a restaurant's open sessions.
    pub async fn active_orders(&self, restaurant_id: RestaurantId) -> Result<Vec<Order>> {
        let sessions = self
            .ctx
            .repo
            .find_sessions(SessionQuery::open_in(restaurant_id))
            .await?;
        let mut orders = Vec::new();
        for session in sessions {
            orders.extend(
                self.ctx
                    .repo
                    .orders_for_session(session.id)
                    .await?
                    .into_iter()
                    .filter(|o| !o.status.is_terminal()),
            );
        }
        orders.sort_by_key(|o| o.created_at);
        Ok(orders)
    }
}
