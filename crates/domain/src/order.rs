//! Orders placed by diners and their status progression.

use chrono::{DateTime, Utc};
use common::{CustomerId, MenuItemId, Money, OrderId, SessionId};
use serde::{Deserialize, Serialize};

use crate::error::ModelError;

/// The state of an order in the kitchen flow.
///
/// State transitions:
/// ```text
/// Pending ──► Confirmed ──► Preparing ──► Served ──► Completed
///    │            │             │           │
///    └────────────┴─────────────┴───────────┴──► Cancelled
/// ```
/// Steps may be skipped forward but never taken backwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    #[default]
    Pending,
    Confirmed,
    Preparing,
    Served,
    Completed,
    Cancelled,
}

impl OrderStatus {
    fn rank(&self) -> u8 {
        match self {
            OrderStatus::Pending => 0,
            OrderStatus::Confirmed => 1,
            OrderStatus::Preparing => 2,
            OrderStatus::Served => 3,
            OrderStatus::Completed => 4,
            OrderStatus::Cancelled => u8::MAX,
        }
    }

    /// Returns true if items can be modified in this state.
    pub fn can_modify_items(&self) -> bool {
        matches!(self, OrderStatus::Pending)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, OrderStatus::Completed | OrderStatus::Cancelled)
    }

    /// Returns true if the order has been accepted by staff.
    pub fn is_confirmed(&self) -> bool {
        !matches!(self, OrderStatus::Pending | OrderStatus::Cancelled)
    }

    /// Returns true if moving to `next` is a forward step or the cancel escape.
    pub fn can_advance_to(&self, next: OrderStatus) -> bool {
        if self.is_terminal() {
            return false;
        }
        next == OrderStatus::Cancelled || next.rank() > self.rank()
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Pending => "pending",
            OrderStatus::Confirmed => "confirmed",
            OrderStatus::Preparing => "preparing",
            OrderStatus::Served => "served",
            OrderStatus::Completed => "completed",
            OrderStatus::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for OrderStatus {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(OrderStatus::Pending),
            "confirmed" => Ok(OrderStatus::Confirmed),
            "preparing" => Ok(OrderStatus::Preparing),
            "served" => Ok(OrderStatus::Served),
            "completed" => Ok(OrderStatus::Completed),
            "cancelled" => Ok(OrderStatus::Cancelled),
            other => Err(ModelError::UnknownValue {
                kind: "order status",
                value: other.to_string(),
            }),
        }
    }
}

/// A priced line on an order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineItem {
    pub menu_item_id: MenuItemId,
    pub name: String,
    pub quantity: u32,
    pub unit_price: Money,
    #[serde(default)]
    pub customization: Option<String>,
}

impl LineItem {
    pub fn new(
        menu_item_id: MenuItemId,
        name: impl Into<String>,
        quantity: u32,
        unit_price: Money,
    ) -> Self {
        Self {
            menu_item_id,
            name: name.into(),
            quantity,
            unit_price,
            customization: None,
        }
    }

    pub fn with_customization(mut self, customization: impl Into<String>) -> Self {
        self.customization = Some(customization.into());
        self
    }

    /// quantity × unit price
    pub fn total(&self) -> Money {
        self.unit_price.multiply(self.quantity)
    }

    /// Checks the line and returns its total.
    fn validate(&self) -> Result<Money, ModelError> {
        if self.quantity == 0 {
            return Err(ModelError::InvalidQuantity {
                quantity: self.quantity,
            });
        }
        if self.unit_price.is_negative() {
            return Err(ModelError::NegativePrice {
                cents: self.unit_price.cents(),
            });
        }
        self.unit_price
            .checked_multiply(self.quantity)
            .ok_or(ModelError::AmountOverflow)
    }
}

/// Largest total a single order may carry. Keeps session and bill sums
/// far from the `Money` range.
pub const MAX_ORDER_TOTAL: Money = Money::from_cents(1_000_000_000_000);

/// Validates a set of line items before they are attached to an order.
pub fn validate_items(items: &[LineItem]) -> Result<(), ModelError> {
    if items.is_empty() {
        return Err(ModelError::NoItems);
    }
    let total = items.iter().try_fold(Money::zero(), |total, item| {
        let line = item.validate()?;
        total.checked_add(line).ok_or(ModelError::AmountOverflow)
    })?;
    if total > MAX_ORDER_TOTAL {
        return Err(ModelError::AmountOverflow);
    }
    Ok(())
}

/// A placed order tied to one customer of one session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    pub id: OrderId,
    pub session_id: SessionId,
    pub customer_id: CustomerId,
    pub status: OrderStatus,
    pub items: Vec<LineItem>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Order {
    pub fn place(
        session_id: SessionId,
        customer_id: CustomerId,
        items: Vec<LineItem>,
        now: DateTime<Utc>,
    ) -> Result<Self, ModelError> {
        validate_items(&items)?;
        Ok(Self {
            id: OrderId::new(),
            session_id,
            customer_id,
            status: OrderStatus::Pending,
            items,
            created_at: now,
            updated_at: now,
        })
    }

    /// Σ quantity × price over all lines.
    pub fn total(&self) -> Money {
        self.items.iter().map(LineItem::total).sum()
    }

    pub fn is_cancelled(&self) -> bool {
        self.status == OrderStatus::Cancelled
    }

    /// Returns the line at `index`, if any.
    pub fn line(&self, index: usize) -> Option<&LineItem> {
        self.items.get(index)
    }

    /// Advances the status, returning the previous one.
    pub fn advance(
        &mut self,
        next: OrderStatus,
        now: DateTime<Utc>,
    ) -> Result<OrderStatus, ModelError> {
        let from = self.status;
        if !from.can_advance_to(next) {
            return Err(ModelError::InvalidOrderTransition { from, to: next });
        }
        self.status = next;
        self.updated_at = now;
        Ok(from)
    }

    /// Replaces all lines; only allowed while pending.
    pub fn replace_items(
        &mut self,
        items: Vec<LineItem>,
        now: DateTime<Utc>,
    ) -> Result<(), ModelError> {
        if !self.status.can_modify_items() {
            return Err(ModelError::ItemsLocked {
                status: self.status,
            });
        }
        validate_items(&items)?;
        self.items = items;
        self.updated_at = now;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn burger(quantity: u32) -> LineItem {
        LineItem::new(MenuItemId::new(), "Burger", quantity, Money::from_cents(1250))
    }

    fn order() -> Order {
        Order::place(
            SessionId::new(),
            CustomerId::new(),
            vec![burger(2), burger(1).with_customization("no onions")],
            Utc::now(),
        )
        .unwrap()
    }

    #[test]
    fn total_is_sum_of_lines() {
        assert_eq!(order().total(), Money::from_cents(3750));
    }

    #[test]
    fn place_rejects_bad_items() {
        let now = Utc::now();
        assert_eq!(
            Order::place(SessionId::new(), CustomerId::new(), vec![], now).unwrap_err(),
            ModelError::NoItems
        );
        assert_eq!(
            Order::place(SessionId::new(), CustomerId::new(), vec![burger(0)], now).unwrap_err(),
            ModelError::InvalidQuantity { quantity: 0 }
        );
        let negative = LineItem::new(MenuItemId::new(), "Refund", 1, Money::from_cents(-5));
        assert_eq!(
            Order::place(SessionId::new(), CustomerId::new(), vec![negative], now).unwrap_err(),
            ModelError::NegativePrice { cents: -5 }
        );
    }

    #[test]
    fn status_only_moves_forward() {
        assert!(OrderStatus::Pending.can_advance_to(OrderStatus::Confirmed));
        assert!(OrderStatus::Pending.can_advance_to(OrderStatus::Served));
        assert!(!OrderStatus::Served.can_advance_to(OrderStatus::Preparing));
        assert!(!OrderStatus::Confirmed.can_advance_to(OrderStatus::Confirmed));
        assert!(OrderStatus::Served.can_advance_to(OrderStatus::Cancelled));
        assert!(!OrderStatus::Completed.can_advance_to(OrderStatus::Cancelled));
        assert!(!OrderStatus::Cancelled.can_advance_to(OrderStatus::Completed));
    }

    #[test]
    fn advance_reports_previous_status() {
        let mut order = order();
        let from = order.advance(OrderStatus::Confirmed, Utc::now()).unwrap();
        assert_eq!(from, OrderStatus::Pending);
        assert!(order.status.is_confirmed());

        let err = order.advance(OrderStatus::Pending, Utc::now()).unwrap_err();
        assert_eq!(
            err,
            ModelError::InvalidOrderTransition {
                from: OrderStatus::Confirmed,
                to: OrderStatus::Pending,
            }
        );
    }

    #[test]
    fn items_locked_after_pending() {
        let mut order = order();
        order.replace_items(vec![burger(4)], Utc::now()).unwrap();
        assert_eq!(order.total(), Money::from_cents(5000));

        order.advance(OrderStatus::Confirmed, Utc::now()).unwrap();
        assert_eq!(
            order.replace_items(vec![burger(1)], Utc::now()).unwrap_err(),
            ModelError::ItemsLocked {
                status: OrderStatus::Confirmed
            }
        );
    }

    #[test]
    fn oversized_totals_are_rejected() {
        let huge = LineItem::new(MenuItemId::new(), "Caviar", u32::MAX, Money::from_cents(i64::MAX));
        assert_eq!(validate_items(&[huge]), Err(ModelError::AmountOverflow));

        let half = LineItem::new(MenuItemId::new(), "Wine", 1, Money::from_cents(i64::MAX / 2 + 1));
        assert_eq!(
            validate_items(&[half.clone(), half]),
            Err(ModelError::AmountOverflow)
        );

        let over_limit = LineItem::new(
            MenuItemId::new(),
            "Banquet",
            2,
            Money::from_cents(MAX_ORDER_TOTAL.cents() / 2 + 1),
        );
        assert_eq!(validate_items(&[over_limit]), Err(ModelError::AmountOverflow));
        assert!(validate_items(&[LineItem::new(MenuItemId::new(), "Soup", 3, MAX_ORDER_TOTAL)]).is_err());
        assert!(validate_items(&[LineItem::new(MenuItemId::new(), "Soup", 1, MAX_ORDER_TOTAL)]).is_ok());
    }
}
