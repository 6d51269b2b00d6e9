//! Domain validation errors.

use thiserror::Error;

use crate::order::OrderStatus;
use crate::session::SessionStatus;

/// Errors raised when a record or input violates a model invariant.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ModelError {
    /// Party size must be at least one diner.
    #[error("Invalid party size: {0} (must be at least 1)")]
    InvalidPartySize(u32),

    /// A session needs exactly one main customer.
    #[error("Expected exactly one main customer, found {found}")]
    MainCustomerCount { found: usize },

    /// Customer names must not be blank.
    #[error("Customer name must not be empty")]
    EmptyCustomerName,

    /// An order must carry at least one line item.
    #[error("Order has no items")]
    NoItems,

    /// Line item quantity must be positive.
    #[error("Invalid quantity: {quantity} (must be greater than 0)")]
    InvalidQuantity { quantity: u32 },

    /// Prices are never negative.
    #[error("Invalid price: {cents} (must not be negative)")]
    NegativePrice { cents: i64 },

    /// An order total exceeds the accepted maximum.
    #[error("Order amount is too large")]
    AmountOverflow,

    /// Items can only change while the order is pending.
    #[error("Order items are locked in {status} status")]
    ItemsLocked { status: OrderStatus },

    /// Order status does not move backwards or out of a terminal state.
    #[error("Invalid order status transition: {from} -> {to}")]
    InvalidOrderTransition { from: OrderStatus, to: OrderStatus },

    /// Session status transition is not part of the lifecycle.
    #[error("Invalid session status transition: {from} -> {to}")]
    InvalidSessionTransition {
        from: SessionStatus,
        to: SessionStatus,
    },

    /// A stored or submitted enum value is not recognised.
    #[error("Unknown {kind} value: {value}")]
    UnknownValue { kind: &'static str, value: String },
}
