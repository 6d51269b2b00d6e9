//! Domain model for table-service settlement.
//!
//! This crate provides pure data and validation rules:
//! - `TableSession` with its status machine
//! - `Customer`, `Order` and `Bill` records
//! - split policies accepted by bill generation
//! - the `DomainEvent` envelope broadcast to viewers
//! - totals derived from orders and bills

pub mod bill;
pub mod customer;
pub mod error;
pub mod event;
pub mod order;
pub mod policy;
pub mod session;
pub mod totals;

pub use bill::{Bill, BillFamily, BillItem, BillStatus, BillType, bill_number};
pub use customer::{Customer, NewCustomer, PaymentStatus, validate_customer_batch};
pub use error::ModelError;
pub use event::{
    BillPayload, DomainEvent, OrderPatchPayload, OrderPayload, OrderRefPayload,
    SessionStatusPayload, WaiterRequestedPayload,
};
pub use order::{LineItem, MAX_ORDER_TOTAL, Order, OrderStatus, validate_items};
pub use policy::{CustomShare, ItemAssignment, ItemSplit, SplitPolicy};
pub use session::{NewSession, SessionStatus, SplitType, TableSession};
pub use totals::{SessionSummary, SessionTotals};

pub use common::{
    BillId, CustomerId, MenuItemId, Money, OrderId, RestaurantId, SessionId, TableId,
};
