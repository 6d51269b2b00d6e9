//! Shared identifier and money types used by every crate in the workspace.

mod money;
mod types;

pub use money::Money;
pub use types::{BillId, CustomerId, MenuItemId, OrderId, RestaurantId, SessionId, TableId};
