//! Split policies accepted by bill generation.

use common::{CustomerId, Money, OrderId};
use serde::{Deserialize, Serialize};

use crate::bill::BillType;

/// The rule by which a session's orders are partitioned into bills.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SplitPolicy {
    /// One bill per customer with a positive order total.
    Individual,
    /// One bill for the whole table.
    Combined,
    /// One bill covering the listed customers.
    Partial { customer_ids: Vec<CustomerId> },
    /// Bills built from explicit line item assignments.
    ItemLevel { assignments: Vec<ItemAssignment> },
}

impl SplitPolicy {
    pub fn bill_type(&self) -> BillType {
        match self {
            SplitPolicy::Individual => BillType::Individual,
            SplitPolicy::Combined => BillType::Combined,
            SplitPolicy::Partial { .. } => BillType::Partial,
            SplitPolicy::ItemLevel { .. } => BillType::ItemLevel,
        }
    }

    pub fn name(&self) -> &'static str {
        self.bill_type().as_str()
    }
}

/// Assigns one order line to a set of customers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemAssignment {
    pub order_id: OrderId,
    pub line_index: usize,
    pub split: ItemSplit,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum ItemSplit {
    /// The line total divided evenly between the listed customers.
    Equal { customer_ids: Vec<CustomerId> },
    /// Explicit amounts per customer.
    Custom { shares: Vec<CustomShare> },
}

impl ItemSplit {
    /// Customers named by this split, in request order.
    pub fn customers(&self) -> Vec<CustomerId> {
        match self {
            ItemSplit::Equal { customer_ids } => customer_ids.clone(),
            ItemSplit::Custom { shares } => shares.iter().map(|s| s.customer_id).collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CustomShare {
    pub customer_id: CustomerId,
    pub amount: Money,
}
