//! Settlement documents.

use chrono::{DateTime, Utc};
use common::{BillId, CustomerId, Money, OrderId, SessionId};
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::error::ModelError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BillType {
    Individual,
    Combined,
    Partial,
    ItemLevel,
}

/// Groups of bill types that may coexist on one session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BillFamily {
    /// One bill for the whole table.
    Whole,
    /// Individual and partial bills, each settling whole customers.
    PerCustomer,
    /// Item-level bills, each settling shares of line items.
    PerItem,
}

impl BillType {
    pub fn family(&self) -> BillFamily {
        match self {
            BillType::Combined => BillFamily::Whole,
            BillType::Individual | BillType::Partial => BillFamily::PerCustomer,
            BillType::ItemLevel => BillFamily::PerItem,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            BillType::Individual => "individual",
            BillType::Combined => "combined",
            BillType::Partial => "partial",
            BillType::ItemLevel => "item_level",
        }
    }
}

impl std::fmt::Display for BillType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for BillType {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "individual" => Ok(BillType::Individual),
            "combined" => Ok(BillType::Combined),
            "partial" => Ok(BillType::Partial),
            "item_level" => Ok(BillType::ItemLevel),
            other => Err(ModelError::UnknownValue {
                kind: "bill type",
                value: other.to_string(),
            }),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum BillStatus {
    #[default]
    Pending,
    Paid,
    Cancelled,
}

impl BillStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BillStatus::Pending => "pending",
            BillStatus::Paid => "paid",
            BillStatus::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for BillStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for BillStatus {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(BillStatus::Pending),
            "paid" => Ok(BillStatus::Paid),
            "cancelled" => Ok(BillStatus::Cancelled),
            other => Err(ModelError::UnknownValue {
                kind: "bill status",
                value: other.to_string(),
            }),
        }
    }
}

/// Builds a bill number of the form `BILL-{table}-{unix ms}-{3 digits}`.
///
/// Unique in practice but not monotonic; callers that need a hard guarantee
/// check against numbers already issued.
pub fn bill_number(table_number: u32, now: DateTime<Utc>) -> String {
    let suffix: u16 = rand::rng().random_range(100..1000);
    format!("BILL-{}-{}-{}", table_number, now.timestamp_millis(), suffix)
}

/// A settlement document covering one or more customers' orders.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bill {
    pub id: BillId,
    pub bill_number: String,
    pub session_id: SessionId,
    /// Paying customer; `None` for combined bills.
    pub customer_id: Option<CustomerId>,
    /// Every customer this bill settles.
    pub covered_customers: Vec<CustomerId>,
    pub bill_type: BillType,
    pub subtotal: Money,
    pub tax: Money,
    pub tip: Money,
    pub total: Money,
    pub status: BillStatus,
    pub payment_method: Option<String>,
    pub paid_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Bill {
    /// Issues a pending bill. Prices are tax-inclusive so tax is always zero.
    #[allow(clippy::too_many_arguments)]
    pub fn issue(
        bill_number: String,
        session_id: SessionId,
        customer_id: Option<CustomerId>,
        covered_customers: Vec<CustomerId>,
        bill_type: BillType,
        subtotal: Money,
        tip: Money,
        now: DateTime<Utc>,
    ) -> Self {
        let tax = Money::zero();
        Self {
            id: BillId::new(),
            bill_number,
            session_id,
            customer_id,
            covered_customers,
            bill_type,
            subtotal,
            tax,
            tip,
            total: subtotal + tax + tip,
            status: BillStatus::Pending,
            payment_method: None,
            paid_at: None,
            created_at: now,
        }
    }

    /// Non-cancelled bills count towards coverage and reconciliation.
    pub fn is_active(&self) -> bool {
        self.status != BillStatus::Cancelled
    }

    pub fn is_paid(&self) -> bool {
        self.status == BillStatus::Paid
    }

    pub fn is_pending(&self) -> bool {
        self.status == BillStatus::Pending
    }

    pub fn covers(&self, customer_id: CustomerId) -> bool {
        self.covered_customers.contains(&customer_id)
    }
}

/// One customer's share of one order line on an item-level bill.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BillItem {
    pub bill_id: BillId,
    pub order_id: OrderId,
    pub line_index: usize,
    pub customer_id: CustomerId,
    pub amount: Money,
}
