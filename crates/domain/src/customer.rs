//! Diners seated within a session.

use common::{CustomerId, SessionId};
use serde::{Deserialize, Serialize};

use crate::bill::Bill;
use crate::error::ModelError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    #[default]
    Pending,
    Paid,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Pending => "pending",
            PaymentStatus::Paid => "paid",
        }
    }
}

impl std::str::FromStr for PaymentStatus {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(PaymentStatus::Pending),
            "paid" => Ok(PaymentStatus::Paid),
            other => Err(ModelError::UnknownValue {
                kind: "payment status",
                value: other.to_string(),
            }),
        }
    }
}

/// Input for seating a diner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewCustomer {
    pub name: String,
    #[serde(default)]
    pub is_main_customer: bool,
}

impl NewCustomer {
    pub fn new(name: impl Into<String>, is_main_customer: bool) -> Self {
        Self {
            name: name.into(),
            is_main_customer,
        }
    }

    /// Placeholder diners for a party seated without names.
    ///
    /// The first guest is the main customer.
    pub fn guests(party_size: u32) -> Vec<NewCustomer> {
        (1..=party_size)
            .map(|n| NewCustomer::new(format!("Guest {n}"), n == 1))
            .collect()
    }
}

/// A diner within a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Customer {
    pub id: CustomerId,
    pub session_id: SessionId,
    pub name: String,
    pub is_main_customer: bool,
    pub payment_status: PaymentStatus,
}

impl Customer {
    pub fn seat(session_id: SessionId, input: NewCustomer) -> Result<Self, ModelError> {
        let name = input.name.trim();
        if name.is_empty() {
            return Err(ModelError::EmptyCustomerName);
        }
        Ok(Self {
            id: CustomerId::new(),
            session_id,
            name: name.to_string(),
            is_main_customer: input.is_main_customer,
            payment_status: PaymentStatus::Pending,
        })
    }

    /// Derives payment status from the session's bills.
    ///
    /// Paid when at least one non-cancelled bill covers this customer and every
    /// such bill is paid.
    pub fn derive_payment_status(&self, bills: &[Bill]) -> PaymentStatus {
        let mut covering = bills
            .iter()
            .filter(|b| b.is_active() && b.covers(self.id))
            .peekable();
        if covering.peek().is_none() {
            return PaymentStatus::Pending;
        }
        if covering.all(|b| b.is_paid()) {
            PaymentStatus::Paid
        } else {
            PaymentStatus::Pending
        }
    }
}

/// Validates a seating batch: non-empty names and exactly one main customer.
pub fn validate_customer_batch(batch: &[NewCustomer]) -> Result<(), ModelError> {
    if batch.iter().any(|c| c.name.trim().is_empty()) {
        return Err(ModelError::EmptyCustomerName);
    }
    let mains = batch.iter().filter(|c| c.is_main_customer).count();
    if mains != 1 {
        return Err(ModelError::MainCustomerCount { found: mains });
    }
    Ok(())
}
