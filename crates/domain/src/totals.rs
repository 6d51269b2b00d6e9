//! Money projections derived from orders and bills.

use common::Money;
use serde::{Deserialize, Serialize};

use crate::bill::Bill;
use crate::customer::Customer;
use crate::order::Order;
use crate::session::TableSession;

/// Session money totals, always recomputed from source records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SessionTotals {
    /// Σ non-cancelled order totals.
    pub total_amount: Money,
    /// Σ totals of paid bills.
    pub paid_amount: Money,
    /// Σ subtotals of non-cancelled bills.
    pub billed_amount: Money,
}

impl SessionTotals {
    pub fn derive(orders: &[Order], bills: &[Bill]) -> Self {
        let total_amount = orders
            .iter()
            .filter(|o| !o.is_cancelled())
            .map(Order::total)
            .sum();
        let paid_amount = bills.iter().filter(|b| b.is_paid()).map(|b| b.total).sum();
        let billed_amount = bills
            .iter()
            .filter(|b| b.is_active())
            .map(|b| b.subtotal)
            .sum();
        Self {
            total_amount,
            paid_amount,
            billed_amount,
        }
    }

    /// Order value not yet on any bill.
    pub fn unbilled(&self) -> Money {
        self.total_amount - self.billed_amount
    }
}

/// Read projection of a session with its diners and derived totals.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionSummary {
    pub session: TableSession,
    pub customers: Vec<Customer>,
    pub totals: SessionTotals,
    pub pending_bills: usize,
}

impl SessionSummary {
    pub fn build(
        session: TableSession,
        customers: Vec<Customer>,
        orders: &[Order],
        bills: &[Bill],
    ) -> Self {
        Self {
            session,
            customers,
            totals: SessionTotals::derive(orders, bills),
            pending_bills: bills.iter().filter(|b| b.is_pending()).count(),
        }
    }
}
