//! Pure split arithmetic used by bill generation.

use std::collections::{HashMap, HashSet};

use common::{CustomerId, Money, OrderId};
use domain::{Customer, ItemAssignment, ItemSplit, Order};

use crate::error::{EngineError, Result};

/// Σ non-cancelled order totals per customer, in seating order.
pub fn customer_subtotals(customers: &[Customer], orders: &[Order]) -> Vec<(CustomerId, Money)> {
    customers
        .iter()
        .map(|c| {
            let subtotal = orders
                .iter()
                .filter(|o| o.customer_id == c.id && !o.is_cancelled())
                .map(Order::total)
                .sum();
            (c.id, subtotal)
        })
        .collect()
}

/// Σ non-cancelled order totals for the whole session.
pub fn session_subtotal(orders: &[Order]) -> Money {
    orders
        .iter()
        .filter(|o| !o.is_cancelled())
        .map(Order::total)
        .sum()
}

/// Divides `total` evenly in minor units.
///
/// The remainder goes one cent each to the first assignees, so the shares
/// always sum to `total`.
pub fn equal_shares(total: Money, assignees: &[CustomerId]) -> Vec<(CustomerId, Money)> {
    if assignees.is_empty() {
        return Vec::new();
    }
    let n = assignees.len() as i64;
    let base = total.cents() / n;
    let remainder = total.cents() % n;

    assignees
        .iter()
        .enumerate()
        .map(|(i, &customer_id)| {
            let extra = if (i as i64) < remainder { 1 } else { 0 };
            (customer_id, Money::from_cents(base + extra))
        })
        .collect()
}

/// One customer's share of one order line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ItemShare {
    pub order_id: OrderId,
    pub line_index: usize,
    pub customer_id: CustomerId,
    pub amount: Money,
}

impl ItemShare {
    pub fn line(&self) -> (OrderId, usize) {
        (self.order_id, self.line_index)
    }
}

/// Resolves item assignments into per-customer shares.
///
/// Every assigned line must belong to a non-cancelled order of the session,
/// appear at most once, and be split among distinct session customers whose
/// amounts add up to the line total within `epsilon`.
pub fn allocate_items(
    customers: &[Customer],
    orders: &[Order],
    assignments: &[ItemAssignment],
    epsilon: Money,
) -> Result<Vec<ItemShare>> {
    if assignments.is_empty() {
        return Err(EngineError::Validation(
            "item-level split needs at least one assignment".to_string(),
        ));
    }

    let known: HashSet<CustomerId> = customers.iter().map(|c| c.id).collect();
    let by_id: HashMap<OrderId, &Order> = orders.iter().map(|o| (o.id, o)).collect();
    let mut seen_lines = HashSet::new();
    let mut shares = Vec::new();

    for assignment in assignments {
        let order = by_id
            .get(&assignment.order_id)
            .filter(|o| !o.is_cancelled())
            .ok_or_else(|| {
                EngineError::Validation(format!(
                    "order {} is not a billable order of this session",
                    assignment.order_id
                ))
            })?;
        let line = order.line(assignment.line_index).ok_or_else(|| {
            EngineError::Validation(format!(
                "order {} has no line {}",
                assignment.order_id, assignment.line_index
            ))
        })?;
        if !seen_lines.insert((assignment.order_id, assignment.line_index)) {
            return Err(EngineError::Validation(format!(
                "line {} of order {} is assigned twice",
                assignment.line_index, assignment.order_id
            )));
        }

        let assignees = assignment.split.customers();
        if assignees.is_empty() {
            return Err(EngineError::Validation(format!(
                "line {} of order {} has no assignees",
                assignment.line_index, assignment.order_id
            )));
        }
        let mut distinct = HashSet::new();
        for customer_id in &assignees {
            if !known.contains(customer_id) {
                return Err(EngineError::Validation(format!(
                    "customer {customer_id} is not seated in this session"
                )));
            }
            if !distinct.insert(*customer_id) {
                return Err(EngineError::Validation(format!(
                    "customer {customer_id} appears twice on line {} of order {}",
                    assignment.line_index, assignment.order_id
                )));
            }
        }

        let line_total = line.total();
        let amounts = match &assignment.split {
            ItemSplit::Equal { customer_ids } => equal_shares(line_total, customer_ids),
            ItemSplit::Custom { shares } => {
                if let Some(negative) = shares.iter().find(|s| s.amount.is_negative()) {
                    return Err(EngineError::Validation(format!(
                        "negative share for customer {}",
                        negative.customer_id
                    )));
                }
                if let Some(oversized) = shares.iter().find(|s| s.amount > line_total) {
                    return Err(EngineError::Validation(format!(
                        "share for customer {} exceeds the {line_total} line total",
                        oversized.customer_id
                    )));
                }
                let assigned = shares
                    .iter()
                    .try_fold(Money::zero(), |sum, s| sum.checked_add(s.amount))
                    .ok_or_else(|| {
                        EngineError::Validation(format!(
                            "shares of line {} of order {} overflow",
                            assignment.line_index, assignment.order_id
                        ))
                    })?;
                if !assigned.approx_eq(line_total, epsilon) {
                    return Err(EngineError::Validation(format!(
                        "shares of line {} of order {} add up to {assigned}, expected {line_total}",
                        assignment.line_index, assignment.order_id
                    )));
                }
                shares.iter().map(|s| (s.customer_id, s.amount)).collect()
            }
        };

        shares.extend(amounts.into_iter().map(|(customer_id, amount)| ItemShare {
            order_id: assignment.order_id,
            line_index: assignment.line_index,
            customer_id,
            amount,
        }));
    }

    Ok(shares)
}

/// Groups shares by customer in seating order, dropping customers without any.
pub fn group_by_customer(
    customers: &[Customer],
    shares: &[ItemShare],
) -> Vec<(CustomerId, Vec<ItemShare>)> {
    customers
        .iter()
        .filter_map(|c| {
            let mine: Vec<ItemShare> = shares
                .iter()
                .filter(|s| s.customer_id == c.id)
                .copied()
                .collect();
            (!mine.is_empty()).then_some((c.id, mine))
        })
        .collect()
}
