//! Bill settlement.
//!
//! Generation runs entirely under the session lock, so a second concurrent
//! call observes the first one's bills and creates nothing.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use common::{BillId, CustomerId, Money, OrderId, SessionId};
use domain::{
    Bill, BillFamily, BillItem, BillStatus, BillType, Customer, DomainEvent, ItemAssignment, Order,
    SplitPolicy, bill_number,
};
use serde::Serialize;
use session_store::Repository;

use crate::context::{EngineContext, ensure_open, sync_payment_status};
use crate::error::{EngineError, Result};
use crate::split::{
    ItemShare, allocate_items, customer_subtotals, group_by_customer, session_subtotal,
};

const BILL_NUMBER_ATTEMPTS: usize = 32;

/// Billed and expected subtotals disagree on a fully covered session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReconciliationWarning {
    pub session_id: SessionId,
    pub expected: Money,
    pub billed: Money,
    pub difference: Money,
}

/// Post-settlement comparison of order totals and bill subtotals.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Reconciliation {
    /// Σ non-cancelled order totals.
    pub expected: Money,
    /// Σ subtotals of non-cancelled bills.
    pub billed: Money,
    /// `expected - billed`.
    pub outstanding: Money,
    /// Whether the existing bills claim to settle the whole session.
    pub fully_covered: bool,
    pub warning: Option<ReconciliationWarning>,
}

impl Reconciliation {
    /// Compares totals. Only a fully covered session can produce a warning;
    /// otherwise the gap is simply what remains to be billed.
    pub fn compute(
        session_id: SessionId,
        customers: &[Customer],
        orders: &[Order],
        bills: &[Bill],
        bill_items: &[BillItem],
        epsilon: Money,
    ) -> Self {
        let expected = session_subtotal(orders);
        let billed: Money = bills
            .iter()
            .filter(|b| b.is_active())
            .map(|b| b.subtotal)
            .sum();
        let fully_covered = is_fully_covered(customers, orders, bills, bill_items);

        let warning = (fully_covered && !billed.approx_eq(expected, epsilon)).then(|| {
            ReconciliationWarning {
                session_id,
                expected,
                billed,
                difference: billed - expected,
            }
        });

        Self {
            expected,
            billed,
            outstanding: expected - billed,
            fully_covered,
            warning,
        }
    }
}

fn is_fully_covered(
    customers: &[Customer],
    orders: &[Order],
    bills: &[Bill],
    bill_items: &[BillItem],
) -> bool {
    let active: Vec<&Bill> = bills.iter().filter(|b| b.is_active()).collect();
    let Some(first) = active.first() else {
        return false;
    };

    match first.bill_type.family() {
        BillFamily::Whole => true,
        BillFamily::PerCustomer => customer_subtotals(customers, orders)
            .into_iter()
            .filter(|(_, subtotal)| subtotal.is_positive())
            .all(|(customer_id, _)| active.iter().any(|b| b.covers(customer_id))),
        BillFamily::PerItem => {
            let active_ids: HashSet<BillId> = active.iter().map(|b| b.id).collect();
            let covered: HashSet<(OrderId, usize)> = bill_items
                .iter()
                .filter(|i| active_ids.contains(&i.bill_id))
                .map(|i| (i.order_id, i.line_index))
                .collect();
            orders
                .iter()
                .filter(|o| !o.is_cancelled())
                .flat_map(|o| (0..o.items.len()).map(move |i| (o.id, i)))
                .all(|line| covered.contains(&line))
        }
    }
}

/// Result of one `generate_bills` call.
#[derive(Debug, Clone, Serialize)]
pub struct SettlementOutcome {
    /// Bills created by this call.
    pub created: Vec<Bill>,
    /// Previously generated bills that already satisfied the request.
    pub existing: Vec<Bill>,
    pub reconciliation: Reconciliation,
}

impl SettlementOutcome {
    /// Every bill answering the request, existing first.
    pub fn bills(&self) -> Vec<Bill> {
        self.existing
            .iter()
            .chain(self.created.iter())
            .cloned()
            .collect()
    }
}

/// A bill to be issued.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Draft {
    customer_id: Option<CustomerId>,
    covered: Vec<CustomerId>,
    subtotal: Money,
    shares: Vec<ItemShare>,
}

#[derive(Debug, Default)]
struct Plan {
    existing: Vec<Bill>,
    drafts: Vec<Draft>,
}

impl Plan {
    fn keep(&mut self, bill: &Bill) {
        if !self.existing.iter().any(|b| b.id == bill.id) {
            self.existing.push(bill.clone());
        }
    }
}

/// Non-cancelled bills of a session belong to a single family.
fn ensure_compatible(active: &[&Bill], policy: &SplitPolicy) -> Result<()> {
    let wanted = policy.bill_type().family();
    if let Some(other) = active.iter().find(|b| b.bill_type.family() != wanted) {
        return Err(EngineError::Conflict(format!(
            "session is already settled with {} bills; cannot generate {} bills",
            other.bill_type,
            policy.name()
        )));
    }
    Ok(())
}

fn plan_individual(customers: &[Customer], orders: &[Order], active: &[&Bill]) -> Plan {
    let mut plan = Plan::default();
    for (customer_id, subtotal) in customer_subtotals(customers, orders) {
        if !subtotal.is_positive() {
            continue;
        }
        match active.iter().find(|b| b.covers(customer_id)) {
            Some(bill) => plan.keep(bill),
            None => plan.drafts.push(Draft {
                customer_id: Some(customer_id),
                covered: vec![customer_id],
                subtotal,
                shares: Vec::new(),
            }),
        }
    }
    plan
}

fn plan_combined(customers: &[Customer], orders: &[Order], active: &[&Bill]) -> Result<Plan> {
    let mut plan = Plan::default();
    if let Some(bill) = active.iter().find(|b| b.bill_type == BillType::Combined) {
        plan.keep(bill);
        return Ok(plan);
    }

    let subtotal = session_subtotal(orders);
    if !subtotal.is_positive() {
        return Err(EngineError::Validation(
            "session has no billable orders".to_string(),
        ));
    }
    plan.drafts.push(Draft {
        customer_id: None,
        covered: customers.iter().map(|c| c.id).collect(),
        subtotal,
        shares: Vec::new(),
    });
    Ok(plan)
}

fn plan_partial(
    customer_ids: &[CustomerId],
    customers: &[Customer],
    orders: &[Order],
    active: &[&Bill],
) -> Result<Plan> {
    let Some(&payer) = customer_ids.first() else {
        return Err(EngineError::Validation(
            "partial bill needs at least one customer".to_string(),
        ));
    };

    let mut distinct = HashSet::new();
    for customer_id in customer_ids {
        if !customers.iter().any(|c| c.id == *customer_id) {
            return Err(EngineError::Validation(format!(
                "customer {customer_id} is not seated in this session"
            )));
        }
        if !distinct.insert(*customer_id) {
            return Err(EngineError::Validation(format!(
                "customer {customer_id} is listed twice"
            )));
        }
        if let Some(bill) = active.iter().find(|b| b.covers(*customer_id)) {
            return Err(EngineError::Conflict(format!(
                "customer {customer_id} is already covered by bill {}",
                bill.bill_number
            )));
        }
    }

    let subtotal: Money = customer_subtotals(customers, orders)
        .into_iter()
        .filter(|(id, _)| distinct.contains(id))
        .map(|(_, subtotal)| subtotal)
        .sum();
    if !subtotal.is_positive() {
        return Err(EngineError::Validation(
            "selected customers have no billable orders".to_string(),
        ));
    }

    Ok(Plan {
        existing: Vec::new(),
        drafts: vec![Draft {
            customer_id: Some(payer),
            covered: customer_ids.to_vec(),
            subtotal,
            shares: Vec::new(),
        }],
    })
}

fn plan_item_level(
    assignments: &[ItemAssignment],
    customers: &[Customer],
    orders: &[Order],
    active: &[&Bill],
    bill_items: &[BillItem],
    epsilon: Money,
) -> Result<Plan> {
    let shares = allocate_items(customers, orders, assignments, epsilon)?;

    let active_ids: HashSet<BillId> = active.iter().map(|b| b.id).collect();
    let requested_lines: HashSet<(OrderId, usize)> = shares.iter().map(ItemShare::line).collect();
    let overlapping: Vec<&BillItem> = bill_items
        .iter()
        .filter(|i| active_ids.contains(&i.bill_id))
        .filter(|i| requested_lines.contains(&(i.order_id, i.line_index)))
        .collect();

    if overlapping.is_empty() {
        let drafts = group_by_customer(customers, &shares)
            .into_iter()
            .map(|(customer_id, shares)| Draft {
                customer_id: Some(customer_id),
                covered: vec![customer_id],
                subtotal: shares.iter().map(|s| s.amount).sum(),
                shares,
            })
            .collect();
        return Ok(Plan {
            existing: Vec::new(),
            drafts,
        });
    }

    // Replay: the exact same split of the exact same lines.
    let covered_lines: HashSet<(OrderId, usize)> = overlapping
        .iter()
        .map(|i| (i.order_id, i.line_index))
        .collect();
    let existing_shares: HashSet<(OrderId, usize, CustomerId, Money)> = overlapping
        .iter()
        .map(|i| (i.order_id, i.line_index, i.customer_id, i.amount))
        .collect();
    let requested_shares: HashSet<(OrderId, usize, CustomerId, Money)> = shares
        .iter()
        .map(|s| (s.order_id, s.line_index, s.customer_id, s.amount))
        .collect();

    if covered_lines != requested_lines || existing_shares != requested_shares {
        return Err(EngineError::Conflict(
            "some line items are already billed under a different split".to_string(),
        ));
    }

    let mut plan = Plan::default();
    let replayed: HashSet<BillId> = overlapping.iter().map(|i| i.bill_id).collect();
    for bill in active.iter().filter(|b| replayed.contains(&b.id)) {
        plan.keep(bill);
    }
    Ok(plan)
}

fn issue_number(
    table_number: u32,
    now: chrono::DateTime<Utc>,
    taken: &mut HashSet<String>,
) -> Result<String> {
    for _ in 0..BILL_NUMBER_ATTEMPTS {
        let number = bill_number(table_number, now);
        if taken.insert(number.clone()) {
            return Ok(number);
        }
    }
    Err(EngineError::Conflict(
        "could not allocate a unique bill number".to_string(),
    ))
}

/// Converts a session's orders into bills and records their payment.
pub struct BillSettlementEngine<R> {
    ctx: Arc<EngineContext<R>>,
}

impl<R> Clone for BillSettlementEngine<R> {
    fn clone(&self) -> Self {
        Self {
            ctx: Arc::clone(&self.ctx),
        }
    }
}

impl<R: Repository> BillSettlementEngine<R> {
    pub(crate) fn new(ctx: Arc<EngineContext<R>>) -> Self {
        Self { ctx }
    }

    /// Generates bills for a session under a split policy.
    ///
    /// Idempotent: customers or lines already settled are returned in
    /// `existing` and nothing new is created for them.
    #[tracing::instrument(skip(self, policy), fields(%session_id, policy = policy.name()))]
    pub async fn generate_bills(
        &self,
        session_id: SessionId,
        policy: SplitPolicy,
    ) -> Result<SettlementOutcome> {
        let started = Instant::now();
        let mut locked = self.ctx.lock(session_id, "generate_bills").await?;
        let session = locked.tx.session().clone();
        ensure_open(&session)?;

        let customers = locked.tx.customers().await?;
        let orders = locked.tx.orders().await?;
        let mut bills = locked.tx.bills().await?;
        let mut bill_items = locked.tx.bill_items().await?;

        let plan = {
            let active: Vec<&Bill> = bills.iter().filter(|b| b.is_active()).collect();
            ensure_compatible(&active, &policy)?;
            match &policy {
                SplitPolicy::Individual => plan_individual(&customers, &orders, &active),
                SplitPolicy::Combined => plan_combined(&customers, &orders, &active)?,
                SplitPolicy::Partial { customer_ids } => {
                    plan_partial(customer_ids, &customers, &orders, &active)?
                }
                SplitPolicy::ItemLevel { assignments } => plan_item_level(
                    assignments,
                    &customers,
                    &orders,
                    &active,
                    &bill_items,
                    self.ctx.config.epsilon,
                )?,
            }
        };

        let now = Utc::now();
        let mut taken: HashSet<String> = bills.iter().map(|b| b.bill_number.clone()).collect();
        let mut created = Vec::with_capacity(plan.drafts.len());

        for draft in plan.drafts {
            let number = issue_number(session.table_number, now, &mut taken)?;
            let tip = draft.subtotal.percentage_bps(self.ctx.config.tip_bps);
            let bill = Bill::issue(
                number,
                session.id,
                draft.customer_id,
                draft.covered,
                policy.bill_type(),
                draft.subtotal,
                tip,
                now,
            );
            let items: Vec<BillItem> = draft
                .shares
                .iter()
                .map(|s| BillItem {
                    bill_id: bill.id,
                    order_id: s.order_id,
                    line_index: s.line_index,
                    customer_id: s.customer_id,
                    amount: s.amount,
                })
                .collect();

            locked.tx.insert_bill(bill.clone(), items.clone()).await?;
            tracing::debug!(bill_id = %bill.id, bill_number = %bill.bill_number, total = %bill.total, "bill issued");
            bill_items.extend(items);
            bills.push(bill.clone());
            created.push(bill);
        }

        sync_payment_status(&mut locked.tx, &customers, &bills).await?;

        let reconciliation = Reconciliation::compute(
            session.id,
            &customers,
            &orders,
            &bills,
            &bill_items,
            self.ctx.config.epsilon,
        );
        if let Some(warning) = &reconciliation.warning {
            metrics::counter!("reconciliation_warnings_total").increment(1);
            tracing::warn!(
                %session_id,
                expected = %warning.expected,
                billed = %warning.billed,
                difference = %warning.difference,
                "billed subtotal does not match session total"
            );
        }

        let events = created
            .iter()
            .map(|b| DomainEvent::bill_generated(session.restaurant_id, b.clone()))
            .collect();
        self.ctx.commit(locked, events).await?;

        metrics::counter!("bills_generated_total", "policy" => policy.name())
            .increment(created.len() as u64);
        metrics::histogram!("settlement_duration_seconds")
            .record(started.elapsed().as_secs_f64());
        tracing::info!(
            created = created.len(),
            existing = plan.existing.len(),
            "bills generated"
        );

        Ok(SettlementOutcome {
            created,
            existing: plan.existing,
            reconciliation,
        })
    }

    /// Captures payment for a pending bill and marks it paid.
    ///
    /// Paying an already paid bill returns it unchanged; a cancelled bill is
    /// a conflict. The session lock is held across the capture call so a bill
    /// is never captured twice.
    #[tracing::instrument(skip(self, payment_method), fields(%bill_id))]
    pub async fn mark_bill_paid(&self, bill_id: BillId, payment_method: &str) -> Result<Bill> {
        let method = payment_method.trim();
        if method.is_empty() {
            return Err(EngineError::Validation(
                "payment method must not be empty".to_string(),
            ));
        }

        let session_id = self.session_of(bill_id).await?;
        let mut locked = self.ctx.lock(session_id, "mark_bill_paid").await?;
        let customers = locked.tx.customers().await?;
        let mut bills = locked.tx.bills().await?;
        let index = bills
            .iter()
            .position(|b| b.id == bill_id)
            .ok_or_else(|| EngineError::not_found("bill", bill_id))?;

        match bills[index].status {
            BillStatus::Paid => {
                tracing::debug!("bill already paid");
                return Ok(bills[index].clone());
            }
            BillStatus::Cancelled => {
                return Err(EngineError::Conflict(format!(
                    "bill {} is cancelled",
                    bills[index].bill_number
                )));
            }
            BillStatus::Pending => {}
        }

        let amount = bills[index].total;
        match self
            .ctx
            .collaborators
            .payments
            .confirm(bill_id, amount, method)
            .await
        {
            Ok(true) => {}
            Ok(false) => {
                return Err(EngineError::ExternalService {
                    service: "payment",
                    message: "payment declined".to_string(),
                });
            }
            Err(e @ EngineError::ExternalService { .. }) => return Err(e),
            Err(e) => {
                return Err(EngineError::ExternalService {
                    service: "payment",
                    message: e.to_string(),
                });
            }
        }

        let now = Utc::now();
        let bill = &mut bills[index];
        bill.status = BillStatus::Paid;
        bill.payment_method = Some(method.to_string());
        bill.paid_at = Some(now);
        let paid = bill.clone();

        locked.tx.update_bill(paid.clone()).await?;
        sync_payment_status(&mut locked.tx, &customers, &bills).await?;
        let restaurant_id = locked.tx.session().restaurant_id;
        self.ctx
            .commit(locked, vec![DomainEvent::bill_paid(restaurant_id, paid.clone())])
            .await?;

        metrics::counter!("bills_paid_total").increment(1);
        tracing::info!(%session_id, total = %paid.total, "bill paid");
        Ok(paid)
    }

    /// Cancels a pending bill, freeing its customers or lines for re-billing.
    #[tracing::instrument(skip(self), fields(%bill_id))]
    pub async fn cancel_bill(&self, bill_id: BillId) -> Result<Bill> {
        let session_id = self.session_of(bill_id).await?;
        let mut locked = self.ctx.lock(session_id, "cancel_bill").await?;
        let customers = locked.tx.customers().await?;
        let mut bills = locked.tx.bills().await?;
        let index = bills
            .iter()
            .position(|b| b.id == bill_id)
            .ok_or_else(|| EngineError::not_found("bill", bill_id))?;

        match bills[index].status {
            BillStatus::Pending => {}
            BillStatus::Paid => {
                return Err(EngineError::Conflict(format!(
                    "bill {} is already paid",
                    bills[index].bill_number
                )));
            }
            BillStatus::Cancelled => {
                return Err(EngineError::Conflict(format!(
                    "bill {} is already cancelled",
                    bills[index].bill_number
                )));
            }
        }

        bills[index].status = BillStatus::Cancelled;
        let cancelled = bills[index].clone();

        locked.tx.update_bill(cancelled.clone()).await?;
        sync_payment_status(&mut locked.tx, &customers, &bills).await?;
        let restaurant_id = locked.tx.session().restaurant_id;
        self.ctx
            .commit(
                locked,
                vec![DomainEvent::bill_cancelled(restaurant_id, cancelled.clone())],
            )
            .await?;

        tracing::info!(%session_id, "bill cancelled");
        Ok(cancelled)
    }

    pub async fn bill(&self, bill_id: BillId) -> Result<Bill> {
        self.ctx
            .repo
            .get_bill(bill_id)
            .await?
            .ok_or_else(|| EngineError::not_found("bill", bill_id))
    }

    /// Every bill of a session, cancelled ones included.
    pub async fn bills_for_session(&self, session_id: SessionId) -> Result<Vec<Bill>> {
        if self.ctx.repo.get_session(session_id).await?.is_none() {
            return Err(EngineError::not_found("session", session_id));
        }
        Ok(self.ctx.repo.bills_for_session(session_id).await?)
    }

    async fn session_of(&self, bill_id: BillId) -> Result<SessionId> {
        Ok(self.bill(bill_id).await?.session_id)
    }
}
