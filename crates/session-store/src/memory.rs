use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use common::{BillId, OrderId, SessionId};
use domain::{Bill, BillItem, Customer, Order, TableSession};
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};

use crate::{Repository, Result, SessionQuery, SessionTx, StoreError};

#[derive(Debug, Clone)]
struct SessionRecord {
    session: TableSession,
    customers: Vec<Customer>,
    orders: Vec<Order>,
    bills: Vec<Bill>,
    bill_items: Vec<BillItem>,
}

/// In-memory repository for tests and single-process deployments.
///
/// Each session has its own async mutex standing in for a row lock. A
/// transaction works on a private copy of the session's records and writes
/// it back on commit.
type LockMap = Arc<Mutex<HashMap<SessionId, Arc<Mutex<()>>>>>;

#[derive(Clone, Default)]
pub struct InMemoryRepository {
    records: Arc<RwLock<HashMap<SessionId, SessionRecord>>>,
    locks: LockMap,
}

impl InMemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of sessions stored.
    pub async fn session_count(&self) -> usize {
        self.records.read().await.len()
    }

    /// Clears all sessions.
    pub async fn clear(&self) {
        self.records.write().await.clear();
        self.locks.lock().await.clear();
    }

    async fn session_lock(&self, session_id: SessionId) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().await;
        locks.entry(session_id).or_default().clone()
    }

    #[cfg(test)]
    async fn lock_count(&self) -> usize {
        self.locks.lock().await.len()
    }
}

/// Drops the lock of a closed session unless someone still holds or awaits it.
async fn forget_lock(locks: &LockMap, session_id: SessionId) {
    let mut locks = locks.lock().await;
    if locks
        .get(&session_id)
        .is_some_and(|lock| Arc::strong_count(lock) == 1)
    {
        locks.remove(&session_id);
    }
}

#[async_trait]
impl Repository for InMemoryRepository {
    async fn create_session(&self, session: &TableSession, customers: &[Customer]) -> Result<()> {
        let mut records = self.records.write().await;

        if records.contains_key(&session.id) {
            return Err(StoreError::Conflict(format!(
                "session {} already exists",
                session.id
            )));
        }
        let table_busy = records.values().any(|r| {
            r.session.table_id == session.table_id && !r.session.is_terminal()
        });
        if table_busy {
            return Err(StoreError::Conflict(format!(
                "table {} already has an open session",
                session.table_id
            )));
        }

        records.insert(
            session.id,
            SessionRecord {
                session: session.clone(),
                customers: customers.to_vec(),
                orders: Vec::new(),
                bills: Vec::new(),
                bill_items: Vec::new(),
            },
        );
        Ok(())
    }

    async fn lock_session(&self, session_id: SessionId) -> Result<Box<dyn SessionTx>> {
        if !self.records.read().await.contains_key(&session_id) {
            return Err(StoreError::SessionNotFound(session_id));
        }

        let guard = self.session_lock(session_id).await.lock_owned().await;

        // Read after acquiring the lock so the copy includes the previous holder's commit.
        let working = self
            .records
            .read()
            .await
            .get(&session_id)
            .cloned()
            .ok_or(StoreError::SessionNotFound(session_id))?;

        Ok(Box::new(InMemorySessionTx {
            records: Arc::clone(&self.records),
            locks: Arc::clone(&self.locks),
            working,
            guard: Some(guard),
        }))
    }

    async fn get_session(&self, session_id: SessionId) -> Result<Option<TableSession>> {
        let records = self.records.read().await;
        Ok(records.get(&session_id).map(|r| r.session.clone()))
    }

    async fn find_sessions(&self, query: SessionQuery) -> Result<Vec<TableSession>> {
        let records = self.records.read().await;
        let mut sessions: Vec<TableSession> = records
            .values()
            .filter(|r| query.matches(&r.session))
            .map(|r| r.session.clone())
            .collect();
        sessions.sort_by_key(|s| s.start_time);
        if let Some(limit) = query.limit {
            sessions.truncate(limit);
        }
        Ok(sessions)
    }

    async fn get_order(&self, order_id: OrderId) -> Result<Option<Order>> {
        let records = self.records.read().await;
        Ok(records
            .values()
            .flat_map(|r| r.orders.iter())
            .find(|o| o.id == order_id)
            .cloned())
    }

    async fn get_bill(&self, bill_id: BillId) -> Result<Option<Bill>> {
        let records = self.records.read().await;
        Ok(records
            .values()
            .flat_map(|r| r.bills.iter())
            .find(|b| b.id == bill_id)
            .cloned())
    }

    async fn customers_for_session(&self, session_id: SessionId) -> Result<Vec<Customer>> {
        let records = self.records.read().await;
        Ok(records
            .get(&session_id)
            .map(|r| r.customers.clone())
            .unwrap_or_default())
    }

    async fn orders_for_session(&self, session_id: SessionId) -> Result<Vec<Order>> {
        let records = self.records.read().await;
        Ok(records
            .get(&session_id)
            .map(|r| r.orders.clone())
            .unwrap_or_default())
    }

    async fn bills_for_session(&self, session_id: SessionId) -> Result<Vec<Bill>> {
        let records = self.records.read().await;
        Ok(records
            .get(&session_id)
            .map(|r| r.bills.clone())
            .unwrap_or_default())
    }

    async fn bill_items_for_session(&self, session_id: SessionId) -> Result<Vec<BillItem>> {
        let records = self.records.read().await;
        Ok(records
            .get(&session_id)
            .map(|r| r.bill_items.clone())
            .unwrap_or_default())
    }
}

/// Transaction over a private copy of one session's records.
struct InMemorySessionTx {
    records: Arc<RwLock<HashMap<SessionId, SessionRecord>>>,
    locks: LockMap,
    working: SessionRecord,
    /// `None` once committed.
    guard: Option<OwnedMutexGuard<()>>,
}

impl InMemorySessionTx {
    fn ensure_open(&self) -> Result<()> {
        if self.guard.is_none() {
            return Err(StoreError::TransactionClosed);
        }
        Ok(())
    }
}

fn duplicate_number(bill_number: &str) -> StoreError {
    StoreError::Conflict(format!("bill number {bill_number} already issued"))
}

#[async_trait]
impl SessionTx for InMemorySessionTx {
    fn session(&self) -> &TableSession {
        &self.working.session
    }

    async fn customers(&mut self) -> Result<Vec<Customer>> {
        self.ensure_open()?;
        Ok(self.working.customers.clone())
    }

    async fn orders(&mut self) -> Result<Vec<Order>> {
        self.ensure_open()?;
        Ok(self.working.orders.clone())
    }

    async fn bills(&mut self) -> Result<Vec<Bill>> {
        self.ensure_open()?;
        Ok(self.working.bills.clone())
    }

    async fn bill_items(&mut self) -> Result<Vec<BillItem>> {
        self.ensure_open()?;
        Ok(self.working.bill_items.clone())
    }

    async fn update_session(&mut self, session: TableSession) -> Result<()> {
        self.ensure_open()?;
        self.working.session = session;
        Ok(())
    }

    async fn insert_customer(&mut self, customer: Customer) -> Result<()> {
        self.ensure_open()?;
        self.working.customers.push(customer);
        Ok(())
    }

    async fn update_customer(&mut self, customer: Customer) -> Result<()> {
        self.ensure_open()?;
        let slot = self
            .working
            .customers
            .iter_mut()
            .find(|c| c.id == customer.id)
            .ok_or_else(|| StoreError::RecordNotFound(format!("customer {}", customer.id)))?;
        *slot = customer;
        Ok(())
    }

    async fn insert_order(&mut self, order: Order) -> Result<()> {
        self.ensure_open()?;
        self.working.orders.push(order);
        Ok(())
    }

    async fn update_order(&mut self, order: Order) -> Result<()> {
        self.ensure_open()?;
        let slot = self
            .working
            .orders
            .iter_mut()
            .find(|o| o.id == order.id)
            .ok_or_else(|| StoreError::RecordNotFound(format!("order {}", order.id)))?;
        *slot = order;
        Ok(())
    }

    async fn delete_order(&mut self, order_id: OrderId) -> Result<()> {
        self.ensure_open()?;
        let before = self.working.orders.len();
        self.working.orders.retain(|o| o.id != order_id);
        if self.working.orders.len() == before {
            return Err(StoreError::RecordNotFound(format!("order {order_id}")));
        }
        Ok(())
    }

    async fn insert_bill(&mut self, bill: Bill, items: Vec<BillItem>) -> Result<()> {
        self.ensure_open()?;
        if self
            .working
            .bills
            .iter()
            .any(|b| b.bill_number == bill.bill_number)
        {
            return Err(duplicate_number(&bill.bill_number));
        }
        {
            let records = self.records.read().await;
            let taken = records
                .values()
                .filter(|r| r.session.id != self.working.session.id)
                .flat_map(|r| r.bills.iter())
                .any(|b| b.bill_number == bill.bill_number);
            if taken {
                return Err(duplicate_number(&bill.bill_number));
            }
        }
        self.working.bills.push(bill);
        self.working.bill_items.extend(items);
        Ok(())
    }

    async fn update_bill(&mut self, bill: Bill) -> Result<()> {
        self.ensure_open()?;
        let slot = self
            .working
            .bills
            .iter_mut()
            .find(|b| b.id == bill.id)
            .ok_or_else(|| StoreError::RecordNotFound(format!("bill {}", bill.id)))?;
        *slot = bill;
        Ok(())
    }

    async fn commit(&mut self) -> Result<()> {
        self.ensure_open()?;
        let session_id = self.working.session.id;
        let mut records = self.records.write().await;

        // Another session may have issued the same number since insert_bill checked.
        for bill in &self.working.bills {
            let taken = records
                .values()
                .filter(|r| r.session.id != session_id)
                .flat_map(|r| r.bills.iter())
                .any(|b| b.bill_number == bill.bill_number);
            if taken {
                return Err(duplicate_number(&bill.bill_number));
            }
        }

        records.insert(session_id, self.working.clone());
        drop(records);
        self.guard = None;
        if self.working.session.is_terminal() {
            forget_lock(&self.locks, session_id).await;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use common::{CustomerId, MenuItemId, Money, RestaurantId, TableId};
    use domain::{BillType, LineItem, NewCustomer, NewSession, SessionStatus};

    fn new_session(table_id: TableId) -> (TableSession, Vec<Customer>) {
        let session = TableSession::open(
            NewSession {
                restaurant_id: RestaurantId::new(),
                table_id,
                party_size: 2,
                split_type: Default::default(),
                session_name: None,
            },
            5,
            Utc::now(),
        )
        .unwrap();
        let customers = NewCustomer::guests(2)
            .into_iter()
            .map(|c| Customer::seat(session.id, c).unwrap())
            .collect();
        (session, customers)
    }

    fn order(session_id: SessionId, customer_id: CustomerId) -> Order {
        Order::place(
            session_id,
            customer_id,
            vec![LineItem::new(
                MenuItemId::new(),
                "Pasta",
                1,
                Money::from_cents(1500),
            )],
            Utc::now(),
        )
        .unwrap()
    }

    fn bill(session_id: SessionId, number: &str) -> Bill {
        Bill::issue(
            number.to_string(),
            session_id,
            None,
            vec![],
            BillType::Combined,
            Money::from_cents(1500),
            Money::zero(),
            Utc::now(),
        )
    }

    #[tokio::test]
    async fn create_and_read_session() {
        let repo = InMemoryRepository::new();
        let (session, customers) = new_session(TableId::new());
        repo.create_session(&session, &customers).await.unwrap();

        let loaded = repo.get_session(session.id).await.unwrap().unwrap();
        assert_eq!(loaded, session);
        assert_eq!(repo.customers_for_session(session.id).await.unwrap().len(), 2);
        assert_eq!(repo.session_count().await, 1);
    }

    #[tokio::test]
    async fn second_open_session_on_table_conflicts() {
        let repo = InMemoryRepository::new();
        let table_id = TableId::new();
        let (first, customers) = new_session(table_id);
        repo.create_session(&first, &customers).await.unwrap();

        let (second, customers) = new_session(table_id);
        let result = repo.create_session(&second, &customers).await;
        assert!(matches!(result, Err(StoreError::Conflict(_))));
    }

    #[tokio::test]
    async fn terminal_session_frees_table() {
        let repo = InMemoryRepository::new();
        let table_id = TableId::new();
        let (first, customers) = new_session(table_id);
        repo.create_session(&first, &customers).await.unwrap();

        let mut tx = repo.lock_session(first.id).await.unwrap();
        let mut session = tx.session().clone();
        session
            .transition(SessionStatus::Cancelled, false, Utc::now())
            .unwrap();
        tx.update_session(session).await.unwrap();
        tx.commit().await.unwrap();

        let (second, customers) = new_session(table_id);
        repo.create_session(&second, &customers).await.unwrap();
    }

    #[tokio::test]
    async fn dropped_transaction_discards_writes() {
        let repo = InMemoryRepository::new();
        let (session, customers) = new_session(TableId::new());
        repo.create_session(&session, &customers).await.unwrap();

        {
            let mut tx = repo.lock_session(session.id).await.unwrap();
            tx.insert_order(order(session.id, customers[0].id))
                .await
                .unwrap();
            assert_eq!(tx.orders().await.unwrap().len(), 1);
        }

        assert!(repo.orders_for_session(session.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn commit_publishes_writes() {
        let repo = InMemoryRepository::new();
        let (session, customers) = new_session(TableId::new());
        repo.create_session(&session, &customers).await.unwrap();

        let placed = order(session.id, customers[0].id);
        let mut tx = repo.lock_session(session.id).await.unwrap();
        tx.insert_order(placed.clone()).await.unwrap();
        tx.commit().await.unwrap();

        assert_eq!(repo.get_order(placed.id).await.unwrap(), Some(placed));
        assert!(matches!(
            tx.orders().await,
            Err(StoreError::TransactionClosed)
        ));
    }

    #[tokio::test]
    async fn lock_is_exclusive_until_released() {
        let repo = InMemoryRepository::new();
        let (session, customers) = new_session(TableId::new());
        repo.create_session(&session, &customers).await.unwrap();

        let tx = repo.lock_session(session.id).await.unwrap();
        let waiting = tokio::time::timeout(
            std::time::Duration::from_millis(50),
            repo.lock_session(session.id),
        )
        .await;
        assert!(waiting.is_err());

        drop(tx);
        let again = repo.lock_session(session.id).await;
        assert!(again.is_ok());
    }

    #[tokio::test]
    async fn bill_numbers_are_unique_across_sessions() {
        let repo = InMemoryRepository::new();
        let (a, customers_a) = new_session(TableId::new());
        let (b, customers_b) = new_session(TableId::new());
        repo.create_session(&a, &customers_a).await.unwrap();
        repo.create_session(&b, &customers_b).await.unwrap();

        let mut tx = repo.lock_session(a.id).await.unwrap();
        tx.insert_bill(bill(a.id, "BILL-5-1-100"), vec![])
            .await
            .unwrap();
        tx.commit().await.unwrap();

        let mut tx = repo.lock_session(b.id).await.unwrap();
        let result = tx.insert_bill(bill(b.id, "BILL-5-1-100"), vec![]).await;
        assert!(matches!(result, Err(StoreError::Conflict(_))));
    }

    #[tokio::test]
    async fn lock_unknown_session_fails() {
        let repo = InMemoryRepository::new();
        let result = repo.lock_session(SessionId::new()).await;
        assert!(matches!(result, Err(StoreError::SessionNotFound(_))));
    }

    #[tokio::test]
    async fn update_missing_order_fails() {
        let repo = InMemoryRepository::new();
        let (session, customers) = new_session(TableId::new());
        repo.create_session(&session, &customers).await.unwrap();

        let mut tx = repo.lock_session(session.id).await.unwrap();
        let result = tx.update_order(order(session.id, customers[0].id)).await;
        assert!(matches!(result, Err(StoreError::RecordNotFound(_))));
    }

    #[tokio::test]
    async fn closing_a_session_drops_its_lock() {
        let repo = InMemoryRepository::new();
        let (session, customers) = new_session(TableId::new());
        repo.create_session(&session, &customers).await.unwrap();

        let tx = repo.lock_session(session.id).await.unwrap();
        drop(tx);
        assert_eq!(repo.lock_count().await, 1);

        let mut tx = repo.lock_session(session.id).await.unwrap();
        let mut closed = tx.session().clone();
        closed
            .transition(SessionStatus::Cancelled, false, Utc::now())
            .unwrap();
        tx.update_session(closed).await.unwrap();
        tx.commit().await.unwrap();
        assert_eq!(repo.lock_count().await, 0);

        // Still lockable afterwards, e.g. to report the closed state.
        let tx = repo.lock_session(session.id).await.unwrap();
        assert!(tx.session().is_terminal());
    }
}
