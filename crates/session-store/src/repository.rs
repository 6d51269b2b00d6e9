use async_trait::async_trait;
use common::{BillId, OrderId, SessionId};
use domain::{Bill, BillItem, Customer, Order, TableSession};

use crate::{Result, SessionQuery};

/// Core trait for session storage.
///
/// Reads outside a [`SessionTx`] see only committed state. All
/// implementations must be thread-safe (Send + Sync).
#[async_trait]
pub trait Repository: Send + Sync {
    /// Inserts a new session together with its initial customers.
    ///
    /// Fails with `Conflict` if the table already has a non-terminal session.
    async fn create_session(&self, session: &TableSession, customers: &[Customer]) -> Result<()>;

    /// Opens a transaction holding the session's exclusive lock.
    ///
    /// Waits while another transaction holds the lock. Fails with
    /// `SessionNotFound` if the session does not exist.
    async fn lock_session(&self, session_id: SessionId) -> Result<Box<dyn SessionTx>>;

    async fn get_session(&self, session_id: SessionId) -> Result<Option<TableSession>>;

    /// Sessions matching a query, oldest first.
    async fn find_sessions(&self, query: SessionQuery) -> Result<Vec<TableSession>>;

    async fn get_order(&self, order_id: OrderId) -> Result<Option<Order>>;

    async fn get_bill(&self, bill_id: BillId) -> Result<Option<Bill>>;

    /// Customers of a session in seating order.
    async fn customers_for_session(&self, session_id: SessionId) -> Result<Vec<Customer>>;

    /// Orders of a session in placement order.
    async fn orders_for_session(&self, session_id: SessionId) -> Result<Vec<Order>>;

    /// Bills of a session in creation order, cancelled ones included.
    async fn bills_for_session(&self, session_id: SessionId) -> Result<Vec<Bill>>;

    async fn bill_items_for_session(&self, session_id: SessionId) -> Result<Vec<BillItem>>;
}

/// A locked unit of work on one session.
///
/// Reads reflect writes staged earlier in the same transaction. Dropping a
/// transaction without calling [`SessionTx::commit`] discards every staged
/// write and releases the lock.
#[async_trait]
pub trait SessionTx: Send {
    /// The session as seen by this transaction.
    fn session(&self) -> &TableSession;

    async fn customers(&mut self) -> Result<Vec<Customer>>;

    async fn orders(&mut self) -> Result<Vec<Order>>;

    async fn bills(&mut self) -> Result<Vec<Bill>>;

    async fn bill_items(&mut self) -> Result<Vec<BillItem>>;

    async fn update_session(&mut self, session: TableSession) -> Result<()>;

    async fn insert_customer(&mut self, customer: Customer) -> Result<()>;

    async fn update_customer(&mut self, customer: Customer) -> Result<()>;

    async fn insert_order(&mut self, order: Order) -> Result<()>;

    async fn update_order(&mut self, order: Order) -> Result<()>;

    async fn delete_order(&mut self, order_id: OrderId) -> Result<()>;

    /// Inserts a bill and its item shares. Fails with `Conflict` on a
    /// duplicate bill number.
    async fn insert_bill(&mut self, bill: Bill, items: Vec<BillItem>) -> Result<()>;

    async fn update_bill(&mut self, bill: Bill) -> Result<()>;

    /// Makes every staged write visible atomically and releases the lock.
    ///
    /// A transaction cannot be used after commit.
    async fn commit(&mut self) -> Result<()>;
}
