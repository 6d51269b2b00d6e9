use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{BillId, CustomerId, Money, OrderId, RestaurantId, SessionId, TableId};
use domain::{Bill, BillItem, Customer, LineItem, Order, TableSession};
use sqlx::{
    PgConnection, PgExecutor, PgPool, Postgres, Row, Transaction, postgres::PgRow,
};
use uuid::Uuid;

use crate::{Repository, Result, SessionQuery, SessionTx, StoreError};

const SESSION_COLUMNS: &str = "id, restaurant_id, table_id, table_number, session_name, \
     party_size, split_type, status, start_time, end_time, bill_requested_at";

const OPEN_SESSION_CONSTRAINT: &str = "one_open_session_per_table";
const BILL_NUMBER_CONSTRAINT: &str = "bills_bill_number_key";

/// PostgreSQL-backed repository.
///
/// Session locks are `SELECT ... FOR UPDATE` row locks held by the
/// transaction returned from [`Repository::lock_session`].
#[derive(Clone)]
pub struct PostgresRepository {
    pool: PgPool,
}

impl PostgresRepository {
    /// Creates a new PostgreSQL repository.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connects a pool to `database_url`.
    pub async fn connect(database_url: &str) -> std::result::Result<Self, sqlx::Error> {
        PgPool::connect(database_url).await.map(Self::new)
    }

    /// Gets a reference to the underlying connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Runs the database migrations.
    pub async fn run_migrations(&self) -> std::result::Result<(), sqlx::migrate::MigrateError> {
        sqlx::migrate!("../../migrations").run(&self.pool).await
    }
}

fn to_u32(value: i32, field: &str) -> Result<u32> {
    u32::try_from(value).map_err(|_| StoreError::Corrupt(format!("{field} out of range: {value}")))
}

fn to_i32(value: u32, field: &str) -> Result<i32> {
    i32::try_from(value).map_err(|_| StoreError::Corrupt(format!("{field} out of range: {value}")))
}

fn parse<T>(row: &PgRow, column: &str) -> Result<T>
where
    T: std::str::FromStr<Err = domain::ModelError>,
{
    let raw: String = row.try_get(column)?;
    Ok(raw.parse()?)
}

fn row_to_session(row: PgRow) -> Result<TableSession> {
    Ok(TableSession {
        id: SessionId::from_uuid(row.try_get::<Uuid, _>("id")?),
        restaurant_id: RestaurantId::from_uuid(row.try_get::<Uuid, _>("restaurant_id")?),
        table_id: TableId::from_uuid(row.try_get::<Uuid, _>("table_id")?),
        table_number: to_u32(row.try_get("table_number")?, "table_number")?,
        session_name: row.try_get("session_name")?,
        party_size: to_u32(row.try_get("party_size")?, "party_size")?,
        split_type: parse(&row, "split_type")?,
        status: parse(&row, "status")?,
        start_time: row.try_get::<DateTime<Utc>, _>("start_time")?,
        end_time: row.try_get("end_time")?,
        bill_requested_at: row.try_get("bill_requested_at")?,
    })
}

fn row_to_customer(row: PgRow) -> Result<Customer> {
    Ok(Customer {
        id: CustomerId::from_uuid(row.try_get::<Uuid, _>("id")?),
        session_id: SessionId::from_uuid(row.try_get::<Uuid, _>("session_id")?),
        name: row.try_get("name")?,
        is_main_customer: row.try_get("is_main_customer")?,
        payment_status: parse(&row, "payment_status")?,
    })
}

fn row_to_order(row: PgRow) -> Result<Order> {
    let items: serde_json::Value = row.try_get("items")?;
    let items: Vec<LineItem> = serde_json::from_value(items)?;

    Ok(Order {
        id: OrderId::from_uuid(row.try_get::<Uuid, _>("id")?),
        session_id: SessionId::from_uuid(row.try_get::<Uuid, _>("session_id")?),
        customer_id: CustomerId::from_uuid(row.try_get::<Uuid, _>("customer_id")?),
        status: parse(&row, "status")?,
        items,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn row_to_bill(row: PgRow) -> Result<Bill> {
    let covered: Vec<Uuid> = row.try_get("covered_customers")?;

    Ok(Bill {
        id: BillId::from_uuid(row.try_get::<Uuid, _>("id")?),
        bill_number: row.try_get("bill_number")?,
        session_id: SessionId::from_uuid(row.try_get::<Uuid, _>("session_id")?),
        customer_id: row
            .try_get::<Option<Uuid>, _>("customer_id")?
            .map(CustomerId::from_uuid),
        covered_customers: covered.into_iter().map(CustomerId::from_uuid).collect(),
        bill_type: parse(&row, "bill_type")?,
        subtotal: Money::from_cents(row.try_get("subtotal")?),
        tax: Money::from_cents(row.try_get("tax")?),
        tip: Money::from_cents(row.try_get("tip")?),
        total: Money::from_cents(row.try_get("total")?),
        status: parse(&row, "status")?,
        payment_method: row.try_get("payment_method")?,
        paid_at: row.try_get("paid_at")?,
        created_at: row.try_get("created_at")?,
    })
}

fn row_to_bill_item(row: PgRow) -> Result<BillItem> {
    let line_index: i32 = row.try_get("line_index")?;

    Ok(BillItem {
        bill_id: BillId::from_uuid(row.try_get::<Uuid, _>("bill_id")?),
        order_id: OrderId::from_uuid(row.try_get::<Uuid, _>("order_id")?),
        line_index: usize::try_from(line_index)
            .map_err(|_| StoreError::Corrupt(format!("line_index out of range: {line_index}")))?,
        customer_id: CustomerId::from_uuid(row.try_get::<Uuid, _>("customer_id")?),
        amount: Money::from_cents(row.try_get("amount")?),
    })
}

/// Maps a unique violation on `constraint` to `Conflict`.
fn conflict_on(constraint: &'static str, message: String) -> impl FnOnce(sqlx::Error) -> StoreError {
    move |e| {
        if let sqlx::Error::Database(ref db_err) = e
            && db_err.constraint() == Some(constraint)
        {
            return StoreError::Conflict(message);
        }
        StoreError::Database(e)
    }
}

async fn fetch_customers<'e, E: PgExecutor<'e>>(
    executor: E,
    session_id: SessionId,
) -> Result<Vec<Customer>> {
    let rows = sqlx::query(
        r#"
        SELECT id, session_id, name, is_main_customer, payment_status
        FROM customers
        WHERE session_id = $1
        ORDER BY seq ASC
        "#,
    )
    .bind(session_id.as_uuid())
    .fetch_all(executor)
    .await?;

    rows.into_iter().map(row_to_customer).collect()
}

async fn fetch_orders<'e, E: PgExecutor<'e>>(
    executor: E,
    session_id: SessionId,
) -> Result<Vec<Order>> {
    let rows = sqlx::query(
        r#"
        SELECT id, session_id, customer_id, status, items, created_at, updated_at
        FROM orders
        WHERE session_id = $1
        ORDER BY seq ASC
        "#,
    )
    .bind(session_id.as_uuid())
    .fetch_all(executor)
    .await?;

    rows.into_iter().map(row_to_order).collect()
}

async fn fetch_bills<'e, E: PgExecutor<'e>>(
    executor: E,
    session_id: SessionId,
) -> Result<Vec<Bill>> {
    let rows = sqlx::query(
        r#"
        SELECT id, bill_number, session_id, customer_id, covered_customers, bill_type,
               subtotal, tax, tip, total, status, payment_method, paid_at, created_at
        FROM bills
        WHERE session_id = $1
        ORDER BY seq ASC
        "#,
    )
    .bind(session_id.as_uuid())
    .fetch_all(executor)
    .await?;

    rows.into_iter().map(row_to_bill).collect()
}

async fn fetch_bill_items<'e, E: PgExecutor<'e>>(
    executor: E,
    session_id: SessionId,
) -> Result<Vec<BillItem>> {
    let rows = sqlx::query(
        r#"
        SELECT bi.bill_id, bi.order_id, bi.line_index, bi.customer_id, bi.amount
        FROM bill_items bi
        JOIN bills b ON b.id = bi.bill_id
        WHERE b.session_id = $1
        ORDER BY b.seq ASC, bi.seq ASC
        "#,
    )
    .bind(session_id.as_uuid())
    .fetch_all(executor)
    .await?;

    rows.into_iter().map(row_to_bill_item).collect()
}

async fn insert_customer_row(conn: &mut PgConnection, customer: &Customer) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO customers (id, session_id, name, is_main_customer, payment_status)
        VALUES ($1, $2, $3, $4, $5)
        "#,
    )
    .bind(customer.id.as_uuid())
    .bind(customer.session_id.as_uuid())
    .bind(&customer.name)
    .bind(customer.is_main_customer)
    .bind(customer.payment_status.as_str())
    .execute(conn)
    .await?;
    Ok(())
}

#[async_trait]
impl Repository for PostgresRepository {
    async fn create_session(&self, session: &TableSession, customers: &[Customer]) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO table_sessions (id, restaurant_id, table_id, table_number, session_name,
                party_size, split_type, status, start_time, end_time, bill_requested_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            "#,
        )
        .bind(session.id.as_uuid())
        .bind(session.restaurant_id.as_uuid())
        .bind(session.table_id.as_uuid())
        .bind(to_i32(session.table_number, "table_number")?)
        .bind(&session.session_name)
        .bind(to_i32(session.party_size, "party_size")?)
        .bind(session.split_type.as_str())
        .bind(session.status.as_str())
        .bind(session.start_time)
        .bind(session.end_time)
        .bind(session.bill_requested_at)
        .execute(&mut *tx)
        .await
        .map_err(conflict_on(
            OPEN_SESSION_CONSTRAINT,
            format!("table {} already has an open session", session.table_id),
        ))?;

        for customer in customers {
            insert_customer_row(&mut *tx, customer).await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn lock_session(&self, session_id: SessionId) -> Result<Box<dyn SessionTx>> {
        let mut tx = self.pool.begin().await?;

        let row: Option<PgRow> = sqlx::query(&format!(
            "SELECT {SESSION_COLUMNS} FROM table_sessions WHERE id = $1 FOR UPDATE"
        ))
        .bind(session_id.as_uuid())
        .fetch_optional(&mut *tx)
        .await?;

        let session = match row {
            Some(row) => row_to_session(row)?,
            None => return Err(StoreError::SessionNotFound(session_id)),
        };
        tracing::trace!(%session_id, "session row locked");

        Ok(Box::new(PgSessionTx {
            tx: Some(tx),
            session,
        }))
    }

    async fn get_session(&self, session_id: SessionId) -> Result<Option<TableSession>> {
        let row: Option<PgRow> = sqlx::query(&format!(
            "SELECT {SESSION_COLUMNS} FROM table_sessions WHERE id = $1"
        ))
        .bind(session_id.as_uuid())
        .fetch_optional(&self.pool)
        .await?;

        row.map(row_to_session).transpose()
    }

    async fn find_sessions(&self, query: SessionQuery) -> Result<Vec<TableSession>> {
        let mut sql = format!("SELECT {SESSION_COLUMNS} FROM table_sessions WHERE 1=1");
        let mut param_count = 0;

        if query.restaurant_id.is_some() {
            param_count += 1;
            sql.push_str(&format!(" AND restaurant_id = ${param_count}"));
        }
        if query.table_id.is_some() {
            param_count += 1;
            sql.push_str(&format!(" AND table_id = ${param_count}"));
        }
        if query.statuses.is_some() {
            param_count += 1;
            sql.push_str(&format!(" AND status = ANY(${param_count})"));
        }
        if query.started_before.is_some() {
            param_count += 1;
            sql.push_str(&format!(" AND start_time < ${param_count}"));
        }

        sql.push_str(" ORDER BY start_time ASC");

        if query.limit.is_some() {
            param_count += 1;
            sql.push_str(&format!(" LIMIT ${param_count}"));
        }

        let mut sqlx_query = sqlx::query(&sql);

        if let Some(id) = query.restaurant_id {
            sqlx_query = sqlx_query.bind(id.as_uuid());
        }
        if let Some(id) = query.table_id {
            sqlx_query = sqlx_query.bind(id.as_uuid());
        }
        if let Some(statuses) = query.statuses {
            let names: Vec<String> = statuses.iter().map(|s| s.as_str().to_string()).collect();
            sqlx_query = sqlx_query.bind(names);
        }
        if let Some(instant) = query.started_before {
            sqlx_query = sqlx_query.bind(instant);
        }
        if let Some(limit) = query.limit {
            sqlx_query = sqlx_query.bind(limit as i64);
        }

        let rows = sqlx_query.fetch_all(&self.pool).await?;
        rows.into_iter().map(row_to_session).collect()
    }

    async fn get_order(&self, order_id: OrderId) -> Result<Option<Order>> {
        let row: Option<PgRow> = sqlx::query(
            r#"
            SELECT id, session_id, customer_id, status, items, created_at, updated_at
            FROM orders
            WHERE id = $1
            "#,
        )
        .bind(order_id.as_uuid())
        .fetch_optional(&self.pool)
        .await?;

        row.map(row_to_order).transpose()
    }

    async fn get_bill(&self, bill_id: BillId) -> Result<Option<Bill>> {
        let row: Option<PgRow> = sqlx::query(
            r#"
            SELECT id, bill_number, session_id, customer_id, covered_customers, bill_type,
                   subtotal, tax, tip, total, status, payment_method, paid_at, created_at
            FROM bills
            WHERE id = $1
            "#,
        )
        .bind(bill_id.as_uuid())
        .fetch_optional(&self.pool)
        .await?;

        row.map(row_to_bill).transpose()
    }

    async fn customers_for_session(&self, session_id: SessionId) -> Result<Vec<Customer>> {
        fetch_customers(&self.pool, session_id).await
    }

    async fn orders_for_session(&self, session_id: SessionId) -> Result<Vec<Order>> {
        fetch_orders(&self.pool, session_id).await
    }

    async fn bills_for_session(&self, session_id: SessionId) -> Result<Vec<Bill>> {
        fetch_bills(&self.pool, session_id).await
    }

    async fn bill_items_for_session(&self, session_id: SessionId) -> Result<Vec<BillItem>> {
        fetch_bill_items(&self.pool, session_id).await
    }
}

/// A database transaction holding the session row lock.
struct PgSessionTx {
    /// `None` once committed.
    tx: Option<Transaction<'static, Postgres>>,
    session: TableSession,
}

impl PgSessionTx {
    fn conn(&mut self) -> Result<&mut PgConnection> {
        self.tx.as_deref_mut().ok_or(StoreError::TransactionClosed)
    }
}

fn ensure_affected(rows: u64, what: String) -> Result<()> {
    if rows == 0 {
        return Err(StoreError::RecordNotFound(what));
    }
    Ok(())
}

#[async_trait]
impl SessionTx for PgSessionTx {
    fn session(&self) -> &TableSession {
        &self.session
    }

    async fn customers(&mut self) -> Result<Vec<Customer>> {
        let session_id = self.session.id;
        fetch_customers(self.conn()?, session_id).await
    }

    async fn orders(&mut self) -> Result<Vec<Order>> {
        let session_id = self.session.id;
        fetch_orders(self.conn()?, session_id).await
    }

    async fn bills(&mut self) -> Result<Vec<Bill>> {
        let session_id = self.session.id;
        fetch_bills(self.conn()?, session_id).await
    }

    async fn bill_items(&mut self) -> Result<Vec<BillItem>> {
        let session_id = self.session.id;
        fetch_bill_items(self.conn()?, session_id).await
    }

    async fn update_session(&mut self, session: TableSession) -> Result<()> {
        let party_size = to_i32(session.party_size, "party_size")?;
        let result = sqlx::query(
            r#"
            UPDATE table_sessions
            SET session_name = $2, party_size = $3, split_type = $4, status = $5,
                end_time = $6, bill_requested_at = $7
            WHERE id = $1
            "#,
        )
        .bind(session.id.as_uuid())
        .bind(&session.session_name)
        .bind(party_size)
        .bind(session.split_type.as_str())
        .bind(session.status.as_str())
        .bind(session.end_time)
        .bind(session.bill_requested_at)
        .execute(self.conn()?)
        .await?;

        ensure_affected(result.rows_affected(), format!("session {}", session.id))?;
        self.session = session;
        Ok(())
    }

    async fn insert_customer(&mut self, customer: Customer) -> Result<()> {
        insert_customer_row(self.conn()?, &customer).await
    }

    async fn update_customer(&mut self, customer: Customer) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE customers
            SET name = $2, is_main_customer = $3, payment_status = $4
            WHERE id = $1
            "#,
        )
        .bind(customer.id.as_uuid())
        .bind(&customer.name)
        .bind(customer.is_main_customer)
        .bind(customer.payment_status.as_str())
        .execute(self.conn()?)
        .await?;

        ensure_affected(result.rows_affected(), format!("customer {}", customer.id))
    }

    async fn insert_order(&mut self, order: Order) -> Result<()> {
        let items = serde_json::to_value(&order.items)?;
        sqlx::query(
            r#"
            INSERT INTO orders (id, session_id, customer_id, status, items, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(order.id.as_uuid())
        .bind(order.session_id.as_uuid())
        .bind(order.customer_id.as_uuid())
        .bind(order.status.as_str())
        .bind(items)
        .bind(order.created_at)
        .bind(order.updated_at)
        .execute(self.conn()?)
        .await?;
        Ok(())
    }

    async fn update_order(&mut self, order: Order) -> Result<()> {
        let items = serde_json::to_value(&order.items)?;
        let result = sqlx::query(
            r#"
            UPDATE orders
            SET status = $2, items = $3, updated_at = $4
            WHERE id = $1
            "#,
        )
        .bind(order.id.as_uuid())
        .bind(order.status.as_str())
        .bind(items)
        .bind(order.updated_at)
        .execute(self.conn()?)
        .await?;

        ensure_affected(result.rows_affected(), format!("order {}", order.id))
    }

    async fn delete_order(&mut self, order_id: OrderId) -> Result<()> {
        let result = sqlx::query("DELETE FROM orders WHERE id = $1")
            .bind(order_id.as_uuid())
            .execute(self.conn()?)
            .await?;

        ensure_affected(result.rows_affected(), format!("order {order_id}"))
    }

    async fn insert_bill(&mut self, bill: Bill, items: Vec<BillItem>) -> Result<()> {
        let covered: Vec<Uuid> = bill.covered_customers.iter().map(|c| c.as_uuid()).collect();
        let conn = self.conn()?;

        sqlx::query(
            r#"
            INSERT INTO bills (id, bill_number, session_id, customer_id, covered_customers,
                bill_type, subtotal, tax, tip, total, status, payment_method, paid_at, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
            "#,
        )
        .bind(bill.id.as_uuid())
        .bind(&bill.bill_number)
        .bind(bill.session_id.as_uuid())
        .bind(bill.customer_id.map(|c| c.as_uuid()))
        .bind(covered)
        .bind(bill.bill_type.as_str())
        .bind(bill.subtotal.cents())
        .bind(bill.tax.cents())
        .bind(bill.tip.cents())
        .bind(bill.total.cents())
        .bind(bill.status.as_str())
        .bind(&bill.payment_method)
        .bind(bill.paid_at)
        .bind(bill.created_at)
        .execute(&mut *conn)
        .await
        .map_err(conflict_on(
            BILL_NUMBER_CONSTRAINT,
            format!("bill number {} already issued", bill.bill_number),
        ))?;

        for item in items {
            let line_index = i32::try_from(item.line_index).map_err(|_| {
                StoreError::Corrupt(format!("line_index out of range: {}", item.line_index))
            })?;
            sqlx::query(
                r#"
                INSERT INTO bill_items (bill_id, order_id, line_index, customer_id, amount)
                VALUES ($1, $2, $3, $4, $5)
                "#,
            )
            .bind(item.bill_id.as_uuid())
            .bind(item.order_id.as_uuid())
            .bind(line_index)
            .bind(item.customer_id.as_uuid())
            .bind(item.amount.cents())
            .execute(&mut *conn)
            .await?;
        }
        Ok(())
    }

    async fn update_bill(&mut self, bill: Bill) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE bills
            SET status = $2, payment_method = $3, paid_at = $4, tip = $5, total = $6
            WHERE id = $1
            "#,
        )
        .bind(bill.id.as_uuid())
        .bind(bill.status.as_str())
        .bind(&bill.payment_method)
        .bind(bill.paid_at)
        .bind(bill.tip.cents())
        .bind(bill.total.cents())
        .execute(self.conn()?)
        .await?;

        ensure_affected(result.rows_affected(), format!("bill {}", bill.id))
    }

    async fn commit(&mut self) -> Result<()> {
        let tx = self.tx.take().ok_or(StoreError::TransactionClosed)?;
        tx.commit().await?;
        Ok(())
    }
}
