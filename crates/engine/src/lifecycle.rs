//! Session lifecycle: opening, seating, status changes and the idle sweep.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use common::{CustomerId, SessionId};
use domain::{
    Customer, DomainEvent, NewCustomer, NewSession, SessionStatus, SessionStatusPayload,
    SessionSummary, TableSession, WaiterRequestedPayload, validate_customer_batch,
};
use session_store::{Repository, SessionQuery};

use crate::context::{EngineContext, ensure_open, transition_session};
use crate::error::{BlockedReason, EngineError, Result};

/// Opens, advances and closes table sessions.
pub struct SessionLifecycleManager<R> {
    ctx: Arc<EngineContext<R>>,
}

impl<R> Clone for SessionLifecycleManager<R> {
    fn clone(&self) -> Self {
        Self {
            ctx: Arc::clone(&self.ctx),
        }
    }
}

impl<R: Repository> SessionLifecycleManager<R> {
    pub(crate) fn new(ctx: Arc<EngineContext<R>>) -> Self {
        Self { ctx }
    }

    /// Opens a session in `waiting` and seats its diners.
    ///
    /// Without an explicit diner list the party is seated as numbered
    /// guests. A table can hold only one open session.
    #[tracing::instrument(skip(self, input, customers), fields(table_id = %input.table_id))]
    pub async fn start_session(
        &self,
        input: NewSession,
        customers: Vec<NewCustomer>,
    ) -> Result<SessionSummary> {
        let table_number = self
            .ctx
            .collaborators
            .tables
            .table_number(input.table_id)
            .await?;
        let now = Utc::now();
        let session = TableSession::open(input, table_number, now)?;

        let customers = if customers.is_empty() {
            NewCustomer::guests(session.party_size)
        } else {
            validate_customer_batch(&customers)?;
            customers
        };
        let seated = customers
            .into_iter()
            .map(|c| Customer::seat(session.id, c))
            .collect::<std::result::Result<Vec<_>, _>>()?;

        let opened = DomainEvent::SessionStatusChanged(SessionStatusPayload {
            restaurant_id: session.restaurant_id,
            session_id: session.id,
            table_id: session.table_id,
            from: None,
            to: SessionStatus::Waiting,
            changed_at: now,
        });
        self.ctx.open(&session, &seated, opened).await?;

        if let Err(e) = self
            .ctx
            .collaborators
            .tables
            .set_occupied(session.table_id, true)
            .await
        {
            tracing::warn!(session_id = %session.id, error = %e, "failed to mark table occupied");
        }

        metrics::counter!("sessions_started_total").increment(1);
        tracing::info!(session_id = %session.id, table_number, customers = seated.len(), "session started");

        Ok(SessionSummary::build(session, seated, &[], &[]))
    }

    /// Seats one more diner in an open session.
    #[tracing::instrument(skip(self, input), fields(%session_id))]
    pub async fn add_customer(&self, session_id: SessionId, input: NewCustomer) -> Result<Customer> {
        let mut locked = self.ctx.lock(session_id, "add_customer").await?;
        let mut session = locked.tx.session().clone();
        ensure_open(&session)?;

        let customers = locked.tx.customers().await?;
        if input.is_main_customer && customers.iter().any(|c| c.is_main_customer) {
            return Err(EngineError::Validation(
                "session already has a main customer".to_string(),
            ));
        }

        let customer = Customer::seat(session_id, input)?;
        locked.tx.insert_customer(customer.clone()).await?;

        let seated = u32::try_from(customers.len() + 1).unwrap_or(u32::MAX);
        if seated > session.party_size {
            session.party_size = seated;
            locked.tx.update_session(session).await?;
        }

        self.ctx.commit(locked, Vec::new()).await?;
        tracing::debug!(customer_id = %customer.id, "customer seated");
        Ok(customer)
    }

    /// Moves the session to `requesting_bill`. Repeating the request is a no-op.
    #[tracing::instrument(skip(self), fields(%session_id))]
    pub async fn request_bill(&self, session_id: SessionId) -> Result<TableSession> {
        let mut locked = self.ctx.lock(session_id, "request_bill").await?;
        let session = locked.tx.session().clone();
        if session.status == SessionStatus::RequestingBill {
            return Ok(session);
        }
        ensure_open(&session)?;

        let event =
            transition_session(&mut locked.tx, SessionStatus::RequestingBill, false, Utc::now())
                .await?;
        let updated = locked.tx.session().clone();
        self.ctx.commit(locked, vec![event]).await?;
        Ok(updated)
    }

    /// Activates a waiting session explicitly.
    #[tracing::instrument(skip(self), fields(%session_id))]
    pub async fn activate(&self, session_id: SessionId) -> Result<TableSession> {
        let mut locked = self.ctx.lock(session_id, "activate").await?;
        if locked.tx.session().status == SessionStatus::Active {
            return Ok(locked.tx.session().clone());
        }
        let event =
            transition_session(&mut locked.tx, SessionStatus::Active, false, Utc::now()).await?;
        let updated = locked.tx.session().clone();
        self.ctx.commit(locked, vec![event]).await?;
        Ok(updated)
    }

    /// Completes the session once every bill is paid.
    ///
    /// A session without bills needs `force`; pending bills block
    /// completion even when forced.
    pub async fn complete_session(&self, session_id: SessionId, force: bool) -> Result<TableSession> {
        self.close(session_id, SessionStatus::Completed, force, "complete_session")
            .await
    }

    /// Cancels the session. Blocked while bills are pending.
    pub async fn cancel_session(&self, session_id: SessionId) -> Result<TableSession> {
        self.close(session_id, SessionStatus::Cancelled, false, "cancel_session")
            .await
    }

    /// Abandons a session that never got past `waiting`.
    pub async fn abandon_session(&self, session_id: SessionId) -> Result<TableSession> {
        self.close(session_id, SessionStatus::Abandoned, false, "abandon_session")
            .await
    }

    /// Applies a requested status through the matching lifecycle operation.
    pub async fn set_status(
        &self,
        session_id: SessionId,
        status: SessionStatus,
        force: bool,
    ) -> Result<TableSession> {
        match status {
            SessionStatus::Active => self.activate(session_id).await,
            SessionStatus::RequestingBill => self.request_bill(session_id).await,
            SessionStatus::Completed => self.complete_session(session_id, force).await,
            SessionStatus::Cancelled => self.cancel_session(session_id).await,
            SessionStatus::Abandoned => self.abandon_session(session_id).await,
            SessionStatus::Waiting => {
                let session = self.get_session(session_id).await?;
                Err(EngineError::state(
                    session_id,
                    BlockedReason::IllegalTransition {
                        from: session.status,
                        to: SessionStatus::Waiting,
                    },
                ))
            }
        }
    }

    #[tracing::instrument(skip(self), fields(%session_id, to = %to))]
    async fn close(
        &self,
        session_id: SessionId,
        to: SessionStatus,
        force: bool,
        operation: &'static str,
    ) -> Result<TableSession> {
        let mut locked = self.ctx.lock(session_id, operation).await?;
        let session = locked.tx.session().clone();
        ensure_open(&session)?;

        let bills = locked.tx.bills().await?;
        let pending = bills.iter().filter(|b| b.is_pending()).count();
        if pending > 0 {
            return Err(EngineError::state(
                session_id,
                BlockedReason::UnpaidBills { count: pending },
            ));
        }
        if to == SessionStatus::Completed && !force && !bills.iter().any(|b| b.is_active()) {
            return Err(EngineError::state(session_id, BlockedReason::NoBills));
        }

        let event = transition_session(&mut locked.tx, to, force, Utc::now()).await?;
        let closed = locked.tx.session().clone();
        self.ctx.commit(locked, vec![event]).await?;
        self.ctx.release_table(&closed).await;
        Ok(closed)
    }

    /// Abandons every `waiting` session idle for longer than the configured
    /// window. Returns the sessions that were closed.
    #[tracing::instrument(skip(self))]
    pub async fn sweep_idle_sessions(&self, now: DateTime<Utc>) -> Result<Vec<SessionId>> {
        let Some(window) = self.ctx.config.idle_window else {
            return Ok(Vec::new());
        };
        let window = chrono::Duration::from_std(window)
            .map_err(|e| EngineError::Validation(format!("idle window out of range: {e}")))?;

        let stale = self
            .ctx
            .repo
            .find_sessions(
                SessionQuery::new()
                    .status(SessionStatus::Waiting)
                    .started_before(now - window),
            )
            .await?;

        let mut abandoned = Vec::new();
        for session in stale {
            match self.abandon_session(session.id).await {
                Ok(_) => abandoned.push(session.id),
                // Activated or billed since the query ran.
                Err(EngineError::State { .. }) => {}
                Err(e) => {
                    tracing::warn!(session_id = %session.id, error = %e, "idle sweep failed");
                }
            }
        }

        if !abandoned.is_empty() {
            metrics::counter!("sessions_abandoned_total").increment(abandoned.len() as u64);
            tracing::info!(count = abandoned.len(), "abandoned idle sessions");
        }
        Ok(abandoned)
    }

    /// Broadcasts a call for service from the table.
    #[tracing::instrument(skip(self), fields(%session_id))]
    pub async fn request_waiter(
        &self,
        session_id: SessionId,
        customer_id: Option<CustomerId>,
    ) -> Result<()> {
        let mut locked = self.ctx.lock(session_id, "request_waiter").await?;
        let session = locked.tx.session().clone();
        ensure_open(&session)?;

        if let Some(customer_id) = customer_id {
            let customers = locked.tx.customers().await?;
            if !customers.iter().any(|c| c.id == customer_id) {
                return Err(EngineError::not_found("customer", customer_id));
            }
        }

        let event = DomainEvent::WaiterRequested(WaiterRequestedPayload {
            restaurant_id: session.restaurant_id,
            session_id,
            table_id: session.table_id,
            table_number: session.table_number,
            customer_id,
            requested_at: Utc::now(),
        });
        self.ctx.commit(locked, vec![event]).await
    }

    pub async fn get_session(&self, session_id: SessionId) -> Result<TableSession> {
        self.ctx
            .repo
            .get_session(session_id)
            .await?
            .ok_or_else(|| EngineError::not_found("session", session_id))
    }

    /// The session with its diners and totals derived from current records.
    pub async fn summary(&self, session_id: SessionId) -> Result<SessionSummary> {
        let session = self.get_session(session_id).await?;
        let customers = self.ctx.repo.customers_for_session(session_id).await?;
        let orders = self.ctx.repo.orders_for_session(session_id).await?;
        let bills = self.ctx.repo.bills_for_session(session_id).await?;
        Ok(SessionSummary::build(session, customers, &orders, &bills))
    }

    pub async fn list_sessions(&self, query: SessionQuery) -> Result<Vec<TableSession>> {
        Ok(self.ctx.repo.find_sessions(query).await?)
    }
}
