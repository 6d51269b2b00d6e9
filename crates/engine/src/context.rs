//! State shared by the engine services.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use common::SessionId;
use domain::{
    Bill, Customer, DomainEvent, ModelError, PaymentStatus, SessionStatus, SessionStatusPayload,
    TableSession,
};
use session_store::{Repository, SessionTx};
use tokio::sync::OwnedMutexGuard;

use crate::broadcaster::EventBroadcaster;
use crate::config::EngineConfig;
use crate::error::{BlockedReason, EngineError, Result};
use crate::gate::SessionGate;
use crate::services::Collaborators;

pub(crate) struct EngineContext<R> {
    pub(crate) repo: Arc<R>,
    pub(crate) broadcaster: EventBroadcaster,
    pub(crate) collaborators: Collaborators,
    pub(crate) config: EngineConfig,
    gate: SessionGate,
}

/// A session held exclusively by one operation.
pub(crate) struct LockedSession {
    pub(crate) tx: Box<dyn SessionTx>,
    gate: OwnedMutexGuard<()>,
}

impl<R: Repository> EngineContext<R> {
    pub(crate) fn new(repo: Arc<R>, collaborators: Collaborators, config: EngineConfig) -> Self {
        Self {
            repo,
            broadcaster: EventBroadcaster::new(config.event_channel_capacity),
            collaborators,
            config,
            gate: SessionGate::default(),
        }
    }

    /// Acquires the session gate and the repository lock within `lock_timeout`.
    pub(crate) async fn lock(
        &self,
        session_id: SessionId,
        operation: &'static str,
    ) -> Result<LockedSession> {
        let acquire = async {
            let gate = self.gate.enter(session_id).await;
            let tx = self.repo.lock_session(session_id).await?;
            Ok::<_, EngineError>(LockedSession { tx, gate })
        };

        match tokio::time::timeout(self.config.lock_timeout, acquire).await {
            Ok(locked) => locked,
            Err(_) => {
                metrics::counter!("session_lock_timeouts_total", "operation" => operation)
                    .increment(1);
                tracing::warn!(%session_id, operation, "session lock timed out");
                Err(EngineError::Timeout { operation })
            }
        }
    }

    /// Inserts a new session and publishes its opening event under the
    /// session gate, so nothing else on the session can publish first.
    pub(crate) async fn open(
        &self,
        session: &TableSession,
        customers: &[Customer],
        event: DomainEvent,
    ) -> Result<()> {
        let _gate = self.gate.enter(session.id).await;
        self.repo.create_session(session, customers).await?;
        self.broadcaster.publish(event);
        Ok(())
    }

    /// Commits the transaction, then publishes `events` in order before
    /// letting the next operation on the session in.
    pub(crate) async fn commit(
        &self,
        mut locked: LockedSession,
        events: Vec<DomainEvent>,
    ) -> Result<()> {
        locked.tx.commit().await?;
        for event in events {
            self.broadcaster.publish(event);
        }
        if locked.tx.session().is_terminal() {
            let session_id = locked.tx.session().id;
            drop(locked.tx);
            self.gate.forget(session_id);
        }
        drop(locked.gate);
        Ok(())
    }

    /// Clears the table's occupancy flag. Failures are logged only.
    pub(crate) async fn release_table(&self, session: &TableSession) {
        if let Err(e) = self
            .collaborators
            .tables
            .set_occupied(session.table_id, false)
            .await
        {
            tracing::warn!(
                session_id = %session.id,
                table_id = %session.table_id,
                error = %e,
                "failed to release table"
            );
        }
    }
}

/// Moves the locked session to `to`, staging the write and returning the
/// status-change event.
pub(crate) async fn transition_session(
    tx: &mut Box<dyn SessionTx>,
    to: SessionStatus,
    force: bool,
    now: DateTime<Utc>,
) -> Result<DomainEvent> {
    let mut session = tx.session().clone();
    let session_id = session.id;
    let from = session.transition(to, force, now).map_err(|e| match e {
        ModelError::InvalidSessionTransition { from, to } => {
            EngineError::state(session_id, BlockedReason::IllegalTransition { from, to })
        }
        other => other.into(),
    })?;
    tx.update_session(session.clone()).await?;
    metrics::counter!("session_transitions_total", "to" => to.as_str()).increment(1);
    tracing::info!(session_id = %session.id, %from, %to, "session status changed");

    Ok(DomainEvent::SessionStatusChanged(SessionStatusPayload {
        restaurant_id: session.restaurant_id,
        session_id: session.id,
        table_id: session.table_id,
        from: Some(from),
        to,
        changed_at: now,
    }))
}

/// Rejects writes to a session that already ended.
pub(crate) fn ensure_open(session: &TableSession) -> Result<()> {
    if session.is_terminal() {
        return Err(EngineError::state(
            session.id,
            BlockedReason::SessionClosed {
                status: session.status,
            },
        ));
    }
    Ok(())
}

/// Re-derives payment status for every customer and stages the changes.
pub(crate) async fn sync_payment_status(
    tx: &mut Box<dyn SessionTx>,
    customers: &[Customer],
    bills: &[Bill],
) -> Result<()> {
    for customer in customers {
        let status: PaymentStatus = customer.derive_payment_status(bills);
        if status != customer.payment_status {
            let mut updated = customer.clone();
            updated.payment_status = status;
            tx.update_customer(updated).await?;
        }
    }
    Ok(())
}
