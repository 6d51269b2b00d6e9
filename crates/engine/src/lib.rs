//! Table session engine.
//!
//! Ties the session store to the restaurant's collaborators:
//! - `SessionLifecycleManager` opens and closes sessions
//! - `OrderDesk` takes orders and kitchen updates
//! - `BillSettlementEngine` splits and settles bills
//! - `EventBroadcaster` fans committed changes out per restaurant
//!
//! Every session-scoped write runs under an exclusive per-session lock and
//! publishes its events only after the transaction commits.

pub mod broadcaster;
pub mod config;
mod context;
pub mod error;
mod gate;
pub mod lifecycle;
pub mod ordering;
pub mod services;
pub mod settlement;
pub mod split;

use std::sync::Arc;

pub use broadcaster::{EventBroadcaster, SessionSubscriber};
pub use config::EngineConfig;
pub use error::{BlockedReason, EngineError, Result};
pub use lifecycle::SessionLifecycleManager;
pub use ordering::{OrderDesk, OrderLineRequest};
pub use services::{
    Collaborators, InMemoryMenu, InMemoryPaymentCapture, InMemoryTableService, MenuItem,
    MenuLookup, PaymentCapture, TableService,
};
pub use settlement::{
    BillSettlementEngine, Reconciliation, ReconciliationWarning, SettlementOutcome,
};

use context::EngineContext;
use session_store::Repository;

/// Entry point bundling the engine services over one repository.
pub struct Engine<R> {
    ctx: Arc<EngineContext<R>>,
}

impl<R> Clone for Engine<R> {
    fn clone(&self) -> Self {
        Self {
            ctx: Arc::clone(&self.ctx),
        }
    }
}

impl<R: Repository> Engine<R> {
    pub fn new(repo: Arc<R>, collaborators: Collaborators, config: EngineConfig) -> Self {
        Self {
            ctx: Arc::new(EngineContext::new(repo, collaborators, config)),
        }
    }

    pub fn lifecycle(&self) -> SessionLifecycleManager<R> {
        SessionLifecycleManager::new(Arc::clone(&self.ctx))
    }

    pub fn orders(&self) -> OrderDesk<R> {
        OrderDesk::new(Arc::clone(&self.ctx))
    }

    pub fn settlement(&self) -> BillSettlementEngine<R> {
        BillSettlementEngine::new(Arc::clone(&self.ctx))
    }

    pub fn broadcaster(&self) -> &EventBroadcaster {
        &self.ctx.broadcaster
    }

    pub fn repository(&self) -> &Arc<R> {
        &self.ctx.repo
    }

    pub fn config(&self) -> &EngineConfig {
        &self.ctx.config
    }
}
