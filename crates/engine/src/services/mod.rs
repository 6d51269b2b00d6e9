//! External collaborators consumed by the engine.

pub mod menu;
pub mod payment;
pub mod table;

use std::sync::Arc;

pub use menu::{InMemoryMenu, MenuItem, MenuLookup};
pub use payment::{InMemoryPaymentCapture, PaymentCapture};
pub use table::{InMemoryTableService, TableService};

/// The collaborator set handed to the engine.
#[derive(Clone)]
pub struct Collaborators {
    pub tables: Arc<dyn TableService>,
    pub payments: Arc<dyn PaymentCapture>,
    pub menu: Arc<dyn MenuLookup>,
}

impl Collaborators {
    pub fn new(
        tables: Arc<dyn TableService>,
        payments: Arc<dyn PaymentCapture>,
        menu: Arc<dyn MenuLookup>,
    ) -> Self {
        Self {
            tables,
            payments,
            menu,
        }
    }

    /// In-memory collaborators with an empty menu.
    pub fn in_memory() -> Self {
        Self::new(
            Arc::new(InMemoryTableService::new()),
            Arc::new(InMemoryPaymentCapture::new()),
            Arc::new(InMemoryMenu::new()),
        )
    }
}
