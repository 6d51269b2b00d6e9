//! Payment capture trait and in-memory implementation.

use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use common::{BillId, Money};

use crate::error::EngineError;

/// Payment processor collaborator.
#[async_trait]
pub trait PaymentCapture: Send + Sync {
    /// Captures `amount` for a bill. `Ok(false)` means the payment was declined.
    async fn confirm(&self, bill_id: BillId, amount: Money, method: &str)
    -> Result<bool, EngineError>;
}

/// A capture recorded by [`InMemoryPaymentCapture`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Capture {
    pub bill_id: BillId,
    pub amount: Money,
    pub method: String,
}

#[derive(Debug, Default)]
struct InMemoryPaymentState {
    captures: Vec<Capture>,
    decline: bool,
    unavailable: bool,
}

/// In-memory payment processor for testing.
#[derive(Debug, Clone, Default)]
pub struct InMemoryPaymentCapture {
    state: Arc<Mutex<InMemoryPaymentState>>,
}

impl InMemoryPaymentCapture {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declines every following capture.
    pub fn set_decline(&self, decline: bool) {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .decline = decline;
    }

    /// Fails every following capture as if the processor were down.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .unavailable = unavailable;
    }

    /// Returns the number of successful captures.
    pub fn capture_count(&self) -> usize {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .captures
            .len()
    }

    /// Returns the successful captures for one bill.
    pub fn captures_for(&self, bill_id: BillId) -> Vec<Capture> {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .captures
            .iter()
            .filter(|c| c.bill_id == bill_id)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl PaymentCapture for InMemoryPaymentCapture {
    async fn confirm(
        &self,
        bill_id: BillId,
        amount: Money,
        method: &str,
    ) -> Result<bool, EngineError> {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);

        if state.unavailable {
            return Err(EngineError::ExternalService {
                service: "payment",
                message: "processor unavailable".to_string(),
            });
        }
        if state.decline {
            return Ok(false);
        }

        state.captures.push(Capture {
            bill_id,
            amount,
            method: method.to_string(),
        });
        Ok(true)
    }
}
