//! In-process session gate.
//!
//! The repository lock is released at commit, before events go out. Holding
//! this gate from lock acquisition until publishing finishes keeps each
//! session's events in commit order.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use common::SessionId;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

#[derive(Debug, Clone, Default)]
pub(crate) struct SessionGate {
    gates: Arc<Mutex<HashMap<SessionId, Arc<AsyncMutex<()>>>>>,
}

impl SessionGate {
    /// Waits until no other operation holds the session's gate.
    pub(crate) async fn enter(&self, session_id: SessionId) -> OwnedMutexGuard<()> {
        let gate = {
            let mut gates = self.gates.lock().unwrap_or_else(PoisonError::into_inner);
            Arc::clone(gates.entry(session_id).or_default())
        };
        gate.lock_owned().await
    }

    /// Drops the gate of a session that reached a terminal state.
    ///
    /// Kept while anyone besides the caller's guard references it.
    pub(crate) fn forget(&self, session_id: SessionId) {
        let mut gates = self.gates.lock().unwrap_or_else(PoisonError::into_inner);
        if gates
            .get(&session_id)
            .is_some_and(|gate| Arc::strong_count(gate) <= 2)
        {
            gates.remove(&session_id);
        }
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.gates
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn gate_is_exclusive_per_session() {
        let gate = SessionGate::default();
        let session_id = SessionId::new();

        let held = gate.enter(session_id).await;
        let blocked = tokio::time::timeout(Duration::from_millis(20), gate.enter(session_id)).await;
        assert!(blocked.is_err());

        let other = tokio::time::timeout(Duration::from_millis(20), gate.enter(SessionId::new()))
            .await;
        assert!(other.is_ok());

        drop(held);
        let reentered = tokio::time::timeout(Duration::from_millis(20), gate.enter(session_id)).await;
        assert!(reentered.is_ok());
    }

    #[tokio::test]
    async fn forget_removes_idle_gate() {
        let gate = SessionGate::default();
        let session_id = SessionId::new();

        let guard = gate.enter(session_id).await;
        gate.forget(session_id);
        drop(guard);
        assert_eq!(gate.len(), 0);
    }
}
