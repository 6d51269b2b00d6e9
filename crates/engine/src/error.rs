//! Engine error types.

use common::SessionId;
use domain::{ModelError, SessionStatus};
use session_store::StoreError;
use thiserror::Error;

/// Why a session refused a lifecycle change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BlockedReason {
    /// Non-cancelled bills are still pending.
    UnpaidBills { count: usize },
    /// Completion needs at least one bill unless forced.
    NoBills,
    /// The state machine has no such edge.
    IllegalTransition {
        from: SessionStatus,
        to: SessionStatus,
    },
    /// The session already ended.
    SessionClosed { status: SessionStatus },
}

impl std::fmt::Display for BlockedReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BlockedReason::UnpaidBills { count } => write!(f, "{count} unpaid bill(s)"),
            BlockedReason::NoBills => write!(f, "no bills exist; force completion to override"),
            BlockedReason::IllegalTransition { from, to } => {
                write!(f, "cannot move from {from} to {to}")
            }
            BlockedReason::SessionClosed { status } => write!(f, "session is {status}"),
        }
    }
}

/// Errors returned by engine operations.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Malformed input. Nothing was written.
    #[error("Validation failed: {0}")]
    Validation(String),

    /// A session, customer, order or bill does not exist.
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    /// A precondition no longer holds; refetch before retrying.
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Illegal lifecycle change.
    #[error("Session {session_id} cannot change state: {reason}")]
    State {
        session_id: SessionId,
        reason: BlockedReason,
    },

    /// A collaborator failed or declined.
    #[error("{service} service error: {message}")]
    ExternalService {
        service: &'static str,
        message: String,
    },

    /// The session lock was not acquired in time. Nothing was written.
    #[error("Timed out waiting for session lock during {operation}")]
    Timeout { operation: &'static str },

    /// Storage failure.
    #[error("Store error: {0}")]
    Store(StoreError),
}

impl EngineError {
    pub fn not_found(entity: &'static str, id: impl std::fmt::Display) -> Self {
        EngineError::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    pub fn state(session_id: SessionId, reason: BlockedReason) -> Self {
        EngineError::State { session_id, reason }
    }

    /// Whether the caller may retry the same request unchanged.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            EngineError::Timeout { .. } | EngineError::ExternalService { .. }
        )
    }
}

impl From<StoreError> for EngineError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::SessionNotFound(id) => EngineError::not_found("session", id),
            StoreError::RecordNotFound(what) => EngineError::NotFound {
                entity: "record",
                id: what,
            },
            StoreError::Conflict(message) => EngineError::Conflict(message),
            other => EngineError::Store(other),
        }
    }
}

impl From<ModelError> for EngineError {
    fn from(err: ModelError) -> Self {
        match err {
            ModelError::ItemsLocked { .. } | ModelError::InvalidOrderTransition { .. } => {
                EngineError::Conflict(err.to_string())
            }
            _ => EngineError::Validation(err.to_string()),
        }
    }
}

/// Convenience type alias for engine results.
pub type Result<T> = std::result::Result<T, EngineError>;
