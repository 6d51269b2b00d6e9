use common::SessionId;
use domain::ModelError;
use thiserror::Error;

/// Errors that can occur when interacting with the session store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The session was not found in the store.
    #[error("Session not found: {0}")]
    SessionNotFound(SessionId),

    /// A record addressed inside a session transaction does not exist.
    #[error("Record not found: {0}")]
    RecordNotFound(String),

    /// The transaction was already committed.
    #[error("Transaction already finished")]
    TransactionClosed,

    /// A uniqueness rule was violated (open session per table, bill number).
    #[error("Conflict: {0}")]
    Conflict(String),

    /// A stored row could not be mapped back to a domain record.
    #[error("Corrupt record: {0}")]
    Corrupt(String),

    /// A database error occurred.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A database migration error occurred.
    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// A serialization/deserialization error occurred.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl From<ModelError> for StoreError {
    fn from(err: ModelError) -> Self {
        StoreError::Corrupt(err.to_string())
    }
}

/// Result type for session store operations.
pub type Result<T> = std::result::Result<T, StoreError>;
