//! View cache error types.

use thiserror::Error;

/// Errors raised while feeding or reading the view cache.
#[derive(Debug, Clone, Error)]
pub enum ProjectionError {
    /// The snapshot source could not serve a view.
    #[error("Snapshot fetch failed for {tag}: {message}")]
    Source { tag: String, message: String },

    /// The event feed failed or disconnected.
    #[error("Event feed error: {0}")]
    Feed(String),

    /// The feed dropped events that this subscriber never saw.
    #[error("Subscriber lagged behind by {missed} events")]
    Lagged { missed: u64 },

    /// The subscription was disposed.
    #[error("Subscription disposed")]
    Disposed,
}

/// Result type for view cache operations.
pub type Result<T> = std::result::Result<T, ProjectionError>;
