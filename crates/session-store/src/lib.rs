//! Transactional persistence for table sessions.
//!
//! Every write to a session happens inside a [`SessionTx`] obtained from
//! [`Repository::lock_session`], which holds the session's exclusive lock
//! until it is committed or dropped.

pub mod error;
pub mod memory;
pub mod postgres;
pub mod query;
pub mod repository;

pub use error::{Result, StoreError};
pub use memory::InMemoryRepository;
pub use postgres::PostgresRepository;
pub use query::SessionQuery;
pub use repository::{Repository, SessionTx};
