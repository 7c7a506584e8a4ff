//! Repository implementations
//!
//! Concrete PostgreSQL implementations of the storage traits defined in
//! credits-core, using sqlx.

pub mod grant_repo;
pub mod state_log_repo;

pub use grant_repo::PgLedgerStore;
pub use state_log_repo::PgCreditStateLog;
