//! Cloud credits storage layer
//!
//! This crate provides the ledger storage behind the credits engine:
//!
//! - Connection pool management and embedded migrations with sqlx
//! - PostgreSQL repositories for credit grants, settled usage and the
//!   credit state log
//! - In-memory stores with the same transactional behaviour

pub mod memory;
pub mod pool;
pub mod repositories;

pub use memory::{InMemoryLedger, InMemoryStateLog};
pub use pool::{create_pool, run_migrations};
pub use repositories::*;

// Re-export commonly used types
pub use credits_core::{AppError, AppResult};
pub use sqlx::PgPool;
