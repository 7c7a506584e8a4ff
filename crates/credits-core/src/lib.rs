//! Cloud credits core library
//!
//! Foundational types shared by every crate of the credits engine:
//!
//! - Domain models (grants, usage records, accounts, credit signals)
//! - Pure ledger planning (settlement, rebalance, usage coverage)
//! - Traits for stores and external collaborators
//! - Unified error handling with HTTP response mapping
//! - Application configuration

pub mod config;
pub mod error;
pub mod ledger;
pub mod models;
pub mod traits;

pub use config::AppConfig;
pub use error::AppError;

/// Result type alias using AppError
pub type AppResult<T> = Result<T, AppError>;
