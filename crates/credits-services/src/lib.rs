//! Business logic services for the cloud credits engine
//!
//! This crate orchestrates the credit ledger: settlement, usage
//! reconciliation, rebalancing, credit signals, installation and migration.
//!
//! # Architecture
//!
//! Services depend only on the traits of `credits-core`:
//! - Stores and collaborators are injected as `Arc<dyn Trait>`
//! - `ServiceContext` wires everything once at startup
//! - Periodic sweeps run on a `Scheduler` that owns its cancellation token
//! - All operations are instrumented with tracing
//!
//! # Services
//!
//! - `AllocationEngine` - Settles a cost against an account's grants
//! - `UsageReconciler` - Settles unreported usage exactly once
//! - `Rebalancer` - Pays off older over-drafts from new credit
//! - `CreditSignalScheduler` - Usage and expiry signals
//! - `CreditInstaller` / `CreditReader` - Credit writes and reads per backend
//! - `CreditMigrator` - Moves credit on account upgrade

pub mod allocation;
pub mod context;
pub mod drivers;
pub mod installer;
pub mod locks;
pub mod migration;
pub mod reader;
pub mod rebalancer;
pub mod reconciler;
pub mod scheduler;
pub mod signals;

#[cfg(test)]
pub(crate) mod testing;

pub use allocation::AllocationEngine;
pub use context::{ServiceContext, ServiceDeps};
pub use drivers::{DriverTable, LedgerBackend};
pub use installer::CreditInstaller;
pub use locks::AccountLockManager;
pub use migration::{CreditMigrator, MigrationOutcome};
pub use reader::{AccountCredits, CreditReader};
pub use rebalancer::Rebalancer;
pub use reconciler::{ReconciliationReport, UsageReconciler};
pub use scheduler::{PeriodicTask, Scheduler};
pub use signals::{CreditSignalScheduler, ExpirySignalSweep, UsageSignalSweep};
