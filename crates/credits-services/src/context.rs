//! Service context
//!
//! Wires the engine components to their stores and collaborators once at
//! startup. Handlers receive it as shared application data.

use crate::allocation::AllocationEngine;
use crate::drivers::{DriverTable, LedgerBackend};
use crate::installer::CreditInstaller;
use crate::locks::AccountLockManager;
use crate::migration::CreditMigrator;
use crate::reader::CreditReader;
use crate::reconciler::UsageReconciler;
use crate::scheduler::Scheduler;
use crate::signals::{CreditSignalScheduler, ExpirySignalSweep, UsageSignalSweep};
use credits_core::{
    config::{CreditsConfig, SchedulerConfig},
    traits::{
        AccountDirectory, BillingBackend, CreditStateLog, LedgerStore, NotificationPublisher,
        RateResolver, UsageSource,
    },
    AppResult,
};
use std::sync::Arc;
use tracing::info;

/// Stores and collaborators the services are built from
pub struct ServiceDeps {
    pub ledger: Arc<dyn LedgerStore>,
    pub state_log: Arc<dyn CreditStateLog>,
    pub directory: Arc<dyn AccountDirectory>,
    pub rates: Arc<dyn RateResolver>,
    pub publisher: Arc<dyn NotificationPublisher>,
    pub usage: Arc<dyn UsageSource>,
    /// Backend serving premium and enterprise accounts
    pub remote_billing: Arc<dyn BillingBackend>,
}

#[derive(Clone)]
pub struct ServiceContext {
    pub engine: AllocationEngine,
    pub reconciler: Arc<UsageReconciler>,
    pub signals: Arc<CreditSignalScheduler>,
    pub installer: CreditInstaller,
    pub reader: CreditReader,
    pub migrator: CreditMigrator,
    pub drivers: Arc<DriverTable>,
    pub state_log: Arc<dyn CreditStateLog>,
    pub locks: Arc<AccountLockManager>,
}

impl ServiceContext {
    pub fn new(deps: ServiceDeps, config: CreditsConfig) -> Self {
        let local: Arc<dyn BillingBackend> = Arc::new(LedgerBackend::new(deps.ledger.clone()));
        let drivers = Arc::new(DriverTable::standard(local, deps.remote_billing));
        let locks = Arc::new(AccountLockManager::new());

        Self {
            engine: AllocationEngine::new(deps.ledger.clone()),
            reconciler: Arc::new(UsageReconciler::new(
                deps.ledger,
                deps.rates,
                deps.usage,
            )),
            signals: Arc::new(CreditSignalScheduler::new(
                drivers.clone(),
                deps.state_log.clone(),
                deps.directory.clone(),
                deps.publisher,
                config.clone(),
            )),
            installer: CreditInstaller::new(drivers.clone(), deps.directory.clone(), config.clone()),
            reader: CreditReader::new(drivers.clone(), deps.directory.clone()),
            migrator: CreditMigrator::new(drivers.clone(), deps.directory, locks.clone(), config),
            drivers,
            state_log: deps.state_log,
            locks,
        }
    }

    /// Start the reconciliation and signal sweeps on `scheduler`
    pub fn spawn_sweeps(&self, scheduler: &Scheduler, config: &SchedulerConfig) -> AppResult<()> {
        scheduler.spawn(self.reconciler.clone(), config.reconciliation_interval())?;
        scheduler.spawn(
            Arc::new(UsageSignalSweep(self.signals.clone())),
            config.usage_event_interval(),
        )?;
        scheduler.spawn(
            Arc::new(ExpirySignalSweep(self.signals.clone())),
            config.expiry_event_interval(),
        )?;
        info!("Started {} periodic sweeps", scheduler.task_count());
        Ok(())
    }
}
