//! Credit migration on account upgrade
//!
//! Moves the unapplied standard credit of an upgraded account onto the
//! backend of its new type as one `MIGRATED` grant, then zeroes the
//! standard ledger. Runs under the account lock.

use crate::drivers::DriverTable;
use crate::locks::AccountLockManager;
use chrono::Utc;
use credits_core::{
    config::CreditsConfig,
    models::{AccountFlagsUpdate, AccountType, NewCreditGrant, UpgradeStatus, MIGRATED_CREDIT_CODE},
    traits::AccountDirectory,
    AppError, AppResult,
};
use rust_decimal::Decimal;
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, instrument, warn};

/// Result of a migration request
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum MigrationOutcome {
    /// Nothing to do for the account's upgrade status
    Skipped { upgrade_status: UpgradeStatus },
    /// Credit moved and upgrade completed
    Migrated { amount: Decimal },
}

#[derive(Clone)]
pub struct CreditMigrator {
    drivers: Arc<DriverTable>,
    directory: Arc<dyn AccountDirectory>,
    locks: Arc<AccountLockManager>,
    config: CreditsConfig,
}

impl CreditMigrator {
    pub fn new(
        drivers: Arc<DriverTable>,
        directory: Arc<dyn AccountDirectory>,
        locks: Arc<AccountLockManager>,
        config: CreditsConfig,
    ) -> Self {
        Self {
            drivers,
            directory,
            locks,
            config,
        }
    }

    /// Migrate an account's standard credit to its upgraded backend
    ///
    /// # Errors
    ///
    /// * `AppError::MigrationPendingPaymentMethod` - upgrade waits for a payment method
    /// * `AppError::MigrationFailed` - the destination install failed. If the
    ///   destination shows the credit arrived anyway, the standard ledger is
    ///   zeroed so a retry completes without moving the credit twice.
    #[instrument(skip(self))]
    pub async fn migrate(&self, account_id: &str) -> AppResult<MigrationOutcome> {
        let account = self.directory.get_account(account_id).await?;
        if let Some(outcome) = check_status(&account.id, account.upgrade_status)? {
            return Ok(outcome);
        }

        let _guard = self.locks.lock(account_id).await;

        // Another request may have completed the upgrade while we waited
        let account = self.directory.get_account(account_id).await?;
        if let Some(outcome) = check_status(&account.id, account.upgrade_status)? {
            return Ok(outcome);
        }
        if account.account_type.is_ledger_backed() {
            return Err(AppError::MigrationFailed {
                account_id: account.id,
                reason: format!("{} is not an upgraded account type", account.account_type),
            });
        }

        let source = self.drivers.backend(AccountType::Standard)?;
        let destination = self.drivers.backend(account.account_type)?;

        let amount = source.unapplied_balance(account_id).await?;
        if amount > Decimal::ZERO {
            let before = destination.unapplied_balance(account_id).await?;
            let now = Utc::now();
            let expires_at = source
                .credit_summary(account_id)
                .await?
                .last_expiration
                .filter(|at| *at > now)
                .unwrap_or_else(|| now + self.config.expiry_minimum_interval());

            let grant = NewCreditGrant {
                account_id: account_id.to_string(),
                code: MIGRATED_CREDIT_CODE.to_string(),
                amount,
                expires_at,
            };
            if let Err(e) = destination.install_credit(&grant).await {
                let after = destination.unapplied_balance(account_id).await?;
                if after - before == amount {
                    warn!(
                        "Migrated credit of {} reached {} despite error, zeroing standard ledger",
                        amount,
                        destination.name()
                    );
                    source.zero_out(account_id).await?;
                }
                return Err(AppError::MigrationFailed {
                    account_id: account_id.to_string(),
                    reason: e.to_string(),
                });
            }

            source.zero_out(account_id).await?;
            info!(
                "Moved {} credit of account {} to {}",
                amount,
                account_id,
                destination.name()
            );
        }

        self.directory
            .update_flags(
                account_id,
                &AccountFlagsUpdate::upgrade_status(UpgradeStatus::Complete),
            )
            .await?;
        info!("Upgrade of account {} complete", account_id);

        Ok(MigrationOutcome::Migrated {
            amount: amount.max(Decimal::ZERO),
        })
    }
}

/// `Some` when the upgrade status leaves nothing to migrate
fn check_status(account_id: &str, status: UpgradeStatus) -> AppResult<Option<MigrationOutcome>> {
    match status {
        UpgradeStatus::PendingCc => Err(AppError::MigrationPendingPaymentMethod(
            account_id.to_string(),
        )),
        UpgradeStatus::NotInitiated | UpgradeStatus::Complete => Ok(Some(MigrationOutcome::Skipped {
            upgrade_status: status,
        })),
        UpgradeStatus::Initiated => Ok(None),
    }
}
