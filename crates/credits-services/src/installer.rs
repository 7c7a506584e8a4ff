//! Credit installation
//!
//! Validates a new grant and installs it through the backend serving the
//! account's type. Installing credit restores paid services when they had
//! been cut off.

use crate::drivers::DriverTable;
use chrono::{DateTime, Utc};
use credits_core::{
    config::CreditsConfig,
    models::{AccountFlagsUpdate, NewCreditGrant},
    traits::AccountDirectory,
    AppError, AppResult,
};
use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::{info, instrument};

#[derive(Clone)]
pub struct CreditInstaller {
    drivers: Arc<DriverTable>,
    directory: Arc<dyn AccountDirectory>,
    config: CreditsConfig,
}

impl CreditInstaller {
    pub fn new(
        drivers: Arc<DriverTable>,
        directory: Arc<dyn AccountDirectory>,
        config: CreditsConfig,
    ) -> Self {
        Self {
            drivers,
            directory,
            config,
        }
    }

    /// Install a credit grant for an account
    ///
    /// # Returns
    ///
    /// The grant as installed, with the expiry possibly extended
    ///
    /// # Errors
    ///
    /// * `AppError::MissingField` - empty account id or code
    /// * `AppError::InvalidAmount` - amount not positive
    /// * `AppError::Validation` - expiry not in the future
    /// * `AppError::AccountNotFound` / `AppError::DriverNotFound` - unknown account or type
    #[instrument(skip(self, grant), fields(account_id = %grant.account_id))]
    pub async fn install(&self, grant: NewCreditGrant) -> AppResult<NewCreditGrant> {
        let now = Utc::now();
        validate(&grant, now)?;

        let account = self.directory.get_account(&grant.account_id).await?;
        let mut grant = grant;
        if account.account_type.extends_credit_expiry() {
            let minimum = now + self.config.expiry_minimum_interval();
            if grant.expires_at < minimum {
                info!(
                    "Extending expiry of {} credit from {} to {}",
                    account.account_type, grant.expires_at, minimum
                );
                grant.expires_at = minimum;
            }
        }

        let backend = self.drivers.backend(account.account_type)?;
        backend.install_credit(&grant).await?;
        info!(
            "Installed {} credit {} of {} via {}",
            account.account_type,
            grant.code,
            grant.amount,
            backend.name()
        );

        if !account.paid_services_allowed {
            self.directory
                .update_flags(&account.id, &AccountFlagsUpdate::restored())
                .await?;
            info!("Restored paid services for account {}", account.id);
        }

        Ok(grant)
    }
}

fn validate(grant: &NewCreditGrant, now: DateTime<Utc>) -> AppResult<()> {
    if grant.account_id.trim().is_empty() {
        return Err(AppError::MissingField("account_id".to_string()));
    }
    if grant.code.trim().is_empty() {
        return Err(AppError::MissingField("code".to_string()));
    }
    if grant.amount <= Decimal::ZERO {
        return Err(AppError::InvalidAmount(format!(
            "credit amount must be positive, got {}",
            grant.amount
        )));
    }
    if grant.expires_at <= now {
        return Err(AppError::Validation(format!(
            "credit expiry {} is not in the future",
            grant.expires_at
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drivers::LedgerBackend;
    use crate::testing::{grant, ledger_with, MockDirectory, ACCOUNT};
    use chrono::Duration;
    use credits_core::models::{AccountType, CloudAccount};
    use credits_core::traits::{BillingBackend, LedgerStore};
    use credits_db::InMemoryLedger;
    use rust_decimal_macros::dec;

    struct Fixture {
        installer: CreditInstaller,
        local: Arc<InMemoryLedger>,
        remote: Arc<InMemoryLedger>,
        directory: Arc<MockDirectory>,
    }

    fn fixture(accounts: Vec<CloudAccount>) -> Fixture {
        let local = ledger_with(&[grant(1, dec!(-20), 0)]);
        let remote = ledger_with(&[]);
        let drivers = Arc::new(DriverTable::standard(
            Arc::new(LedgerBackend::new(local.clone())),
            Arc::new(LedgerBackend::new(remote.clone())),
        ));
        let directory = MockDirectory::with(accounts);
        Fixture {
            installer: CreditInstaller::new(drivers, directory.clone(), CreditsConfig::default()),
            local,
            remote,
            directory,
        }
    }

    fn new_grant(account_id: &str, amount: Decimal, days: i64) -> NewCreditGrant {
        NewCreditGrant {
            account_id: account_id.to_string(),
            code: "PROMO".to_string(),
            amount,
            expires_at: Utc::now() + Duration::days(days),
        }
    }

    #[tokio::test]
    async fn test_install_rebalances_and_restores_services() {
        let mut account = CloudAccount::new(ACCOUNT, AccountType::Standard);
        account.low_credits = true;
        account.paid_services_allowed = false;
        let f = fixture(vec![account]);

        f.installer.install(new_grant(ACCOUNT, dec!(50), 10)).await.unwrap();

        assert_eq!(f.local.grant(1).unwrap().remaining_amount, dec!(0));
        let backend = LedgerBackend::new(f.local.clone());
        assert_eq!(backend.unapplied_balance(ACCOUNT).await.unwrap(), dec!(30));
        let account = f.directory.account(ACCOUNT);
        assert!(account.paid_services_allowed);
        assert!(!account.low_credits);
    }

    #[tokio::test]
    async fn test_premium_expiry_is_extended() {
        let f = fixture(vec![CloudAccount::new("acct-p", AccountType::Premium)]);

        let installed = f.installer.install(new_grant("acct-p", dec!(25), 2)).await.unwrap();

        assert!(installed.expires_at >= Utc::now() + Duration::days(29));
        let grants = f.remote.grants_for_account("acct-p").await.unwrap();
        assert_eq!(grants.len(), 1);
        assert_eq!(grants[0].expires_at, installed.expires_at);
        assert!(f.directory.updates.lock().is_empty());
    }

    #[tokio::test]
    async fn test_install_validation() {
        let f = fixture(vec![CloudAccount::new(ACCOUNT, AccountType::Standard)]);

        let zero = f.installer.install(new_grant(ACCOUNT, dec!(0), 10)).await;
        assert!(matches!(zero, Err(AppError::InvalidAmount(_))));

        let past = f.installer.install(new_grant(ACCOUNT, dec!(5), -1)).await;
        assert!(matches!(past, Err(AppError::Validation(_))));

        let mut nameless = new_grant(ACCOUNT, dec!(5), 10);
        nameless.code = " ".to_string();
        let nameless = f.installer.install(nameless).await;
        assert!(matches!(nameless, Err(AppError::MissingField(_))));

        let unknown = f.installer.install(new_grant("nobody", dec!(5), 10)).await;
        assert!(matches!(unknown, Err(AppError::AccountNotFound(_))));

        assert_eq!(f.local.grants_for_account(ACCOUNT).await.unwrap().len(), 1);
    }
}
