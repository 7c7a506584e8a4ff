//! Billing backends and the driver table
//!
//! Each account type is served by one billing backend. Standard and intel
//! accounts use the local ledger; premium and enterprise accounts use the
//! remote billing system.

use crate::rebalancer::Rebalancer;
use async_trait::async_trait;
use chrono::Utc;
use credits_core::{
    models::{AccountCreditSummary, AccountType, CreditGrant, NewCreditGrant},
    traits::{BillingBackend, LedgerStore},
    AppError, AppResult,
};
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, instrument};

/// Billing backend over the local credit ledger
pub struct LedgerBackend {
    ledger: Arc<dyn LedgerStore>,
    rebalancer: Rebalancer,
}

impl LedgerBackend {
    pub fn new(ledger: Arc<dyn LedgerStore>) -> Self {
        Self {
            rebalancer: Rebalancer::new(ledger.clone()),
            ledger,
        }
    }
}

#[async_trait]
impl BillingBackend for LedgerBackend {
    fn name(&self) -> &'static str {
        "ledger"
    }

    async fn grants(&self, account_id: &str) -> AppResult<Vec<CreditGrant>> {
        self.ledger.grants_for_account(account_id).await
    }

    async fn credit_summary(&self, account_id: &str) -> AppResult<AccountCreditSummary> {
        let grants = self.ledger.grants_for_account(account_id).await?;
        Ok(AccountCreditSummary::from_grants(&grants, Utc::now()))
    }

    async fn unapplied_balance(&self, account_id: &str) -> AppResult<Decimal> {
        self.ledger.unapplied_balance(account_id, Utc::now()).await
    }

    /// Insert the grant, then pay off older over-drafts from it
    #[instrument(skip(self, grant), fields(account_id = %grant.account_id, amount = %grant.amount))]
    async fn install_credit(&self, grant: &NewCreditGrant) -> AppResult<()> {
        let created = self.ledger.insert_grant(grant).await?;
        info!("Inserted grant {} ({})", created.id, created.code);
        self.rebalancer.rebalance(&grant.account_id).await?;
        Ok(())
    }

    async fn zero_out(&self, account_id: &str) -> AppResult<()> {
        let touched = self.ledger.zero_out(account_id).await?;
        debug!("Zeroed {} grants of account {}", touched, account_id);
        Ok(())
    }
}

/// Account type to billing backend mapping
#[derive(Default)]
pub struct DriverTable {
    backends: HashMap<AccountType, Arc<dyn BillingBackend>>,
}

impl DriverTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Local ledger for standard/intel, `remote` for premium/enterprise
    pub fn standard(ledger: Arc<dyn BillingBackend>, remote: Arc<dyn BillingBackend>) -> Self {
        let mut table = Self::new();
        for account_type in AccountType::LEDGER_BACKED {
            table.register(account_type, ledger.clone());
        }
        table.register(AccountType::Premium, remote.clone());
        table.register(AccountType::Enterprise, remote);
        table
    }

    pub fn register(&mut self, account_type: AccountType, backend: Arc<dyn BillingBackend>) {
        self.backends.insert(account_type, backend);
    }

    /// Backend serving an account type
    ///
    /// # Errors
    ///
    /// Returns `AppError::DriverNotFound` for an unmapped type
    pub fn backend(&self, account_type: AccountType) -> AppResult<Arc<dyn BillingBackend>> {
        self.backends
            .get(&account_type)
            .cloned()
            .ok_or_else(|| AppError::DriverNotFound(account_type.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{grant, ledger_with, ACCOUNT};
    use chrono::Duration;
    use rust_decimal_macros::dec;

    #[tokio::test]
    async fn test_install_rebalances_overdraft() {
        let ledger = ledger_with(&[grant(1, dec!(-20), 0)]);
        let backend = LedgerBackend::new(ledger.clone());

        backend
            .install_credit(&NewCreditGrant {
                account_id: ACCOUNT.to_string(),
                code: "WELCOME".to_string(),
                amount: dec!(50),
                expires_at: Utc::now() + Duration::days(30),
            })
            .await
            .unwrap();

        assert_eq!(ledger.grant(1).unwrap().remaining_amount, dec!(0));
        assert_eq!(backend.unapplied_balance(ACCOUNT).await.unwrap(), dec!(30));
        let summary = backend.credit_summary(ACCOUNT).await.unwrap();
        assert_eq!(summary.total_remaining, dec!(30));
    }

    #[test]
    fn test_driver_lookup() {
        let local: Arc<dyn BillingBackend> = Arc::new(LedgerBackend::new(ledger_with(&[])));
        let mut table = DriverTable::new();
        table.register(AccountType::Standard, local.clone());

        assert_eq!(table.backend(AccountType::Standard).unwrap().name(), "ledger");
        assert!(matches!(
            table.backend(AccountType::Premium),
            Err(AppError::DriverNotFound(_))
        ));

        let full = DriverTable::standard(local.clone(), local);
        assert!(full.backend(AccountType::Enterprise).is_ok());
        assert!(full.backend(AccountType::Intel).is_ok());
    }
}
