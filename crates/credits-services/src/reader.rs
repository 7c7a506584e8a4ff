//! Credit reads through the account's billing backend

use crate::drivers::DriverTable;
use credits_core::{
    models::{AccountCreditSummary, AccountType, CreditGrant},
    traits::AccountDirectory,
    AppResult,
};
use rust_decimal::Decimal;
use serde::Serialize;
use std::sync::Arc;
use tracing::instrument;

/// Credit view of one account
#[derive(Debug, Clone, Serialize)]
pub struct AccountCredits {
    pub account_id: String,
    pub account_type: AccountType,
    pub summary: AccountCreditSummary,
    /// Individual grants, only when history was requested
    #[serde(skip_serializing_if = "Option::is_none")]
    pub grants: Option<Vec<CreditGrant>>,
}

#[derive(Clone)]
pub struct CreditReader {
    drivers: Arc<DriverTable>,
    directory: Arc<dyn AccountDirectory>,
}

impl CreditReader {
    pub fn new(drivers: Arc<DriverTable>, directory: Arc<dyn AccountDirectory>) -> Self {
        Self { drivers, directory }
    }

    /// Summary of the account's credits, with its grants when `history` is set
    #[instrument(skip(self))]
    pub async fn credits(&self, account_id: &str, history: bool) -> AppResult<AccountCredits> {
        let account = self.directory.get_account(account_id).await?;
        let backend = self.drivers.backend(account.account_type)?;

        let summary = backend.credit_summary(account_id).await?;
        let grants = if history {
            Some(backend.grants(account_id).await?)
        } else {
            None
        };

        Ok(AccountCredits {
            account_id: account.id,
            account_type: account.account_type,
            summary,
            grants,
        })
    }

    /// Remaining credit of grants that have not expired
    #[instrument(skip(self))]
    pub async fn unapplied_balance(&self, account_id: &str) -> AppResult<Decimal> {
        let account = self.directory.get_account(account_id).await?;
        self.drivers
            .backend(account.account_type)?
            .unapplied_balance(account_id)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drivers::LedgerBackend;
    use crate::testing::{grant, ledger_with, MockDirectory, ACCOUNT};
    use chrono::{Duration, Utc};
    use credits_core::models::CloudAccount;
    use rust_decimal_macros::dec;

    fn reader() -> CreditReader {
        let mut expired = grant(2, dec!(15), 1);
        expired.expires_at = Utc::now() - Duration::days(1);
        let backend = Arc::new(LedgerBackend::new(ledger_with(&[grant(1, dec!(60), 0), expired])));
        let drivers = Arc::new(DriverTable::standard(backend.clone(), backend));
        let directory = MockDirectory::with(vec![CloudAccount::new(ACCOUNT, AccountType::Intel)]);
        CreditReader::new(drivers, directory)
    }

    #[tokio::test]
    async fn test_credits_with_and_without_history() {
        let reader = reader();

        let brief = reader.credits(ACCOUNT, false).await.unwrap();
        assert!(brief.grants.is_none());
        assert_eq!(brief.summary.total_remaining, dec!(75));
        assert_eq!(brief.summary.total_unapplied, dec!(60));

        let full = reader.credits(ACCOUNT, true).await.unwrap();
        assert_eq!(full.grants.map(|g| g.len()), Some(2));
    }

    #[tokio::test]
    async fn test_unapplied_balance_ignores_expired() {
        assert_eq!(reader().unapplied_balance(ACCOUNT).await.unwrap(), dec!(60));
    }
}
