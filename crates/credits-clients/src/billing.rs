//! Remote billing backend client
//!
//! Serves the credit operations of premium and enterprise accounts, whose
//! credits live in the remote billing system rather than the local ledger.

use crate::client::{account_not_found, HttpClient};
use async_trait::async_trait;
use credits_core::{
    models::{AccountCreditSummary, CreditGrant, NewCreditGrant},
    traits::BillingBackend,
    AppResult,
};
use rust_decimal::Decimal;
use serde::Deserialize;
use tracing::{info, instrument};

#[derive(Debug, Deserialize)]
struct Balance {
    amount: Decimal,
}

/// Billing backend over `/accounts/{id}/credits` routes
#[derive(Clone)]
pub struct RemoteBillingBackend {
    client: HttpClient,
}

impl RemoteBillingBackend {
    pub fn new(client: HttpClient) -> Self {
        Self { client }
    }

    fn credits_path(account_id: &str, suffix: &str) -> String {
        format!("/accounts/{}/credits{}", account_id, suffix)
    }
}

#[async_trait]
impl BillingBackend for RemoteBillingBackend {
    fn name(&self) -> &'static str {
        "remote-billing"
    }

    #[instrument(skip(self))]
    async fn grants(&self, account_id: &str) -> AppResult<Vec<CreditGrant>> {
        self.client
            .get_json(&Self::credits_path(account_id, ""), &[])
            .await
            .map_err(account_not_found(account_id))
    }

    #[instrument(skip(self))]
    async fn credit_summary(&self, account_id: &str) -> AppResult<AccountCreditSummary> {
        self.client
            .get_json(&Self::credits_path(account_id, "/summary"), &[])
            .await
            .map_err(account_not_found(account_id))
    }

    #[instrument(skip(self))]
    async fn unapplied_balance(&self, account_id: &str) -> AppResult<Decimal> {
        let balance: Balance = self
            .client
            .get_json(&Self::credits_path(account_id, "/unapplied"), &[])
            .await
            .map_err(account_not_found(account_id))?;
        Ok(balance.amount)
    }

    #[instrument(skip(self, grant), fields(account_id = %grant.account_id))]
    async fn install_credit(&self, grant: &NewCreditGrant) -> AppResult<()> {
        self.client
            .post(&Self::credits_path(&grant.account_id, ""), grant)
            .await
            .map_err(account_not_found(&grant.account_id))?;
        info!("Installed {} credit {} remotely", grant.amount, grant.code);
        Ok(())
    }

    #[instrument(skip(self))]
    async fn zero_out(&self, account_id: &str) -> AppResult<()> {
        self.client
            .post(&Self::credits_path(account_id, "/zero"), &serde_json::json!({}))
            .await
            .map_err(account_not_found(account_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use credits_core::AppError;
    use chrono::{Duration, Utc};
    use rust_decimal_macros::dec;
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn test_balance_and_install() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/accounts/p-1/credits/unapplied"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "amount": "12.5" })))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/accounts/p-1/credits"))
            .and(body_partial_json(json!({ "code": "MIGRATED", "amount": "12.5" })))
            .respond_with(ResponseTemplate::new(201))
            .expect(1)
            .mount(&server)
            .await;
        let backend = RemoteBillingBackend::new(HttpClient::new(&server.uri(), 1_000).unwrap());

        let amount = backend.unapplied_balance("p-1").await.unwrap();
        assert_eq!(amount, dec!(12.5));

        backend
            .install_credit(&NewCreditGrant {
                account_id: "p-1".to_string(),
                code: "MIGRATED".to_string(),
                amount,
                expires_at: Utc::now() + Duration::days(30),
            })
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_unknown_account() {
        let server = MockServer::start().await;
        let backend = RemoteBillingBackend::new(HttpClient::new(&server.uri(), 1_000).unwrap());

        let err = backend.grants("nobody").await.unwrap_err();

        assert!(matches!(err, AppError::AccountNotFound(_)));
    }
}
