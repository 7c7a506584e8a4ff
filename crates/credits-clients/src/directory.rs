//! Account directory client

use crate::client::{account_not_found, HttpClient};
use async_trait::async_trait;
use credits_core::{
    models::{AccountFlagsUpdate, CloudAccount},
    traits::AccountDirectory,
    AppResult,
};
use serde::Deserialize;
use tracing::{debug, instrument};

#[derive(Debug, Deserialize)]
struct PaymentMethodStatus {
    has_payment_method: bool,
}

/// Account directory over HTTP
///
/// Routes: `GET /accounts/{id}`, `GET /accounts?has_credits=true`,
/// `POST /accounts/{id}/flags`, `GET /accounts/{id}/payment-method`.
#[derive(Clone)]
pub struct HttpAccountDirectory {
    client: HttpClient,
}

impl HttpAccountDirectory {
    pub fn new(client: HttpClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl AccountDirectory for HttpAccountDirectory {
    #[instrument(skip(self))]
    async fn get_account(&self, account_id: &str) -> AppResult<CloudAccount> {
        self.client
            .get_json(&format!("/accounts/{}", account_id), &[])
            .await
            .map_err(account_not_found(account_id))
    }

    #[instrument(skip(self))]
    async fn accounts_with_credits(&self) -> AppResult<Vec<CloudAccount>> {
        let accounts: Vec<CloudAccount> = self
            .client
            .get_json("/accounts", &[("has_credits", "true")])
            .await?;
        debug!("Directory returned {} accounts with credits", accounts.len());
        Ok(accounts)
    }

    #[instrument(skip(self, update))]
    async fn update_flags(&self, account_id: &str, update: &AccountFlagsUpdate) -> AppResult<()> {
        self.client
            .post(&format!("/accounts/{}/flags", account_id), update)
            .await
            .map_err(account_not_found(account_id))
    }

    #[instrument(skip(self))]
    async fn has_payment_method(&self, account_id: &str) -> AppResult<bool> {
        let status: PaymentMethodStatus = self
            .client
            .get_json(&format!("/accounts/{}/payment-method", account_id), &[])
            .await
            .map_err(account_not_found(account_id))?;
        Ok(status.has_payment_method)
    }
}
