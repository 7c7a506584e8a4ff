//! Rate catalog client

use crate::client::HttpClient;
use async_trait::async_trait;
use credits_core::{models::AccountType, traits::RateResolver, AppError, AppResult};
use rust_decimal::Decimal;
use serde::Deserialize;
use tracing::{debug, instrument};

#[derive(Debug, Deserialize)]
struct RateEntry {
    rate: Decimal,
}

/// Rate resolver over `GET /rates?product_id=..&account_type=..`
///
/// The catalog answers with every matching rate; exactly one must match.
#[derive(Clone)]
pub struct HttpRateResolver {
    client: HttpClient,
}

impl HttpRateResolver {
    pub fn new(client: HttpClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl RateResolver for HttpRateResolver {
    #[instrument(skip(self))]
    async fn resolve_rate(&self, product_id: &str, account_type: AccountType) -> AppResult<Decimal> {
        let account_type = account_type.to_string();
        let rates: Vec<RateEntry> = self
            .client
            .get_json(
                "/rates",
                &[("product_id", product_id), ("account_type", account_type.as_str())],
            )
            .await?;

        match rates.as_slice() {
            [] => Err(AppError::RateNotFound(product_id.to_string())),
            [entry] => {
                debug!("Rate for {} ({}): {}", product_id, account_type, entry.rate);
                Ok(entry.rate)
            }
            _ => Err(AppError::AmbiguousRate(product_id.to_string())),
        }
    }
}
