//! Usage source client

use crate::client::HttpClient;
use async_trait::async_trait;
use credits_core::{
    models::{AccountType, UsageSettlementRecord},
    traits::{UsageSource, UsageStream},
    AppResult,
};
use futures::stream;
use rust_decimal::Decimal;
use serde::Serialize;
use tracing::{debug, instrument};

#[derive(Debug, Serialize)]
struct SettledAck<'a> {
    usage_ids: &'a [i64],
}

#[derive(Debug, Serialize)]
struct PartialAck {
    remaining_quantity: Decimal,
}

/// Usage source over HTTP
///
/// Routes: `GET /usage/unreported?account_type=..` (ascending by usage id),
/// `POST /usage/settled`, `POST /usage/{id}/partial`.
#[derive(Clone)]
pub struct HttpUsageSource {
    client: HttpClient,
}

impl HttpUsageSource {
    pub fn new(client: HttpClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl UsageSource for HttpUsageSource {
    #[instrument(skip(self))]
    async fn unreported_usage(&self, account_type: AccountType) -> AppResult<UsageStream> {
        let account_type = account_type.to_string();
        let records: Vec<UsageSettlementRecord> = self
            .client
            .get_json("/usage/unreported", &[("account_type", account_type.as_str())])
            .await?;
        debug!("Fetched {} unreported {} usage records", records.len(), account_type);
        Ok(Box::pin(stream::iter(records.into_iter().map(Ok))))
    }

    #[instrument(skip(self, usage_ids), fields(count = usage_ids.len()))]
    async fn ack_settled(&self, usage_ids: &[i64]) -> AppResult<()> {
        self.client
            .post("/usage/settled", &SettledAck { usage_ids })
            .await
    }

    #[instrument(skip(self))]
    async fn ack_partial(&self, usage_id: i64, remaining_quantity: Decimal) -> AppResult<()> {
        self.client
            .post(
                &format!("/usage/{}/partial", usage_id),
                &PartialAck { remaining_quantity },
            )
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;
    use rust_decimal_macros::dec;
    use serde_json::json;
    use wiremock::matchers::{body_json, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn test_unreported_usage_streams_records() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/usage/unreported"))
            .and(query_param("account_type", "INTEL"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                { "usage_id": 3, "account_id": "a", "product_id": "vm", "unreported_quantity": "2" },
                { "usage_id": 4, "account_id": "a", "product_id": "vm", "unreported_quantity": "1.5", "rate": "0.1" }
            ])))
            .mount(&server)
            .await;
        let source = HttpUsageSource::new(HttpClient::new(&server.uri(), 1_000).unwrap());

        let records: Vec<_> = source
            .unreported_usage(AccountType::Intel)
            .await
            .unwrap()
            .collect()
            .await;

        assert_eq!(records.len(), 2);
        let second = records[1].as_ref().unwrap();
        assert_eq!(second.usage_id, 4);
        assert_eq!(second.rate, Some(dec!(0.1)));
        assert!(!second.reported);
    }

    #[tokio::test]
    async fn test_acknowledgements() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/usage/settled"))
            .and(body_json(json!({ "usage_ids": [1, 2] })))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/usage/3/partial"))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;
        let source = HttpUsageSource::new(HttpClient::new(&server.uri(), 1_000).unwrap());

        source.ack_settled(&[1, 2]).await.unwrap();
        source.ack_partial(3, dec!(0.5)).await.unwrap();
    }
}
