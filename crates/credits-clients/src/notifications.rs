//! Notification transport client

use crate::client::HttpClient;
use async_trait::async_trait;
use credits_core::{models::CreditEvent, traits::NotificationPublisher, AppError, AppResult};
use tracing::{debug, instrument};

/// Publishes credit events with `POST /events`
#[derive(Clone)]
pub struct HttpNotificationPublisher {
    client: HttpClient,
}

impl HttpNotificationPublisher {
    pub fn new(client: HttpClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl NotificationPublisher for HttpNotificationPublisher {
    #[instrument(skip(self, event), fields(account_id = %event.account_id, event = %event.event_name))]
    async fn publish(&self, event: &CreditEvent) -> AppResult<()> {
        self.client
            .post("/events", event)
            .await
            .map_err(|e| AppError::Publish(e.to_string()))?;
        debug!("Event delivered");
        Ok(())
    }
}
