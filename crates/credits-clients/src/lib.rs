//! HTTP clients for the cloud credits collaborators
//!
//! Each client implements one `credits-core` trait over JSON/HTTP:
//!
//! - `HttpAccountDirectory` - account lookup, flags and payment methods
//! - `HttpRateResolver` - product rates per account type
//! - `HttpNotificationPublisher` - credit event delivery
//! - `HttpUsageSource` - unreported usage and acknowledgements
//! - `RemoteBillingBackend` - credits of premium and enterprise accounts

pub mod billing;
pub mod client;
pub mod directory;
pub mod notifications;
pub mod rates;
pub mod usage;

pub use billing::RemoteBillingBackend;
pub use client::HttpClient;
pub use directory::HttpAccountDirectory;
pub use notifications::HttpNotificationPublisher;
pub use rates::HttpRateResolver;
pub use usage::HttpUsageSource;

use credits_core::{config::ServicesConfig, AppResult};

/// All collaborator clients, built from the `services` configuration
pub struct Collaborators {
    pub directory: HttpAccountDirectory,
    pub rates: HttpRateResolver,
    pub publisher: HttpNotificationPublisher,
    pub usage: HttpUsageSource,
    pub remote_billing: RemoteBillingBackend,
}

impl Collaborators {
    pub fn from_config(config: &ServicesConfig) -> AppResult<Self> {
        let client = |url: &str| HttpClient::new(url, config.request_timeout_ms);
        Ok(Self {
            directory: HttpAccountDirectory::new(client(&config.account_directory_url)?),
            rates: HttpRateResolver::new(client(&config.rate_resolver_url)?),
            publisher: HttpNotificationPublisher::new(client(&config.notification_url)?),
            usage: HttpUsageSource::new(client(&config.usage_source_url)?),
            remote_billing: RemoteBillingBackend::new(client(&config.remote_billing_url)?),
        })
    }
}
