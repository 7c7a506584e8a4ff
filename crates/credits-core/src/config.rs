//! Application configuration
//!
//! This module provides centralized configuration management using the `config` crate.
//! Configuration can be loaded from environment variables and config files.

use crate::models::AccountType;
use chrono::Duration as ChronoDuration;
use config::{Config, ConfigError, Environment, File};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::env;
use std::time::Duration;
use validator::Validate;

/// Main application configuration
#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub credits: CreditsConfig,
    pub services: ServicesConfig,
}

/// HTTP server configuration
#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    /// Server host address
    #[serde(default = "default_host")]
    pub host: String,

    /// Server port
    #[serde(default = "default_port")]
    pub port: u16,

    /// Number of worker threads
    #[serde(default = "default_workers")]
    pub workers: usize,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_workers() -> usize {
    num_cpus::get()
}

/// Database configuration
#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseConfig {
    /// PostgreSQL connection URL
    pub url: String,

    /// Maximum number of connections in the pool
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    /// Minimum number of connections in the pool
    #[serde(default = "default_min_connections")]
    pub min_connections: u32,

    /// Connection acquire timeout in seconds
    #[serde(default = "default_acquire_timeout")]
    pub acquire_timeout_secs: u64,

    /// Idle connection timeout in seconds
    #[serde(default = "default_idle_timeout")]
    pub idle_timeout_secs: u64,

    /// Apply embedded migrations at startup
    #[serde(default)]
    pub run_migrations: bool,
}

fn default_max_connections() -> u32 {
    10
}

fn default_min_connections() -> u32 {
    2
}

fn default_acquire_timeout() -> u64 {
    30
}

fn default_idle_timeout() -> u64 {
    600
}

/// Background sweep intervals, each independent of the others
#[derive(Debug, Deserialize, Clone, Validate)]
pub struct SchedulerConfig {
    /// Usage reconciliation sweep
    #[validate(range(min = 1))]
    #[serde(default = "default_reconciliation_interval")]
    pub reconciliation_interval_secs: u64,

    /// Usage signal sweep (available / threshold / used up)
    #[validate(range(min = 1))]
    #[serde(default = "default_usage_event_interval")]
    pub usage_event_interval_secs: u64,

    /// Expiry signal sweep (expiring / expired)
    #[validate(range(min = 1))]
    #[serde(default = "default_expiry_event_interval")]
    pub expiry_event_interval_secs: u64,
}

fn default_reconciliation_interval() -> u64 {
    300
}

fn default_usage_event_interval() -> u64 {
    600
}

fn default_expiry_event_interval() -> u64 {
    3600
}

impl SchedulerConfig {
    pub fn reconciliation_interval(&self) -> Duration {
        Duration::from_secs(self.reconciliation_interval_secs)
    }

    pub fn usage_event_interval(&self) -> Duration {
        Duration::from_secs(self.usage_event_interval_secs)
    }

    pub fn expiry_event_interval(&self) -> Duration {
        Duration::from_secs(self.expiry_event_interval_secs)
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            reconciliation_interval_secs: default_reconciliation_interval(),
            usage_event_interval_secs: default_usage_event_interval(),
            expiry_event_interval_secs: default_expiry_event_interval(),
        }
    }
}

/// Credit policy configuration
///
/// Thresholds are the percentage of initial credit that must be consumed
/// before a "threshold reached" signal is sent. Every account type carries
/// its own threshold and expiry notice window.
#[derive(Debug, Deserialize, Clone, Validate)]
pub struct CreditsConfig {
    #[validate(range(min = 1, max = 100))]
    #[serde(default = "default_threshold_percent")]
    pub standard_threshold_percent: u8,

    #[validate(range(min = 1, max = 100))]
    #[serde(default = "default_threshold_percent")]
    pub intel_threshold_percent: u8,

    #[validate(range(min = 1, max = 100))]
    #[serde(default = "default_threshold_percent")]
    pub premium_threshold_percent: u8,

    #[validate(range(min = 1, max = 100))]
    #[serde(default = "default_threshold_percent")]
    pub enterprise_threshold_percent: u8,

    #[serde(default = "default_notice_days")]
    pub standard_expiry_notice_days: u32,

    #[serde(default = "default_notice_days")]
    pub intel_expiry_notice_days: u32,

    #[serde(default = "default_upgraded_notice_days")]
    pub premium_expiry_notice_days: u32,

    #[serde(default = "default_upgraded_notice_days")]
    pub enterprise_expiry_notice_days: u32,

    /// Minimum lifetime of credits installed on premium/enterprise accounts
    #[serde(default = "default_expiry_minimum_interval")]
    pub expiry_minimum_interval_days: u32,
}

fn default_threshold_percent() -> u8 {
    80
}

fn default_notice_days() -> u32 {
    7
}

fn default_upgraded_notice_days() -> u32 {
    14
}

fn default_expiry_minimum_interval() -> u32 {
    30
}

impl CreditsConfig {
    /// Consumption percentage that triggers the threshold signal
    pub fn threshold_percent(&self, account_type: AccountType) -> u8 {
        match account_type {
            AccountType::Standard => self.standard_threshold_percent,
            AccountType::Intel => self.intel_threshold_percent,
            AccountType::Premium => self.premium_threshold_percent,
            AccountType::Enterprise => self.enterprise_threshold_percent,
        }
    }

    /// Remaining credit below which the threshold counts as reached
    pub fn threshold_floor(&self, account_type: AccountType, initial_amount: Decimal) -> Decimal {
        let kept = Decimal::from(100 - u32::from(self.threshold_percent(account_type)));
        kept * initial_amount / Decimal::from(100)
    }

    /// Window before the last expiry in which "expiring" is signalled
    pub fn expiry_notice(&self, account_type: AccountType) -> ChronoDuration {
        let days = match account_type {
            AccountType::Standard => self.standard_expiry_notice_days,
            AccountType::Intel => self.intel_expiry_notice_days,
            AccountType::Premium => self.premium_expiry_notice_days,
            AccountType::Enterprise => self.enterprise_expiry_notice_days,
        };
        ChronoDuration::days(i64::from(days))
    }

    pub fn expiry_minimum_interval(&self) -> ChronoDuration {
        ChronoDuration::days(i64::from(self.expiry_minimum_interval_days))
    }
}

impl Default for CreditsConfig {
    fn default() -> Self {
        Self {
            standard_threshold_percent: default_threshold_percent(),
            intel_threshold_percent: default_threshold_percent(),
            premium_threshold_percent: default_threshold_percent(),
            enterprise_threshold_percent: default_threshold_percent(),
            standard_expiry_notice_days: default_notice_days(),
            intel_expiry_notice_days: default_notice_days(),
            premium_expiry_notice_days: default_upgraded_notice_days(),
            enterprise_expiry_notice_days: default_upgraded_notice_days(),
            expiry_minimum_interval_days: default_expiry_minimum_interval(),
        }
    }
}

/// Base URLs of the external collaborators
#[derive(Debug, Deserialize, Clone)]
pub struct ServicesConfig {
    pub account_directory_url: String,
    pub rate_resolver_url: String,
    pub notification_url: String,
    pub usage_source_url: String,
    /// Remote backend for premium and enterprise accounts
    pub remote_billing_url: String,

    /// Request timeout in milliseconds
    #[serde(default = "default_request_timeout")]
    pub request_timeout_ms: u64,
}

fn default_request_timeout() -> u64 {
    5000
}

impl AppConfig {
    /// Load configuration from environment and optional config file
    pub fn load() -> Result<Self, ConfigError> {
        let run_mode = env::var("RUN_MODE").unwrap_or_else(|_| "development".to_string());

        let config = Config::builder()
            // Start with default values
            .set_default("server.host", "0.0.0.0")?
            .set_default("server.port", 8080)?
            .set_default("server.workers", num_cpus::get() as i64)?
            .set_default("database.max_connections", 10)?
            .set_default("database.min_connections", 2)?
            .set_default("scheduler.reconciliation_interval_secs", 300)?
            .set_default("scheduler.usage_event_interval_secs", 600)?
            .set_default("scheduler.expiry_event_interval_secs", 3600)?
            .set_default("services.request_timeout_ms", 5000)?
            // Load config file if exists
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name(&format!("config/{}", run_mode)).required(false))
            // Load from environment variables with CREDITS_ prefix
            .add_source(
                Environment::with_prefix("CREDITS")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let app: AppConfig = config.try_deserialize()?;
        app.validate()?;
        Ok(app)
    }

    /// Range checks of the scheduler and credits sections
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.scheduler
            .validate()
            .and_then(|()| self.credits.validate())
            .map_err(|e| ConfigError::Message(e.to_string()))
    }

    /// Get the server bind address
    pub fn server_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}
