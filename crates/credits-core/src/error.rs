//! Unified error handling for the cloud credits engine
//!
//! One error type covers storage, ledger, reconciliation and collaborator
//! failures. It maps onto HTTP responses and classifies each failure as
//! retryable, fatal, or neither so background sweeps know how to react.

use actix_web::{http::StatusCode, HttpResponse, ResponseError};
use serde_json::json;
use thiserror::Error;

/// Main application error type
///
/// All errors in the application should be converted to this type.
/// It implements `ResponseError` for automatic HTTP response generation.
#[derive(Error, Debug)]
pub enum AppError {
    // ==================== Database Errors ====================
    #[error("Database error: {0}")]
    Database(String),

    #[error("Database pool error: {0}")]
    Pool(String),

    #[error("Transaction failed: {0}")]
    Transaction(String),

    // ==================== Ledger Errors ====================
    #[error("Invalid amount: {0}")]
    InvalidAmount(String),

    #[error("Usage {usage_id} already settled")]
    UsageAlreadySettled { usage_id: i64 },

    #[error("Migration failed for account {account_id}: {reason}")]
    MigrationFailed { account_id: String, reason: String },

    #[error("Account {0} is waiting for a payment method before migration")]
    MigrationPendingPaymentMethod(String),

    // ==================== Reconciliation Errors ====================
    #[error("Usage stream {stream} out of order: id {got} received after first id {first}")]
    UsageOrderViolation { stream: String, first: i64, got: i64 },

    #[error("Rate not found for product {0}")]
    RateNotFound(String),

    #[error("Ambiguous rate for product {0}")]
    AmbiguousRate(String),

    // ==================== Account Errors ====================
    #[error("Account not found: {0}")]
    AccountNotFound(String),

    #[error("No billing driver registered for account type {0}")]
    DriverNotFound(String),

    // ==================== Validation Errors ====================
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Missing required field: {0}")]
    MissingField(String),

    // ==================== Resource Errors ====================
    #[error("Not found: {0}")]
    NotFound(String),

    // ==================== Internal Errors ====================
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    // ==================== External Service Errors ====================
    #[error("Upstream service error: {0}")]
    Upstream(String),

    #[error("Upstream service timed out: {0}")]
    UpstreamTimeout(String),

    #[error("Event publish failed: {0}")]
    Publish(String),
}

impl AppError {
    /// Returns the HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            // 400 Bad Request
            AppError::Validation(_)
            | AppError::MissingField(_)
            | AppError::InvalidAmount(_) => StatusCode::BAD_REQUEST,

            // 404 Not Found
            AppError::AccountNotFound(_)
            | AppError::RateNotFound(_)
            | AppError::NotFound(_) => StatusCode::NOT_FOUND,

            // 409 Conflict
            AppError::UsageAlreadySettled { .. }
            | AppError::AmbiguousRate(_)
            | AppError::MigrationPendingPaymentMethod(_) => StatusCode::CONFLICT,

            // 422 Unprocessable Entity
            AppError::UsageOrderViolation { .. } => StatusCode::UNPROCESSABLE_ENTITY,

            // 502 / 504 upstream failures
            AppError::Upstream(_) | AppError::Publish(_) => StatusCode::BAD_GATEWAY,
            AppError::UpstreamTimeout(_) => StatusCode::GATEWAY_TIMEOUT,

            // 503 Service Unavailable
            AppError::Pool(_) => StatusCode::SERVICE_UNAVAILABLE,

            // 500 Internal Server Error
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Returns the error code for API responses
    pub fn error_code(&self) -> &'static str {
        match self {
            AppError::Database(_) => "database_error",
            AppError::Pool(_) => "pool_error",
            AppError::Transaction(_) => "transaction_error",
            AppError::InvalidAmount(_) => "invalid_amount",
            AppError::UsageAlreadySettled { .. } => "usage_already_settled",
            AppError::MigrationFailed { .. } => "migration_failed",
            AppError::MigrationPendingPaymentMethod(_) => "migration_pending_payment_method",
            AppError::UsageOrderViolation { .. } => "usage_order_violation",
            AppError::RateNotFound(_) => "rate_not_found",
            AppError::AmbiguousRate(_) => "ambiguous_rate",
            AppError::AccountNotFound(_) => "account_not_found",
            AppError::DriverNotFound(_) => "driver_not_found",
            AppError::Validation(_) => "validation_error",
            AppError::MissingField(_) => "missing_field",
            AppError::NotFound(_) => "not_found",
            AppError::Internal(_) => "internal_error",
            AppError::Config(_) => "config_error",
            AppError::Serialization(_) => "serialization_error",
            AppError::Upstream(_) => "upstream_error",
            AppError::UpstreamTimeout(_) => "upstream_timeout",
            AppError::Publish(_) => "publish_error",
        }
    }

    /// Transient failures that are safe to re-issue unchanged
    ///
    /// Ledger writes roll back as a whole, so a settlement or rebalance that
    /// failed with one of these leaves the ledger untouched.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            AppError::Database(_)
                | AppError::Pool(_)
                | AppError::Transaction(_)
                | AppError::UsageAlreadySettled { .. }
                | AppError::Upstream(_)
                | AppError::UpstreamTimeout(_)
        )
    }

    /// Protocol violations that abort the current stream and must be alerted on
    pub fn is_fatal(&self) -> bool {
        matches!(self, AppError::UsageOrderViolation { .. })
    }
}

impl ResponseError for AppError {
    fn status_code(&self) -> StatusCode {
        AppError::status_code(self)
    }

    fn error_response(&self) -> HttpResponse {
        let status = self.status_code();
        let body = json!({
            "error": self.error_code(),
            "message": self.to_string(),
            "status": status.as_u16(),
        });

        HttpResponse::build(status).json(body)
    }
}

// ==================== From implementations ====================

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::Serialization(err.to_string())
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::Internal(err.to_string())
    }
}

impl From<config::ConfigError> for AppError {
    fn from(err: config::ConfigError) -> Self {
        AppError::Config(err.to_string())
    }
}

impl From<validator::ValidationErrors> for AppError {
    fn from(err: validator::ValidationErrors) -> Self {
        AppError::Validation(err.to_string())
    }
}

impl From<reqwest::Error> for AppError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            AppError::UpstreamTimeout(err.to_string())
        } else if err.is_decode() {
            AppError::Serialization(err.to_string())
        } else {
            AppError::Upstream(err.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_status_codes() {
        assert_eq!(
            AppError::InvalidAmount("-1".to_string()).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            AppError::AccountNotFound("123".to_string()).status_code(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            AppError::UsageOrderViolation {
                stream: "standard".to_string(),
                first: 5,
                got: 3
            }
            .status_code(),
            StatusCode::UNPROCESSABLE_ENTITY
        );
    }

    #[test]
    fn test_error_codes() {
        assert_eq!(
            AppError::RateNotFound("vm-small".to_string()).error_code(),
            "rate_not_found"
        );
        assert_eq!(
            AppError::DriverNotFound("PREMIUM".to_string()).error_code(),
            "driver_not_found"
        );
    }

    #[test]
    fn test_error_classification() {
        let fatal = AppError::UsageOrderViolation {
            stream: "intel".to_string(),
            first: 10,
            got: 2,
        };
        assert!(fatal.is_fatal());
        assert!(!fatal.is_retryable());

        let transient = AppError::Transaction("connection reset".to_string());
        assert!(transient.is_retryable());
        assert!(!transient.is_fatal());

        let validation = AppError::InvalidAmount("0".to_string());
        assert!(!validation.is_retryable());
        assert!(!validation.is_fatal());
    }
}
