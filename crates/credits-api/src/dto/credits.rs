//! Credit DTOs
//!
//! Request and response types for the credit endpoints.

use chrono::{DateTime, Utc};
use credits_core::models::{CreditState, NewCreditGrant};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use validator::Validate;

/// Credit installation request
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct InstallCreditRequest {
    #[validate(length(min = 1, max = 64, message = "Account id is required"))]
    pub account_id: String,

    /// Coupon or promotion code
    #[validate(length(min = 1, max = 64, message = "Credit code is required"))]
    pub code: String,

    pub amount: Decimal,

    pub expires_at: DateTime<Utc>,
}

impl From<InstallCreditRequest> for NewCreditGrant {
    fn from(req: InstallCreditRequest) -> Self {
        NewCreditGrant {
            account_id: req.account_id,
            code: req.code,
            amount: req.amount,
            expires_at: req.expires_at,
        }
    }
}

/// Query of `GET /credits/{account_id}`
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CreditsQuery {
    /// Include individual grants
    #[serde(default)]
    pub history: bool,
}

/// Manual settlement request
#[derive(Debug, Clone, Deserialize)]
pub struct SettleRequest {
    pub cost: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SettleResponse {
    pub account_id: String,
    pub cost: Decimal,
    pub settled: Decimal,
    /// Left unsettled because the account had no eligible credit
    pub unsettled: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnappliedResponse {
    pub account_id: String,
    pub unapplied: Decimal,
}

/// Credit state log entry to record
#[derive(Debug, Clone, Deserialize)]
pub struct StateLogRequest {
    pub state: CreditState,
    /// Defaults to now
    pub event_at: Option<DateTime<Utc>>,
}
