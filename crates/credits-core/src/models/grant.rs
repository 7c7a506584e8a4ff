//! Credit grant model
//!
//! A grant is one unit of prepaid credit. The ledger is the set of grants of
//! an account; balances are always derived from it.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Provenance code used for grants created by a backend migration
pub const MIGRATED_CREDIT_CODE: &str = "MIGRATED";

/// Credit grant entity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreditGrant {
    /// Unique identifier
    pub id: i64,

    /// Owning account
    pub account_id: String,

    /// Provenance (coupon code, migration marker, ...)
    pub code: String,

    /// Amount granted at install time
    pub original_amount: Decimal,

    /// Amount still available; negative when over-drawn
    pub remaining_amount: Decimal,

    /// Install time, defines consumption order
    pub created_at: DateTime<Utc>,

    /// Expiry
    pub expires_at: DateTime<Utc>,

    /// Last mutation
    pub updated_at: DateTime<Utc>,
}

impl CreditGrant {
    /// Amount consumed so far (counts over-draft as used)
    pub fn used_amount(&self) -> Decimal {
        self.original_amount - self.remaining_amount
    }

    /// Still usable at `now`
    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        self.expires_at > now
    }

    /// Takes part in settlement at `now`
    ///
    /// Expired grants stay eligible while they carry an over-draft.
    pub fn is_eligible(&self, now: DateTime<Utc>) -> bool {
        self.expires_at >= now || self.remaining_amount < Decimal::ZERO
    }
}

/// Validated input for inserting a grant
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewCreditGrant {
    pub account_id: String,
    pub code: String,
    pub amount: Decimal,
    pub expires_at: DateTime<Utc>,
}

/// New remaining amount for one grant, produced by the planners
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GrantUpdate {
    pub grant_id: i64,
    pub remaining_amount: Decimal,
}

/// Credit totals of one account, derived on demand
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccountCreditSummary {
    /// Sum of remaining amounts across all grants
    pub total_remaining: Decimal,

    /// Sum of original minus remaining across all grants
    pub total_used: Decimal,

    /// Sum of remaining amounts of grants that have not expired
    pub total_unapplied: Decimal,

    /// Latest expiry across all grants
    pub last_expiration: Option<DateTime<Utc>>,

    /// Latest mutation across all grants
    pub last_updated: Option<DateTime<Utc>>,
}

impl AccountCreditSummary {
    /// Fold an account's grants into its summary
    pub fn from_grants(grants: &[CreditGrant], now: DateTime<Utc>) -> Self {
        let mut summary = Self {
            total_remaining: Decimal::ZERO,
            total_used: Decimal::ZERO,
            total_unapplied: Decimal::ZERO,
            last_expiration: None,
            last_updated: None,
        };

        for grant in grants {
            summary.total_remaining += grant.remaining_amount;
            summary.total_used += grant.used_amount();
            if grant.is_active(now) {
                summary.total_unapplied += grant.remaining_amount;
            }
            summary.last_expiration = summary.last_expiration.max(Some(grant.expires_at));
            summary.last_updated = summary.last_updated.max(Some(grant.updated_at));
        }

        summary
    }
}
