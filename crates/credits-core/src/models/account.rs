//! Cloud account model
//!
//! The account directory owns accounts; the engine only reads their type and
//! credit-related flags and writes flag updates back.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Account type enumeration
///
/// Determines which billing backend serves the account and which threshold
/// and expiry notice window apply to it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AccountType {
    /// Self-service account billed against the local ledger
    #[default]
    Standard,
    /// Internal account billed against the local ledger
    Intel,
    /// Upgraded account billed by the remote backend
    Premium,
    /// Contract account billed by the remote backend
    Enterprise,
}

impl fmt::Display for AccountType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AccountType::Standard => write!(f, "STANDARD"),
            AccountType::Intel => write!(f, "INTEL"),
            AccountType::Premium => write!(f, "PREMIUM"),
            AccountType::Enterprise => write!(f, "ENTERPRISE"),
        }
    }
}

impl AccountType {
    /// Account types whose credits live in the local ledger
    pub const LEDGER_BACKED: [AccountType; 2] = [AccountType::Standard, AccountType::Intel];

    /// Whether credits for this type are kept in the local ledger
    pub fn is_ledger_backed(&self) -> bool {
        Self::LEDGER_BACKED.contains(self)
    }

    /// Whether installed credits get the minimum expiry extension
    pub fn extends_credit_expiry(&self) -> bool {
        matches!(self, AccountType::Premium | AccountType::Enterprise)
    }
}

/// Progress of a standard-to-premium upgrade
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum UpgradeStatus {
    #[default]
    NotInitiated,
    Initiated,
    /// Upgrade is waiting for a credit card on file
    PendingCc,
    Complete,
}

impl fmt::Display for UpgradeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UpgradeStatus::NotInitiated => write!(f, "NOT_INITIATED"),
            UpgradeStatus::Initiated => write!(f, "INITIATED"),
            UpgradeStatus::PendingCc => write!(f, "PENDING_CC"),
            UpgradeStatus::Complete => write!(f, "COMPLETE"),
        }
    }
}

/// Cloud account as seen by the credits engine
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CloudAccount {
    /// Account identifier issued by the directory
    pub id: String,

    /// Account type
    #[serde(rename = "type")]
    pub account_type: AccountType,

    /// Credits have crossed the usage threshold or run out
    #[serde(default)]
    pub low_credits: bool,

    /// Account may consume paid services
    #[serde(default = "default_true")]
    pub paid_services_allowed: bool,

    /// Paid services are scheduled for termination
    #[serde(default)]
    pub terminate_paid_services: bool,

    /// When the account last ran out of credits
    #[serde(default)]
    pub credits_depleted_at: Option<DateTime<Utc>>,

    /// Upgrade workflow state
    #[serde(default)]
    pub upgrade_status: UpgradeStatus,
}

fn default_true() -> bool {
    true
}

impl CloudAccount {
    /// Create an account in its initial state
    pub fn new(id: impl Into<String>, account_type: AccountType) -> Self {
        Self {
            id: id.into(),
            account_type,
            low_credits: false,
            paid_services_allowed: true,
            terminate_paid_services: false,
            credits_depleted_at: None,
            upgrade_status: UpgradeStatus::NotInitiated,
        }
    }

    /// Already flagged as out of credit with paid services cut off
    pub fn is_low_and_disallowed(&self) -> bool {
        self.low_credits && !self.paid_services_allowed
    }

    /// Apply a partial flag update in place
    pub fn apply(&mut self, update: &AccountFlagsUpdate) {
        if let Some(v) = update.low_credits {
            self.low_credits = v;
        }
        if let Some(v) = update.paid_services_allowed {
            self.paid_services_allowed = v;
        }
        if let Some(v) = update.terminate_paid_services {
            self.terminate_paid_services = v;
        }
        if let Some(v) = update.credits_depleted_at {
            self.credits_depleted_at = Some(v);
        }
        if let Some(v) = update.upgrade_status {
            self.upgrade_status = v;
        }
    }
}

/// Partial update of account flags; `None` fields are left unchanged
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountFlagsUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub low_credits: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub paid_services_allowed: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub terminate_paid_services: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub credits_depleted_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub upgrade_status: Option<UpgradeStatus>,
}

impl AccountFlagsUpdate {
    /// Flags written when an account runs out of usable credit
    pub fn depleted(at: DateTime<Utc>) -> Self {
        Self {
            low_credits: Some(true),
            paid_services_allowed: Some(false),
            credits_depleted_at: Some(at),
            ..Default::default()
        }
    }

    /// Flags written when fresh credit restores paid services
    pub fn restored() -> Self {
        Self {
            low_credits: Some(false),
            paid_services_allowed: Some(true),
            terminate_paid_services: Some(false),
            ..Default::default()
        }
    }

    pub fn low_credits(value: bool) -> Self {
        Self {
            low_credits: Some(value),
            ..Default::default()
        }
    }

    pub fn upgrade_status(status: UpgradeStatus) -> Self {
        Self {
            upgrade_status: Some(status),
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_account_type_display() {
        assert_eq!(AccountType::Intel.to_string(), "INTEL");
        assert_eq!(UpgradeStatus::PendingCc.to_string(), "PENDING_CC");
    }

    #[test]
    fn test_ledger_backed_types() {
        assert!(AccountType::Standard.is_ledger_backed());
        assert!(AccountType::Intel.is_ledger_backed());
        assert!(!AccountType::Premium.is_ledger_backed());
        assert!(AccountType::Premium.extends_credit_expiry());
        assert!(!AccountType::Intel.extends_credit_expiry());
    }

    #[test]
    fn test_apply_flags_update() {
        let now = Utc::now();
        let mut account = CloudAccount::new("acct-1", AccountType::Standard);
        account.apply(&AccountFlagsUpdate::depleted(now));

        assert!(account.low_credits);
        assert!(!account.paid_services_allowed);
        assert!(account.is_low_and_disallowed());
        assert_eq!(account.credits_depleted_at, Some(now));

        account.apply(&AccountFlagsUpdate::restored());
        assert!(!account.is_low_and_disallowed());
        // depletion timestamp survives a restore
        assert_eq!(account.credits_depleted_at, Some(now));
    }

    #[test]
    fn test_account_deserialize_defaults() {
        let account: CloudAccount =
            serde_json::from_str(r#"{"id":"a1","type":"INTEL"}"#).unwrap();
        assert_eq!(account.account_type, AccountType::Intel);
        assert!(account.paid_services_allowed);
        assert_eq!(account.upgrade_status, UpgradeStatus::NotInitiated);
    }
}
