//! Domain models for the cloud credits engine

pub mod account;
pub mod grant;
pub mod signal;
pub mod usage;

pub use account::{AccountFlagsUpdate, AccountType, CloudAccount, UpgradeStatus};
pub use grant::{
    AccountCreditSummary, CreditGrant, GrantUpdate, NewCreditGrant, MIGRATED_CREDIT_CODE,
};
pub use signal::{CreditEvent, CreditState, CreditStateEntry, EventSeverity};
pub use usage::{SettlementOutcome, UsageCharge, UsageCoverage, UsageSettlementRecord};
