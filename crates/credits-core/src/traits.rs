//! Common traits for stores and external collaborators
//!
//! Storage abstractions are implemented by `credits-db`; collaborator
//! abstractions by `credits-clients`. Services only depend on these traits,
//! which keeps every engine component testable against in-memory doubles.

use crate::error::AppError;
use crate::models::{
    AccountCreditSummary, AccountFlagsUpdate, AccountType, CloudAccount, CreditEvent, CreditGrant,
    CreditState, CreditStateEntry, GrantUpdate, NewCreditGrant, SettlementOutcome, UsageCharge,
    UsageSettlementRecord,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::stream::BoxStream;
use rust_decimal::Decimal;
use std::collections::HashSet;

/// Stream of usage records delivered by a usage source
pub type UsageStream = BoxStream<'static, Result<UsageSettlementRecord, AppError>>;

/// Durable credit ledger
#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// Insert a new grant with `remaining_amount = original_amount`
    async fn insert_grant(&self, grant: &NewCreditGrant) -> Result<CreditGrant, AppError>;

    /// All grants of an account, oldest first
    async fn grants_for_account(&self, account_id: &str) -> Result<Vec<CreditGrant>, AppError>;

    /// Accounts holding at least one grant
    async fn accounts_with_grants(&self) -> Result<Vec<String>, AppError>;

    /// Settle `cost` against the eligible grants of an account
    ///
    /// Runs the settlement planner on the grants eligible at `now` inside a
    /// single transaction. The charges attributed in full to the settled
    /// amount are recorded as settled usage in the same transaction, so the
    /// grant writes and the idempotency records commit or roll back together.
    ///
    /// # Errors
    ///
    /// Storage failures roll everything back and are retryable.
    async fn settle(
        &self,
        account_id: &str,
        cost: Decimal,
        now: DateTime<Utc>,
        charges: &[UsageCharge],
    ) -> Result<SettlementOutcome, AppError>;

    /// Move older over-drafts onto the newest grant, in its own transaction
    async fn rebalance(&self, account_id: &str) -> Result<Vec<GrantUpdate>, AppError>;

    /// Sum of remaining amounts of grants not expired at `now`
    async fn unapplied_balance(&self, account_id: &str, now: DateTime<Utc>)
        -> Result<Decimal, AppError>;

    /// Set every grant of the account to zero remaining; returns rows touched
    async fn zero_out(&self, account_id: &str) -> Result<u64, AppError>;

    /// The subset of `usage_ids` already settled against the ledger
    async fn settled_usage_ids(&self, usage_ids: &[i64]) -> Result<HashSet<i64>, AppError>;
}

/// Append-only log of signalled credit states
#[async_trait]
pub trait CreditStateLog: Send + Sync {
    async fn append(&self, entry: &CreditStateEntry) -> Result<(), AppError>;

    /// Most recent entry of the account by `event_at`
    async fn latest(&self, account_id: &str) -> Result<Option<CreditStateEntry>, AppError>;

    /// Most recent entry of the account in the given state
    async fn latest_in_state(
        &self,
        account_id: &str,
        state: CreditState,
    ) -> Result<Option<CreditStateEntry>, AppError>;
}

/// External account directory
#[async_trait]
pub trait AccountDirectory: Send + Sync {
    async fn get_account(&self, account_id: &str) -> Result<CloudAccount, AppError>;

    /// Accounts the directory marks as holding credits
    async fn accounts_with_credits(&self) -> Result<Vec<CloudAccount>, AppError>;

    async fn update_flags(
        &self,
        account_id: &str,
        update: &AccountFlagsUpdate,
    ) -> Result<(), AppError>;

    /// Whether a payment method is on file
    async fn has_payment_method(&self, account_id: &str) -> Result<bool, AppError>;
}

/// External rate catalog
#[async_trait]
pub trait RateResolver: Send + Sync {
    /// Exactly one rate, or `RateNotFound` / `AmbiguousRate`
    async fn resolve_rate(
        &self,
        product_id: &str,
        account_type: AccountType,
    ) -> Result<Decimal, AppError>;
}

/// External notification transport
#[async_trait]
pub trait NotificationPublisher: Send + Sync {
    async fn publish(&self, event: &CreditEvent) -> Result<(), AppError>;
}

/// External usage source
#[async_trait]
pub trait UsageSource: Send + Sync {
    /// Unreported usage of one account type, ascending by usage id
    async fn unreported_usage(&self, account_type: AccountType) -> Result<UsageStream, AppError>;

    /// Mark usage ids as fully reported
    async fn ack_settled(&self, usage_ids: &[i64]) -> Result<(), AppError>;

    /// Reduce the unreported quantity of a partly settled usage record
    async fn ack_partial(&self, usage_id: i64, remaining_quantity: Decimal)
        -> Result<(), AppError>;
}

/// Billing backend serving one or more account types
#[async_trait]
pub trait BillingBackend: Send + Sync {
    /// Backend name for logs
    fn name(&self) -> &'static str;

    async fn grants(&self, account_id: &str) -> Result<Vec<CreditGrant>, AppError>;

    async fn credit_summary(&self, account_id: &str) -> Result<AccountCreditSummary, AppError>;

    async fn unapplied_balance(&self, account_id: &str) -> Result<Decimal, AppError>;

    async fn install_credit(&self, grant: &NewCreditGrant) -> Result<(), AppError>;

    async fn zero_out(&self, account_id: &str) -> Result<(), AppError>;
}
