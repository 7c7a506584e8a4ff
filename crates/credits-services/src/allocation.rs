//! Credit allocation engine
//!
//! Settles a monetary cost against an account's credit grants. Consumption
//! rules live in `credits_core::ledger`; the store runs them inside one
//! transaction per call. The engine holds no in-process lock: two
//! settlements of the same account are serialized by the store.

use chrono::Utc;
use credits_core::{
    models::{SettlementOutcome, UsageCharge},
    traits::LedgerStore,
    AppError, AppResult,
};
use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

/// Credit allocation engine
#[derive(Clone)]
pub struct AllocationEngine {
    ledger: Arc<dyn LedgerStore>,
}

impl AllocationEngine {
    /// Create a new allocation engine
    pub fn new(ledger: Arc<dyn LedgerStore>) -> Self {
        Self { ledger }
    }

    /// Settle a cost against an account
    ///
    /// # Arguments
    ///
    /// * `account_id` - Account whose grants are consumed
    /// * `cost` - Amount to settle, must not be negative
    ///
    /// # Returns
    ///
    /// The unsettled remainder. It equals `cost` when the account has no
    /// eligible grant, which callers treat as "no credit available".
    ///
    /// # Errors
    ///
    /// Returns `AppError::InvalidAmount` for a negative cost or one that would
    /// overflow a grant balance, and a retryable storage error if the
    /// settlement transaction fails. A failed call leaves the ledger unchanged.
    #[instrument(skip(self))]
    pub async fn settle(&self, account_id: &str, cost: Decimal) -> AppResult<Decimal> {
        validate_cost(cost)?;
        let outcome = self.ledger.settle(account_id, cost, Utc::now(), &[]).await?;
        self.log_outcome(&outcome);
        Ok(outcome.unsettled)
    }

    /// Settle the summed cost of a batch of usage charges
    ///
    /// The charges must belong to `account_id` and be ordered by usage id.
    /// The outcome lists the usage ids paid in full, which the store records
    /// as settled in the same transaction as the grant updates.
    #[instrument(skip(self, charges), fields(charges = charges.len()))]
    pub async fn settle_charges(
        &self,
        account_id: &str,
        charges: &[UsageCharge],
    ) -> AppResult<SettlementOutcome> {
        if let Some(negative) = charges.iter().find(|c| c.amount < Decimal::ZERO) {
            return Err(AppError::InvalidAmount(format!(
                "usage {} has negative amount {}",
                negative.usage_id, negative.amount
            )));
        }
        let cost = charges
            .iter()
            .try_fold(Decimal::ZERO, |total, c| total.checked_add(c.amount))
            .ok_or_else(|| {
                AppError::InvalidAmount(format!(
                    "total of {} usage charges for account {} overflows",
                    charges.len(),
                    account_id
                ))
            })?;

        let outcome = self
            .ledger
            .settle(account_id, cost, Utc::now(), charges)
            .await?;
        self.log_outcome(&outcome);
        Ok(outcome)
    }

    fn log_outcome(&self, outcome: &SettlementOutcome) {
        if outcome.no_credit_available() {
            warn!(
                "No credit available for account {}: {} left unsettled",
                outcome.account_id, outcome.unsettled
            );
        } else {
            info!(
                "Settled {} of {} for account {}",
                outcome.settled(),
                outcome.cost,
                outcome.account_id
            );
        }
        debug!("Grant updates: {:?}", outcome.updates);
    }
}

fn validate_cost(cost: Decimal) -> AppResult<()> {
    if cost < Decimal::ZERO {
        return Err(AppError::InvalidAmount(format!(
            "settlement cost must not be negative, got {}",
            cost
        )));
    }
    Ok(())
}
