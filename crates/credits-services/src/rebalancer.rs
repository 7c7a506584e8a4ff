//! Negative-balance rebalancer
//!
//! Runs after a grant is installed: older over-drafts are paid off from the
//! newest grant so the account carries at most one negative grant.

use credits_core::{models::GrantUpdate, traits::LedgerStore, AppResult};
use std::sync::Arc;
use tracing::{debug, info, instrument};

#[derive(Clone)]
pub struct Rebalancer {
    ledger: Arc<dyn LedgerStore>,
}

impl Rebalancer {
    pub fn new(ledger: Arc<dyn LedgerStore>) -> Self {
        Self { ledger }
    }

    /// Move older over-drafts of the account onto its newest grant
    ///
    /// Idempotent: a second call on an unchanged ledger writes nothing.
    #[instrument(skip(self))]
    pub async fn rebalance(&self, account_id: &str) -> AppResult<Vec<GrantUpdate>> {
        let updates = self.ledger.rebalance(account_id).await?;
        if updates.is_empty() {
            debug!("Nothing to rebalance for account {}", account_id);
        } else {
            info!(
                "Rebalanced {} grants for account {}",
                updates.len(),
                account_id
            );
        }
        Ok(updates)
    }
}
