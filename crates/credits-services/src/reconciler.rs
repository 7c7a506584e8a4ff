//! Usage reconciliation
//!
//! Prices unreported usage, settles it against the ledger once per account
//! and acknowledges back to the usage source what is now settled. Usage ids
//! already recorded as settled are echoed back without being billed again.

use crate::allocation::AllocationEngine;
use crate::scheduler::PeriodicTask;
use async_trait::async_trait;
use credits_core::{
    models::{AccountType, UsageCharge, UsageSettlementRecord},
    traits::{LedgerStore, RateResolver, UsageSource, UsageStream},
    AppError, AppResult,
};
use futures::StreamExt;
use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, error, info, instrument, warn};

/// Result of reconciling one usage stream
#[derive(Debug, Default, Clone, PartialEq, Serialize)]
pub struct ReconciliationReport {
    /// Records read from the stream
    pub records: usize,
    /// Already billed or reported ids acknowledged without billing
    pub echoed: Vec<i64>,
    /// Records left for a later pass because they could not be priced
    pub skipped: Vec<i64>,
    /// Ids acknowledged as fully settled
    pub settled: Vec<i64>,
    /// Partly settled ids with their remaining quantity
    pub partial: Vec<(i64, Decimal)>,
    /// Accounts with no credit to settle against
    pub without_credit: Vec<String>,
    /// Accounts whose settlement failed
    pub failed: Vec<String>,
}

#[derive(Default)]
struct AccountBatch {
    charges: Vec<UsageCharge>,
    rates: HashMap<i64, Decimal>,
    total: Decimal,
}

/// Usage reconciler
#[derive(Clone)]
pub struct UsageReconciler {
    ledger: Arc<dyn LedgerStore>,
    rates: Arc<dyn RateResolver>,
    usage: Arc<dyn UsageSource>,
    engine: AllocationEngine,
}

impl UsageReconciler {
    pub fn new(
        ledger: Arc<dyn LedgerStore>,
        rates: Arc<dyn RateResolver>,
        usage: Arc<dyn UsageSource>,
    ) -> Self {
        Self {
            engine: AllocationEngine::new(ledger.clone()),
            ledger,
            rates,
            usage,
        }
    }

    /// Reconcile every ledger-backed usage stream
    ///
    /// A stream failing, fatally or not, is logged and the sweep moves on
    /// to the next account type.
    pub async fn sweep(&self) -> Vec<(AccountType, AppResult<ReconciliationReport>)> {
        let mut results = Vec::new();
        for account_type in AccountType::LEDGER_BACKED {
            let result = match self.usage.unreported_usage(account_type).await {
                Ok(stream) => self.reconcile(account_type, stream).await,
                Err(e) => Err(e),
            };

            match &result {
                Ok(report) => info!(
                    "Reconciled {} usage: {} records, {} settled, {} echoed, {} skipped",
                    account_type,
                    report.records,
                    report.settled.len(),
                    report.echoed.len(),
                    report.skipped.len()
                ),
                Err(e) if e.is_fatal() => {
                    error!("Aborted {} usage stream: {}", account_type, e)
                }
                Err(e) => warn!("Failed to reconcile {} usage: {}", account_type, e),
            }
            results.push((account_type, result));
        }
        results
    }

    /// Reconcile one stream of usage records in ascending usage id order
    ///
    /// # Errors
    ///
    /// Returns `AppError::UsageOrderViolation` when a usage id precedes the
    /// first id of the stream. Nothing is settled or acknowledged in that
    /// case. Errors reading the stream or the settled set abort the stream
    /// and are retried on the next pass. The stream is read to its end
    /// before anything is settled.
    #[instrument(skip(self, stream))]
    pub async fn reconcile(
        &self,
        account_type: AccountType,
        mut stream: UsageStream,
    ) -> AppResult<ReconciliationReport> {
        let mut report = ReconciliationReport::default();
        let mut first_id: Option<i64> = None;
        let mut seen: HashSet<i64> = HashSet::new();
        let mut pending: Vec<UsageSettlementRecord> = Vec::new();

        while let Some(item) = stream.next().await {
            let record = item?;
            report.records += 1;

            let first = *first_id.get_or_insert(record.usage_id);
            if record.usage_id < first {
                return Err(AppError::UsageOrderViolation {
                    stream: account_type.to_string(),
                    first,
                    got: record.usage_id,
                });
            }

            if !seen.insert(record.usage_id) {
                debug!("Usage {} repeated in stream", record.usage_id);
                continue;
            }
            pending.push(record);
        }

        let candidates: Vec<i64> = pending
            .iter()
            .filter(|r| !r.reported)
            .map(|r| r.usage_id)
            .collect();
        let billed = if candidates.is_empty() {
            HashSet::new()
        } else {
            self.ledger.settled_usage_ids(&candidates).await?
        };
        debug!(
            "{} of {} unreported usage records already billed",
            billed.len(),
            candidates.len()
        );

        let mut batches: BTreeMap<String, AccountBatch> = BTreeMap::new();
        for record in pending {
            if record.reported || billed.contains(&record.usage_id) {
                report.echoed.push(record.usage_id);
                continue;
            }

            let Some(rate) = self.rate_for(&record, account_type).await else {
                report.skipped.push(record.usage_id);
                continue;
            };
            let batch = batches.entry(record.account_id.clone()).or_default();
            let priced = record
                .unreported_quantity
                .checked_mul(rate)
                .and_then(|amount| Some((amount, batch.total.checked_add(amount)?)));
            let Some((amount, total)) = priced else {
                warn!(
                    "Skipping usage {} of account {}: {} at rate {} overflows the batch",
                    record.usage_id, record.account_id, record.unreported_quantity, rate
                );
                report.skipped.push(record.usage_id);
                continue;
            };
            batch.total = total;
            batch.charges.push(UsageCharge {
                usage_id: record.usage_id,
                amount,
            });
            batch.rates.insert(record.usage_id, rate);
        }

        if !report.echoed.is_empty() {
            if let Err(e) = self.usage.ack_settled(&report.echoed).await {
                warn!("Failed to acknowledge already billed usage: {}", e);
            }
        }

        for (account_id, batch) in batches {
            self.settle_batch(&account_id, batch, &mut report).await;
        }

        Ok(report)
    }

    async fn rate_for(
        &self,
        record: &UsageSettlementRecord,
        account_type: AccountType,
    ) -> Option<Decimal> {
        if let Some(rate) = record.rate {
            return Some(rate);
        }
        match self
            .rates
            .resolve_rate(&record.product_id, account_type)
            .await
        {
            Ok(rate) => Some(rate),
            Err(e) => {
                warn!(
                    "Skipping usage {} of account {}: {}",
                    record.usage_id, record.account_id, e
                );
                None
            }
        }
    }

    /// Settle one account's batch and acknowledge the outcome
    async fn settle_batch(
        &self,
        account_id: &str,
        batch: AccountBatch,
        report: &mut ReconciliationReport,
    ) {
        let outcome = match self.engine.settle_charges(account_id, &batch.charges).await {
            Ok(outcome) => outcome,
            Err(e) => {
                if e.is_retryable() {
                    warn!("Settlement of account {} will be retried: {}", account_id, e);
                } else {
                    error!("Settlement of account {} failed: {}", account_id, e);
                }
                report.failed.push(account_id.to_string());
                return;
            }
        };

        if outcome.no_credit_available() {
            report.without_credit.push(account_id.to_string());
            return;
        }

        if !outcome.covered.is_empty() {
            match self.usage.ack_settled(&outcome.covered).await {
                Ok(()) => report.settled.extend_from_slice(&outcome.covered),
                Err(e) => warn!(
                    "Failed to acknowledge settled usage of account {}: {}",
                    account_id, e
                ),
            }
        }

        if let Some((usage_id, unsettled)) = outcome.partial {
            let remaining = batch
                .rates
                .get(&usage_id)
                .and_then(|rate| unsettled.checked_div(*rate));
            let Some(remaining) = remaining else {
                warn!("Cannot derive remaining quantity of usage {}", usage_id);
                return;
            };
            match self.usage.ack_partial(usage_id, remaining).await {
                Ok(()) => report.partial.push((usage_id, remaining)),
                Err(e) => warn!("Failed to acknowledge partial usage {}: {}", usage_id, e),
            }
        }
    }
}

#[async_trait]
impl PeriodicTask for UsageReconciler {
    fn name(&self) -> &'static str {
        "usage-reconciliation"
    }

    async fn tick(&self) -> AppResult<()> {
        self.sweep().await;
        Ok(())
    }
}
