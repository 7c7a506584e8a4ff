//! In-memory stores
//!
//! Process-local implementations of the storage traits. Each operation runs
//! under one lock, which gives the same all-or-nothing behaviour as a
//! database transaction. Used by tests and by local runs without PostgreSQL.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use credits_core::{
    ledger::{apply_updates, cover_usage, plan_rebalance, plan_settlement},
    models::{
        CreditGrant, CreditState, CreditStateEntry, GrantUpdate, NewCreditGrant,
        SettlementOutcome, UsageCharge,
    },
    traits::{CreditStateLog, LedgerStore},
    AppError, AppResult,
};
use parking_lot::Mutex;
use rust_decimal::Decimal;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::debug;

#[derive(Default)]
struct LedgerState {
    grants: Vec<CreditGrant>,
    settled_usage: HashMap<i64, String>,
    next_id: i64,
}

impl LedgerState {
    /// Grants of one account, oldest first
    fn account_grants(&self, account_id: &str) -> Vec<CreditGrant> {
        let mut grants: Vec<CreditGrant> = self
            .grants
            .iter()
            .filter(|g| g.account_id == account_id)
            .cloned()
            .collect();
        grants.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        grants
    }

    fn write(&mut self, updates: &[GrantUpdate], now: DateTime<Utc>) {
        apply_updates(&mut self.grants, updates);
        for update in updates {
            if let Some(grant) = self.grants.iter_mut().find(|g| g.id == update.grant_id) {
                grant.updated_at = now;
            }
        }
    }
}

/// In-memory implementation of LedgerStore
#[derive(Default)]
pub struct InMemoryLedger {
    state: Mutex<LedgerState>,
    fail_writes: AtomicBool,
}

impl InMemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a fully specified grant, keeping its id and timestamps
    pub fn seed(&self, grant: CreditGrant) {
        let mut state = self.state.lock();
        state.next_id = state.next_id.max(grant.id);
        state.grants.push(grant);
    }

    /// Make every following write fail as if the database were unreachable
    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Snapshot of one grant
    pub fn grant(&self, grant_id: i64) -> Option<CreditGrant> {
        self.state
            .lock()
            .grants
            .iter()
            .find(|g| g.id == grant_id)
            .cloned()
    }

    fn check_writable(&self) -> AppResult<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(AppError::Transaction("ledger unavailable".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl LedgerStore for InMemoryLedger {
    async fn insert_grant(&self, grant: &NewCreditGrant) -> AppResult<CreditGrant> {
        self.check_writable()?;
        let now = Utc::now();
        let mut state = self.state.lock();
        state.next_id += 1;
        let created = CreditGrant {
            id: state.next_id,
            account_id: grant.account_id.clone(),
            code: grant.code.clone(),
            original_amount: grant.amount,
            remaining_amount: grant.amount,
            created_at: now,
            expires_at: grant.expires_at,
            updated_at: now,
        };
        state.grants.push(created.clone());
        Ok(created)
    }

    async fn grants_for_account(&self, account_id: &str) -> AppResult<Vec<CreditGrant>> {
        Ok(self.state.lock().account_grants(account_id))
    }

    async fn accounts_with_grants(&self) -> AppResult<Vec<String>> {
        let accounts: BTreeSet<String> = self
            .state
            .lock()
            .grants
            .iter()
            .map(|g| g.account_id.clone())
            .collect();
        Ok(accounts.into_iter().collect())
    }

    async fn settle(
        &self,
        account_id: &str,
        cost: Decimal,
        now: DateTime<Utc>,
        charges: &[UsageCharge],
    ) -> AppResult<SettlementOutcome> {
        self.check_writable()?;
        let mut state = self.state.lock();

        let eligible: Vec<CreditGrant> = state
            .account_grants(account_id)
            .into_iter()
            .filter(|g| g.is_eligible(now))
            .collect();
        let plan = plan_settlement(&eligible, cost)?;
        let coverage = cover_usage(charges, cost - plan.unsettled);

        // Validate before mutating so a conflict leaves the ledger untouched
        if let Some(usage_id) = coverage
            .covered
            .iter()
            .find(|id| state.settled_usage.contains_key(*id))
        {
            return Err(AppError::UsageAlreadySettled {
                usage_id: *usage_id,
            });
        }

        state.write(&plan.updates, now);
        for usage_id in &coverage.covered {
            state.settled_usage.insert(*usage_id, account_id.to_string());
        }
        debug!("Settled {} for account {} in memory", cost, account_id);

        Ok(SettlementOutcome {
            account_id: account_id.to_string(),
            cost,
            unsettled: plan.unsettled,
            updates: plan.updates,
            covered: coverage.covered,
            partial: coverage.partial,
        })
    }

    async fn rebalance(&self, account_id: &str) -> AppResult<Vec<GrantUpdate>> {
        self.check_writable()?;
        let mut state = self.state.lock();
        let updates = plan_rebalance(&state.account_grants(account_id));
        state.write(&updates, Utc::now());
        Ok(updates)
    }

    async fn unapplied_balance(&self, account_id: &str, now: DateTime<Utc>) -> AppResult<Decimal> {
        Ok(self
            .state
            .lock()
            .grants
            .iter()
            .filter(|g| g.account_id == account_id && g.is_active(now))
            .map(|g| g.remaining_amount)
            .sum())
    }

    async fn zero_out(&self, account_id: &str) -> AppResult<u64> {
        self.check_writable()?;
        let now = Utc::now();
        let mut state = self.state.lock();
        let mut touched = 0;
        for grant in state
            .grants
            .iter_mut()
            .filter(|g| g.account_id == account_id && !g.remaining_amount.is_zero())
        {
            grant.remaining_amount = Decimal::ZERO;
            grant.updated_at = now;
            touched += 1;
        }
        Ok(touched)
    }

    async fn settled_usage_ids(&self, usage_ids: &[i64]) -> AppResult<HashSet<i64>> {
        let state = self.state.lock();
        Ok(usage_ids
            .iter()
            .filter(|id| state.settled_usage.contains_key(*id))
            .copied()
            .collect())
    }
}

/// In-memory implementation of CreditStateLog
#[derive(Default)]
pub struct InMemoryStateLog {
    entries: Mutex<Vec<CreditStateEntry>>,
}

impl InMemoryStateLog {
    pub fn new() -> Self {
        Self::default()
    }

    // last inserted wins between equal timestamps
    fn latest_matching(
        &self,
        matches: impl Fn(&CreditStateEntry) -> bool,
    ) -> Option<CreditStateEntry> {
        self.entries
            .lock()
            .iter()
            .filter(|e| matches(*e))
            .fold(None, |latest: Option<&CreditStateEntry>, entry| match latest {
                Some(current) if current.event_at > entry.event_at => Some(current),
                _ => Some(entry),
            })
            .cloned()
    }

    /// Every entry recorded for an account, in insertion order
    pub fn entries(&self, account_id: &str) -> Vec<CreditStateEntry> {
        self.entries
            .lock()
            .iter()
            .filter(|e| e.account_id == account_id)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl CreditStateLog for InMemoryStateLog {
    async fn append(&self, entry: &CreditStateEntry) -> AppResult<()> {
        self.entries.lock().push(entry.clone());
        Ok(())
    }

    async fn latest(&self, account_id: &str) -> AppResult<Option<CreditStateEntry>> {
        Ok(self.latest_matching(|e| e.account_id == account_id))
    }

    async fn latest_in_state(
        &self,
        account_id: &str,
        state: CreditState,
    ) -> AppResult<Option<CreditStateEntry>> {
        Ok(self.latest_matching(|e| e.account_id == account_id && e.state == state))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use rust_decimal_macros::dec;

    fn seeded(remaining: &[Decimal]) -> InMemoryLedger {
        let ledger = InMemoryLedger::new();
        let base = Utc::now() - Duration::days(5);
        for (i, amount) in remaining.iter().enumerate() {
            ledger.seed(CreditGrant {
                id: i as i64 + 1,
                account_id: "acct".to_string(),
                code: format!("G{}", i + 1),
                original_amount: dec!(100),
                remaining_amount: *amount,
                created_at: base + Duration::hours(i as i64),
                expires_at: Utc::now() + Duration::days(30),
                updated_at: base,
            });
        }
        ledger
    }

    #[tokio::test]
    async fn test_settle_records_covered_usage() {
        let ledger = seeded(&[dec!(100), dec!(50), dec!(0)]);
        let charges = [
            UsageCharge { usage_id: 11, amount: dec!(70) },
            UsageCharge { usage_id: 12, amount: dec!(50) },
        ];

        let outcome = ledger
            .settle("acct", dec!(120), Utc::now(), &charges)
            .await
            .unwrap();

        assert_eq!(outcome.unsettled, Decimal::ZERO);
        assert_eq!(outcome.covered, vec![11, 12]);
        assert_eq!(ledger.grant(1).unwrap().remaining_amount, dec!(0));
        assert_eq!(ledger.grant(2).unwrap().remaining_amount, dec!(30));
        assert_eq!(ledger.grant(3).unwrap().remaining_amount, dec!(0));
        assert_eq!(
            ledger.settled_usage_ids(&[10, 12, 13]).await.unwrap(),
            HashSet::from([12])
        );
        assert!(ledger.settled_usage_ids(&[]).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_conflicting_settlement_rolls_back() {
        let ledger = seeded(&[dec!(40)]);
        let charge = [UsageCharge { usage_id: 5, amount: dec!(10) }];
        ledger.settle("acct", dec!(10), Utc::now(), &charge).await.unwrap();

        let err = ledger
            .settle("acct", dec!(10), Utc::now(), &charge)
            .await
            .unwrap_err();

        assert!(matches!(err, AppError::UsageAlreadySettled { usage_id: 5 }));
        assert_eq!(ledger.grant(1).unwrap().remaining_amount, dec!(30));
    }

    #[tokio::test]
    async fn test_failed_write_leaves_ledger_untouched() {
        let ledger = seeded(&[dec!(40)]);
        ledger.fail_writes(true);

        let err = ledger.settle("acct", dec!(10), Utc::now(), &[]).await.unwrap_err();
        assert!(err.is_retryable());
        assert_eq!(ledger.grant(1).unwrap().remaining_amount, dec!(40));
    }

    #[tokio::test]
    async fn test_insert_then_rebalance() {
        let ledger = seeded(&[dec!(-20)]);
        let inserted = ledger
            .insert_grant(&NewCreditGrant {
                account_id: "acct".to_string(),
                code: "NEW".to_string(),
                amount: dec!(50),
                expires_at: Utc::now() + Duration::days(10),
            })
            .await
            .unwrap();

        ledger.rebalance("acct").await.unwrap();

        assert_eq!(ledger.grant(1).unwrap().remaining_amount, dec!(0));
        assert_eq!(ledger.grant(inserted.id).unwrap().remaining_amount, dec!(30));
        assert!(ledger.rebalance("acct").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_zero_out_and_unapplied() {
        let ledger = seeded(&[dec!(25), dec!(5)]);
        assert_eq!(ledger.unapplied_balance("acct", Utc::now()).await.unwrap(), dec!(30));

        assert_eq!(ledger.zero_out("acct").await.unwrap(), 2);
        assert_eq!(ledger.unapplied_balance("acct", Utc::now()).await.unwrap(), dec!(0));
        assert_eq!(ledger.zero_out("acct").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_state_log_latest() {
        let log = InMemoryStateLog::new();
        let now = Utc::now();
        log.append(&CreditStateEntry::new("a", CreditState::Available, now))
            .await
            .unwrap();
        log.append(&CreditStateEntry::new("a", CreditState::Used, now - Duration::hours(1)))
            .await
            .unwrap();

        let latest = log.latest("a").await.unwrap().unwrap();
        assert_eq!(latest.state, CreditState::Available);
        let used = log.latest_in_state("a", CreditState::Used).await.unwrap().unwrap();
        assert_eq!(used.state, CreditState::Used);
        assert!(log.latest("b").await.unwrap().is_none());
    }
}
