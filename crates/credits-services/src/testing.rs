//! Test doubles for the external collaborators

use async_trait::async_trait;
use chrono::{Duration, Utc};
use credits_core::{
    models::{
        AccountCreditSummary, AccountFlagsUpdate, AccountType, CloudAccount, CreditEvent,
        CreditGrant, NewCreditGrant, UsageSettlementRecord,
    },
    traits::{
        AccountDirectory, BillingBackend, NotificationPublisher, RateResolver, UsageSource,
        UsageStream,
    },
    AppError, AppResult,
};
use credits_db::InMemoryLedger;
use futures::stream;
use parking_lot::Mutex;
use rust_decimal::Decimal;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

pub const ACCOUNT: &str = "acct-1";

/// Grant of `ACCOUNT` created `order` hours after a fixed base, valid for 30 days
pub fn grant(id: i64, remaining: Decimal, order: i64) -> CreditGrant {
    let base = Utc::now() - Duration::days(10);
    CreditGrant {
        id,
        account_id: ACCOUNT.to_string(),
        code: format!("COUPON-{}", id),
        original_amount: remaining.max(Decimal::from(100)),
        remaining_amount: remaining,
        created_at: base + Duration::hours(order),
        expires_at: Utc::now() + Duration::days(30),
        updated_at: base,
    }
}

pub fn ledger_with(grants: &[CreditGrant]) -> Arc<InMemoryLedger> {
    let ledger = Arc::new(InMemoryLedger::new());
    for g in grants {
        ledger.seed(g.clone());
    }
    ledger
}

#[derive(Default)]
pub struct MockDirectory {
    accounts: Mutex<HashMap<String, CloudAccount>>,
    payment_methods: Mutex<HashSet<String>>,
    pub updates: Mutex<Vec<(String, AccountFlagsUpdate)>>,
}

impl MockDirectory {
    pub fn with(accounts: Vec<CloudAccount>) -> Arc<Self> {
        let directory = Self::default();
        {
            let mut map = directory.accounts.lock();
            for account in accounts {
                map.insert(account.id.clone(), account);
            }
        }
        Arc::new(directory)
    }

    pub fn add_payment_method(&self, account_id: &str) {
        self.payment_methods.lock().insert(account_id.to_string());
    }

    pub fn account(&self, account_id: &str) -> CloudAccount {
        self.accounts.lock()[account_id].clone()
    }
}

#[async_trait]
impl AccountDirectory for MockDirectory {
    async fn get_account(&self, account_id: &str) -> AppResult<CloudAccount> {
        self.accounts
            .lock()
            .get(account_id)
            .cloned()
            .ok_or_else(|| AppError::AccountNotFound(account_id.to_string()))
    }

    async fn accounts_with_credits(&self) -> AppResult<Vec<CloudAccount>> {
        let mut accounts: Vec<CloudAccount> = self.accounts.lock().values().cloned().collect();
        accounts.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(accounts)
    }

    async fn update_flags(&self, account_id: &str, update: &AccountFlagsUpdate) -> AppResult<()> {
        let mut accounts = self.accounts.lock();
        let account = accounts
            .get_mut(account_id)
            .ok_or_else(|| AppError::AccountNotFound(account_id.to_string()))?;
        account.apply(update);
        self.updates
            .lock()
            .push((account_id.to_string(), update.clone()));
        Ok(())
    }

    async fn has_payment_method(&self, account_id: &str) -> AppResult<bool> {
        Ok(self.payment_methods.lock().contains(account_id))
    }
}

#[derive(Default)]
pub struct FixedRates {
    rates: HashMap<String, Decimal>,
}

impl FixedRates {
    pub fn with(rates: &[(&str, Decimal)]) -> Arc<Self> {
        Arc::new(Self {
            rates: rates
                .iter()
                .map(|(product, rate)| (product.to_string(), *rate))
                .collect(),
        })
    }
}

#[async_trait]
impl RateResolver for FixedRates {
    async fn resolve_rate(&self, product_id: &str, _account_type: AccountType) -> AppResult<Decimal> {
        self.rates
            .get(product_id)
            .copied()
            .ok_or_else(|| AppError::RateNotFound(product_id.to_string()))
    }
}

#[derive(Default)]
pub struct RecordingPublisher {
    pub events: Mutex<Vec<CreditEvent>>,
    fail: AtomicBool,
}

impl RecordingPublisher {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn fail(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub fn names(&self) -> Vec<String> {
        self.events.lock().iter().map(|e| e.event_name.clone()).collect()
    }
}

#[async_trait]
impl NotificationPublisher for RecordingPublisher {
    async fn publish(&self, event: &CreditEvent) -> AppResult<()> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(AppError::Publish("gateway down".to_string()));
        }
        self.events.lock().push(event.clone());
        Ok(())
    }
}

/// Usage source replaying fixed batches per account type
#[derive(Default)]
pub struct ScriptedUsage {
    batches: Mutex<HashMap<AccountType, Vec<UsageSettlementRecord>>>,
    pub settled: Mutex<Vec<i64>>,
    pub partial: Mutex<Vec<(i64, Decimal)>>,
}

impl ScriptedUsage {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn push(&self, account_type: AccountType, records: Vec<UsageSettlementRecord>) {
        self.batches.lock().insert(account_type, records);
    }
}

#[async_trait]
impl UsageSource for ScriptedUsage {
    async fn unreported_usage(&self, account_type: AccountType) -> AppResult<UsageStream> {
        let records = self
            .batches
            .lock()
            .remove(&account_type)
            .unwrap_or_default();
        Ok(Box::pin(stream::iter(records.into_iter().map(Ok))))
    }

    async fn ack_settled(&self, usage_ids: &[i64]) -> AppResult<()> {
        self.settled.lock().extend_from_slice(usage_ids);
        Ok(())
    }

    async fn ack_partial(&self, usage_id: i64, remaining_quantity: Decimal) -> AppResult<()> {
        self.partial.lock().push((usage_id, remaining_quantity));
        Ok(())
    }
}

pub fn usage(usage_id: i64, account_id: &str, product: &str, quantity: Decimal) -> UsageSettlementRecord {
    UsageSettlementRecord {
        usage_id,
        account_id: account_id.to_string(),
        product_id: product.to_string(),
        unreported_quantity: quantity,
        rate: None,
        reported: false,
    }
}

/// Backend that applies an install and then reports a failure
pub struct LostReplyBackend {
    pub inner: Arc<dyn BillingBackend>,
}

#[async_trait]
impl BillingBackend for LostReplyBackend {
    fn name(&self) -> &'static str {
        "lost-reply"
    }

    async fn grants(&self, account_id: &str) -> AppResult<Vec<CreditGrant>> {
        self.inner.grants(account_id).await
    }

    async fn credit_summary(&self, account_id: &str) -> AppResult<AccountCreditSummary> {
        self.inner.credit_summary(account_id).await
    }

    async fn unapplied_balance(&self, account_id: &str) -> AppResult<Decimal> {
        self.inner.unapplied_balance(account_id).await
    }

    async fn install_credit(&self, grant: &NewCreditGrant) -> AppResult<()> {
        self.inner.install_credit(grant).await?;
        Err(AppError::UpstreamTimeout("reply lost".to_string()))
    }

    async fn zero_out(&self, account_id: &str) -> AppResult<()> {
        self.inner.zero_out(account_id).await
    }
}
