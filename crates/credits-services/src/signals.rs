//! Credit signal scheduler
//!
//! Derives account-level credit signals from the ledger and publishes each
//! transition once. Two independent sweeps run over the accounts holding
//! credits: the usage sweep (used up, threshold reached, available) and the
//! expiry sweep (expired, expiring). Every emission is recorded in the
//! credit state log, which together with the account flags keeps repeated
//! ticks from signalling the same transition again.

use crate::drivers::DriverTable;
use crate::scheduler::PeriodicTask;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use credits_core::{
    config::CreditsConfig,
    models::{
        AccountFlagsUpdate, CloudAccount, CreditEvent, CreditGrant, CreditState,
        CreditStateEntry,
    },
    traits::{AccountDirectory, CreditStateLog, NotificationPublisher},
    AppResult,
};
use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

pub struct CreditSignalScheduler {
    drivers: Arc<DriverTable>,
    state_log: Arc<dyn CreditStateLog>,
    directory: Arc<dyn AccountDirectory>,
    publisher: Arc<dyn NotificationPublisher>,
    config: CreditsConfig,
}

impl CreditSignalScheduler {
    pub fn new(
        drivers: Arc<DriverTable>,
        state_log: Arc<dyn CreditStateLog>,
        directory: Arc<dyn AccountDirectory>,
        publisher: Arc<dyn NotificationPublisher>,
        config: CreditsConfig,
    ) -> Self {
        Self {
            drivers,
            state_log,
            directory,
            publisher,
            config,
        }
    }

    /// Usage sweep over every account holding credits
    ///
    /// # Returns
    ///
    /// Number of signals emitted. Per-account failures are logged and skipped.
    #[instrument(skip(self))]
    pub async fn usage_tick(&self, now: DateTime<Utc>) -> AppResult<usize> {
        let accounts = self.directory.accounts_with_credits().await?;
        let mut emitted = 0;
        for account in &accounts {
            match self.evaluate_usage(account, now).await {
                Ok(Some(_)) => emitted += 1,
                Ok(None) => {}
                Err(e) => warn!("Usage signal check failed for account {}: {}", account.id, e),
            }
        }
        debug!("Usage sweep checked {} accounts", accounts.len());
        Ok(emitted)
    }

    /// Expiry sweep over every account holding credits
    #[instrument(skip(self))]
    pub async fn expiry_tick(&self, now: DateTime<Utc>) -> AppResult<usize> {
        let accounts = self.directory.accounts_with_credits().await?;
        let mut emitted = 0;
        for account in &accounts {
            match self.evaluate_expiry(account, now).await {
                Ok(Some(_)) => emitted += 1,
                Ok(None) => {}
                Err(e) => warn!("Expiry signal check failed for account {}: {}", account.id, e),
            }
        }
        debug!("Expiry sweep checked {} accounts", accounts.len());
        Ok(emitted)
    }

    async fn grants(&self, account: &CloudAccount) -> AppResult<Vec<CreditGrant>> {
        self.drivers
            .backend(account.account_type)?
            .grants(&account.id)
            .await
    }

    /// Used up, threshold reached or available, in that order of precedence
    pub async fn evaluate_usage(
        &self,
        account: &CloudAccount,
        now: DateTime<Utc>,
    ) -> AppResult<Option<CreditState>> {
        let grants = self.grants(account).await?;
        let unapplied: Decimal = grants
            .iter()
            .filter(|g| g.is_active(now))
            .map(|g| g.remaining_amount)
            .sum();

        if unapplied <= Decimal::ZERO {
            if account.is_low_and_disallowed()
                || self.directory.has_payment_method(&account.id).await?
            {
                return Ok(None);
            }
            self.emit(account, CreditState::Used, now).await?;
            self.directory
                .update_flags(&account.id, &AccountFlagsUpdate::depleted(now))
                .await?;
            return Ok(Some(CreditState::Used));
        }

        let funded: Vec<&CreditGrant> = grants
            .iter()
            .filter(|g| g.is_active(now) && !g.remaining_amount.is_zero())
            .collect();
        let initial: Decimal = funded.iter().map(|g| g.original_amount).sum();
        let floor = self.config.threshold_floor(account.account_type, initial);

        if unapplied < floor {
            if account.low_credits {
                return Ok(None);
            }
            let mut signalled = None;
            if !self.directory.has_payment_method(&account.id).await? {
                self.emit(account, CreditState::ThresholdReached, now).await?;
                signalled = Some(CreditState::ThresholdReached);
            }
            self.directory
                .update_flags(&account.id, &AccountFlagsUpdate::low_credits(true))
                .await?;
            return Ok(signalled);
        }

        if account.low_credits {
            self.directory
                .update_flags(&account.id, &AccountFlagsUpdate::low_credits(false))
                .await?;
        }

        let Some(last_created) = grants.iter().map(|g| g.created_at).max() else {
            return Ok(None);
        };
        if account
            .credits_depleted_at
            .is_some_and(|depleted_at| depleted_at >= last_created)
        {
            return Ok(None);
        }
        if let Some(entry) = self
            .state_log
            .latest_in_state(&account.id, CreditState::Available)
            .await?
        {
            if entry.is_recent(CreditState::Available, last_created) {
                return Ok(None);
            }
        }

        self.emit(account, CreditState::Available, now).await?;
        self.directory
            .update_flags(
                &account.id,
                &AccountFlagsUpdate {
                    paid_services_allowed: Some(true),
                    ..Default::default()
                },
            )
            .await?;
        Ok(Some(CreditState::Available))
    }

    /// Expired or expiring, based on the latest expiry across all grants
    pub async fn evaluate_expiry(
        &self,
        account: &CloudAccount,
        now: DateTime<Utc>,
    ) -> AppResult<Option<CreditState>> {
        let grants = self.grants(account).await?;
        let Some(last_expiration) = grants.iter().map(|g| g.expires_at).max() else {
            return Ok(None);
        };

        if now > last_expiration {
            if account.is_low_and_disallowed()
                || self.directory.has_payment_method(&account.id).await?
            {
                return Ok(None);
            }
            self.emit(account, CreditState::Expired, now).await?;
            self.directory
                .update_flags(&account.id, &AccountFlagsUpdate::depleted(now))
                .await?;
            return Ok(Some(CreditState::Expired));
        }

        let window_start = last_expiration - self.config.expiry_notice(account.account_type);
        if now < window_start {
            return Ok(None);
        }
        if let Some(entry) = self
            .state_log
            .latest_in_state(&account.id, CreditState::Expiring)
            .await?
        {
            if entry.is_recent(CreditState::Expiring, window_start) {
                return Ok(None);
            }
        }

        self.emit(account, CreditState::Expiring, now).await?;
        Ok(Some(CreditState::Expiring))
    }

    /// Publish the signal, then record it in the state log
    ///
    /// A publish failure is only logged; the state is recorded regardless.
    async fn emit(&self, account: &CloudAccount, state: CreditState, now: DateTime<Utc>) -> AppResult<()> {
        let event = CreditEvent::for_state(&account.id, state)
            .with_property("account_type", account.account_type.to_string());

        match self.publisher.publish(&event).await {
            Ok(()) => info!("Published {} for account {}", event.event_name, account.id),
            Err(e) => warn!(
                "Failed to publish {} for account {}: {}",
                event.event_name, account.id, e
            ),
        }

        self.state_log
            .append(&CreditStateEntry::new(&account.id, state, now))
            .await
    }
}

/// Periodic usage signal sweep
pub struct UsageSignalSweep(pub Arc<CreditSignalScheduler>);

#[async_trait]
impl PeriodicTask for UsageSignalSweep {
    fn name(&self) -> &'static str {
        "usage-signals"
    }

    async fn tick(&self) -> AppResult<()> {
        self.0.usage_tick(Utc::now()).await.map(|_| ())
    }
}

/// Periodic expiry signal sweep
pub struct ExpirySignalSweep(pub Arc<CreditSignalScheduler>);

#[async_trait]
impl PeriodicTask for ExpirySignalSweep {
    fn name(&self) -> &'static str {
        "expiry-signals"
    }

    async fn tick(&self) -> AppResult<()> {
        self.0.expiry_tick(Utc::now()).await.map(|_| ())
    }
}
