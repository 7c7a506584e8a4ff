//! Credit grant repository implementation
//!
//! PostgreSQL-backed ledger. Settlement and rebalance lock the account's
//! grant rows with `SELECT ... FOR UPDATE` and write every change inside a
//! single transaction, which is the serialization point for concurrent
//! settlements of the same account.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use credits_core::{
    ledger::{cover_usage, plan_rebalance, plan_settlement},
    models::{CreditGrant, GrantUpdate, NewCreditGrant, SettlementOutcome, UsageCharge},
    traits::LedgerStore,
    AppError, AppResult,
};
use rust_decimal::Decimal;
use sqlx::{PgPool, Postgres, Transaction};
use std::collections::HashSet;
use tracing::{debug, error, info, instrument};

const GRANT_COLUMNS: &str = r#"
    id, account_id, code, original_amount, remaining_amount,
    created_at, expiry, updated_at
"#;

/// PostgreSQL implementation of LedgerStore
#[derive(Clone)]
pub struct PgLedgerStore {
    pool: PgPool,
}

impl PgLedgerStore {
    /// Create a new ledger store
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn begin(&self) -> AppResult<Transaction<'static, Postgres>> {
        self.pool.begin().await.map_err(|e| {
            error!("Failed to start transaction: {}", e);
            AppError::Transaction(format!("Failed to start transaction: {}", e))
        })
    }

    async fn commit(tx: Transaction<'static, Postgres>) -> AppResult<()> {
        tx.commit().await.map_err(|e| {
            error!("Failed to commit transaction: {}", e);
            AppError::Transaction(format!("Failed to commit transaction: {}", e))
        })
    }

    /// Write planned remaining amounts
    async fn write_updates(
        tx: &mut Transaction<'static, Postgres>,
        account_id: &str,
        updates: &[GrantUpdate],
    ) -> AppResult<()> {
        for update in updates {
            sqlx::query(
                r#"
                UPDATE credit_grants
                SET remaining_amount = $1,
                    updated_at = NOW()
                WHERE id = $2 AND account_id = $3
                "#,
            )
            .bind(update.remaining_amount)
            .bind(update.grant_id)
            .bind(account_id)
            .execute(&mut **tx)
            .await
            .map_err(|e| {
                error!("Failed to update credit grant {}: {}", update.grant_id, e);
                AppError::Database(format!("Failed to update credit grant: {}", e))
            })?;
        }
        Ok(())
    }
}

#[async_trait]
impl LedgerStore for PgLedgerStore {
    #[instrument(skip(self, grant), fields(account_id = %grant.account_id))]
    async fn insert_grant(&self, grant: &NewCreditGrant) -> AppResult<CreditGrant> {
        debug!("Inserting credit grant {} of {}", grant.code, grant.amount);

        let row = sqlx::query_as::<sqlx::Postgres, GrantRow>(&format!(
            r#"
            INSERT INTO credit_grants (
                account_id, code, original_amount, remaining_amount, expiry
            )
            VALUES ($1, $2, $3, $3, $4)
            RETURNING {}
            "#,
            GRANT_COLUMNS
        ))
        .bind(&grant.account_id)
        .bind(&grant.code)
        .bind(grant.amount)
        .bind(grant.expires_at)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            error!("Database error inserting credit grant: {}", e);
            AppError::Database(format!("Failed to insert credit grant: {}", e))
        })?;

        Ok(row.into())
    }

    #[instrument(skip(self))]
    async fn grants_for_account(&self, account_id: &str) -> AppResult<Vec<CreditGrant>> {
        let rows = sqlx::query_as::<sqlx::Postgres, GrantRow>(&format!(
            r#"
            SELECT {}
            FROM credit_grants
            WHERE account_id = $1
            ORDER BY created_at ASC, id ASC
            "#,
            GRANT_COLUMNS
        ))
        .bind(account_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            error!("Database error listing credit grants: {}", e);
            AppError::Database(format!("Failed to list credit grants: {}", e))
        })?;

        Ok(rows.into_iter().map(Into::into).collect())
    }

    #[instrument(skip(self))]
    async fn accounts_with_grants(&self) -> AppResult<Vec<String>> {
        sqlx::query_scalar::<sqlx::Postgres, String>(
            "SELECT DISTINCT account_id FROM credit_grants ORDER BY account_id",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            error!("Database error listing credited accounts: {}", e);
            AppError::Database(format!("Failed to list credited accounts: {}", e))
        })
    }

    #[instrument(skip(self, charges), fields(charges = charges.len()))]
    async fn settle(
        &self,
        account_id: &str,
        cost: Decimal,
        now: DateTime<Utc>,
        charges: &[UsageCharge],
    ) -> AppResult<SettlementOutcome> {
        let mut tx = self.begin().await?;

        // Lock eligible grants, oldest first
        let rows = sqlx::query_as::<sqlx::Postgres, GrantRow>(&format!(
            r#"
            SELECT {}
            FROM credit_grants
            WHERE account_id = $1
              AND (expiry >= $2 OR remaining_amount < 0)
            ORDER BY created_at ASC, id ASC
            FOR UPDATE
            "#,
            GRANT_COLUMNS
        ))
        .bind(account_id)
        .bind(now)
        .fetch_all(&mut *tx)
        .await
        .map_err(|e| {
            error!("Failed to lock credit grants: {}", e);
            AppError::Database(format!("Failed to lock credit grants: {}", e))
        })?;

        let grants: Vec<CreditGrant> = rows.into_iter().map(Into::into).collect();
        let plan = plan_settlement(&grants, cost)?;
        Self::write_updates(&mut tx, account_id, &plan.updates).await?;

        let coverage = cover_usage(charges, cost - plan.unsettled);
        for usage_id in &coverage.covered {
            sqlx::query("INSERT INTO settled_usage_ids (usage_id, account_id) VALUES ($1, $2)")
                .bind(*usage_id)
                .bind(account_id)
                .execute(&mut *tx)
                .await
                .map_err(|e| match e.as_database_error() {
                    Some(db) if db.is_unique_violation() => {
                        error!("Usage {} already settled, rolling back", usage_id);
                        AppError::UsageAlreadySettled {
                            usage_id: *usage_id,
                        }
                    }
                    _ => {
                        error!("Failed to record settled usage {}: {}", usage_id, e);
                        AppError::Database(format!("Failed to record settled usage: {}", e))
                    }
                })?;
        }

        Self::commit(tx).await?;

        info!(
            "Settled {} for account {} across {} grants, unsettled {}",
            cost,
            account_id,
            plan.updates.len(),
            plan.unsettled
        );

        Ok(SettlementOutcome {
            account_id: account_id.to_string(),
            cost,
            unsettled: plan.unsettled,
            updates: plan.updates,
            covered: coverage.covered,
            partial: coverage.partial,
        })
    }

    #[instrument(skip(self))]
    async fn rebalance(&self, account_id: &str) -> AppResult<Vec<GrantUpdate>> {
        let mut tx = self.begin().await?;

        let rows = sqlx::query_as::<sqlx::Postgres, GrantRow>(&format!(
            r#"
            SELECT {}
            FROM credit_grants
            WHERE account_id = $1
            ORDER BY created_at ASC, id ASC
            FOR UPDATE
            "#,
            GRANT_COLUMNS
        ))
        .bind(account_id)
        .fetch_all(&mut *tx)
        .await
        .map_err(|e| {
            error!("Failed to lock credit grants: {}", e);
            AppError::Database(format!("Failed to lock credit grants: {}", e))
        })?;

        let grants: Vec<CreditGrant> = rows.into_iter().map(Into::into).collect();
        let updates = plan_rebalance(&grants);
        Self::write_updates(&mut tx, account_id, &updates).await?;
        Self::commit(tx).await?;

        if !updates.is_empty() {
            info!("Rebalanced {} grants for account {}", updates.len(), account_id);
        }
        Ok(updates)
    }

    #[instrument(skip(self))]
    async fn unapplied_balance(&self, account_id: &str, now: DateTime<Utc>) -> AppResult<Decimal> {
        sqlx::query_scalar::<sqlx::Postgres, Decimal>(
            r#"
            SELECT COALESCE(SUM(remaining_amount), 0)
            FROM credit_grants
            WHERE account_id = $1 AND expiry > $2
            "#,
        )
        .bind(account_id)
        .bind(now)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            error!("Database error reading unapplied balance: {}", e);
            AppError::Database(format!("Failed to read unapplied balance: {}", e))
        })
    }

    #[instrument(skip(self))]
    async fn zero_out(&self, account_id: &str) -> AppResult<u64> {
        let result = sqlx::query(
            r#"
            UPDATE credit_grants
            SET remaining_amount = 0,
                updated_at = NOW()
            WHERE account_id = $1 AND remaining_amount <> 0
            "#,
        )
        .bind(account_id)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            error!("Database error zeroing credit grants: {}", e);
            AppError::Database(format!("Failed to zero credit grants: {}", e))
        })?;

        info!(
            "Zeroed {} credit grants for account {}",
            result.rows_affected(),
            account_id
        );
        Ok(result.rows_affected())
    }

    #[instrument(skip(self))]
    async fn settled_usage_ids(&self, usage_ids: &[i64]) -> AppResult<HashSet<i64>> {
        let ids = sqlx::query_scalar::<sqlx::Postgres, i64>(
            "SELECT usage_id FROM settled_usage_ids WHERE usage_id = ANY($1)",
        )
        .bind(usage_ids)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            error!("Database error reading settled usage ids: {}", e);
            AppError::Database(format!("Failed to read settled usage ids: {}", e))
        })?;

        Ok(ids.into_iter().collect())
    }
}

/// Row struct for database query
#[derive(Debug, sqlx::FromRow)]
struct GrantRow {
    id: i64,
    account_id: String,
    code: String,
    original_amount: Decimal,
    remaining_amount: Decimal,
    created_at: DateTime<Utc>,
    expiry: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<GrantRow> for CreditGrant {
    fn from(row: GrantRow) -> Self {
        CreditGrant {
            id: row.id,
            account_id: row.account_id,
            code: row.code,
            original_amount: row.original_amount,
            remaining_amount: row.remaining_amount,
            created_at: row.created_at,
            expires_at: row.expiry,
            updated_at: row.updated_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use rust_decimal_macros::dec;

    async fn store() -> PgLedgerStore {
        let url = std::env::var("DATABASE_URL")
            .unwrap_or_else(|_| "postgresql://localhost/cloud_credits".to_string());
        let pool = PgPool::connect(&url).await.unwrap();
        crate::pool::MIGRATOR.run(&pool).await.unwrap();
        PgLedgerStore::new(pool)
    }

    #[tokio::test]
    #[ignore] // Requires database
    async fn test_settle_and_rebalance_round() {
        let store = store().await;
        let account = format!("pg-test-{}", Utc::now().timestamp_nanos_opt().unwrap_or_default());
        let expires_at = Utc::now() + Duration::days(30);

        store
            .insert_grant(&NewCreditGrant {
                account_id: account.clone(),
                code: "A".to_string(),
                amount: dec!(10),
                expires_at,
            })
            .await
            .unwrap();

        let outcome = store.settle(&account, dec!(30), Utc::now(), &[]).await.unwrap();
        assert_eq!(outcome.unsettled, Decimal::ZERO);

        store
            .insert_grant(&NewCreditGrant {
                account_id: account.clone(),
                code: "B".to_string(),
                amount: dec!(50),
                expires_at,
            })
            .await
            .unwrap();
        store.rebalance(&account).await.unwrap();

        let grants = store.grants_for_account(&account).await.unwrap();
        assert_eq!(grants[0].remaining_amount, dec!(0));
        assert_eq!(grants[1].remaining_amount, dec!(30));
        assert_eq!(
            store.unapplied_balance(&account, Utc::now()).await.unwrap(),
            dec!(30)
        );
    }
}
