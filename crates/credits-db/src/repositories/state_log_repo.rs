//! Credit state log repository implementation

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use credits_core::{
    models::{CreditState, CreditStateEntry},
    traits::CreditStateLog,
    AppError, AppResult,
};
use sqlx::PgPool;
use tracing::{debug, error, instrument, warn};

/// PostgreSQL implementation of CreditStateLog
#[derive(Clone)]
pub struct PgCreditStateLog {
    pool: PgPool,
}

impl PgCreditStateLog {
    /// Create a new state log repository
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl CreditStateLog for PgCreditStateLog {
    #[instrument(skip(self, entry), fields(account_id = %entry.account_id, state = %entry.state))]
    async fn append(&self, entry: &CreditStateEntry) -> AppResult<()> {
        sqlx::query(
            r#"
            INSERT INTO credits_state_log (account_id, state, event_at, updated_at)
            VALUES ($1, $2, $3, $4)
            "#,
        )
        .bind(&entry.account_id)
        .bind(entry.state.to_string())
        .bind(entry.event_at)
        .bind(entry.updated_at)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            error!("Database error appending credit state: {}", e);
            AppError::Database(format!("Failed to append credit state: {}", e))
        })?;

        debug!("Recorded credit state {}", entry.state);
        Ok(())
    }

    #[instrument(skip(self))]
    async fn latest(&self, account_id: &str) -> AppResult<Option<CreditStateEntry>> {
        let row = sqlx::query_as::<sqlx::Postgres, StateRow>(
            r#"
            SELECT account_id, state, event_at, updated_at
            FROM credits_state_log
            WHERE account_id = $1
            ORDER BY event_at DESC, id DESC
            LIMIT 1
            "#,
        )
        .bind(account_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            error!("Database error reading credit state: {}", e);
            AppError::Database(format!("Failed to read credit state: {}", e))
        })?;

        Ok(row.and_then(StateRow::into_entry))
    }

    #[instrument(skip(self))]
    async fn latest_in_state(
        &self,
        account_id: &str,
        state: CreditState,
    ) -> AppResult<Option<CreditStateEntry>> {
        let row = sqlx::query_as::<sqlx::Postgres, StateRow>(
            r#"
            SELECT account_id, state, event_at, updated_at
            FROM credits_state_log
            WHERE account_id = $1 AND state = $2
            ORDER BY event_at DESC, id DESC
            LIMIT 1
            "#,
        )
        .bind(account_id)
        .bind(state.to_string())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            error!("Database error reading credit state {}: {}", state, e);
            AppError::Database(format!("Failed to read credit state: {}", e))
        })?;

        Ok(row.and_then(StateRow::into_entry))
    }
}

/// Row struct for database query
#[derive(Debug, sqlx::FromRow)]
struct StateRow {
    account_id: String,
    state: String,
    event_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl StateRow {
    fn into_entry(self) -> Option<CreditStateEntry> {
        let Some(state) = CreditState::from_str(&self.state) else {
            warn!("Unknown credit state '{}' for account {}", self.state, self.account_id);
            return None;
        };
        Some(CreditStateEntry {
            account_id: self.account_id,
            state,
            event_at: self.event_at,
            updated_at: self.updated_at,
        })
    }
}
