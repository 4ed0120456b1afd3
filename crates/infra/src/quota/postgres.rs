//! Postgres-backed quota ledger.
//!
//! Each reservation runs in one transaction that locks the account row and,
//! for school-scoped accounts, the pool row (always in that order). The pure
//! reserve rules run on the locked snapshot and the rows are written back
//! only if something changed.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Datelike, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Postgres, Row, Transaction};
use tracing::instrument;

use teachprompt_core::{SchoolId, UserId};
use teachprompt_quota::{
    BillingPeriod, QuotaAccount, QuotaCounter, QuotaError, QuotaKind, QuotaLedger, Reservation, ReservationCost,
    SchoolSubscriptionPool, reserve,
};

const ACCOUNT_COLUMNS: &str = "user_id, testing_limit, testing_remaining, optimization_limit, \
     optimization_remaining, token_limit, tokens_remaining, school_id, reset_date, period_days, anchor_day";

const POOL_COLUMNS: &str = "school_id, token_limit, tokens_remaining, reset_date, period_days, anchor_day";

#[derive(Debug, Clone)]
pub struct PostgresQuotaLedger {
    pool: Arc<PgPool>,
}

impl PostgresQuotaLedger {
    pub fn new(pool: PgPool) -> Self {
        Self { pool: Arc::new(pool) }
    }

    async fn begin(&self) -> Result<Transaction<'static, Postgres>, QuotaError> {
        self.pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))
    }
}

#[async_trait]
impl QuotaLedger for PostgresQuotaLedger {
    #[instrument(skip(self), fields(user_id = %user_id, kind = ?kind), err)]
    async fn check_and_reserve(
        &self,
        user_id: UserId,
        kind: QuotaKind,
        cost: ReservationCost,
        now: DateTime<Utc>,
    ) -> Result<Reservation, QuotaError> {
        let mut tx = self.begin().await?;

        let mut account = lock_account(&mut tx, user_id).await?;
        let mut reset = account.reset_if_due(now);

        let (result, pool) = match account.school_id {
            Some(school_id) => {
                let mut pool = lock_pool(&mut tx, school_id).await?;
                reset |= pool.reset_if_due(now);
                let result = reserve(&mut account, Some(&mut pool), kind, cost, now);
                (result, Some(pool))
            }
            None => (reserve(&mut account, None, kind, cost, now), None),
        };

        // A due reset is persisted even when the reservation itself is refused.
        if reset || result.is_ok() {
            write_account(&mut tx, &account).await?;
            if let Some(pool) = &pool {
                write_pool(&mut tx, pool).await?;
            }
            tx.commit().await.map_err(|e| map_sqlx_error("commit_transaction", e))?;
        } else {
            tx.rollback().await.map_err(|e| map_sqlx_error("rollback", e))?;
        }

        Ok(result?)
    }

    #[instrument(skip(self), fields(user_id = %user_id), err)]
    async fn reset_if_due(&self, user_id: UserId, now: DateTime<Utc>) -> Result<bool, QuotaError> {
        let mut tx = self.begin().await?;

        let mut account = lock_account(&mut tx, user_id).await?;
        let account_reset = account.reset_if_due(now);
        if account_reset {
            write_account(&mut tx, &account).await?;
        }

        let mut pool_reset = false;
        if let Some(school_id) = account.school_id {
            let mut pool = lock_pool(&mut tx, school_id).await?;
            pool_reset = pool.reset_if_due(now);
            if pool_reset {
                write_pool(&mut tx, &pool).await?;
            }
        }

        tx.commit().await.map_err(|e| map_sqlx_error("commit_transaction", e))?;
        Ok(account_reset || pool_reset)
    }

    async fn account(&self, user_id: UserId) -> Result<QuotaAccount, QuotaError> {
        let row = sqlx::query(&format!("SELECT {ACCOUNT_COLUMNS} FROM quota_accounts WHERE user_id = $1"))
            .bind(user_id.as_uuid())
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("account", e))?
            .ok_or(QuotaError::AccountNotFound(user_id))?;
        account_from_row(&row)
    }

    async fn pool(&self, school_id: SchoolId) -> Result<SchoolSubscriptionPool, QuotaError> {
        let row = sqlx::query(&format!(
            "SELECT {POOL_COLUMNS} FROM school_subscription_pools WHERE school_id = $1"
        ))
        .bind(school_id.as_uuid())
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("pool", e))?
        .ok_or(QuotaError::PoolNotFound(school_id))?;
        pool_from_row(&row)
    }

    #[instrument(skip(self, account), fields(user_id = %account.user_id), err)]
    async fn upsert_account(&self, account: QuotaAccount) -> Result<(), QuotaError> {
        let tokens = account.individual_tokens;
        sqlx::query(
            r#"
            INSERT INTO quota_accounts (
                user_id, testing_limit, testing_remaining, optimization_limit, optimization_remaining,
                token_limit, tokens_remaining, school_id, reset_date, period_days, anchor_day
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            ON CONFLICT (user_id) DO UPDATE SET
                testing_limit = EXCLUDED.testing_limit,
                testing_remaining = EXCLUDED.testing_remaining,
                optimization_limit = EXCLUDED.optimization_limit,
                optimization_remaining = EXCLUDED.optimization_remaining,
                token_limit = EXCLUDED.token_limit,
                tokens_remaining = EXCLUDED.tokens_remaining,
                school_id = EXCLUDED.school_id,
                reset_date = EXCLUDED.reset_date,
                period_days = EXCLUDED.period_days,
                anchor_day = EXCLUDED.anchor_day,
                updated_at = now()
            "#,
        )
        .bind(account.user_id.as_uuid())
        .bind(to_db(account.testing.limit))
        .bind(to_db(account.testing.remaining))
        .bind(to_db(account.optimization.limit))
        .bind(to_db(account.optimization.remaining))
        .bind(tokens.map(|t| to_db(t.limit)))
        .bind(tokens.map(|t| to_db(t.remaining)))
        .bind(account.school_id.map(|s| *s.as_uuid()))
        .bind(account.reset_date)
        .bind(period_to_db(account.period))
        .bind(anchor_to_db(account.anchor_day))
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("upsert_account", e))?;
        Ok(())
    }

    #[instrument(skip(self, pool), fields(school_id = %pool.school_id), err)]
    async fn upsert_pool(&self, pool: SchoolSubscriptionPool) -> Result<(), QuotaError> {
        sqlx::query(
            r#"
            INSERT INTO school_subscription_pools (
                school_id, token_limit, tokens_remaining, reset_date, period_days, anchor_day
            )
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (school_id) DO UPDATE SET
                token_limit = EXCLUDED.token_limit,
                tokens_remaining = EXCLUDED.tokens_remaining,
                reset_date = EXCLUDED.reset_date,
                period_days = EXCLUDED.period_days,
                anchor_day = EXCLUDED.anchor_day,
                updated_at = now()
            "#,
        )
        .bind(pool.school_id.as_uuid())
        .bind(to_db(pool.tokens.limit))
        .bind(to_db(pool.tokens.remaining))
        .bind(pool.reset_date)
        .bind(period_to_db(pool.period))
        .bind(anchor_to_db(pool.anchor_day))
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("upsert_pool", e))?;
        Ok(())
    }
}

async fn lock_account(tx: &mut Transaction<'_, Postgres>, user_id: UserId) -> Result<QuotaAccount, QuotaError> {
    let row = sqlx::query(&format!(
        "SELECT {ACCOUNT_COLUMNS} FROM quota_accounts WHERE user_id = $1 FOR UPDATE"
    ))
    .bind(user_id.as_uuid())
    .fetch_optional(&mut **tx)
    .await
    .map_err(|e| map_sqlx_error("lock_account", e))?
    .ok_or(QuotaError::AccountNotFound(user_id))?;
    account_from_row(&row)
}

async fn lock_pool(
    tx: &mut Transaction<'_, Postgres>,
    school_id: SchoolId,
) -> Result<SchoolSubscriptionPool, QuotaError> {
    let row = sqlx::query(&format!(
        "SELECT {POOL_COLUMNS} FROM school_subscription_pools WHERE school_id = $1 FOR UPDATE"
    ))
    .bind(school_id.as_uuid())
    .fetch_optional(&mut **tx)
    .await
    .map_err(|e| map_sqlx_error("lock_pool", e))?
    .ok_or(QuotaError::PoolNotFound(school_id))?;
    pool_from_row(&row)
}

async fn write_account(tx: &mut Transaction<'_, Postgres>, account: &QuotaAccount) -> Result<(), QuotaError> {
    sqlx::query(
        r#"
        UPDATE quota_accounts
        SET testing_remaining = $2,
            optimization_remaining = $3,
            tokens_remaining = $4,
            reset_date = $5,
            updated_at = now()
        WHERE user_id = $1
        "#,
    )
    .bind(account.user_id.as_uuid())
    .bind(to_db(account.testing.remaining))
    .bind(to_db(account.optimization.remaining))
    .bind(account.individual_tokens.map(|t| to_db(t.remaining)))
    .bind(account.reset_date)
    .execute(&mut **tx)
    .await
    .map_err(|e| map_sqlx_error("write_account", e))?;
    Ok(())
}

async fn write_pool(tx: &mut Transaction<'_, Postgres>, pool: &SchoolSubscriptionPool) -> Result<(), QuotaError> {
    sqlx::query(
        r#"
        UPDATE school_subscription_pools
        SET tokens_remaining = $2, reset_date = $3, updated_at = now()
        WHERE school_id = $1
        "#,
    )
    .bind(pool.school_id.as_uuid())
    .bind(to_db(pool.tokens.remaining))
    .bind(pool.reset_date)
    .execute(&mut **tx)
    .await
    .map_err(|e| map_sqlx_error("write_pool", e))?;
    Ok(())
}

fn to_db(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

fn from_db(value: i64) -> u64 {
    value.max(0) as u64
}

fn period_to_db(period: BillingPeriod) -> Option<i32> {
    match period {
        BillingPeriod::Monthly => None,
        BillingPeriod::Days(n) => Some(i32::try_from(n.max(1)).unwrap_or(i32::MAX)),
    }
}

fn period_from_db(days: Option<i32>) -> BillingPeriod {
    match days {
        None => BillingPeriod::Monthly,
        Some(n) => BillingPeriod::Days(n.max(1) as u32),
    }
}

fn anchor_to_db(day: u32) -> i16 {
    day.clamp(1, 31) as i16
}

/// Rows written before the anchor column existed fall back to the reset day.
fn anchor_from_db(day: Option<i16>, reset_date: DateTime<Utc>) -> u32 {
    match day {
        Some(d) => u32::try_from(d).unwrap_or(1).clamp(1, 31),
        None => reset_date.day(),
    }
}

fn decode_error(column: &str, err: sqlx::Error) -> QuotaError {
    QuotaError::Storage(format!("failed to read {column}: {err}"))
}

fn column<'r, T>(row: &'r PgRow, name: &str) -> Result<T, QuotaError>
where
    T: sqlx::Decode<'r, Postgres> + sqlx::Type<Postgres>,
{
    row.try_get(name).map_err(|e| decode_error(name, e))
}

fn account_from_row(row: &PgRow) -> Result<QuotaAccount, QuotaError> {
    let token_limit: Option<i64> = column(row, "token_limit")?;
    let tokens_remaining: Option<i64> = column(row, "tokens_remaining")?;
    let school_id: Option<uuid::Uuid> = column(row, "school_id")?;
    let reset_date: DateTime<Utc> = column(row, "reset_date")?;

    Ok(QuotaAccount {
        user_id: UserId::from_uuid(column(row, "user_id")?),
        testing: QuotaCounter::with_remaining(
            from_db(column(row, "testing_limit")?),
            from_db(column(row, "testing_remaining")?),
        ),
        optimization: QuotaCounter::with_remaining(
            from_db(column(row, "optimization_limit")?),
            from_db(column(row, "optimization_remaining")?),
        ),
        individual_tokens: token_limit
            .map(|limit| QuotaCounter::with_remaining(from_db(limit), from_db(tokens_remaining.unwrap_or(limit)))),
        school_id: school_id.map(SchoolId::from_uuid),
        reset_date,
        period: period_from_db(column(row, "period_days")?),
        anchor_day: anchor_from_db(column(row, "anchor_day")?, reset_date),
    })
}

fn pool_from_row(row: &PgRow) -> Result<SchoolSubscriptionPool, QuotaError> {
    let reset_date: DateTime<Utc> = column(row, "reset_date")?;

    Ok(SchoolSubscriptionPool {
        school_id: SchoolId::from_uuid(column(row, "school_id")?),
        tokens: QuotaCounter::with_remaining(
            from_db(column(row, "token_limit")?),
            from_db(column(row, "tokens_remaining")?),
        ),
        reset_date,
        period: period_from_db(column(row, "period_days")?),
        anchor_day: anchor_from_db(column(row, "anchor_day")?, reset_date),
    })
}

/// Map SQLx errors to QuotaError. Every database failure is a storage error,
/// which the dispatcher treats as transient.
fn map_sqlx_error(operation: &str, err: sqlx::Error) -> QuotaError {
    match err {
        sqlx::Error::Database(db_err) => QuotaError::Storage(format!(
            "database error in {} ({}): {}",
            operation,
            db_err.code().as_deref().unwrap_or("unknown"),
            db_err.message()
        )),
        sqlx::Error::PoolClosed => QuotaError::Storage(format!("connection pool closed in {operation}")),
        _ => QuotaError::Storage(format!("sqlx error in {operation}: {err}")),
    }
}
