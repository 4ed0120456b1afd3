//! Postgres-backed job queue.
//!
//! Claims use `FOR UPDATE SKIP LOCKED` so concurrent workers never take the
//! same row. Every later transition locks the row, checks the claim guard and
//! applies the same state transition the in-memory store uses.
//!
//! ## Error Mapping
//!
//! | SQLx Error | JobStoreError |
//! |------------|---------------|
//! | Database (any code) | `Storage` with the operation name |
//! | PoolClosed | `Storage` |
//! | Row decode failure | `Storage` |

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Postgres, Row, Transaction};
use tracing::{Span, instrument};

use teachprompt_core::{JobId, LessonId, PromptId, UserId};
use teachprompt_scoring::ScoreResult;

use super::store::{JobStats, JobStore, JobStoreError, STALE_CLAIM_MESSAGE};
use super::types::{JobCompletion, JobStatus, NewJob, OptimizationJob, OptimizationMode, RetryPolicy};

const JOB_COLUMNS: &str = "id, prompt_id, prompt_text, requested_by, lesson_id, mode, status, output, \
     error_message, idempotency_key, retry_count, max_retries, claimed_by, retry_after, \
     original_score, optimized_score, improvement, tokens_used, created_at, updated_at";

/// Postgres job store. Cheap to clone.
#[derive(Debug, Clone)]
pub struct PostgresJobStore {
    pool: Arc<PgPool>,
    policy: RetryPolicy,
}

impl PostgresJobStore {
    pub fn new(pool: PgPool, policy: RetryPolicy) -> Self {
        Self {
            pool: Arc::new(pool),
            policy,
        }
    }

    async fn locked_transition(
        &self,
        operation: &str,
        job_id: JobId,
        worker_id: &str,
        apply: impl FnOnce(&mut OptimizationJob, DateTime<Utc>) + Send,
    ) -> Result<OptimizationJob, JobStoreError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))?;

        let row = sqlx::query(&format!(
            "SELECT {JOB_COLUMNS} FROM optimization_jobs WHERE id = $1 FOR UPDATE"
        ))
        .bind(job_id.as_uuid())
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error(operation, e))?;

        let Some(row) = row else {
            return Err(JobStoreError::NotFound(job_id));
        };
        let mut job = job_from_row(&row)?;

        if !job.is_claimed_by(worker_id) {
            tx.rollback().await.map_err(|e| map_sqlx_error("rollback", e))?;
            return Err(JobStoreError::NotClaimed {
                job_id,
                worker_id: worker_id.to_string(),
            });
        }

        apply(&mut job, Utc::now());
        write_back(&mut tx, &job, operation).await?;

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))?;

        Span::current().record("status", job.status.as_str());
        Ok(job)
    }
}

#[async_trait]
impl JobStore for PostgresJobStore {
    #[instrument(skip(self, job), fields(requested_by = %job.requested_by), err)]
    async fn enqueue(&self, job: NewJob) -> Result<(OptimizationJob, bool), JobStoreError> {
        let fresh = OptimizationJob::new(job, self.policy.max_retries(), Utc::now());

        let inserted = sqlx::query(&format!(
            r#"
            INSERT INTO optimization_jobs (
                id, prompt_id, prompt_text, requested_by, lesson_id, mode, status,
                idempotency_key, retry_count, max_retries, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, 'pending', $7, 0, $8, $9, $9)
            ON CONFLICT (idempotency_key) DO NOTHING
            RETURNING {JOB_COLUMNS}
            "#
        ))
        .bind(fresh.id.as_uuid())
        .bind(fresh.prompt_id.as_uuid())
        .bind(&fresh.prompt_text)
        .bind(fresh.requested_by.as_uuid())
        .bind(fresh.lesson_id.map(|l| *l.as_uuid()))
        .bind(fresh.mode.as_str())
        .bind(&fresh.idempotency_key)
        .bind(fresh.max_retries as i32)
        .bind(fresh.created_at)
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("enqueue", e))?;

        if let Some(row) = inserted {
            return Ok((job_from_row(&row)?, true));
        }

        let existing = sqlx::query(&format!(
            "SELECT {JOB_COLUMNS} FROM optimization_jobs WHERE idempotency_key = $1"
        ))
        .bind(&fresh.idempotency_key)
        .fetch_one(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("enqueue_lookup", e))?;

        Ok((job_from_row(&existing)?, false))
    }

    #[instrument(skip(self), fields(job_id = %job_id), err)]
    async fn get(&self, job_id: JobId) -> Result<Option<OptimizationJob>, JobStoreError> {
        let row = sqlx::query(&format!("SELECT {JOB_COLUMNS} FROM optimization_jobs WHERE id = $1"))
            .bind(job_id.as_uuid())
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("get", e))?;

        row.as_ref().map(job_from_row).transpose()
    }

    #[instrument(skip(self), fields(job_id), err)]
    async fn claim_next(&self, worker_id: &str) -> Result<Option<OptimizationJob>, JobStoreError> {
        let row = sqlx::query(&format!(
            r#"
            UPDATE optimization_jobs
            SET status = 'processing', claimed_by = $1, updated_at = now()
            WHERE id = (
                SELECT id FROM optimization_jobs
                WHERE status = 'pending'
                  AND retry_count < max_retries
                  AND (retry_after IS NULL OR retry_after <= now())
                ORDER BY created_at, id
                FOR UPDATE SKIP LOCKED
                LIMIT 1
            )
            AND status = 'pending'
            RETURNING {JOB_COLUMNS}
            "#
        ))
        .bind(worker_id)
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("claim_next", e))?;

        let job = row.as_ref().map(job_from_row).transpose()?;
        if let Some(job) = &job {
            Span::current().record("job_id", tracing::field::display(job.id));
        }
        Ok(job)
    }

    #[instrument(skip(self, completion), fields(job_id = %job_id, status), err)]
    async fn complete(
        &self,
        job_id: JobId,
        worker_id: &str,
        completion: JobCompletion,
    ) -> Result<OptimizationJob, JobStoreError> {
        self.locked_transition("complete", job_id, worker_id, |job, now| {
            job.mark_completed(completion, now)
        })
        .await
    }

    #[instrument(skip(self), fields(job_id = %job_id, status), err)]
    async fn fail_transient(
        &self,
        job_id: JobId,
        worker_id: &str,
        message: &str,
    ) -> Result<OptimizationJob, JobStoreError> {
        let policy = self.policy.clone();
        self.locked_transition("fail_transient", job_id, worker_id, move |job, now| {
            job.mark_transient_failure(message, &policy, now)
        })
        .await
    }

    #[instrument(skip(self), fields(job_id = %job_id, status), err)]
    async fn fail_permanent(
        &self,
        job_id: JobId,
        worker_id: &str,
        message: &str,
    ) -> Result<OptimizationJob, JobStoreError> {
        self.locked_transition("fail_permanent", job_id, worker_id, |job, now| {
            job.mark_permanent_failure(message, now)
        })
        .await
    }

    #[instrument(skip(self), err)]
    async fn find_pending_for_processing(&self, limit: usize) -> Result<Vec<OptimizationJob>, JobStoreError> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {JOB_COLUMNS} FROM optimization_jobs
            WHERE status = 'pending'
              AND retry_count < max_retries
              AND (retry_after IS NULL OR retry_after <= now())
            ORDER BY created_at, id
            LIMIT $1
            "#
        ))
        .bind(limit as i64)
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("find_pending_for_processing", e))?;

        rows.iter().map(job_from_row).collect()
    }

    #[instrument(skip(self), fields(requeued), err)]
    async fn requeue_stale(&self, cutoff: DateTime<Utc>) -> Result<Vec<JobId>, JobStoreError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))?;

        let rows = sqlx::query(&format!(
            r#"
            SELECT {JOB_COLUMNS} FROM optimization_jobs
            WHERE status = 'processing' AND updated_at < $1
            FOR UPDATE SKIP LOCKED
            "#
        ))
        .bind(cutoff)
        .fetch_all(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("requeue_stale", e))?;

        let now = Utc::now();
        let mut requeued = Vec::with_capacity(rows.len());
        for row in &rows {
            let mut job = job_from_row(row)?;
            job.mark_transient_failure(STALE_CLAIM_MESSAGE, &self.policy, now);
            write_back(&mut tx, &job, "requeue_stale").await?;
            requeued.push(job.id);
        }

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))?;

        Span::current().record("requeued", requeued.len());
        Ok(requeued)
    }

    #[instrument(skip(self), err)]
    async fn stats(&self) -> Result<JobStats, JobStoreError> {
        let rows = sqlx::query("SELECT status, COUNT(*) AS total FROM optimization_jobs GROUP BY status")
            .fetch_all(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("stats", e))?;

        let mut stats = JobStats::default();
        for row in rows {
            let status: String = row.try_get("status").map_err(|e| decode_error("status", e))?;
            let total: i64 = row.try_get("total").map_err(|e| decode_error("total", e))?;
            let total = total.max(0) as u64;
            match JobStatus::parse(&status).map_err(|e| JobStoreError::Storage(e.to_string()))? {
                JobStatus::Pending => stats.pending = total,
                JobStatus::Processing => stats.processing = total,
                JobStatus::Completed => stats.completed = total,
                JobStatus::Failed => stats.failed = total,
            }
        }
        Ok(stats)
    }
}

/// Persist every mutable column of a job inside the caller's transaction.
async fn write_back(
    tx: &mut Transaction<'_, Postgres>,
    job: &OptimizationJob,
    operation: &str,
) -> Result<(), JobStoreError> {
    let original_score = job.original_score.as_ref().map(score_to_json).transpose()?;
    let optimized_score = job.optimized_score.as_ref().map(score_to_json).transpose()?;

    sqlx::query(
        r#"
        UPDATE optimization_jobs
        SET status = $2,
            output = $3,
            error_message = $4,
            retry_count = $5,
            claimed_by = $6,
            retry_after = $7,
            original_score = $8,
            optimized_score = $9,
            improvement = $10,
            tokens_used = $11,
            updated_at = $12
        WHERE id = $1
        "#,
    )
    .bind(job.id.as_uuid())
    .bind(job.status.as_str())
    .bind(&job.output)
    .bind(&job.error_message)
    .bind(job.retry_count as i32)
    .bind(&job.claimed_by)
    .bind(job.retry_after)
    .bind(original_score)
    .bind(optimized_score)
    .bind(job.improvement)
    .bind(job.tokens_used.map(|t| t as i64))
    .bind(job.updated_at)
    .execute(&mut **tx)
    .await
    .map_err(|e| map_sqlx_error(operation, e))?;

    Ok(())
}

fn score_to_json(score: &ScoreResult) -> Result<serde_json::Value, JobStoreError> {
    serde_json::to_value(score).map_err(|e| JobStoreError::Storage(format!("failed to encode score: {e}")))
}

fn score_from_json(value: Option<serde_json::Value>) -> Result<Option<ScoreResult>, JobStoreError> {
    value
        .map(serde_json::from_value)
        .transpose()
        .map_err(|e| JobStoreError::Storage(format!("failed to decode score: {e}")))
}

fn decode_error(column: &str, err: sqlx::Error) -> JobStoreError {
    JobStoreError::Storage(format!("failed to read {column}: {err}"))
}

fn job_from_row(row: &PgRow) -> Result<OptimizationJob, JobStoreError> {
    let get_uuid = |col: &str| -> Result<uuid::Uuid, JobStoreError> { row.try_get(col).map_err(|e| decode_error(col, e)) };

    let mode: String = row.try_get("mode").map_err(|e| decode_error("mode", e))?;
    let status: String = row.try_get("status").map_err(|e| decode_error("status", e))?;
    let lesson_id: Option<uuid::Uuid> = row.try_get("lesson_id").map_err(|e| decode_error("lesson_id", e))?;
    let retry_count: i32 = row.try_get("retry_count").map_err(|e| decode_error("retry_count", e))?;
    let max_retries: i32 = row.try_get("max_retries").map_err(|e| decode_error("max_retries", e))?;
    let tokens_used: Option<i64> = row.try_get("tokens_used").map_err(|e| decode_error("tokens_used", e))?;

    Ok(OptimizationJob {
        id: JobId::from_uuid(get_uuid("id")?),
        prompt_id: PromptId::from_uuid(get_uuid("prompt_id")?),
        prompt_text: row.try_get("prompt_text").map_err(|e| decode_error("prompt_text", e))?,
        requested_by: UserId::from_uuid(get_uuid("requested_by")?),
        lesson_id: lesson_id.map(LessonId::from_uuid),
        mode: OptimizationMode::parse(&mode).map_err(|e| JobStoreError::Storage(e.to_string()))?,
        status: JobStatus::parse(&status).map_err(|e| JobStoreError::Storage(e.to_string()))?,
        output: row.try_get("output").map_err(|e| decode_error("output", e))?,
        error_message: row.try_get("error_message").map_err(|e| decode_error("error_message", e))?,
        idempotency_key: row
            .try_get("idempotency_key")
            .map_err(|e| decode_error("idempotency_key", e))?,
        retry_count: retry_count.max(0) as u32,
        max_retries: max_retries.max(1) as u32,
        claimed_by: row.try_get("claimed_by").map_err(|e| decode_error("claimed_by", e))?,
        retry_after: row.try_get("retry_after").map_err(|e| decode_error("retry_after", e))?,
        original_score: score_from_json(
            row.try_get("original_score")
                .map_err(|e| decode_error("original_score", e))?,
        )?,
        optimized_score: score_from_json(
            row.try_get("optimized_score")
                .map_err(|e| decode_error("optimized_score", e))?,
        )?,
        improvement: row.try_get("improvement").map_err(|e| decode_error("improvement", e))?,
        tokens_used: tokens_used.map(|t| t.max(0) as u64),
        created_at: row.try_get("created_at").map_err(|e| decode_error("created_at", e))?,
        updated_at: row.try_get("updated_at").map_err(|e| decode_error("updated_at", e))?,
    })
}

/// Map SQLx errors to JobStoreError.
fn map_sqlx_error(operation: &str, err: sqlx::Error) -> JobStoreError {
    match err {
        sqlx::Error::Database(db_err) => JobStoreError::Storage(format!(
            "database error in {} ({}): {}",
            operation,
            db_err.code().as_deref().unwrap_or("unknown"),
            db_err.message()
        )),
        sqlx::Error::PoolClosed => JobStoreError::Storage(format!("connection pool closed in {operation}")),
        _ => JobStoreError::Storage(format!("sqlx error in {operation}: {err}")),
    }
}
