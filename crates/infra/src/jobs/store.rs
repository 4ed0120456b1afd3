//! Job storage abstraction and the in-memory store.

use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockWriteGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use teachprompt_core::JobId;

use super::types::{JobCompletion, JobStatus, NewJob, OptimizationJob, RetryPolicy};

/// Durable queue of optimization jobs.
///
/// Every transition after the claim is guarded on `(Processing, worker_id)`:
/// a worker whose claim was swept or taken over gets `NotClaimed` and must
/// drop its result.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Insert a pending job, or return the existing one holding the same
    /// `idempotency_key` (keys are unique across all requesters). The flag is
    /// `true` when a row was created.
    async fn enqueue(&self, job: NewJob) -> Result<(OptimizationJob, bool), JobStoreError>;

    async fn get(&self, job_id: JobId) -> Result<Option<OptimizationJob>, JobStoreError>;

    /// Atomically move the oldest eligible pending job to `Processing`.
    async fn claim_next(&self, worker_id: &str) -> Result<Option<OptimizationJob>, JobStoreError>;

    async fn complete(
        &self,
        job_id: JobId,
        worker_id: &str,
        completion: JobCompletion,
    ) -> Result<OptimizationJob, JobStoreError>;

    /// Count a failed attempt; the job goes back to `Pending` or to `Failed`.
    async fn fail_transient(
        &self,
        job_id: JobId,
        worker_id: &str,
        message: &str,
    ) -> Result<OptimizationJob, JobStoreError>;

    async fn fail_permanent(
        &self,
        job_id: JobId,
        worker_id: &str,
        message: &str,
    ) -> Result<OptimizationJob, JobStoreError>;

    /// Pending jobs that could be claimed now, oldest first.
    async fn find_pending_for_processing(&self, limit: usize) -> Result<Vec<OptimizationJob>, JobStoreError>;

    /// Treat every `Processing` job untouched since `cutoff` as a failed attempt.
    async fn requeue_stale(&self, cutoff: DateTime<Utc>) -> Result<Vec<JobId>, JobStoreError>;

    async fn stats(&self) -> Result<JobStats, JobStoreError>;
}

/// Job store error.
#[derive(Debug, Clone, thiserror::Error)]
pub enum JobStoreError {
    #[error("job not found: {0}")]
    NotFound(JobId),
    #[error("job {job_id} is not claimed by worker {worker_id}")]
    NotClaimed { job_id: JobId, worker_id: String },
    #[error("storage error: {0}")]
    Storage(String),
}

/// Message recorded when the sweeper takes a job back.
pub const STALE_CLAIM_MESSAGE: &str = "claim expired before the worker finished";

/// Job counts by status.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize)]
pub struct JobStats {
    pub pending: u64,
    pub processing: u64,
    pub completed: u64,
    pub failed: u64,
}

#[derive(Debug, Default)]
struct Inner {
    jobs: HashMap<JobId, OptimizationJob>,
    keys: HashMap<String, JobId>,
}

/// In-memory job store for tests/dev.
#[derive(Debug)]
pub struct InMemoryJobStore {
    inner: RwLock<Inner>,
    policy: RetryPolicy,
}

impl InMemoryJobStore {
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            inner: RwLock::new(Inner::default()),
            policy,
        }
    }

    pub fn arc(policy: RetryPolicy) -> Arc<Self> {
        Arc::new(Self::new(policy))
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, Inner>, JobStoreError> {
        self.inner
            .write()
            .map_err(|_| JobStoreError::Storage("job store lock poisoned".to_string()))
    }

    fn transition(
        &self,
        job_id: JobId,
        worker_id: &str,
        apply: impl FnOnce(&mut OptimizationJob, DateTime<Utc>),
    ) -> Result<OptimizationJob, JobStoreError> {
        let mut inner = self.write()?;
        let job = inner.jobs.get_mut(&job_id).ok_or(JobStoreError::NotFound(job_id))?;
        if !job.is_claimed_by(worker_id) {
            return Err(JobStoreError::NotClaimed {
                job_id,
                worker_id: worker_id.to_string(),
            });
        }
        apply(job, Utc::now());
        Ok(job.clone())
    }
}

impl Default for InMemoryJobStore {
    fn default() -> Self {
        Self::new(RetryPolicy::default())
    }
}

fn eligible_oldest_first(jobs: &HashMap<JobId, OptimizationJob>, now: DateTime<Utc>) -> Vec<&OptimizationJob> {
    let mut candidates: Vec<_> = jobs.values().filter(|j| j.is_eligible(now)).collect();
    candidates.sort_by_key(|j| (j.created_at, *j.id.as_uuid()));
    candidates
}

#[async_trait]
impl JobStore for InMemoryJobStore {
    async fn enqueue(&self, job: NewJob) -> Result<(OptimizationJob, bool), JobStoreError> {
        let mut inner = self.write()?;
        let key = job.idempotency_key.clone();

        if let Some(existing) = inner.keys.get(&key).and_then(|id| inner.jobs.get(id)) {
            return Ok((existing.clone(), false));
        }

        let job = OptimizationJob::new(job, self.policy.max_retries(), Utc::now());
        inner.keys.insert(key, job.id);
        inner.jobs.insert(job.id, job.clone());
        Ok((job, true))
    }

    async fn get(&self, job_id: JobId) -> Result<Option<OptimizationJob>, JobStoreError> {
        let inner = self
            .inner
            .read()
            .map_err(|_| JobStoreError::Storage("job store lock poisoned".to_string()))?;
        Ok(inner.jobs.get(&job_id).cloned())
    }

    async fn claim_next(&self, worker_id: &str) -> Result<Option<OptimizationJob>, JobStoreError> {
        let mut inner = self.write()?;
        let now = Utc::now();

        let Some(job_id) = eligible_oldest_first(&inner.jobs, now).first().map(|j| j.id) else {
            return Ok(None);
        };

        let job = inner.jobs.get_mut(&job_id).ok_or(JobStoreError::NotFound(job_id))?;
        job.mark_processing(worker_id, now);
        Ok(Some(job.clone()))
    }

    async fn complete(
        &self,
        job_id: JobId,
        worker_id: &str,
        completion: JobCompletion,
    ) -> Result<OptimizationJob, JobStoreError> {
        self.transition(job_id, worker_id, |job, now| job.mark_completed(completion, now))
    }

    async fn fail_transient(
        &self,
        job_id: JobId,
        worker_id: &str,
        message: &str,
    ) -> Result<OptimizationJob, JobStoreError> {
        let policy = &self.policy;
        self.transition(job_id, worker_id, |job, now| job.mark_transient_failure(message, policy, now))
    }

    async fn fail_permanent(
        &self,
        job_id: JobId,
        worker_id: &str,
        message: &str,
    ) -> Result<OptimizationJob, JobStoreError> {
        self.transition(job_id, worker_id, |job, now| job.mark_permanent_failure(message, now))
    }

    async fn find_pending_for_processing(&self, limit: usize) -> Result<Vec<OptimizationJob>, JobStoreError> {
        let inner = self
            .inner
            .read()
            .map_err(|_| JobStoreError::Storage("job store lock poisoned".to_string()))?;
        Ok(eligible_oldest_first(&inner.jobs, Utc::now())
            .into_iter()
            .take(limit)
            .cloned()
            .collect())
    }

    async fn requeue_stale(&self, cutoff: DateTime<Utc>) -> Result<Vec<JobId>, JobStoreError> {
        let mut inner = self.write()?;
        let now = Utc::now();
        let mut requeued = Vec::new();

        for job in inner.jobs.values_mut() {
            if job.status == JobStatus::Processing && job.updated_at < cutoff {
                job.mark_transient_failure(STALE_CLAIM_MESSAGE, &self.policy, now);
                requeued.push(job.id);
            }
        }

        Ok(requeued)
    }

    async fn stats(&self) -> Result<JobStats, JobStoreError> {
        let inner = self
            .inner
            .read()
            .map_err(|_| JobStoreError::Storage("job store lock poisoned".to_string()))?;
        let mut stats = JobStats::default();
        for job in inner.jobs.values() {
            match job.status {
                JobStatus::Pending => stats.pending += 1,
                JobStatus::Processing => stats.processing += 1,
                JobStatus::Completed => stats.completed += 1,
                JobStatus::Failed => stats.failed += 1,
            }
        }
        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::types::OptimizationMode;
    use std::time::Duration;
    use teachprompt_core::{PromptId, UserId};

    fn new_job(user: UserId, key: &str) -> NewJob {
        NewJob {
            prompt_id: PromptId::new(),
            prompt_text: "Viết đề kiểm tra 15 phút".to_string(),
            requested_by: user,
            lesson_id: None,
            mode: OptimizationMode::Standard,
            idempotency_key: key.to_string(),
        }
    }

    fn store() -> InMemoryJobStore {
        InMemoryJobStore::new(RetryPolicy::fixed(3, Duration::ZERO))
    }

    #[tokio::test]
    async fn enqueue_is_idempotent_on_the_key_alone() {
        let store = store();
        let user = UserId::new();

        let (first, created) = store.enqueue(new_job(user, "k1")).await.unwrap();
        assert!(created);
        let (again, created) = store.enqueue(new_job(user, "k1")).await.unwrap();
        assert!(!created);
        assert_eq!(first.id, again.id);

        // Keys are global: another requester reusing one gets the original job.
        let (other, created) = store.enqueue(new_job(UserId::new(), "k1")).await.unwrap();
        assert!(!created);
        assert_eq!(other.id, first.id);
        assert_eq!(other.requested_by, user);
        assert_eq!(store.stats().await.unwrap().pending, 1);
    }

    #[tokio::test]
    async fn claim_is_fifo_and_exclusive() {
        let store = store();
        let user = UserId::new();
        let (a, _) = store.enqueue(new_job(user, "a")).await.unwrap();
        let (b, _) = store.enqueue(new_job(user, "b")).await.unwrap();

        let first = store.claim_next("w1").await.unwrap().unwrap();
        let second = store.claim_next("w2").await.unwrap().unwrap();
        assert_eq!(first.id, a.id);
        assert_eq!(second.id, b.id);
        assert_eq!(first.claimed_by.as_deref(), Some("w1"));
        assert!(store.claim_next("w3").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn transitions_require_the_claiming_worker() {
        let store = store();
        let (job, _) = store.enqueue(new_job(UserId::new(), "a")).await.unwrap();

        let err = store.fail_permanent(job.id, "w1", "nope").await.unwrap_err();
        assert!(matches!(err, JobStoreError::NotClaimed { .. }));

        store.claim_next("w1").await.unwrap();
        let err = store.fail_transient(job.id, "w2", "nope").await.unwrap_err();
        assert!(matches!(err, JobStoreError::NotClaimed { .. }));

        let err = store.fail_transient(JobId::new(), "w1", "nope").await.unwrap_err();
        assert!(matches!(err, JobStoreError::NotFound(_)));

        let failed = store.fail_permanent(job.id, "w1", "bad request").await.unwrap();
        assert_eq!(failed.status, JobStatus::Failed);
    }

    #[tokio::test]
    async fn stale_claims_are_requeued_and_old_worker_is_rejected() {
        let store = store();
        let (job, _) = store.enqueue(new_job(UserId::new(), "a")).await.unwrap();
        store.claim_next("w1").await.unwrap();

        let swept = store.requeue_stale(Utc::now() + chrono::Duration::seconds(1)).await.unwrap();
        assert_eq!(swept, vec![job.id]);

        let requeued = store.get(job.id).await.unwrap().unwrap();
        assert_eq!(requeued.status, JobStatus::Pending);
        assert_eq!(requeued.retry_count, 1);
        assert_eq!(requeued.error_message.as_deref(), Some(STALE_CLAIM_MESSAGE));

        let reclaimed = store.claim_next("w2").await.unwrap().unwrap();
        assert_eq!(reclaimed.id, job.id);
        let err = store.fail_transient(job.id, "w1", "late").await.unwrap_err();
        assert!(matches!(err, JobStoreError::NotClaimed { .. }));
    }

    #[tokio::test]
    async fn fresh_claims_are_not_swept() {
        let store = store();
        store.enqueue(new_job(UserId::new(), "a")).await.unwrap();
        store.claim_next("w1").await.unwrap();

        let swept = store.requeue_stale(Utc::now() - chrono::Duration::minutes(5)).await.unwrap();
        assert!(swept.is_empty());
        assert_eq!(store.stats().await.unwrap().processing, 1);
    }

    #[tokio::test]
    async fn backoff_hides_job_from_pending_scan() {
        let store = InMemoryJobStore::new(RetryPolicy::fixed(3, Duration::from_secs(60)));
        let (job, _) = store.enqueue(new_job(UserId::new(), "a")).await.unwrap();
        store.claim_next("w1").await.unwrap();
        store.fail_transient(job.id, "w1", "503").await.unwrap();

        assert!(store.find_pending_for_processing(10).await.unwrap().is_empty());
        assert!(store.claim_next("w1").await.unwrap().is_none());
        assert_eq!(store.stats().await.unwrap().pending, 1);
    }
}
