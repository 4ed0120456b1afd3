//! Producer side: enqueue optimization requests and report their status.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use teachprompt_core::{DomainError, JobId, LessonId, PromptId, UserId};
use teachprompt_events::{JobNotification, NotificationBus};
use teachprompt_scoring::ScoreResult;

use crate::jobs::{JobStatus, JobStore, JobStoreError, NewJob, OptimizationJob, OptimizationMode};

/// Longest prompt accepted for optimization, in characters.
pub const MAX_PROMPT_CHARS: usize = 10_000;
/// Longest accepted idempotency key, in bytes.
pub const MAX_IDEMPOTENCY_KEY_LEN: usize = 128;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnqueueRequest {
    pub prompt_id: PromptId,
    pub prompt_text: String,
    #[serde(default)]
    pub lesson_id: Option<LessonId>,
    #[serde(default)]
    pub mode: OptimizationMode,
    pub idempotency_key: String,
    pub requested_by: UserId,
}

impl EnqueueRequest {
    pub fn validate(&self) -> Result<(), DomainError> {
        if self.prompt_text.trim().is_empty() {
            return Err(DomainError::validation("prompt_text must not be empty"));
        }
        if self.prompt_text.chars().count() > MAX_PROMPT_CHARS {
            return Err(DomainError::validation(format!(
                "prompt_text exceeds {MAX_PROMPT_CHARS} characters"
            )));
        }
        let key = self.idempotency_key.trim();
        if key.is_empty() {
            return Err(DomainError::validation("idempotency_key must not be empty"));
        }
        if key.len() > MAX_IDEMPOTENCY_KEY_LEN {
            return Err(DomainError::validation(format!(
                "idempotency_key exceeds {MAX_IDEMPOTENCY_KEY_LEN} bytes"
            )));
        }
        Ok(())
    }
}

/// What a requester may see about a job.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobStatusView {
    pub job_id: JobId,
    pub requested_by: UserId,
    pub status: JobStatus,
    pub output: Option<String>,
    pub error_message: Option<String>,
    pub retry_count: u32,
    pub max_retries: u32,
    pub improvement: Option<f64>,
    pub original_score: Option<ScoreResult>,
    pub optimized_score: Option<ScoreResult>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<OptimizationJob> for JobStatusView {
    fn from(job: OptimizationJob) -> Self {
        Self {
            job_id: job.id,
            requested_by: job.requested_by,
            status: job.status,
            output: job.output,
            error_message: job.error_message,
            retry_count: job.retry_count,
            max_retries: job.max_retries,
            improvement: job.improvement,
            original_score: job.original_score,
            optimized_score: job.optimized_score,
            created_at: job.created_at,
            updated_at: job.updated_at,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum EnqueueError {
    #[error(transparent)]
    Validation(#[from] DomainError),
    #[error("job not found: {0}")]
    NotFound(JobId),
    #[error(transparent)]
    Store(#[from] JobStoreError),
}

/// Enqueues jobs durably, then nudges workers over the bus.
pub struct OptimizationService<B> {
    store: Arc<dyn JobStore>,
    bus: B,
}

impl<B> Clone for OptimizationService<B>
where
    B: Clone,
{
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            bus: self.bus.clone(),
        }
    }
}

impl<B> std::fmt::Debug for OptimizationService<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OptimizationService").finish_non_exhaustive()
    }
}

impl<B> OptimizationService<B>
where
    B: NotificationBus<JobNotification>,
{
    pub fn new(store: Arc<dyn JobStore>, bus: B) -> Self {
        Self { store, bus }
    }

    pub fn store(&self) -> &Arc<dyn JobStore> {
        &self.store
    }

    /// Returns the job id; a repeated idempotency key returns the original
    /// job's id without creating or announcing anything.
    pub async fn enqueue_optimization(&self, request: EnqueueRequest) -> Result<JobId, EnqueueError> {
        request.validate()?;

        let (job, created) = self
            .store
            .enqueue(NewJob {
                prompt_id: request.prompt_id,
                prompt_text: request.prompt_text,
                requested_by: request.requested_by,
                lesson_id: request.lesson_id,
                mode: request.mode,
                idempotency_key: request.idempotency_key.trim().to_string(),
            })
            .await?;

        if !created {
            debug!(job_id = %job.id, user_id = %job.requested_by, "duplicate idempotency key; returning existing job");
            return Ok(job.id);
        }

        info!(job_id = %job.id, user_id = %job.requested_by, mode = job.mode.as_str(), "optimization job enqueued");

        // The row is committed; a lost notification only delays pickup until the next poll.
        if let Err(e) = self.bus.publish(JobNotification::optimization(job.id)) {
            warn!(job_id = %job.id, error = %e, "failed to publish job notification");
        }

        Ok(job.id)
    }

    pub async fn get_job_status(&self, job_id: JobId) -> Result<JobStatusView, EnqueueError> {
        self.store
            .get(job_id)
            .await?
            .map(JobStatusView::from)
            .ok_or(EnqueueError::NotFound(job_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use teachprompt_events::{InMemoryNotificationBus, Subscription};

    use crate::jobs::{InMemoryJobStore, RetryPolicy};

    struct FailingBus {
        attempts: AtomicUsize,
    }

    impl NotificationBus<JobNotification> for FailingBus {
        type Error = String;

        fn publish(&self, _message: JobNotification) -> Result<(), Self::Error> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            Err("broker unreachable".to_string())
        }

        fn subscribe(&self) -> Subscription<JobNotification> {
            let (_tx, rx) = tokio::sync::mpsc::unbounded_channel();
            Subscription::new(rx)
        }
    }

    fn request(user: UserId, key: &str) -> EnqueueRequest {
        EnqueueRequest {
            prompt_id: PromptId::new(),
            prompt_text: "Soạn 5 câu hỏi trắc nghiệm Toán lớp 12".to_string(),
            lesson_id: None,
            mode: OptimizationMode::Standard,
            idempotency_key: key.to_string(),
            requested_by: user,
        }
    }

    #[tokio::test]
    async fn enqueue_publishes_once_per_new_job() {
        let bus = Arc::new(InMemoryNotificationBus::<JobNotification>::new());
        let mut sub: Subscription<JobNotification> = bus.subscribe();
        let service = OptimizationService::new(InMemoryJobStore::arc(RetryPolicy::default()), bus.clone());
        let user = UserId::new();

        let first = service.enqueue_optimization(request(user, "abc")).await.unwrap();
        let again = service.enqueue_optimization(request(user, "abc")).await.unwrap();

        assert_eq!(first, again);
        assert_eq!(sub.try_recv().map(|n| n.job_id).ok(), Some(first));
        assert!(sub.try_recv().is_err());
        assert_eq!(service.store().stats().await.unwrap().pending, 1);
    }

    #[tokio::test]
    async fn publish_failure_does_not_fail_enqueue() {
        let bus = Arc::new(FailingBus {
            attempts: AtomicUsize::new(0),
        });
        let service = OptimizationService::new(InMemoryJobStore::arc(RetryPolicy::default()), bus.clone());

        let id = service.enqueue_optimization(request(UserId::new(), "k")).await.unwrap();
        let view = service.get_job_status(id).await.unwrap();

        assert_eq!(view.status, JobStatus::Pending);
        assert_eq!(bus.attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn invalid_requests_are_rejected_before_enqueue() {
        let service = OptimizationService::new(
            InMemoryJobStore::arc(RetryPolicy::default()),
            Arc::new(InMemoryNotificationBus::<JobNotification>::new()),
        );
        let user = UserId::new();

        let mut blank = request(user, "k");
        blank.prompt_text = "   ".to_string();
        assert!(matches!(
            service.enqueue_optimization(blank).await,
            Err(EnqueueError::Validation(_))
        ));

        let mut long_key = request(user, "k");
        long_key.idempotency_key = "x".repeat(MAX_IDEMPOTENCY_KEY_LEN + 1);
        assert!(matches!(
            service.enqueue_optimization(long_key).await,
            Err(EnqueueError::Validation(_))
        ));

        let mut huge = request(user, "k");
        huge.prompt_text = "a".repeat(MAX_PROMPT_CHARS + 1);
        assert!(service.enqueue_optimization(huge).await.is_err());

        assert_eq!(service.store().stats().await.unwrap().pending, 0);
    }

    #[tokio::test]
    async fn unknown_job_is_not_found() {
        let service = OptimizationService::new(
            InMemoryJobStore::arc(RetryPolicy::default()),
            Arc::new(InMemoryNotificationBus::<JobNotification>::new()),
        );
        assert!(matches!(
            service.get_job_status(JobId::new()).await,
            Err(EnqueueError::NotFound(_))
        ));
    }
}
