//! One claim-and-process attempt.

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info, warn};

use teachprompt_ai::{AiProvider, GenerationRequest, estimate_tokens};
use teachprompt_core::JobId;
use teachprompt_curriculum::{CurriculumContext, CurriculumResolver};
use teachprompt_quota::{QuotaKind, QuotaLedger, ReservationCost};
use teachprompt_scoring::ScoringEngine;

use crate::jobs::{JobCompletion, JobStatus, JobStore, JobStoreError, OptimizationJob};

use super::config::GenerationSettings;
use super::error::{Disposition, ProcessError};

/// What happened to a claimed job.
#[derive(Debug, Clone, PartialEq)]
pub enum JobOutcome {
    Completed { job_id: JobId, improvement: f64 },
    /// Transient failure; back to `Pending` for another attempt
    Retried { job_id: JobId, retry_count: u32 },
    Failed { job_id: JobId, error: String },
    /// The claim was swept or taken over before the result was stored
    LostClaim { job_id: JobId },
}

impl JobOutcome {
    pub fn job_id(&self) -> JobId {
        match self {
            JobOutcome::Completed { job_id, .. }
            | JobOutcome::Retried { job_id, .. }
            | JobOutcome::Failed { job_id, .. }
            | JobOutcome::LostClaim { job_id } => *job_id,
        }
    }
}

/// Claims jobs and runs the optimization pipeline:
/// resolve curriculum, reserve quota, generate, score, store.
#[derive(Clone)]
pub struct JobProcessor {
    store: Arc<dyn JobStore>,
    quota: Arc<dyn QuotaLedger>,
    provider: Arc<dyn AiProvider>,
    resolver: CurriculumResolver,
    scoring: ScoringEngine,
    generation: GenerationSettings,
}

impl std::fmt::Debug for JobProcessor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobProcessor")
            .field("provider", &self.provider.name())
            .field("resolver", &self.resolver)
            .field("scoring", &self.scoring)
            .field("generation", &self.generation)
            .finish()
    }
}

impl JobProcessor {
    pub fn new(store: Arc<dyn JobStore>, quota: Arc<dyn QuotaLedger>, provider: Arc<dyn AiProvider>) -> Self {
        Self {
            store,
            quota,
            provider,
            resolver: CurriculumResolver::new(),
            scoring: ScoringEngine::rule_based(),
            generation: GenerationSettings::default(),
        }
    }

    pub fn with_resolver(mut self, resolver: CurriculumResolver) -> Self {
        self.resolver = resolver;
        self
    }

    pub fn with_scoring(mut self, scoring: ScoringEngine) -> Self {
        self.scoring = scoring;
        self
    }

    pub fn with_generation(mut self, generation: GenerationSettings) -> Self {
        self.generation = generation;
        self
    }

    pub fn store(&self) -> &Arc<dyn JobStore> {
        &self.store
    }

    /// Claim the oldest eligible job and process it.
    ///
    /// `Ok(None)` when nothing is claimable. Processing failures are recorded
    /// on the job; only store failures come back as `Err`.
    pub async fn run_once(&self, worker_id: &str) -> Result<Option<JobOutcome>, JobStoreError> {
        let Some(job) = self.store.claim_next(worker_id).await? else {
            return Ok(None);
        };

        debug!(
            worker = %worker_id,
            job_id = %job.id,
            attempt = job.retry_count + 1,
            max_retries = job.max_retries,
            "claimed job"
        );

        let outcome = match self.process(&job).await {
            Ok(completion) => {
                let improvement = completion.improvement;
                self.store
                    .complete(job.id, worker_id, completion)
                    .await
                    .map(|_| JobOutcome::Completed {
                        job_id: job.id,
                        improvement,
                    })
            }
            Err(err) => self.record_failure(&job, worker_id, err).await,
        };

        match outcome {
            Ok(outcome) => {
                log_outcome(worker_id, &outcome);
                Ok(Some(outcome))
            }
            Err(JobStoreError::NotClaimed { job_id, .. }) => {
                warn!(worker = %worker_id, job_id = %job_id, "claim lost before result was stored; dropping result");
                Ok(Some(JobOutcome::LostClaim { job_id }))
            }
            Err(e) => Err(e),
        }
    }

    async fn record_failure(
        &self,
        job: &OptimizationJob,
        worker_id: &str,
        err: ProcessError,
    ) -> Result<JobOutcome, JobStoreError> {
        let message = err.to_string();
        match err.classify() {
            Disposition::Transient => {
                let stored = self.store.fail_transient(job.id, worker_id, &message).await?;
                if stored.status == JobStatus::Failed {
                    Ok(JobOutcome::Failed {
                        job_id: job.id,
                        error: message,
                    })
                } else {
                    Ok(JobOutcome::Retried {
                        job_id: job.id,
                        retry_count: stored.retry_count,
                    })
                }
            }
            Disposition::Permanent => {
                self.store.fail_permanent(job.id, worker_id, &message).await?;
                Ok(JobOutcome::Failed {
                    job_id: job.id,
                    error: message,
                })
            }
        }
    }

    async fn process(&self, job: &OptimizationJob) -> Result<JobCompletion, ProcessError> {
        if job.prompt_text.trim().is_empty() {
            return Err(ProcessError::Internal(format!("job {} has no prompt text", job.id)));
        }

        let original_ctx = self.resolver.resolve(&job.prompt_text, job.lesson_id).await;
        let request = self.build_request(job, &original_ctx);
        request.validate()?;

        let cost = ReservationCost::single(
            estimate_tokens(&request.prompt)
                + request.system.as_deref().map(estimate_tokens).unwrap_or(0)
                + u64::from(request.max_tokens),
        );
        let reservation = self
            .quota
            .check_and_reserve(job.requested_by, QuotaKind::Optimization, cost, Utc::now())
            .await?;
        debug!(
            job_id = %job.id,
            user_id = %job.requested_by,
            requests_remaining = reservation.requests_remaining,
            tokens = cost.tokens,
            "quota reserved"
        );

        let response = self.provider.generate(&request).await?;
        let output = response.content.trim();
        if output.is_empty() {
            return Err(ProcessError::EmptyOutput);
        }

        let optimized_ctx = inherit_context(self.resolver.detect(output), &original_ctx);
        let scored = self
            .scoring
            .score_pair(&job.prompt_text, &original_ctx, output, &optimized_ctx)
            .await;

        Ok(JobCompletion {
            output: output.to_string(),
            original_score: scored.original,
            optimized_score: scored.optimized,
            improvement: scored.improvement,
            tokens_used: u64::from(response.tokens_used),
        })
    }

    fn build_request(&self, job: &OptimizationJob, ctx: &CurriculumContext) -> GenerationRequest {
        let mut system = job.mode.instruction().to_string();
        if let Some(described) = ctx.describe() {
            system.push_str("\nCurriculum context: ");
            system.push_str(&described);
        }
        system.push_str("\nReturn only the rewritten prompt, in the teacher's language.");

        GenerationRequest::new(self.generation.model.clone(), job.prompt_text.clone())
            .with_system(system)
            .with_sampling(self.generation.temperature, self.generation.top_p)
            .with_max_tokens(self.generation.max_tokens)
    }
}

/// The rewrite keeps the original's lesson, and any marker the provider
/// dropped falls back to what the original stated.
fn inherit_context(mut detected: CurriculumContext, original: &CurriculumContext) -> CurriculumContext {
    detected.subject = detected.subject.or(original.subject);
    detected.grade_level = detected.grade_level.or(original.grade_level);
    detected.semester = detected.semester.or(original.semester);
    detected.lesson = original.lesson.clone();
    detected
}

fn log_outcome(worker_id: &str, outcome: &JobOutcome) {
    match outcome {
        JobOutcome::Completed { job_id, improvement } => {
            info!(worker = %worker_id, job_id = %job_id, improvement, "job completed");
        }
        JobOutcome::Retried { job_id, retry_count } => {
            warn!(worker = %worker_id, job_id = %job_id, retry_count, "job attempt failed; re-queued");
        }
        JobOutcome::Failed { job_id, error } => {
            warn!(worker = %worker_id, job_id = %job_id, error = %error, "job failed");
        }
        JobOutcome::LostClaim { .. } => {}
    }
}
