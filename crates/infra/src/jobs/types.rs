//! Optimization job model, status machine and retry policy.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use teachprompt_core::{DomainError, JobId, LessonId, PromptId, UserId};
use teachprompt_scoring::ScoreResult;

/// Job lifecycle status.
///
/// `Pending -> Processing -> {Completed | Pending (retry) | Failed}`.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Queued, waiting to be claimed
    Pending,
    /// Claimed by exactly one worker
    Processing,
    /// Output and scores stored
    Completed,
    /// Permanently failed or out of retries
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Result<Self, DomainError> {
        match s {
            "pending" => Ok(JobStatus::Pending),
            "processing" => Ok(JobStatus::Processing),
            "completed" => Ok(JobStatus::Completed),
            "failed" => Ok(JobStatus::Failed),
            other => Err(DomainError::validation(format!("unknown job status '{other}'"))),
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }
}

/// How the provider is asked to rewrite the prompt.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OptimizationMode {
    /// General clarity rewrite
    #[default]
    Standard,
    /// Align with the detected curriculum context
    Curriculum,
    /// Shorten while keeping every constraint
    Concise,
}

impl OptimizationMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            OptimizationMode::Standard => "standard",
            OptimizationMode::Curriculum => "curriculum",
            OptimizationMode::Concise => "concise",
        }
    }

    pub fn parse(s: &str) -> Result<Self, DomainError> {
        match s {
            "standard" => Ok(OptimizationMode::Standard),
            "curriculum" => Ok(OptimizationMode::Curriculum),
            "concise" => Ok(OptimizationMode::Concise),
            other => Err(DomainError::validation(format!("unknown optimization mode '{other}'"))),
        }
    }

    pub fn instruction(&self) -> &'static str {
        match self {
            OptimizationMode::Standard => {
                "Rewrite the teacher's prompt so an AI assistant can follow it precisely: \
                 state the task, the audience, the expected output format and the constraints."
            }
            OptimizationMode::Curriculum => {
                "Rewrite the teacher's prompt so it is aligned with the given curriculum context: \
                 name the subject, grade and lesson, state learning objectives and keep the task."
            }
            OptimizationMode::Concise => {
                "Shorten the teacher's prompt. Keep every constraint, the audience and the output \
                 format; remove repetition and filler."
            }
        }
    }
}

/// Backoff strategy for retries.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackoffStrategy {
    /// Fixed delay between retries
    Fixed,
    /// Exponential backoff: base * 2^(attempt-1)
    #[default]
    Exponential,
    /// Linear backoff: base * attempt
    Linear,
}

/// Job-level retry policy. `max_attempts` becomes each job's `max_retries`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Attempts before a transiently failing job is marked failed (at least 1)
    pub max_attempts: u32,
    /// Base delay between retries
    pub base_delay: Duration,
    /// Maximum delay cap
    pub max_delay: Duration,
    /// Backoff strategy
    pub strategy: BackoffStrategy,
    /// Jitter factor (0.0-1.0)
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(60),
            strategy: BackoffStrategy::Exponential,
            jitter: 0.1,
        }
    }
}

impl RetryPolicy {
    /// Policy with fixed delays.
    pub fn fixed(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay: delay,
            max_delay: delay,
            strategy: BackoffStrategy::Fixed,
            jitter: 0.0,
        }
    }

    /// Policy with exponential backoff.
    pub fn exponential(max_attempts: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay,
            max_delay,
            strategy: BackoffStrategy::Exponential,
            jitter: 0.1,
        }
    }

    /// Max retries recorded on new jobs. Zero would make a job unclaimable.
    pub fn max_retries(&self) -> u32 {
        self.max_attempts.max(1)
    }

    /// Delay before retry number `attempt` (1-indexed).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }

        let base_ms = self.base_delay.as_millis() as f64;
        let max_ms = self.max_delay.as_millis() as f64;

        let delay_ms = match self.strategy {
            BackoffStrategy::Fixed => base_ms,
            BackoffStrategy::Exponential => {
                let exp = 2_f64.powi(attempt.saturating_sub(1).min(30) as i32);
                (base_ms * exp).min(max_ms)
            }
            BackoffStrategy::Linear => (base_ms * f64::from(attempt)).min(max_ms),
        };

        // Deterministic jitter keyed on the attempt number.
        let jitter_range = delay_ms * self.jitter.clamp(0.0, 1.0);
        let jitter = if jitter_range > 0.0 {
            let pseudo_random = ((f64::from(attempt) * 17.0) % 100.0) / 100.0;
            jitter_range * (pseudo_random - 0.5) * 2.0
        } else {
            0.0
        };

        Duration::from_millis((delay_ms + jitter).max(0.0) as u64)
    }
}

/// Producer input for a new job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewJob {
    pub prompt_id: PromptId,
    pub prompt_text: String,
    pub requested_by: UserId,
    pub lesson_id: Option<LessonId>,
    pub mode: OptimizationMode,
    pub idempotency_key: String,
}

/// What a worker stores on success.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobCompletion {
    pub output: String,
    pub original_score: ScoreResult,
    pub optimized_score: ScoreResult,
    pub improvement: f64,
    pub tokens_used: u64,
}

/// One prompt-optimization request and its processing state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptimizationJob {
    pub id: JobId,
    pub prompt_id: PromptId,
    pub prompt_text: String,
    pub requested_by: UserId,
    pub lesson_id: Option<LessonId>,
    pub mode: OptimizationMode,
    pub status: JobStatus,
    pub output: Option<String>,
    pub error_message: Option<String>,
    pub idempotency_key: String,
    pub retry_count: u32,
    pub max_retries: u32,
    /// Worker holding the claim while `Processing`
    pub claimed_by: Option<String>,
    /// Not claimable before this instant
    pub retry_after: Option<DateTime<Utc>>,
    pub original_score: Option<ScoreResult>,
    pub optimized_score: Option<ScoreResult>,
    pub improvement: Option<f64>,
    pub tokens_used: Option<u64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl OptimizationJob {
    pub fn new(new: NewJob, max_retries: u32, now: DateTime<Utc>) -> Self {
        Self {
            id: JobId::new(),
            prompt_id: new.prompt_id,
            prompt_text: new.prompt_text,
            requested_by: new.requested_by,
            lesson_id: new.lesson_id,
            mode: new.mode,
            status: JobStatus::Pending,
            output: None,
            error_message: None,
            idempotency_key: new.idempotency_key,
            retry_count: 0,
            max_retries,
            claimed_by: None,
            retry_after: None,
            original_score: None,
            optimized_score: None,
            improvement: None,
            tokens_used: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Claimable by `claim_next` at `now`.
    pub fn is_eligible(&self, now: DateTime<Utc>) -> bool {
        self.status == JobStatus::Pending
            && self.retry_count < self.max_retries
            && self.retry_after.is_none_or(|at| at <= now)
    }

    /// `Processing` and claimed by `worker_id`.
    pub fn is_claimed_by(&self, worker_id: &str) -> bool {
        self.status == JobStatus::Processing && self.claimed_by.as_deref() == Some(worker_id)
    }

    pub fn mark_processing(&mut self, worker_id: &str, now: DateTime<Utc>) {
        self.status = JobStatus::Processing;
        self.claimed_by = Some(worker_id.to_string());
        self.updated_at = now;
    }

    pub fn mark_completed(&mut self, completion: JobCompletion, now: DateTime<Utc>) {
        self.status = JobStatus::Completed;
        self.output = Some(completion.output);
        self.original_score = Some(completion.original_score);
        self.optimized_score = Some(completion.optimized_score);
        self.improvement = Some(completion.improvement);
        self.tokens_used = Some(completion.tokens_used);
        self.error_message = None;
        self.claimed_by = None;
        self.retry_after = None;
        self.updated_at = now;
    }

    /// Count one failed attempt. Back to `Pending` with a backoff while
    /// retries remain, otherwise `Failed`.
    pub fn mark_transient_failure(&mut self, message: impl Into<String>, policy: &RetryPolicy, now: DateTime<Utc>) {
        self.retry_count = (self.retry_count + 1).min(self.max_retries);
        self.error_message = Some(message.into());
        self.claimed_by = None;
        self.updated_at = now;

        if self.retry_count < self.max_retries {
            let delay = policy.delay_for_attempt(self.retry_count);
            self.status = JobStatus::Pending;
            self.retry_after = Some(now + chrono::Duration::from_std(delay).unwrap_or_default());
        } else {
            self.status = JobStatus::Failed;
            self.retry_after = None;
        }
    }

    /// Fail without consuming a retry.
    pub fn mark_permanent_failure(&mut self, message: impl Into<String>, now: DateTime<Utc>) {
        self.status = JobStatus::Failed;
        self.error_message = Some(message.into());
        self.claimed_by = None;
        self.retry_after = None;
        self.updated_at = now;
    }
}
