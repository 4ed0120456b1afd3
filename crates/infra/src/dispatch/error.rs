use thiserror::Error;

use teachprompt_ai::ProviderError;
use teachprompt_quota::QuotaError;

/// What to do with a job whose attempt failed.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Disposition {
    /// Count the attempt and re-queue while retries remain
    Transient,
    /// Fail now; retrying cannot help
    Permanent,
}

/// Failure of one processing attempt. Surfaces through the job's status and
/// error message only.
#[derive(Debug, Error)]
pub enum ProcessError {
    #[error(transparent)]
    Quota(#[from] QuotaError),

    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error("provider returned an empty optimization")]
    EmptyOutput,

    #[error("internal error: {0}")]
    Internal(String),
}

impl ProcessError {
    pub fn classify(&self) -> Disposition {
        match self {
            ProcessError::Quota(e) if e.is_transient() => Disposition::Transient,
            ProcessError::Quota(_) => Disposition::Permanent,
            ProcessError::Provider(e) if e.is_transient() => Disposition::Transient,
            ProcessError::Provider(_) => Disposition::Permanent,
            ProcessError::EmptyOutput => Disposition::Transient,
            ProcessError::Internal(_) => Disposition::Permanent,
        }
    }
}
