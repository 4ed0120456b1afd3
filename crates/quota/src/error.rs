use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use teachprompt_core::{SchoolId, UserId};

use crate::ledger::QuotaType;

/// A budget had fewer units left than the attempt costs. Nothing was debited.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("{quota_type} quota exceeded: {remaining} remaining, resets at {}", .reset_date.to_rfc3339())]
pub struct QuotaExceeded {
    pub quota_type: QuotaType,
    pub reset_date: DateTime<Utc>,
    pub remaining: u64,
    pub required: u64,
}

#[derive(Debug, Error)]
pub enum QuotaError {
    #[error(transparent)]
    Exceeded(#[from] QuotaExceeded),

    #[error("no quota account for user {0}")]
    AccountNotFound(UserId),

    #[error("no subscription pool for school {0}")]
    PoolNotFound(SchoolId),

    #[error("quota storage error: {0}")]
    Storage(String),
}

impl QuotaError {
    /// Retrying later may succeed without anyone changing the account.
    pub fn is_transient(&self) -> bool {
        matches!(self, QuotaError::Storage(_))
    }
}
