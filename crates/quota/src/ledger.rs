use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use teachprompt_core::{SchoolId, UserId};

use crate::account::{QuotaAccount, SchoolSubscriptionPool};
use crate::error::QuotaError;

/// Request counter an attempt is charged against.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuotaKind {
    Testing,
    Optimization,
}

/// Every budget that can run out; reported in `QuotaExceeded`.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuotaType {
    Testing,
    Optimization,
    IndividualTokens,
    SchoolTokens,
}

impl QuotaType {
    pub fn as_str(&self) -> &'static str {
        match self {
            QuotaType::Testing => "testing",
            QuotaType::Optimization => "optimization",
            QuotaType::IndividualTokens => "individual_tokens",
            QuotaType::SchoolTokens => "school_tokens",
        }
    }
}

impl core::fmt::Display for QuotaType {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<QuotaKind> for QuotaType {
    fn from(kind: QuotaKind) -> Self {
        match kind {
            QuotaKind::Testing => QuotaType::Testing,
            QuotaKind::Optimization => QuotaType::Optimization,
        }
    }
}

/// What one attempt costs: one request plus an up-front token estimate.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReservationCost {
    pub requests: u64,
    pub tokens: u64,
}

impl ReservationCost {
    pub fn single(tokens: u64) -> Self {
        Self { requests: 1, tokens }
    }
}

/// Receipt for a successful debit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reservation {
    pub user_id: UserId,
    pub kind: QuotaKind,
    pub cost: ReservationCost,
    /// Pool the tokens were taken from, when the account is school-scoped.
    pub school_id: Option<SchoolId>,
    /// Requests left on the charged counter after the debit.
    pub requests_remaining: u64,
    pub reserved_at: DateTime<Utc>,
}

#[async_trait]
pub trait QuotaLedger: Send + Sync {
    /// Atomically check every applicable budget and debit them all, or none.
    ///
    /// Applies any due reset first, under the same lock.
    async fn check_and_reserve(
        &self,
        user_id: UserId,
        kind: QuotaKind,
        cost: ReservationCost,
        now: DateTime<Utc>,
    ) -> Result<Reservation, QuotaError>;

    /// Replenish the account (and its pool) when `now` is at or past the reset date.
    /// Returns whether anything was reset.
    async fn reset_if_due(&self, user_id: UserId, now: DateTime<Utc>) -> Result<bool, QuotaError>;

    async fn account(&self, user_id: UserId) -> Result<QuotaAccount, QuotaError>;

    async fn pool(&self, school_id: SchoolId) -> Result<SchoolSubscriptionPool, QuotaError>;

    async fn upsert_account(&self, account: QuotaAccount) -> Result<(), QuotaError>;

    async fn upsert_pool(&self, pool: SchoolSubscriptionPool) -> Result<(), QuotaError>;
}
