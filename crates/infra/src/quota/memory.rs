//! In-memory quota ledger.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, RwLock};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use teachprompt_core::{SchoolId, UserId};
use teachprompt_quota::{
    QuotaAccount, QuotaError, QuotaKind, QuotaLedger, Reservation, ReservationCost, SchoolSubscriptionPool, reserve,
};

type Slot<T> = Arc<Mutex<T>>;

/// Per-account and per-pool locks. Lock order is always account, then pool.
#[derive(Debug, Default)]
pub struct InMemoryQuotaLedger {
    accounts: RwLock<HashMap<UserId, Slot<QuotaAccount>>>,
    pools: RwLock<HashMap<SchoolId, Slot<SchoolSubscriptionPool>>>,
}

impl InMemoryQuotaLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arc() -> Arc<Self> {
        Arc::new(Self::new())
    }

    fn account_slot(&self, user_id: UserId) -> Result<Slot<QuotaAccount>, QuotaError> {
        self.accounts
            .read()
            .map_err(|_| poisoned())?
            .get(&user_id)
            .cloned()
            .ok_or(QuotaError::AccountNotFound(user_id))
    }

    fn pool_slot(&self, school_id: SchoolId) -> Result<Slot<SchoolSubscriptionPool>, QuotaError> {
        self.pools
            .read()
            .map_err(|_| poisoned())?
            .get(&school_id)
            .cloned()
            .ok_or(QuotaError::PoolNotFound(school_id))
    }
}

fn poisoned() -> QuotaError {
    QuotaError::Storage("quota ledger lock poisoned".to_string())
}

fn lock<T>(slot: &Mutex<T>) -> Result<MutexGuard<'_, T>, QuotaError> {
    slot.lock().map_err(|_| poisoned())
}

#[async_trait]
impl QuotaLedger for InMemoryQuotaLedger {
    async fn check_and_reserve(
        &self,
        user_id: UserId,
        kind: QuotaKind,
        cost: ReservationCost,
        now: DateTime<Utc>,
    ) -> Result<Reservation, QuotaError> {
        let account_slot = self.account_slot(user_id)?;
        let mut account = lock(&account_slot)?;
        account.reset_if_due(now);

        match account.school_id {
            Some(school_id) => {
                let pool_slot = self.pool_slot(school_id)?;
                let mut pool = lock(&pool_slot)?;
                pool.reset_if_due(now);
                Ok(reserve(&mut account, Some(&mut pool), kind, cost, now)?)
            }
            None => Ok(reserve(&mut account, None, kind, cost, now)?),
        }
    }

    async fn reset_if_due(&self, user_id: UserId, now: DateTime<Utc>) -> Result<bool, QuotaError> {
        let account_slot = self.account_slot(user_id)?;
        let mut account = lock(&account_slot)?;
        let mut reset = account.reset_if_due(now);

        if let Some(school_id) = account.school_id {
            let pool_slot = self.pool_slot(school_id)?;
            reset |= lock(&pool_slot)?.reset_if_due(now);
        }
        Ok(reset)
    }

    async fn account(&self, user_id: UserId) -> Result<QuotaAccount, QuotaError> {
        let slot = self.account_slot(user_id)?;
        let account = lock(&slot)?;
        Ok(account.clone())
    }

    async fn pool(&self, school_id: SchoolId) -> Result<SchoolSubscriptionPool, QuotaError> {
        let slot = self.pool_slot(school_id)?;
        let pool = lock(&slot)?;
        Ok(pool.clone())
    }

    async fn upsert_account(&self, account: QuotaAccount) -> Result<(), QuotaError> {
        let mut accounts = self.accounts.write().map_err(|_| poisoned())?;
        match accounts.get(&account.user_id) {
            Some(slot) => *lock(slot)? = account,
            None => {
                accounts.insert(account.user_id, Arc::new(Mutex::new(account)));
            }
        }
        Ok(())
    }

    async fn upsert_pool(&self, pool: SchoolSubscriptionPool) -> Result<(), QuotaError> {
        let mut pools = self.pools.write().map_err(|_| poisoned())?;
        match pools.get(&pool.school_id) {
            Some(slot) => *lock(slot)? = pool,
            None => {
                pools.insert(pool.school_id, Arc::new(Mutex::new(pool)));
            }
        }
        Ok(())
    }
}
