//! Account and pool model with the reserve/reset rules.

use chrono::{DateTime, Datelike, Utc};
use serde::{Deserialize, Serialize};

use teachprompt_core::{SchoolId, UserId};

use crate::error::QuotaExceeded;
use crate::ledger::{QuotaKind, QuotaType, Reservation, ReservationCost};
use crate::period::BillingPeriod;

/// A limit and what is left of it this period. `remaining <= limit` holds
/// for every counter built through `new`.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuotaCounter {
    pub limit: u64,
    pub remaining: u64,
}

impl QuotaCounter {
    pub fn new(limit: u64) -> Self {
        Self {
            limit,
            remaining: limit,
        }
    }

    pub fn with_remaining(limit: u64, remaining: u64) -> Self {
        Self {
            limit,
            remaining: remaining.min(limit),
        }
    }

    pub fn can_cover(&self, cost: u64) -> bool {
        self.remaining >= cost
    }

    fn debit(&mut self, cost: u64) {
        self.remaining = self.remaining.saturating_sub(cost);
    }

    fn replenish(&mut self) {
        self.remaining = self.limit;
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuotaAccount {
    pub user_id: UserId,
    pub testing: QuotaCounter,
    pub optimization: QuotaCounter,
    /// Personal token budget. Ignored while the account belongs to a school.
    pub individual_tokens: Option<QuotaCounter>,
    pub school_id: Option<SchoolId>,
    pub reset_date: DateTime<Utc>,
    pub period: BillingPeriod,
    /// Day of month monthly resets aim for; taken from the first reset date.
    pub anchor_day: u32,
}

impl QuotaAccount {
    pub fn new(user_id: UserId, testing_limit: u64, optimization_limit: u64, reset_date: DateTime<Utc>) -> Self {
        Self {
            user_id,
            testing: QuotaCounter::new(testing_limit),
            optimization: QuotaCounter::new(optimization_limit),
            individual_tokens: None,
            school_id: None,
            reset_date,
            period: BillingPeriod::default(),
            anchor_day: reset_date.day(),
        }
    }

    pub fn with_token_budget(mut self, limit: u64) -> Self {
        self.individual_tokens = Some(QuotaCounter::new(limit));
        self
    }

    pub fn with_school(mut self, school_id: SchoolId) -> Self {
        self.school_id = Some(school_id);
        self
    }

    pub fn with_period(mut self, period: BillingPeriod) -> Self {
        self.period = period;
        self
    }

    pub fn counter(&self, kind: QuotaKind) -> &QuotaCounter {
        match kind {
            QuotaKind::Testing => &self.testing,
            QuotaKind::Optimization => &self.optimization,
        }
    }

    fn counter_mut(&mut self, kind: QuotaKind) -> &mut QuotaCounter {
        match kind {
            QuotaKind::Testing => &mut self.testing,
            QuotaKind::Optimization => &mut self.optimization,
        }
    }

    /// Replenish every counter when `now >= reset_date`, then move the reset
    /// date forward by one period. An account several periods behind stays
    /// due and is replenished again on the next call.
    pub fn reset_if_due(&mut self, now: DateTime<Utc>) -> bool {
        if now < self.reset_date {
            return false;
        }
        self.testing.replenish();
        self.optimization.replenish();
        if let Some(tokens) = self.individual_tokens.as_mut() {
            tokens.replenish();
        }
        self.reset_date = self.period.advance_anchored(self.reset_date, self.anchor_day);
        true
    }
}

/// Token budget shared by every teacher of a school.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchoolSubscriptionPool {
    pub school_id: SchoolId,
    pub tokens: QuotaCounter,
    pub reset_date: DateTime<Utc>,
    pub period: BillingPeriod,
    pub anchor_day: u32,
}

impl SchoolSubscriptionPool {
    pub fn new(school_id: SchoolId, token_limit: u64, reset_date: DateTime<Utc>) -> Self {
        Self {
            school_id,
            tokens: QuotaCounter::new(token_limit),
            reset_date,
            period: BillingPeriod::default(),
            anchor_day: reset_date.day(),
        }
    }

    pub fn with_period(mut self, period: BillingPeriod) -> Self {
        self.period = period;
        self
    }

    pub fn reset_if_due(&mut self, now: DateTime<Utc>) -> bool {
        if now < self.reset_date {
            return false;
        }
        self.tokens.replenish();
        self.reset_date = self.period.advance_anchored(self.reset_date, self.anchor_day);
        true
    }
}

/// Check every budget that applies, then debit all of them.
///
/// On error neither the account nor the pool is touched. Callers hold the
/// account lock (and the pool lock, if any) for the whole call and must have
/// applied due resets beforehand.
pub fn reserve(
    account: &mut QuotaAccount,
    pool: Option<&mut SchoolSubscriptionPool>,
    kind: QuotaKind,
    cost: ReservationCost,
    now: DateTime<Utc>,
) -> Result<Reservation, QuotaExceeded> {
    let counter = account.counter(kind);
    if !counter.can_cover(cost.requests) {
        return Err(QuotaExceeded {
            quota_type: kind.into(),
            reset_date: account.reset_date,
            remaining: counter.remaining,
            required: cost.requests,
        });
    }

    match (&pool, account.individual_tokens.as_ref()) {
        (Some(p), _) if !p.tokens.can_cover(cost.tokens) => {
            return Err(QuotaExceeded {
                quota_type: QuotaType::SchoolTokens,
                reset_date: p.reset_date,
                remaining: p.tokens.remaining,
                required: cost.tokens,
            });
        }
        (None, Some(t)) if !t.can_cover(cost.tokens) => {
            return Err(QuotaExceeded {
                quota_type: QuotaType::IndividualTokens,
                reset_date: account.reset_date,
                remaining: t.remaining,
                required: cost.tokens,
            });
        }
        _ => {}
    }

    let school_id = match pool {
        Some(p) => {
            p.tokens.debit(cost.tokens);
            Some(p.school_id)
        }
        None => {
            if let Some(t) = account.individual_tokens.as_mut() {
                t.debit(cost.tokens);
            }
            None
        }
    };

    let counter = account.counter_mut(kind);
    counter.debit(cost.requests);
    let requests_remaining = counter.remaining;

    Ok(Reservation {
        user_id: account.user_id,
        kind,
        cost,
        school_id,
        requests_remaining,
        reserved_at: now,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use proptest::prelude::*;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 10, 15, 12, 0, 0).unwrap()
    }

    fn account(optimization: u64) -> QuotaAccount {
        QuotaAccount::new(UserId::new(), 10, optimization, now() + Duration::days(10))
    }

    #[test]
    fn reserve_debits_request_counter() {
        let mut acc = account(5);
        let r = reserve(&mut acc, None, QuotaKind::Optimization, ReservationCost::single(100), now()).unwrap();

        assert_eq!(r.requests_remaining, 4);
        assert_eq!(acc.optimization.remaining, 4);
        assert_eq!(acc.testing.remaining, 10);
        assert_eq!(r.school_id, None);
    }

    #[test]
    fn exhausted_counter_rejects_without_mutation() {
        let mut acc = account(0);
        let before = acc.clone();
        let err = reserve(&mut acc, None, QuotaKind::Optimization, ReservationCost::single(1), now()).unwrap_err();

        assert_eq!(err.quota_type, QuotaType::Optimization);
        assert_eq!(err.remaining, 0);
        assert_eq!(err.reset_date, before.reset_date);
        assert_eq!(acc, before);
    }

    #[test]
    fn individual_token_budget_is_checked_before_any_debit() {
        let mut acc = account(5).with_token_budget(50);
        let before = acc.clone();
        let err = reserve(&mut acc, None, QuotaKind::Optimization, ReservationCost::single(51), now()).unwrap_err();

        assert_eq!(err.quota_type, QuotaType::IndividualTokens);
        assert_eq!(acc, before);

        reserve(&mut acc, None, QuotaKind::Optimization, ReservationCost::single(50), now()).unwrap();
        assert_eq!(acc.individual_tokens.unwrap().remaining, 0);
    }

    #[test]
    fn school_pool_replaces_individual_budget() {
        let school = SchoolId::new();
        let mut pool = SchoolSubscriptionPool::new(school, 1_000, now() + Duration::days(3));
        let mut acc = account(5).with_token_budget(10).with_school(school);

        let r = reserve(&mut acc, Some(&mut pool), QuotaKind::Optimization, ReservationCost::single(400), now()).unwrap();
        assert_eq!(r.school_id, Some(school));
        assert_eq!(pool.tokens.remaining, 600);
        assert_eq!(acc.individual_tokens.unwrap().remaining, 10);

        let err = reserve(&mut acc, Some(&mut pool), QuotaKind::Optimization, ReservationCost::single(601), now()).unwrap_err();
        assert_eq!(err.quota_type, QuotaType::SchoolTokens);
        assert_eq!(err.reset_date, pool.reset_date);
        assert_eq!(pool.tokens.remaining, 600);
        assert_eq!(acc.optimization.remaining, 4);
    }

    #[test]
    fn reset_at_boundary_then_noop_within_period() {
        let reset = now();
        let mut acc = QuotaAccount::new(UserId::new(), 3, 5, reset).with_period(BillingPeriod::Days(30));
        acc.optimization.remaining = 0;
        acc.testing.remaining = 1;

        assert!(acc.reset_if_due(reset));
        assert_eq!(acc.optimization.remaining, 5);
        assert_eq!(acc.testing.remaining, 3);
        assert_eq!(acc.reset_date, reset + Duration::days(30));

        acc.optimization.remaining = 2;
        assert!(!acc.reset_if_due(reset + Duration::days(29)));
        assert_eq!(acc.optimization.remaining, 2);
        assert_eq!(acc.reset_date, reset + Duration::days(30));
    }

    #[test]
    fn overdue_reset_moves_one_period_at_a_time() {
        let start = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        let mut acc = QuotaAccount::new(UserId::new(), 3, 5, start).with_period(BillingPeriod::Days(10));
        let late = start + Duration::days(25);

        assert!(acc.reset_if_due(late));
        assert_eq!(acc.reset_date, start + Duration::days(10));
        assert!(acc.reset_if_due(late));
        assert!(acc.reset_if_due(late));
        assert_eq!(acc.reset_date, start + Duration::days(30));
        assert!(!acc.reset_if_due(late));
    }

    #[test]
    fn monthly_reset_holds_the_anchor_day() {
        let jan31 = Utc.with_ymd_and_hms(2026, 1, 31, 0, 0, 0).unwrap();
        let mut acc = QuotaAccount::new(UserId::new(), 1, 1, jan31);

        assert!(acc.reset_if_due(jan31));
        assert_eq!(acc.reset_date, Utc.with_ymd_and_hms(2026, 2, 28, 0, 0, 0).unwrap());
        assert!(acc.reset_if_due(acc.reset_date));
        assert_eq!(acc.reset_date, Utc.with_ymd_and_hms(2026, 3, 31, 0, 0, 0).unwrap());
    }

    #[test]
    fn pool_reset() {
        let mut pool = SchoolSubscriptionPool::new(SchoolId::new(), 100, now()).with_period(BillingPeriod::Days(7));
        pool.tokens.remaining = 3;
        assert!(!pool.reset_if_due(now() - Duration::seconds(1)));
        assert!(pool.reset_if_due(now() + Duration::days(1)));
        assert_eq!(pool.tokens.remaining, 100);
        assert_eq!(pool.reset_date, now() + Duration::days(7));
    }

    proptest! {
        #[test]
        fn successful_debits_never_exceed_limit(
            limit in 0u64..20,
            token_limit in 0u64..5_000,
            costs in proptest::collection::vec(0u64..600, 0..40),
        ) {
            let mut acc = account(limit).with_token_budget(token_limit);
            let mut granted = 0u64;
            let mut tokens = 0u64;

            for c in costs {
                let before = acc.clone();
                match reserve(&mut acc, None, QuotaKind::Optimization, ReservationCost::single(c), now()) {
                    Ok(_) => {
                        granted += 1;
                        tokens += c;
                    }
                    Err(_) => {
                        prop_assert_eq!(&acc, &before);
                    }
                }
            }

            prop_assert!(granted <= limit);
            prop_assert!(tokens <= token_limit);
            prop_assert_eq!(acc.optimization.remaining, limit - granted);
            prop_assert_eq!(acc.individual_tokens.unwrap().remaining, token_limit - tokens);
        }

        #[test]
        fn reset_advances_exactly_one_period(days in 1u32..60, offset_hours in 0i64..5_000) {
            let start = now();
            let mut acc = account(1).with_period(BillingPeriod::Days(days));
            acc.reset_date = start;
            let at = start + Duration::hours(offset_hours);

            prop_assert!(acc.reset_if_due(at));
            prop_assert_eq!(acc.reset_date, start + Duration::days(i64::from(days)));
        }
    }
}
