//! Postgres-backed store tests. Skipped unless TEST_DATABASE_URL is set.

use std::sync::Arc;
use std::time::Duration;

use chrono::{Datelike, Duration as ChronoDuration, Utc};
use sqlx::PgPool;

use teachprompt_core::{PromptId, SchoolId, UserId};
use teachprompt_infra::jobs::{
    JobCompletion, JobStatus, JobStore, JobStoreError, NewJob, OptimizationMode, PostgresJobStore, RetryPolicy,
};
use teachprompt_infra::migrations;
use teachprompt_infra::quota::PostgresQuotaLedger;
use teachprompt_quota::{
    QuotaAccount, QuotaError, QuotaKind, QuotaLedger, ReservationCost, SchoolSubscriptionPool,
};
use teachprompt_scoring::ScoreResult;

macro_rules! skip_if_no_db {
    () => {
        if std::env::var("TEST_DATABASE_URL").is_err() {
            eprintln!("Skipping test: TEST_DATABASE_URL not set");
            return;
        }
    };
}

/// Claim tests drain the shared queue table, so they run one at a time.
static QUEUE_LOCK: tokio::sync::Mutex<()> = tokio::sync::Mutex::const_new(());

async fn get_test_pool() -> Option<PgPool> {
    let database_url = std::env::var("TEST_DATABASE_URL").ok()?;
    let pool = PgPool::connect(&database_url).await.ok()?;
    migrations::POSTGRES.run(&pool).await.ok()?;
    Some(pool)
}

fn new_job(user: UserId, key: &str) -> NewJob {
    NewJob {
        prompt_id: PromptId::new(),
        prompt_text: "Soạn đề kiểm tra Toán lớp 10".to_string(),
        requested_by: user,
        lesson_id: None,
        mode: OptimizationMode::Curriculum,
        idempotency_key: key.to_string(),
    }
}

fn completion() -> JobCompletion {
    let score = ScoreResult::from_dimensions(Default::default(), Default::default());
    JobCompletion {
        output: "rewritten".to_string(),
        original_score: score.clone(),
        optimized_score: score,
        improvement: 0.0,
        tokens_used: 42,
    }
}

#[tokio::test]
async fn enqueue_is_idempotent_on_the_key_alone() {
    skip_if_no_db!();
    let pool = get_test_pool().await.expect("database");
    let store = PostgresJobStore::new(pool, RetryPolicy::default());
    let user = UserId::new();

    // Keys persist across runs; keep them unique per run.
    let key = format!("dup-{user}");

    let (first, created) = store.enqueue(new_job(user, &key)).await.unwrap();
    let (second, created_again) = store.enqueue(new_job(user, &key)).await.unwrap();

    assert!(created);
    assert!(!created_again);
    assert_eq!(first.id, second.id);
    assert_eq!(first.max_retries, 3);

    // Same key from another requester resolves to the existing row.
    let (other, created_other) = store.enqueue(new_job(UserId::new(), &key)).await.unwrap();
    assert!(!created_other);
    assert_eq!(other.id, first.id);
    assert_eq!(other.requested_by, user);
}

#[tokio::test]
async fn claim_complete_round_trip() {
    skip_if_no_db!();
    let _guard = QUEUE_LOCK.lock().await;
    let pool = get_test_pool().await.expect("database");
    let store = PostgresJobStore::new(pool, RetryPolicy::default());
    let user = UserId::new();
    let (job, _) = store.enqueue(new_job(user, &format!("round-trip-{user}"))).await.unwrap();

    // Other tests share the table, so claim until this job comes up.
    let mut claimed = None;
    while let Some(next) = store.claim_next("pg-worker").await.unwrap() {
        if next.id == job.id {
            claimed = Some(next);
            break;
        }
        store.fail_permanent(next.id, "pg-worker", "drained by test").await.unwrap();
    }
    let claimed = claimed.expect("job was claimable");
    assert_eq!(claimed.status, JobStatus::Processing);
    assert_eq!(claimed.claimed_by.as_deref(), Some("pg-worker"));

    let err = store.complete(job.id, "someone-else", completion()).await.unwrap_err();
    assert!(matches!(err, JobStoreError::NotClaimed { .. }));

    let done = store.complete(job.id, "pg-worker", completion()).await.unwrap();
    assert_eq!(done.status, JobStatus::Completed);
    assert_eq!(done.tokens_used, Some(42));

    let reloaded = store.get(job.id).await.unwrap().unwrap();
    assert_eq!(reloaded.output.as_deref(), Some("rewritten"));
    assert!(reloaded.original_score.is_some());
}

#[tokio::test]
async fn concurrent_claims_never_share_a_row() {
    skip_if_no_db!();
    let _guard = QUEUE_LOCK.lock().await;
    let pool = get_test_pool().await.expect("database");
    let store = Arc::new(PostgresJobStore::new(pool, RetryPolicy::fixed(3, Duration::ZERO)));
    let user = UserId::new();
    for i in 0..10 {
        store.enqueue(new_job(user, &format!("race-{user}-{i}"))).await.unwrap();
    }

    let mut tasks = Vec::new();
    for w in 0..4 {
        let store = store.clone();
        tasks.push(tokio::spawn(async move {
            let mut ids = Vec::new();
            while let Some(job) = store.claim_next(&format!("racer-{w}")).await.unwrap() {
                ids.push(job.id);
            }
            ids
        }));
    }

    let mut all = Vec::new();
    for t in tasks {
        all.extend(t.await.unwrap());
    }
    let total = all.len();
    all.sort_by_key(|id| *id.as_uuid());
    all.dedup();
    assert_eq!(all.len(), total);
}

#[tokio::test]
async fn quota_reservation_is_atomic_and_resets() {
    skip_if_no_db!();
    let pool = get_test_pool().await.expect("database");
    let ledger = Arc::new(PostgresQuotaLedger::new(pool));
    let user = UserId::new();
    let first_reset = Utc::now() + ChronoDuration::days(30);

    ledger
        .upsert_account(QuotaAccount::new(user, 5, 3, first_reset))
        .await
        .unwrap();

    let mut tasks = Vec::new();
    for _ in 0..8 {
        let ledger = ledger.clone();
        tasks.push(tokio::spawn(async move {
            ledger
                .check_and_reserve(user, QuotaKind::Optimization, ReservationCost::single(10), Utc::now())
                .await
        }));
    }
    let mut granted = 0;
    for t in tasks {
        match t.await.unwrap() {
            Ok(_) => granted += 1,
            Err(QuotaError::Exceeded(_)) => {}
            Err(e) => panic!("unexpected error: {e}"),
        }
    }
    assert_eq!(granted, 3);
    assert_eq!(ledger.account(user).await.unwrap().optimization.remaining, 0);

    // Past the reset date the counter refills before the check.
    let later = Utc::now() + ChronoDuration::days(31);
    ledger
        .check_and_reserve(user, QuotaKind::Optimization, ReservationCost::single(10), later)
        .await
        .unwrap();
    let account = ledger.account(user).await.unwrap();
    assert_eq!(account.optimization.remaining, 2);
    assert!(account.reset_date > later);
    assert_eq!(account.anchor_day, first_reset.day());
}

#[tokio::test]
async fn school_accounts_draw_from_the_pool() {
    skip_if_no_db!();
    let pool = get_test_pool().await.expect("database");
    let ledger = PostgresQuotaLedger::new(pool);
    let school = SchoolId::new();
    let reset = Utc::now() + ChronoDuration::days(30);

    ledger
        .upsert_pool(SchoolSubscriptionPool::new(school, 1_000, reset))
        .await
        .unwrap();
    let teacher = UserId::new();
    ledger
        .upsert_account(QuotaAccount::new(teacher, 5, 5, reset).with_school(school))
        .await
        .unwrap();

    ledger
        .check_and_reserve(teacher, QuotaKind::Optimization, ReservationCost::single(600), Utc::now())
        .await
        .unwrap();
    let err = ledger
        .check_and_reserve(teacher, QuotaKind::Optimization, ReservationCost::single(600), Utc::now())
        .await
        .unwrap_err();
    assert!(matches!(err, QuotaError::Exceeded(_)));

    assert_eq!(ledger.pool(school).await.unwrap().tokens.remaining, 400);
    // The rejected reservation left the request counter alone.
    assert_eq!(ledger.account(teacher).await.unwrap().optimization.remaining, 4);
}
