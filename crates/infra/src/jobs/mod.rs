//! Optimization job queue.
//!
//! - `OptimizationJob`: the queued request and its state machine
//! - `JobStore`: persistence with exclusive claims (in-memory or Postgres)
//! - `RetryPolicy`: bounded attempts with backoff between them

pub mod postgres;
pub mod store;
pub mod types;

pub use postgres::PostgresJobStore;
pub use store::{InMemoryJobStore, JobStats, JobStore, JobStoreError, STALE_CLAIM_MESSAGE};
pub use types::{
    BackoffStrategy, JobCompletion, JobStatus, NewJob, OptimizationJob, OptimizationMode, RetryPolicy,
};
