//! `teachprompt-quota`
//!
//! **Responsibility:** admission control for billable provider calls.
//!
//! - Pure account/pool model and the reserve/reset rules (no IO).
//! - `QuotaLedger` is the async seam; storage-backed ledgers live in infra.
//!
//! Units: testing and optimization quotas count requests; individual token
//! budgets and school pools count tokens.

pub mod account;
pub mod error;
pub mod ledger;
pub mod period;

pub use account::{QuotaAccount, QuotaCounter, SchoolSubscriptionPool, reserve};
pub use error::{QuotaError, QuotaExceeded};
pub use ledger::{QuotaKind, QuotaLedger, QuotaType, Reservation, ReservationCost};
pub use period::BillingPeriod;
