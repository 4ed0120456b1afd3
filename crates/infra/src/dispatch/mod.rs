//! Optimization dispatcher: workers that claim jobs and run them to a
//! terminal or re-queued state.
//!
//! ## Components
//!
//! - `JobProcessor`: one claim-and-process attempt (`run_once`)
//! - `Dispatcher`: spawns the worker pool, poller and staleness sweeper
//! - `DispatcherHandle`: graceful shutdown and runtime stats

pub mod config;
pub mod error;
pub mod processor;
pub mod runtime;

pub use config::{DispatcherConfig, GenerationSettings};
pub use error::{Disposition, ProcessError};
pub use processor::{JobOutcome, JobProcessor};
pub use runtime::{Dispatcher, DispatcherHandle, DispatcherStats, StatsRecorder};
