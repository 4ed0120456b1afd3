//! Infrastructure layer: job stores, quota ledgers, notification wiring,
//! the optimization dispatcher and configuration.

pub mod config;
pub mod dispatch;
pub mod jobs;
pub mod migrations;
pub mod notify;
pub mod quota;
pub mod service;

pub use config::{AppConfig, ConfigError};
pub use dispatch::{Dispatcher, DispatcherConfig, DispatcherHandle, DispatcherStats, JobProcessor, StatsRecorder};
pub use service::{EnqueueError, EnqueueRequest, JobStatusView, OptimizationService};
