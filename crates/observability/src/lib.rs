//! Process-wide tracing setup shared by teachprompt binaries.

pub mod tracing;

pub use crate::tracing::{LogFormat, init, init_with};
