//! `teachprompt-core`: shared identifiers and the domain error model.
//!
//! This crate contains **pure** primitives (no infrastructure concerns).

pub mod error;
pub mod id;

pub use error::DomainError;
pub use id::{JobId, LessonId, PromptId, SchoolId, UserId};
