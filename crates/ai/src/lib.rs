//! `teachprompt-ai`
//!
//! **Responsibility:** the external LLM boundary.
//!
//! - `AiProvider` is the only seam the rest of the system talks to.
//! - Transport-level retry (408/429) lives here, in `RetryingProvider`.
//! - Job-level retry (re-queueing) is the dispatcher's business, not this crate's.

pub mod error;
pub mod http;
pub mod provider;
pub mod retry;
pub mod scripted;

pub use error::ProviderError;
pub use http::{HttpAiProvider, HttpProviderConfig};
pub use provider::{AiProvider, FinishReason, GenerationRequest, GenerationResponse, estimate_tokens};
pub use retry::{RetryingProvider, TransportRetry};
pub use scripted::ScriptedProvider;
