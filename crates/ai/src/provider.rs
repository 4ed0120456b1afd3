use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::ProviderError;

/// One text-generation call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationRequest {
    /// Optional system instruction.
    pub system: Option<String>,
    /// User prompt.
    pub prompt: String,
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
    pub top_p: f32,
}

impl GenerationRequest {
    pub fn new(model: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            system: None,
            prompt: prompt.into(),
            model: model.into(),
            temperature: 0.7,
            max_tokens: 2048,
            top_p: 1.0,
        }
    }

    pub fn with_system(mut self, system: impl Into<String>) -> Self {
        self.system = Some(system.into());
        self
    }

    pub fn with_sampling(mut self, temperature: f32, top_p: f32) -> Self {
        self.temperature = temperature;
        self.top_p = top_p;
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    /// Reject requests the provider would refuse anyway.
    pub fn validate(&self) -> Result<(), ProviderError> {
        if self.prompt.trim().is_empty() {
            return Err(ProviderError::InvalidRequest("prompt is empty".to_string()));
        }
        if self.model.trim().is_empty() {
            return Err(ProviderError::InvalidRequest("model is empty".to_string()));
        }
        if !(0.0..=2.0).contains(&self.temperature) {
            return Err(ProviderError::InvalidRequest(format!(
                "temperature {} outside [0, 2]",
                self.temperature
            )));
        }
        if !(self.top_p > 0.0 && self.top_p <= 1.0) {
            return Err(ProviderError::InvalidRequest(format!(
                "top_p {} outside (0, 1]",
                self.top_p
            )));
        }
        if self.max_tokens == 0 {
            return Err(ProviderError::InvalidRequest("max_tokens must be > 0".to_string()));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    Stop,
    Length,
    ContentFilter,
    Other(String),
}

impl FinishReason {
    pub fn parse(raw: Option<&str>) -> Self {
        match raw {
            Some("stop") | None => FinishReason::Stop,
            Some("length") => FinishReason::Length,
            Some("content_filter") => FinishReason::ContentFilter,
            Some(other) => FinishReason::Other(other.to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenerationResponse {
    pub content: String,
    pub tokens_used: u32,
    pub finish_reason: FinishReason,
}

impl GenerationResponse {
    pub fn stop(content: impl Into<String>, tokens_used: u32) -> Self {
        Self {
            content: content.into(),
            tokens_used,
            finish_reason: FinishReason::Stop,
        }
    }
}

/// External LLM boundary.
#[async_trait]
pub trait AiProvider: Send + Sync {
    async fn generate(&self, request: &GenerationRequest) -> Result<GenerationResponse, ProviderError>;

    /// Short name for logs.
    fn name(&self) -> &str {
        "provider"
    }
}

#[async_trait]
impl<P> AiProvider for Arc<P>
where
    P: AiProvider + ?Sized,
{
    async fn generate(&self, request: &GenerationRequest) -> Result<GenerationResponse, ProviderError> {
        (**self).generate(request).await
    }

    fn name(&self) -> &str {
        (**self).name()
    }
}

/// Rough token estimate (~4 chars per token), used for up-front budget reservation.
pub fn estimate_tokens(text: &str) -> u64 {
    let chars = text.chars().count() as u64;
    chars.div_ceil(4)
}
