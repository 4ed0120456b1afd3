//! Scripted provider for tests/dev.

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::error::ProviderError;
use crate::provider::{AiProvider, GenerationRequest, GenerationResponse};

type Responder = Box<dyn Fn(&GenerationRequest) -> Result<GenerationResponse, ProviderError> + Send + Sync>;

/// Provider that replays queued outcomes, then falls back to a responder.
///
/// Every request is recorded so tests can assert on what was sent.
pub struct ScriptedProvider {
    script: Mutex<VecDeque<Result<GenerationResponse, ProviderError>>>,
    responder: Option<Responder>,
    requests: Mutex<Vec<GenerationRequest>>,
}

impl std::fmt::Debug for ScriptedProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScriptedProvider")
            .field("queued", &self.script.lock().map(|s| s.len()).unwrap_or(0))
            .field("calls", &self.calls())
            .finish()
    }
}

impl Default for ScriptedProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedProvider {
    pub fn new() -> Self {
        Self {
            script: Mutex::new(VecDeque::new()),
            responder: None,
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Answer every unscripted request with `f`.
    pub fn with_responder<F>(mut self, f: F) -> Self
    where
        F: Fn(&GenerationRequest) -> Result<GenerationResponse, ProviderError> + Send + Sync + 'static,
    {
        self.responder = Some(Box::new(f));
        self
    }

    /// Echo-style provider: returns `content` for every unscripted request.
    pub fn always(content: impl Into<String>) -> Self {
        let content = content.into();
        Self::new().with_responder(move |_| Ok(GenerationResponse::stop(content.clone(), 42)))
    }

    pub fn push_ok(&self, content: impl Into<String>) {
        self.push(Ok(GenerationResponse::stop(content, 42)));
    }

    pub fn push_err(&self, err: ProviderError) {
        self.push(Err(err));
    }

    pub fn push(&self, outcome: Result<GenerationResponse, ProviderError>) {
        if let Ok(mut s) = self.script.lock() {
            s.push_back(outcome);
        }
    }

    pub fn calls(&self) -> usize {
        self.requests.lock().map(|r| r.len()).unwrap_or(0)
    }

    pub fn requests(&self) -> Vec<GenerationRequest> {
        self.requests.lock().map(|r| r.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl AiProvider for ScriptedProvider {
    async fn generate(&self, request: &GenerationRequest) -> Result<GenerationResponse, ProviderError> {
        if let Ok(mut r) = self.requests.lock() {
            r.push(request.clone());
        }

        let scripted = self.script.lock().ok().and_then(|mut s| s.pop_front());
        match (scripted, &self.responder) {
            (Some(outcome), _) => outcome,
            (None, Some(f)) => f(request),
            (None, None) => Err(ProviderError::Transport("script exhausted".to_string())),
        }
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn script_then_responder() {
        let p = ScriptedProvider::always("fallback");
        p.push_ok("first");

        let req = GenerationRequest::new("m", "p");
        assert_eq!(p.generate(&req).await.unwrap().content, "first");
        assert_eq!(p.generate(&req).await.unwrap().content, "fallback");
        assert_eq!(p.calls(), 2);
    }

    #[tokio::test]
    async fn exhausted_script_is_a_transient_error() {
        let p = ScriptedProvider::new();
        let err = p.generate(&GenerationRequest::new("m", "p")).await.unwrap_err();
        assert!(err.is_transient());
    }
}
