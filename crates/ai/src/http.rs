//! OpenAI-compatible chat-completions client.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, RETRY_AFTER};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use crate::error::ProviderError;
use crate::provider::{AiProvider, FinishReason, GenerationRequest, GenerationResponse};

#[derive(Debug, Clone)]
pub struct HttpProviderConfig {
    /// e.g. `https://api.openai.com/v1`
    pub base_url: String,
    pub api_key: String,
    /// Whole-request timeout; elapsing counts as a transient failure.
    pub timeout: Duration,
}

/// HTTP provider speaking the `/chat/completions` wire format.
#[derive(Debug, Clone)]
pub struct HttpAiProvider {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
    timeout: Duration,
}

impl HttpAiProvider {
    pub fn new(config: HttpProviderConfig) -> Result<Self, ProviderError> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| ProviderError::Transport(e.to_string()))?;

        Ok(Self {
            client,
            endpoint: format!("{}/chat/completions", config.base_url.trim_end_matches('/')),
            api_key: config.api_key,
            timeout: config.timeout,
        })
    }

    fn map_send_error(&self, err: reqwest::Error) -> ProviderError {
        if err.is_timeout() {
            ProviderError::Timeout(self.timeout)
        } else {
            ProviderError::Transport(err.to_string())
        }
    }
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
    max_tokens: u32,
    top_p: f32,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
    usage: Option<ChatUsage>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatChoiceMessage {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatUsage {
    total_tokens: u32,
}

fn build_body(request: &GenerationRequest) -> ChatRequest<'_> {
    let mut messages = Vec::with_capacity(2);
    if let Some(system) = request.system.as_deref() {
        messages.push(ChatMessage {
            role: "system",
            content: system,
        });
    }
    messages.push(ChatMessage {
        role: "user",
        content: &request.prompt,
    });

    ChatRequest {
        model: &request.model,
        messages,
        temperature: request.temperature,
        max_tokens: request.max_tokens,
        top_p: request.top_p,
    }
}

fn parse_retry_after(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get(RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}

fn parse_body(body: &str) -> Result<GenerationResponse, ProviderError> {
    let parsed: ChatResponse =
        serde_json::from_str(body).map_err(|e| ProviderError::MalformedResponse(e.to_string()))?;

    let choice = parsed
        .choices
        .into_iter()
        .next()
        .ok_or_else(|| ProviderError::MalformedResponse("no choices in response".to_string()))?;

    let content = choice
        .message
        .content
        .filter(|c| !c.trim().is_empty())
        .ok_or_else(|| ProviderError::MalformedResponse("empty completion".to_string()))?;

    Ok(GenerationResponse {
        content,
        tokens_used: parsed.usage.map(|u| u.total_tokens).unwrap_or(0),
        finish_reason: FinishReason::parse(choice.finish_reason.as_deref()),
    })
}

#[async_trait]
impl AiProvider for HttpAiProvider {
    #[instrument(skip(self, request), fields(model = %request.model), err)]
    async fn generate(&self, request: &GenerationRequest) -> Result<GenerationResponse, ProviderError> {
        request.validate()?;

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&build_body(request))
            .send()
            .await
            .map_err(|e| self.map_send_error(e))?;

        let status = response.status();
        let retry_after = parse_retry_after(response.headers());
        let body = response.text().await.map_err(|e| self.map_send_error(e))?;

        if !status.is_success() {
            return Err(ProviderError::from_status(status.as_u16(), body, retry_after));
        }

        let resp = parse_body(&body)?;
        debug!(tokens_used = resp.tokens_used, "provider call succeeded");
        Ok(resp)
    }

    fn name(&self) -> &str {
        "http"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::HeaderValue;

    #[test]
    fn body_includes_system_message_first() {
        let req = GenerationRequest::new("gpt", "rewrite this").with_system("you are a tutor");
        let json = serde_json::to_value(build_body(&req)).unwrap();

        assert_eq!(json["messages"][0]["role"], "system");
        assert_eq!(json["messages"][1]["role"], "user");
        assert_eq!(json["messages"][1]["content"], "rewrite this");
        assert_eq!(json["model"], "gpt");
    }

    #[test]
    fn parses_completion() {
        let body = r#"{
            "choices": [{"message": {"content": "better prompt"}, "finish_reason": "length"}],
            "usage": {"total_tokens": 321}
        }"#;
        let resp = parse_body(body).unwrap();

        assert_eq!(resp.content, "better prompt");
        assert_eq!(resp.tokens_used, 321);
        assert_eq!(resp.finish_reason, FinishReason::Length);
    }

    #[test]
    fn empty_choices_are_malformed() {
        let err = parse_body(r#"{"choices": []}"#).unwrap_err();
        assert!(matches!(err, ProviderError::MalformedResponse(_)));
        assert!(parse_body("not json").is_err());
    }

    #[test]
    fn retry_after_seconds_are_parsed() {
        let mut headers = HeaderMap::new();
        assert_eq!(parse_retry_after(&headers), None);

        headers.insert(RETRY_AFTER, HeaderValue::from_static("7"));
        assert_eq!(parse_retry_after(&headers), Some(Duration::from_secs(7)));
    }

    #[test]
    fn endpoint_tolerates_trailing_slash() {
        let p = HttpAiProvider::new(HttpProviderConfig {
            base_url: "http://localhost:9000/v1/".to_string(),
            api_key: "k".to_string(),
            timeout: Duration::from_secs(1),
        })
        .unwrap();
        assert_eq!(p.endpoint, "http://localhost:9000/v1/chat/completions");
    }
}
