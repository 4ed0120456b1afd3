//! Transport-level retry for rate limits and request timeouts.

use std::time::Duration;

use async_trait::async_trait;
use tracing::warn;

use crate::error::ProviderError;
use crate::provider::{AiProvider, GenerationRequest, GenerationResponse};

/// In-place retry policy for 408/429 responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransportRetry {
    /// Retries after the first attempt (so `3` means up to 4 calls).
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for TransportRetry {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(8),
        }
    }
}

impl TransportRetry {
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Default::default()
        }
    }

    /// Delay before retry number `retry` (1-indexed).
    ///
    /// A server-provided `Retry-After` wins, capped at `max_delay`.
    pub fn delay_for(&self, retry: u32, retry_after: Option<Duration>) -> Duration {
        if let Some(d) = retry_after {
            return d.min(self.max_delay);
        }
        let pow = 1u32 << retry.saturating_sub(1).min(10);
        self.base_delay.saturating_mul(pow).min(self.max_delay)
    }
}

/// Wraps a provider and retries transport-retryable failures in place.
#[derive(Debug, Clone)]
pub struct RetryingProvider<P> {
    inner: P,
    policy: TransportRetry,
}

impl<P> RetryingProvider<P> {
    pub fn new(inner: P, policy: TransportRetry) -> Self {
        Self { inner, policy }
    }

    pub fn inner(&self) -> &P {
        &self.inner
    }
}

#[async_trait]
impl<P> AiProvider for RetryingProvider<P>
where
    P: AiProvider,
{
    async fn generate(&self, request: &GenerationRequest) -> Result<GenerationResponse, ProviderError> {
        let mut retry = 0u32;
        loop {
            match self.inner.generate(request).await {
                Ok(resp) => return Ok(resp),
                Err(err) if err.is_transport_retryable() && retry < self.policy.max_retries => {
                    retry += 1;
                    let delay = self.policy.delay_for(retry, err.retry_after());
                    warn!(
                        provider = self.inner.name(),
                        retry,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "provider call throttled; retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(err) => return Err(err),
            }
        }
    }

    fn name(&self) -> &str {
        self.inner.name()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scripted::ScriptedProvider;

    fn fast() -> TransportRetry {
        TransportRetry {
            max_retries: 3,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
        }
    }

    fn rate_limited() -> ProviderError {
        ProviderError::RateLimited { retry_after: None }
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let p = TransportRetry {
            max_retries: 5,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(350),
        };
        assert_eq!(p.delay_for(1, None), Duration::from_millis(100));
        assert_eq!(p.delay_for(2, None), Duration::from_millis(200));
        assert_eq!(p.delay_for(3, None), Duration::from_millis(350));
        assert_eq!(p.delay_for(1, Some(Duration::from_secs(9))), Duration::from_millis(350));
    }

    #[tokio::test]
    async fn retries_429_until_success() {
        let inner = ScriptedProvider::new();
        inner.push_err(rate_limited());
        inner.push_err(ProviderError::from_status(408, "", None));
        inner.push_ok("done");

        let provider = RetryingProvider::new(inner, fast());
        let resp = provider.generate(&GenerationRequest::new("m", "p")).await.unwrap();

        assert_eq!(resp.content, "done");
        assert_eq!(provider.inner().calls(), 3);
    }

    #[tokio::test]
    async fn gives_up_after_three_retries() {
        let inner = ScriptedProvider::new();
        for _ in 0..5 {
            inner.push_err(rate_limited());
        }

        let provider = RetryingProvider::new(inner, fast());
        let err = provider.generate(&GenerationRequest::new("m", "p")).await.unwrap_err();

        assert!(matches!(err, ProviderError::RateLimited { .. }));
        assert_eq!(provider.inner().calls(), 4);
    }

    #[tokio::test]
    async fn server_errors_are_not_retried_in_place() {
        let inner = ScriptedProvider::new();
        inner.push_err(ProviderError::from_status(502, "bad gateway", None));
        inner.push_ok("never reached");

        let provider = RetryingProvider::new(inner, fast());
        let err = provider.generate(&GenerationRequest::new("m", "p")).await.unwrap_err();

        assert!(err.is_transient());
        assert_eq!(provider.inner().calls(), 1);
    }
}
