use std::time::Duration;

use thiserror::Error;

/// Failure talking to the AI provider.
///
/// Every variant is classified as either transient (worth re-queueing the job)
/// or permanent (the same request will never succeed).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProviderError {
    #[error("provider request timed out after {0:?}")]
    Timeout(Duration),

    #[error("provider rate limited the request")]
    RateLimited { retry_after: Option<Duration> },

    #[error("provider returned HTTP {status}: {body}")]
    Http { status: u16, body: String },

    #[error("provider transport error: {0}")]
    Transport(String),

    #[error("provider rejected credentials (HTTP {0})")]
    Unauthorized(u16),

    #[error("invalid provider request: {0}")]
    InvalidRequest(String),

    #[error("malformed provider response: {0}")]
    MalformedResponse(String),
}

impl ProviderError {
    /// Map a non-success HTTP status to an error.
    pub fn from_status(status: u16, body: impl Into<String>, retry_after: Option<Duration>) -> Self {
        let body = body.into();
        match status {
            401 | 403 => ProviderError::Unauthorized(status),
            429 => ProviderError::RateLimited { retry_after },
            400 | 404 | 413 | 422 => ProviderError::InvalidRequest(format!("HTTP {status}: {body}")),
            _ => ProviderError::Http { status, body },
        }
    }

    /// Timeouts, rate limits, 408 and 5xx are worth another attempt.
    pub fn is_transient(&self) -> bool {
        match self {
            ProviderError::Timeout(_)
            | ProviderError::RateLimited { .. }
            | ProviderError::Transport(_)
            | ProviderError::MalformedResponse(_) => true,
            ProviderError::Http { status, .. } => *status == 408 || *status >= 500,
            ProviderError::Unauthorized(_) | ProviderError::InvalidRequest(_) => false,
        }
    }

    /// Errors the transport layer retries in place (408/429) before giving up.
    pub fn is_transport_retryable(&self) -> bool {
        matches!(
            self,
            ProviderError::RateLimited { .. } | ProviderError::Http { status: 408, .. }
        )
    }

    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            ProviderError::RateLimited { retry_after } => *retry_after,
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_mapping_classifies_correctly() {
        assert!(ProviderError::from_status(500, "boom", None).is_transient());
        assert!(ProviderError::from_status(503, "", None).is_transient());
        assert!(ProviderError::from_status(408, "", None).is_transient());
        assert!(ProviderError::from_status(429, "", None).is_transient());

        assert!(!ProviderError::from_status(400, "bad", None).is_transient());
        assert!(!ProviderError::from_status(401, "", None).is_transient());
        assert!(!ProviderError::from_status(403, "", None).is_transient());
        assert!(!ProviderError::from_status(422, "", None).is_transient());
    }

    #[test]
    fn only_408_and_429_are_retried_at_transport_level() {
        assert!(ProviderError::from_status(429, "", None).is_transport_retryable());
        assert!(ProviderError::from_status(408, "", None).is_transport_retryable());
        assert!(!ProviderError::from_status(500, "", None).is_transport_retryable());
        assert!(!ProviderError::Timeout(Duration::from_secs(1)).is_transport_retryable());
    }

    #[test]
    fn rate_limit_keeps_retry_after() {
        let err = ProviderError::from_status(429, "", Some(Duration::from_secs(3)));
        assert_eq!(err.retry_after(), Some(Duration::from_secs(3)));
    }
}
