//! Configuration loading from environment variables.
//!
//! Every variable is prefixed `TEACHPROMPT_`. Only malformed values are
//! errors; anything unset falls back to a default, and defaults that are
//! unsafe outside development are logged at `warn`.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use tracing::warn;

use teachprompt_ai::TransportRetry;
use teachprompt_core::UserId;
use teachprompt_quota::BillingPeriod;

use crate::dispatch::{DispatcherConfig, GenerationSettings};
use crate::jobs::RetryPolicy;

/// AI provider connection settings.
#[derive(Debug, Clone)]
pub struct ProviderSettings {
    pub base_url: String,
    /// `None` runs the offline echo provider
    pub api_key: Option<String>,
    pub timeout: Duration,
    pub transport_retry: TransportRetry,
    /// Also ask the provider for AI-assisted score components. On by default
    /// when an API key is configured.
    pub ai_scoring: bool,
}

/// Quota account provisioned at startup (dev/demo).
#[derive(Debug, Clone, PartialEq)]
pub struct SeedAccount {
    pub user_id: UserId,
    pub testing_limit: u64,
    pub optimization_limit: u64,
    pub period: BillingPeriod,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub http_addr: SocketAddr,
    /// `None` keeps every store in memory
    pub database_url: Option<String>,
    /// `None` uses the in-process notification bus
    pub redis_url: Option<String>,
    pub provider: ProviderSettings,
    pub generation: GenerationSettings,
    pub dispatcher: DispatcherConfig,
    pub retry: RetryPolicy,
    pub seed: Option<SeedAccount>,
    /// JSON lesson catalogue loaded into the in-memory lesson index
    pub lesson_catalog: Option<PathBuf>,
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// An environment variable has an invalid value.
    #[error("invalid value for {0}: {1}")]
    Invalid(&'static str, String),

    /// Values are individually valid but contradict each other.
    #[error("inconsistent configuration: {0}")]
    Inconsistent(String),
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load from any key/value source. Tests pass a map instead of touching
    /// the process environment.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = Env(lookup);

        let http_addr = env.parse("TEACHPROMPT_HTTP_ADDR", SocketAddr::from(([0, 0, 0, 0], 8080)))?;

        let database_url = env.get("TEACHPROMPT_DATABASE_URL");
        if database_url.is_none() {
            warn!("TEACHPROMPT_DATABASE_URL not set; jobs and quotas are kept in memory");
        }
        let redis_url = env.get("TEACHPROMPT_REDIS_URL");

        let api_key = env.get("TEACHPROMPT_PROVIDER_API_KEY");
        if api_key.is_none() {
            warn!("TEACHPROMPT_PROVIDER_API_KEY not set; using the offline echo provider");
        }

        let defaults = TransportRetry::default();
        let provider = ProviderSettings {
            base_url: env
                .get("TEACHPROMPT_PROVIDER_BASE_URL")
                .unwrap_or_else(|| "https://api.openai.com/v1".to_string()),
            timeout: Duration::from_secs(env.parse("TEACHPROMPT_PROVIDER_TIMEOUT_SECS", 60u64)?),
            transport_retry: TransportRetry {
                max_retries: env.parse("TEACHPROMPT_PROVIDER_MAX_RETRIES", defaults.max_retries)?,
                ..defaults
            },
            ai_scoring: env.parse("TEACHPROMPT_AI_SCORING", api_key.is_some())?,
            api_key,
        };

        let generation_defaults = GenerationSettings::default();
        let generation = GenerationSettings {
            model: env.get("TEACHPROMPT_MODEL").unwrap_or(generation_defaults.model),
            temperature: env.parse("TEACHPROMPT_TEMPERATURE", generation_defaults.temperature)?,
            top_p: env.parse("TEACHPROMPT_TOP_P", generation_defaults.top_p)?,
            max_tokens: env.parse("TEACHPROMPT_MAX_TOKENS", generation_defaults.max_tokens)?,
        };

        let d = DispatcherConfig::default();
        let dispatcher = DispatcherConfig {
            workers: env.parse("TEACHPROMPT_WORKERS", d.workers)?.max(1),
            wait_timeout: env.millis("TEACHPROMPT_WAIT_TIMEOUT_MS", d.wait_timeout)?,
            poll_interval: env.millis("TEACHPROMPT_POLL_INTERVAL_MS", d.poll_interval)?,
            poll_batch: env.parse("TEACHPROMPT_POLL_BATCH", d.poll_batch)?,
            stale_after: env.secs("TEACHPROMPT_STALE_AFTER_SECS", d.stale_after)?,
            sweep_interval: env.secs("TEACHPROMPT_SWEEP_INTERVAL_SECS", d.sweep_interval)?,
            ..d
        };

        let r = RetryPolicy::default();
        let retry = RetryPolicy {
            max_attempts: env.parse("TEACHPROMPT_MAX_ATTEMPTS", r.max_attempts)?,
            base_delay: env.millis("TEACHPROMPT_RETRY_BASE_DELAY_MS", r.base_delay)?,
            max_delay: env.millis("TEACHPROMPT_RETRY_MAX_DELAY_MS", r.max_delay)?,
            ..r
        };
        if retry.max_attempts == 0 {
            return Err(ConfigError::Invalid("TEACHPROMPT_MAX_ATTEMPTS", "must be at least 1".to_string()));
        }

        let seed = match env.get("TEACHPROMPT_SEED_USER_ID") {
            None => None,
            Some(raw) => Some(SeedAccount {
                user_id: raw
                    .parse()
                    .map_err(|_| ConfigError::Invalid("TEACHPROMPT_SEED_USER_ID", format!("'{raw}' is not a UUID")))?,
                testing_limit: env.parse("TEACHPROMPT_SEED_TESTING_QUOTA", 50u64)?,
                optimization_limit: env.parse("TEACHPROMPT_SEED_OPTIMIZATION_QUOTA", 50u64)?,
                period: match env.get("TEACHPROMPT_BILLING_PERIOD_DAYS") {
                    None => BillingPeriod::Monthly,
                    Some(_) => BillingPeriod::Days(env.parse("TEACHPROMPT_BILLING_PERIOD_DAYS", 30u32)?.max(1)),
                },
            }),
        };

        let lesson_catalog = env.get("TEACHPROMPT_LESSON_CATALOG").map(PathBuf::from);
        if lesson_catalog.is_none() {
            warn!("TEACHPROMPT_LESSON_CATALOG not set; prompts get no lesson suggestions");
        }

        let config = Self {
            http_addr,
            database_url,
            redis_url,
            provider,
            generation,
            dispatcher,
            retry,
            seed,
            lesson_catalog,
        };
        config.validate()?;
        Ok(config)
    }

    /// Longest a single attempt can legitimately hold its claim: every
    /// transport retry of the optimization call plus two scoring calls.
    pub fn attempt_budget(&self) -> Duration {
        let p = &self.provider;
        let generate = p.timeout.saturating_mul(1 + p.transport_retry.max_retries)
            + p.transport_retry.max_delay.saturating_mul(p.transport_retry.max_retries);
        let scoring = if p.ai_scoring { p.timeout.saturating_mul(2) } else { Duration::ZERO };
        generate + scoring
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let budget = self.attempt_budget();
        if self.dispatcher.stale_after <= budget {
            return Err(ConfigError::Inconsistent(format!(
                "stale-after ({}s) must exceed the provider budget of one attempt ({}s)",
                self.dispatcher.stale_after.as_secs(),
                budget.as_secs()
            )));
        }
        Ok(())
    }
}

struct Env<F>(F);

impl<F> Env<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn get(&self, key: &str) -> Option<String> {
        (self.0)(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
    }

    fn parse<T: FromStr>(&self, key: &'static str, default: T) -> Result<T, ConfigError> {
        match self.get(key) {
            None => Ok(default),
            Some(raw) => raw
                .parse()
                .map_err(|_| ConfigError::Invalid(key, format!("cannot parse '{raw}'"))),
        }
    }

    fn millis(&self, key: &'static str, default: Duration) -> Result<Duration, ConfigError> {
        let ms = self.parse(key, u64::try_from(default.as_millis()).unwrap_or(u64::MAX))?;
        Ok(Duration::from_millis(ms))
    }

    fn secs(&self, key: &'static str, default: Duration) -> Result<Duration, ConfigError> {
        Ok(Duration::from_secs(self.parse(key, default.as_secs())?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(vars: &[(&str, &str)]) -> Result<AppConfig, ConfigError> {
        let map: HashMap<String, String> = vars.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        AppConfig::from_lookup(|k| map.get(k).cloned())
    }

    #[test]
    fn defaults_are_consistent() {
        let config = load(&[]).unwrap();
        assert_eq!(config.http_addr.port(), 8080);
        assert!(config.database_url.is_none());
        assert!(config.provider.api_key.is_none());
        assert_eq!(config.retry.max_attempts, 3);
        assert_eq!(config.dispatcher.workers, 4);
        assert!(config.dispatcher.stale_after > config.attempt_budget());
        assert!(config.seed.is_none());
        assert!(config.lesson_catalog.is_none());
        assert!(!config.provider.ai_scoring);
    }

    #[test]
    fn provider_key_turns_on_ai_scoring() {
        let config = load(&[("TEACHPROMPT_PROVIDER_API_KEY", "sk-test")]).unwrap();
        assert!(config.provider.ai_scoring);
        assert!(config.dispatcher.stale_after > config.attempt_budget());

        let opted_out = load(&[
            ("TEACHPROMPT_PROVIDER_API_KEY", "sk-test"),
            ("TEACHPROMPT_AI_SCORING", "false"),
        ])
        .unwrap();
        assert!(!opted_out.provider.ai_scoring);
    }

    #[test]
    fn overrides_are_applied() {
        let user = UserId::new();
        let user_str = user.to_string();
        let config = load(&[
            ("TEACHPROMPT_HTTP_ADDR", "127.0.0.1:9000"),
            ("TEACHPROMPT_DATABASE_URL", "postgres://localhost/teachprompt"),
            ("TEACHPROMPT_WORKERS", "8"),
            ("TEACHPROMPT_MAX_ATTEMPTS", "5"),
            ("TEACHPROMPT_MODEL", "gpt-4o"),
            ("TEACHPROMPT_SEED_USER_ID", user_str.as_str()),
            ("TEACHPROMPT_BILLING_PERIOD_DAYS", "7"),
        ])
        .unwrap();

        assert_eq!(config.http_addr.port(), 9000);
        assert_eq!(config.database_url.as_deref(), Some("postgres://localhost/teachprompt"));
        assert_eq!(config.dispatcher.workers, 8);
        assert_eq!(config.retry.max_attempts, 5);
        assert_eq!(config.generation.model, "gpt-4o");

        let seed = config.seed.unwrap();
        assert_eq!(seed.user_id, user);
        assert_eq!(seed.period, BillingPeriod::Days(7));
        assert_eq!(seed.optimization_limit, 50);
    }

    #[test]
    fn malformed_values_name_the_variable() {
        let err = load(&[("TEACHPROMPT_WORKERS", "many")]).unwrap_err();
        assert!(err.to_string().contains("TEACHPROMPT_WORKERS"));

        assert!(load(&[("TEACHPROMPT_MAX_ATTEMPTS", "0")]).is_err());
        assert!(load(&[("TEACHPROMPT_SEED_USER_ID", "not-a-uuid")]).is_err());
    }

    #[test]
    fn stale_after_must_cover_a_full_attempt() {
        let err = load(&[
            ("TEACHPROMPT_PROVIDER_TIMEOUT_SECS", "120"),
            ("TEACHPROMPT_STALE_AFTER_SECS", "300"),
        ])
        .unwrap_err();
        assert!(matches!(err, ConfigError::Inconsistent(_)));
    }

    #[test]
    fn blank_values_fall_back_to_defaults() {
        let config = load(&[("TEACHPROMPT_DATABASE_URL", "  "), ("TEACHPROMPT_WORKERS", "")]).unwrap();
        assert!(config.database_url.is_none());
        assert_eq!(config.dispatcher.workers, 4);
    }
}
