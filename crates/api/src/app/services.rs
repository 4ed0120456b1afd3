//! Infrastructure wiring: stores, bus, provider and the dispatcher.

use std::path::Path;
use std::sync::Arc;

use sqlx::PgPool;
use tracing::info;

use teachprompt_ai::{
    AiProvider, GenerationRequest, GenerationResponse, HttpAiProvider, HttpProviderConfig, ProviderError,
    RetryingProvider, ScriptedProvider,
};
use teachprompt_curriculum::{CurriculumResolver, InMemoryLessonIndex, LessonEntry, LessonIndex};
use teachprompt_infra::config::{AppConfig, SeedAccount};
use teachprompt_infra::dispatch::{Dispatcher, DispatcherHandle, JobProcessor, StatsRecorder};
use teachprompt_infra::jobs::{InMemoryJobStore, JobStats, JobStore, JobStoreError, PostgresJobStore};
use teachprompt_infra::migrations;
use teachprompt_infra::notify::JobBus;
use teachprompt_infra::quota::{InMemoryQuotaLedger, PostgresQuotaLedger};
use teachprompt_infra::service::OptimizationService;
use teachprompt_quota::{QuotaAccount, QuotaError, QuotaLedger};
use teachprompt_scoring::ScoringEngine;

#[derive(Debug, thiserror::Error)]
pub enum ServicesError {
    #[error("database connection failed: {0}")]
    Database(#[from] sqlx::Error),
    #[error("migration failed: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),
    #[error("provider setup failed: {0}")]
    Provider(#[from] ProviderError),
    #[error("quota seeding failed: {0}")]
    Quota(#[from] QuotaError),
    #[error("notification bus setup failed: {0}")]
    Bus(String),
    #[error("lesson catalog unusable: {0}")]
    Catalog(String),
    #[error("dispatcher failed to start: {0}")]
    Spawn(#[from] std::io::Error),
}

/// Handles the HTTP layer needs.
#[derive(Clone)]
pub struct AppServices {
    optimizer: OptimizationService<JobBus>,
    stats: StatsRecorder,
}

impl AppServices {
    pub fn optimizer(&self) -> &OptimizationService<JobBus> {
        &self.optimizer
    }

    pub fn dispatcher_stats(&self) -> &StatsRecorder {
        &self.stats
    }

    pub async fn job_stats(&self) -> Result<JobStats, JobStoreError> {
        self.optimizer.store().stats().await
    }
}

/// Storage and transport selected by configuration.
#[derive(Clone)]
pub struct Backends {
    pub store: Arc<dyn JobStore>,
    pub quota: Arc<dyn QuotaLedger>,
    pub bus: JobBus,
    pub lessons: Arc<dyn LessonIndex>,
}

impl Backends {
    /// Empty lesson catalogue; tests insert what they need.
    pub fn in_memory(config: &AppConfig) -> Self {
        Self {
            store: InMemoryJobStore::arc(config.retry.clone()),
            quota: InMemoryQuotaLedger::arc(),
            bus: JobBus::in_memory(),
            lessons: Arc::new(InMemoryLessonIndex::new()),
        }
    }

    pub async fn connect(config: &AppConfig) -> Result<Self, ServicesError> {
        let mut backends = match &config.database_url {
            Some(url) => {
                let pool = PgPool::connect(url).await?;
                migrations::run_postgres(&pool).await?;
                info!("connected to Postgres; migrations applied");
                Self {
                    store: Arc::new(PostgresJobStore::new(pool.clone(), config.retry.clone())),
                    quota: Arc::new(PostgresQuotaLedger::new(pool)),
                    bus: JobBus::in_memory(),
                    lessons: Arc::new(InMemoryLessonIndex::new()),
                }
            }
            None => Self::in_memory(config),
        };

        if let Some(url) = &config.redis_url {
            backends.bus = redis_bus(url)?;
        }
        if let Some(path) = &config.lesson_catalog {
            let index = load_lesson_catalog(path)?;
            info!(path = %path.display(), lessons = index.len(), "loaded lesson catalog");
            backends.lessons = Arc::new(index);
        }
        Ok(backends)
    }
}

/// Read a JSON array of lesson entries into an in-memory index.
pub fn load_lesson_catalog(path: &Path) -> Result<InMemoryLessonIndex, ServicesError> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| ServicesError::Catalog(format!("{}: {e}", path.display())))?;
    parse_lesson_catalog(&raw).map_err(|e| match e {
        ServicesError::Catalog(msg) => ServicesError::Catalog(format!("{}: {msg}", path.display())),
        other => other,
    })
}

pub fn parse_lesson_catalog(raw: &str) -> Result<InMemoryLessonIndex, ServicesError> {
    let entries: Vec<LessonEntry> =
        serde_json::from_str(raw).map_err(|e| ServicesError::Catalog(e.to_string()))?;
    Ok(InMemoryLessonIndex::with_lessons(
        entries.into_iter().map(LessonEntry::normalized).collect(),
    ))
}

#[cfg(feature = "redis")]
fn redis_bus(url: &str) -> Result<JobBus, ServicesError> {
    let bus = teachprompt_infra::notify::RedisPubSubNotificationBus::new(url)
        .map_err(|e| ServicesError::Bus(e.to_string()))?;
    info!("using Redis pub/sub for job notifications");
    Ok(JobBus::Redis(bus))
}

#[cfg(not(feature = "redis"))]
fn redis_bus(_url: &str) -> Result<JobBus, ServicesError> {
    tracing::warn!("TEACHPROMPT_REDIS_URL set but redis feature not enabled, falling back to in-process notifications");
    Ok(JobBus::in_memory())
}

/// HTTP provider with transport retries, or the offline echo provider when
/// no API key is configured.
pub fn provider_from_config(config: &AppConfig) -> Result<Arc<dyn AiProvider>, ServicesError> {
    let settings = &config.provider;
    match &settings.api_key {
        Some(api_key) => {
            let http = HttpAiProvider::new(HttpProviderConfig {
                base_url: settings.base_url.clone(),
                api_key: api_key.clone(),
                timeout: settings.timeout,
            })?;
            Ok(Arc::new(RetryingProvider::new(http, settings.transport_retry)))
        }
        None => Ok(Arc::new(offline_provider())),
    }
}

/// Dev-only: restates the prompt with an explicit output format so the whole
/// pipeline runs without network access.
pub fn offline_provider() -> ScriptedProvider {
    ScriptedProvider::new().with_responder(|req: &GenerationRequest| {
        let content = format!(
            "{}\n\nTrình bày kết quả dạng danh sách đánh số, kèm đáp án và mục tiêu bài học.",
            req.prompt.trim()
        );
        Ok(GenerationResponse::stop(content, 0))
    })
}

/// Provision the configured account unless it already exists.
pub async fn seed_account(quota: &dyn QuotaLedger, seed: &SeedAccount) -> Result<(), ServicesError> {
    match quota.account(seed.user_id).await {
        Ok(_) => return Ok(()),
        Err(QuotaError::AccountNotFound(_)) => {}
        Err(e) => return Err(e.into()),
    }

    let now = chrono::Utc::now();
    let account = QuotaAccount::new(
        seed.user_id,
        seed.testing_limit,
        seed.optimization_limit,
        seed.period.advance(now),
    )
    .with_period(seed.period);
    quota.upsert_account(account).await?;
    info!(user_id = %seed.user_id, optimization_quota = seed.optimization_limit, "seeded quota account");
    Ok(())
}

/// Everything `main` has to keep alive and shut down.
#[derive(Debug)]
pub struct AppRuntime {
    pub services: Arc<AppServices>,
    dispatcher: DispatcherHandle,
}

impl AppRuntime {
    /// Stop the worker pool and wait for in-flight jobs. Blocks.
    pub fn shutdown(self) {
        self.dispatcher.shutdown();
    }
}

impl std::fmt::Debug for AppServices {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppServices").finish_non_exhaustive()
    }
}

/// Spawn the dispatcher over `backends` and build the HTTP services.
pub fn start(
    config: &AppConfig,
    backends: Backends,
    provider: Arc<dyn AiProvider>,
) -> Result<AppRuntime, ServicesError> {
    let scoring = if config.provider.ai_scoring {
        ScoringEngine::with_ai(provider.clone(), config.generation.model.clone())
    } else {
        ScoringEngine::rule_based()
    };

    let processor = JobProcessor::new(backends.store.clone(), backends.quota.clone(), provider)
        .with_resolver(CurriculumResolver::with_index(backends.lessons.clone()))
        .with_scoring(scoring)
        .with_generation(config.generation.clone());

    let dispatcher = Dispatcher::new(processor).spawn(config.dispatcher.clone(), &backends.bus)?;
    let stats = dispatcher.stats_recorder();

    let services = AppServices {
        optimizer: OptimizationService::new(backends.store, backends.bus),
        stats,
    };

    Ok(AppRuntime {
        services: Arc::new(services),
        dispatcher,
    })
}

/// Full wiring from configuration (used by `main`).
pub async fn build_services(config: &AppConfig) -> Result<AppRuntime, ServicesError> {
    let backends = Backends::connect(config).await?;
    if let Some(seed) = &config.seed {
        seed_account(backends.quota.as_ref(), seed).await?;
    }
    let provider = provider_from_config(config)?;
    start(config, backends, provider)
}
