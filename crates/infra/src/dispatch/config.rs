use std::time::Duration;

/// Model parameters for the optimization call.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationSettings {
    pub model: String,
    pub temperature: f32,
    pub top_p: f32,
    pub max_tokens: u32,
}

impl Default for GenerationSettings {
    fn default() -> Self {
        Self {
            model: "gpt-4o-mini".to_string(),
            temperature: 0.7,
            top_p: 1.0,
            max_tokens: 1024,
        }
    }
}

/// Dispatcher runtime configuration.
#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    /// Name for logging and worker ids
    pub name: String,
    /// Worker tasks (and runtime threads)
    pub workers: usize,
    /// Longest a worker sleeps without a wake-up before re-checking the store
    pub wait_timeout: Duration,
    /// How often the poller scans for claimable jobs
    pub poll_interval: Duration,
    /// Rows fetched per poll
    pub poll_batch: usize,
    /// A `Processing` row untouched this long is presumed abandoned
    pub stale_after: Duration,
    /// How often the sweeper runs
    pub sweep_interval: Duration,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            name: "optimizer".to_string(),
            workers: 4,
            wait_timeout: Duration::from_secs(5),
            poll_interval: Duration::from_secs(10),
            poll_batch: 32,
            stale_after: Duration::from_secs(600),
            sweep_interval: Duration::from_secs(60),
        }
    }
}

impl DispatcherConfig {
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    pub fn with_wait_timeout(mut self, timeout: Duration) -> Self {
        self.wait_timeout = timeout;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_stale_after(mut self, stale_after: Duration) -> Self {
        self.stale_after = stale_after;
        self
    }

    pub fn with_sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval = interval;
        self
    }
}
