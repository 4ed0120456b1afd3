//! Worker pool runtime.
//!
//! The dispatcher owns a dedicated multi-thread tokio runtime on its own OS
//! thread, so provider calls never compete with the HTTP runtime. Inside it:
//!
//! - `workers` worker tasks, each draining claimable jobs and then waiting for
//!   a bus notification, a poller wake-up, or `wait_timeout`
//! - a poller that scans the store and wakes idle workers (the backstop for
//!   lost notifications)
//! - a sweeper that requeues claims older than `stale_after`

use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Instant;

use chrono::Utc;
use tokio::sync::{Notify, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use teachprompt_events::{JobNotification, NotificationBus, Subscription};

use crate::jobs::JobStoreError;

use super::config::DispatcherConfig;
use super::processor::{JobOutcome, JobProcessor};

/// Dispatcher runtime statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize)]
pub struct DispatcherStats {
    pub jobs_processed: u64,
    pub jobs_succeeded: u64,
    pub jobs_retried: u64,
    pub jobs_failed: u64,
    pub lost_claims: u64,
    pub current_running: usize,
    pub uptime_secs: u64,
}

/// Shared, cloneable stats sink.
#[derive(Debug, Clone)]
pub struct StatsRecorder {
    inner: Arc<Mutex<DispatcherStats>>,
    started: Instant,
}

impl Default for StatsRecorder {
    fn default() -> Self {
        Self {
            inner: Arc::new(Mutex::new(DispatcherStats::default())),
            started: Instant::now(),
        }
    }
}

impl StatsRecorder {
    fn update(&self, f: impl FnOnce(&mut DispatcherStats)) {
        // Counters stay usable even if a holder panicked.
        let mut stats = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        f(&mut stats);
    }

    fn started(&self) {
        self.update(|s| s.current_running += 1);
    }

    fn finished(&self, outcome: Option<&JobOutcome>) {
        self.update(|s| {
            s.current_running = s.current_running.saturating_sub(1);
            let Some(outcome) = outcome else {
                return;
            };
            s.jobs_processed += 1;
            match outcome {
                JobOutcome::Completed { .. } => s.jobs_succeeded += 1,
                JobOutcome::Retried { .. } => s.jobs_retried += 1,
                JobOutcome::Failed { .. } => s.jobs_failed += 1,
                JobOutcome::LostClaim { .. } => s.lost_claims += 1,
            }
        });
    }

    pub fn snapshot(&self) -> DispatcherStats {
        let mut stats = self.inner.lock().unwrap_or_else(|e| e.into_inner()).clone();
        stats.uptime_secs = self.started.elapsed().as_secs();
        stats
    }
}

/// Handle to control a running dispatcher.
#[derive(Debug)]
pub struct DispatcherHandle {
    shutdown: watch::Sender<bool>,
    join: Option<thread::JoinHandle<()>>,
    stats: StatsRecorder,
}

impl DispatcherHandle {
    /// Stop waiting workers, let in-flight jobs finish, and join the runtime thread.
    ///
    /// Blocks; call it from `spawn_blocking` inside async code.
    pub fn shutdown(mut self) {
        let _ = self.shutdown.send(true);
        if let Some(j) = self.join.take() {
            let _ = j.join();
        }
    }

    pub fn stats(&self) -> DispatcherStats {
        self.stats.snapshot()
    }

    pub fn stats_recorder(&self) -> StatsRecorder {
        self.stats.clone()
    }
}

/// Background optimization dispatcher.
#[derive(Debug, Clone)]
pub struct Dispatcher {
    processor: Arc<JobProcessor>,
}

impl Dispatcher {
    pub fn new(processor: JobProcessor) -> Self {
        Self {
            processor: Arc::new(processor),
        }
    }

    /// Claim and process a single job on the caller's runtime.
    pub async fn run_once(&self, worker_id: &str) -> Result<Option<JobOutcome>, JobStoreError> {
        self.processor.run_once(worker_id).await
    }

    /// Start the worker pool. Each worker gets its own subscription on `bus`.
    pub fn spawn<B>(self, config: DispatcherConfig, bus: &B) -> std::io::Result<DispatcherHandle>
    where
        B: NotificationBus<JobNotification>,
    {
        let workers = config.workers.max(1);
        let subscriptions: Vec<_> = (0..workers).map(|_| bus.subscribe()).collect();

        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(workers)
            .thread_name(format!("{}-worker", config.name))
            .enable_all()
            .build()?;

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let stats = StatsRecorder::default();
        let stats_clone = stats.clone();

        let join = thread::Builder::new()
            .name(config.name.clone())
            .spawn(move || {
                runtime.block_on(run_pool(self.processor, config, subscriptions, shutdown_rx, stats_clone));
            })?;

        Ok(DispatcherHandle {
            shutdown: shutdown_tx,
            join: Some(join),
            stats,
        })
    }
}

async fn run_pool(
    processor: Arc<JobProcessor>,
    config: DispatcherConfig,
    subscriptions: Vec<Subscription<JobNotification>>,
    shutdown: watch::Receiver<bool>,
    stats: StatsRecorder,
) {
    info!(dispatcher = %config.name, workers = subscriptions.len(), "dispatcher started");

    let wake = Arc::new(Notify::new());
    let instance = uuid::Uuid::now_v7().simple().to_string();
    let mut tasks: Vec<JoinHandle<()>> = Vec::new();

    for (i, subscription) in subscriptions.into_iter().enumerate() {
        let worker = Worker {
            id: format!("{}-{}-{}", config.name, instance, i),
            processor: processor.clone(),
            wake: wake.clone(),
            shutdown: shutdown.clone(),
            stats: stats.clone(),
        };
        tasks.push(tokio::spawn(worker.run(Some(subscription), config.wait_timeout)));
    }

    tasks.push(tokio::spawn(poll_loop(
        processor.clone(),
        config.clone(),
        wake.clone(),
        shutdown.clone(),
    )));
    tasks.push(tokio::spawn(sweep_loop(processor, config.clone(), wake, shutdown)));

    for task in tasks {
        if let Err(e) = task.await {
            error!(dispatcher = %config.name, error = %e, "dispatcher task panicked");
        }
    }

    info!(dispatcher = %config.name, "dispatcher stopped");
}

enum Wake {
    Shutdown,
    Notified,
    BusClosed,
    Timer,
}

struct Worker {
    id: String,
    processor: Arc<JobProcessor>,
    wake: Arc<Notify>,
    shutdown: watch::Receiver<bool>,
    stats: StatsRecorder,
}

impl Worker {
    async fn run(mut self, mut subscription: Option<Subscription<JobNotification>>, wait_timeout: std::time::Duration) {
        debug!(worker = %self.id, "worker started");

        while !*self.shutdown.borrow() {
            self.drain().await;

            let wake = tokio::select! {
                changed = self.shutdown.changed() => {
                    if changed.is_err() { Wake::Shutdown } else { Wake::Timer }
                }
                msg = next_notification(&mut subscription) => {
                    if msg.is_some() { Wake::Notified } else { Wake::BusClosed }
                }
                _ = self.wake.notified() => Wake::Timer,
                _ = tokio::time::sleep(wait_timeout) => Wake::Timer,
            };

            match wake {
                Wake::Shutdown => break,
                Wake::Notified => {
                    // One store pass covers every buffered wake-up.
                    if let Some(sub) = subscription.as_mut() {
                        sub.drain();
                    }
                }
                Wake::BusClosed => {
                    warn!(worker = %self.id, "notification bus closed; falling back to polling");
                    subscription = None;
                }
                Wake::Timer => {}
            }
        }

        debug!(worker = %self.id, "worker stopped");
    }

    /// Process jobs until nothing is claimable or shutdown is requested.
    async fn drain(&self) {
        while !*self.shutdown.borrow() {
            self.stats.started();
            let result = self.processor.run_once(&self.id).await;
            self.stats.finished(result.as_ref().ok().and_then(Option::as_ref));

            match result {
                Ok(Some(_)) => continue,
                Ok(None) => break,
                Err(e) => {
                    error!(worker = %self.id, error = %e, "job store failure");
                    break;
                }
            }
        }
    }
}

async fn next_notification(subscription: &mut Option<Subscription<JobNotification>>) -> Option<JobNotification> {
    match subscription {
        Some(sub) => sub.recv().await,
        None => std::future::pending().await,
    }
}

async fn poll_loop(
    processor: Arc<JobProcessor>,
    config: DispatcherConfig,
    wake: Arc<Notify>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut interval = tokio::time::interval(config.poll_interval);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
            _ = interval.tick() => {
                match processor.store().find_pending_for_processing(config.poll_batch).await {
                    Ok(pending) if !pending.is_empty() => {
                        debug!(dispatcher = %config.name, pending = pending.len(), "poll found claimable jobs");
                        wake.notify_waiters();
                    }
                    Ok(_) => {}
                    Err(e) => warn!(dispatcher = %config.name, error = %e, "pending-job poll failed"),
                }
            }
        }
    }
}

async fn sweep_loop(
    processor: Arc<JobProcessor>,
    config: DispatcherConfig,
    wake: Arc<Notify>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut interval = tokio::time::interval(config.sweep_interval);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    let stale_after = chrono::Duration::from_std(config.stale_after).unwrap_or(chrono::Duration::days(365));

    loop {
        tokio::select! {
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
            _ = interval.tick() => {
                let Some(cutoff) = Utc::now().checked_sub_signed(stale_after) else {
                    continue;
                };
                match processor.store().requeue_stale(cutoff).await {
                    Ok(requeued) if !requeued.is_empty() => {
                        warn!(dispatcher = %config.name, count = requeued.len(), "requeued abandoned claims");
                        wake.notify_waiters();
                    }
                    Ok(_) => {}
                    Err(e) => error!(dispatcher = %config.name, error = %e, "staleness sweep failed"),
                }
            }
        }
    }
}
