//! Redis pub/sub notification bus (optional).
//!
//! Redis pub/sub is not durable: messages published while a subscriber is
//! disconnected are gone. That matches the bus contract, since workers also
//! poll the job store.

use std::thread;

use redis::Commands;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use teachprompt_events::{JobNotification, NotificationBus, Subscription, Topic};

#[derive(Debug, thiserror::Error)]
pub enum RedisBusError {
    #[error("redis error: {0}")]
    Redis(String),
    #[error("failed to serialize notification: {0}")]
    Serialize(String),
}

/// Publishes each notification on its topic's channel.
#[derive(Debug, Clone)]
pub struct RedisPubSubNotificationBus {
    client: redis::Client,
    topics: Vec<Topic>,
}

impl RedisPubSubNotificationBus {
    /// Bus whose subscriptions listen on `Topic::Optimization`.
    pub fn new(redis_url: impl AsRef<str>) -> Result<Self, RedisBusError> {
        Self::with_topics(redis_url, vec![Topic::Optimization])
    }

    pub fn with_topics(redis_url: impl AsRef<str>, topics: Vec<Topic>) -> Result<Self, RedisBusError> {
        let client = redis::Client::open(redis_url.as_ref()).map_err(|e| RedisBusError::Redis(e.to_string()))?;
        Ok(Self { client, topics })
    }
}

fn publish_payload(client: &redis::Client, channel: &'static str, payload: &str) -> Result<(), RedisBusError> {
    let mut conn = client.get_connection().map_err(|e| RedisBusError::Redis(e.to_string()))?;
    let receivers: i64 = conn
        .publish(channel, payload)
        .map_err(|e| RedisBusError::Redis(e.to_string()))?;
    debug!(channel, receivers, "notification published");
    Ok(())
}

impl NotificationBus<JobNotification> for RedisPubSubNotificationBus {
    type Error = RedisBusError;

    /// Inside a tokio runtime the Redis round trip runs on the blocking pool
    /// and failures are logged there; callers only see serialization errors.
    fn publish(&self, message: JobNotification) -> Result<(), Self::Error> {
        let payload = serde_json::to_string(&message).map_err(|e| RedisBusError::Serialize(e.to_string()))?;
        let channel = message.topic.channel();

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let client = self.client.clone();
                let job_id = message.job_id;
                handle.spawn_blocking(move || {
                    if let Err(e) = publish_payload(&client, channel, &payload) {
                        warn!(job_id = %job_id, error = %e, "failed to publish job notification");
                    }
                });
                Ok(())
            }
            Err(_) => publish_payload(&self.client, channel, &payload),
        }
    }

    fn subscribe(&self) -> Subscription<JobNotification> {
        let (tx, rx) = mpsc::unbounded_channel();

        let client = self.client.clone();
        let channels: Vec<&'static str> = self.topics.iter().map(Topic::channel).collect();

        // Blocking pub/sub reader; exits when the connection drops or the
        // subscription is dropped. Callers fall back to polling either way.
        thread::spawn(move || {
            let mut conn = match client.get_connection() {
                Ok(c) => c,
                Err(e) => {
                    warn!(error = %e, "redis subscription could not connect");
                    return;
                }
            };

            let mut pubsub = conn.as_pubsub();
            if let Err(e) = pubsub.subscribe(channels) {
                warn!(error = %e, "redis subscribe failed");
                return;
            }

            loop {
                let msg = match pubsub.get_message() {
                    Ok(m) => m,
                    Err(e) => {
                        warn!(error = %e, "redis subscription closed");
                        return;
                    }
                };

                let payload: String = match msg.get_payload() {
                    Ok(p) => p,
                    Err(_) => continue,
                };

                let notification: JobNotification = match serde_json::from_str(&payload) {
                    Ok(n) => n,
                    Err(e) => {
                        debug!(error = %e, "skipping malformed notification");
                        continue;
                    }
                };

                if tx.send(notification).is_err() {
                    return;
                }
            }
        });

        Subscription::new(rx)
    }
}
