//! Notification bus wiring.
//!
//! `JobBus` lets binaries pick a transport at startup while the service and
//! dispatcher stay generic over `NotificationBus<JobNotification>`.

#[cfg(feature = "redis")]
pub mod redis_pubsub;

use std::sync::Arc;

use teachprompt_events::{InMemoryNotificationBus, JobNotification, NotificationBus, Subscription};

#[cfg(feature = "redis")]
pub use redis_pubsub::{RedisBusError, RedisPubSubNotificationBus};

#[derive(Debug, thiserror::Error)]
#[error("notification publish failed: {0}")]
pub struct NotifyError(String);

/// The bus selected by configuration.
#[derive(Debug, Clone)]
pub enum JobBus {
    InMemory(Arc<InMemoryNotificationBus<JobNotification>>),
    #[cfg(feature = "redis")]
    Redis(RedisPubSubNotificationBus),
}

impl JobBus {
    pub fn in_memory() -> Self {
        JobBus::InMemory(Arc::new(InMemoryNotificationBus::new()))
    }
}

impl NotificationBus<JobNotification> for JobBus {
    type Error = NotifyError;

    fn publish(&self, message: JobNotification) -> Result<(), Self::Error> {
        match self {
            JobBus::InMemory(bus) => bus.publish(message).map_err(|e| NotifyError(e.to_string())),
            #[cfg(feature = "redis")]
            JobBus::Redis(bus) => bus.publish(message).map_err(|e| NotifyError(e.to_string())),
        }
    }

    fn subscribe(&self) -> Subscription<JobNotification> {
        match self {
            JobBus::InMemory(bus) => bus.subscribe(),
            #[cfg(feature = "redis")]
            JobBus::Redis(bus) => bus.subscribe(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use teachprompt_core::JobId;

    #[tokio::test]
    async fn in_memory_variant_delivers() {
        let bus = JobBus::in_memory();
        let mut sub = bus.subscribe();
        let id = JobId::new();
        bus.publish(JobNotification::optimization(id)).unwrap();
        assert_eq!(sub.recv().await.map(|n| n.job_id), Some(id));
    }
}
