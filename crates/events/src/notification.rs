use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use teachprompt_core::JobId;

/// Notification topics.
///
/// `TestExecution` and `FileProcessing` share the optimization queue's
/// admission/retry shape; only `Optimization` has a dispatcher in this repo.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Topic {
    Optimization,
    TestExecution,
    FileProcessing,
}

impl Topic {
    /// Channel name used by transports that address topics by string.
    pub fn channel(&self) -> &'static str {
        match self {
            Topic::Optimization => "teachprompt:jobs:optimization",
            Topic::TestExecution => "teachprompt:jobs:test-execution",
            Topic::FileProcessing => "teachprompt:jobs:file-processing",
        }
    }
}

/// Wake-up message published after a job row is committed.
///
/// Carries only the id: receivers always re-read the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobNotification {
    pub topic: Topic,
    pub job_id: JobId,
    pub published_at: DateTime<Utc>,
}

impl JobNotification {
    pub fn new(topic: Topic, job_id: JobId) -> Self {
        Self {
            topic,
            job_id,
            published_at: Utc::now(),
        }
    }

    pub fn optimization(job_id: JobId) -> Self {
        Self::new(Topic::Optimization, job_id)
    }
}
