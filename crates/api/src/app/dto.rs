use serde::{Deserialize, Serialize};

use teachprompt_core::{JobId, LessonId, PromptId};
use teachprompt_infra::DispatcherStats;
use teachprompt_infra::jobs::{JobStats, OptimizationMode};

#[derive(Debug, Deserialize)]
pub struct CreateOptimizationRequest {
    /// Generated when the caller has no stored prompt
    #[serde(default)]
    pub prompt_id: Option<PromptId>,
    pub prompt_text: String,
    #[serde(default)]
    pub lesson_id: Option<LessonId>,
    #[serde(default)]
    pub mode: OptimizationMode,
    /// Falls back to the `Idempotency-Key` header
    #[serde(default)]
    pub idempotency_key: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct EnqueuedResponse {
    pub job_id: JobId,
    pub status_url: String,
}

#[derive(Debug, Serialize)]
pub struct StatsResponse {
    pub dispatcher: DispatcherStats,
    pub jobs: JobStats,
}
