use std::sync::Arc;

use axum::{Json, extract::Extension, http::StatusCode, response::IntoResponse};

use crate::app::dto::StatsResponse;
use crate::app::errors;
use crate::app::services::AppServices;

/// Liveness plus a job-store round trip.
pub async fn health(Extension(services): Extension<Arc<AppServices>>) -> axum::response::Response {
    match services.job_stats().await {
        Ok(_) => (StatusCode::OK, Json(serde_json::json!({ "status": "ok" }))).into_response(),
        Err(e) => errors::json_error(StatusCode::SERVICE_UNAVAILABLE, "unavailable", e.to_string()),
    }
}

pub async fn stats(Extension(services): Extension<Arc<AppServices>>) -> axum::response::Response {
    match services.job_stats().await {
        Ok(jobs) => Json(StatsResponse {
            dispatcher: services.dispatcher_stats().snapshot(),
            jobs,
        })
        .into_response(),
        Err(e) => errors::json_error(StatusCode::INTERNAL_SERVER_ERROR, "store_error", e.to_string()),
    }
}
