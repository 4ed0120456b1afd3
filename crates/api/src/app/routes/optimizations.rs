use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Extension, Path},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    routing::{get, post},
};

use teachprompt_core::{JobId, PromptId};
use teachprompt_infra::service::EnqueueRequest;

use crate::app::dto::{CreateOptimizationRequest, EnqueuedResponse};
use crate::app::errors;
use crate::app::services::AppServices;
use crate::context::RequesterContext;

pub const IDEMPOTENCY_KEY_HEADER: &str = "idempotency-key";

pub fn router() -> Router {
    Router::new()
        .route("/", post(create_optimization))
        .route("/:id", get(get_optimization))
}

/// Enqueue an optimization. Answers 202 before any provider work happens.
pub async fn create_optimization(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(requester): Extension<RequesterContext>,
    headers: HeaderMap,
    Json(body): Json<CreateOptimizationRequest>,
) -> axum::response::Response {
    let idempotency_key = match body.idempotency_key.or_else(|| header_key(&headers)) {
        Some(k) => k,
        None => {
            return errors::json_error(
                StatusCode::BAD_REQUEST,
                "validation_error",
                "idempotency_key is required (body field or Idempotency-Key header)",
            );
        }
    };

    let request = EnqueueRequest {
        prompt_id: body.prompt_id.unwrap_or_else(PromptId::new),
        prompt_text: body.prompt_text,
        lesson_id: body.lesson_id,
        mode: body.mode,
        idempotency_key,
        requested_by: requester.user_id(),
    };

    match services.optimizer().enqueue_optimization(request).await {
        Ok(job_id) => (
            StatusCode::ACCEPTED,
            Json(EnqueuedResponse {
                job_id,
                status_url: format!("/optimizations/{job_id}"),
            }),
        )
            .into_response(),
        Err(e) => errors::enqueue_error_to_response(e),
    }
}

/// Job status for its requester. Other users get 404.
pub async fn get_optimization(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(requester): Extension<RequesterContext>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let job_id: JobId = match id.parse() {
        Ok(v) => v,
        Err(_) => return errors::json_error(StatusCode::BAD_REQUEST, "invalid_id", "invalid job id"),
    };

    match services.optimizer().get_job_status(job_id).await {
        Ok(view) if view.requested_by == requester.user_id() => (StatusCode::OK, Json(view)).into_response(),
        Ok(_) => errors::json_error(StatusCode::NOT_FOUND, "not_found", "not found"),
        Err(e) => errors::enqueue_error_to_response(e),
    }
}

fn header_key(headers: &HeaderMap) -> Option<String> {
    headers
        .get(IDEMPOTENCY_KEY_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}
