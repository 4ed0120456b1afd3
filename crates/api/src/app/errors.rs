use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde_json::json;

use teachprompt_infra::service::EnqueueError;

pub fn enqueue_error_to_response(err: EnqueueError) -> axum::response::Response {
    match err {
        EnqueueError::Validation(e) => json_error(StatusCode::BAD_REQUEST, "validation_error", e.to_string()),
        EnqueueError::NotFound(_) => json_error(StatusCode::NOT_FOUND, "not_found", "not found"),
        EnqueueError::Store(e) => {
            tracing::error!(error = %e, "job store failure while serving request");
            json_error(StatusCode::INTERNAL_SERVER_ERROR, "store_error", e.to_string())
        }
    }
}

pub fn json_error(
    status: StatusCode,
    code: &'static str,
    message: impl Into<String>,
) -> axum::response::Response {
    (
        status,
        axum::Json(json!({
            "error": code,
            "message": message.into(),
        })),
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use teachprompt_core::{DomainError, JobId};
    use teachprompt_infra::jobs::JobStoreError;

    #[test]
    fn enqueue_errors_map_to_statuses() {
        let cases = [
            (EnqueueError::Validation(DomainError::validation("bad")), StatusCode::BAD_REQUEST),
            (EnqueueError::NotFound(JobId::new()), StatusCode::NOT_FOUND),
            (
                EnqueueError::Store(JobStoreError::Storage("down".to_string())),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];
        for (err, status) in cases {
            assert_eq!(enqueue_error_to_response(err).status(), status);
        }
    }
}
