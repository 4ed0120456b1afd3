use axum::Router;

pub mod optimizations;
pub mod system;

/// Router for all requester-scoped endpoints.
pub fn router() -> Router {
    Router::new().nest("/optimizations", optimizations::router())
}
