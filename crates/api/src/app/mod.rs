//! HTTP API application wiring (Axum router + service wiring).
//!
//! - `services.rs`: backend selection, dispatcher startup and shutdown
//! - `routes/`: HTTP routes + handlers
//! - `dto.rs`: request/response bodies
//! - `errors.rs`: consistent error responses

use std::sync::Arc;

use axum::{Extension, Router, routing::get};
use tower::ServiceBuilder;

use crate::middleware;

pub mod dto;
pub mod errors;
pub mod routes;
pub mod services;

/// Build the full HTTP router (public entrypoint used by `main.rs` and the black-box tests).
pub fn build_app(services: Arc<services::AppServices>) -> Router {
    // Requester-scoped routes: require x-user-id.
    let scoped = routes::router().layer(axum::middleware::from_fn(middleware::requester_middleware));

    Router::new()
        .route("/health", get(routes::system::health))
        .route("/stats", get(routes::system::stats))
        .merge(scoped)
        .layer(ServiceBuilder::new().layer(Extension(services)))
}
