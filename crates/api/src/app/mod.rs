//! HTTP API application wiring (Axum router + service wiring).
//!
//! - `services.rs`: orchestrator wiring (stores, worker client, job registry)
//! - `routes/`: HTTP routes + handlers
//! - `dto.rs`: request/response DTOs
//! - `errors.rs`: consistent error responses

use std::sync::Arc;

use axum::{routing::get, Extension, Router};
use tower::ServiceBuilder;

use crate::middleware;

pub mod dto;
pub mod errors;
pub mod routes;
pub mod services;

/// Build the full HTTP router (public entrypoint used by `main.rs`).
pub fn build_app(services: services::AppServices, ingest_key: Option<String>) -> Router {
    let key_state = middleware::IngestKeyState::new(ingest_key);

    // Ingest and inspection routes: require the api key when one is configured.
    let protected = Router::new()
        .nest("/v1", routes::router())
        .layer(
            ServiceBuilder::new()
                .layer(Extension(Arc::new(services)))
                .layer(axum::middleware::from_fn_with_state(
                    key_state,
                    middleware::ingest_key_middleware,
                )),
        );

    Router::new()
        .route("/health", get(routes::system::health))
        .merge(protected)
}
