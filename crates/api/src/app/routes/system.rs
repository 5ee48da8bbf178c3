use std::sync::Arc;

use axum::{extract::Extension, http::StatusCode, Json};

use crate::app::{dto::StatsResponse, errors, services::AppServices};

pub async fn health() -> StatusCode {
    StatusCode::OK
}

/// GET /v1/stats
pub async fn stats(
    Extension(services): Extension<Arc<AppServices>>,
) -> Result<Json<StatsResponse>, axum::response::Response> {
    let runs = services
        .orchestrator
        .run_stats()
        .await
        .map_err(errors::store_error_to_response)?;
    Ok(Json(StatsResponse {
        runs,
        executor: services.monitor.as_ref().map(|m| m.stats()),
    }))
}
