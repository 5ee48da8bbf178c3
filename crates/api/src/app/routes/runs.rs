use std::sync::Arc;

use axum::{
    extract::{Extension, Path, Query},
    http::StatusCode,
    Json,
};

use carrion_core::RunId;

use crate::app::{
    dto::{DeadLetterResponse, ListQuery, RunResponse},
    errors,
    services::AppServices,
};

const DEFAULT_LIMIT: usize = 50;
const MAX_LIMIT: usize = 1000;

fn parse_run_id(raw: &str) -> Result<RunId, axum::response::Response> {
    raw.parse::<RunId>().map_err(|_| {
        errors::json_error(StatusCode::BAD_REQUEST, "invalid_id", format!("invalid run id: {raw}"))
    })
}

/// GET /v1/runs/:id
pub async fn get_run(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
) -> Result<Json<RunResponse>, axum::response::Response> {
    let run_id = parse_run_id(&id)?;
    match services.orchestrator.get_run(run_id).await {
        Ok(Some(run)) => Ok(Json(RunResponse::from(run))),
        Ok(None) => Err(errors::json_error(
            StatusCode::NOT_FOUND,
            "not_found",
            format!("run {run_id} not found"),
        )),
        Err(e) => Err(errors::store_error_to_response(e)),
    }
}

/// GET /v1/dead-letters?limit=50
pub async fn list_dead_letters(
    Extension(services): Extension<Arc<AppServices>>,
    Query(query): Query<ListQuery>,
) -> Result<Json<Vec<DeadLetterResponse>>, axum::response::Response> {
    let limit = query.limit.unwrap_or(DEFAULT_LIMIT).min(MAX_LIMIT);
    let entries = services
        .orchestrator
        .dead_letters(limit)
        .await
        .map_err(errors::store_error_to_response)?;
    Ok(Json(entries.into_iter().map(DeadLetterResponse::from).collect()))
}

/// POST /v1/dead-letters/:id/replay
///
/// Re-enqueues the dead-lettered run as a fresh run and returns it.
pub async fn replay_dead_letter(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
) -> Result<Json<RunResponse>, axum::response::Response> {
    let run_id = parse_run_id(&id)?;
    let run = services
        .orchestrator
        .replay(run_id)
        .await
        .map_err(errors::store_error_to_response)?;
    Ok(Json(RunResponse::from(run)))
}

/// DELETE /v1/dead-letters/:id
///
/// Drops the entry without re-running it.
pub async fn discard_dead_letter(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
) -> Result<StatusCode, axum::response::Response> {
    let run_id = parse_run_id(&id)?;
    services
        .orchestrator
        .discard(run_id)
        .await
        .map_err(errors::store_error_to_response)?;
    Ok(StatusCode::NO_CONTENT)
}
