use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde_json::json;

use carrion_events::SchemaValidationError;
use carrion_infra::jobs::{RunStoreError, SendError};

pub fn send_error_to_response(err: SendError) -> axum::response::Response {
    match err {
        SendError::Schema(e) => schema_error_to_response(e),
        SendError::Store(e) => store_error_to_response(e),
    }
}

/// 422 naming the offending field; an unknown event name blames `name`.
pub fn schema_error_to_response(err: SchemaValidationError) -> axum::response::Response {
    let field = err.field().unwrap_or("name").to_string();
    (
        StatusCode::UNPROCESSABLE_ENTITY,
        axum::Json(json!({
            "error": "schema_validation",
            "field": field,
            "message": err.to_string(),
        })),
    )
        .into_response()
}

pub fn store_error_to_response(err: RunStoreError) -> axum::response::Response {
    match err {
        RunStoreError::NotFound(id) => {
            json_error(StatusCode::NOT_FOUND, "not_found", format!("run {id} not found"))
        }
        RunStoreError::AlreadyExists(id) => {
            json_error(StatusCode::CONFLICT, "conflict", format!("run {id} already exists"))
        }
        RunStoreError::Storage(msg) => {
            tracing::error!(error = %msg, "run store failure");
            json_error(StatusCode::SERVICE_UNAVAILABLE, "store_error", msg)
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
