use std::sync::Arc;
use std::time::Duration;

use axum::{extract::Extension, http::StatusCode, response::IntoResponse, Json};

use crate::app::{dto::EmitEventRequest, errors, services::AppServices};

/// POST /v1/events
///
/// Validates the payload against the event schema and creates one run per
/// subscribed function. Nothing is enqueued when validation fails.
pub async fn emit_event(
    Extension(services): Extension<Arc<AppServices>>,
    Json(body): Json<EmitEventRequest>,
) -> axum::response::Response {
    let delay = body.delay_seconds.map(Duration::from_secs);
    match services
        .orchestrator
        .send_raw(&body.name, &body.data, delay)
        .await
    {
        Ok(receipt) => {
            tracing::info!(
                event = %body.name,
                event_id = %receipt.event_id,
                runs = receipt.run_ids.len(),
                "event accepted"
            );
            (StatusCode::ACCEPTED, Json(receipt)).into_response()
        }
        Err(e) => {
            tracing::info!(event = %body.name, error = %e, "event rejected");
            errors::send_error_to_response(e)
        }
    }
}
