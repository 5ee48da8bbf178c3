use std::sync::Arc;

use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    middleware::Next,
    response::Response,
};

pub const API_KEY_HEADER: &str = "x-api-key";

/// Shared secret for the ingest routes. `None` leaves them open.
#[derive(Clone, Default)]
pub struct IngestKeyState {
    pub key: Option<Arc<str>>,
}

impl IngestKeyState {
    pub fn new(key: Option<String>) -> Self {
        Self {
            key: key.map(Arc::from),
        }
    }
}

impl core::fmt::Debug for IngestKeyState {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("IngestKeyState")
            .field("key", &self.key.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

pub async fn ingest_key_middleware(
    State(state): State<IngestKeyState>,
    req: axum::http::Request<axum::body::Body>,
    next: Next,
) -> Result<Response, StatusCode> {
    if let Some(expected) = state.key.as_deref() {
        let presented = extract_api_key(req.headers())?;
        if presented != expected {
            tracing::warn!(path = %req.uri().path(), "rejected request with wrong api key");
            return Err(StatusCode::UNAUTHORIZED);
        }
    }

    Ok(next.run(req).await)
}

fn extract_api_key(headers: &HeaderMap) -> Result<&str, StatusCode> {
    let header = headers
        .get(API_KEY_HEADER)
        .ok_or(StatusCode::UNAUTHORIZED)?;

    let key = header
        .to_str()
        .map_err(|_| StatusCode::UNAUTHORIZED)?
        .trim();
    if key.is_empty() {
        return Err(StatusCode::UNAUTHORIZED);
    }

    Ok(key)
}
