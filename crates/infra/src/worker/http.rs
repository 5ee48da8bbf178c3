//! reqwest-backed compute worker client.

use async_trait::async_trait;
use serde::Serialize;
use tracing::{debug, instrument};

use super::payload::{ExportRequest, RecalculateRequest};
use super::{ComputeWorker, WorkerAck, WorkerError};
use crate::config::WorkerConfig;

const RECALCULATE_PATH: &str = "/v1/computation/recalculate";
const EXPORT_PATH: &str = "/v1/export/";
const API_KEY_HEADER: &str = "X-Api-Key";

/// HTTP client for the compute worker.
///
/// Every request carries the shared `X-Api-Key`. A non-2xx response becomes
/// [`WorkerError::Status`] with the response body kept verbatim.
#[derive(Debug, Clone)]
pub struct HttpComputeWorker {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl HttpComputeWorker {
    pub fn new(config: &WorkerConfig) -> Result<Self, WorkerError> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .connect_timeout(config.connect_timeout)
            .build()
            .map_err(|e| WorkerError::Config(e.to_string()))?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
        })
    }

    async fn post<B: Serialize + Sync>(&self, path: &str, body: &B) -> Result<WorkerAck, WorkerError> {
        let url = format!("{}{}", self.base_url, path);
        let resp = self
            .client
            .post(&url)
            .header(API_KEY_HEADER, &self.api_key)
            .json(body)
            .send()
            .await
            .map_err(|e| WorkerError::Network {
                endpoint: path.to_string(),
                message: e.to_string(),
            })?;

        let status = resp.status();
        if !status.is_success() {
            return Err(WorkerError::Status {
                endpoint: path.to_string(),
                status: status.as_u16(),
                body: body_or_reason(resp.text().await),
            });
        }

        debug!(endpoint = path, status = status.as_u16(), "worker accepted request");
        Ok(WorkerAck {
            status: status.as_u16(),
        })
    }
}

/// The response body, or a marker naming why it could not be read.
fn body_or_reason<E: std::fmt::Display>(body: Result<String, E>) -> String {
    body.unwrap_or_else(|e| format!("<body unavailable: {e}>"))
}

#[async_trait]
impl ComputeWorker for HttpComputeWorker {
    #[instrument(skip(self, request), fields(case_id = %request.case_id), err)]
    async fn recalculate(&self, request: &RecalculateRequest) -> Result<WorkerAck, WorkerError> {
        self.post(RECALCULATE_PATH, request).await
    }

    #[instrument(skip(self, request), fields(export_id = %request.export_id, format = request.format), err)]
    async fn export(&self, request: &ExportRequest) -> Result<WorkerAck, WorkerError> {
        self.post(EXPORT_PATH, request).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use axum::extract::State;
    use axum::http::{HeaderMap, StatusCode};
    use axum::routing::post;
    use axum::{Json, Router};
    use carrion_core::CaseId;
    use serde_json::Value;

    type Seen = Arc<Mutex<Vec<(Option<String>, Value)>>>;

    async fn record(State(seen): State<Seen>, headers: HeaderMap, Json(body): Json<Value>) -> StatusCode {
        let key = headers
            .get(API_KEY_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        seen.lock().unwrap().push((key, body));
        StatusCode::ACCEPTED
    }

    async fn broken() -> (StatusCode, &'static str) {
        (StatusCode::INTERNAL_SERVER_ERROR, "pmi model crashed")
    }

    async fn spawn_worker() -> (String, Seen) {
        let seen: Seen = Arc::default();
        let app = Router::new()
            .route(RECALCULATE_PATH, post(record))
            .route(EXPORT_PATH, post(broken))
            .with_state(seen.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        (format!("http://{addr}"), seen)
    }

    fn config(base_url: String) -> WorkerConfig {
        WorkerConfig {
            base_url,
            api_key: "worker-key".into(),
            timeout: Duration::from_secs(5),
            connect_timeout: Duration::from_secs(1),
        }
    }

    #[tokio::test]
    async fn recalculate_posts_case_id_with_api_key() {
        let (base_url, seen) = spawn_worker().await;
        let worker = HttpComputeWorker::new(&config(format!("{base_url}/"))).unwrap();

        let ack = worker
            .recalculate(&RecalculateRequest {
                case_id: CaseId::new("case-7").unwrap(),
            })
            .await
            .unwrap();
        assert_eq!(ack.status, 202);

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].0.as_deref(), Some("worker-key"));
        assert_eq!(seen[0].1, serde_json::json!({"case_id": "case-7"}));
    }

    #[tokio::test]
    async fn non_success_status_keeps_body_text() {
        let (base_url, _) = spawn_worker().await;
        let worker = HttpComputeWorker::new(&config(base_url)).unwrap();

        let request = ExportRequest {
            export_id: carrion_core::ExportId::new("exp-1").unwrap(),
            case_id: Some(CaseId::new("case-1").unwrap()),
            upload_id: None,
            format: "raw_data",
            resolution: None,
            page_size: None,
            security_level: None,
            permissions: None,
            password_protection: Default::default(),
        };
        let err = worker.export(&request).await.unwrap_err();

        assert_eq!(
            err,
            WorkerError::Status {
                endpoint: EXPORT_PATH.into(),
                status: 500,
                body: "pmi model crashed".into(),
            }
        );
        assert!(err.is_retryable());
        assert!(err.to_string().contains("pmi model crashed"));
    }

    #[tokio::test]
    async fn unreachable_worker_is_a_retryable_network_error() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let worker = HttpComputeWorker::new(&config(format!("http://{addr}"))).unwrap();
        let err = worker
            .recalculate(&RecalculateRequest {
                case_id: CaseId::new("case-1").unwrap(),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, WorkerError::Network { .. }));
        assert!(err.is_retryable());
    }

    #[test]
    fn unreadable_body_is_recorded_not_blank() {
        assert_eq!(body_or_reason::<&str>(Ok("bad request".to_string())), "bad request");
        assert_eq!(
            body_or_reason(Err("connection reset")),
            "<body unavailable: connection reset>"
        );
    }
}
