use carrion_api::app::{self, services::AppServices};
use carrion_core::RunId;
use carrion_infra::config::Config;
use carrion_infra::jobs::Orchestrator;
use chrono::{DateTime, Utc};
use reqwest::StatusCode;
use serde_json::{json, Value};

const INGEST_KEY: &str = "ingest-secret";

struct TestServer {
    base_url: String,
    orchestrator: Orchestrator,
    handle: tokio::task::JoinHandle<()>,
}

impl TestServer {
    async fn spawn(ingest_key: Option<&str>) -> Self {
        // Nothing listens on the discard port; recalculations never get that far here.
        let config = Config::from_lookup(|name| match name {
            "WORKER_BASE_URL" => Some("http://127.0.0.1:9".to_string()),
            "WORKER_API_KEY" => Some("worker-secret".to_string()),
            "WORKER_TIMEOUT_SECS" => Some("1".to_string()),
            _ => None,
        })
        .expect("test config is valid");

        let orchestrator = app::services::build_orchestrator(&config)
            .await
            .expect("in-memory orchestrator");
        let app = app::build_app(
            AppServices::new(orchestrator.clone()),
            ingest_key.map(str::to_string),
        );

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("failed to bind ephemeral port");
        let addr = listener.local_addr().unwrap();
        let base_url = format!("http://{}", addr);

        let handle = tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            base_url,
            orchestrator,
            handle,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

async fn emit(client: &reqwest::Client, srv: &TestServer, body: Value) -> reqwest::Response {
    client
        .post(srv.url("/v1/events"))
        .header("X-Api-Key", INGEST_KEY)
        .json(&body)
        .send()
        .await
        .unwrap()
}

#[tokio::test]
async fn health_is_public() {
    let srv = TestServer::spawn(Some(INGEST_KEY)).await;

    let res = reqwest::get(srv.url("/health")).await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);
}

#[tokio::test]
async fn ingest_requires_matching_api_key() {
    let srv = TestServer::spawn(Some(INGEST_KEY)).await;
    let client = reqwest::Client::new();
    let body = json!({"name": "recalculation/case.requested", "data": {"caseId": "case-1"}});

    let res = client
        .post(srv.url("/v1/events"))
        .json(&body)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);

    let res = client
        .post(srv.url("/v1/events"))
        .header("X-Api-Key", "wrong")
        .json(&body)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);

    let res = client.get(srv.url("/v1/stats")).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn ingest_is_open_without_configured_key() {
    let srv = TestServer::spawn(None).await;

    let res = reqwest::Client::new()
        .post(srv.url("/v1/events"))
        .json(&json!({"name": "account/session.trigger-cleanup", "data": {}}))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::ACCEPTED);
}

#[tokio::test]
async fn accepted_event_creates_one_run_and_is_inspectable() {
    let srv = TestServer::spawn(Some(INGEST_KEY)).await;
    let client = reqwest::Client::new();

    let res = emit(
        &client,
        &srv,
        json!({
            "name": "recalculation/case.requested",
            "data": {"caseId": "case-1"},
            "delaySeconds": 3600
        }),
    )
    .await;
    assert_eq!(res.status(), StatusCode::ACCEPTED);
    let receipt: Value = res.json().await.unwrap();
    assert!(receipt["eventId"].is_string());
    let run_ids = receipt["runIds"].as_array().unwrap();
    assert_eq!(run_ids.len(), 1);

    let run_id = run_ids[0].as_str().unwrap();
    let res = client
        .get(srv.url(&format!("/v1/runs/{run_id}")))
        .header("X-Api-Key", INGEST_KEY)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let run: Value = res.json().await.unwrap();
    assert_eq!(run["functionId"], "recalculate-case");
    assert_eq!(run["eventName"], "recalculation/case.requested");
    assert_eq!(run["status"]["state"], "pending");
    assert_eq!(run["maxAttempts"], 3);
    assert!(run["scheduledAt"].is_string());
}

#[tokio::test]
async fn schema_violation_is_rejected_with_field() {
    let srv = TestServer::spawn(Some(INGEST_KEY)).await;
    let client = reqwest::Client::new();

    let res = emit(
        &client,
        &srv,
        json!({
            "name": "export/image.data.requested",
            "data": {
                "exportId": "exp-1",
                "uploadId": "upl-1",
                "format": "raw_data",
                "passwordProtection": {"enabled": true}
            }
        }),
    )
    .await;
    assert_eq!(res.status(), StatusCode::UNPROCESSABLE_ENTITY);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["error"], "schema_validation");
    assert_eq!(body["field"], "passwordProtection.password");
    assert!(body["message"].is_string());

    let res = emit(&client, &srv, json!({"name": "export/everything", "data": {}})).await;
    assert_eq!(res.status(), StatusCode::UNPROCESSABLE_ENTITY);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["field"], "name");

    // Nothing was enqueued.
    let stats = srv.orchestrator.run_stats().await.unwrap();
    assert_eq!(stats.pending, 0);
}

#[tokio::test]
async fn unknown_or_malformed_run_id() {
    let srv = TestServer::spawn(Some(INGEST_KEY)).await;
    let client = reqwest::Client::new();

    let res = client
        .get(srv.url("/v1/runs/0190b9a4-7d2e-7000-8000-000000000000"))
        .header("X-Api-Key", INGEST_KEY)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::NOT_FOUND);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["error"], "not_found");

    let res = client
        .get(srv.url("/v1/runs/not-a-uuid"))
        .header("X-Api-Key", INGEST_KEY)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn dead_letter_can_be_listed_and_replayed() {
    let srv = TestServer::spawn(Some(INGEST_KEY)).await;
    let client = reqwest::Client::new();

    // No analysis record exists for this case, so the run fails without retrying.
    let res = emit(
        &client,
        &srv,
        json!({"name": "recalculation/case.requested", "data": {"caseId": "case-404"}}),
    )
    .await;
    assert_eq!(res.status(), StatusCode::ACCEPTED);
    let receipt: Value = res.json().await.unwrap();
    let run_id = receipt["runIds"][0].as_str().unwrap().to_string();

    assert_eq!(srv.orchestrator.run_until_idle().await.unwrap(), 1);

    let res = client
        .get(srv.url("/v1/dead-letters?limit=10"))
        .header("X-Api-Key", INGEST_KEY)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let entries: Vec<Value> = res.json().await.unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0]["runId"], run_id.as_str());
    assert_eq!(entries[0]["functionId"], "recalculate-case");
    assert_eq!(entries[0]["attempts"], 1);

    let res = client
        .post(srv.url(&format!("/v1/dead-letters/{run_id}/replay")))
        .header("X-Api-Key", INGEST_KEY)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let replayed: Value = res.json().await.unwrap();
    assert_ne!(replayed["id"], run_id.as_str());
    assert_eq!(replayed["status"]["state"], "pending");

    // The entry was consumed by the replay.
    let res = client
        .post(srv.url(&format!("/v1/dead-letters/{run_id}/replay")))
        .header("X-Api-Key", INGEST_KEY)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn dead_letter_can_be_discarded() {
    let srv = TestServer::spawn(Some(INGEST_KEY)).await;
    let client = reqwest::Client::new();

    let res = emit(
        &client,
        &srv,
        json!({"name": "recalculation/case.requested", "data": {"caseId": "case-404"}}),
    )
    .await;
    let receipt: Value = res.json().await.unwrap();
    let run_id = receipt["runIds"][0].as_str().unwrap().to_string();
    assert_eq!(srv.orchestrator.run_until_idle().await.unwrap(), 1);

    let discard = || {
        client
            .delete(srv.url(&format!("/v1/dead-letters/{run_id}")))
            .header("X-Api-Key", INGEST_KEY)
            .send()
    };

    let res = discard().await.unwrap();
    assert_eq!(res.status(), StatusCode::NO_CONTENT);

    let res = client
        .get(srv.url("/v1/dead-letters"))
        .header("X-Api-Key", INGEST_KEY)
        .send()
        .await
        .unwrap();
    let entries: Vec<Value> = res.json().await.unwrap();
    assert!(entries.is_empty());

    let res = discard().await.unwrap();
    assert_eq!(res.status(), StatusCode::NOT_FOUND);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["error"], "not_found");

    let res = client
        .delete(srv.url("/v1/dead-letters/not-a-uuid"))
        .header("X-Api-Key", INGEST_KEY)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn oversized_delay_is_accepted_and_held_back() {
    let srv = TestServer::spawn(Some(INGEST_KEY)).await;
    let client = reqwest::Client::new();

    let res = emit(
        &client,
        &srv,
        json!({
            "name": "account/session.delete",
            "data": {"sessionId": "sess-1"},
            "delaySeconds": u64::MAX
        }),
    )
    .await;
    assert_eq!(res.status(), StatusCode::ACCEPTED);
    let receipt: Value = res.json().await.unwrap();
    let run_id: RunId = receipt["runIds"][0].as_str().unwrap().parse().unwrap();

    let run = srv.orchestrator.get_run(run_id).await.unwrap().unwrap();
    assert_eq!(run.scheduled_at, Some(DateTime::<Utc>::MAX_UTC));
    assert_eq!(srv.orchestrator.run_until_idle().await.unwrap(), 0);

    let stats = srv.orchestrator.run_stats().await.unwrap();
    assert_eq!(stats.pending, 1);
}

#[tokio::test]
async fn stats_report_run_counts() {
    let srv = TestServer::spawn(Some(INGEST_KEY)).await;
    let client = reqwest::Client::new();

    emit(
        &client,
        &srv,
        json!({"name": "account/session.delete", "data": {"sessionId": "sess-1"}, "delaySeconds": 60}),
    )
    .await;

    let res = client
        .get(srv.url("/v1/stats"))
        .header("X-Api-Key", INGEST_KEY)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["runs"]["pending"], 1);
    assert!(body["executor"].is_null());
}
