use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use carrion_core::{EventId, RunId};
use carrion_infra::jobs::{
    DeadLetterEntry, ExecutorStats, Run, RunAttemptRecord, RunStats, RunStatus,
};

// -------------------------
// Request DTOs
// -------------------------

/// `POST /v1/events`
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EmitEventRequest {
    pub name: String,
    #[serde(default)]
    pub data: Value,
    pub delay_seconds: Option<u64>,
}

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    pub limit: Option<usize>,
}

// -------------------------
// Response DTOs
// -------------------------

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunResponse {
    pub id: RunId,
    pub function_id: String,
    pub event_id: EventId,
    pub event_name: String,
    pub status: RunStatus,
    pub attempt: u32,
    pub max_attempts: u32,
    pub scheduled_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub history: Vec<RunAttemptRecord>,
}

impl From<Run> for RunResponse {
    fn from(run: Run) -> Self {
        Self {
            id: run.id,
            function_id: run.function_id,
            event_id: run.envelope.event_id(),
            event_name: run.envelope.name().to_string(),
            max_attempts: run.retry_policy.max_attempts(),
            status: run.status,
            attempt: run.attempt,
            scheduled_at: run.scheduled_at,
            created_at: run.created_at,
            updated_at: run.updated_at,
            history: run.history,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeadLetterResponse {
    pub run_id: RunId,
    pub function_id: String,
    pub event_name: String,
    pub reason: String,
    pub attempts: u32,
    pub dead_lettered_at: DateTime<Utc>,
}

impl From<DeadLetterEntry> for DeadLetterResponse {
    fn from(entry: DeadLetterEntry) -> Self {
        Self {
            run_id: entry.run.id,
            function_id: entry.run.function_id,
            event_name: entry.run.envelope.name().to_string(),
            reason: entry.reason,
            attempts: entry.run.attempt,
            dead_lettered_at: entry.dead_lettered_at,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct StatsResponse {
    pub runs: RunStats,
    pub executor: Option<ExecutorStats>,
}
