//! Postgres-backed run store.
//!
//! Runs are stored as a JSONB body next to the columns the queue filters on
//! (`status`, `scheduled_at`, `updated_at`). Claiming uses
//! `FOR UPDATE SKIP LOCKED` so several executor processes can share one
//! database without double-claiming a run.
//!
//! ## Error Mapping
//!
//! | SQLx Error | PostgreSQL Error Code | RunStoreError |
//! |------------|----------------------|---------------|
//! | Database (unique violation) | `23505` | `AlreadyExists` (enqueue only) |
//! | Anything else | Any | `Storage` |

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use sqlx::{PgPool, Row};
use tracing::instrument;

use carrion_core::RunId;

use super::store::{RunStats, RunStore, RunStoreError};
use super::types::{DeadLetterEntry, Run, RunStatus};

/// Postgres-backed durable run store.
#[derive(Debug, Clone)]
pub struct PostgresRunStore {
    pool: Arc<PgPool>,
}

impl PostgresRunStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }

    /// Create the run, step and dead-letter tables if they do not exist.
    pub async fn ensure_schema(&self) -> Result<(), RunStoreError> {
        for ddl in [
            r#"
            CREATE TABLE IF NOT EXISTS job_runs (
                id            UUID PRIMARY KEY,
                function_id   TEXT NOT NULL,
                status        TEXT NOT NULL,
                scheduled_at  TIMESTAMPTZ NULL,
                created_at    TIMESTAMPTZ NOT NULL,
                updated_at    TIMESTAMPTZ NOT NULL,
                body          JSONB NOT NULL
            )
            "#,
            r#"
            CREATE INDEX IF NOT EXISTS job_runs_claim_idx
                ON job_runs (status, scheduled_at, created_at)
            "#,
            r#"
            CREATE INDEX IF NOT EXISTS job_runs_retention_idx
                ON job_runs (status, updated_at)
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS job_steps (
                run_id        UUID NOT NULL,
                step_name     TEXT NOT NULL,
                output        JSONB NOT NULL,
                completed_at  TIMESTAMPTZ NOT NULL,
                PRIMARY KEY (run_id, step_name)
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS job_dead_letters (
                run_id            UUID PRIMARY KEY,
                reason            TEXT NOT NULL,
                dead_lettered_at  TIMESTAMPTZ NOT NULL,
                body              JSONB NOT NULL
            )
            "#,
        ] {
            sqlx::query(ddl)
                .execute(&*self.pool)
                .await
                .map_err(|e| map_sqlx_error("ensure_schema", e))?;
        }
        Ok(())
    }
}

fn encode(run: &Run) -> Result<JsonValue, RunStoreError> {
    serde_json::to_value(run)
        .map_err(|e| RunStoreError::Storage(format!("failed to encode run {}: {e}", run.id)))
}

fn decode(body: JsonValue) -> Result<Run, RunStoreError> {
    serde_json::from_value(body)
        .map_err(|e| RunStoreError::Storage(format!("failed to decode run row: {e}")))
}

fn decode_dead_letter(row: &sqlx::postgres::PgRow) -> Result<DeadLetterEntry, RunStoreError> {
    let body: JsonValue = row
        .try_get("body")
        .map_err(|e| map_sqlx_error("decode_dead_letter", e))?;
    Ok(DeadLetterEntry {
        run: decode(body)?,
        reason: row
            .try_get("reason")
            .map_err(|e| map_sqlx_error("decode_dead_letter", e))?,
        dead_lettered_at: row
            .try_get("dead_lettered_at")
            .map_err(|e| map_sqlx_error("decode_dead_letter", e))?,
    })
}

fn map_sqlx_error(operation: &str, err: sqlx::Error) -> RunStoreError {
    match err {
        sqlx::Error::Database(db_err) => {
            RunStoreError::Storage(format!("database error in {operation}: {}", db_err.message()))
        }
        sqlx::Error::PoolClosed => {
            RunStoreError::Storage(format!("connection pool closed in {operation}"))
        }
        _ => RunStoreError::Storage(format!("sqlx error in {operation}: {err}")),
    }
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db) if db.code().as_deref() == Some("23505"))
}

#[async_trait]
impl RunStore for PostgresRunStore {
    #[instrument(skip(self, run), fields(run_id = %run.id, function_id = %run.function_id), err)]
    async fn enqueue(&self, run: Run) -> Result<RunId, RunStoreError> {
        let body = encode(&run)?;
        sqlx::query(
            r#"
            INSERT INTO job_runs (id, function_id, status, scheduled_at, created_at, updated_at, body)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(run.id.as_uuid())
        .bind(&run.function_id)
        .bind(run.status.as_str())
        .bind(run.scheduled_at)
        .bind(run.created_at)
        .bind(run.updated_at)
        .bind(body)
        .execute(&*self.pool)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                RunStoreError::AlreadyExists(run.id)
            } else {
                map_sqlx_error("enqueue", e)
            }
        })?;
        Ok(run.id)
    }

    #[instrument(skip(self), fields(run_id = %run_id), err)]
    async fn get(&self, run_id: RunId) -> Result<Option<Run>, RunStoreError> {
        let row = sqlx::query(
            r#"
            SELECT body FROM job_runs WHERE id = $1
            UNION ALL
            SELECT body FROM job_dead_letters WHERE run_id = $1
            LIMIT 1
            "#,
        )
        .bind(run_id.as_uuid())
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("get", e))?;

        match row {
            Some(row) => {
                let body: JsonValue = row.try_get("body").map_err(|e| map_sqlx_error("get", e))?;
                decode(body).map(Some)
            }
            None => Ok(None),
        }
    }

    #[instrument(skip(self, run), fields(run_id = %run.id, status = run.status.as_str()), err)]
    async fn update(&self, run: &Run) -> Result<(), RunStoreError> {
        let result = sqlx::query(
            r#"
            UPDATE job_runs
            SET status = $2, scheduled_at = $3, updated_at = $4, body = $5
            WHERE id = $1
            "#,
        )
        .bind(run.id.as_uuid())
        .bind(run.status.as_str())
        .bind(run.scheduled_at)
        .bind(run.updated_at)
        .bind(encode(run)?)
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("update", e))?;

        if result.rows_affected() == 0 {
            return Err(RunStoreError::NotFound(run.id));
        }

        if run.status == RunStatus::Completed {
            sqlx::query("DELETE FROM job_steps WHERE run_id = $1")
                .bind(run.id.as_uuid())
                .execute(&*self.pool)
                .await
                .map_err(|e| map_sqlx_error("update", e))?;
        }
        Ok(())
    }

    #[instrument(skip(self), err)]
    async fn claim_next(&self, stale_before: DateTime<Utc>) -> Result<Option<Run>, RunStoreError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("claim_next", e))?;

        let row = sqlx::query(
            r#"
            SELECT body FROM job_runs
            WHERE (status IN ('pending', 'retrying') AND (scheduled_at IS NULL OR scheduled_at <= $1))
               OR (status = 'running' AND updated_at < $2)
            ORDER BY COALESCE(scheduled_at, created_at), created_at
            LIMIT 1
            FOR UPDATE SKIP LOCKED
            "#,
        )
        .bind(Utc::now())
        .bind(stale_before)
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("claim_next", e))?;

        let Some(row) = row else {
            return Ok(None);
        };
        let body: JsonValue = row
            .try_get("body")
            .map_err(|e| map_sqlx_error("claim_next", e))?;
        let mut run = decode(body)?;
        run.mark_running();

        sqlx::query("UPDATE job_runs SET status = $2, updated_at = $3, body = $4 WHERE id = $1")
            .bind(run.id.as_uuid())
            .bind(run.status.as_str())
            .bind(run.updated_at)
            .bind(encode(&run)?)
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("claim_next", e))?;

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("claim_next", e))?;
        Ok(Some(run))
    }

    #[instrument(skip(self), fields(run_id = %run_id), err)]
    async fn load_step(
        &self,
        run_id: RunId,
        step: &str,
    ) -> Result<Option<JsonValue>, RunStoreError> {
        let row = sqlx::query("SELECT output FROM job_steps WHERE run_id = $1 AND step_name = $2")
            .bind(run_id.as_uuid())
            .bind(step)
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("load_step", e))?;

        row.map(|r| r.try_get("output"))
            .transpose()
            .map_err(|e| map_sqlx_error("load_step", e))
    }

    #[instrument(skip(self, output), fields(run_id = %run_id), err)]
    async fn save_step(
        &self,
        run_id: RunId,
        step: &str,
        output: JsonValue,
    ) -> Result<(), RunStoreError> {
        sqlx::query(
            r#"
            INSERT INTO job_steps (run_id, step_name, output, completed_at)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (run_id, step_name) DO NOTHING
            "#,
        )
        .bind(run_id.as_uuid())
        .bind(step)
        .bind(output)
        .bind(Utc::now())
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("save_step", e))?;
        Ok(())
    }

    #[instrument(skip(self, run), fields(run_id = %run.id), err)]
    async fn dead_letter(&self, mut run: Run, reason: String) -> Result<(), RunStoreError> {
        run.status = RunStatus::DeadLettered {
            error: reason.clone(),
            attempts: run.attempt,
        };
        run.updated_at = Utc::now();
        let entry = DeadLetterEntry::new(run, reason);

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("dead_letter", e))?;

        sqlx::query("DELETE FROM job_runs WHERE id = $1")
            .bind(entry.run.id.as_uuid())
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("dead_letter", e))?;

        sqlx::query(
            r#"
            INSERT INTO job_dead_letters (run_id, reason, dead_lettered_at, body)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (run_id) DO UPDATE
            SET reason = EXCLUDED.reason, dead_lettered_at = EXCLUDED.dead_lettered_at, body = EXCLUDED.body
            "#,
        )
        .bind(entry.run.id.as_uuid())
        .bind(&entry.reason)
        .bind(entry.dead_lettered_at)
        .bind(encode(&entry.run)?)
        .execute(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("dead_letter", e))?;

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("dead_letter", e))
    }

    #[instrument(skip(self), err)]
    async fn list_dead_letters(&self, limit: usize) -> Result<Vec<DeadLetterEntry>, RunStoreError> {
        let rows = sqlx::query(
            r#"
            SELECT reason, dead_lettered_at, body FROM job_dead_letters
            ORDER BY dead_lettered_at ASC
            LIMIT $1
            "#,
        )
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("list_dead_letters", e))?;

        rows.iter().map(decode_dead_letter).collect()
    }

    #[instrument(skip(self), fields(run_id = %run_id), err)]
    async fn replay_dead_letter(&self, run_id: RunId) -> Result<Run, RunStoreError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("replay_dead_letter", e))?;

        let row = sqlx::query(
            "DELETE FROM job_dead_letters WHERE run_id = $1 RETURNING reason, dead_lettered_at, body",
        )
        .bind(run_id.as_uuid())
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("replay_dead_letter", e))?
        .ok_or(RunStoreError::NotFound(run_id))?;
        let old = decode_dead_letter(&row)?.run;

        sqlx::query("DELETE FROM job_steps WHERE run_id = $1")
            .bind(run_id.as_uuid())
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("replay_dead_letter", e))?;

        let run = Run::new(old.function_id, old.envelope).with_retry_policy(old.retry_policy);
        sqlx::query(
            r#"
            INSERT INTO job_runs (id, function_id, status, scheduled_at, created_at, updated_at, body)
            VALUES ($1, $2, $3, NULL, $4, $5, $6)
            "#,
        )
        .bind(run.id.as_uuid())
        .bind(&run.function_id)
        .bind(run.status.as_str())
        .bind(run.created_at)
        .bind(run.updated_at)
        .bind(encode(&run)?)
        .execute(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("replay_dead_letter", e))?;

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("replay_dead_letter", e))?;
        Ok(run)
    }

    #[instrument(skip(self), fields(run_id = %run_id), err)]
    async fn delete_dead_letter(&self, run_id: RunId) -> Result<(), RunStoreError> {
        let result = sqlx::query("DELETE FROM job_dead_letters WHERE run_id = $1")
            .bind(run_id.as_uuid())
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("delete_dead_letter", e))?;
        if result.rows_affected() == 0 {
            return Err(RunStoreError::NotFound(run_id));
        }

        sqlx::query("DELETE FROM job_steps WHERE run_id = $1")
            .bind(run_id.as_uuid())
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("delete_dead_letter", e))?;
        Ok(())
    }

    #[instrument(skip(self), err)]
    async fn purge_completed(
        &self,
        finished_before: DateTime<Utc>,
    ) -> Result<usize, RunStoreError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("purge_completed", e))?;

        let purged = sqlx::query(
            r#"
            DELETE FROM job_runs
            WHERE status = 'completed' AND updated_at < $1
            RETURNING id
            "#,
        )
        .bind(finished_before)
        .fetch_all(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("purge_completed", e))?;

        let ids = purged
            .iter()
            .map(|row| row.try_get::<uuid::Uuid, _>("id"))
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| map_sqlx_error("purge_completed", e))?;

        // Memo rows of runs completed before steps were dropped on completion.
        sqlx::query("DELETE FROM job_steps WHERE run_id = ANY($1)")
            .bind(&ids)
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("purge_completed", e))?;

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("purge_completed", e))?;
        Ok(ids.len())
    }

    #[instrument(skip(self), err)]
    async fn stats(&self) -> Result<RunStats, RunStoreError> {
        let rows = sqlx::query(
            r#"
            SELECT status, COUNT(*) AS total FROM job_runs GROUP BY status
            UNION ALL
            SELECT 'dead_lettered' AS status, COUNT(*) AS total FROM job_dead_letters
            "#,
        )
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("stats", e))?;

        let mut stats = RunStats::default();
        for row in rows {
            let status: String = row.try_get("status").map_err(|e| map_sqlx_error("stats", e))?;
            let total: i64 = row.try_get("total").map_err(|e| map_sqlx_error("stats", e))?;
            let total = usize::try_from(total).unwrap_or_default();
            match status.as_str() {
                "pending" => stats.pending += total,
                "running" => stats.running += total,
                "retrying" => stats.retrying += total,
                "completed" => stats.completed += total,
                "dead_lettered" => stats.dead_lettered += total,
                _ => {}
            }
        }
        Ok(stats)
    }
}
